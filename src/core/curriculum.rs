//! Curriculum reference document

use std::path::PathBuf;

use async_trait::async_trait;

#[async_trait]
pub trait CurriculumSource: Send + Sync {
    async fn load_curriculum_text(&self) -> std::io::Result<String>;
}

/// Reads the catalog from disk on every call so edits apply without a restart.
pub struct FileCurriculum {
    path: PathBuf,
}

impl FileCurriculum {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CurriculumSource for FileCurriculum {
    async fn load_curriculum_text(&self) -> std::io::Result<String> {
        tokio::fs::read_to_string(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_file_and_reports_missing() {
        let dir = std::env::temp_dir().join(format!("syaki-curriculum-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("kurikulum.md");
        tokio::fs::write(&path, "IF101 Algoritma (4 SKS)").await.unwrap();

        let source = FileCurriculum::new(&path);
        assert_eq!(
            source.load_curriculum_text().await.unwrap(),
            "IF101 Algoritma (4 SKS)"
        );

        let missing = FileCurriculum::new(dir.join("missing.md"));
        assert!(missing.load_curriculum_text().await.is_err());

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
