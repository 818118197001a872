//! Read-only access to the academic record store
//!
//! Users, semesters and classes are owned by the CRUD side of the
//! application; the assistant only ever reads them.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use super::user_context::{ClassEntry, Semester, UserAcademicRecord};

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_user_with_semesters_and_classes(
        &self,
        user_id: &str,
    ) -> Result<UserAcademicRecord, RecordError>;
}

/// Reader over the `users`, `semesters` and `classes` tables
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

type ClassRow = (String, String, String, String, String, String, String);

impl SqliteRecordStore {
    /// Open a read-only pool against an existing database.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_time(value: &str) -> Result<NaiveTime, RecordError> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| RecordError::Corrupt(format!("invalid class time '{}'", value)))
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn find_user_with_semesters_and_classes(
        &self,
        user_id: &str,
    ) -> Result<UserAcademicRecord, RecordError> {
        let user: Option<(String, Option<String>)> =
            sqlx::query_as("SELECT name, whatsapp_number FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        let (name, whatsapp_number) =
            user.ok_or_else(|| RecordError::NotFound(user_id.to_string()))?;

        let semesters: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT id, name
            FROM semesters
            WHERE user_id = ?
            ORDER BY CAST(name AS INTEGER), name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let rows: Vec<ClassRow> = sqlx::query_as(
            r#"
            SELECT c.semester_id, c.course, c.day, c.start_time, c.end_time, c.room, c.instructor
            FROM classes c
            JOIN semesters s ON s.id = c.semester_id
            WHERE s.user_id = ?
            ORDER BY c.start_time
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut by_semester: HashMap<String, Vec<ClassEntry>> = HashMap::new();
        for (semester_id, course, day, start, end, room, instructor) in rows {
            by_semester.entry(semester_id).or_default().push(ClassEntry {
                course,
                day,
                start_time: parse_time(&start)?,
                end_time: parse_time(&end)?,
                room,
                instructor,
            });
        }

        Ok(UserAcademicRecord {
            name,
            whatsapp_number,
            semesters: semesters
                .into_iter()
                .map(|(id, name)| Semester {
                    classes: by_semester.remove(&id).unwrap_or_default(),
                    name,
                })
                .collect(),
        })
    }
}
