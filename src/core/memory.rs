//! Conversation session storage using SQLite
//!
//! Sessions are append-only and strictly insertion ordered. A chat turn is
//! committed as a unit (user message + assistant answer) once generation
//! succeeds; aborted or failed turns never reach this store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::conversation::{Message, Role};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session storage error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A stored message with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<StoredMessage> for Message {
    fn from(stored: StoredMessage) -> Self {
        Message {
            role: stored.role,
            content: stored.content,
            timestamp: stored.created_at,
        }
    }
}

type MessageRow = (i64, String, String, String, String);

fn row_to_stored((id, conversation_id, role, content, created_at): MessageRow) -> StoredMessage {
    StoredMessage {
        id,
        conversation_id,
        role: Role::parse(&role),
        content,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    }
}

/// Session store for conversation persistence
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Create a new session store with the given SQLite database path
    pub async fn new(db_path: &Path) -> Result<Self, SessionError> {
        // Create parent directories if they don't exist
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create an in-memory store
    pub async fn new_in_memory() -> Result<Self, SessionError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Initialize the database schema
    async fn init_schema(&self) -> Result<(), SessionError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append a single message to a conversation
    pub async fn append(
        &self,
        conversation_id: &str,
        message: &Message,
    ) -> Result<(), SessionError> {
        self.append_all(conversation_id, std::slice::from_ref(message))
            .await
    }

    /// Commit a finished turn atomically: the messages that led to the
    /// answer (seeded history, the user's message) followed by the answer.
    pub async fn append_turn(
        &self,
        conversation_id: &str,
        pending: &[Message],
        answer: &Message,
    ) -> Result<(), SessionError> {
        let mut messages = pending.to_vec();
        messages.push(answer.clone());
        self.append_all(conversation_id, &messages).await
    }

    /// Append messages in order inside one transaction
    async fn append_all(
        &self,
        conversation_id: &str,
        messages: &[Message],
    ) -> Result<(), SessionError> {
        let mut tx = self.pool.begin().await?;

        // Ensure conversation exists
        sqlx::query("INSERT OR IGNORE INTO conversations (id) VALUES (?)")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE conversations SET updated_at = datetime('now') WHERE id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        for message in messages {
            sqlx::query(
                r#"
                INSERT INTO messages (conversation_id, role, content, created_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(conversation_id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(message.timestamp.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// All committed messages of a conversation, oldest first
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<Message>, SessionError> {
        Ok(self
            .stored_messages(conversation_id)
            .await?
            .into_iter()
            .map(Message::from)
            .collect())
    }

    pub async fn stored_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, SessionError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, conversation_id, role, content, created_at
            FROM messages
            WHERE conversation_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_stored).collect())
    }

    pub async fn exists(&self, conversation_id: &str) -> Result<bool, SessionError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Delete a conversation and all its messages. Returns whether it existed.
    pub async fn delete(&self, conversation_id: &str) -> Result<bool, SessionError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_history_keeps_insertion_order() {
        let store = SessionStore::new_in_memory().await.unwrap();
        let conversation_id = "test-conv-1";

        store.append(conversation_id, &Message::user("Halo")).await.unwrap();
        store
            .append_turn(
                conversation_id,
                &[Message::user("Apa itu tugas akhir?")],
                &Message::assistant("Tugas akhir adalah..."),
            )
            .await
            .unwrap();
        // duplicates are kept
        store.append(conversation_id, &Message::user("Halo")).await.unwrap();

        let messages = store.history(conversation_id).await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["Halo", "Apa itu tugas akhir?", "Tugas akhir adalah...", "Halo"]
        );
        assert_eq!(messages[2].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_conversations_are_isolated() {
        let store = SessionStore::new_in_memory().await.unwrap();
        store.append("conv1", &Message::user("Message 1")).await.unwrap();
        store.append("conv2", &Message::user("Message 2")).await.unwrap();

        let conv1 = store.history("conv1").await.unwrap();
        assert_eq!(conv1.len(), 1);
        assert_eq!(conv1[0].content, "Message 1");
        assert!(store.history("conv3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_conversation() {
        let store = SessionStore::new_in_memory().await.unwrap();
        store.append("conv1", &Message::user("Message 1")).await.unwrap();

        assert!(store.exists("conv1").await.unwrap());
        assert!(store.delete("conv1").await.unwrap());
        assert!(!store.exists("conv1").await.unwrap());
        assert!(store.history("conv1").await.unwrap().is_empty());
        assert!(!store.delete("conv1").await.unwrap());
    }

    #[tokio::test]
    async fn test_timestamps_survive_storage() {
        let store = SessionStore::new_in_memory().await.unwrap();
        let msg = Message::user("Halo");
        store.append("c", &msg).await.unwrap();

        let stored = store.stored_messages("c").await.unwrap();
        assert_eq!(stored[0].created_at.timestamp(), msg.timestamp.timestamp());
        assert_eq!(stored[0].conversation_id, "c");
    }
}
