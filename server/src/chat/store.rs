//! Persistence gateway for team chat messages.
//!
//! The channel protocol handler and the REST chat routes both go through
//! [`ChatStore`], so a message is always durable before it is broadcast.

use chrono::Utc;
use serde::Serialize;

use crate::db::models::MessageRow;
use crate::db::DbPool;

/// Errors surfaced by a chat store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database lock poisoned")]
    LockPoisoned,
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("storage task failed: {0}")]
    Join(String),
    #[error("{0}")]
    Unavailable(String),
}

/// A persisted chat message as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: i64,
    #[serde(rename = "teamId")]
    pub team_id: String,
    pub sender: String,
    pub content: String,
    pub created_at: String,
}

impl From<MessageRow> for ChatMessage {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            team_id: row.team_id,
            sender: row.sender,
            content: row.content,
            created_at: row.created_at,
        }
    }
}

/// Durable storage for chat messages.
///
/// Implementations are synchronous; async callers run them on
/// `tokio::task::spawn_blocking`.
pub trait ChatStore: Send + Sync + 'static {
    /// Insert a message and return the stored row with its server-assigned
    /// id and timestamp.
    fn insert_chat_message(
        &self,
        team_id: &str,
        sender: &str,
        content: &str,
    ) -> Result<ChatMessage, StoreError>;

    /// Messages for a team in ascending id order. `before` is an exclusive
    /// upper bound on the id; the newest `limit` rows below it are returned.
    fn list_team_messages(
        &self,
        team_id: &str,
        before: Option<i64>,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, StoreError>;
}

/// SQLite-backed [`ChatStore`] sharing the application's connection.
#[derive(Clone)]
pub struct SqliteChatStore {
    db: DbPool,
}

impl SqliteChatStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

impl ChatStore for SqliteChatStore {
    fn insert_chat_message(
        &self,
        team_id: &str,
        sender: &str,
        content: &str,
    ) -> Result<ChatMessage, StoreError> {
        let conn = self.db.lock().map_err(|_| StoreError::LockPoisoned)?;
        let created_at = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO messages (team_id, sender, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![team_id, sender, content, created_at],
        )?;

        let row = MessageRow {
            id: conn.last_insert_rowid(),
            team_id: team_id.to_string(),
            sender: sender.to_string(),
            content: content.to_string(),
            created_at,
        };
        Ok(row.into())
    }

    fn list_team_messages(
        &self,
        team_id: &str,
        before: Option<i64>,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let conn = self.db.lock().map_err(|_| StoreError::LockPoisoned)?;
        let before = before.unwrap_or(i64::MAX);

        let mut stmt = conn.prepare(
            "SELECT id, team_id, sender, content, created_at FROM messages
             WHERE team_id = ?1 AND id < ?2
             ORDER BY id DESC LIMIT ?3",
        )?;

        let mut messages: Vec<ChatMessage> = stmt
            .query_map(rusqlite::params![team_id, before, limit], |row| {
                Ok(MessageRow {
                    id: row.get(0)?,
                    team_id: row.get(1)?,
                    sender: row.get(2)?,
                    content: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .map(ChatMessage::from)
            .collect();

        messages.reverse();
        Ok(messages)
    }
}
