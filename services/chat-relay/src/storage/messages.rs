use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ToSql};
use serde::Serialize;

use crate::upstream::ChatMessage;

use super::error::StorageError;
use super::schema::init_chat_messages;
use super::{format_timestamp, open_connection, parse_timestamp, MESSAGES_DB_FILENAME};

pub const DEFAULT_MESSAGE_PAGE: usize = 100;
pub const MAX_MESSAGE_PAGE: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub limit: Option<usize>,
    pub offset: usize,
    pub video_id: Option<String>,
    /// Only messages published strictly after this instant.
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub stored_at: DateTime<Utc>,
}

/// Chat history keyed by the upstream message id.
pub struct MessageStore {
    conn: Mutex<Connection>,
}

impl MessageStore {
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        let conn = open_connection(&data_dir.join(MESSAGES_DB_FILENAME))?;
        init_chat_messages(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        init_chat_messages(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    /// Inserts in one transaction and returns the messages that were not
    /// already stored, in input order. Known ids are skipped silently.
    pub fn save_messages(&self, messages: &[ChatMessage]) -> Result<Vec<ChatMessage>, StorageError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = format_timestamp(&Utc::now());
        let mut inserted = Vec::new();

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO chat_messages
                    (message_id, video_id, live_chat_id, author_name, message_text, published_at, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;

            for message in messages {
                let changed = stmt.execute(params![
                    message.message_id,
                    message.video_id,
                    message.live_chat_id,
                    message.author_name,
                    message.text,
                    format_timestamp(&message.published_at),
                    now,
                ])?;
                if changed > 0 {
                    inserted.push(message.clone());
                }
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// Newest first.
    pub fn list(&self, query: &MessageQuery) -> Result<Vec<StoredMessage>, StorageError> {
        let conn = self.lock()?;
        let limit = query
            .limit
            .unwrap_or(DEFAULT_MESSAGE_PAGE)
            .clamp(1, MAX_MESSAGE_PAGE) as i64;
        let offset = query.offset as i64;
        let since = query.since.as_ref().map(format_timestamp);

        let mut sql = String::from(
            "SELECT message_id, video_id, live_chat_id, author_name, message_text, published_at, created_at \
             FROM chat_messages WHERE 1 = 1",
        );
        let mut args: Vec<&dyn ToSql> = Vec::new();

        if let Some(video_id) = query.video_id.as_ref() {
            args.push(video_id);
            sql.push_str(&format!(" AND video_id = ?{}", args.len()));
        }
        if let Some(since) = since.as_ref() {
            args.push(since);
            sql.push_str(&format!(" AND published_at > ?{}", args.len()));
        }
        args.push(&limit);
        sql.push_str(&format!(" ORDER BY published_at DESC, id DESC LIMIT ?{}", args.len()));
        args.push(&offset);
        sql.push_str(&format!(" OFFSET ?{}", args.len()));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (message_id, video_id, live_chat_id, author_name, text, published_at, created_at) =
                row?;
            messages.push(StoredMessage {
                message: ChatMessage {
                    message_id,
                    author_name,
                    text,
                    published_at: parse_timestamp(&published_at)?,
                    video_id,
                    live_chat_id,
                },
                stored_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(messages)
    }

    pub fn count(&self) -> Result<u64, StorageError> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM chat_messages", [], |row| {
            row.get::<_, i64>(0)
        })?;
        Ok(count as u64)
    }
}
