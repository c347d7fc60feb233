use rusqlite::Connection;

use super::StorageError;

pub const USAGE_LOG_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS api_request_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    endpoint_type TEXT NOT NULL,
    method_name TEXT NOT NULL,
    request_params TEXT,
    status TEXT NOT NULL,
    error_message TEXT,
    quota_cost INTEGER NOT NULL,
    response_time_ms INTEGER NOT NULL
);
"#;

pub const USAGE_LOG_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_request_logs_timestamp ON api_request_logs(timestamp);
CREATE INDEX IF NOT EXISTS idx_request_logs_endpoint ON api_request_logs(endpoint_type);
"#;

pub const CHAT_MESSAGES_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chat_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id TEXT NOT NULL UNIQUE,
    video_id TEXT,
    live_chat_id TEXT,
    author_name TEXT NOT NULL,
    message_text TEXT NOT NULL,
    published_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

pub const CHAT_MESSAGES_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_chat_messages_video ON chat_messages(video_id);
CREATE INDEX IF NOT EXISTS idx_chat_messages_published ON chat_messages(published_at DESC);
"#;

pub fn init_usage_log(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(USAGE_LOG_TABLE_SCHEMA)?;
    conn.execute_batch(USAGE_LOG_INDEXES)?;
    Ok(())
}

pub fn init_chat_messages(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(CHAT_MESSAGES_TABLE_SCHEMA)?;
    conn.execute_batch(CHAT_MESSAGES_INDEXES)?;
    Ok(())
}
