pub mod error;
pub mod messages;
pub mod schema;
pub mod usage_log;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

pub use error::StorageError;
pub use messages::{MessageQuery, MessageStore, StoredMessage};
pub use usage_log::{EndpointUsageRow, UsageLogStore, UsageTotals};

pub const USAGE_DB_FILENAME: &str = "usage.db";
pub const MESSAGES_DB_FILENAME: &str = "messages.db";

fn open_connection(path: &Path) -> Result<Connection, StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/// Fixed-width UTC RFC 3339 so that lexical order in SQLite matches time order.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| StorageError::InvalidRecord(format!("bad timestamp {raw}: {err}")))
}
