use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::ledger::{CallOutcome, UsageLogEntry};
use crate::quota::EndpointCategory;

use super::error::StorageError;
use super::schema::init_usage_log;
use super::{format_timestamp, open_connection, parse_timestamp, USAGE_DB_FILENAME};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTotals {
    pub cost: u64,
    pub requests: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUsageRow {
    pub endpoint: String,
    pub count: u64,
    pub cost: u64,
    pub errors: u64,
}

/// Append-only SQLite table of metered calls.
pub struct UsageLogStore {
    conn: Mutex<Connection>,
}

impl UsageLogStore {
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        let conn = open_connection(&data_dir.join(USAGE_DB_FILENAME))?;
        init_usage_log(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        init_usage_log(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    pub fn insert(&self, entry: &UsageLogEntry) -> Result<i64, StorageError> {
        let conn = self.lock()?;
        let request = entry
            .request
            .as_ref()
            .map(serde_json::Value::to_string);

        conn.execute(
            r#"
            INSERT INTO api_request_logs
                (timestamp, endpoint_type, method_name, request_params, status, error_message, quota_cost, response_time_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                format_timestamp(&entry.timestamp),
                entry.category.as_str(),
                entry.method,
                request,
                entry.outcome.as_str(),
                entry.error,
                entry.cost as i64,
                entry.latency.as_millis() as i64,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    pub fn totals_since(&self, since: &DateTime<Utc>) -> Result<UsageTotals, StorageError> {
        let conn = self.lock()?;
        let totals = conn.query_row(
            r#"
            SELECT
                COALESCE(SUM(quota_cost), 0),
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END), 0)
            FROM api_request_logs
            WHERE timestamp >= ?1
            "#,
            params![format_timestamp(since)],
            |row| {
                Ok(UsageTotals {
                    cost: row.get::<_, i64>(0)? as u64,
                    requests: row.get::<_, i64>(1)? as u64,
                    errors: row.get::<_, i64>(2)? as u64,
                })
            },
        )?;
        Ok(totals)
    }

    pub fn cost_after(&self, after: &DateTime<Utc>) -> Result<u64, StorageError> {
        let conn = self.lock()?;
        let total = conn.query_row(
            "SELECT COALESCE(SUM(quota_cost), 0) FROM api_request_logs WHERE timestamp > ?1",
            params![format_timestamp(after)],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(total as u64)
    }

    pub fn endpoint_breakdown(
        &self,
        since: &DateTime<Utc>,
    ) -> Result<Vec<EndpointUsageRow>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT
                endpoint_type,
                COUNT(*),
                COALESCE(SUM(quota_cost), 0) AS total_cost,
                COALESCE(SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END), 0)
            FROM api_request_logs
            WHERE timestamp >= ?1
            GROUP BY endpoint_type
            ORDER BY total_cost DESC, endpoint_type ASC
            "#,
        )?;

        let rows = stmt.query_map(params![format_timestamp(since)], |row| {
            Ok(EndpointUsageRow {
                endpoint: row.get(0)?,
                count: row.get::<_, i64>(1)? as u64,
                cost: row.get::<_, i64>(2)? as u64,
                errors: row.get::<_, i64>(3)? as u64,
            })
        })?;

        let mut breakdown = Vec::new();
        for row in rows {
            breakdown.push(row?);
        }
        Ok(breakdown)
    }

    /// Raw `(timestamp, cost)` pairs, bucketed by the caller in its own timezone.
    pub fn costs_since(
        &self,
        since: &DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, u64)>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT timestamp, quota_cost
            FROM api_request_logs
            WHERE timestamp >= ?1
            ORDER BY timestamp ASC
            "#,
        )?;

        let rows = stmt.query_map(params![format_timestamp(since)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut costs = Vec::new();
        for row in rows {
            let (timestamp, cost) = row?;
            costs.push((parse_timestamp(&timestamp)?, cost as u64));
        }
        Ok(costs)
    }

    /// Newest first. `inclusive` selects `>=` (day start) versus `>` (replay cursor).
    pub fn list_since(
        &self,
        since: &DateTime<Utc>,
        inclusive: bool,
        limit: usize,
    ) -> Result<Vec<UsageLogEntry>, StorageError> {
        let conn = self.lock()?;
        let sql = if inclusive {
            r#"
            SELECT id, timestamp, endpoint_type, method_name, request_params, status, error_message, quota_cost, response_time_ms
            FROM api_request_logs
            WHERE timestamp >= ?1
            ORDER BY timestamp DESC, id DESC
            LIMIT ?2
            "#
        } else {
            r#"
            SELECT id, timestamp, endpoint_type, method_name, request_params, status, error_message, quota_cost, response_time_ms
            FROM api_request_logs
            WHERE timestamp > ?1
            ORDER BY timestamp DESC, id DESC
            LIMIT ?2
            "#
        };

        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params![format_timestamp(since), limit as i64])?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(entry_from_row(row)?);
        }
        Ok(entries)
    }

    pub fn count(&self) -> Result<u64, StorageError> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM api_request_logs", [], |row| {
            row.get::<_, i64>(0)
        })?;
        Ok(count as u64)
    }
}

fn entry_from_row(row: &Row<'_>) -> Result<UsageLogEntry, StorageError> {
    let timestamp: String = row.get(1)?;
    let category: String = row.get(2)?;
    let request: Option<String> = row.get(4)?;
    let status: String = row.get(5)?;

    Ok(UsageLogEntry {
        id: Some(row.get(0)?),
        timestamp: parse_timestamp(&timestamp)?,
        category: category
            .parse::<EndpointCategory>()
            .map_err(StorageError::InvalidRecord)?,
        method: row.get(3)?,
        request: request.and_then(|raw| serde_json::from_str(&raw).ok()),
        outcome: status
            .parse::<CallOutcome>()
            .map_err(StorageError::InvalidRecord)?,
        error: row.get(6)?,
        cost: row.get::<_, i64>(7)? as u64,
        latency: Duration::from_millis(row.get::<_, i64>(8)? as u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn entry(category: EndpointCategory, cost: u64, at: DateTime<Utc>) -> UsageLogEntry {
        UsageLogEntry::success(category, "test", cost, Duration::from_millis(12)).at(at)
    }

    #[test]
    fn insert_assigns_monotonic_ids() {
        let store = UsageLogStore::in_memory().unwrap();
        let now = Utc::now();
        let first = store
            .insert(&entry(EndpointCategory::Videos, 1, now))
            .unwrap();
        let second = store
            .insert(&entry(EndpointCategory::Videos, 1, now))
            .unwrap();
        assert!(second > first);
    }

    #[test]
    fn totals_only_count_rows_in_range() {
        let store = UsageLogStore::in_memory().unwrap();
        let now = Utc::now();
        let yesterday = now - ChronoDuration::days(1);

        store
            .insert(&entry(EndpointCategory::Search, 100, yesterday))
            .unwrap();
        store
            .insert(&entry(EndpointCategory::LiveChatMessages, 5, now))
            .unwrap();
        store
            .insert(
                &UsageLogEntry::failure(
                    EndpointCategory::LiveChatMessages,
                    "test",
                    5,
                    Duration::from_millis(3),
                    "boom",
                )
                .at(now),
            )
            .unwrap();

        let totals = store
            .totals_since(&(now - ChronoDuration::hours(1)))
            .unwrap();
        assert_eq!(
            totals,
            UsageTotals {
                cost: 10,
                requests: 2,
                errors: 1
            }
        );
    }

    #[test]
    fn endpoint_breakdown_orders_by_cost() {
        let store = UsageLogStore::in_memory().unwrap();
        let now = Utc::now();
        store
            .insert(&entry(EndpointCategory::Videos, 1, now))
            .unwrap();
        store
            .insert(&entry(EndpointCategory::Search, 100, now))
            .unwrap();
        store
            .insert(&entry(EndpointCategory::Videos, 1, now))
            .unwrap();

        let breakdown = store
            .endpoint_breakdown(&(now - ChronoDuration::minutes(1)))
            .unwrap();
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown[0].endpoint, "search.list");
        assert_eq!(breakdown[0].cost, 100);
        assert_eq!(breakdown[1].endpoint, "videos.list");
        assert_eq!(breakdown[1].count, 2);
        assert_eq!(breakdown[1].cost, 2);
    }

    #[test]
    fn list_since_round_trips_entries() {
        let store = UsageLogStore::in_memory().unwrap();
        let now = Utc::now();
        let original = UsageLogEntry::failure(
            EndpointCategory::Channels,
            "uploads_playlist",
            1,
            Duration::from_millis(40),
            "status 500",
        )
        .with_request(serde_json::json!({ "channelId": "UC123" }))
        .at(now);
        store.insert(&original).unwrap();

        let listed = store
            .list_since(&(now - ChronoDuration::seconds(5)), true, 10)
            .unwrap();
        assert_eq!(listed.len(), 1);
        let stored = &listed[0];
        assert!(stored.id.is_some());
        assert_eq!(stored.category, EndpointCategory::Channels);
        assert_eq!(stored.outcome, CallOutcome::Error);
        assert_eq!(stored.error.as_deref(), Some("status 500"));
        assert_eq!(stored.request, original.request);
        assert_eq!(stored.latency, Duration::from_millis(40));
    }

    #[test]
    fn exclusive_listing_skips_the_cursor_row() {
        let store = UsageLogStore::in_memory().unwrap();
        let cursor = Utc::now() - ChronoDuration::seconds(10);
        store
            .insert(&entry(EndpointCategory::Videos, 1, cursor))
            .unwrap();
        store
            .insert(&entry(EndpointCategory::Videos, 1, Utc::now()))
            .unwrap();

        assert_eq!(store.list_since(&cursor, false, 10).unwrap().len(), 1);
        assert_eq!(store.list_since(&cursor, true, 10).unwrap().len(), 2);
        assert_eq!(store.cost_after(&cursor).unwrap(), 1);
    }
}
