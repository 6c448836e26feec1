use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;

use crate::sqlite::configure_connection;

const TASKS_SCHEMA: &str = include_str!("../../sql/tasks.sql");

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to open task ledger {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on task ledger: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("task ledger path not configured")]
    MissingStore,
    #[error("invalid task status: {0}")]
    InvalidStatus(String),
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Cleaned,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Completed => "completed",
            TaskStatus::Cleaned => "cleaned",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "cleaned" => Ok(Self::Cleaned),
            other => Err(LedgerError::InvalidStatus(other.to_string())),
        }
    }
}

/// One finished acquisition as handed to the ledger.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: String,
    pub durable_reference: String,
    pub created_at: DateTime<Utc>,
    pub original_link: Option<String>,
    pub platform: Option<String>,
    pub title: Option<String>,
    pub strategy_used: Option<String>,
    pub byte_size: Option<u64>,
    pub checksum: Option<String>,
}

impl TaskRecord {
    pub fn new(
        task_id: impl Into<String>,
        durable_reference: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            durable_reference: durable_reference.into(),
            created_at,
            original_link: None,
            platform: None,
            title: None,
            strategy_used: None,
            byte_size: None,
            checksum: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskEntry {
    pub task_id: String,
    pub durable_reference: String,
    pub original_link: Option<String>,
    pub platform: Option<String>,
    pub title: Option<String>,
    pub strategy_used: Option<String>,
    pub byte_size: Option<i64>,
    pub checksum: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub cleaned_at: Option<DateTime<Utc>>,
}

impl TaskEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            task_id: row.get("task_id")?,
            durable_reference: row.get("durable_reference")?,
            original_link: row.get("original_link")?,
            platform: row.get("platform")?,
            title: row.get("title")?,
            strategy_used: row.get("strategy_used")?,
            byte_size: row.get("byte_size")?,
            checksum: row.get("checksum")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(TaskStatus::Completed),
            created_at: row.get("created_at")?,
            expires_at: row.get("expires_at")?,
            cleaned_at: row.get("cleaned_at")?,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub limit: Option<usize>,
}

/// Durable record of finished acquisitions.
pub trait TaskLedger: Send + Sync {
    /// Stores the task with `expires_at = created_at + expiry` and returns that expiry.
    fn record(&self, record: &TaskRecord) -> LedgerResult<DateTime<Utc>>;

    fn find(&self, task_id: &str) -> LedgerResult<Option<TaskEntry>>;

    /// Completed tasks whose expiry is at or before `now`.
    fn expired(&self, now: DateTime<Utc>) -> LedgerResult<Vec<TaskEntry>>;

    fn mark_cleaned(&self, task_id: &str, now: DateTime<Utc>) -> LedgerResult<()>;
}

#[derive(Debug, Clone)]
pub struct SqliteTaskLedgerBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
    expiry_hours: i64,
}

impl Default for SqliteTaskLedgerBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
            expiry_hours: 24,
        }
    }
}

impl SqliteTaskLedgerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn expiry_hours(mut self, hours: i64) -> Self {
        self.expiry_hours = hours;
        self
    }

    pub fn build(self) -> LedgerResult<SqliteTaskLedger> {
        let path = self.path.ok_or(LedgerError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteTaskLedger {
            path,
            flags,
            expiry: Duration::hours(self.expiry_hours),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteTaskLedger {
    path: PathBuf,
    flags: OpenFlags,
    expiry: Duration,
}

impl SqliteTaskLedger {
    pub fn builder() -> SqliteTaskLedgerBuilder {
        SqliteTaskLedgerBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> LedgerResult<Self> {
        SqliteTaskLedgerBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> LedgerResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            LedgerError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| LedgerError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> LedgerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                    source,
                    path: parent.to_path_buf(),
                })?;
            }
        }
        let conn = self.open()?;
        conn.execute_batch(TASKS_SCHEMA)?;
        Ok(())
    }

    pub fn list(&self, filter: &TaskFilter) -> LedgerResult<Vec<TaskEntry>> {
        let conn = self.open()?;
        let mut query = String::from("SELECT * FROM acquisition_tasks");
        let mut params: Vec<Value> = Vec::new();
        if let Some(status) = filter.status {
            query.push_str(" WHERE status = ?");
            params.push(Value::Text(status.as_str().to_string()));
        }
        query.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            query.push_str(" LIMIT ?");
            params.push(Value::Integer(limit as i64));
        }
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(
            params.iter().map(|value| value as &dyn rusqlite::ToSql),
        ))?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(TaskEntry::from_row(row)?);
        }
        Ok(entries)
    }
}

impl TaskLedger for SqliteTaskLedger {
    fn record(&self, record: &TaskRecord) -> LedgerResult<DateTime<Utc>> {
        let expires_at = record.created_at + self.expiry;
        let conn = self.open()?;
        conn.execute(
            "INSERT OR REPLACE INTO acquisition_tasks (
                task_id, durable_reference, original_link, platform, title, strategy_used,
                byte_size, checksum, status, created_at, expires_at, cleaned_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'completed', ?9, ?10, NULL)",
            params![
                &record.task_id,
                &record.durable_reference,
                &record.original_link,
                &record.platform,
                &record.title,
                &record.strategy_used,
                record.byte_size.map(|size| size as i64),
                &record.checksum,
                record.created_at,
                expires_at,
            ],
        )?;
        Ok(expires_at)
    }

    fn find(&self, task_id: &str) -> LedgerResult<Option<TaskEntry>> {
        let conn = self.open()?;
        let entry = conn
            .query_row(
                "SELECT * FROM acquisition_tasks WHERE task_id = ?1",
                params![task_id],
                |row| TaskEntry::from_row(row),
            )
            .optional()?;
        Ok(entry)
    }

    fn expired(&self, now: DateTime<Utc>) -> LedgerResult<Vec<TaskEntry>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM acquisition_tasks
             WHERE status = 'completed' AND expires_at <= ?1
             ORDER BY expires_at ASC",
        )?;
        let mut rows = stmt.query(params![now])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(TaskEntry::from_row(row)?);
        }
        Ok(entries)
    }

    fn mark_cleaned(&self, task_id: &str, now: DateTime<Utc>) -> LedgerResult<()> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE acquisition_tasks SET status = 'cleaned', cleaned_at = ?2 WHERE task_id = ?1",
            params![task_id, now],
        )?;
        if updated == 0 {
            return Err(LedgerError::NotFound(task_id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn ledger(dir: &TempDir) -> SqliteTaskLedger {
        let ledger = SqliteTaskLedger::builder()
            .path(dir.path().join("db/tasks.sqlite"))
            .expiry_hours(24)
            .build()
            .unwrap();
        ledger.initialize().unwrap();
        ledger
    }

    #[test]
    fn record_computes_expiry_and_round_trips() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut record = TaskRecord::new("task_1", "file:///tmp/a.mp4", created);
        record.strategy_used = Some("crop_reencode".into());
        record.byte_size = Some(2048);

        let expires = ledger.record(&record).unwrap();
        assert_eq!(expires, created + Duration::hours(24));

        let entry = ledger.find("task_1").unwrap().unwrap();
        assert_eq!(entry.status, TaskStatus::Completed);
        assert_eq!(entry.expires_at, expires);
        assert_eq!(entry.byte_size, Some(2048));
        assert!(ledger.find("task_missing").unwrap().is_none());
    }

    #[test]
    fn expired_only_returns_completed_tasks_past_expiry() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        let old = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let fresh = Utc.with_ymd_and_hms(2024, 5, 2, 6, 0, 0).unwrap();
        ledger.record(&TaskRecord::new("task_old", "file:///a", old)).unwrap();
        ledger.record(&TaskRecord::new("task_fresh", "file:///b", fresh)).unwrap();
        ledger.record(&TaskRecord::new("task_gone", "file:///c", old)).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        ledger.mark_cleaned("task_gone", now).unwrap();

        let expired: Vec<_> = ledger
            .expired(now)
            .unwrap()
            .into_iter()
            .map(|entry| entry.task_id)
            .collect();
        assert_eq!(expired, vec!["task_old".to_string()]);

        let cleaned = ledger
            .list(&TaskFilter {
                status: Some(TaskStatus::Cleaned),
                limit: None,
            })
            .unwrap();
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].cleaned_at, Some(now));
        assert!(matches!(
            ledger.mark_cleaned("task_missing", now),
            Err(LedgerError::NotFound(_))
        ));
    }
}
