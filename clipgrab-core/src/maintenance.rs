//! Housekeeping around the ledger: expiry cleanup, progress lookups and
//! removal of work directories left behind by crashed runs.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::ledger::{LedgerResult, TaskLedger, TaskStatus};
use crate::pipeline::WORK_DIR_PREFIX;
use crate::storage::ArtifactStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub examined: usize,
    pub cleaned: usize,
    pub failed: usize,
}

/// Deletes stored artifacts of expired tasks and marks them cleaned. A task
/// whose deletion fails stays `completed` and is retried on the next run.
pub async fn cleanup_expired(
    ledger: &dyn TaskLedger,
    store: &dyn ArtifactStore,
    now: DateTime<Utc>,
) -> LedgerResult<CleanupReport> {
    let expired = ledger.expired(now)?;
    let mut report = CleanupReport {
        examined: expired.len(),
        ..CleanupReport::default()
    };
    for task in expired {
        if let Err(error) = store.delete(&task.durable_reference).await {
            warn!(task_id = %task.task_id, error = %error, "failed to delete expired artifact");
            report.failed += 1;
            continue;
        }
        match ledger.mark_cleaned(&task.task_id, now) {
            Ok(()) => report.cleaned += 1,
            Err(error) => {
                warn!(task_id = %task.task_id, error = %error, "failed to mark task cleaned");
                report.failed += 1;
            }
        }
    }
    info!(
        examined = report.examined,
        cleaned = report.cleaned,
        failed = report.failed,
        "expired task cleanup finished"
    );
    Ok(report)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    NotFound,
    Completed,
    Cleaned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskProgress {
    pub task_id: String,
    pub status: ProgressStatus,
    pub percent: u8,
    pub expires_at: Option<DateTime<Utc>>,
}

pub fn task_progress(ledger: &dyn TaskLedger, task_id: &str) -> LedgerResult<TaskProgress> {
    let progress = match ledger.find(task_id)? {
        None => TaskProgress {
            task_id: task_id.to_string(),
            status: ProgressStatus::NotFound,
            percent: 0,
            expires_at: None,
        },
        Some(entry) => TaskProgress {
            task_id: entry.task_id,
            status: match entry.status {
                TaskStatus::Completed => ProgressStatus::Completed,
                TaskStatus::Cleaned => ProgressStatus::Cleaned,
            },
            percent: 100,
            expires_at: Some(entry.expires_at),
        },
    };
    Ok(progress)
}

/// Removes request work directories directly under `work_root` that are
/// older than `max_age`. Returns the removed paths.
pub fn sweep_stale_work_dirs(
    work_root: &Path,
    max_age: Duration,
    now: SystemTime,
) -> std::io::Result<Vec<PathBuf>> {
    if !work_root.exists() {
        return Ok(Vec::new());
    }
    let mut removed = Vec::new();
    for entry in WalkDir::new(work_root).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(error = %error, "failed to read work directory entry");
                continue;
            }
        };
        let is_request_dir = entry.file_type().is_dir()
            && entry
                .file_name()
                .to_string_lossy()
                .starts_with(WORK_DIR_PREFIX);
        if !is_request_dir {
            continue;
        }
        let modified = entry.metadata().ok().and_then(|meta| meta.modified().ok());
        let stale = modified
            .and_then(|modified| now.duration_since(modified).ok())
            .map(|age| age >= max_age)
            .unwrap_or(false);
        if !stale {
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                info!(path = %entry.path().display(), "removed stale work directory");
                removed.push(entry.path().to_path_buf());
            }
            Err(error) => {
                warn!(path = %entry.path().display(), error = %error, "failed to remove stale work directory")
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{SqliteTaskLedger, TaskRecord};
    use crate::storage::LocalArtifactStore;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn cleanup_deletes_expired_artifacts_and_reports_progress() {
        let dir = TempDir::new().unwrap();
        let ledger = SqliteTaskLedger::builder()
            .path(dir.path().join("tasks.sqlite"))
            .expiry_hours(24)
            .build()
            .unwrap();
        ledger.initialize().unwrap();
        let store = LocalArtifactStore::new(dir.path().join("store")).unwrap();

        let local = dir.path().join("out.mp4");
        std::fs::write(&local, b"video").unwrap();
        let stored = store.put(&local, "processed/task_a.mp4").await.unwrap();
        let created = Utc::now() - ChronoDuration::hours(30);
        ledger
            .record(&TaskRecord::new("task_a", &stored.reference, created))
            .unwrap();
        ledger
            .record(&TaskRecord::new("task_b", "file:///nowhere/b.mp4", Utc::now()))
            .unwrap();

        assert_eq!(task_progress(&ledger, "task_a").unwrap().percent, 100);
        assert_eq!(
            task_progress(&ledger, "task_zzz").unwrap().status,
            ProgressStatus::NotFound
        );

        let report = cleanup_expired(&ledger, &store, Utc::now()).await.unwrap();
        assert_eq!(
            report,
            CleanupReport {
                examined: 1,
                cleaned: 1,
                failed: 0
            }
        );
        assert!(!store.root().join("processed/task_a.mp4").exists());
        assert_eq!(
            task_progress(&ledger, "task_a").unwrap().status,
            ProgressStatus::Cleaned
        );
        assert_eq!(
            task_progress(&ledger, "task_b").unwrap().status,
            ProgressStatus::Completed
        );
    }

    #[test]
    fn sweep_only_touches_old_request_directories() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join(format!("{WORK_DIR_PREFIX}1_abc"));
        let unrelated = dir.path().join("keep-me");
        std::fs::create_dir_all(stale.join("nested")).unwrap();
        std::fs::create_dir_all(&unrelated).unwrap();

        let later = SystemTime::now() + Duration::from_secs(3 * 3600);
        let removed = sweep_stale_work_dirs(dir.path(), Duration::from_secs(2 * 3600), later).unwrap();
        assert_eq!(removed, vec![stale.clone()]);
        assert!(!stale.exists());
        assert!(unrelated.exists());

        let none = sweep_stale_work_dirs(dir.path(), Duration::from_secs(2 * 3600), SystemTime::now()).unwrap();
        assert!(none.is_empty());
        assert!(sweep_stale_work_dirs(&dir.path().join("absent"), Duration::ZERO, later)
            .unwrap()
            .is_empty());
    }
}
