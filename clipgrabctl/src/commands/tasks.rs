use clap::{Args, Subcommand};
use clipgrab_core::{TaskEntry, TaskProgress};
use serde::Serialize;

use crate::DisplayFallback;

#[derive(Subcommand, Debug)]
pub enum TasksCommands {
    /// List recorded acquisitions, newest first
    List(TaskListArgs),
    /// Show progress and details of one task
    Show(TaskShowArgs),
}

#[derive(Args, Debug)]
pub struct TaskListArgs {
    /// Filter by status (completed | cleaned)
    #[arg(long)]
    pub status: Option<String>,
    /// Maximum number of rows
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct TaskShowArgs {
    /// Task id as returned by `fetch`
    pub task_id: String,
}

#[derive(Debug, Serialize)]
pub struct TaskList {
    pub rows: Vec<TaskEntry>,
}

#[derive(Debug, Serialize)]
pub struct TaskDetail {
    pub progress: TaskProgress,
    pub entry: Option<TaskEntry>,
}

impl DisplayFallback for TaskList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No tasks recorded".to_string();
        }
        self.rows
            .iter()
            .map(|entry| {
                format!(
                    "{} | {} | status={} | platform={} | expires={}",
                    entry.task_id,
                    entry.title.as_deref().unwrap_or("<untitled>"),
                    entry.status,
                    entry.platform.as_deref().unwrap_or("-"),
                    entry.expires_at.to_rfc3339()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for TaskDetail {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "{}: {:?} ({}%)",
            self.progress.task_id, self.progress.status, self.progress.percent
        )];
        if let Some(entry) = &self.entry {
            lines.push(format!("reference: {}", entry.durable_reference));
            if let Some(link) = &entry.original_link {
                lines.push(format!("link: {link}"));
            }
            if let Some(strategy) = &entry.strategy_used {
                lines.push(format!("strategy: {strategy}"));
            }
            if let Some(checksum) = &entry.checksum {
                lines.push(format!("sha256: {checksum}"));
            }
            lines.push(format!("created: {}", entry.created_at.to_rfc3339()));
            lines.push(format!("expires: {}", entry.expires_at.to_rfc3339()));
            if let Some(cleaned) = entry.cleaned_at {
                lines.push(format!("cleaned: {}", cleaned.to_rfc3339()));
            }
        }
        lines.join("\n")
    }
}
