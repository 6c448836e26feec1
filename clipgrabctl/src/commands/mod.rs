pub mod acquire;
pub mod tasks;

pub use acquire::{
    Classification, CleanupArgs, CleanupSummary, FetchArgs, LinkArgs, Resolution,
};
pub use tasks::{TaskDetail, TaskList, TaskListArgs, TaskShowArgs, TasksCommands};
