//! Priority-based task scheduling on a fixed pool of worker threads.
//!
//! Callers submit short-lived work items tagged with a task group; workers
//! drain them in priority order while the scheduler accumulates per-group
//! statistics, cancels queued work on demand, routes failures to registered
//! error observers and periodically reports progress.

mod error;
mod queue;
mod scheduler;
mod task;

pub use error::{ScheduledTaskError, SchedulerError};
pub use queue::TaskStat;
pub use scheduler::{
    DEFAULT_REPORT_INTERVAL, DEFAULT_WAIT_INTERVAL, ErrorObserver, Scheduler, TodoCount,
};
pub use task::{ScheduledTask, TaskFn, TaskParam};
