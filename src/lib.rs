//! Priority task scheduling with cooperative coroutine primitives.
//!
//! The scheduler is the compute spine of the system: callers submit
//! short-lived work items tagged with a task group and workers drain them
//! in priority order. The coroutine layer composes on top so that
//! multi-step asynchronous operations read as linear code, and the
//! progress registry lets long-running jobs publish fractional completion.

pub use millrace_coro;
pub use millrace_log;
pub use millrace_progress;
pub use millrace_scheduling;
pub use millrace_util;

pub use millrace_coro::{ExternalTask, Generator, Task};
pub use millrace_progress::{Progress, ProgressGuard};
pub use millrace_scheduling::{ScheduledTask, Scheduler, SchedulerError, TaskStat};
