//! Error types surfaced by the scheduler.

use std::{any::Any, fmt};

use crate::task::TaskParam;

/// Failure record handed to error observers.
///
/// Carries the moved-out remains of the failed task — the closure itself has
/// been consumed by the execution attempt — together with the underlying
/// error.
pub struct ScheduledTaskError {
    group: String,
    priority: i64,
    param: Option<TaskParam>,
    error: anyhow::Error,
}

impl ScheduledTaskError {
    pub(crate) fn new(
        group: String,
        priority: i64,
        param: Option<TaskParam>,
        error: anyhow::Error,
    ) -> Self {
        Self {
            group,
            priority,
            param,
            error,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn param(&self) -> Option<&(dyn Any + Send)> {
        self.param.as_deref()
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }

    pub fn into_error(self) -> anyhow::Error {
        self.error
    }
}

impl fmt::Display for ScheduledTaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task '{}' failed: {:#}", self.group, self.error)
    }
}

impl fmt::Debug for ScheduledTaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTaskError")
            .field("group", &self.group)
            .field("priority", &self.priority)
            .field("has_param", &self.param.is_some())
            .field("error", &self.error)
            .finish()
    }
}

/// Errors produced by the scheduler API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    /// One or more task closures failed during the cycle.
    TaskFailure,
    /// `process` was entered while another `process` call was in progress.
    NestedProcess,
    /// Concurrent `wait_all` invocations.
    NestedWaitAll,
    /// `wait_all` needs a minimum number of workers to drain safely.
    InsufficientWorkers { available: usize },
    /// An observer was registered for a group that already has tasks.
    PreconditionViolated { group: String },
    /// An observer is already registered and replacement was not requested.
    DuplicateObserver { group: String },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskFailure => {
                write!(
                    f,
                    "some scheduled tasks have failed, consult the logs for details"
                )
            }
            Self::NestedProcess => write!(f, "nested calls to Scheduler::process are prohibited"),
            Self::NestedWaitAll => write!(f, "concurrent wait_all calls are not allowed"),
            Self::InsufficientWorkers { available } => write!(
                f,
                "wait_all relies on a high worker count but got {available} worker threads"
            ),
            Self::PreconditionViolated { group } => write!(
                f,
                "observers for group '{group}' must be configured before task submission"
            ),
            Self::DuplicateObserver { group } => {
                write!(f, "group '{group}': error observer has already been set")
            }
        }
    }
}

impl std::error::Error for SchedulerError {}
