//! Unit-of-work descriptions for the scheduler.

use std::{any::Any, cmp::Ordering, fmt};

/// Type-erased closure executed by a worker thread.
pub type TaskFn = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// Opaque per-task metadata inspected by cancellation predicates.
pub type TaskParam = Box<dyn Any + Send + 'static>;

/// A unit of work waiting to be executed.
///
/// Tasks are ordered by priority alone: larger priorities run first and
/// tasks of equal priority run in no particular order. The optional
/// parameter exists solely so that cancellation predicates can match on
/// per-task metadata without the closure having to expose it.
pub struct ScheduledTask {
    pub priority: i64,
    pub group: String,
    pub work: TaskFn,
    pub param: Option<TaskParam>,
}

impl ScheduledTask {
    pub fn new<F>(group: impl Into<String>, priority: i64, work: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            priority,
            group: group.into(),
            work: Box::new(work),
            param: None,
        }
    }

    pub fn with_param<F, P>(group: impl Into<String>, priority: i64, work: F, param: P) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
        P: Any + Send + 'static,
    {
        Self {
            param: Some(Box::new(param)),
            ..Self::new(group, priority, work)
        }
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("priority", &self.priority)
            .field("group", &self.group)
            .field("has_param", &self.param.is_some())
            .finish_non_exhaustive()
    }
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority)
    }
}
