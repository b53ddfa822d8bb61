//! Cooperative coroutine primitives layered on the scheduler.
//!
//! [`Generator`] produces a lazy sequence pulled with `resume`/`result`;
//! [`Task`] is a single suspendable computation whose awaiter is resumed
//! through the scheduler once the task completes. Both are thin wrappers
//! around hand-driven futures: a coroutine handle is a [`std::task::Waker`]
//! and resuming means polling the owned future once.

mod error;
mod generator;
mod task;

pub use error::CoroError;
pub use generator::{Generator, YieldPoint, Yielder};
pub use task::{ExternalTask, FINAL_SUSPEND_GROUP, FINAL_SUSPEND_PRIORITY, Task};
