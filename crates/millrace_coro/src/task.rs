//! Suspendable single-shot task integrated with the scheduler.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, mpsc},
    task::{Context, Poll, Wake, Waker},
};

use anyhow::Result;
use millrace_scheduling::Scheduler;
use parking_lot::Mutex;

use crate::error::CoroError;

/// Task group of the continuation work items submitted when a task
/// completes.
pub const FINAL_SUSPEND_GROUP: &str = "final-suspend";

/// Priority of the continuation work items.
pub const FINAL_SUSPEND_PRIORITY: i64 = 100;

/// A single suspendable computation producing one value.
///
/// The body does not run until the first [`resume`](Self::resume). A task
/// implements [`Future`], so one task body can await another directly; the
/// awaiter is parked until the awaited task completes, at which point a
/// continuation is submitted to the global [`Scheduler`] that resumes the
/// awaiter on a worker thread.
///
/// The coroutine frame is owned by exactly one `Task` wrapper; the caller
/// recorded while awaiting is a [`Waker`], never an owning reference.
pub struct Task<T> {
    frame: Arc<Frame<T>>,
}

struct Frame<T> {
    inner: Mutex<FrameInner<T>>,
}

struct FrameInner<T> {
    future: Option<Pin<Box<dyn Future<Output = Result<T>> + Send>>>,
    result: Option<Result<T>>,
    caller: Option<Waker>,
    completed: bool,
}

impl<T: Send + 'static> Task<T> {
    /// Wraps the given body without starting it.
    pub fn new<F>(body: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            frame: Arc::new(Frame {
                inner: Mutex::new(FrameInner {
                    future: Some(Box::pin(body)),
                    result: None,
                    caller: None,
                    completed: false,
                }),
            }),
        }
    }

    /// Drives the body to its next suspension point. A no-op on a
    /// completed task.
    pub fn resume(&self) {
        Frame::resume(&self.frame);
    }

    pub fn done(&self) -> bool {
        self.frame.inner.lock().completed
    }

    /// Moves out the task's result: the returned value or the captured
    /// failure. Fails with [`CoroError::EmptyResult`] when the task has not
    /// completed, or when the result was already taken.
    pub fn result(&self) -> Result<T> {
        match self.frame.inner.lock().result.take() {
            Some(result) => result,
            None => Err(CoroError::EmptyResult.into()),
        }
    }

    /// Synchronous entry point for non-coroutine callers: starts the task
    /// and blocks until its continuation delivers the result.
    ///
    /// Relies on scheduler workers to run the continuation, so it must not
    /// be used when the global scheduler runs in single-worker mode.
    pub fn wait(self) -> Result<T> {
        let (sender, receiver) = mpsc::channel();
        let wrapper = Task::new(async move {
            let result = self.await;
            let _ = sender.send(result);
            Ok(())
        });
        wrapper.resume();
        receiver
            .recv()
            .map_err(|_| anyhow::anyhow!("the task was dropped before delivering a result"))?
    }
}

impl<T: Send + 'static> Frame<T> {
    /// Polls the owned future once, using a waker built from the frame so
    /// that a later wake resumes this task. On completion, stores the
    /// result and submits the continuation that wakes the recorded caller.
    fn resume(frame: &Arc<Self>) {
        let waker = Waker::from(Arc::clone(frame));
        let mut cx = Context::from_waker(&waker);
        let mut inner = frame.inner.lock();
        let Some(future) = inner.future.as_mut() else {
            return;
        };
        match future.as_mut().poll(&mut cx) {
            Poll::Pending => {}
            Poll::Ready(result) => {
                inner.future = None;
                inner.result = Some(result);
                inner.completed = true;
                let caller = inner.caller.take();
                drop(inner);
                Scheduler::global().submit(
                    FINAL_SUSPEND_GROUP,
                    FINAL_SUSPEND_PRIORITY,
                    move || {
                        if let Some(caller) = caller {
                            caller.wake();
                        }
                        Ok(())
                    },
                );
            }
        }
    }
}

impl<T: Send + 'static> Wake for Frame<T> {
    fn wake(self: Arc<Self>) {
        Frame::resume(&self);
    }
}

impl<T: Send + 'static> Future for Task<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.frame.inner.lock();
        if inner.completed {
            let result = inner
                .result
                .take()
                .unwrap_or_else(|| Err(CoroError::EmptyResult.into()));
            return Poll::Ready(result);
        }
        inner.caller = Some(cx.waker().clone());
        drop(inner);
        Frame::resume(&self.frame);
        Poll::Pending
    }
}

/// Awaitable bridge for external asynchronous sources.
///
/// When awaited, the suspend action receives the current coroutine's waker
/// and the coroutine stays suspended; the external code resumes it by
/// waking the waker. The action must store the waker and return — waking
/// from inside the action would resume the coroutine while it is still
/// being polled.
pub struct ExternalTask<F> {
    action: Option<F>,
}

impl<F: FnOnce(Waker)> ExternalTask<F> {
    pub fn new(action: F) -> Self {
        Self {
            action: Some(action),
        }
    }
}

impl<F: FnOnce(Waker) + Unpin> Future for ExternalTask<F> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.action.take() {
            Some(action) => {
                action(cx.waker().clone());
                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn compute() -> Task<i32> {
        Task::new(async { Ok(7 * 6) })
    }

    #[test]
    fn returns_the_computed_result() {
        let task = compute();
        task.resume();
        assert!(task.done());
        assert_eq!(task.result().unwrap(), 42);
    }

    #[test]
    fn works_with_strings() {
        let task = Task::new(async { Ok("hello, task".to_owned()) });
        task.resume();
        assert_eq!(task.result().unwrap(), "hello, task");
    }

    #[test]
    fn body_does_not_run_before_the_first_resume() {
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran);
        let task = Task::new(async move {
            flag.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        assert_eq!(ran.load(Ordering::Relaxed), 0);
        assert!(!task.done());
        task.resume();
        assert_eq!(ran.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn captured_failures_come_out_of_result() {
        let task: Task<i32> = Task::new(async { anyhow::bail!("error in task") });
        task.resume();
        assert!(task.done());
        let error = task.result().unwrap_err();
        assert!(error.to_string().contains("error in task"));
    }

    #[test]
    fn result_on_an_incomplete_task_fails() {
        let task = compute();
        let error = task.result().unwrap_err();
        assert_eq!(
            error.downcast_ref::<CoroError>(),
            Some(&CoroError::EmptyResult)
        );
    }

    #[test]
    fn task_is_movable() {
        let task = compute();
        let moved = task;
        moved.resume();
        assert_eq!(moved.result().unwrap(), 42);
    }

    #[test]
    fn external_task_suspends_until_woken() {
        let steps = Arc::new(AtomicUsize::new(0));
        let handle: Arc<Mutex<Option<Waker>>> = Arc::new(Mutex::new(None));

        let task = {
            let steps = Arc::clone(&steps);
            let handle = Arc::clone(&handle);
            Task::new(async move {
                for _ in 0..4 {
                    steps.fetch_add(1, Ordering::Relaxed);
                    let handle = Arc::clone(&handle);
                    ExternalTask::new(move |waker| {
                        *handle.lock() = Some(waker);
                    })
                    .await;
                }
                steps.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
        };

        task.resume();
        let mut resumes = 1;
        for _ in 0..4 {
            let waker = handle.lock().take().expect("task should be suspended");
            resumes += 1;
            waker.wake();
        }
        assert!(task.done());
        assert_eq!(steps.load(Ordering::Relaxed), 5);
        assert_eq!(resumes, 5);
    }
}
