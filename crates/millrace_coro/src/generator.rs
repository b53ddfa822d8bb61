//! Lazy single-consumer generator.

use std::{
    cell::RefCell,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use crate::error::CoroError;

/// A lazy sequence of values pulled by a single consumer.
///
/// The body does not run until the first [`resume`](Self::resume) and stops
/// at every yield point until resumed again. Dropping the generator drops
/// the body mid-execution.
///
/// ```
/// # use millrace_coro::Generator;
/// let mut counter = Generator::new(|yielder| async move {
///     for value in 1..=3 {
///         yielder.yield_value(value).await;
///     }
/// });
/// while counter.resume() {
///     println!("{}", counter.result().unwrap());
/// }
/// ```
pub struct Generator<T> {
    future: Option<Pin<Box<dyn Future<Output = ()>>>>,
    slot: Rc<RefCell<Option<T>>>,
}

/// Hands values from a generator body to its consumer.
pub struct Yielder<T> {
    slot: Rc<RefCell<Option<T>>>,
}

impl<T: 'static> Generator<T> {
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Yielder<T>) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let slot = Rc::new(RefCell::new(None));
        let yielder = Yielder {
            slot: Rc::clone(&slot),
        };
        Self {
            future: Some(Box::pin(body(yielder))),
            slot,
        }
    }

    /// Advances the body to its next yield point. Returns true when a value
    /// was produced and false once the body has run to completion.
    ///
    /// A panic inside the body propagates out of this call.
    pub fn resume(&mut self) -> bool {
        let Some(future) = self.future.as_mut() else {
            return false;
        };
        let mut cx = Context::from_waker(Waker::noop());
        match future.as_mut().poll(&mut cx) {
            Poll::Pending => true,
            Poll::Ready(()) => {
                self.future = None;
                false
            }
        }
    }

    /// Moves out the most recently yielded value. Fails with
    /// [`CoroError::EmptyGeneratorResult`] when no value is pending, which
    /// includes calling `result` twice without an intervening `resume`.
    pub fn result(&mut self) -> anyhow::Result<T> {
        self.slot
            .borrow_mut()
            .take()
            .ok_or_else(|| CoroError::EmptyGeneratorResult.into())
    }
}

impl<T> Yielder<T> {
    /// Publishes the next value and suspends the generator until the
    /// consumer resumes it again.
    pub fn yield_value(&self, value: T) -> YieldPoint {
        *self.slot.borrow_mut() = Some(value);
        YieldPoint { suspended: false }
    }
}

/// Future returned by [`Yielder::yield_value`]; pending exactly once.
pub struct YieldPoint {
    suspended: bool,
}

impl Future for YieldPoint {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.suspended {
            Poll::Ready(())
        } else {
            self.suspended = true;
            Poll::Pending
        }
    }
}
