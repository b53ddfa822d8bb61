//! Guard for running cleanup when a scope is left.

/// Runs the contained closure when dropped, unless it has been
/// [`release`](Self::release)d. The closure also runs when the scope is
/// left by a panic.
pub struct ScopeExit<F: FnOnce()> {
    func: Option<F>,
}

/// Creates a guard that calls `func` when it goes out of scope.
pub fn on_scope_exit<F: FnOnce()>(func: F) -> ScopeExit<F> {
    ScopeExit::new(func)
}

impl<F: FnOnce()> ScopeExit<F> {
    pub fn new(func: F) -> Self {
        Self { func: Some(func) }
    }

    /// Disarms the guard so that the closure never runs.
    pub fn release(&mut self) {
        self.func = None;
    }
}

impl<F: FnOnce()> Drop for ScopeExit<F> {
    fn drop(&mut self) {
        if let Some(func) = self.func.take() {
            func();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        panic,
        sync::atomic::{AtomicUsize, Ordering},
    };

    #[test]
    fn closure_runs_on_drop() {
        let count = AtomicUsize::new(0);
        {
            let _guard = on_scope_exit(|| {
                count.fetch_add(1, Ordering::Relaxed);
            });
        }
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn released_guard_does_not_run() {
        let count = AtomicUsize::new(0);
        {
            let mut guard = on_scope_exit(|| {
                count.fetch_add(1, Ordering::Relaxed);
            });
            guard.release();
        }
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn closure_runs_during_unwinding() {
        static COUNT: AtomicUsize = AtomicUsize::new(0);
        let result = panic::catch_unwind(|| {
            let _guard = on_scope_exit(|| {
                COUNT.fetch_add(1, Ordering::Relaxed);
            });
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(COUNT.load(Ordering::Relaxed), 1);
    }
}
