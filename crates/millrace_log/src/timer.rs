//! Scoped wall-clock timing with log output.

use std::time::{Duration, Instant};

use log::Level;

/// Logs the elapsed wall-clock time for a scope when dropped.
///
/// If the thread is panicking at drop time, the timer reports that the
/// timed operation failed instead of completing.
pub struct ScopedTimer {
    title: String,
    level: Level,
    start: Instant,
    elapsed: Option<Duration>,
}

impl ScopedTimer {
    pub fn new(title: impl Into<String>, level: Level) -> Self {
        Self::create(title.into(), level, false)
    }

    /// Like [`new`](Self::new), but also logs when the timer is created.
    pub fn announced(title: impl Into<String>, level: Level) -> Self {
        Self::create(title.into(), level, true)
    }

    fn create(title: String, level: Level, announce: bool) -> Self {
        if announce || crate::tracing_enabled() {
            log::log!(level, "timer '{title}' created");
        }
        Self {
            title,
            level,
            start: Instant::now(),
            elapsed: None,
        }
    }

    /// Freezes the measurement and returns the elapsed seconds. The drop
    /// report will use the frozen value.
    pub fn stop(&mut self) -> f64 {
        let elapsed = *self.elapsed.get_or_insert_with(|| self.start.elapsed());
        elapsed.as_secs_f64()
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        let secs = self.stop();
        if std::thread::panicking() {
            log::log!(self.level, "{} failed after {secs:.3} secs", self.title);
        } else {
            log::log!(self.level, "{} took {secs:.3} secs", self.title);
        }
    }
}
