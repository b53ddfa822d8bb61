//! Process-wide progress reporting for long-running jobs.
//!
//! Jobs publish a fractional completion under a human-readable name. The
//! registry keeps published values monotone (a job can never appear to move
//! backwards) and rate-limits log emission so that many concurrent callers
//! of [`Progress::inform`] produce at most one log line per second.

use std::{
    collections::BTreeMap,
    fmt::Write as _,
    sync::{
        LazyLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;

/// Minimum delay between two emitted progress log lines.
const INFORM_INTERVAL: Duration = Duration::from_millis(1000);

/// Ordered mapping from job name to fractional completion in `[0, 1]`.
pub type ProgressState = BTreeMap<String, f64>;

static GLOBAL: LazyLock<Progress> = LazyLock::new(Progress::new);

/// Registry of fractional job completions.
pub struct Progress {
    state: Mutex<ProgressState>,
    next_inform: AtomicU64,
}

impl Progress {
    /// The process-wide registry.
    pub fn global() -> &'static Progress {
        &GLOBAL
    }

    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProgressState::new()),
            next_inform: AtomicU64::new(0),
        }
    }

    /// Registers a job at zero completion.
    pub fn init(&self, name: &str) {
        self.update_value(name, 0.0);
    }

    /// Publishes `current / max`, clamped to `[0, 1]`. A `max` of zero
    /// counts as fully complete.
    pub fn update(&self, name: &str, current: u64, max: u64) {
        let value = current.min(max);
        let fraction = if max == 0 {
            1.0
        } else {
            value as f64 / max as f64
        };
        self.update_value(name, fraction);
    }

    pub fn update_inform(&self, name: &str, current: u64, max: u64) {
        self.update(name, current, max);
        self.inform();
    }

    pub fn done(&self, name: &str) {
        self.update_value(name, 1.0);
    }

    /// Removes the job from the registry.
    pub fn retire(&self, name: &str) {
        self.state.lock().remove(name);
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> ProgressState {
        self.state.lock().clone()
    }

    /// Logs the current state unless another emission happened less than
    /// [`INFORM_INTERVAL`] ago. Lock-free admission: callers race on a
    /// compare-exchange of the next emission time and only the winner logs.
    pub fn inform(&self) {
        let now = now_millis();
        loop {
            let next = self.next_inform.load(Ordering::Relaxed);
            if now < next {
                break;
            }
            let new_next = now + INFORM_INTERVAL.as_millis() as u64;
            if self
                .next_inform
                .compare_exchange_weak(next, new_next, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                let state = self.snapshot();
                if !state.is_empty() {
                    millrace_log::info!("progress: {}", format_state(&state));
                }
                break;
            }
        }
    }

    fn update_value(&self, name: &str, value: f64) {
        let mut state = self.state.lock();
        match state.get_mut(name) {
            Some(stored) => {
                if value > *stored {
                    *stored = value;
                }
            }
            None => {
                state.insert(name.to_owned(), value);
            }
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders the state as `name: 12.345%, other: 5.000%`.
pub fn format_state(state: &ProgressState) -> String {
    let mut out = String::new();
    for (idx, (name, fraction)) in state.iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{name}: {:.3}%", fraction * 100.0);
    }
    out
}

/// Registers a set of job names on construction and retires them from the
/// global registry on drop.
pub struct ProgressGuard {
    names: Vec<String>,
}

impl ProgressGuard {
    pub fn new(names: &[&str]) -> Self {
        for name in names {
            Progress::global().init(name);
        }
        Self {
            names: names.iter().map(|name| (*name).to_owned()).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        for name in &self.names {
            Progress::global().retire(name);
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_are_monotone() {
        let progress = Progress::new();
        progress.update("job", 5, 10);
        progress.update("job", 2, 10);
        assert_eq!(progress.snapshot()["job"], 0.5);
        progress.update("job", 8, 10);
        assert_eq!(progress.snapshot()["job"], 0.8);
    }

    #[test]
    fn zero_max_counts_as_complete() {
        let progress = Progress::new();
        progress.update("empty", 0, 0);
        assert_eq!(progress.snapshot()["empty"], 1.0);
    }

    #[test]
    fn current_is_clamped_to_max() {
        let progress = Progress::new();
        progress.update("job", 15, 10);
        assert_eq!(progress.snapshot()["job"], 1.0);
    }

    #[test]
    fn init_done_retire_lifecycle() {
        let progress = Progress::new();
        progress.init("job");
        assert_eq!(progress.snapshot()["job"], 0.0);
        progress.done("job");
        assert_eq!(progress.snapshot()["job"], 1.0);
        progress.retire("job");
        assert!(progress.snapshot().is_empty());
    }

    #[test]
    fn snapshot_is_ordered_by_name() {
        let progress = Progress::new();
        progress.init("b");
        progress.init("a");
        let names: Vec<_> = progress.snapshot().into_keys().collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn formatting_renders_percentages() {
        let mut state = ProgressState::new();
        state.insert("a".to_owned(), 0.5);
        state.insert("b".to_owned(), 1.0);
        assert_eq!(format_state(&state), "a: 50.000%, b: 100.000%");
    }

    #[test]
    fn guard_retires_its_names() {
        {
            let guard = ProgressGuard::new(&["guarded-a", "guarded-b"]);
            assert_eq!(guard.names().len(), 2);
            assert!(Progress::global().snapshot().contains_key("guarded-a"));
        }
        let state = Progress::global().snapshot();
        assert!(!state.contains_key("guarded-a"));
        assert!(!state.contains_key("guarded-b"));
    }
}
