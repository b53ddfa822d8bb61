//! Logging facade for the millrace crates.
//!
//! Re-exports the `log` macros so that the other crates never name the
//! logging backend directly. Binaries, tests and benchmarks install their
//! own subscriber (typically `env_logger`).

mod timer;

pub use log::{Level, debug, error, info, log, log_enabled, trace, warn};
pub use timer::ScopedTimer;

/// Whether trace-level output is currently enabled.
pub fn tracing_enabled() -> bool {
    log::log_enabled!(log::Level::Trace)
}
