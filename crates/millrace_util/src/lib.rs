//! Small shared utilities for the millrace crates.

pub mod containers;

mod scope_exit;

pub use scope_exit::{ScopeExit, on_scope_exit};
