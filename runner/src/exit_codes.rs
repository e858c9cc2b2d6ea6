//! Stable exit codes for `sc` commands.

/// Command succeeded; for `batch` and `run`, every run exited with code 0.
pub const OK: i32 = 0;
/// Invalid input, configuration or any other error.
pub const INVALID: i32 = 1;
/// `sc batch` or `sc run` finished but at least one run exited non-zero.
pub const RUNS_FAILED: i32 = 2;
