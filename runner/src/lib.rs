//! Batch run dispatch and splitting for Saturn resources.
//!
//! A batch is a list of shell commands whose output, result files and exit
//! status are recorded in a store. The crate is split into:
//!
//! - **[`core`]**: Pure logic (batch model, classification, partitioning, URIs).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (stores, processes, config, batch files).
//!
//! Orchestration modules ([`dispatch`], [`classify`], [`split`], [`sync`])
//! combine the two to implement the `sc` commands.

pub mod classify;
pub mod core;
pub mod dispatch;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod recipe;
pub mod split;
pub mod sync;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
