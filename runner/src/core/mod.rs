//! Deterministic, pure logic shared by the batch subsystem.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! descriptors and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod partition;
pub mod types;
pub mod uri;
