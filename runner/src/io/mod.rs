//! I/O helpers: storage, processes, configuration and batch files.

pub mod batch_file;
pub mod config;
pub mod executor;
pub mod process;
pub mod ranks;
pub mod store;
