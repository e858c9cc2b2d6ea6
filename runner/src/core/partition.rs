//! Run selection and chunking for batch splitting.

use std::num::NonZeroUsize;

use crate::core::classifier::Classification;
use crate::core::types::Run;

/// Sub-batch size used when none is requested: three rounds of `nprocs`.
pub fn default_batch_size(nprocs: usize) -> NonZeroUsize {
    NonZeroUsize::new(nprocs.saturating_mul(3)).unwrap_or(NonZeroUsize::MIN)
}

/// Which classified runs are scheduled again.
///
/// Incomplete runs are always selected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub include_completed: bool,
    pub include_failures: bool,
}

impl Selection {
    /// With both flags set nothing is filtered, so classification can be skipped.
    pub fn includes_everything(&self) -> bool {
        self.include_completed && self.include_failures
    }
}

/// Concatenate the selected partitions: incomplete, failures, completed.
pub fn select_runs(classification: Classification, selection: Selection) -> Vec<Run> {
    let mut runs = classification.incomplete;
    if selection.include_failures {
        runs.extend(classification.failures);
    }
    if selection.include_completed {
        runs.extend(classification.completed);
    }
    runs
}

/// Keep the first `max_jobs` runs. `None` and `Some(0)` keep everything.
pub fn cap_runs(mut runs: Vec<Run>, max_jobs: Option<usize>) -> Vec<Run> {
    if let Some(max) = max_jobs.filter(|max| *max > 0) {
        runs.truncate(max);
    }
    runs
}

/// Split `runs` into consecutive chunks of `batch_size`; the last may be shorter.
pub fn chunk_runs(runs: Vec<Run>, batch_size: NonZeroUsize) -> Vec<Vec<Run>> {
    let batch_size = batch_size.get();
    let mut chunks = Vec::with_capacity(runs.len().div_ceil(batch_size));
    let mut current = Vec::with_capacity(batch_size);
    for run in runs {
        current.push(run);
        if current.len() == batch_size {
            chunks.push(std::mem::replace(
                &mut current,
                Vec::with_capacity(batch_size),
            ));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
