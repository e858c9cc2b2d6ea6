//! Bounded-concurrency batch dispatch.
//!
//! A fixed pool of `min(nprocs, runs)` worker threads pulls runs off a shared
//! FIFO queue, so runs start in batch order while completion order is free.
//! Each run holds a rank from a [`RankPool`] of size `nprocs` while it executes.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::thread;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Batch, Run};
use crate::io::executor::Executor;
use crate::io::process::UNKNOWN_EXIT_CODE;
use crate::io::ranks::RankPool;

/// Status codes recorded for every run of a dispatched batch, in batch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub codes: Vec<i32>,
}

impl BatchReport {
    /// Indices of runs that exited non-zero.
    pub fn failed(&self) -> Vec<usize> {
        self.codes
            .iter()
            .enumerate()
            .filter(|(_, code)| **code != 0)
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.codes.iter().all(|code| *code == 0)
    }
}

type Slot = Option<Result<i32>>;

/// Execute every run of `batch`, never more than `batch.nprocs` at once.
///
/// Blocks until all runs have terminated. Executor errors do not stop other
/// runs; once every run is done the first error in batch order is returned.
/// Non-zero exit codes are not errors and show up in the report.
#[instrument(skip_all, fields(runs = batch.runs.len(), nprocs = batch.nprocs))]
pub fn dispatch_batch<E: Executor>(batch: &Batch, executor: &E) -> Result<BatchReport> {
    let workers = batch.nprocs.min(batch.runs.len());
    info!(workers, "dispatching batch");

    let queue: Mutex<VecDeque<(usize, &Run)>> =
        Mutex::new(batch.runs.iter().enumerate().collect());
    let slots: Mutex<Vec<Slot>> = Mutex::new((0..batch.runs.len()).map(|_| None).collect());
    let ranks = RankPool::new(batch.nprocs);

    thread::scope(|scope| {
        for worker in 0..workers {
            let (queue, slots, ranks) = (&queue, &slots, &ranks);
            scope.spawn(move || work(worker, queue, slots, ranks, executor));
        }
    });

    let slots = slots.into_inner().unwrap_or_else(PoisonError::into_inner);
    let (report, first_error) = collect_slots(batch, slots);
    let failed = report.failed().len();
    if failed > 0 {
        warn!(failed, "batch finished with failed runs");
    } else {
        info!("batch finished");
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(report),
    }
}

/// One code per run in batch order; runs without a code get
/// [`UNKNOWN_EXIT_CODE`]. Also yields the first error in batch order.
fn collect_slots(batch: &Batch, slots: Vec<Slot>) -> (BatchReport, Option<anyhow::Error>) {
    let mut codes = Vec::with_capacity(slots.len());
    let mut first_error = None;
    for (idx, slot) in slots.into_iter().enumerate() {
        let err = match slot {
            Some(Ok(code)) => {
                codes.push(code);
                continue;
            }
            Some(Err(err)) => err.context(format!(
                "run {idx} ({})",
                batch.runs[idx].remote_output_path
            )),
            None => anyhow!("run {idx} was never executed"),
        };
        codes.push(UNKNOWN_EXIT_CODE);
        if first_error.is_none() {
            first_error = Some(err);
        }
    }
    (BatchReport { codes }, first_error)
}

fn work<E: Executor>(
    worker: usize,
    queue: &Mutex<VecDeque<(usize, &Run)>>,
    slots: &Mutex<Vec<Slot>>,
    ranks: &RankPool,
    executor: &E,
) {
    loop {
        let next = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some((idx, run)) = next else {
            debug!(worker, "queue drained");
            return;
        };
        let rank = ranks.acquire();
        debug!(worker, idx, rank = rank.rank(), "run dispatched");
        let result = executor.execute(run, rank.rank());
        drop(rank);
        slots.lock().unwrap_or_else(PoisonError::into_inner)[idx] = Some(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingExecutor, batch_of};
    use std::time::Duration;

    #[test]
    fn runs_each_once_within_limit() {
        let batch = batch_of("mem://out", 3, &["a", "b", "c", "d", "e", "f", "g", "h"]);
        let recorder = RecordingExecutor::new(Duration::from_millis(30));

        let report = dispatch_batch(&batch, &recorder).expect("dispatch");

        assert_eq!(report.codes, vec![0; 8]);
        assert_eq!(recorder.calls_per_run(8), vec![1; 8]);
        assert!(recorder.max_in_flight() <= 3);
        assert!(recorder.max_in_flight() >= 2, "pool should overlap runs");
        assert!(recorder.ranks_seen().iter().all(|rank| *rank < 3));
    }

    #[test]
    fn single_worker_preserves_batch_order() {
        let batch = batch_of("mem://out", 1, &["a", "b", "c", "d"]);
        let recorder = RecordingExecutor::new(Duration::ZERO);

        dispatch_batch(&batch, &recorder).expect("dispatch");

        assert_eq!(recorder.start_order(), vec!["a", "b", "c", "d"]);
        assert_eq!(recorder.max_in_flight(), 1);
    }

    #[test]
    fn non_zero_exit_is_reported_not_raised() {
        let batch = batch_of("mem://out", 2, &["ok", "exit 4", "ok"]);
        let recorder = RecordingExecutor::new(Duration::ZERO).with_code("exit 4", 4);

        let report = dispatch_batch(&batch, &recorder).expect("dispatch");

        assert_eq!(report.codes, vec![0, 4, 0]);
        assert_eq!(report.failed(), vec![1]);
        assert!(!report.all_succeeded());
    }

    #[test]
    fn executor_error_surfaces_after_siblings_finish() {
        let batch = batch_of("mem://out", 2, &["a", "boom", "c", "d"]);
        let recorder = RecordingExecutor::new(Duration::from_millis(10)).with_error("boom");

        let err = dispatch_batch(&batch, &recorder).unwrap_err();

        assert!(format!("{err:#}").contains("run 1 (mem://out/1)"));
        assert_eq!(recorder.calls_per_run(4), vec![1; 4]);
    }

    #[test]
    fn empty_batch_is_noop() {
        let batch = batch_of("mem://out", 4, &[]);
        let recorder = RecordingExecutor::new(Duration::ZERO);
        let report = dispatch_batch(&batch, &recorder).expect("dispatch");
        assert!(report.codes.is_empty());
        assert!(report.all_succeeded());
    }

    #[test]
    fn unfilled_slot_keeps_codes_aligned() {
        let batch = batch_of("mem://out", 2, &["a", "b", "c"]);
        let slots = vec![Some(Ok(0)), None, Some(Ok(3))];

        let (report, err) = collect_slots(&batch, slots);

        assert_eq!(report.codes, vec![0, UNKNOWN_EXIT_CODE, 3]);
        assert_eq!(report.failed(), vec![1, 2]);
        assert!(err.expect("error").to_string().contains("run 1 was never executed"));
    }
}
