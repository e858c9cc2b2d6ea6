//! Test-only helpers: batch builders and scripted executors.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Result, bail};

use crate::core::types::{Batch, Run};
use crate::core::uri;
use crate::io::batch_file::fresh_local_results_dir;
use crate::io::executor::{Executor, write_status_code};
use crate::io::store::Store;

/// Batch whose run `i` executes `cmds[i]` and writes under `{root}/{i}`.
pub fn batch_of(root: &str, nprocs: usize, cmds: &[&str]) -> Batch {
    let runs = cmds
        .iter()
        .enumerate()
        .map(|(idx, cmd)| {
            Run::new(
                *cmd,
                uri::join(root, &idx.to_string()),
                fresh_local_results_dir(),
            )
        })
        .collect();
    Batch {
        nprocs,
        runs,
        remote_output_path: root.to_string(),
    }
}

/// Executor that records how it was called instead of spawning processes.
///
/// Every run sleeps for `delay` and returns 0 unless scripted otherwise.
#[derive(Default)]
pub struct RecordingExecutor {
    delay: Duration,
    codes: HashMap<String, i32>,
    errors: HashSet<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    held_ranks: Mutex<HashSet<usize>>,
    rank_conflict: AtomicBool,
    started: Mutex<Vec<(String, String, usize)>>,
}

impl RecordingExecutor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Return `code` for runs whose command is `cmd`.
    pub fn with_code(mut self, cmd: &str, code: i32) -> Self {
        self.codes.insert(cmd.to_string(), code);
        self
    }

    /// Fail runs whose command is `cmd`.
    pub fn with_error(mut self, cmd: &str) -> Self {
        self.errors.insert(cmd.to_string());
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Commands in the order their runs started.
    pub fn start_order(&self) -> Vec<String> {
        self.started_log().into_iter().map(|(cmd, _, _)| cmd).collect()
    }

    pub fn ranks_seen(&self) -> Vec<usize> {
        self.started_log()
            .into_iter()
            .map(|(_, _, rank)| rank)
            .collect()
    }

    /// Call count per run index, for runs built by [`batch_of`].
    pub fn calls_per_run(&self, runs: usize) -> Vec<usize> {
        let mut counts = vec![0; runs];
        for (_, remote, _) in self.started_log() {
            let idx = remote
                .rsplit('/')
                .next()
                .and_then(|last| last.parse::<usize>().ok());
            if let Some(count) = idx.and_then(|idx| counts.get_mut(idx)) {
                *count += 1;
            }
        }
        counts
    }

    fn started_log(&self) -> Vec<(String, String, usize)> {
        assert!(
            !self.rank_conflict.load(Ordering::SeqCst),
            "two in-flight runs held the same rank"
        );
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Executor for RecordingExecutor {
    fn execute(&self, run: &Run, rank: usize) -> Result<i32> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self
            .held_ranks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(rank)
        {
            self.rank_conflict.store(true, Ordering::SeqCst);
        }
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((run.cmd.clone(), run.remote_output_path.clone(), rank));

        thread::sleep(self.delay);

        self.held_ranks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&rank);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.errors.contains(&run.cmd) {
            bail!("scripted failure for `{}`", run.cmd);
        }
        Ok(self.codes.get(&run.cmd).copied().unwrap_or(0))
    }
}

/// Executor that only records a scripted status code in a store.
pub struct StatusWritingExecutor<S> {
    store: S,
    codes: HashMap<String, i32>,
}

impl<S: Store> StatusWritingExecutor<S> {
    /// Runs whose command is not listed record `0`.
    pub fn new(store: S, codes: &[(&str, i32)]) -> Self {
        Self {
            store,
            codes: codes
                .iter()
                .map(|(cmd, code)| (cmd.to_string(), *code))
                .collect(),
        }
    }
}

impl<S: Store> Executor for StatusWritingExecutor<S> {
    fn execute(&self, run: &Run, _rank: usize) -> Result<i32> {
        let code = self.codes.get(&run.cmd).copied().unwrap_or(0);
        write_status_code(&self.store, run, code)?;
        Ok(code)
    }
}
