//! Worker rank allocation.
//!
//! A rank is a small integer in `[0, size)` handed to a running command via
//! `SATURN_RUN_LOCAL_RANK` so concurrent commands can pick disjoint local paths.
//! At most one in-flight run holds a given rank.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::trace;

#[derive(Debug)]
pub struct RankPool {
    free: Mutex<Vec<usize>>,
    released: Condvar,
}

impl RankPool {
    /// Pool holding ranks `0..size`; the lowest free rank is handed out first.
    pub fn new(size: usize) -> Self {
        Self {
            free: Mutex::new((0..size).rev().collect()),
            released: Condvar::new(),
        }
    }

    /// Take a free rank, blocking until one is released if none is free.
    pub fn acquire(&self) -> RankGuard<'_> {
        let mut free = self.lock();
        loop {
            if let Some(rank) = free.pop() {
                trace!(rank, "rank acquired");
                return RankGuard { pool: self, rank };
            }
            free = self
                .released
                .wait(free)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn available(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, rank: usize) {
        let mut free = self.lock();
        free.push(rank);
        // Keep the lowest rank on top of the stack.
        free.sort_unstable_by(|a, b| b.cmp(a));
        drop(free);
        trace!(rank, "rank released");
        self.released.notify_one();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<usize>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held rank; returned to the pool on drop.
#[derive(Debug)]
pub struct RankGuard<'a> {
    pool: &'a RankPool,
    rank: usize,
}

impl RankGuard<'_> {
    pub fn rank(&self) -> usize {
        self.rank
    }
}

impl Drop for RankGuard<'_> {
    fn drop(&mut self) {
        self.pool.release(self.rank);
    }
}
