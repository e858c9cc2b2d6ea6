//! Run execution.
//!
//! The [`Executor`] trait decouples batch dispatch from process spawning.
//! Tests use scripted executors that return predetermined codes without
//! spawning processes; [`ShellExecutor`] is the real implementation.

use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::types::Run;
use crate::io::config::RunConfig;
use crate::io::process::{OutputSinks, UNKNOWN_EXIT_CODE, WaitLimits, run_teed};
use crate::io::store::Store;

/// Remote output location of the current run.
pub const ENV_REMOTE_OUTPUT_PATH: &str = "SATURN_RUN_REMOTE_OUTPUT_PATH";
/// Local directory whose contents are synced to `results/` after the run.
pub const ENV_LOCAL_RESULTS_DIR: &str = "SATURN_RUN_LOCAL_RESULTS_DIR";
/// Worker rank in `[0, nprocs)` held by the current run.
pub const ENV_LOCAL_RANK: &str = "SATURN_RUN_LOCAL_RANK";

/// Abstraction over run execution backends.
pub trait Executor: Sync {
    /// Execute `run` while holding `rank` and return the status code recorded
    /// for it.
    ///
    /// An `Err` means part of the run's bookkeeping failed; implementations
    /// still record a status code whenever the store accepts it.
    fn execute(&self, run: &Run, rank: usize) -> Result<i32>;
}

/// Executor that runs each command through a shell and tees its output to a store.
pub struct ShellExecutor {
    store: Arc<dyn Store>,
    shell: String,
    limits: WaitLimits,
    echo_output: bool,
}

impl ShellExecutor {
    pub fn new(store: Arc<dyn Store>, cfg: &RunConfig) -> Self {
        Self {
            store,
            shell: cfg.shell.clone(),
            limits: cfg.limits(),
            echo_output: cfg.echo_output,
        }
    }

    /// Run the command. Yields the code to record plus the first failure, if any.
    fn run_command(&self, run: &Run, rank: usize) -> (i32, Option<anyhow::Error>) {
        let sinks = match self.prepare(run) {
            Ok(sinks) => sinks,
            Err(err) => return (UNKNOWN_EXIT_CODE, Some(err)),
        };

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&run.cmd)
            .env(ENV_REMOTE_OUTPUT_PATH, &run.remote_output_path)
            .env(ENV_LOCAL_RESULTS_DIR, &run.local_results_dir)
            .env(ENV_LOCAL_RANK, rank.to_string());

        match run_teed(cmd, sinks, self.limits) {
            Ok(exit) => {
                if exit.output_detached {
                    warn!("run output may be truncated");
                }
                (exit.code(), exit.sink_error)
            }
            Err(err) => (UNKNOWN_EXIT_CODE, Some(err)),
        }
    }

    /// Create the staging dirs and open the output sinks.
    fn prepare(&self, run: &Run) -> Result<OutputSinks> {
        fs::create_dir_all(&run.local_results_dir)
            .with_context(|| format!("create local results dir {}", run.local_results_dir))?;
        let results = run.results_path();
        if !self.store.exists(&results)? {
            self.store.make_dirs(&results)?;
        }

        let mut sinks = OutputSinks {
            stdout: vec![self.store.create_writer(&run.stdout_path())?],
            stderr: vec![self.store.create_writer(&run.stderr_path())?],
        };
        if self.echo_output {
            sinks.stdout.push(Box::new(io::stdout()));
            sinks.stderr.push(Box::new(io::stderr()));
        }
        Ok(sinks)
    }

    fn sync_results(&self, run: &Run) -> Result<()> {
        let local = Path::new(&run.local_results_dir);
        if !local.exists() {
            return Ok(());
        }
        let copied = self
            .store
            .put_dir(local, &run.results_path())
            .with_context(|| format!("sync results to {}", run.results_path()))?;
        debug!(copied, "results synced");
        Ok(())
    }
}

impl Executor for ShellExecutor {
    #[instrument(skip_all, fields(remote = %run.remote_output_path, rank = rank))]
    fn execute(&self, run: &Run, rank: usize) -> Result<i32> {
        info!(cmd = %run.cmd, "starting run");

        let (code, run_error) = self.run_command(run, rank);
        let sync_result = self.sync_results(run);
        let status_result = write_status_code(self.store.as_ref(), run, code);

        if let Some(err) = &run_error {
            warn!(err = %format!("{err:#}"), code, "run did not complete cleanly");
        }
        if let Err(err) = &sync_result {
            warn!(err = %format!("{err:#}"), "results sync failed");
        }
        status_result?;
        if let Some(err) = run_error {
            return Err(err.context(format!("run `{}`", run.cmd)));
        }
        sync_result?;

        info!(code, "run finished");
        Ok(code)
    }
}

/// Record `code` as the run's status. Runs on every exit path of an execution.
pub fn write_status_code(store: &dyn Store, run: &Run, code: i32) -> Result<()> {
    let path = run.status_code_path();
    store
        .write(&path, code.to_string().as_bytes())
        .with_context(|| format!("write status code {path}"))
}
