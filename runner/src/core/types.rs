//! Run and batch descriptors shared by the dispatcher, classifier and splitter.
//!
//! [`BatchSpec`] is the serialized shape of a batch file where optional fields
//! may be missing. [`Batch`] is the resolved form: every run has concrete
//! remote and local locations. Resolution lives in `io::batch_file` because it
//! touches the temp directory.

use serde::{Deserialize, Serialize};

use crate::core::uri;

/// Concurrency limit applied when a batch file omits `nprocs`.
pub const DEFAULT_NPROCS: usize = 16;

/// Resolved completion state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// `status_code == 0`.
    Completed,
    /// Any other status code, including the `-1` sentinel.
    Error,
}

impl RunStatus {
    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            RunStatus::Completed
        } else {
            RunStatus::Error
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        }
    }
}

/// One unit of work: a shell command and its output locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub cmd: String,
    /// Holds `stdout`, `stderr`, `status_code` and `results/` for this run.
    pub remote_output_path: String,
    /// Local staging directory synced to `{remote_output_path}/results/`.
    pub local_results_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
}

impl Run {
    pub fn new(
        cmd: impl Into<String>,
        remote_output_path: impl Into<String>,
        local_results_dir: impl Into<String>,
    ) -> Self {
        Self {
            cmd: cmd.into(),
            remote_output_path: remote_output_path.into(),
            local_results_dir: local_results_dir.into(),
            status_code: None,
            status: None,
        }
    }

    /// Record a resolved status code and the status derived from it.
    pub fn resolve(&mut self, code: i32) {
        self.status_code = Some(code);
        self.status = Some(RunStatus::from_code(code));
    }

    pub fn status_code_path(&self) -> String {
        uri::join(&self.remote_output_path, "status_code")
    }

    pub fn stdout_path(&self) -> String {
        uri::join(&self.remote_output_path, "stdout")
    }

    pub fn stderr_path(&self) -> String {
        uri::join(&self.remote_output_path, "stderr")
    }

    pub fn results_path(&self) -> String {
        uri::join(&self.remote_output_path, "results/")
    }
}

/// An ordered group of runs sharing an output root and a concurrency limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Maximum number of runs executing at once. Always >= 1.
    pub nprocs: usize,
    pub runs: Vec<Run>,
    pub remote_output_path: String,
}

/// Serialized run entry; missing locations are filled in at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    pub cmd: String,
    #[serde(default)]
    pub remote_output_path: Option<String>,
    #[serde(default)]
    pub local_results_dir: Option<String>,
}

/// Serialized batch file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSpec {
    #[serde(default)]
    pub nprocs: Option<usize>,
    pub runs: Vec<RunSpec>,
    pub remote_output_path: String,
}

impl BatchSpec {
    /// Collect every structural problem with the batch file.
    ///
    /// An empty result means it can be resolved into a [`Batch`].
    pub fn violations(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.nprocs == Some(0) {
            errors.push("nprocs must be >= 1".to_string());
        }
        if self.remote_output_path.trim().is_empty() {
            errors.push("remote_output_path must be non-empty".to_string());
        }
        for (idx, run) in self.runs.iter().enumerate() {
            if run.cmd.trim().is_empty() {
                errors.push(format!("runs[{idx}].cmd must be non-empty"));
            }
            if matches!(&run.remote_output_path, Some(path) if path.trim().is_empty()) {
                errors.push(format!("runs[{idx}].remote_output_path must be non-empty"));
            }
        }
        errors
    }

    /// Output location used for the run at `idx` when the entry omits one.
    pub fn default_run_path(&self, idx: usize) -> String {
        uri::join(&self.remote_output_path, &idx.to_string())
    }
}
