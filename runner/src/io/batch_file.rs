//! Batch file loading and persistence.
//!
//! Batch files are JSON (`{"nprocs", "runs": [{"cmd", ...}], "remote_output_path"}`).
//! Loading validates the whole file before anything is dispatched and fills in
//! per-run defaults.

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::core::types::{Batch, BatchSpec, Run};
use crate::core::uri;
use crate::io::store::Store;

#[derive(Debug, Error)]
pub enum BatchFileError {
    #[error("parse batch file {name}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid batch file {name}:\n- {}", .violations.join("\n- "))]
    Invalid {
        name: String,
        violations: Vec<String>,
    },
}

/// Fresh, practically collision-free staging directory under the temp dir.
pub fn fresh_local_results_dir() -> String {
    let dir = env::temp_dir().join(Uuid::new_v4().simple().to_string());
    uri::with_trailing_slash(&dir.display().to_string())
}

/// Fill in defaults: `nprocs`, per-run output paths, per-run staging dirs.
pub fn resolve_batch(spec: BatchSpec, default_nprocs: usize) -> Batch {
    let runs = spec
        .runs
        .iter()
        .enumerate()
        .map(|(idx, run)| {
            let remote_output_path = run
                .remote_output_path
                .clone()
                .unwrap_or_else(|| spec.default_run_path(idx));
            let local_results_dir = run
                .local_results_dir
                .clone()
                .filter(|dir| !dir.is_empty())
                .unwrap_or_else(fresh_local_results_dir);
            Run::new(run.cmd.clone(), remote_output_path, local_results_dir)
        })
        .collect();
    Batch {
        nprocs: spec.nprocs.unwrap_or(default_nprocs),
        runs,
        remote_output_path: spec.remote_output_path,
    }
}

/// Parse and validate a batch file. `name` labels errors.
pub fn parse_batch(raw: &str, name: &str, default_nprocs: usize) -> Result<Batch, BatchFileError> {
    let spec: BatchSpec = serde_json::from_str(raw).map_err(|source| BatchFileError::Parse {
        name: name.to_string(),
        source,
    })?;
    let violations = spec.violations();
    if !violations.is_empty() {
        return Err(BatchFileError::Invalid {
            name: name.to_string(),
            violations,
        });
    }
    Ok(resolve_batch(spec, default_nprocs))
}

/// Load a batch file from any store location (local path or URI).
pub fn load_batch(store: &dyn Store, location: &str, default_nprocs: usize) -> Result<Batch> {
    debug!(location, "loading batch file");
    let raw = store
        .read(location)
        .with_context(|| format!("read batch file {location}"))?;
    let raw = String::from_utf8(raw).with_context(|| format!("decode batch file {location}"))?;
    let batch = parse_batch(&raw, location, default_nprocs)?;
    debug!(runs = batch.runs.len(), nprocs = batch.nprocs, "batch file loaded");
    Ok(batch)
}

/// Serialize `batch` to pretty-printed JSON with trailing newline.
pub fn write_batch(path: &Path, batch: &Batch) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(batch).context("serialize batch")?;
    payload.push('\n');
    fs::write(path, payload).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
