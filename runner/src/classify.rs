//! Classification of a batch's runs against the status store.

use std::collections::HashMap;
use std::fmt::Write as _;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::classifier::{Classification, classify_runs};
use crate::core::types::{Batch, Run};
use crate::core::uri;
use crate::io::store::Store;

const STATUS_FILE: &str = "status_code";

/// Partition `runs` into incomplete, failed and completed runs.
///
/// Status files under `root` are listed with a single glob and fetched in one
/// bulk read. Runs whose output path lies outside `root/*` are looked up one
/// by one. A missing status file means the run is incomplete. Listed paths
/// and run paths are matched in [`uri::normalize`]d form, since stores may
/// spell a listed location differently (`out/0` for `./out/0`).
#[instrument(skip_all, fields(root = root, runs = runs.len()))]
pub fn categorize_runs(store: &dyn Store, root: &str, runs: &[Run]) -> Result<Classification> {
    let root = uri::trim_trailing_slash(root);
    let pattern = format!("{}/*/{STATUS_FILE}", glob::Pattern::escape(root));
    let mut paths = store
        .glob(&pattern)
        .with_context(|| format!("list status files {pattern}"))?;
    debug!(found = paths.len(), "status files listed");

    let listed_root = uri::normalize(root);
    for run in runs {
        let path = run.status_code_path();
        if is_listed_under(&listed_root, &uri::normalize(&path)) {
            continue;
        }
        if store
            .exists(&path)
            .with_context(|| format!("check status file {path}"))?
        {
            paths.push(path);
        }
    }

    let contents = store
        .read_many(&paths)
        .context("fetch status files")?;
    let by_location: HashMap<String, Vec<u8>> = paths
        .iter()
        .map(|path| uri::normalize(path))
        .zip(contents)
        .collect();
    let statuses: HashMap<String, Vec<u8>> = runs
        .iter()
        .filter_map(|run| {
            let path = run.status_code_path();
            let content = by_location.get(&uri::normalize(&path))?.clone();
            Some((path, content))
        })
        .collect();

    let classification = classify_runs(runs, &statuses)?;
    info!(
        incomplete = classification.incomplete.len(),
        failures = classification.failures.len(),
        completed = classification.completed.len(),
        "runs classified"
    );
    Ok(classification)
}

/// Classify every run of `batch` under the batch's own output root.
pub fn categorize_batch(store: &dyn Store, batch: &Batch) -> Result<Classification> {
    categorize_runs(store, &batch.remote_output_path, &batch.runs)
}

/// All runs of `batch` with their status: failures, completed, incomplete.
pub fn summarize(store: &dyn Store, batch: &Batch) -> Result<Vec<Run>> {
    Ok(categorize_batch(store, batch)?.into_summary())
}

/// Fixed-width table of runs for terminal output.
pub fn render_table(runs: &[Run]) -> String {
    let rows: Vec<[String; 4]> = runs
        .iter()
        .map(|run| {
            [
                run.status
                    .map_or("incomplete", |status| status.as_str())
                    .to_string(),
                run.status_code.map_or(String::new(), |code| code.to_string()),
                run.remote_output_path.clone(),
                run.cmd.clone(),
            ]
        })
        .collect();
    let header = ["STATUS", "CODE", "REMOTE OUTPUT PATH", "COMMAND"].map(str::to_string);

    let mut widths = header.clone().map(|cell| cell.len());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut table = String::new();
    for row in std::iter::once(&header).chain(&rows) {
        let mut line = String::new();
        for (idx, (cell, width)) in row.iter().zip(widths).enumerate() {
            if idx + 1 == row.len() {
                line.push_str(cell);
            } else {
                let _ = write!(line, "{cell:<width$}  ");
            }
        }
        table.push_str(line.trim_end());
        table.push('\n');
    }
    table
}

/// Whether the root glob already covers `path`, i.e. it is `{root}/<name>/status_code`.
fn is_listed_under(root: &str, path: &str) -> bool {
    path.strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|rest| rest.strip_suffix(STATUS_FILE))
        .and_then(|rest| rest.strip_suffix('/'))
        .is_some_and(|name| !name.is_empty() && !name.contains('/'))
}
