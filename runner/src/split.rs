//! Splitting a batch into sub-batch files and pointing a recipe at them.

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::classify::categorize_batch;
use crate::core::partition::{Selection, cap_runs, chunk_runs, default_batch_size, select_runs};
use crate::core::types::Batch;
use crate::core::uri;
use crate::io::batch_file::write_batch;
use crate::io::store::Store;
use crate::recipe::{Recipe, ResourceCommand};

#[derive(Debug, Clone)]
pub struct SplitOptions {
    /// Where sub-batch files are written.
    pub local_commands_dir: PathBuf,
    /// Where the resource will find them; used in the generated commands.
    pub remote_commands_dir: String,
    /// Runs per sub-batch. Defaults to three rounds of `nprocs`.
    pub batch_size: Option<NonZeroUsize>,
    pub selection: Selection,
    /// Keep only the first N selected runs. `None` or `Some(0)` keeps all.
    pub max_jobs: Option<usize>,
    /// Executable used in `<tool> batch <file>`.
    pub tool: String,
}

/// Per-category counts, present when the batch was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionCounts {
    pub incomplete: usize,
    pub failures: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitReport {
    pub counts: Option<SelectionCounts>,
    pub selection: Selection,
    /// Runs selected before `max_jobs` was applied.
    pub found: usize,
    pub kept: usize,
    pub batch_size: usize,
    pub batch_size_defaulted: bool,
    /// Remote location of every sub-batch file, in order.
    pub batch_files: Vec<String>,
}

impl SplitReport {
    /// Human-readable account of what was selected and written.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        match self.counts {
            Some(counts) => {
                lines.push(format!("including {} incomplete runs", counts.incomplete));
                let verb = |included: bool| if included { "including" } else { "skipping" };
                lines.push(format!(
                    "{} {} failed runs",
                    verb(self.selection.include_failures),
                    counts.failures
                ));
                lines.push(format!(
                    "{} {} completed runs",
                    verb(self.selection.include_completed),
                    counts.completed
                ));
            }
            None => lines.push(format!("including {} runs", self.found)),
        }
        if self.kept < self.found {
            lines.push(format!("found {}. Only keeping {}", self.found, self.kept));
        }
        if self.batch_size_defaulted {
            lines.push(format!(
                "defaulting to a batch size of 3 * nprocs = {}",
                self.batch_size
            ));
        } else {
            lines.push(format!("using a batch size of {}", self.batch_size));
        }
        lines.push(format!("wrote {} batch files", self.batch_files.len()));
        lines
    }
}

/// Write the selected runs of `batch` as sub-batch files and replace the
/// recipe's command with one `<tool> batch <file>` per file.
///
/// Unless every category is included, the batch is classified first so that
/// completed and failed runs can be skipped. Stale `*.json` files in the local
/// directory are removed before writing.
#[instrument(skip_all, fields(runs = batch.runs.len(), dir = %opts.local_commands_dir.display()))]
pub fn split_batch(
    store: &dyn Store,
    recipe: &mut Recipe,
    batch: &Batch,
    opts: &SplitOptions,
) -> Result<SplitReport> {
    let (selected, counts) = if opts.selection.includes_everything() {
        (batch.runs.clone(), None)
    } else {
        let classification = categorize_batch(store, batch)?;
        let counts = SelectionCounts {
            incomplete: classification.incomplete.len(),
            failures: classification.failures.len(),
            completed: classification.completed.len(),
        };
        (select_runs(classification, opts.selection), Some(counts))
    };
    let found = selected.len();
    let kept_runs = cap_runs(selected, opts.max_jobs);
    let kept = kept_runs.len();

    let batch_size = opts
        .batch_size
        .unwrap_or_else(|| default_batch_size(batch.nprocs));
    let chunks = chunk_runs(kept_runs, batch_size);
    let batch_size = batch_size.get();

    fs::create_dir_all(&opts.local_commands_dir).with_context(|| {
        format!("create commands dir {}", opts.local_commands_dir.display())
    })?;
    purge_batch_files(&opts.local_commands_dir)?;

    let mut batch_files = Vec::with_capacity(chunks.len());
    for (idx, runs) in chunks.into_iter().enumerate() {
        let name = format!("{idx}.json");
        let sub = Batch {
            nprocs: batch.nprocs,
            runs,
            remote_output_path: batch.remote_output_path.clone(),
        };
        write_batch(&opts.local_commands_dir.join(&name), &sub)?;
        batch_files.push(uri::join(&opts.remote_commands_dir, &name));
    }

    recipe.spec.command = Some(ResourceCommand::Many(
        batch_files
            .iter()
            .map(|file| format!("{} batch {file}", opts.tool))
            .collect(),
    ));

    info!(found, kept, batch_size, files = batch_files.len(), "batch split");
    Ok(SplitReport {
        counts,
        selection: opts.selection,
        found,
        kept,
        batch_size,
        batch_size_defaulted: opts.batch_size.is_none(),
        batch_files,
    })
}

/// Remove sub-batch files left over from an earlier split.
fn purge_batch_files(dir: &Path) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))?;
    for entry in entries {
        let path = entry.with_context(|| format!("list {}", dir.display()))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
            debug!(path = %path.display(), "removed stale batch file");
        }
    }
    Ok(())
}
