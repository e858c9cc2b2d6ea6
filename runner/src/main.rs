//! `sc`: dispatch, inspect and split Saturn batch files.
//!
//! A batch file lists shell commands whose output and exit status land under a
//! remote output path. `sc batch` runs one on the current machine, `sc split`
//! turns one into sub-batches for a job recipe.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use saturn_runner::classify::{render_table, summarize};
use saturn_runner::core::partition::Selection;
use saturn_runner::core::types::Run;
use saturn_runner::core::uri;
use saturn_runner::dispatch::dispatch_batch;
use saturn_runner::exit_codes;
use saturn_runner::io::batch_file::{fresh_local_results_dir, load_batch};
use saturn_runner::io::config::{SaturnConfig, load_config};
use saturn_runner::io::executor::{Executor, ShellExecutor};
use saturn_runner::io::store::Stores;
use saturn_runner::logging;
use saturn_runner::recipe::{load_recipe, render_recipe, write_recipe};
use saturn_runner::split::{SplitOptions, split_batch};
use saturn_runner::sync::setup_file_syncs;

#[derive(Parser)]
#[command(name = "sc", version, about = "Dispatch and split Saturn batch runs")]
struct Cli {
    /// TOML config file. Missing files fall back to defaults.
    #[arg(long, global = true, env = "SATURN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every command of a batch file, at most `nprocs` at a time.
    Batch {
        /// Batch file path or store URI.
        file: String,
    },
    /// Run a single command and record its output and status.
    Run {
        cmd: String,
        #[arg(long)]
        remote_output_path: String,
        /// Staging dir synced to `results/`. A fresh temp dir when omitted.
        #[arg(long)]
        local_results_dir: Option<String>,
        #[arg(long, default_value_t = 0)]
        rank: usize,
    },
    /// Show the recorded status of every run in a batch file.
    Summarize {
        file: String,
        #[arg(long, value_enum, default_value_t = Format::Table)]
        format: Format,
    },
    /// Split a batch file into sub-batches and point a recipe at them.
    Split(SplitArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Table,
    Json,
}

#[derive(Args)]
struct SplitArgs {
    /// Recipe YAML whose command is replaced.
    template: PathBuf,
    /// Batch file path or store URI.
    batch_file: String,
    /// Runs per sub-batch, or `auto` for three rounds of `nprocs`.
    #[arg(value_parser = parse_batch_size)]
    batch_size: BatchSize,
    /// Directory the sub-batch files are written to.
    local_dir: PathBuf,
    /// Where the resource finds the sub-batch files. Defaults to `local_dir`
    /// under the recipe's working directory.
    #[arg(long)]
    remote_dir: Option<String>,
    #[arg(long, conflicts_with = "skip_completed")]
    include_completed: bool,
    /// Leave completed runs out (default).
    #[arg(long)]
    skip_completed: bool,
    #[arg(long, conflicts_with = "skip_failures")]
    include_failures: bool,
    /// Leave failed runs out (default).
    #[arg(long)]
    skip_failures: bool,
    /// Keep only the first N selected runs.
    #[arg(long)]
    max_jobs: Option<usize>,
    /// Upload `SOURCE[:DEST]` and download it when the resource starts.
    #[arg(long, requires = "sync_base_url")]
    sync: Vec<String>,
    /// Remote base URL sync sources are uploaded under.
    #[arg(long)]
    sync_base_url: Option<String>,
    /// Write the recipe here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

/// Positional batch size; `None` stands for `auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BatchSize(Option<NonZeroUsize>);

fn parse_batch_size(raw: &str) -> Result<BatchSize, String> {
    if raw.eq_ignore_ascii_case("auto") {
        return Ok(BatchSize(None));
    }
    raw.parse::<NonZeroUsize>()
        .map(|size| BatchSize(Some(size)))
        .map_err(|_| format!("expected a positive integer or `auto`, got {raw:?}"))
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref(), std::env::vars()).context("load config")?;
    let stores = Stores::new();
    match cli.command {
        Command::Batch { file } => cmd_batch(&cfg, stores, &file),
        Command::Run {
            cmd,
            remote_output_path,
            local_results_dir,
            rank,
        } => {
            let local = local_results_dir.unwrap_or_else(fresh_local_results_dir);
            cmd_run(&cfg, stores, Run::new(cmd, remote_output_path, local), rank)
        }
        Command::Summarize { file, format } => cmd_summarize(&cfg, &stores, &file, format),
        Command::Split(args) => cmd_split(&cfg, &stores, args),
    }
}

fn cmd_batch(cfg: &SaturnConfig, stores: Stores, file: &str) -> Result<i32> {
    let batch = load_batch(&stores, file, cfg.default_nprocs)?;
    let executor = ShellExecutor::new(Arc::new(stores), &cfg.run);
    let report = dispatch_batch(&batch, &executor)?;
    if report.all_succeeded() {
        return Ok(exit_codes::OK);
    }
    eprintln!(
        "{} of {} runs failed",
        report.failed().len(),
        report.codes.len()
    );
    Ok(exit_codes::RUNS_FAILED)
}

fn cmd_run(cfg: &SaturnConfig, stores: Stores, run: Run, rank: usize) -> Result<i32> {
    let executor = ShellExecutor::new(Arc::new(stores), &cfg.run);
    let code = executor.execute(&run, rank)?;
    Ok(if code == 0 {
        exit_codes::OK
    } else {
        exit_codes::RUNS_FAILED
    })
}

fn cmd_summarize(cfg: &SaturnConfig, stores: &Stores, file: &str, format: Format) -> Result<i32> {
    let batch = load_batch(stores, file, cfg.default_nprocs)?;
    let runs = summarize(stores, &batch)?;
    match format {
        Format::Table => print!("{}", render_table(&runs)),
        Format::Json => {
            let payload = serde_json::to_string_pretty(&runs).context("serialize summary")?;
            println!("{payload}");
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_split(cfg: &SaturnConfig, stores: &Stores, args: SplitArgs) -> Result<i32> {
    let mut recipe = load_recipe(&args.template)?;
    let batch = load_batch(stores, &args.batch_file, cfg.default_nprocs)?;
    let working_directory = recipe
        .spec
        .working_directory
        .clone()
        .unwrap_or_else(|| cfg.working_directory.clone());
    let remote_dir = args.remote_dir.clone().unwrap_or_else(|| {
        uri::join(&working_directory, &args.local_dir.display().to_string())
    });

    let opts = SplitOptions {
        local_commands_dir: args.local_dir.clone(),
        remote_commands_dir: remote_dir,
        batch_size: args.batch_size.0,
        selection: Selection {
            include_completed: args.include_completed && !args.skip_completed,
            include_failures: args.include_failures && !args.skip_failures,
        },
        max_jobs: args.max_jobs,
        tool: cfg.tool.clone(),
    };
    let report = split_batch(stores, &mut recipe, &batch, &opts)?;
    for line in report.lines() {
        eprintln!("{line}");
    }

    if let Some(base_url) = &args.sync_base_url
        && !args.sync.is_empty()
    {
        let urls = setup_file_syncs(
            stores,
            &mut recipe,
            &args.sync,
            base_url,
            &cfg.working_directory,
        )?;
        for (source, url) in args.sync.iter().zip(&urls) {
            eprintln!("synced {source} to {url}");
        }
    }

    match &args.output {
        Some(path) => write_recipe(path, &recipe)?,
        None => print!("{}", render_recipe(&recipe)?),
    }
    Ok(exit_codes::OK)
}
