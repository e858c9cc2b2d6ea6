//! Diagnostic tracing for the `sc` binary.
//!
//! `sc` shares its terminal with the runs it dispatches:
//!
//! - stdout: echoed run stdout, `summarize` tables and JSON, rendered recipes.
//! - stderr: echoed run stderr, `split` report lines, the final error, and
//!   the tracing events set up here.
//!
//! Only tracing is governed by `RUST_LOG`. Run output always reaches the
//! store, and reaches the terminal unless `run.echo_output` is off.

use std::io::IsTerminal;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Level used when `RUST_LOG` is unset or unparseable.
const DEFAULT_DIRECTIVES: &str = "warn";

/// Initialize the tracing subscriber on stderr.
///
/// Colors are only used when stderr is a terminal, so logs captured next to
/// echoed run stderr stay plain text.
///
/// # Example
/// ```bash
/// RUST_LOG=saturn_runner=debug sc batch commands/0.json 2> batch.log
/// ```
pub fn init() {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::registry()
        .with(filter_from(directives.as_deref()))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
                .compact(),
        )
        .init();
}

fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}
