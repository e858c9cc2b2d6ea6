//! File syncs: upload local sources and make a resource download them on start.
//!
//! Each sync uploads a local directory under a remote base URL and prepends
//! the matching download commands to the recipe's start script, inside a
//! generated block that is replaced on every sync.

use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{info, instrument};

use crate::core::uri;
use crate::io::store::Store;
use crate::recipe::Recipe;

pub const BEGIN_MARKER: &str = "### BEGIN SATURN_CLIENT GENERATED CODE";
pub const END_MARKER: &str = "### END SATURN_CLIENT GENERATED CODE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("invalid sync entry {entry:?}: expected SOURCE or SOURCE:DEST")]
    InvalidEntry { entry: String },
    #[error("no download command for scheme {scheme:?} in {url}")]
    UnsupportedScheme { scheme: String, url: String },
}

/// A local directory and where it lands on the resource. Both end with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEntry {
    pub source: String,
    pub dest: String,
}

impl SyncEntry {
    /// Parse `SOURCE[:DEST]`. A relative `DEST` (or a missing one) is placed
    /// under `working_directory`.
    pub fn parse(entry: &str, working_directory: &str) -> Result<Self, SyncError> {
        let (source, dest) = match entry.split_once(':') {
            Some((source, dest)) => (source, dest),
            None => (entry, entry),
        };
        if source.is_empty() || dest.is_empty() || dest.contains(':') {
            return Err(SyncError::InvalidEntry {
                entry: entry.to_string(),
            });
        }
        Ok(Self {
            source: uri::with_trailing_slash(source),
            dest: uri::with_trailing_slash(&uri::join(working_directory, dest)),
        })
    }

    /// Remote location of this sync under `base_url`.
    pub fn remote_url(&self, base_url: &str) -> String {
        format!(
            "{}{}",
            uri::with_trailing_slash(base_url),
            self.dest.trim_start_matches('/')
        )
    }
}

/// Shell commands that fetch `url` into `dest` on the resource.
pub fn download_commands(url: &str, dest: &str) -> Result<Vec<String>, SyncError> {
    let fetch = match uri::scheme(url) {
        Some("sfs") => format!("saturnfs cp --recursive {url} {dest}"),
        Some("s3") => format!("aws s3 sync {url} {dest}"),
        Some("file") | None => format!(
            "cp -r {}. {dest}",
            uri::with_trailing_slash(uri::strip_scheme(url))
        ),
        Some(other) => {
            return Err(SyncError::UnsupportedScheme {
                scheme: other.to_string(),
                url: url.to_string(),
            });
        }
    };
    Ok(vec![format!("mkdir -p {dest}"), fetch])
}

/// Put `commands` in a generated block at the top of `start_script`,
/// dropping any block a previous sync generated.
pub fn inject_start_script(start_script: &str, commands: &[String]) -> String {
    let mut rest = start_script.to_string();
    if let (Some(begin), Some(end)) = (rest.find(BEGIN_MARKER), rest.find(END_MARKER))
        && begin <= end
    {
        let stop = (end + END_MARKER.len() + 1).min(rest.len());
        rest.replace_range(begin..stop, "");
    }

    let mut script = String::new();
    script.push_str(BEGIN_MARKER);
    script.push('\n');
    for cmd in commands {
        script.push_str(cmd);
        script.push('\n');
    }
    script.push_str(END_MARKER);
    script.push('\n');
    script.push_str(&rest);
    script
}

/// Upload every `SOURCE[:DEST]` entry under `base_url` and wire the downloads
/// into `recipe`'s start script.
///
/// Relative destinations use the recipe's working directory, falling back to
/// `default_working_directory`. Returns the remote URL of each upload.
#[instrument(skip_all, fields(base_url = base_url, syncs = syncs.len()))]
pub fn setup_file_syncs(
    store: &dyn Store,
    recipe: &mut Recipe,
    syncs: &[String],
    base_url: &str,
    default_working_directory: &str,
) -> Result<Vec<String>> {
    let working_directory = recipe
        .spec
        .working_directory
        .clone()
        .unwrap_or_else(|| default_working_directory.to_string());

    let mut commands = Vec::new();
    let mut uploaded = Vec::with_capacity(syncs.len());
    for raw in syncs {
        let entry = SyncEntry::parse(raw, &working_directory)?;
        let url = entry.remote_url(base_url);
        commands.extend(download_commands(&url, &entry.dest)?);

        let files = store
            .put_dir(Path::new(&entry.source), &url)
            .with_context(|| format!("sync {} to {url}", entry.source))?;
        info!(source = %entry.source, url = %url, files, "synced source");
        uploaded.push(url);
    }

    let start_script = recipe.spec.start_script.as_deref().unwrap_or_default();
    recipe.spec.start_script = Some(inject_start_script(start_script, &commands));
    Ok(uploaded)
}
