//! Client configuration: TOML file, then environment overrides.
//!
//! Nothing here reads the process environment on its own; callers pass the
//! variables in so tests can inject configuration without mutating globals.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::DEFAULT_NPROCS;
use crate::io::process::WaitLimits;

pub const ENV_WORKING_DIRECTORY: &str = "SATURN_WORKING_DIRECTORY";
pub const ENV_TOOL: &str = "SATURN_TOOL";
pub const ENV_DEFAULT_NPROCS: &str = "SATURN_DEFAULT_NPROCS";
pub const ENV_RUN_SHELL: &str = "SATURN_RUN_SHELL";
pub const ENV_RUN_TIMEOUT_SECS: &str = "SATURN_RUN_TIMEOUT_SECS";
pub const ENV_RUN_POLL_INTERVAL_MS: &str = "SATURN_RUN_POLL_INTERVAL_MS";
pub const ENV_RUN_OUTPUT_GRACE_MS: &str = "SATURN_RUN_OUTPUT_GRACE_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parse config {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{var}={value:?}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Client configuration.
///
/// Missing fields default to the values used on Saturn resources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SaturnConfig {
    /// Base for relative sync destinations when a recipe names none.
    pub working_directory: String,

    /// Executable name used in generated `<tool> batch <file>` commands.
    pub tool: String,

    /// Concurrency limit for batch files that omit `nprocs`.
    pub default_nprocs: usize,

    pub run: RunConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Shell used as `<shell> -c <cmd>`.
    pub shell: String,

    /// Kill a run after this many seconds. Unset means no limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Tick between exit checks while a run is in flight.
    pub poll_interval_ms: u64,

    /// How long output may stay open after the command exits before
    /// whatever it left running in the background is killed.
    pub output_grace_ms: u64,

    /// Mirror run output to this process's stdout/stderr.
    pub echo_output: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            timeout_secs: None,
            poll_interval_ms: 1000,
            output_grace_ms: 2000,
            echo_output: true,
        }
    }
}

impl Default for SaturnConfig {
    fn default() -> Self {
        Self {
            working_directory: "/home/jovyan/workspace".to_string(),
            tool: "sc".to_string(),
            default_nprocs: DEFAULT_NPROCS,
            run: RunConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn limits(&self) -> WaitLimits {
        WaitLimits {
            poll_interval: self.poll_interval(),
            timeout: self.timeout(),
            output_grace: Duration::from_millis(self.output_grace_ms),
        }
    }
}

impl SaturnConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.working_directory.starts_with('/') {
            return Err(ConfigError::Invalid(
                "working_directory must be an absolute path".to_string(),
            ));
        }
        if self.tool.trim().is_empty() {
            return Err(ConfigError::Invalid("tool must be non-empty".to_string()));
        }
        if self.default_nprocs == 0 {
            return Err(ConfigError::Invalid("default_nprocs must be >= 1".to_string()));
        }
        if self.run.shell.trim().is_empty() {
            return Err(ConfigError::Invalid("run.shell must be non-empty".to_string()));
        }
        if self.run.timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("run.timeout_secs must be > 0".to_string()));
        }
        if self.run.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "run.poll_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `SATURN_*` overrides from `vars`; unrelated variables are ignored.
    pub fn apply_env<I, K, V>(mut self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let value = value.into();
            match key.as_ref() {
                ENV_WORKING_DIRECTORY => self.working_directory = value,
                ENV_TOOL => self.tool = value,
                ENV_RUN_SHELL => self.run.shell = value,
                ENV_DEFAULT_NPROCS => self.default_nprocs = parse_env(ENV_DEFAULT_NPROCS, value)?,
                ENV_RUN_TIMEOUT_SECS => {
                    self.run.timeout_secs = if value.is_empty() {
                        None
                    } else {
                        Some(parse_env(ENV_RUN_TIMEOUT_SECS, value)?)
                    };
                }
                ENV_RUN_POLL_INTERVAL_MS => {
                    self.run.poll_interval_ms = parse_env(ENV_RUN_POLL_INTERVAL_MS, value)?;
                }
                ENV_RUN_OUTPUT_GRACE_MS => {
                    self.run.output_grace_ms = parse_env(ENV_RUN_OUTPUT_GRACE_MS, value)?;
                }
                _ => {}
            }
        }
        Ok(self)
    }
}

fn parse_env<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err: T::Err| ConfigError::InvalidEnv {
        var,
        reason: err.to_string(),
        value,
    })
}

/// Load config from an optional TOML file, then apply env overrides and validate.
///
/// A missing file yields `SaturnConfig::default()` before overrides.
pub fn load_config<I, K, V>(path: Option<&Path>, vars: I) -> Result<SaturnConfig, ConfigError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let base = match path.filter(|path| path.exists()) {
        Some(path) => {
            let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        }
        None => SaturnConfig::default(),
    };
    let cfg = base.apply_env(vars)?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_ENV: [(&str, &str); 0] = [];

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(Some(&temp.path().join("missing.toml")), NO_ENV).expect("load");
        assert_eq!(cfg, SaturnConfig::default());
        assert_eq!(cfg.run.timeout(), None);
        assert_eq!(cfg.run.poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.run.limits().output_grace, Duration::from_secs(2));
    }

    #[test]
    fn output_grace_can_be_overridden() {
        let cfg = load_config(None, [(ENV_RUN_OUTPUT_GRACE_MS, "250")]).expect("load");
        assert_eq!(
            cfg.run.limits(),
            WaitLimits {
                poll_interval: Duration::from_secs(1),
                timeout: None,
                output_grace: Duration::from_millis(250),
            }
        );
    }

    #[test]
    fn file_values_then_env_overrides() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "tool = \"saturn\"\n\n[run]\ntimeout_secs = 30\necho_output = false\n",
        )
        .expect("write");

        let cfg = load_config(
            Some(&path),
            [
                (ENV_RUN_TIMEOUT_SECS, "45"),
                (ENV_WORKING_DIRECTORY, "/srv/work"),
                ("PATH", "/usr/bin"),
            ],
        )
        .expect("load");

        assert_eq!(cfg.tool, "saturn");
        assert_eq!(cfg.run.timeout_secs, Some(45));
        assert!(!cfg.run.echo_output);
        assert_eq!(cfg.working_directory, "/srv/work");
        assert_eq!(cfg.run.shell, "sh");
    }

    #[test]
    fn malformed_env_is_typed_error() {
        let err = load_config(None, [(ENV_DEFAULT_NPROCS, "many")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv { var: ENV_DEFAULT_NPROCS, .. }
        ));
    }

    #[test]
    fn validation_rejects_zero_limits() {
        let err = load_config(None, [(ENV_DEFAULT_NPROCS, "0")]).unwrap_err();
        assert!(err.to_string().contains("default_nprocs"));

        let err = load_config(None, [(ENV_RUN_TIMEOUT_SECS, "0")]).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));

        let err = load_config(None, [(ENV_WORKING_DIRECTORY, "relative")]).unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn unparseable_file_is_parse_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "default_nprocs = \"x\"\n").expect("write");
        assert!(matches!(
            load_config(Some(&path), NO_ENV).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }
}
