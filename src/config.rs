//! Configuration management for barliman.
//!
//! Configuration can be set via environment variables:
//! - `BARLIMAN_EVALUATOR` - Optional. Evaluator executable. Defaults to `scheme`.
//! - `BARLIMAN_EVALUATOR_ARGS` - Optional. Whitespace-separated arguments placed before `--script`.
//! - `BARLIMAN_DEBOUNCE_MS` - Optional. Quiet period after an edit before checks rerun. Defaults to `1000`.
//! - `BARLIMAN_STAGING_DIR` - Optional. Where query files are written. Defaults to `<tmp>/barliman`.
//! - `BARLIMAN_MK_DIR` - Optional. Directory holding `mk-vicare.scm` and `mk.scm`. Defaults to the staging dir.
//! - `BARLIMAN_KILL_GRACE_MS` - Optional. Time a cancelled evaluator gets before SIGKILL. Defaults to `2000`.
//! - `BARLIMAN_SHUTDOWN_GRACE_MS` - Optional. Bound on waiting for checks at shutdown. Defaults to `5000`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::util::{env_var_list, env_var_millis};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(2000);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(5000);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Evaluator executable, invoked as `<evaluator> [args] --script <file>`
    pub evaluator: PathBuf,

    /// Extra leading arguments for the evaluator
    pub evaluator_args: Vec<String>,

    /// Debounce quiet period
    pub debounce: Duration,

    /// Directory the active generation stages its query files in
    pub staging_dir: PathBuf,

    /// Directory holding the miniKanren sources loaded by generated queries
    pub mk_dir: PathBuf,

    /// Grace period between SIGTERM and SIGKILL for a cancelled check
    pub kill_grace: Duration,

    /// Bound on waiting for the last generation at shutdown
    pub shutdown_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a duration is not a whole number
    /// of milliseconds, or if `BARLIMAN_EVALUATOR` is set but empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let evaluator = match std::env::var("BARLIMAN_EVALUATOR") {
            Ok(value) if value.trim().is_empty() => {
                return Err(ConfigError::InvalidValue(
                    "BARLIMAN_EVALUATOR".to_string(),
                    "empty path".to_string(),
                ))
            }
            Ok(value) => PathBuf::from(value),
            Err(_) => PathBuf::from("scheme"),
        };

        let staging_dir = std::env::var("BARLIMAN_STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("barliman"));

        let mk_dir = std::env::var("BARLIMAN_MK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| staging_dir.clone());

        Ok(Self {
            evaluator,
            evaluator_args: env_var_list("BARLIMAN_EVALUATOR_ARGS"),
            debounce: env_var_millis("BARLIMAN_DEBOUNCE_MS", DEFAULT_DEBOUNCE)?,
            staging_dir,
            mk_dir,
            kill_grace: env_var_millis("BARLIMAN_KILL_GRACE_MS", DEFAULT_KILL_GRACE)?,
            shutdown_grace: env_var_millis("BARLIMAN_SHUTDOWN_GRACE_MS", DEFAULT_SHUTDOWN_GRACE)?,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(evaluator: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        let staging_dir = staging_dir.into();
        Self {
            evaluator: evaluator.into(),
            evaluator_args: Vec::new(),
            debounce: DEFAULT_DEBOUNCE,
            mk_dir: staging_dir.clone(),
            staging_dir,
            kill_grace: DEFAULT_KILL_GRACE,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_evaluator_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.evaluator_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}
