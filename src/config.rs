//! Startup configuration.
//!
//! Resolved once from CLI flags and environment variables. State (logs)
//! follows XDG: `$XDG_STATE_HOME/sessiontree/` (~/.local/state/sessiontree/).

use crate::cli::TuiOptions;
use crate::domain::SortMode;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const PROJECTS_DIR_ENV: &str = "SESSIONTREE_PROJECTS_DIR";
pub const CLAUDE_PROJECTS_DIR_ENV: &str = "CLAUDE_PROJECTS_DIR";
pub const DEBOUNCE_ENV: &str = "SESSIONTREE_DEBOUNCE_MS";
pub const POLL_ENV: &str = "SESSIONTREE_POLL_SECS";
pub const LOG_LEVEL_ENV: &str = "SESSIONTREE_LOG";

const DEFAULT_DEBOUNCE_MS: u64 = 500;
const DEFAULT_POLL_SECS: u64 = 10;
const DEFAULT_LOG_LEVEL: &str = "info";
const APP_DIR: &str = "sessiontree";
const LOG_FILE: &str = "sessiontree.log";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("home directory not found; set {PROJECTS_DIR_ENV} or pass --root")]
    HomeDirNotFound,

    #[error("invalid value for {name}: {value}")]
    InvalidNumber { name: &'static str, value: String },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    pub projects_root: PathBuf,
    pub debounce: Duration,
    /// `None` disables periodic rescans.
    pub poll_interval: Option<Duration>,
    pub follow: bool,
    pub sort: SortMode,
    pub log_level: String,
}

impl Config {
    pub fn from_env(options: &TuiOptions) -> Result<Self, ConfigError> {
        Self::resolve(options, |name| std::env::var(name).ok(), dirs::home_dir())
    }

    /// Resolution with injectable environment, so tests never touch process env.
    pub fn resolve(
        options: &TuiOptions,
        env: impl Fn(&str) -> Option<String>,
        home: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| env(name).filter(|value| !value.trim().is_empty());

        let projects_root = match options.root.clone() {
            Some(root) => root,
            None => match non_empty(PROJECTS_DIR_ENV).or_else(|| non_empty(CLAUDE_PROJECTS_DIR_ENV)) {
                Some(dir) => PathBuf::from(dir),
                None => home
                    .ok_or(ConfigError::HomeDirNotFound)?
                    .join(".claude")
                    .join("projects"),
            },
        };

        let debounce_ms = parse_u64(DEBOUNCE_ENV, non_empty(DEBOUNCE_ENV), DEFAULT_DEBOUNCE_MS)?;
        let poll_secs = parse_u64(POLL_ENV, non_empty(POLL_ENV), DEFAULT_POLL_SECS)?;

        Ok(Self {
            projects_root,
            debounce: Duration::from_millis(debounce_ms),
            poll_interval: (poll_secs > 0).then(|| Duration::from_secs(poll_secs)),
            follow: !options.no_follow,
            sort: options.sort.unwrap_or_default(),
            log_level: non_empty(LOG_LEVEL_ENV).unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        })
    }

    /// Returns XDG_STATE_HOME/sessiontree or ~/.local/state/sessiontree
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join(APP_DIR)
    }

    pub fn log_path() -> PathBuf {
        Self::state_dir().join(LOG_FILE)
    }

    pub fn log_file_name() -> &'static str {
        LOG_FILE
    }
}

fn parse_u64(name: &'static str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
    }
}

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var_os("XDG_STATE_HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".local").join("state"))
}
