//! Configuration module for todolist.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `TODOLIST_FILE` | No | `~/.todo.json` | Task file to read and write |
//! | `TODOLIST_LIST_INDEX` | No | 0 | Which list in the file to operate on |
//! | `TODOLIST_CLIPBOARD` | No | false | Copy completed/deleted tasks to the clipboard |
//! | `TODOLIST_DEBOUNCE_MS` | No | 100 | Quiet period before a change triggers a refresh |
//! | `TODOLIST_POLL_INTERVAL_MS` | No | - | Poll the file at this interval instead of using native notifications |
//!
//! # Example
//!
//! ```no_run
//! use todolist::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Task file: {}", config.file_path.display());
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use thiserror::Error;

use crate::types::ListId;
use crate::watcher::{WatchOptions, DEFAULT_DEBOUNCE_MS};

/// Default task file name relative to home.
const DEFAULT_FILE_NAME: &str = ".todo.json";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// Configuration for todolist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Path of the JSON task file.
    pub file_path: PathBuf,

    /// List inside the file that operations apply to.
    pub list: ListId,

    /// Whether the UI copies completed and deleted tasks to the clipboard.
    pub clipboard_enabled: bool,

    /// Change watcher settings.
    pub watch: WatchOptions,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - A numeric or boolean variable cannot be parsed
    /// - `TODOLIST_POLL_INTERVAL_MS` is 0
    /// - `TODOLIST_FILE` is unset and the home directory cannot be determined
    pub fn from_env() -> Result<Self, ConfigError> {
        // Optional: TODOLIST_FILE (default: ~/.todo.json)
        let file_path = match env::var("TODOLIST_FILE") {
            Ok(path) => PathBuf::from(path),
            Err(_) => default_file_path()?,
        };

        // Optional: TODOLIST_LIST_INDEX (default: 0)
        let list = match env::var("TODOLIST_LIST_INDEX") {
            Ok(val) => ListId(parse_number("TODOLIST_LIST_INDEX", &val)?),
            Err(_) => ListId::DEFAULT,
        };

        // Optional: TODOLIST_CLIPBOARD (default: false)
        let clipboard_enabled = match env::var("TODOLIST_CLIPBOARD") {
            Ok(val) => parse_bool("TODOLIST_CLIPBOARD", &val)?,
            Err(_) => false,
        };

        // Optional: TODOLIST_DEBOUNCE_MS (default: 100)
        let debounce_ms = match env::var("TODOLIST_DEBOUNCE_MS") {
            Ok(val) => parse_number("TODOLIST_DEBOUNCE_MS", &val)?,
            Err(_) => DEFAULT_DEBOUNCE_MS,
        };

        // Optional: TODOLIST_POLL_INTERVAL_MS (default: native notifications)
        let poll_interval = match env::var("TODOLIST_POLL_INTERVAL_MS") {
            Ok(val) => {
                let ms: u64 = parse_number("TODOLIST_POLL_INTERVAL_MS", &val)?;
                if ms == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "TODOLIST_POLL_INTERVAL_MS".to_string(),
                        message: "poll interval must be greater than 0".to_string(),
                    });
                }
                Some(Duration::from_millis(ms))
            }
            Err(_) => None,
        };

        Ok(Self {
            file_path,
            list,
            clipboard_enabled,
            watch: WatchOptions {
                debounce: Duration::from_millis(debounce_ms),
                poll_interval,
            },
        })
    }

    /// Replaces the task file path, e.g. from a command-line flag.
    #[must_use]
    pub fn with_file_path(mut self, file_path: PathBuf) -> Self {
        self.file_path = file_path;
        self
    }
}

/// Returns `~/.todo.json`.
///
/// # Errors
///
/// Returns `ConfigError::NoHomeDirectory` if the home directory is unknown.
pub fn default_file_path() -> Result<PathBuf, ConfigError> {
    let base_dirs = BaseDirs::new().ok_or(ConfigError::NoHomeDirectory)?;
    Ok(base_dirs.home_dir().join(DEFAULT_FILE_NAME))
}

fn parse_number<T: std::str::FromStr>(key: &str, val: &str) -> Result<T, ConfigError> {
    val.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected non-negative integer, got '{val}'"),
    })
}

fn parse_bool(key: &str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected true or false, got '{val}'"),
        }),
    }
}
