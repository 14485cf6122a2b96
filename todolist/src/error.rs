//! Error types for todolist.
//!
//! Each module defines its own error enum; [`TodoError`] aggregates them for
//! callers that drive the whole system through the controller.

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StorageError;
use crate::watcher::WatchError;

/// Errors that can occur during task list operations.
///
/// # Examples
///
/// ```
/// use todolist::error::TodoError;
/// use todolist::store::StorageError;
///
/// let err: TodoError = StorageError::Missing("/tmp/todo.json".into()).into();
/// assert!(err.is_missing());
/// ```
#[derive(Error, Debug)]
pub enum TodoError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Reading or writing the task file failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The change watch could not be established.
    #[error("file watch error: {0}")]
    Watch(#[from] WatchError),
}

impl TodoError {
    /// Returns `true` if the task file did not exist.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Storage(StorageError::Missing(_)))
    }

    /// Returns `true` if the task file exists but could not be parsed.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Storage(StorageError::Malformed { .. }))
    }
}

/// A specialized `Result` type for task list operations.
pub type Result<T> = std::result::Result<T, TodoError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn storage_error_conversion() {
        let err: TodoError = StorageError::Missing(PathBuf::from("/t/todo.json")).into();
        assert!(matches!(err, TodoError::Storage(_)));
        assert!(err.is_missing());
        assert!(!err.is_malformed());
        assert_eq!(
            err.to_string(),
            "storage error: task file does not exist: /t/todo.json"
        );
    }

    #[test]
    fn malformed_detection() {
        let err: TodoError = StorageError::Malformed {
            path: PathBuf::from("/t/todo.json"),
            reason: "expected value".to_string(),
        }
        .into();
        assert!(err.is_malformed());
        assert!(!err.is_missing());
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: TodoError = StorageError::from(io_err).into();
        assert_eq!(err.to_string(), "storage error: I/O error: access denied");
    }

    #[test]
    fn watch_error_display() {
        let err: TodoError = WatchError::NoRuntime.into();
        assert!(matches!(err, TodoError::Watch(_)));
        assert!(err.to_string().starts_with("file watch error:"));
    }

    #[test]
    fn config_error_conversion() {
        let err: TodoError = ConfigError::NoHomeDirectory.into();
        assert_eq!(
            err.to_string(),
            "configuration error: failed to determine home directory"
        );
    }

    #[test]
    fn error_source_chain() {
        use std::error::Error;

        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: TodoError = StorageError::Io(io_err).into();

        assert!(err.source().is_some());
    }

    #[test]
    fn result_type_alias_works() {
        fn example_function() -> Result<i32> {
            Ok(42)
        }

        fn example_error_function() -> Result<i32> {
            Err(WatchError::NoRuntime.into())
        }

        assert!(example_function().is_ok());
        assert!(example_error_function().is_err());
    }
}
