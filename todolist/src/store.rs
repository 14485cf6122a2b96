//! File-backed task storage.
//!
//! [`TaskStore`] owns the JSON task file. Every mutation is a full
//! load-modify-save cycle against the file on disk: nothing is cached between
//! calls, so edits made by other processes are picked up on the next
//! operation. Concurrent writers follow last-writer-wins.
//!
//! # Atomic writes
//!
//! Saves never truncate the target in place. The document is written to a
//! temporary file in the same directory, synced, and then renamed over the
//! target, so a concurrent reader sees either the previous or the new
//! document in full. The two phases are exposed as [`TaskStore::stage`] and
//! [`StagedWrite::commit`].
//!
//! The replacement keeps the permission bits of the file it replaces. If the
//! task file is a symbolic link, the link is left in place and the file it
//! points to is replaced instead.
//!
//! # Example
//!
//! ```no_run
//! use todolist::store::TaskStore;
//!
//! let store = TaskStore::new("/tmp/todo.json");
//! store.ensure_exists()?;
//! store.add_task("Buy milk")?;
//! let moved = store.complete_task("Buy milk")?;
//! assert_eq!(moved.as_deref(), Some("Buy milk"));
//! # Ok::<(), todolist::store::StorageError>(())
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{is_blank, Document, ListId, TaskList};

/// Prefix of the temporary files created next to the task file while saving.
pub const STAGING_PREFIX: &str = ".todolist-";

/// Suffix of the temporary files created while saving.
pub const STAGING_SUFFIX: &str = ".tmp";

/// Errors that can occur while reading or writing the task file.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The task file does not exist.
    #[error("task file does not exist: {0}")]
    Missing(PathBuf),

    /// The file exists but its content is not a valid task document.
    #[error("task file {path} is malformed: {reason}")]
    Malformed {
        /// Path of the offending file.
        path: PathBuf,
        /// What failed to parse or validate.
        reason: String,
    },

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Persistent store for one task list inside a JSON task file.
#[derive(Debug, Clone)]
pub struct TaskStore {
    /// Path of the task file.
    path: PathBuf,

    /// Which list in the document mutations apply to.
    list: ListId,
}

impl TaskStore {
    /// Creates a store for the file at `path`, operating on the first list.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            list: ListId::DEFAULT,
        }
    }

    /// Selects a different list in the document.
    #[must_use]
    pub fn with_list(mut self, list: ListId) -> Self {
        self.list = list;
        self
    }

    /// Returns the path of the task file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the selected list.
    #[must_use]
    pub fn list_id(&self) -> ListId {
        self.list
    }

    /// Creates the task file with the seed document if it does not exist.
    ///
    /// Never overwrites an existing file, even one created concurrently by
    /// another process. Missing parent directories are created.
    ///
    /// Returns `true` if this call created the file.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory or file cannot be
    /// written.
    pub fn ensure_exists(&self) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }

        fs::create_dir_all(parent_dir(&resolve_link(&self.path)))?;

        let staged = self.stage(&Document::seed())?;
        match staged.file.persist_noclobber(&staged.target) {
            Ok(_) => {
                info!(path = %self.path.display(), "Created task file");
                Ok(true)
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %self.path.display(), "Task file appeared concurrently");
                Ok(false)
            }
            Err(e) => Err(StorageError::Io(e.error)),
        }
    }

    /// Reads and parses the task file.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Missing`] if the file does not exist
    /// - [`StorageError::Malformed`] if it is not a valid document or lacks
    ///   the selected list
    /// - [`StorageError::Io`] for other read failures
    pub fn load(&self) -> Result<Document> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::Missing(self.path.clone()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let document: Document =
            serde_json::from_slice(&content).map_err(|e| self.malformed(e.to_string()))?;

        if document.list(self.list).is_none() {
            return Err(self.malformed(format!(
                "list {} not present ({} lists in file)",
                self.list,
                document.len()
            )));
        }

        debug!(
            path = %self.path.display(),
            lists = document.len(),
            "Loaded task file"
        );

        Ok(document)
    }

    /// Loads the file and returns only the selected list.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn load_list(&self) -> Result<TaskList> {
        let document = self.load()?;
        document
            .list(self.list)
            .cloned()
            .ok_or_else(|| self.malformed(format!("list {} not present", self.list)))
    }

    /// Atomically replaces the task file with `document`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the temporary file cannot be written
    /// or renamed into place.
    pub fn save(&self, document: &Document) -> Result<()> {
        self.stage(document)?.commit()
    }

    /// Writes `document` to a temporary file next to the task file without
    /// making it visible.
    ///
    /// The target is only replaced by [`StagedWrite::commit`]. Dropping the
    /// returned value discards the temporary file.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the temporary file cannot be created,
    /// written, or synced.
    pub fn stage(&self, document: &Document) -> Result<StagedWrite> {
        let json = serde_json::to_string(document).map_err(io::Error::from)?;
        let target = resolve_link(&self.path);

        let mut file = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(parent_dir(&target))?;
        file.write_all(json.as_bytes())?;

        // Temporary files are created owner-only; keep the target's mode.
        match fs::metadata(&target) {
            Ok(meta) => fs::set_permissions(file.path(), meta.permissions())?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Io(e)),
        }
        file.as_file().sync_all()?;

        Ok(StagedWrite { file, target })
    }

    /// Appends `text` to the pending tasks.
    ///
    /// Blank text (empty, a lone newline, or only whitespace) is ignored. If
    /// the file is missing the call logs a warning and does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Malformed`] or [`StorageError::Io`] if the
    /// file cannot be read or written.
    pub fn add_task(&self, text: &str) -> Result<()> {
        if is_blank(text) {
            debug!("Ignoring blank task");
            return Ok(());
        }

        self.modify("add", |list| {
            list.pending.push(text.to_string());
            Some(())
        })?;
        Ok(())
    }

    /// Moves `text` from pending to done.
    ///
    /// Every pending occurrence is removed and the text is appended to done
    /// once. If `text` is not pending, nothing is written and `None` is
    /// returned, so repeated completion never duplicates a done entry.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Malformed`] or [`StorageError::Io`] if the
    /// file cannot be read or written. A missing file yields `Ok(None)`.
    pub fn complete_task(&self, text: &str) -> Result<Option<String>> {
        self.modify("complete", |list| {
            if remove_all(&mut list.pending, text) == 0 {
                return None;
            }
            list.done.push(text.to_string());
            Some(text.to_string())
        })
    }

    /// Removes every done occurrence of `text`. Pending tasks are untouched.
    ///
    /// Returns the text if at least one entry was removed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Malformed`] or [`StorageError::Io`] if the
    /// file cannot be read or written. A missing file yields `Ok(None)`.
    pub fn delete_task(&self, text: &str) -> Result<Option<String>> {
        self.modify("delete", |list| {
            (remove_all(&mut list.done, text) > 0).then(|| text.to_string())
        })
    }

    /// Runs one load-modify-save cycle on the selected list.
    ///
    /// `apply` returns `None` when it left the list unchanged, in which case
    /// nothing is written.
    fn modify<R>(
        &self,
        op: &str,
        apply: impl FnOnce(&mut TaskList) -> Option<R>,
    ) -> Result<Option<R>> {
        let mut document = match self.load() {
            Ok(document) => document,
            Err(StorageError::Missing(path)) => {
                warn!(op, path = %path.display(), "Task file missing, ignoring mutation");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let list = document
            .list_mut(self.list)
            .ok_or_else(|| self.malformed(format!("list {} not present", self.list)))?;

        let Some(outcome) = apply(list) else {
            debug!(op, path = %self.path.display(), "Mutation left list unchanged");
            return Ok(None);
        };

        self.save(&document)?;
        debug!(op, path = %self.path.display(), "Saved task file");
        Ok(Some(outcome))
    }

    fn malformed(&self, reason: String) -> StorageError {
        StorageError::Malformed {
            path: self.path.clone(),
            reason,
        }
    }
}

/// A document fully written to a temporary file, awaiting the rename that
/// makes it visible at the target path.
#[derive(Debug)]
pub struct StagedWrite {
    file: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    /// Path of the temporary file holding the staged document.
    #[must_use]
    pub fn staging_path(&self) -> &Path {
        self.file.path()
    }

    /// Renames the staged file over the target.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the rename fails. The temporary file is
    /// removed in that case and the target keeps its previous content.
    pub fn commit(self) -> Result<()> {
        self.file
            .persist(&self.target)
            .map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }
}

/// Removes every element equal to `text`, returning how many were removed.
fn remove_all(tasks: &mut Vec<String>, text: &str) -> usize {
    let before = tasks.len();
    tasks.retain(|t| t != text);
    before - tasks.len()
}

/// Follows `path` if it is a symbolic link, so saves replace the linked file
/// rather than the link.
///
/// A dangling link resolves to its target as written in the link.
pub(crate) fn resolve_link(path: &Path) -> PathBuf {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => fs::canonicalize(path).unwrap_or_else(|_| {
            fs::read_link(path).map_or_else(|_| path.to_path_buf(), |link| parent_dir(path).join(link))
        }),
        _ => path.to_path_buf(),
    }
}

/// Directory holding `path`, treating a bare file name as the current directory.
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
