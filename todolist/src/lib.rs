//! todolist - a file-backed task list with live reload.
//!
//! Tasks live in a JSON file (by default `~/.todo.json`) holding pending and
//! done tasks. The crate keeps that file and an in-memory view consistent
//! while other processes edit it too.
//!
//! # Overview
//!
//! A UI layer talks only to the [`ListController`]. Mutations go straight to
//! the [`TaskStore`], which re-reads the file, applies the change and
//! atomically replaces it. The [`ChangeWatcher`] notices the new file, and the
//! controller reloads it and hands the UI a fresh [`ViewModel`]. External
//! edits take exactly the same path.
//!
//! # Modules
//!
//! - [`types`]: The persisted document and the view model
//! - [`store`]: Load, save and task mutations
//! - [`watcher`]: File change notification
//! - [`controller`]: The interface for UI layers
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types

pub mod config;
pub mod controller;
pub mod error;
pub mod store;
pub mod types;
pub mod watcher;

pub use config::{Config, ConfigError};
pub use controller::{ControllerState, ListController, ListEvent};
pub use error::{Result, TodoError};
pub use store::{StagedWrite, StorageError, TaskStore};
pub use types::{Document, ListId, TaskList, ViewModel};
pub use watcher::{ChangeWatcher, WatchError, WatchOptions};
