//! Change notification for the task file.
//!
//! [`ChangeWatcher`] invokes a callback whenever the task file is created,
//! modified, replaced, or removed.
//!
//! # Architecture
//!
//! The watch is placed on the file's parent directory rather than on the file
//! itself. Saves replace the file by renaming a temporary file over it, which
//! gives the target a new inode; a watch on the old inode would go silent
//! after the first save. Directory events are filtered down to the watched
//! file name. If the path is a symbolic link, the file it points to is
//! watched instead, since that is the file saves replace.
//!
//! The notify callback stays lightweight: it only pushes a unit signal into a
//! bounded channel. A single tokio task drains that channel, waits for the
//! burst to settle for the debounce window, and then runs the user callback
//! on the blocking thread pool, awaiting it before handling the next burst.
//! Callbacks are therefore serialized and never overlap each other.
//!
//! # Example
//!
//! ```no_run
//! use todolist::watcher::{ChangeWatcher, WatchOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), todolist::watcher::WatchError> {
//!     let mut watcher = ChangeWatcher::start(
//!         "/home/user/.todo.json",
//!         WatchOptions::default(),
//!         || println!("task file changed"),
//!     )?;
//!
//!     // ...
//!
//!     watcher.stop();
//!     Ok(())
//! }
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use notify::{
    Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher,
};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::store::{parent_dir, resolve_link};

/// Default debounce window in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Capacity of the channel between the notify thread and the dispatch task.
///
/// Signals carry no data, so a full channel already guarantees a pending
/// callback and dropped signals lose nothing.
const SIGNAL_CAPACITY: usize = 64;

/// Errors that can occur while establishing a watch.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The notify backend could not be created or could not watch the path.
    #[error("failed to create watcher: {0}")]
    Init(#[from] notify::Error),

    /// The directory that should contain the file does not exist.
    #[error("watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    /// The path has no file name component.
    #[error("not a file path: {0}")]
    InvalidPath(PathBuf),

    /// `start` was called outside a tokio runtime.
    #[error("no tokio runtime available to dispatch change notifications")]
    NoRuntime,
}

/// Result type for watcher operations.
pub type Result<T> = std::result::Result<T, WatchError>;

/// Tuning for [`ChangeWatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    /// How long the file must stay quiet before the callback runs.
    ///
    /// A save produces several raw events (create, write, rename); they are
    /// coalesced into one callback. Zero disables the delay, but signals
    /// already queued are still coalesced.
    pub debounce: Duration,

    /// Use the portable polling backend with this interval instead of the
    /// platform's native notifier.
    pub poll_interval: Option<Duration>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            poll_interval: None,
        }
    }
}

/// Watches one file and runs a callback when it changes.
///
/// Dropping the watcher stops it.
pub struct ChangeWatcher {
    /// The notify backend. Dropping it ends the subscription and closes the
    /// signal channel.
    watcher: Option<Box<dyn Watcher + Send>>,

    /// Dispatch task draining the signal channel.
    task: Option<JoinHandle<()>>,

    /// Cleared by `stop`; checked under the lock before every callback.
    active: Arc<Mutex<bool>>,

    /// The watched file.
    path: PathBuf,
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl ChangeWatcher {
    /// Starts watching `path` and calls `on_change` after each change.
    ///
    /// The file itself does not need to exist yet, but its parent directory
    /// must. Must be called from within a tokio runtime; the callback runs on
    /// a task spawned there.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path has no file name
    /// - The parent directory does not exist
    /// - No tokio runtime is available
    /// - The notify backend cannot be initialized
    pub fn start<F>(path: impl Into<PathBuf>, options: WatchOptions, on_change: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let path = path.into();
        let runtime = Handle::try_current().map_err(|_| WatchError::NoRuntime)?;

        let watched = resolve_link(&path);
        let file_name = watched
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| WatchError::InvalidPath(path.clone()))?;

        let dir = parent_dir(&watched).to_path_buf();
        if !dir.is_dir() {
            return Err(WatchError::DirectoryNotFound(dir));
        }

        let (signal_tx, signal_rx) = mpsc::channel::<()>(SIGNAL_CAPACITY);
        let active = Arc::new(Mutex::new(true));

        let handler = move |res: notify::Result<Event>| {
            handle_notify_event(res, &file_name, &signal_tx);
        };

        let mut watcher: Box<dyn Watcher + Send> = match options.poll_interval {
            Some(interval) => Box::new(PollWatcher::new(
                handler,
                Config::default().with_poll_interval(interval),
            )?),
            None => Box::new(RecommendedWatcher::new(handler, Config::default())?),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let task = runtime.spawn(dispatch_changes(
            signal_rx,
            options.debounce,
            Arc::clone(&active),
            on_change,
        ));

        info!(
            path = %path.display(),
            polling = options.poll_interval.is_some(),
            "Started watching task file"
        );

        Ok(Self {
            watcher: Some(watcher),
            task: Some(task),
            active,
            path,
        })
    }

    /// Returns the watched file as given to [`start`](Self::start).
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` until [`stop`](Self::stop) is called.
    #[must_use]
    pub fn is_active(&self) -> bool {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancels the watch.
    ///
    /// Once this returns, the callback will not be invoked again. A callback
    /// that is already running is allowed to finish first, so `stop` may
    /// block briefly. Calling `stop` from inside the callback deadlocks.
    pub fn stop(&mut self) {
        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if !*active {
                return;
            }
            *active = false;
        }

        self.watcher.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }

        info!(path = %self.path.display(), "Stopped watching task file");
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Filters raw notify events down to changes of the watched file name and
/// forwards a signal for each.
fn handle_notify_event(
    res: notify::Result<Event>,
    file_name: &OsString,
    signal_tx: &mpsc::Sender<()>,
) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "File watcher error");
            return;
        }
    };

    trace!(kind = ?event.kind, paths = ?event.paths, "Received notify event");

    if !is_content_change(&event.kind) {
        return;
    }

    let touches_file = event
        .paths
        .iter()
        .any(|p| p.file_name().is_some_and(|name| name == file_name.as_os_str()));
    if !touches_file {
        return;
    }

    match signal_tx.try_send(()) {
        Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
        Err(mpsc::error::TrySendError::Closed(())) => {
            debug!("Signal channel closed, dropping notification");
        }
    }
}

/// Returns `true` for event kinds that can change what a reader would load.
///
/// Access events are ignored so that reading the file does not trigger
/// another read.
fn is_content_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Any | EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Drains change signals and runs the callback once per settled burst.
async fn dispatch_changes<F>(
    mut signal_rx: mpsc::Receiver<()>,
    debounce: Duration,
    active: Arc<Mutex<bool>>,
    on_change: F,
) where
    F: Fn() + Send + Sync + 'static,
{
    let on_change = Arc::new(on_change);
    while signal_rx.recv().await.is_some() {
        if !debounce.is_zero() {
            loop {
                match tokio::time::timeout(debounce, signal_rx.recv()).await {
                    Ok(Some(())) => continue,
                    Ok(None) => {
                        debug!("Signal channel closed during debounce");
                        return;
                    }
                    Err(_) => break,
                }
            }
        }
        while signal_rx.try_recv().is_ok() {}

        // The callback does blocking file I/O; keep it off the async workers.
        let active = Arc::clone(&active);
        let on_change = Arc::clone(&on_change);
        let dispatched = tokio::task::spawn_blocking(move || {
            let guard = active.lock().unwrap_or_else(PoisonError::into_inner);
            if !*guard {
                return false;
            }
            trace!("Dispatching change notification");
            on_change();
            true
        })
        .await;

        match dispatched {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => error!(error = %e, "Change callback failed"),
        }
    }

    debug!("Change dispatcher shutting down");
}
