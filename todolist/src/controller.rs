//! The controller a UI layer talks to.
//!
//! [`ListController`] wraps a [`TaskStore`] and owns the [`ChangeWatcher`]
//! for its file. The UI calls [`refresh`](ListController::refresh) to render
//! and the mutation methods on user actions. While the controller is enabled,
//! every change to the file, including the controller's own writes, produces
//! a [`ListEvent`] carrying a fresh [`ViewModel`]. Mutations never refresh on
//! their own; the change notification is the single path by which the UI
//! learns that something changed.
//!
//! Events are published on a [`watch`] channel: the UI always sees the most
//! recent outcome, and a slow UI skips intermediate views instead of falling
//! behind the file.
//!
//! # Example
//!
//! ```no_run
//! use tokio::sync::watch;
//! use todolist::controller::{ListController, ListEvent};
//! use todolist::store::TaskStore;
//!
//! #[tokio::main]
//! async fn main() -> todolist::Result<()> {
//!     let mut controller = ListController::new(TaskStore::new("/tmp/todo.json"));
//!     let view = controller.refresh()?;
//!     println!("({})", view.pending_count);
//!
//!     let (tx, mut rx) = watch::channel(ListEvent::Refreshed(view));
//!     controller.start(tx)?;
//!     controller.submit_new_task("Buy milk")?;
//!
//!     if rx.changed().await.is_ok() {
//!         if let ListEvent::Refreshed(view) = &*rx.borrow_and_update() {
//!             println!("({})", view.pending_count);
//!         }
//!     }
//!
//!     controller.stop();
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::store::{self, StorageError, TaskStore};
use crate::types::ViewModel;
use crate::watcher::{ChangeWatcher, WatchOptions};

/// Notifications delivered to the UI while the controller is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEvent {
    /// The file changed and was reloaded.
    Refreshed(ViewModel),

    /// The file changed but could not be loaded (e.g. it is malformed).
    RefreshFailed(String),
}

/// Lifecycle state of a [`ListController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Not watching the file. Initial state.
    Disabled,

    /// Watching the file and emitting [`ListEvent`]s.
    Enabled,
}

/// State shared between the controller and its watcher callback.
#[derive(Debug)]
struct Shared {
    store: TaskStore,
    refresh_gate: RefreshGate,
}

/// Coalesces overlapping refreshes.
///
/// The first caller runs the refresh. A caller that arrives while it is
/// running does not load the file itself: it asks for one rerun and waits for
/// that rerun's view, which reflects the file as of some point after it
/// arrived. Any number of callers arriving during the same run share one
/// rerun.
#[derive(Debug, Default)]
struct RefreshGate {
    state: Mutex<GateState>,
    finished: Condvar,
}

#[derive(Debug, Default)]
struct GateState {
    in_flight: bool,
    rerun: bool,
    /// Runs started and completed so far.
    started: u64,
    completed: u64,
    /// Callers blocked on a rerun.
    waiting: usize,
    /// View of the last completed run, `None` if it failed.
    latest: Option<ViewModel>,
}

impl RefreshGate {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `refresh`, or joins the refresh already in flight.
    ///
    /// A joining caller whose rerun failed calls `refresh` itself so that it
    /// gets the error rather than a copy of it.
    fn run(
        &self,
        mut refresh: impl FnMut() -> store::Result<ViewModel>,
    ) -> store::Result<ViewModel> {
        let mut state = self.lock();

        if state.in_flight {
            let target = state.started + 1;
            state.rerun = true;
            state.waiting += 1;
            debug!(waiting = state.waiting, "Refresh already in flight, coalescing");

            while state.completed < target {
                state = self
                    .finished
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            state.waiting -= 1;

            if let Some(view) = state.latest.clone() {
                return Ok(view);
            }
            drop(state);
            return refresh();
        }

        state.in_flight = true;
        loop {
            state.rerun = false;
            state.started += 1;
            drop(state);

            let outcome = refresh();

            state = self.lock();
            state.completed += 1;
            state.latest = outcome.as_ref().ok().cloned();
            self.finished.notify_all();

            if !state.rerun {
                state.in_flight = false;
                return outcome;
            }
        }
    }
}

/// Coordinates the task store and the change watcher for one task file.
#[derive(Debug)]
pub struct ListController {
    shared: Arc<Shared>,
    watch_options: WatchOptions,
    watcher: Option<ChangeWatcher>,
}

impl ListController {
    /// Creates a disabled controller for `store` with default watch options.
    #[must_use]
    pub fn new(store: TaskStore) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                refresh_gate: RefreshGate::default(),
            }),
            watch_options: WatchOptions::default(),
            watcher: None,
        }
    }

    /// Creates a disabled controller from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let store = TaskStore::new(config.file_path.clone()).with_list(config.list);
        Self::new(store).with_watch_options(config.watch.clone())
    }

    /// Replaces the options used by the next [`start`](Self::start).
    #[must_use]
    pub fn with_watch_options(mut self, options: WatchOptions) -> Self {
        self.watch_options = options;
        self
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &TaskStore {
        &self.shared.store
    }

    /// Returns the task file path.
    #[must_use]
    pub fn file_path(&self) -> &Path {
        self.shared.store.path()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        if self.watcher.is_some() {
            ControllerState::Enabled
        } else {
            ControllerState::Disabled
        }
    }

    /// Loads the file and returns the filtered view of the selected list.
    ///
    /// Creates the file with seed content if it does not exist. If the file
    /// disappears between creation and loading, creation and loading are
    /// retried once. A call that overlaps another refresh, manual or
    /// change-triggered, waits for it and shares its result.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file is malformed or cannot be read.
    /// A malformed file is left untouched.
    pub fn refresh(&self) -> Result<ViewModel> {
        Ok(self.shared.refresh()?)
    }

    /// Adds a pending task. Blank text is ignored.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file is malformed or cannot be written.
    /// A missing file is not an error.
    pub fn submit_new_task(&self, text: &str) -> Result<()> {
        Ok(self.shared.store.add_task(text)?)
    }

    /// Marks a pending task done, returning its text if it was moved.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file is malformed or cannot be written.
    pub fn complete_item(&self, text: &str) -> Result<Option<String>> {
        Ok(self.shared.store.complete_task(text)?)
    }

    /// Deletes a done task, returning its text if anything was removed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file is malformed or cannot be written.
    pub fn delete_item(&self, text: &str) -> Result<Option<String>> {
        Ok(self.shared.store.delete_task(text)?)
    }

    /// Enables automatic refresh: every change to the file publishes a
    /// [`ListEvent`] on `events`.
    ///
    /// The channel's initial value is left alone until the first change, so
    /// the UI typically seeds it with the result of [`refresh`](Self::refresh).
    ///
    /// Calling `start` on an enabled controller does nothing. Must be called
    /// from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a watch error if the watch cannot be established. The
    /// controller then stays disabled; [`refresh`](Self::refresh) and the
    /// mutations keep working.
    pub fn start(&mut self, events: watch::Sender<ListEvent>) -> Result<()> {
        if self.watcher.is_some() {
            debug!("Controller already enabled");
            return Ok(());
        }

        // The watch needs the file's directory to exist.
        if let Err(e) = self.shared.store.ensure_exists() {
            warn!(
                path = %self.file_path().display(),
                error = %e,
                "Failed to create task file before watching"
            );
        }

        let shared = Arc::clone(&self.shared);
        let watcher = ChangeWatcher::start(
            self.file_path().to_path_buf(),
            self.watch_options.clone(),
            move || notify_refresh(&shared, &events),
        )?;

        self.watcher = Some(watcher);
        info!(path = %self.file_path().display(), "Controller enabled");
        Ok(())
    }

    /// Disables automatic refresh. No [`ListEvent`] is sent after this
    /// returns. Does nothing if already disabled.
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
            info!(path = %self.file_path().display(), "Controller disabled");
        }
    }
}

impl Shared {
    fn refresh(&self) -> store::Result<ViewModel> {
        self.refresh_gate.run(|| load_view(&self.store))
    }
}

/// Ensures the file exists, loads it, and builds the view.
fn load_view(store: &TaskStore) -> store::Result<ViewModel> {
    store.ensure_exists()?;

    let list = match store.load_list() {
        Err(StorageError::Missing(path)) => {
            debug!(path = %path.display(), "Task file vanished before load, recreating");
            store.ensure_exists()?;
            store.load_list()?
        }
        other => other?,
    };

    Ok(ViewModel::from_list(&list))
}

/// Reloads the file and publishes the outcome to the UI.
///
/// Publishing replaces whatever the UI has not read yet.
fn notify_refresh(shared: &Shared, events: &watch::Sender<ListEvent>) {
    let event = match shared.refresh() {
        Ok(view) => ListEvent::Refreshed(view),
        Err(e) => {
            warn!(path = %shared.store.path().display(), error = %e, "Refresh after change failed");
            ListEvent::RefreshFailed(e.to_string())
        }
    };

    if events.send(event).is_err() {
        debug!("No receiver for list events");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::error::TodoError;

    const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

    fn create_test_controller() -> (TempDir, ListController) {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = TaskStore::new(temp_dir.path().join("todo.json"));
        let controller = ListController::new(store).with_watch_options(WatchOptions {
            debounce: Duration::from_millis(20),
            poll_interval: None,
        });
        (temp_dir, controller)
    }

    fn event_channel() -> (watch::Sender<ListEvent>, watch::Receiver<ListEvent>) {
        watch::channel(ListEvent::RefreshFailed("not loaded yet".to_string()))
    }

    async fn next_event(rx: &mut watch::Receiver<ListEvent>) -> ListEvent {
        tokio::time::timeout(EVENT_TIMEOUT, rx.changed())
            .await
            .expect("Timed out waiting for list event")
            .expect("Event channel closed");
        rx.borrow_and_update().clone()
    }

    fn view_named(name: &str) -> ViewModel {
        ViewModel {
            list_name: name.to_string(),
            ..ViewModel::default()
        }
    }

    #[test]
    fn test_refresh_creates_seed() {
        let (_dir, controller) = create_test_controller();

        let view = controller.refresh().unwrap();

        assert_eq!(view.list_name, "My List");
        assert_eq!(view.pending_items, vec!["Task 1"]);
        assert_eq!(view.pending_count, 1);
        assert!(view.done_items.is_empty());
    }

    #[test]
    fn test_refresh_filters_blank_entries() {
        let (_dir, controller) = create_test_controller();
        fs::write(
            controller.file_path(),
            r#"[{"list": "L", "todo": ["", "\n", "Buy milk"], "done": ["\n"]}]"#,
        )
        .unwrap();

        let view = controller.refresh().unwrap();

        assert_eq!(view.pending_items, vec!["Buy milk"]);
        assert_eq!(view.pending_count, 1);
        assert!(view.done_items.is_empty());
    }

    #[test]
    fn test_refresh_does_not_write_existing_file() {
        let (_dir, controller) = create_test_controller();
        let raw = r#"[{"list": "L", "todo": ["", "a"], "done": []}]"#;
        fs::write(controller.file_path(), raw).unwrap();

        controller.refresh().unwrap();

        assert_eq!(fs::read_to_string(controller.file_path()).unwrap(), raw);
    }

    #[test]
    fn test_refresh_surfaces_malformed_file() {
        let (_dir, controller) = create_test_controller();
        fs::write(controller.file_path(), "not json").unwrap();

        let err = controller.refresh().unwrap_err();

        assert!(matches!(
            err,
            TodoError::Storage(StorageError::Malformed { .. })
        ));
        assert_eq!(
            fs::read_to_string(controller.file_path()).unwrap(),
            "not json"
        );
    }

    #[test]
    fn test_mutations_work_while_disabled() {
        let (_dir, controller) = create_test_controller();
        controller.refresh().unwrap();
        assert_eq!(controller.state(), ControllerState::Disabled);

        controller.submit_new_task("A").unwrap();
        assert_eq!(controller.complete_item("A").unwrap().as_deref(), Some("A"));
        assert_eq!(controller.delete_item("A").unwrap().as_deref(), Some("A"));

        let view = controller.refresh().unwrap();
        assert_eq!(view.pending_items, vec!["Task 1"]);
        assert!(view.done_items.is_empty());
    }

    #[tokio::test]
    async fn test_start_emits_on_external_change() {
        let (_dir, mut controller) = create_test_controller();
        let (tx, mut rx) = event_channel();

        controller.start(tx).unwrap();
        assert_eq!(controller.state(), ControllerState::Enabled);

        // Another writer edits the same file.
        let other = TaskStore::new(controller.file_path());
        other.add_task("from elsewhere").unwrap();

        match next_event(&mut rx).await {
            ListEvent::Refreshed(view) => {
                assert_eq!(view.pending_items, vec!["Task 1", "from elsewhere"]);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        controller.stop();
    }

    #[tokio::test]
    async fn test_own_writes_trigger_refresh() {
        let (_dir, mut controller) = create_test_controller();
        let (tx, mut rx) = event_channel();
        controller.start(tx).unwrap();

        controller.submit_new_task("Buy milk").unwrap();

        match next_event(&mut rx).await {
            ListEvent::Refreshed(view) => assert_eq!(view.pending_count, 2),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_change_reports_failure() {
        let (_dir, mut controller) = create_test_controller();
        let (tx, mut rx) = event_channel();
        controller.start(tx).unwrap();

        fs::write(controller.file_path(), "{ broken").unwrap();

        assert!(matches!(
            next_event(&mut rx).await,
            ListEvent::RefreshFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_no_events_after_stop() {
        let (_dir, mut controller) = create_test_controller();
        let (tx, mut rx) = event_channel();
        controller.start(tx).unwrap();

        controller.stop();
        assert_eq!(controller.state(), ControllerState::Disabled);

        controller.submit_new_task("quiet").unwrap();

        let got = tokio::time::timeout(Duration::from_millis(500), rx.changed()).await;
        assert!(!matches!(got, Ok(Ok(()))), "no event expected after stop");

        // Stopping again is a no-op.
        controller.stop();
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let (_dir, mut controller) = create_test_controller();
        let (tx, _rx) = event_channel();

        controller.start(tx.clone()).unwrap();
        controller.start(tx).unwrap();

        assert_eq!(controller.state(), ControllerState::Enabled);
    }

    #[test]
    fn test_start_failure_leaves_controller_disabled() {
        let (_dir, mut controller) = create_test_controller();
        let (tx, _rx) = event_channel();

        // No tokio runtime: the watch cannot be established.
        let err = controller.start(tx).unwrap_err();

        assert!(matches!(err, TodoError::Watch(_)));
        assert_eq!(controller.state(), ControllerState::Disabled);
        assert!(controller.refresh().is_ok());
    }

    #[test]
    fn test_from_config_selects_list() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config {
            file_path: temp_dir.path().join("todo.json"),
            list: crate::types::ListId(1),
            clipboard_enabled: false,
            watch: WatchOptions::default(),
        };

        let controller = ListController::from_config(&config);

        assert_eq!(controller.store().list_id(), crate::types::ListId(1));
        assert_eq!(controller.file_path(), config.file_path.as_path());
    }

    #[tokio::test]
    async fn test_slow_ui_sees_latest_view() {
        let (_dir, mut controller) = create_test_controller();
        let (tx, mut rx) = event_channel();
        controller.start(tx).unwrap();

        // Several changes land before the UI reads anything.
        let other = TaskStore::new(controller.file_path());
        for i in 0..5 {
            other.add_task(&format!("task {i}")).unwrap();
            tokio::time::sleep(Duration::from_millis(40)).await;
        }

        let expected = controller.refresh().unwrap();
        let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
        loop {
            if *rx.borrow_and_update() == ListEvent::Refreshed(expected.clone()) {
                break;
            }
            tokio::time::timeout_at(deadline, rx.changed())
                .await
                .expect("UI never caught up with the file")
                .unwrap();
        }
        assert_eq!(expected.pending_count, 6);

        controller.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_manual_refreshes_overlap_change_refresh() {
        let (_dir, mut controller) = create_test_controller();
        let (tx, mut rx) = event_channel();
        controller.start(tx).unwrap();
        let shared = Arc::clone(&controller.shared);

        let other = TaskStore::new(controller.file_path());
        other.add_task("racing").unwrap();

        let manual: Vec<_> = (0..2)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || shared.refresh())
            })
            .collect();
        for handle in manual {
            let view = handle.join().unwrap().unwrap();
            assert_eq!(view.pending_items, vec!["Task 1", "racing"]);
        }

        match next_event(&mut rx).await {
            ListEvent::Refreshed(view) => {
                assert_eq!(view.pending_items, vec!["Task 1", "racing"]);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let state = shared.refresh_gate.lock();
        assert!(!state.in_flight);
        assert_eq!(state.waiting, 0);
        drop(state);

        controller.stop();
    }

    #[test]
    fn test_refresh_gate_runs_once_when_idle() {
        let gate = RefreshGate::default();
        let loads = AtomicUsize::new(0);

        let view = gate
            .run(|| {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(view_named("only"))
            })
            .unwrap();

        assert_eq!(view.list_name, "only");
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_refresh_gate_shares_rerun_with_waiting_callers() {
        let gate = &RefreshGate::default();
        let loads = &AtomicUsize::new(0);
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        thread::scope(|s| {
            let first = s.spawn(move || {
                gate.run(|| {
                    let n = loads.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        started_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                    }
                    Ok(view_named(&format!("run {n}")))
                })
            });
            started_rx.recv().unwrap();

            // Two callers arrive while the first run is blocked.
            let joiners: Vec<_> = (0..2)
                .map(|_| s.spawn(move || gate.run(|| panic!("must join the running refresh"))))
                .collect();
            while gate.lock().waiting < 2 {
                thread::yield_now();
            }
            release_tx.send(()).unwrap();

            assert_eq!(first.join().unwrap().unwrap().list_name, "run 1");
            for joiner in joiners {
                assert_eq!(joiner.join().unwrap().unwrap().list_name, "run 1");
            }
        });

        assert_eq!(loads.load(Ordering::SeqCst), 2, "one shared rerun");
        assert!(!gate.lock().in_flight);
    }

    #[test]
    fn test_refresh_gate_failed_rerun_reports_own_error() {
        let gate = &RefreshGate::default();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let runs = &AtomicUsize::new(0);

        thread::scope(|s| {
            let first = s.spawn(move || {
                gate.run(|| {
                    if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                        started_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        return Ok(view_named("ok"));
                    }
                    Err(StorageError::Missing("gone.json".into()))
                })
            });
            started_rx.recv().unwrap();

            let joiner = s.spawn(move || {
                gate.run(|| Err(StorageError::Malformed {
                    path: "gone.json".into(),
                    reason: "own".to_string(),
                }))
            });
            while gate.lock().waiting < 1 {
                thread::yield_now();
            }
            release_tx.send(()).unwrap();

            assert!(matches!(first.join().unwrap(), Err(StorageError::Missing(_))));
            assert!(matches!(
                joiner.join().unwrap(),
                Err(StorageError::Malformed { ref reason, .. }) if reason == "own"
            ));
        });
    }
}
