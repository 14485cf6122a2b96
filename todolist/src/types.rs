//! Data model for the task list file and the view handed to the UI.
//!
//! The persisted layout is a JSON array of lists:
//!
//! ```text
//! [{"list": "My List", "todo": ["Task 1"], "done": []}]
//! ```
//!
//! The field names `list` and `todo` are kept on the wire for compatibility
//! with existing files, while the Rust side uses `name` and `pending`.

use serde::{Deserialize, Serialize};

/// Name of the list created when no file exists yet.
pub const SEED_LIST_NAME: &str = "My List";

/// Pending task placed in a freshly created list.
pub const SEED_TASK: &str = "Task 1";

/// Selects one [`TaskList`] inside a [`Document`].
///
/// Files may hold several lists, but the tool works on exactly one of them at
/// a time. The selection is an index into the outer array; [`ListId::DEFAULT`]
/// picks the first list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListId(pub usize);

impl ListId {
    /// The first list in the document.
    pub const DEFAULT: ListId = ListId(0);

    /// Returns the position of the list in the document array.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl Default for ListId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::fmt::Display for ListId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A named group of pending and done tasks.
///
/// Tasks have no identifier; two tasks with the same text are the same task
/// as far as removal is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskList {
    /// Display name of the list.
    #[serde(rename = "list")]
    pub name: String,

    /// Tasks not yet completed, in insertion order.
    #[serde(rename = "todo")]
    pub pending: Vec<String>,

    /// Completed tasks, in completion order.
    pub done: Vec<String>,
}

impl TaskList {
    /// Creates an empty list with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pending: Vec::new(),
            done: Vec::new(),
        }
    }

    /// The list written to disk when no file exists.
    #[must_use]
    pub fn seed() -> Self {
        Self {
            name: SEED_LIST_NAME.to_string(),
            pending: vec![SEED_TASK.to_string()],
            done: Vec::new(),
        }
    }
}

/// The full contents of the task file: an ordered sequence of lists.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    lists: Vec<TaskList>,
}

impl Document {
    /// Wraps the given lists.
    #[must_use]
    pub fn new(lists: Vec<TaskList>) -> Self {
        Self { lists }
    }

    /// The document written by `ensure_exists`: a single seed list.
    #[must_use]
    pub fn seed() -> Self {
        Self::new(vec![TaskList::seed()])
    }

    /// Returns the selected list, if the document has one at that position.
    #[must_use]
    pub fn list(&self, id: ListId) -> Option<&TaskList> {
        self.lists.get(id.index())
    }

    /// Mutable access to the selected list.
    pub fn list_mut(&mut self, id: ListId) -> Option<&mut TaskList> {
        self.lists.get_mut(id.index())
    }

    /// All lists in file order.
    #[must_use]
    pub fn lists(&self) -> &[TaskList] {
        &self.lists
    }

    /// Number of lists in the document.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    /// Returns `true` if the document holds no lists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

/// Snapshot of the selected list prepared for display.
///
/// Blank entries (empty or whitespace-only) are already filtered out.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewModel {
    /// Name of the list being shown.
    pub list_name: String,

    /// Number of visible pending tasks.
    pub pending_count: usize,

    /// Visible pending tasks.
    pub pending_items: Vec<String>,

    /// Visible done tasks.
    pub done_items: Vec<String>,
}

impl ViewModel {
    /// Builds the view of a list, dropping blank entries.
    #[must_use]
    pub fn from_list(list: &TaskList) -> Self {
        let pending_items = visible(&list.pending);
        let done_items = visible(&list.done);

        Self {
            list_name: list.name.clone(),
            pending_count: pending_items.len(),
            pending_items,
            done_items,
        }
    }
}

/// Returns `true` for text that should never be stored or shown as a task.
#[must_use]
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

fn visible(tasks: &[String]) -> Vec<String> {
    tasks.iter().filter(|t| !is_blank(t)).cloned().collect()
}
