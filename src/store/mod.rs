mod events;
mod schema;
mod sqlite;

pub use events::ChangeEvent;
pub use sqlite::SqliteStore;

use tokio::sync::broadcast;

use crate::error::Result;
use crate::types::*;

/// One computed placement for a folder or note: the container it should live
/// in and its position among same-kind siblings there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub item: ItemRef,
    pub container: Option<i64>,
    pub position: i64,
}

/// Full copy of the persisted collections, used by export and import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub folders: Vec<Folder>,
    pub notes: Vec<Note>,
    pub history: Vec<HistoryEntry>,
}

/// Store defines the database interface.
pub trait Store: Send + Sync {
    /// Creates the schema and runs pending migrations.
    fn initialize(&self) -> Result<()>;

    // Folder operations
    fn create_folder(&self, parent_id: Option<i64>, name: &str) -> Result<Folder>;
    fn get_folder(&self, id: i64) -> Result<Option<Folder>>;
    fn list_folders(&self) -> Result<Vec<Folder>>;
    fn rename_folder(&self, id: i64, name: &str) -> Result<()>;
    /// Deletes a folder and, via cascade, its descendant folders, their
    /// notes, and those notes' history.
    fn delete_folder(&self, id: i64) -> Result<bool>;
    /// Ancestor chain of a folder, nearest parent first (parent-link walk).
    fn folder_ancestors(&self, id: i64) -> Result<Vec<i64>>;

    // Note operations
    fn create_note(&self, folder_id: Option<i64>, title: &str) -> Result<Note>;
    fn get_note(&self, id: i64) -> Result<Option<Note>>;
    fn list_notes(&self) -> Result<Vec<Note>>;
    /// Persists a title edit. Titles never create history entries.
    fn rename_note(&self, id: i64, title: &str) -> Result<()>;
    fn delete_note(&self, id: i64) -> Result<bool>;

    // Content commits and history
    /// Updates a note's content and appends a history snapshot, both in one
    /// transaction. Returns the new entry.
    fn commit_content(&self, note_id: i64, content: &str) -> Result<HistoryEntry>;
    /// History for a note, newest first.
    fn list_history(&self, note_id: i64) -> Result<Vec<HistoryEntry>>;
    fn get_history_entry(&self, id: i64) -> Result<Option<HistoryEntry>>;
    /// Enforces the retention policy for one note. `keep_id` (the entry just
    /// written) is never deleted. Returns the number of pruned rows.
    fn prune_history(&self, note_id: i64, policy: RetentionPolicy, keep_id: i64) -> Result<usize>;

    // Ordering
    /// Applies a move/reorder write set atomically, stamping `updated_at` on
    /// every touched row.
    fn apply_placements(&self, placements: &[Placement]) -> Result<()>;

    // Settings
    fn retention_policy(&self) -> Result<RetentionPolicy>;
    fn set_retention_policy(&self, policy: RetentionPolicy) -> Result<()>;

    // Whole-store snapshot (export/import)
    fn snapshot(&self) -> Result<Snapshot>;
    /// Clears all three collections and bulk-inserts the snapshot, keeping
    /// its ids, in one transaction.
    fn replace_all(&self, snapshot: &Snapshot) -> Result<()>;

    /// Change feed: one event per committed mutation, keyed by collection.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}
