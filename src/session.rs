use std::collections::HashSet;

use crate::tree::TreeSnapshot;

/// Process-wide UI state: the active note, which folders are expanded, and
/// sidebar visibility. The presentation layer owns exactly one of these and
/// goes through the transition methods; none of it is persisted.
#[derive(Debug, Clone)]
pub struct SessionState {
    active_note: Option<i64>,
    expanded: HashSet<i64>,
    sidebar_open: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            active_note: None,
            expanded: HashSet::new(),
            sidebar_open: true,
        }
    }
}

impl SessionState {
    #[must_use]
    pub fn active_note(&self) -> Option<i64> {
        self.active_note
    }

    /// Switches the active note, returning the previously active one so the
    /// caller can flush its pending edits first.
    pub fn activate(&mut self, note: Option<i64>) -> Option<i64> {
        std::mem::replace(&mut self.active_note, note)
    }

    /// Toggles a folder open or closed; returns the new expanded state.
    pub fn toggle_folder(&mut self, id: i64) -> bool {
        if self.expanded.remove(&id) {
            false
        } else {
            self.expanded.insert(id);
            true
        }
    }

    #[must_use]
    pub fn is_expanded(&self, id: i64) -> bool {
        self.expanded.contains(&id)
    }

    #[must_use]
    pub fn expanded(&self) -> &HashSet<i64> {
        &self.expanded
    }

    pub fn set_sidebar_open(&mut self, open: bool) {
        self.sidebar_open = open;
    }

    #[must_use]
    pub fn sidebar_open(&self) -> bool {
        self.sidebar_open
    }

    /// Clears the selection if the deleted note was active.
    pub fn note_deleted(&mut self, id: i64) {
        if self.active_note == Some(id) {
            self.active_note = None;
        }
    }

    /// Drops references to rows that no longer exist, after deletes and
    /// imports.
    pub fn prune(&mut self, snapshot: &TreeSnapshot) {
        self.expanded.retain(|id| snapshot.folder(*id).is_some());
        if let Some(id) = self.active_note {
            if snapshot.note(id).is_none() {
                self.active_note = None;
            }
        }
    }
}
