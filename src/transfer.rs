use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::{Snapshot, Store};
use crate::types::{Folder, HistoryEntry, Note};

/// Current backup document version.
pub const EXPORT_VERSION: u32 = 1;

/// The portable backup document: every collection plus an envelope.
///
/// Notes are serialized under `files` and sibling positions under `order`,
/// so documents exported by earlier builds import unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub folders: Vec<Folder>,
    #[serde(rename = "files")]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    EXPORT_VERSION
}

pub fn export(store: &dyn Store) -> Result<ExportDocument> {
    let snapshot = store.snapshot()?;
    Ok(ExportDocument {
        folders: snapshot.folders,
        notes: snapshot.notes,
        history: snapshot.history,
        timestamp: Utc::now(),
        version: EXPORT_VERSION,
    })
}

pub fn export_string(store: &dyn Store) -> Result<String> {
    Ok(serde_json::to_string_pretty(&export(store)?)?)
}

/// Parses and validates a backup document, then replaces the entire store
/// with its contents in one transaction. Import is a full-state replace, not
/// a merge; nothing is deleted unless the document validates.
pub fn import_str(store: &dyn Store, raw: &str) -> Result<()> {
    let document: ExportDocument =
        serde_json::from_str(raw).map_err(|err| Error::InvalidDocument(err.to_string()))?;
    import(store, document)
}

pub fn import(store: &dyn Store, document: ExportDocument) -> Result<()> {
    validate(&document)?;
    store.replace_all(&Snapshot {
        folders: document.folders,
        notes: document.notes,
        history: document.history,
    })
}

fn validate(document: &ExportDocument) -> Result<()> {
    if document.version > EXPORT_VERSION {
        return Err(Error::InvalidDocument(format!(
            "unsupported document version {}",
            document.version
        )));
    }

    let folder_ids: HashSet<i64> = document.folders.iter().map(|f| f.id).collect();
    if folder_ids.len() != document.folders.len() {
        return Err(Error::InvalidDocument("duplicate folder id".to_string()));
    }
    let note_ids: HashSet<i64> = document.notes.iter().map(|n| n.id).collect();
    if note_ids.len() != document.notes.len() {
        return Err(Error::InvalidDocument("duplicate note id".to_string()));
    }

    for folder in &document.folders {
        if let Some(parent_id) = folder.parent_id {
            if !folder_ids.contains(&parent_id) {
                return Err(Error::InvalidDocument(format!(
                    "folder {} references missing parent {parent_id}",
                    folder.id
                )));
            }
        }
    }
    for note in &document.notes {
        if let Some(folder_id) = note.folder_id {
            if !folder_ids.contains(&folder_id) {
                return Err(Error::InvalidDocument(format!(
                    "file {} references missing folder {folder_id}",
                    note.id
                )));
            }
        }
    }
    for entry in &document.history {
        if !note_ids.contains(&entry.note_id) {
            return Err(Error::InvalidDocument(format!(
                "history entry {} references missing file {}",
                entry.id, entry.note_id
            )));
        }
    }

    Ok(())
}
