use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A folder in the note tree. `parent_id = None` means root level.
///
/// `position` orders a folder among the folders sharing its container; it is
/// serialized as `order` so backup documents keep the original field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    #[serde(rename = "order", default)]
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A note with its full text content. `folder_id = None` means root level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: i64,
    pub folder_id: Option<i64>,
    pub title: String,
    pub content: String,
    #[serde(rename = "order", default)]
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An append-only content snapshot, written on every committed save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    #[serde(rename = "fileId")]
    pub note_id: i64,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Which collection an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Folder,
    Note,
}

/// A folder or note by id, as handed over by a drag gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRef {
    pub kind: ItemKind,
    pub id: i64,
}

impl ItemRef {
    #[must_use]
    pub fn folder(id: i64) -> Self {
        Self {
            kind: ItemKind::Folder,
            id,
        }
    }

    #[must_use]
    pub fn note(id: i64) -> Self {
        Self {
            kind: ItemKind::Note,
            id,
        }
    }
}
