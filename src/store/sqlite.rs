use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::broadcast;

use super::events::{ChangeEvent, ChangeFeed};
use super::schema::{SCHEMA, SCHEMA_VERSION};
use super::{Placement, Snapshot, Store};
use crate::error::{Error, Result};
use crate::types::*;

const RETENTION_KEY: &str = "historyRetention";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    changes: ChangeFeed,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
            changes: ChangeFeed::new(),
        })
    }

    /// In-memory store for tests and throwaway sessions.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Self {
            conn: Mutex::new(conn),
            changes: ChangeFeed::new(),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Version 1 databases predate sibling ordering; give every row a position
/// matching its insertion order, as the original rollout did.
fn migrate(conn: &mut Connection, from: i32) -> Result<()> {
    tracing::info!("migrating database schema from version {from} to {SCHEMA_VERSION}");

    if from < 2 {
        let tx = conn.transaction()?;
        tx.execute_batch(
            "ALTER TABLE folders ADD COLUMN position INTEGER NOT NULL DEFAULT 0;
             ALTER TABLE notes ADD COLUMN position INTEGER NOT NULL DEFAULT 0;",
        )?;
        tx.execute(
            "UPDATE folders SET position = (SELECT COUNT(*) FROM folders f WHERE f.id < folders.id)",
            [],
        )?;
        tx.execute(
            "UPDATE notes SET position = (SELECT COUNT(*) FROM notes n WHERE n.id < notes.id)",
            [],
        )?;
        tx.commit()?;
    }

    Ok(())
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        let mut conn = self.conn();

        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > 0 && version < SCHEMA_VERSION {
            migrate(&mut conn, version)?;
        }

        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    // Folder operations

    fn create_folder(&self, parent_id: Option<i64>, name: &str) -> Result<Folder> {
        let conn = self.conn();
        let now = Utc::now();

        let position: i64 = conn.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM folders WHERE parent_id IS ?1",
            params![parent_id],
            |row| row.get(0),
        )?;

        conn.execute(
            "INSERT INTO folders (parent_id, name, position, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![parent_id, name, position, format_datetime(&now)],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);

        self.changes.publish(ChangeEvent::Folders);
        Ok(Folder {
            id,
            parent_id,
            name: name.to_string(),
            position,
            created_at: now,
            updated_at: now,
        })
    }

    fn get_folder(&self, id: i64) -> Result<Option<Folder>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, parent_id, name, position, created_at, updated_at
             FROM folders WHERE id = ?1",
            params![id],
            |row| {
                Ok(Folder {
                    id: row.get(0)?,
                    parent_id: row.get(1)?,
                    name: row.get(2)?,
                    position: row.get(3)?,
                    created_at: parse_datetime(&row.get::<_, String>(4)?),
                    updated_at: parse_datetime(&row.get::<_, String>(5)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_folders(&self) -> Result<Vec<Folder>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, parent_id, name, position, created_at, updated_at
             FROM folders ORDER BY position, id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Folder {
                id: row.get(0)?,
                parent_id: row.get(1)?,
                name: row.get(2)?,
                position: row.get(3)?,
                created_at: parse_datetime(&row.get::<_, String>(4)?),
                updated_at: parse_datetime(&row.get::<_, String>(5)?),
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn rename_folder(&self, id: i64, name: &str) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE folders SET name = ?1, updated_at = ?2 WHERE id = ?3",
            params![name, format_datetime(&Utc::now()), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        self.changes.publish(ChangeEvent::Folders);
        Ok(())
    }

    fn delete_folder(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM folders WHERE id = ?1", params![id])?;

        if rows > 0 {
            // The cascade may have taken notes and their history with it
            self.changes.publish(ChangeEvent::Folders);
            self.changes.publish(ChangeEvent::Notes);
            self.changes.publish(ChangeEvent::History);
        }
        Ok(rows > 0)
    }

    fn folder_ancestors(&self, id: i64) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut ancestors = Vec::new();
        let mut current = id;

        loop {
            let parent: Option<Option<i64>> = conn
                .query_row(
                    "SELECT parent_id FROM folders WHERE id = ?1",
                    params![current],
                    |row| row.get(0),
                )
                .optional()?;

            match parent {
                Some(Some(parent_id)) if !ancestors.contains(&parent_id) => {
                    ancestors.push(parent_id);
                    current = parent_id;
                }
                _ => break,
            }
        }

        Ok(ancestors)
    }

    // Note operations

    fn create_note(&self, folder_id: Option<i64>, title: &str) -> Result<Note> {
        let conn = self.conn();
        let now = Utc::now();

        let position: i64 = conn.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM notes WHERE folder_id IS ?1",
            params![folder_id],
            |row| row.get(0),
        )?;

        conn.execute(
            "INSERT INTO notes (folder_id, title, content, position, created_at, updated_at)
             VALUES (?1, ?2, '', ?3, ?4, ?4)",
            params![folder_id, title, position, format_datetime(&now)],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);

        self.changes.publish(ChangeEvent::Notes);
        Ok(Note {
            id,
            folder_id,
            title: title.to_string(),
            content: String::new(),
            position,
            created_at: now,
            updated_at: now,
        })
    }

    fn get_note(&self, id: i64) -> Result<Option<Note>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, folder_id, title, content, position, created_at, updated_at
             FROM notes WHERE id = ?1",
            params![id],
            |row| {
                Ok(Note {
                    id: row.get(0)?,
                    folder_id: row.get(1)?,
                    title: row.get(2)?,
                    content: row.get(3)?,
                    position: row.get(4)?,
                    created_at: parse_datetime(&row.get::<_, String>(5)?),
                    updated_at: parse_datetime(&row.get::<_, String>(6)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_notes(&self) -> Result<Vec<Note>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, folder_id, title, content, position, created_at, updated_at
             FROM notes ORDER BY position, id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Note {
                id: row.get(0)?,
                folder_id: row.get(1)?,
                title: row.get(2)?,
                content: row.get(3)?,
                position: row.get(4)?,
                created_at: parse_datetime(&row.get::<_, String>(5)?),
                updated_at: parse_datetime(&row.get::<_, String>(6)?),
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn rename_note(&self, id: i64, title: &str) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE notes SET title = ?1, updated_at = ?2 WHERE id = ?3",
            params![title, format_datetime(&Utc::now()), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        self.changes.publish(ChangeEvent::Notes);
        Ok(())
    }

    fn delete_note(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM notes WHERE id = ?1", params![id])?;

        if rows > 0 {
            self.changes.publish(ChangeEvent::Notes);
            self.changes.publish(ChangeEvent::History);
        }
        Ok(rows > 0)
    }

    // Content commits and history

    fn commit_content(&self, note_id: i64, content: &str) -> Result<HistoryEntry> {
        let mut conn = self.conn();
        let now = Utc::now();
        let tx = conn.transaction()?;

        let rows = tx.execute(
            "UPDATE notes SET content = ?1, updated_at = ?2 WHERE id = ?3",
            params![content, format_datetime(&now), note_id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound);
        }

        tx.execute(
            "INSERT INTO history (note_id, content, timestamp) VALUES (?1, ?2, ?3)",
            params![note_id, content, format_datetime(&now)],
        )?;
        let id = tx.last_insert_rowid();

        tx.commit()?;
        drop(conn);

        self.changes.publish(ChangeEvent::Notes);
        self.changes.publish(ChangeEvent::History);
        Ok(HistoryEntry {
            id,
            note_id,
            content: content.to_string(),
            timestamp: now,
        })
    }

    fn list_history(&self, note_id: i64) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, note_id, content, timestamp
             FROM history WHERE note_id = ?1 ORDER BY timestamp DESC, id DESC",
        )?;

        let rows = stmt.query_map(params![note_id], |row| {
            Ok(HistoryEntry {
                id: row.get(0)?,
                note_id: row.get(1)?,
                content: row.get(2)?,
                timestamp: parse_datetime(&row.get::<_, String>(3)?),
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_history_entry(&self, id: i64) -> Result<Option<HistoryEntry>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, note_id, content, timestamp FROM history WHERE id = ?1",
            params![id],
            |row| {
                Ok(HistoryEntry {
                    id: row.get(0)?,
                    note_id: row.get(1)?,
                    content: row.get(2)?,
                    timestamp: parse_datetime(&row.get::<_, String>(3)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn prune_history(&self, note_id: i64, policy: RetentionPolicy, keep_id: i64) -> Result<usize> {
        let deleted = match policy {
            RetentionPolicy::Unlimited => 0,
            RetentionPolicy::Count { value } => self.conn().execute(
                "DELETE FROM history WHERE note_id = ?1 AND id != ?2 AND id NOT IN (
                     SELECT id FROM history WHERE note_id = ?1
                     ORDER BY timestamp DESC, id DESC LIMIT ?3
                 )",
                params![note_id, keep_id, value],
            )?,
            RetentionPolicy::Days { value } => {
                let cutoff = Utc::now() - Duration::days(i64::from(value));
                self.conn().execute(
                    "DELETE FROM history WHERE note_id = ?1 AND id != ?2 AND timestamp < ?3",
                    params![note_id, keep_id, format_datetime(&cutoff)],
                )?
            }
        };

        if deleted > 0 {
            self.changes.publish(ChangeEvent::History);
        }
        Ok(deleted)
    }

    // Ordering

    fn apply_placements(&self, placements: &[Placement]) -> Result<()> {
        if placements.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn();
        let now = format_datetime(&Utc::now());
        let tx = conn.transaction()?;

        let mut folders_changed = false;
        let mut notes_changed = false;
        for placement in placements {
            let sql = match placement.item.kind {
                ItemKind::Folder => {
                    folders_changed = true;
                    "UPDATE folders SET parent_id = ?1, position = ?2, updated_at = ?3 WHERE id = ?4"
                }
                ItemKind::Note => {
                    notes_changed = true;
                    "UPDATE notes SET folder_id = ?1, position = ?2, updated_at = ?3 WHERE id = ?4"
                }
            };
            let rows = tx.execute(
                sql,
                params![placement.container, placement.position, now, placement.item.id],
            )?;
            if rows == 0 {
                return Err(Error::NotFound);
            }
        }

        tx.commit()?;
        drop(conn);

        if folders_changed {
            self.changes.publish(ChangeEvent::Folders);
        }
        if notes_changed {
            self.changes.publish(ChangeEvent::Notes);
        }
        Ok(())
    }

    // Settings

    fn retention_policy(&self) -> Result<RetentionPolicy> {
        let value: Option<String> = self
            .conn()
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![RETENTION_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(RetentionPolicy::default()),
        }
    }

    fn set_retention_policy(&self, policy: RetentionPolicy) -> Result<()> {
        policy.validate()?;
        let raw = serde_json::to_string(&policy)?;

        self.conn().execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![RETENTION_KEY, raw],
        )?;

        self.changes.publish(ChangeEvent::Settings);
        Ok(())
    }

    // Whole-store snapshot

    fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            folders: self.list_folders()?,
            notes: self.list_notes()?,
            history: {
                let conn = self.conn();
                let mut stmt = conn.prepare(
                    "SELECT id, note_id, content, timestamp FROM history ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(HistoryEntry {
                        id: row.get(0)?,
                        note_id: row.get(1)?,
                        content: row.get(2)?,
                        timestamp: parse_datetime(&row.get::<_, String>(3)?),
                    })
                })?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            },
        })
    }

    fn replace_all(&self, snapshot: &Snapshot) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        // Imported rows keep their ids, so parents may arrive after children;
        // check foreign keys at commit instead of per statement.
        tx.execute_batch("PRAGMA defer_foreign_keys = ON")?;

        tx.execute("DELETE FROM history", [])?;
        tx.execute("DELETE FROM notes", [])?;
        tx.execute("DELETE FROM folders", [])?;

        for folder in &snapshot.folders {
            tx.execute(
                "INSERT INTO folders (id, parent_id, name, position, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    folder.id,
                    folder.parent_id,
                    folder.name,
                    folder.position,
                    format_datetime(&folder.created_at),
                    format_datetime(&folder.updated_at),
                ],
            )?;
        }

        for note in &snapshot.notes {
            tx.execute(
                "INSERT INTO notes (id, folder_id, title, content, position, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    note.id,
                    note.folder_id,
                    note.title,
                    note.content,
                    note.position,
                    format_datetime(&note.created_at),
                    format_datetime(&note.updated_at),
                ],
            )?;
        }

        for entry in &snapshot.history {
            tx.execute(
                "INSERT INTO history (id, note_id, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.id,
                    entry.note_id,
                    entry.content,
                    format_datetime(&entry.timestamp),
                ],
            )?;
        }

        tx.commit()?;
        drop(conn);

        self.changes.publish(ChangeEvent::Folders);
        self.changes.publish(ChangeEvent::Notes);
        self.changes.publish(ChangeEvent::History);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
