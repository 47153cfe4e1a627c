use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::warn;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{HistoryEntry, Note};

/// Debounce windows for the two edit channels. Content saves also append a
/// history snapshot; title saves do not.
#[derive(Debug, Clone, Copy)]
pub struct AutosaveConfig {
    pub content_delay: Duration,
    pub title_delay: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            content_delay: Duration::from_secs(5),
            title_delay: Duration::from_secs(1),
        }
    }
}

/// A pending write produced by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit {
    Content { note_id: i64, text: String },
    Title { note_id: i64, text: String },
}

/// Per-open-note autosave state machine.
///
/// Each channel is either clean (in-memory value equals the last persisted
/// value) or dirty with an armed deadline. Every edit re-arms its channel's
/// deadline; the deadline firing, or a flush, turns the dirty value into a
/// [`Commit`]. The machine never touches the store itself; callers persist
/// the commits and report back via [`EditorSession::mark_saved`].
#[derive(Debug)]
pub struct EditorSession {
    note_id: i64,
    config: AutosaveConfig,
    last_saved_content: String,
    last_saved_title: String,
    pending_content: Option<(String, Instant)>,
    pending_title: Option<(String, Instant)>,
}

impl EditorSession {
    pub fn open(note: &Note, config: AutosaveConfig) -> Self {
        Self {
            note_id: note.id,
            config,
            last_saved_content: note.content.clone(),
            last_saved_title: note.title.clone(),
            pending_content: None,
            pending_title: None,
        }
    }

    #[must_use]
    pub fn note_id(&self) -> i64 {
        self.note_id
    }

    /// Records a content keystroke and re-arms the content debounce timer.
    pub fn edit_content(&mut self, text: impl Into<String>, now: Instant) {
        self.pending_content = Some((text.into(), now + self.config.content_delay));
    }

    /// Records a title edit and re-arms the title debounce timer.
    pub fn edit_title(&mut self, text: impl Into<String>, now: Instant) {
        self.pending_title = Some((text.into(), now + self.config.title_delay));
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.pending_content.is_some() || self.pending_title.is_some()
    }

    /// The in-memory content value: the pending edit if there is one,
    /// otherwise the last persisted value.
    #[must_use]
    pub fn current_content(&self) -> &str {
        self.pending_content
            .as_ref()
            .map_or(&self.last_saved_content, |(text, _)| text)
    }

    #[must_use]
    pub fn current_title(&self) -> &str {
        self.pending_title
            .as_ref()
            .map_or(&self.last_saved_title, |(text, _)| text)
    }

    /// Earliest armed deadline, for the driver's sleep.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let content = self.pending_content.as_ref().map(|(_, d)| *d);
        let title = self.pending_title.as_ref().map(|(_, d)| *d);
        match (content, title) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Takes the commits whose debounce window has elapsed. An edit that
    /// restored the last persisted value is dropped without a commit.
    pub fn take_due(&mut self, now: Instant) -> Vec<Commit> {
        let mut commits = Vec::new();

        let content_due = self
            .pending_content
            .as_ref()
            .is_some_and(|(_, deadline)| *deadline <= now);
        if content_due {
            if let Some((text, _)) = self.pending_content.take() {
                if text != self.last_saved_content {
                    commits.push(Commit::Content {
                        note_id: self.note_id,
                        text,
                    });
                }
            }
        }

        let title_due = self
            .pending_title
            .as_ref()
            .is_some_and(|(_, deadline)| *deadline <= now);
        if title_due {
            if let Some((text, _)) = self.pending_title.take() {
                if text != self.last_saved_title {
                    commits.push(Commit::Title {
                        note_id: self.note_id,
                        text,
                    });
                }
            }
        }

        commits
    }

    /// Takes every pending commit regardless of deadlines (the switch-away
    /// and teardown path).
    pub fn take_all(&mut self) -> Vec<Commit> {
        let mut commits = Vec::new();

        if let Some((text, _)) = self.pending_content.take() {
            if text != self.last_saved_content {
                commits.push(Commit::Content {
                    note_id: self.note_id,
                    text,
                });
            }
        }
        if let Some((text, _)) = self.pending_title.take() {
            if text != self.last_saved_title {
                commits.push(Commit::Title {
                    note_id: self.note_id,
                    text,
                });
            }
        }

        commits
    }

    /// Records that a commit reached the store.
    pub fn mark_saved(&mut self, commit: &Commit) {
        match commit {
            Commit::Content { text, .. } => self.last_saved_content = text.clone(),
            Commit::Title { text, .. } => self.last_saved_title = text.clone(),
        }
    }

    /// Puts a failed commit back as a pending edit so the channel stays
    /// dirty and the next tick retries it.
    pub fn rearm(&mut self, commit: Commit, now: Instant) {
        match commit {
            Commit::Content { text, .. } => {
                if self.pending_content.is_none() {
                    self.pending_content = Some((text, now + self.config.content_delay));
                }
            }
            Commit::Title { text, .. } => {
                if self.pending_title.is_none() {
                    self.pending_title = Some((text, now + self.config.title_delay));
                }
            }
        }
    }

    /// Adopts an externally persisted row (import, restore). Channels with
    /// unsaved local edits keep them.
    pub fn resync(&mut self, note: &Note) {
        if self.pending_content.is_none() {
            self.last_saved_content = note.content.clone();
        }
        if self.pending_title.is_none() {
            self.last_saved_title = note.title.clone();
        }
    }
}

/// Commits new content through the regular save path: update + history
/// snapshot in one transaction, then retention pruning. The pruning pass
/// never removes the entry it just wrote.
pub fn save_content(store: &dyn Store, note_id: i64, text: &str) -> Result<HistoryEntry> {
    let entry = store.commit_content(note_id, text)?;
    let policy = store.retention_policy()?;
    store.prune_history(note_id, policy, entry.id)?;
    Ok(entry)
}

/// Persists one commit.
pub fn apply_commit(store: &dyn Store, commit: &Commit) -> Result<()> {
    match commit {
        Commit::Content { note_id, text } => {
            save_content(store, *note_id, text)?;
            Ok(())
        }
        Commit::Title { note_id, text } => store.rename_note(*note_id, text),
    }
}

/// Replaces a note's content with a historical snapshot by committing the
/// old value through the regular save path, so the restore itself becomes a
/// new history entry.
pub fn restore_version(store: &dyn Store, entry_id: i64) -> Result<HistoryEntry> {
    let entry = store.get_history_entry(entry_id)?.ok_or(Error::NotFound)?;
    save_content(store, entry.note_id, &entry.content)
}

/// Persists everything due at `now`. A failed write is re-armed before the
/// error propagates, so no edit is lost.
pub fn save_due(session: &mut EditorSession, store: &dyn Store, now: Instant) -> Result<usize> {
    let commits = session.take_due(now);
    persist(session, store, commits, now)
}

/// Persists everything pending, immediately.
pub fn flush(session: &mut EditorSession, store: &dyn Store, now: Instant) -> Result<usize> {
    let commits = session.take_all();
    persist(session, store, commits, now)
}

fn persist(
    session: &mut EditorSession,
    store: &dyn Store,
    commits: Vec<Commit>,
    now: Instant,
) -> Result<usize> {
    let mut saved = 0;
    for commit in commits {
        match apply_commit(store, &commit) {
            Ok(()) => {
                session.mark_saved(&commit);
                saved += 1;
            }
            Err(err) => {
                session.rearm(commit, now);
                return Err(err);
            }
        }
    }
    Ok(saved)
}

/// Commands accepted by the autosave service.
#[derive(Debug)]
pub enum EditorCommand {
    /// Start editing a note. Any pending edits of the previous note are
    /// flushed first.
    Open(Note),
    EditContent(String),
    EditTitle(String),
    /// The persisted row changed through another path (import, restore).
    Refresh(Note),
    Flush,
    /// Flush and stop the service task.
    Close,
}

#[derive(Debug, Clone)]
pub struct AutosaveHandle {
    tx: mpsc::UnboundedSender<EditorCommand>,
}

impl AutosaveHandle {
    pub fn send(&self, command: EditorCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn open(&self, note: Note) -> bool {
        self.send(EditorCommand::Open(note))
    }

    pub fn edit_content(&self, text: impl Into<String>) -> bool {
        self.send(EditorCommand::EditContent(text.into()))
    }

    pub fn edit_title(&self, text: impl Into<String>) -> bool {
        self.send(EditorCommand::EditTitle(text.into()))
    }

    pub fn refresh(&self, note: Note) -> bool {
        self.send(EditorCommand::Refresh(note))
    }

    pub fn flush(&self) -> bool {
        self.send(EditorCommand::Flush)
    }

    pub fn close(&self) -> bool {
        self.send(EditorCommand::Close)
    }
}

/// Spawns the autosave driver: a single task owning the editor session,
/// sleeping until the earliest debounce deadline and committing what comes
/// due. Await the returned handle after [`AutosaveHandle::close`] to be sure
/// the final flush has landed.
pub fn spawn_autosaver(
    store: Arc<dyn Store>,
    config: AutosaveConfig,
) -> (AutosaveHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(store, config, rx));
    (AutosaveHandle { tx }, task)
}

async fn run(
    store: Arc<dyn Store>,
    config: AutosaveConfig,
    mut rx: mpsc::UnboundedReceiver<EditorCommand>,
) {
    let mut session: Option<EditorSession> = None;

    loop {
        let command = match session.as_ref().and_then(EditorSession::next_deadline) {
            Some(deadline) => tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => Some(command),
                    None => break,
                },
                () = time::sleep_until(deadline) => None,
            },
            None => match rx.recv().await {
                Some(command) => Some(command),
                None => break,
            },
        };

        let now = Instant::now();
        match command {
            None => {
                if let Some(session) = session.as_mut() {
                    if let Err(err) = save_due(session, store.as_ref(), now) {
                        warn!("autosave failed: {err}");
                    }
                }
            }
            Some(EditorCommand::Open(note)) => {
                if let Some(mut previous) = session.take() {
                    if let Err(err) = flush(&mut previous, store.as_ref(), now) {
                        warn!("flush on switch failed: {err}");
                    }
                }
                session = Some(EditorSession::open(&note, config));
            }
            Some(EditorCommand::EditContent(text)) => {
                if let Some(session) = session.as_mut() {
                    session.edit_content(text, now);
                }
            }
            Some(EditorCommand::EditTitle(text)) => {
                if let Some(session) = session.as_mut() {
                    session.edit_title(text, now);
                }
            }
            Some(EditorCommand::Refresh(note)) => {
                if let Some(session) = session.as_mut() {
                    if session.note_id() == note.id {
                        session.resync(&note);
                    }
                }
            }
            Some(EditorCommand::Flush) => {
                if let Some(session) = session.as_mut() {
                    if let Err(err) = flush(session, store.as_ref(), now) {
                        warn!("flush failed: {err}");
                    }
                }
            }
            Some(EditorCommand::Close) => break,
        }
    }

    // Teardown: whatever is still pending goes out synchronously
    if let Some(mut session) = session {
        if let Err(err) = flush(&mut session, store.as_ref(), Instant::now()) {
            warn!("flush on teardown failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::types::RetentionPolicy;

    fn open_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.initialize().unwrap();
        store
    }

    fn short_config() -> AutosaveConfig {
        AutosaveConfig {
            content_delay: Duration::from_secs(5),
            title_delay: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_debounce_rearms_and_commits_final_value() {
        let store = open_store();
        let note = store.create_note(None, "doc").unwrap();
        let mut session = EditorSession::open(&note, short_config());

        let t0 = Instant::now();
        session.edit_content("v1", t0);
        // Second keystroke inside the window replaces the pending value
        session.edit_content("v1 and v2", t0 + Duration::from_secs(3));

        // Original deadline has passed, but the re-armed one has not
        assert!(session.take_due(t0 + Duration::from_secs(6)).is_empty());

        let commits = session.take_due(t0 + Duration::from_secs(8));
        assert_eq!(
            commits,
            vec![Commit::Content {
                note_id: note.id,
                text: "v1 and v2".to_string(),
            }]
        );
        assert!(!session.is_dirty());
    }

    #[test]
    fn test_edit_back_to_saved_value_commits_nothing() {
        let store = open_store();
        let note = store.create_note(None, "doc").unwrap();
        store.commit_content(note.id, "stable").unwrap();
        let note = store.get_note(note.id).unwrap().unwrap();

        let mut session = EditorSession::open(&note, short_config());
        let t0 = Instant::now();
        session.edit_content("changed", t0);
        session.edit_content("stable", t0 + Duration::from_secs(1));

        assert!(session.take_due(t0 + Duration::from_secs(10)).is_empty());
        assert!(!session.is_dirty());
    }

    #[test]
    fn test_title_and_content_are_independent() {
        let store = open_store();
        let note = store.create_note(None, "doc").unwrap();
        let mut session = EditorSession::open(&note, short_config());

        let t0 = Instant::now();
        session.edit_content("body", t0);
        session.edit_title("renamed", t0);

        // Title window (1s) elapses first
        let commits = session.take_due(t0 + Duration::from_secs(2));
        assert_eq!(
            commits,
            vec![Commit::Title {
                note_id: note.id,
                text: "renamed".to_string(),
            }]
        );
        assert!(session.is_dirty());

        let commits = session.take_due(t0 + Duration::from_secs(6));
        assert_eq!(commits.len(), 1);
        assert!(matches!(commits[0], Commit::Content { .. }));
    }

    #[test]
    fn test_flush_ignores_deadlines() {
        let store = open_store();
        let note = store.create_note(None, "doc").unwrap();
        let mut session = EditorSession::open(&note, short_config());

        session.edit_content("pending", Instant::now());
        let saved = flush(&mut session, &store, Instant::now()).unwrap();
        assert_eq!(saved, 1);

        assert_eq!(store.get_note(note.id).unwrap().unwrap().content, "pending");
        assert_eq!(store.list_history(note.id).unwrap().len(), 1);
        assert!(!session.is_dirty());
    }

    #[test]
    fn test_resync_skips_dirty_channels() {
        let store = open_store();
        let note = store.create_note(None, "doc").unwrap();
        let mut session = EditorSession::open(&note, short_config());

        session.edit_content("local draft", Instant::now());

        let mut external = note.clone();
        external.content = "imported".to_string();
        external.title = "imported title".to_string();
        session.resync(&external);

        // Dirty content keeps the local edit; clean title follows the store
        assert_eq!(session.current_content(), "local draft");
        assert_eq!(session.current_title(), "imported title");

        let commits = session.take_all();
        assert_eq!(
            commits,
            vec![Commit::Content {
                note_id: note.id,
                text: "local draft".to_string(),
            }]
        );
    }

    #[test]
    fn test_failed_save_stays_dirty() {
        let store = open_store();
        let note = store.create_note(None, "doc").unwrap();
        let mut session = EditorSession::open(&note, short_config());

        let t0 = Instant::now();
        session.edit_content("keep me", t0);
        store.delete_note(note.id).unwrap();

        let result = save_due(&mut session, &store, t0 + Duration::from_secs(10));
        assert!(matches!(result, Err(Error::NotFound)));
        assert!(session.is_dirty());
        assert_eq!(session.current_content(), "keep me");
    }

    #[test]
    fn test_save_content_prunes_after_commit() {
        let store = open_store();
        let note = store.create_note(None, "doc").unwrap();
        store
            .set_retention_policy(RetentionPolicy::Count { value: 2 })
            .unwrap();

        for i in 0..5 {
            save_content(&store, note.id, &format!("v{i}")).unwrap();
        }

        let history = store.list_history(note.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "v4");
        assert_eq!(history[1].content, "v3");
    }

    #[test]
    fn test_restore_version_creates_new_entry() {
        let store = open_store();
        let note = store.create_note(None, "doc").unwrap();
        let v1 = store.commit_content(note.id, "v1").unwrap();
        store.commit_content(note.id, "v2").unwrap();

        let restored = restore_version(&store, v1.id).unwrap();
        assert_ne!(restored.id, v1.id);
        assert_eq!(restored.content, "v1");

        assert_eq!(store.get_note(note.id).unwrap().unwrap().content, "v1");
        // The restored-from entry is untouched; the restore added a third
        let history = store.list_history(note.id).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "v1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_commits_after_window() {
        let store = Arc::new(open_store());
        let note = store.create_note(None, "doc").unwrap();

        let (handle, task) = spawn_autosaver(store.clone(), short_config());
        handle.open(note.clone());
        handle.edit_content("v1");
        time::sleep(Duration::from_secs(3)).await;

        // Still inside the (re-armed) window: nothing persisted yet
        handle.edit_content("v2");
        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(store.get_note(note.id).unwrap().unwrap().content, "");

        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(store.get_note(note.id).unwrap().unwrap().content, "v2");
        let history = store.list_history(note.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "v2");

        handle.close();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_flushes_on_switch() {
        let store = Arc::new(open_store());
        let first = store.create_note(None, "first").unwrap();
        let second = store.create_note(None, "second").unwrap();

        let (handle, task) = spawn_autosaver(store.clone(), short_config());
        handle.open(first.clone());
        handle.edit_content("unsaved draft");
        handle.open(second.clone());
        handle.close();
        task.await.unwrap();

        assert_eq!(
            store.get_note(first.id).unwrap().unwrap().content,
            "unsaved draft"
        );
        assert_eq!(store.list_history(first.id).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_flushes_on_teardown() {
        let store = Arc::new(open_store());
        let note = store.create_note(None, "doc").unwrap();

        let (handle, task) = spawn_autosaver(store.clone(), short_config());
        handle.open(note.clone());
        handle.edit_title("renamed in passing");
        drop(handle);
        task.await.unwrap();

        assert_eq!(
            store.get_note(note.id).unwrap().unwrap().title,
            "renamed in passing"
        );
        // Title saves never create history
        assert!(store.list_history(note.id).unwrap().is_empty());
    }
}
