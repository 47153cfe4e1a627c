//! # localnote
//!
//! The storage and ordering core of a local-first note-taking app: a
//! hierarchical folder/note tree with stable sibling ordering under
//! drag-and-drop moves, debounced autosave with append-only version history,
//! and wholesale JSON import/export, persisted in embedded SQLite.
//!
//! The crate ships no UI. A presentation layer drives it through the store,
//! the move engine, and the autosave service, and re-renders from
//! [`tree::TreeSnapshot`] whenever the store's change feed fires.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use localnote::reorder::{DropTarget, MoveEngine};
//! use localnote::store::{SqliteStore, Store};
//! use localnote::types::ItemRef;
//!
//! let store = SqliteStore::new("./data/localnote.db").unwrap();
//! store.initialize().unwrap();
//!
//! let inbox = store.create_folder(None, "Inbox").unwrap();
//! let note = store.create_note(None, "Untitled").unwrap();
//!
//! let engine = MoveEngine::new(&store);
//! engine
//!     .move_item(ItemRef::note(note.id), DropTarget::Into(inbox.id))
//!     .unwrap();
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `localnote` binary's dependencies. Disable
//!   with `default-features = false` when embedding the library.

pub mod autosave;
pub mod config;
pub mod error;
pub mod reorder;
pub mod session;
pub mod store;
pub mod transfer;
pub mod tree;
pub mod types;
