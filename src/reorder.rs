use tracing::debug;

use crate::error::{Error, Result};
use crate::store::{Placement, Store};
use crate::tree::TreeSnapshot;
use crate::types::{ItemKind, ItemRef};

/// Where a dragged item was dropped. The gesture layer reduces pointer
/// tracking to one of these before calling the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    /// The dedicated root drop zone: move to top level, appended at the end.
    Root,
    /// Dropped onto a folder: nest inside it, appended at the end.
    Into(i64),
    /// Dropped next to a sibling: take its place in the sibling order.
    Near(ItemRef),
}

/// Result of a move request. Impossible drops (an item onto itself, a folder
/// into its own subtree) are ignored rather than reported as errors; they are
/// ordinary consequences of imprecise drag targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    Ignored,
}

pub struct MoveEngine<'a> {
    store: &'a dyn Store,
}

impl<'a> MoveEngine<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Moves `source` according to `target`, renumbering every affected
    /// sibling set so positions stay contiguous. All writes land in one
    /// store transaction; a failure leaves the tree untouched.
    pub fn move_item(&self, source: ItemRef, target: DropTarget) -> Result<MoveOutcome> {
        let snapshot = TreeSnapshot::load(self.store)?;
        let Some(source_container) = snapshot.container_of(source) else {
            return Err(Error::NotFound);
        };

        match target {
            DropTarget::Root => self.reparent(&snapshot, source, source_container, None),
            DropTarget::Into(folder_id) => {
                if snapshot.folder(folder_id).is_none() {
                    return Err(Error::NotFound);
                }
                if self.would_cycle(source, folder_id)? {
                    debug!(source = source.id, dest = folder_id, "ignoring cyclic drop");
                    return Ok(MoveOutcome::Ignored);
                }
                if source_container == Some(folder_id) {
                    return Ok(MoveOutcome::Ignored);
                }
                self.reparent(&snapshot, source, source_container, Some(folder_id))
            }
            DropTarget::Near(sibling) => {
                if sibling == source {
                    return Ok(MoveOutcome::Ignored);
                }
                if sibling.kind != source.kind {
                    // Folders and notes keep separate sibling orders, so a
                    // cross-kind drop degrades to a container move.
                    let fallback = match (sibling.kind, snapshot.container_of(sibling)) {
                        (ItemKind::Folder, _) => DropTarget::Into(sibling.id),
                        (ItemKind::Note, Some(Some(folder_id))) => DropTarget::Into(folder_id),
                        (ItemKind::Note, Some(None)) => DropTarget::Root,
                        (_, None) => return Err(Error::NotFound),
                    };
                    return self.move_item(source, fallback);
                }

                let Some(dest_container) = snapshot.container_of(sibling) else {
                    return Err(Error::NotFound);
                };
                if let Some(container_id) = dest_container {
                    if self.would_cycle(source, container_id)? {
                        debug!(
                            source = source.id,
                            container = container_id,
                            "ignoring cyclic drop"
                        );
                        return Ok(MoveOutcome::Ignored);
                    }
                }
                self.insert_near(&snapshot, source, source_container, sibling, dest_container)
            }
        }
    }

    /// A folder may not move into itself or any of its descendants.
    fn would_cycle(&self, source: ItemRef, dest_folder: i64) -> Result<bool> {
        if source.kind != ItemKind::Folder {
            return Ok(false);
        }
        if source.id == dest_folder {
            return Ok(true);
        }
        let ancestors = self.store.folder_ancestors(dest_folder)?;
        Ok(ancestors.contains(&source.id))
    }

    /// Appends `source` to `dest` and closes the gap it left behind.
    fn reparent(
        &self,
        snapshot: &TreeSnapshot,
        source: ItemRef,
        source_container: Option<i64>,
        dest: Option<i64>,
    ) -> Result<MoveOutcome> {
        let mut placements = vec![Placement {
            item: source,
            container: dest,
            position: next_position(snapshot, dest, source.kind),
        }];

        if source_container != dest {
            let mut remaining = siblings(snapshot, source_container, source.kind);
            remaining.retain(|item| *item != source);
            placements.extend(renumber(remaining, source_container));
        }

        self.store.apply_placements(&placements)?;
        Ok(MoveOutcome::Moved)
    }

    /// Inserts `source` at `sibling`'s index in the destination sequence,
    /// renumbering the destination and (for cross-container drags) the
    /// vacated sequence.
    fn insert_near(
        &self,
        snapshot: &TreeSnapshot,
        source: ItemRef,
        source_container: Option<i64>,
        sibling: ItemRef,
        dest_container: Option<i64>,
    ) -> Result<MoveOutcome> {
        let mut seq = siblings(snapshot, dest_container, source.kind);
        seq.retain(|item| *item != source);
        let Some(index) = seq.iter().position(|item| *item == sibling) else {
            return Err(Error::NotFound);
        };
        seq.insert(index, source);

        let mut placements = renumber(seq, dest_container);
        if source_container != dest_container {
            let mut remaining = siblings(snapshot, source_container, source.kind);
            remaining.retain(|item| *item != source);
            placements.extend(renumber(remaining, source_container));
        }

        self.store.apply_placements(&placements)?;
        Ok(MoveOutcome::Moved)
    }
}

fn siblings(snapshot: &TreeSnapshot, container: Option<i64>, kind: ItemKind) -> Vec<ItemRef> {
    match kind {
        ItemKind::Folder => snapshot
            .child_folders(container)
            .iter()
            .map(|f| ItemRef::folder(f.id))
            .collect(),
        ItemKind::Note => snapshot
            .child_notes(container)
            .iter()
            .map(|n| ItemRef::note(n.id))
            .collect(),
    }
}

fn next_position(snapshot: &TreeSnapshot, container: Option<i64>, kind: ItemKind) -> i64 {
    match kind {
        ItemKind::Folder => snapshot
            .child_folders(container)
            .last()
            .map_or(0, |f| f.position + 1),
        ItemKind::Note => snapshot
            .child_notes(container)
            .last()
            .map_or(0, |n| n.position + 1),
    }
}

fn renumber(items: Vec<ItemRef>, container: Option<i64>) -> Vec<Placement> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| Placement {
            item,
            container,
            position: index as i64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn open_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.initialize().unwrap();
        store
    }

    fn note_order(store: &dyn Store, container: Option<i64>) -> Vec<(i64, i64)> {
        let snapshot = TreeSnapshot::load(store).unwrap();
        snapshot
            .child_notes(container)
            .iter()
            .map(|n| (n.id, n.position))
            .collect()
    }

    fn folder_order(store: &dyn Store, container: Option<i64>) -> Vec<(i64, i64)> {
        let snapshot = TreeSnapshot::load(store).unwrap();
        snapshot
            .child_folders(container)
            .iter()
            .map(|f| (f.id, f.position))
            .collect()
    }

    #[test]
    fn test_reorder_renumbers_contiguously() {
        let store = open_store();
        let a = store.create_note(None, "a").unwrap();
        let b = store.create_note(None, "b").unwrap();
        let c = store.create_note(None, "c").unwrap();

        let outcome = MoveEngine::new(&store)
            .move_item(ItemRef::note(c.id), DropTarget::Near(ItemRef::note(a.id)))
            .unwrap();
        assert_eq!(outcome, MoveOutcome::Moved);

        assert_eq!(
            note_order(&store, None),
            vec![(c.id, 0), (a.id, 1), (b.id, 2)]
        );
    }

    #[test]
    fn test_drop_into_folder_appends() {
        let store = open_store();
        let dest = store.create_folder(None, "dest").unwrap();
        let existing = store.create_note(Some(dest.id), "existing").unwrap();
        let dragged = store.create_note(None, "dragged").unwrap();

        MoveEngine::new(&store)
            .move_item(ItemRef::note(dragged.id), DropTarget::Into(dest.id))
            .unwrap();

        assert_eq!(
            note_order(&store, Some(dest.id)),
            vec![(existing.id, 0), (dragged.id, 1)]
        );
        assert!(note_order(&store, None).is_empty());
    }

    #[test]
    fn test_drop_into_current_container_is_ignored() {
        let store = open_store();
        let dest = store.create_folder(None, "dest").unwrap();
        let note = store.create_note(Some(dest.id), "here already").unwrap();

        let outcome = MoveEngine::new(&store)
            .move_item(ItemRef::note(note.id), DropTarget::Into(dest.id))
            .unwrap();
        assert_eq!(outcome, MoveOutcome::Ignored);
    }

    #[test]
    fn test_cyclic_folder_drop_leaves_tree_unchanged() {
        let store = open_store();
        let a = store.create_folder(None, "a").unwrap();
        let b = store.create_folder(Some(a.id), "b").unwrap();
        let c = store.create_folder(Some(b.id), "c").unwrap();

        let engine = MoveEngine::new(&store);
        let before = store.snapshot().unwrap();

        // Into itself, into a child, into a grandchild
        for target in [a.id, b.id, c.id] {
            let outcome = engine
                .move_item(ItemRef::folder(a.id), DropTarget::Into(target))
                .unwrap();
            assert_eq!(outcome, MoveOutcome::Ignored);
        }
        // Near a sibling inside its own subtree
        let outcome = engine
            .move_item(ItemRef::folder(a.id), DropTarget::Near(ItemRef::folder(c.id)))
            .unwrap();
        assert_eq!(outcome, MoveOutcome::Ignored);

        assert_eq!(store.snapshot().unwrap(), before);
    }

    #[test]
    fn test_drop_onto_self_is_ignored() {
        let store = open_store();
        let note = store.create_note(None, "solo").unwrap();

        let outcome = MoveEngine::new(&store)
            .move_item(ItemRef::note(note.id), DropTarget::Near(ItemRef::note(note.id)))
            .unwrap();
        assert_eq!(outcome, MoveOutcome::Ignored);
    }

    #[test]
    fn test_root_drop_reparents_and_appends() {
        let store = open_store();
        let folder = store.create_folder(None, "src").unwrap();
        let root_note = store.create_note(None, "root").unwrap();
        let nested = store.create_note(Some(folder.id), "nested").unwrap();
        let stays = store.create_note(Some(folder.id), "stays").unwrap();

        MoveEngine::new(&store)
            .move_item(ItemRef::note(nested.id), DropTarget::Root)
            .unwrap();

        let snapshot = TreeSnapshot::load(&store).unwrap();
        let moved = snapshot.note(nested.id).unwrap();
        assert_eq!(moved.folder_id, None);
        assert_eq!(moved.position, root_note.position + 1);

        // The vacated container closes its gap
        assert_eq!(note_order(&store, Some(folder.id)), vec![(stays.id, 0)]);
    }

    #[test]
    fn test_cross_container_drag_property() {
        // File F from folder X (3 siblings) to position 1 of folder Y
        // (2 siblings): Y ends with 3 notes, F at index 1; X ends with
        // 2 notes renumbered 0..1.
        let store = open_store();
        let x = store.create_folder(None, "X").unwrap();
        let y = store.create_folder(None, "Y").unwrap();
        let x0 = store.create_note(Some(x.id), "x0").unwrap();
        let f = store.create_note(Some(x.id), "F").unwrap();
        let x2 = store.create_note(Some(x.id), "x2").unwrap();
        let y0 = store.create_note(Some(y.id), "y0").unwrap();
        let y1 = store.create_note(Some(y.id), "y1").unwrap();

        MoveEngine::new(&store)
            .move_item(ItemRef::note(f.id), DropTarget::Near(ItemRef::note(y1.id)))
            .unwrap();

        assert_eq!(
            note_order(&store, Some(y.id)),
            vec![(y0.id, 0), (f.id, 1), (y1.id, 2)]
        );
        assert_eq!(
            note_order(&store, Some(x.id)),
            vec![(x0.id, 0), (x2.id, 1)]
        );

        let snapshot = TreeSnapshot::load(&store).unwrap();
        assert_eq!(snapshot.note(f.id).unwrap().folder_id, Some(y.id));
    }

    #[test]
    fn test_folder_reorder_at_root() {
        let store = open_store();
        let a = store.create_folder(None, "a").unwrap();
        let b = store.create_folder(None, "b").unwrap();
        let c = store.create_folder(None, "c").unwrap();

        MoveEngine::new(&store)
            .move_item(ItemRef::folder(a.id), DropTarget::Near(ItemRef::folder(c.id)))
            .unwrap();

        assert_eq!(
            folder_order(&store, None),
            vec![(b.id, 0), (a.id, 1), (c.id, 2)]
        );
    }

    #[test]
    fn test_note_near_folder_degrades_to_nesting() {
        let store = open_store();
        let folder = store.create_folder(None, "dest").unwrap();
        let note = store.create_note(None, "dragged").unwrap();

        MoveEngine::new(&store)
            .move_item(ItemRef::note(note.id), DropTarget::Near(ItemRef::folder(folder.id)))
            .unwrap();

        let snapshot = TreeSnapshot::load(&store).unwrap();
        assert_eq!(snapshot.note(note.id).unwrap().folder_id, Some(folder.id));
    }

    #[test]
    fn test_folder_near_nested_note_reparents() {
        let store = open_store();
        let dest = store.create_folder(None, "dest").unwrap();
        let marker = store.create_note(Some(dest.id), "marker").unwrap();
        let dragged = store.create_folder(None, "dragged").unwrap();

        MoveEngine::new(&store)
            .move_item(
                ItemRef::folder(dragged.id),
                DropTarget::Near(ItemRef::note(marker.id)),
            )
            .unwrap();

        let snapshot = TreeSnapshot::load(&store).unwrap();
        assert_eq!(snapshot.folder(dragged.id).unwrap().parent_id, Some(dest.id));
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let store = open_store();
        let result = MoveEngine::new(&store).move_item(ItemRef::note(42), DropTarget::Root);
        assert!(matches!(result, Err(Error::NotFound)));
    }

    #[test]
    fn test_move_stamps_updated_at() {
        let store = open_store();
        let folder = store.create_folder(None, "dest").unwrap();
        let note = store.create_note(None, "dragged").unwrap();
        let before = note.updated_at;

        MoveEngine::new(&store)
            .move_item(ItemRef::note(note.id), DropTarget::Into(folder.id))
            .unwrap();

        let after = store.get_note(note.id).unwrap().unwrap().updated_at;
        assert!(after >= before);
    }

    #[test]
    fn test_renumber_is_contiguous() {
        let items = vec![ItemRef::note(9), ItemRef::note(4), ItemRef::note(7)];
        let placements = renumber(items, Some(1));
        let positions: Vec<i64> = placements.iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert!(placements.iter().all(|p| p.container == Some(1)));
    }
}
