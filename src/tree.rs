use std::collections::HashSet;

use crate::error::Result;
use crate::store::Store;
use crate::types::{Folder, ItemKind, ItemRef, Note};

/// Point-in-time copy of the folder and note collections, used to derive
/// ordered child lists. Holds no state of its own; rebuild it after every
/// store change event.
#[derive(Debug, Clone, Default)]
pub struct TreeSnapshot {
    folders: Vec<Folder>,
    notes: Vec<Note>,
}

impl TreeSnapshot {
    #[must_use]
    pub fn new(folders: Vec<Folder>, notes: Vec<Note>) -> Self {
        Self { folders, notes }
    }

    pub fn load(store: &dyn Store) -> Result<Self> {
        Ok(Self::new(store.list_folders()?, store.list_notes()?))
    }

    #[must_use]
    pub fn folders(&self) -> &[Folder] {
        &self.folders
    }

    #[must_use]
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    #[must_use]
    pub fn folder(&self, id: i64) -> Option<&Folder> {
        self.folders.iter().find(|f| f.id == id)
    }

    #[must_use]
    pub fn note(&self, id: i64) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    /// Direct child folders of a container, ascending by position with ties
    /// broken by id.
    #[must_use]
    pub fn child_folders(&self, container: Option<i64>) -> Vec<&Folder> {
        let mut children: Vec<&Folder> = self
            .folders
            .iter()
            .filter(|f| f.parent_id == container)
            .collect();
        children.sort_by_key(|f| (f.position, f.id));
        children
    }

    /// Direct child notes of a container, same ordering rule.
    #[must_use]
    pub fn child_notes(&self, container: Option<i64>) -> Vec<&Note> {
        let mut children: Vec<&Note> = self
            .notes
            .iter()
            .filter(|n| n.folder_id == container)
            .collect();
        children.sort_by_key(|n| (n.position, n.id));
        children
    }

    /// Whether `folder_id` sits inside `ancestor_id`'s subtree.
    #[must_use]
    pub fn is_descendant(&self, folder_id: i64, ancestor_id: i64) -> bool {
        let mut current = self.folder(folder_id).and_then(|f| f.parent_id);
        while let Some(id) = current {
            if id == ancestor_id {
                return true;
            }
            current = self.folder(id).and_then(|f| f.parent_id);
        }
        false
    }

    /// The container an item currently lives in, if the item exists.
    #[must_use]
    pub fn container_of(&self, item: ItemRef) -> Option<Option<i64>> {
        match item.kind {
            ItemKind::Folder => self.folder(item.id).map(|f| f.parent_id),
            ItemKind::Note => self.note(item.id).map(|n| n.folder_id),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TreeNodeKind {
    Folder(Folder),
    Note(Note),
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub kind: TreeNodeKind,
    pub depth: usize,
    pub expanded: bool,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    #[must_use]
    pub fn item(&self) -> ItemRef {
        match &self.kind {
            TreeNodeKind::Folder(f) => ItemRef::folder(f.id),
            TreeNodeKind::Note(n) => ItemRef::note(n.id),
        }
    }

    #[must_use]
    pub fn is_folder(&self) -> bool {
        matches!(self.kind, TreeNodeKind::Folder(_))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match &self.kind {
            TreeNodeKind::Folder(f) => &f.name,
            TreeNodeKind::Note(n) => {
                if n.title.is_empty() {
                    "Untitled"
                } else {
                    &n.title
                }
            }
        }
    }
}

/// Builds the render tree from the root: folders first, then notes, each in
/// sibling order. Collapsed folders keep their children unbuilt.
#[must_use]
pub fn build_tree(snapshot: &TreeSnapshot, expanded: &HashSet<i64>) -> Vec<TreeNode> {
    build_level(snapshot, expanded, None, 0)
}

fn build_level(
    snapshot: &TreeSnapshot,
    expanded: &HashSet<i64>,
    container: Option<i64>,
    depth: usize,
) -> Vec<TreeNode> {
    let mut nodes = Vec::new();

    for folder in snapshot.child_folders(container) {
        let is_expanded = expanded.contains(&folder.id);
        let children = if is_expanded {
            build_level(snapshot, expanded, Some(folder.id), depth + 1)
        } else {
            Vec::new()
        };
        nodes.push(TreeNode {
            kind: TreeNodeKind::Folder(folder.clone()),
            depth,
            expanded: is_expanded,
            children,
        });
    }

    for note in snapshot.child_notes(container) {
        nodes.push(TreeNode {
            kind: TreeNodeKind::Note(note.clone()),
            depth,
            expanded: false,
            children: Vec::new(),
        });
    }

    nodes
}

/// Depth-first row list of the visible tree.
#[must_use]
pub fn flatten_tree(tree: &[TreeNode]) -> Vec<&TreeNode> {
    let mut flat = Vec::new();
    for node in tree {
        flatten_node(node, &mut flat);
    }
    flat
}

fn flatten_node<'a>(node: &'a TreeNode, flat: &mut Vec<&'a TreeNode>) {
    flat.push(node);
    for child in &node.children {
        flatten_node(child, flat);
    }
}
