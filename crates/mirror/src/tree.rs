//! Canonical in-memory hierarchy of the watched tree.
//!
//! Nodes are stored in a flat id-keyed arena with a parallel path→id
//! index; the two maps are kept strictly bijective. All mutation goes
//! through the write half of one `RwLock`, reads through the shared
//! half, so a traversal never observes a half-applied mutation.
//!
//! Every mutation returns the [`ChangeEvent`]s it produced — exactly
//! one per affected node — and the single-writer caller forwards them
//! to the ledger and the bridge. There is no callback registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{MirrorError, Result};
use crate::node::{ChangeEvent, ChangeKind, Node, NodeId, NodeMetadata, TreeSnapshot};

/// Aggregate counts over the current tree.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct TreeStats {
    pub total: usize,
    pub files: usize,
    pub directories: usize,
    pub initialized: bool,
}

#[derive(Debug, Default)]
struct TreeState {
    root: Option<NodeId>,
    nodes: HashMap<NodeId, Node>,
    paths: HashMap<PathBuf, NodeId>,
    initialized: bool,
}

/// The canonical in-memory mirror and its indices.
#[derive(Debug)]
pub struct TreeStore {
    root_path: PathBuf,
    inner: RwLock<TreeState>,
}

impl TreeStore {
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            root_path,
            inner: RwLock::new(TreeState::default()),
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Marks the bootstrap scan as complete; queries succeed afterwards.
    pub fn mark_initialized(&self) {
        self.inner.write().initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.read().initialized
    }

    /// Inserts a node at `path`, materializing any missing ancestor
    /// directories first. Emits one Created event per materialized
    /// ancestor plus the target, ancestor-first.
    ///
    /// Idempotent: if the path is already indexed the existing node is
    /// returned with no events. Bootstrap scan and live watch events
    /// both insert through here, so the store has one insertion path.
    pub fn create_node(
        &self,
        path: &Path,
        is_directory: bool,
        metadata: Option<NodeMetadata>,
    ) -> Result<(Node, Vec<ChangeEvent>)> {
        if !path.starts_with(&self.root_path) {
            return Err(MirrorError::OutsideRoot(path.to_path_buf()));
        }

        let mut state = self.inner.write();

        if let Some(&id) = state.paths.get(path) {
            let node = state.nodes[&id].clone();
            log::debug!("create for already-indexed path {}", path.display());
            return Ok((node, Vec::new()));
        }

        // Collect missing ancestors, nearest-first, then create them
        // top-down so every insert finds its parent already linked.
        let mut missing: Vec<PathBuf> = Vec::new();
        if path != self.root_path {
            let mut current = path.parent();
            while let Some(ancestor) = current {
                if state.paths.contains_key(ancestor) {
                    break;
                }
                missing.push(ancestor.to_path_buf());
                if ancestor == self.root_path {
                    break;
                }
                current = ancestor.parent();
            }
        }
        missing.reverse();

        let mut events = Vec::with_capacity(missing.len() + 1);
        for ancestor in missing {
            events.push(self.insert(&mut state, &ancestor, true, None));
        }
        let event = self.insert(&mut state, path, is_directory, metadata);
        let node = event.node.clone();
        events.push(event);

        Ok((node, events))
    }

    /// Merges `delta` into the node's metadata (unspecified fields are
    /// kept), bumps `modified_at`, and emits one Modified event.
    pub fn update_node(&self, path: &Path, delta: &NodeMetadata) -> Result<ChangeEvent> {
        let mut state = self.inner.write();
        let id = *state
            .paths
            .get(path)
            .ok_or_else(|| MirrorError::NotFound(path.to_path_buf()))?;

        let now = Utc::now();
        let node = state.nodes.get_mut(&id).expect("path index points at node");
        node.metadata.merge(delta);
        node.modified_at = now;

        Ok(ChangeEvent {
            kind: ChangeKind::Modified,
            node: node.clone(),
            timestamp: now,
        })
    }

    /// Removes the node and, for a directory, its whole subtree,
    /// deepest-first. Emits one Deleted event per removed node in
    /// leaf-to-root order, so a concurrent reader never sees a parent
    /// listing already-removed children.
    pub fn remove_node(&self, path: &Path) -> Result<Vec<ChangeEvent>> {
        let mut state = self.inner.write();
        let id = *state
            .paths
            .get(path)
            .ok_or_else(|| MirrorError::NotFound(path.to_path_buf()))?;

        let mut order = Vec::new();
        collect_post_order(&state, id, &mut order);

        let now = Utc::now();
        let mut events = Vec::with_capacity(order.len());
        for removed in order {
            let node = state
                .nodes
                .remove(&removed)
                .expect("subtree ids are indexed");
            state.paths.remove(&node.path);
            if let Some(parent) = node.parent {
                if let Some(parent_node) = state.nodes.get_mut(&parent) {
                    parent_node.children.remove(&removed);
                }
            }
            if state.root == Some(removed) {
                state.root = None;
            }
            events.push(ChangeEvent {
                kind: ChangeKind::Deleted,
                node,
                timestamp: now,
            });
        }

        Ok(events)
    }

    /// O(1) snapshot lookup by absolute path.
    pub fn get_by_path(&self, path: &Path) -> Result<Node> {
        let state = self.inner.read();
        if !state.initialized {
            return Err(MirrorError::NotInitialized);
        }
        state
            .paths
            .get(path)
            .map(|id| state.nodes[id].clone())
            .ok_or_else(|| MirrorError::NotFound(path.to_path_buf()))
    }

    /// O(1) snapshot lookup by id.
    pub fn get_by_id(&self, id: NodeId) -> Result<Node> {
        let state = self.inner.read();
        if !state.initialized {
            return Err(MirrorError::NotInitialized);
        }
        state
            .nodes
            .get(&id)
            .cloned()
            .ok_or(MirrorError::UnknownId(id))
    }

    /// Produces a nested read-only snapshot of the whole tree, children
    /// ordered by name. Taken under the read lock, so it never observes
    /// a half-applied mutation.
    pub fn serialize_tree(&self) -> Result<TreeSnapshot> {
        let state = self.inner.read();
        if !state.initialized {
            return Err(MirrorError::NotInitialized);
        }
        let root = state
            .root
            .ok_or_else(|| MirrorError::NotFound(self.root_path.clone()))?;
        Ok(snapshot(&state, root))
    }

    /// Case-insensitive name-substring search, results ordered by path.
    pub fn search(&self, needle: &str) -> Result<Vec<Node>> {
        let state = self.inner.read();
        if !state.initialized {
            return Err(MirrorError::NotInitialized);
        }
        let lower = needle.to_lowercase();
        let mut matches: Vec<Node> = state
            .nodes
            .values()
            .filter(|node| node.name.to_lowercase().contains(&lower))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(matches)
    }

    pub fn stats(&self) -> TreeStats {
        let state = self.inner.read();
        let directories = state.nodes.values().filter(|n| n.is_directory).count();
        TreeStats {
            total: state.nodes.len(),
            files: state.nodes.len() - directories,
            directories,
            initialized: state.initialized,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().nodes.is_empty()
    }

    fn insert(
        &self,
        state: &mut TreeState,
        path: &Path,
        is_directory: bool,
        metadata: Option<NodeMetadata>,
    ) -> ChangeEvent {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let parent = if path == self.root_path {
            None
        } else {
            // create_node materialized every ancestor before this insert
            path.parent().and_then(|p| state.paths.get(p).copied())
        };

        let now = Utc::now();
        let id = NodeId::new();
        let node = Node {
            id,
            name,
            path: path.to_path_buf(),
            is_directory,
            parent,
            children: Default::default(),
            metadata: metadata.unwrap_or_default(),
            created_at: now,
            modified_at: now,
        };

        match parent {
            Some(parent_id) => {
                if let Some(parent_node) = state.nodes.get_mut(&parent_id) {
                    parent_node.children.insert(id);
                }
            }
            None => state.root = Some(id),
        }

        state.paths.insert(node.path.clone(), id);
        state.nodes.insert(id, node.clone());

        ChangeEvent {
            kind: ChangeKind::Created,
            node,
            timestamp: now,
        }
    }

    /// Verifies the path↔id bijection and path/parent consistency.
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        let state = self.inner.read();
        assert_eq!(state.nodes.len(), state.paths.len());
        for (path, id) in &state.paths {
            let node = state.nodes.get(id).expect("indexed id exists");
            assert_eq!(&node.path, path);
        }
        for node in state.nodes.values() {
            match node.parent {
                Some(parent) => {
                    let parent_node = state.nodes.get(&parent).expect("parent exists");
                    assert!(parent_node.is_directory);
                    assert!(parent_node.children.contains(&node.id));
                    assert_eq!(node.path, parent_node.path.join(&node.name));
                }
                None => assert_eq!(state.root, Some(node.id)),
            }
        }
    }
}

fn collect_post_order(state: &TreeState, id: NodeId, out: &mut Vec<NodeId>) {
    if let Some(node) = state.nodes.get(&id) {
        for &child in &node.children {
            collect_post_order(state, child, out);
        }
    }
    out.push(id);
}

fn snapshot(state: &TreeState, id: NodeId) -> TreeSnapshot {
    let node = &state.nodes[&id];
    let mut children: Vec<TreeSnapshot> = node
        .children
        .iter()
        .map(|&child| snapshot(state, child))
        .collect();
    children.sort_by(|a, b| a.name.cmp(&b.name));
    TreeSnapshot {
        id: node.id,
        name: node.name.clone(),
        path: node.path.clone(),
        is_directory: node.is_directory,
        metadata: node.metadata.clone(),
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TreeStore {
        let store = TreeStore::new(PathBuf::from("/watched"));
        store
            .create_node(Path::new("/watched"), true, None)
            .unwrap();
        store.mark_initialized();
        store
    }

    #[test]
    fn create_materializes_missing_ancestors() {
        let store = store();
        let (_, events) = store
            .create_node(Path::new("/watched/a/b/c.txt"), false, None)
            .unwrap();

        let paths: Vec<_> = events.iter().map(|e| e.node.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/watched/a"),
                PathBuf::from("/watched/a/b"),
                PathBuf::from("/watched/a/b/c.txt"),
            ]
        );
        assert!(events.iter().all(|e| e.kind == ChangeKind::Created));
        assert!(store.get_by_path(Path::new("/watched/a/b")).unwrap().is_directory);
        store.assert_invariants();
    }

    #[test]
    fn create_is_idempotent() {
        let store = store();
        let (first, events) = store
            .create_node(Path::new("/watched/same.txt"), false, None)
            .unwrap();
        assert_eq!(events.len(), 1);

        let (second, events) = store
            .create_node(Path::new("/watched/same.txt"), false, None)
            .unwrap();
        assert_eq!(first.id, second.id);
        assert!(events.is_empty());

        let parent = store.get_by_path(Path::new("/watched")).unwrap();
        assert_eq!(parent.children.len(), 1);
        store.assert_invariants();
    }

    #[test]
    fn create_outside_root_is_rejected() {
        let store = store();
        let error = store
            .create_node(Path::new("/elsewhere/x"), false, None)
            .unwrap_err();
        assert!(matches!(error, MirrorError::OutsideRoot(_)));
    }

    #[test]
    fn update_merges_metadata_and_bumps_modified_at() {
        let store = store();
        let initial = NodeMetadata {
            size: Some(1),
            description: Some("keep me".to_string()),
            ..Default::default()
        };
        store
            .create_node(Path::new("/watched/f.txt"), false, Some(initial))
            .unwrap();

        let before = store.get_by_path(Path::new("/watched/f.txt")).unwrap();
        let delta = NodeMetadata {
            size: Some(2),
            ..Default::default()
        };
        let event = store.update_node(Path::new("/watched/f.txt"), &delta).unwrap();

        assert_eq!(event.kind, ChangeKind::Modified);
        assert_eq!(event.node.metadata.size, Some(2));
        assert_eq!(event.node.metadata.description.as_deref(), Some("keep me"));
        assert!(event.node.modified_at >= before.modified_at);
    }

    #[test]
    fn update_unknown_path_is_not_found() {
        let store = store();
        let error = store
            .update_node(Path::new("/watched/missing"), &NodeMetadata::default())
            .unwrap_err();
        assert!(matches!(error, MirrorError::NotFound(_)));
    }

    #[test]
    fn remove_directory_removes_descendants_leaf_first() {
        let store = store();
        store
            .create_node(Path::new("/watched/sub/b.txt"), false, None)
            .unwrap();

        let events = store.remove_node(Path::new("/watched/sub")).unwrap();
        let paths: Vec<_> = events.iter().map(|e| e.node.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/watched/sub/b.txt"),
                PathBuf::from("/watched/sub"),
            ]
        );
        assert!(events.iter().all(|e| e.kind == ChangeKind::Deleted));

        for event in &events {
            assert!(store.get_by_path(&event.node.path).is_err());
            assert!(store.get_by_id(event.node.id).is_err());
        }
        store.assert_invariants();
    }

    #[test]
    fn remove_unknown_path_is_not_found() {
        let store = store();
        let error = store.remove_node(Path::new("/watched/none")).unwrap_err();
        assert!(matches!(error, MirrorError::NotFound(_)));
    }

    #[test]
    fn indices_stay_bijective_under_mixed_operations() {
        let store = store();
        store
            .create_node(Path::new("/watched/a/one.txt"), false, None)
            .unwrap();
        store
            .create_node(Path::new("/watched/a/two.txt"), false, None)
            .unwrap();
        store
            .create_node(Path::new("/watched/b/deep/three.txt"), false, None)
            .unwrap();
        store
            .update_node(
                Path::new("/watched/a/one.txt"),
                &NodeMetadata {
                    size: Some(9),
                    ..Default::default()
                },
            )
            .unwrap();
        store.remove_node(Path::new("/watched/a/two.txt")).unwrap();
        store.remove_node(Path::new("/watched/b")).unwrap();
        store
            .create_node(Path::new("/watched/b/again.txt"), false, None)
            .unwrap();

        store.assert_invariants();
    }

    #[test]
    fn serialize_orders_children_by_name() {
        let store = store();
        store
            .create_node(Path::new("/watched/zeta"), true, None)
            .unwrap();
        store
            .create_node(Path::new("/watched/alpha.txt"), false, None)
            .unwrap();

        let snapshot = store.serialize_tree().unwrap();
        let names: Vec<_> = snapshot.children.iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["alpha.txt", "zeta"]);
    }

    #[test]
    fn queries_before_bootstrap_are_not_initialized() {
        let store = TreeStore::new(PathBuf::from("/watched"));
        store
            .create_node(Path::new("/watched"), true, None)
            .unwrap();

        assert!(matches!(
            store.serialize_tree().unwrap_err(),
            MirrorError::NotInitialized
        ));
        assert!(matches!(
            store.search("any").unwrap_err(),
            MirrorError::NotInitialized
        ));
        assert!(matches!(
            store.get_by_path(Path::new("/watched")).unwrap_err(),
            MirrorError::NotInitialized
        ));
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let store = store();
        store
            .create_node(Path::new("/watched/Notes.md"), false, None)
            .unwrap();
        store
            .create_node(Path::new("/watched/sub/notebook.txt"), false, None)
            .unwrap();

        let hits = store.search("note").unwrap();
        let names: Vec<_> = hits.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Notes.md", "notebook.txt"]);
    }
}
