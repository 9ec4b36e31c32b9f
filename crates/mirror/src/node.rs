//! Core data model: nodes, metadata, and change events.
//!
//! Nodes live in a flat id-keyed arena inside [`TreeStore`](crate::tree::TreeStore);
//! parent and children are ids, never owning references, so the
//! parent/child cycle never becomes an ownership cycle.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque unique node identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(Uuid);

impl NodeId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sampled filesystem metadata plus the optional free-text description.
///
/// Every field is optional; a partially filled value doubles as a merge
/// delta. [`merge`](Self::merge) overwrites only the fields the delta
/// carries, so unspecified fields survive an update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_hidden: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NodeMetadata {
    /// Merges `delta` into `self`, keeping fields the delta does not set.
    pub fn merge(&mut self, delta: &NodeMetadata) {
        if let Some(size) = delta.size {
            self.size = Some(size);
        }
        if let Some(created) = delta.created {
            self.created = Some(created);
        }
        if let Some(modified) = delta.modified {
            self.modified = Some(modified);
        }
        if let Some(is_hidden) = delta.is_hidden {
            self.is_hidden = Some(is_hidden);
        }
        if let Some(permissions) = &delta.permissions {
            self.permissions = Some(permissions.clone());
        }
        if let Some(owner) = delta.owner {
            self.owner = Some(owner);
        }
        if let Some(group) = delta.group {
            self.group = Some(group);
        }
        if let Some(description) = &delta.description {
            self.description = Some(description.clone());
        }
    }
}

/// One file or directory entry in the mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub path: PathBuf,
    pub is_directory: bool,
    pub parent: Option<NodeId>,
    pub children: BTreeSet<NodeId>,
    pub metadata: NodeMetadata,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Kind of change applied to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }

    /// Parses the lowercase wire form, e.g. for query parameters.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "modified" => Some(Self::Modified),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single node mutation, produced exactly once per affected node by a
/// [`TreeStore`](crate::tree::TreeStore) mutation. Immutable after
/// construction; downstream consumers only ever clone it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Snapshot of the node at the moment the change was applied.
    pub node: Node,
    pub timestamp: DateTime<Utc>,
}

/// Nested read-only snapshot of a subtree, children ordered by name.
#[derive(Debug, Clone, Serialize)]
pub struct TreeSnapshot {
    pub id: NodeId,
    pub name: String,
    pub path: PathBuf,
    pub is_directory: bool,
    pub metadata: NodeMetadata,
    pub children: Vec<TreeSnapshot>,
}
