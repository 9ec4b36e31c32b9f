//! In-memory queryable mirror of a watched directory tree.
//!
//! The mirror keeps an id-addressed node hierarchy in sync with a
//! directory on disk. A platform watcher feeds normalized change
//! intents to a single mutating thread; applied changes flow through
//! an event bridge to WebSocket-ready subscriber hubs and into an
//! append-only history ledger with a current-state index.

pub mod bridge;
pub mod error;
pub mod hub;
pub mod ledger;
pub mod meta;
pub mod node;
pub mod scan;
pub mod service;
pub mod tree;
pub mod watch;

pub use error::{MirrorError, Result};
pub use node::{ChangeEvent, ChangeKind, Node, NodeId, NodeMetadata, TreeSnapshot};
pub use service::{Mirror, MirrorConfig};
pub use tree::TreeStore;
