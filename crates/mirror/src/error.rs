use std::path::PathBuf;

use crate::node::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("unknown node id: {0}")]
    UnknownId(NodeId),

    #[error("mirror not initialized: bootstrap scan has not completed")]
    NotInitialized,

    #[error("metadata unavailable for {}: {source}", .path.display())]
    MetadataUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("path outside watched root: {}", .0.display())]
    OutsideRoot(PathBuf),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("watch error: {0}")]
    Watch(String),
}

pub type Result<T> = std::result::Result<T, MirrorError>;
