//! Filesystem metadata sampling.
//!
//! Both the bootstrap scanner and the watch adapter sample through
//! [`sample`], so every node carries the same set of fields. A failed
//! stat (the path vanished between notification and sampling) surfaces
//! as [`MirrorError::MetadataUnavailable`] and is handled locally by
//! the caller — it is never fatal.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::error::{MirrorError, Result};
use crate::node::NodeMetadata;

/// A freshly sampled metadata snapshot plus the entry kind.
#[derive(Debug, Clone)]
pub struct MetadataSample {
    pub metadata: NodeMetadata,
    pub is_directory: bool,
}

/// Stats `path` and converts the result into a [`NodeMetadata`].
///
/// Uses `symlink_metadata` so a dangling symlink still samples instead
/// of chasing its target.
pub fn sample(path: &Path) -> Result<MetadataSample> {
    let stat = fs::symlink_metadata(path).map_err(|source| MirrorError::MetadataUnavailable {
        path: path.to_path_buf(),
        source,
    })?;

    let is_directory = stat.is_dir();
    let metadata = NodeMetadata {
        size: if is_directory { None } else { Some(stat.len()) },
        created: stat.created().ok().map(to_utc),
        modified: stat.modified().ok().map(to_utc),
        is_hidden: Some(is_hidden_name(path)),
        permissions: permissions(&stat),
        owner: owner(&stat),
        group: group(&stat),
        description: None,
    };

    Ok(MetadataSample {
        metadata,
        is_directory,
    })
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

fn is_hidden_name(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

#[cfg(unix)]
fn permissions(stat: &fs::Metadata) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;
    Some(format!("{:03o}", stat.permissions().mode() & 0o777))
}

#[cfg(not(unix))]
fn permissions(stat: &fs::Metadata) -> Option<String> {
    let _ = stat;
    None
}

#[cfg(unix)]
fn owner(stat: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::MetadataExt;
    Some(stat.uid())
}

#[cfg(not(unix))]
fn owner(stat: &fs::Metadata) -> Option<u32> {
    let _ = stat;
    None
}

#[cfg(unix)]
fn group(stat: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::MetadataExt;
    Some(stat.gid())
}

#[cfg(not(unix))]
fn group(stat: &fs::Metadata) -> Option<u32> {
    let _ = stat;
    None
}
