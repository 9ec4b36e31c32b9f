//! Bootstrap scan of the watched root.
//!
//! Runs once at startup, before the mirror is marked initialized.
//! Unreadable entries are skipped and counted rather than aborting the
//! scan; a partially readable tree is still worth mirroring.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::ledger::HistoryLedger;
use crate::meta;
use crate::tree::TreeStore;

/// What the bootstrap scan found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub files: usize,
    pub directories: usize,
    pub errors: usize,
}

/// Walks the tree's root, indexing every reachable entry and recording
/// the creations in the ledger. Marks the tree initialized when done.
pub fn bootstrap_scan(tree: &Arc<TreeStore>, ledger: &Arc<HistoryLedger>) -> Result<ScanSummary> {
    let root = tree.root_path().to_path_buf();
    if !root.exists() {
        log::info!("creating watched root {}", root.display());
        fs::create_dir_all(&root)?;
    }

    let mut summary = ScanSummary::default();
    index_path(tree, ledger, &root, &mut summary)?;
    tree.mark_initialized();

    log::info!(
        "bootstrap scan of {} indexed {} files, {} directories ({} errors)",
        root.display(),
        summary.files,
        summary.directories,
        summary.errors,
    );
    Ok(summary)
}

fn index_path(
    tree: &Arc<TreeStore>,
    ledger: &Arc<HistoryLedger>,
    path: &Path,
    summary: &mut ScanSummary,
) -> Result<()> {
    let sample = match meta::sample(path) {
        Ok(sample) => sample,
        Err(error) => {
            log::warn!("skipping unreadable entry: {error}");
            summary.errors += 1;
            return Ok(());
        }
    };

    let (_, events) = tree.create_node(path, sample.is_directory, Some(sample.metadata))?;
    for event in events {
        ledger.append(&event);
    }

    if sample.is_directory {
        summary.directories += 1;
        let mut children = Vec::new();
        match fs::read_dir(path) {
            Ok(dir) => {
                for entry in dir {
                    match entry {
                        Ok(entry) => children.push(entry.path()),
                        Err(error) => {
                            log::warn!("skipping entry in {}: {error}", path.display());
                            summary.errors += 1;
                        }
                    }
                }
            }
            Err(error) => {
                log::warn!("cannot read directory {}: {error}", path.display());
                summary.errors += 1;
                return Ok(());
            }
        }
        // Deterministic indexing order.
        children.sort();
        for child in children {
            index_path(tree, ledger, &child, summary)?;
        }
    } else {
        summary.files += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn scan_fixture(root: &Path) -> (Arc<TreeStore>, Arc<HistoryLedger>, TempDir) {
        let ledger_dir = TempDir::new().unwrap();
        let tree = Arc::new(TreeStore::new(root.to_path_buf()));
        let ledger = Arc::new(HistoryLedger::open(ledger_dir.path()).unwrap());
        (tree, ledger, ledger_dir)
    }

    #[test]
    fn scan_indexes_nested_tree() {
        let root = TempDir::new().unwrap();
        File::create(root.path().join("a.txt"))
            .unwrap()
            .write_all(b"hello")
            .unwrap();
        fs::create_dir(root.path().join("sub")).unwrap();
        File::create(root.path().join("sub/b.txt")).unwrap();

        let (tree, ledger, _guard) = scan_fixture(root.path());
        let summary = bootstrap_scan(&tree, &ledger).unwrap();

        assert_eq!(summary.files, 2);
        assert_eq!(summary.directories, 2); // root and sub
        assert_eq!(summary.errors, 0);
        assert!(tree.is_initialized());

        let root_node = tree.get_by_path(root.path()).unwrap();
        assert_eq!(root_node.children.len(), 2);

        let b = tree.get_by_path(&root.path().join("sub/b.txt")).unwrap();
        assert!(!b.is_directory);
        let sub = tree.get_by_path(&root.path().join("sub")).unwrap();
        assert_eq!(b.parent, Some(sub.id));

        // Every indexed node produced a ledger entry.
        assert_eq!(ledger.len(), 4);
    }

    #[test]
    fn scan_creates_missing_root() {
        let parent = TempDir::new().unwrap();
        let root = parent.path().join("not-yet");

        let (tree, ledger, _guard) = scan_fixture(&root);
        let summary = bootstrap_scan(&tree, &ledger).unwrap();

        assert!(root.is_dir());
        assert_eq!(summary.directories, 1);
        assert_eq!(summary.files, 0);
    }

    #[test]
    fn tree_is_uninitialized_before_scan() {
        let root = TempDir::new().unwrap();
        let (tree, ledger, _guard) = scan_fixture(root.path());

        assert!(!tree.is_initialized());
        assert!(tree.get_by_path(root.path()).is_err());

        bootstrap_scan(&tree, &ledger).unwrap();
        assert!(tree.get_by_path(root.path()).is_ok());
    }
}
