//! Durable append-only change history plus the derived current-state
//! index.
//!
//! The log is JSON Lines in `history.jsonl`, one entry per applied
//! change, flushed synchronously per append — crash-safety over raw
//! throughput. The current-state index (`index.json`, latest entry per
//! path) is rewritten atomically via temp file + rename. A failed
//! flush is logged and retried on the next append; the in-memory state
//! stays authoritative until storage recovers. Only a failure to open
//! storage at startup is fatal.

use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};
use crate::node::{ChangeEvent, ChangeKind, Node};

pub const HISTORY_FILE: &str = "history.jsonl";
pub const INDEX_FILE: &str = "index.json";

/// One persisted change: a [`ChangeEvent`] plus its sequence number.
/// Never edited or deleted individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub seq: u64,
    pub kind: ChangeKind,
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
    pub node: Node,
}

/// Last known state of one path, derived by folding the latest entry
/// per path: upserted on created/modified, removed on deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub path: PathBuf,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub node: Node,
}

/// Filters for [`HistoryLedger::query`]. Every field is optional; the
/// time range is inclusive on both ends.
#[derive(Debug, Clone, Default)]
pub struct LedgerQuery {
    pub path: Option<PathBuf>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub kind: Option<ChangeKind>,
}

/// Aggregate counts over the history log.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LedgerStats {
    pub total_entries: u64,
    pub created: u64,
    pub modified: u64,
    pub deleted: u64,
    pub indexed_paths: usize,
}

struct LedgerInner {
    index_path: PathBuf,
    log: File,
    entries: Vec<LedgerEntry>,
    index: BTreeMap<PathBuf, IndexEntry>,
    next_seq: u64,
    /// Entries appended in memory but not yet on disk; retried on the
    /// next append after a storage failure.
    unflushed: VecDeque<LedgerEntry>,
    index_dirty: bool,
}

/// Append-only durable log of applied changes, queryable by path, time
/// range, and kind.
pub struct HistoryLedger {
    inner: Mutex<LedgerInner>,
}

impl HistoryLedger {
    /// Opens (or creates) the ledger under `dir`, replaying the
    /// existing log into memory. This is the one place where a storage
    /// failure is fatal: without it no ledger can exist.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let log_path = dir.join(HISTORY_FILE);
        let index_path = dir.join(INDEX_FILE);

        let entries = load_entries(&log_path)?;
        // The index is derived state; folding the log on open keeps it
        // correct even when index.json is stale or missing.
        let mut index = BTreeMap::new();
        for entry in &entries {
            fold_into_index(&mut index, entry);
        }
        let next_seq = entries.last().map(|entry| entry.seq + 1).unwrap_or(1);

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            inner: Mutex::new(LedgerInner {
                index_path,
                log,
                entries,
                index,
                next_seq,
                unflushed: VecDeque::new(),
                index_dirty: false,
            }),
        })
    }

    /// Assigns the next sequence number, appends to durable storage
    /// with a synchronous flush, and updates the current-state index.
    ///
    /// Storage failures are logged and retried on the next append; the
    /// entry is never lost from memory. Returns the sequence number.
    pub fn append(&self, event: &ChangeEvent) -> u64 {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let entry = LedgerEntry {
            seq,
            kind: event.kind,
            timestamp: event.timestamp,
            path: event.node.path.clone(),
            node: event.node.clone(),
        };

        fold_into_index(&mut inner.index, &entry);
        inner.entries.push(entry.clone());
        inner.unflushed.push_back(entry);
        inner.index_dirty = true;

        if let Err(error) = inner.flush_pending() {
            log::warn!("ledger flush failed, will retry on next append: {error}");
        }

        seq
    }

    /// Returns the matching subsequence of the log in append order.
    pub fn query(&self, filter: &LedgerQuery) -> Vec<LedgerEntry> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .filter(|entry| {
                filter.path.as_deref().map_or(true, |p| entry.path == p)
                    && filter.start.map_or(true, |t0| entry.timestamp >= t0)
                    && filter.end.map_or(true, |t1| entry.timestamp <= t1)
                    && filter.kind.map_or(true, |k| entry.kind == k)
            })
            .cloned()
            .collect()
    }

    /// Last known state for `path`, if it has not been deleted.
    pub fn current_state(&self, path: &Path) -> Result<IndexEntry> {
        let inner = self.inner.lock();
        inner
            .index
            .get(path)
            .cloned()
            .ok_or_else(|| MirrorError::NotFound(path.to_path_buf()))
    }

    pub fn stats(&self) -> LedgerStats {
        let inner = self.inner.lock();
        let mut stats = LedgerStats {
            total_entries: inner.entries.len() as u64,
            indexed_paths: inner.index.len(),
            ..Default::default()
        };
        for entry in &inner.entries {
            match entry.kind {
                ChangeKind::Created => stats.created += 1,
                ChangeKind::Modified => stats.modified += 1,
                ChangeKind::Deleted => stats.deleted += 1,
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Final synchronous flush, for shutdown. Unlike [`append`](Self::append)
    /// this surfaces the failure to the caller.
    pub fn flush(&self) -> Result<()> {
        self.inner
            .lock()
            .flush_pending()
            .map_err(|error| MirrorError::Storage(error.to_string()))
    }
}

impl LedgerInner {
    fn flush_pending(&mut self) -> io::Result<()> {
        while let Some(entry) = self.unflushed.front() {
            let line = serde_json::to_string(entry)
                .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
            writeln!(self.log, "{line}")?;
            self.unflushed.pop_front();
        }
        self.log.flush()?;
        self.log.sync_data()?;

        if self.index_dirty {
            write_index_atomic(&self.index_path, &self.index)?;
            self.index_dirty = false;
        }
        Ok(())
    }
}

fn fold_into_index(index: &mut BTreeMap<PathBuf, IndexEntry>, entry: &LedgerEntry) {
    match entry.kind {
        ChangeKind::Created | ChangeKind::Modified => {
            index.insert(
                entry.path.clone(),
                IndexEntry {
                    path: entry.path.clone(),
                    seq: entry.seq,
                    timestamp: entry.timestamp,
                    node: entry.node.clone(),
                },
            );
        }
        ChangeKind::Deleted => {
            index.remove(&entry.path);
        }
    }
}

fn load_entries(log_path: &Path) -> Result<Vec<LedgerEntry>> {
    if !log_path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(log_path)?);
    let mut entries = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LedgerEntry>(&line) {
            Ok(entry) => entries.push(entry),
            // A torn trailing write must not make history unreadable.
            Err(error) => {
                log::warn!(
                    "skipping unreadable ledger line {}: {error}",
                    number + 1
                );
            }
        }
    }
    Ok(entries)
}

/// Temp file + rename so a crash mid-write never leaves a torn index.
fn write_index_atomic(
    index_path: &Path,
    index: &BTreeMap<PathBuf, IndexEntry>,
) -> io::Result<()> {
    let tmp_path = index_path.with_extension("tmp");
    {
        let mut tmp = File::create(&tmp_path)?;
        let body = serde_json::to_vec_pretty(index)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
        tmp.write_all(&body)?;
        tmp.sync_data()?;
    }
    fs::rename(&tmp_path, index_path)
}
