//! Filesystem watching and notification normalization.
//!
//! The notify callback stays cheap: it only forwards raw events over a
//! crossbeam channel. A dedicated watch thread is the sole consumer
//! and the system's only tree mutator — it classifies each raw event
//! into a create/modify/delete intent, debounces the noisy ones,
//! samples fresh metadata, applies the intent to the [`TreeStore`],
//! and forwards the resulting change events to the ledger and the
//! bridge.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{recommended_watcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;

use crate::bridge::{EventBridge, OutboundMessage, RawNotification};
use crate::error::{MirrorError, Result};
use crate::ledger::HistoryLedger;
use crate::meta;
use crate::node::ChangeKind;
use crate::tree::TreeStore;

/// Cool-down window for repeated modify notifications on one path.
pub const DEFAULT_MODIFY_COOLDOWN: Duration = Duration::from_secs(1);

/// Window in which a modify following a create on the same path is
/// treated as a synthetic echo of the creation write and dropped.
pub const DEFAULT_CREATE_WINDOW: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct WatchConfig {
    pub modify_cooldown: Duration,
    pub create_window: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            modify_cooldown: DEFAULT_MODIFY_COOLDOWN,
            create_window: DEFAULT_CREATE_WINDOW,
        }
    }
}

/// A message sent from the notify callback to the watch thread.
#[derive(Debug)]
enum WatchMessage {
    Event(notify::Event),
    Error(String),
    Shutdown,
}

/// Suppresses redundant modify notifications.
///
/// State is two per-path instants: the last accepted modify and the
/// most recent create. Both are pruned when the path is deleted.
/// Directory notifications never pass through here.
#[derive(Debug)]
pub struct Debouncer {
    modify_cooldown: Duration,
    create_window: Duration,
    last_modify: HashMap<PathBuf, Instant>,
    just_created: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(modify_cooldown: Duration, create_window: Duration) -> Self {
        Self {
            modify_cooldown,
            create_window,
            last_modify: HashMap::new(),
            just_created: HashMap::new(),
        }
    }

    /// Records an accepted create so the trailing modify echo can be
    /// recognized.
    pub fn note_created(&mut self, path: &Path, now: Instant) {
        self.just_created.insert(path.to_path_buf(), now);
    }

    /// Returns true if a modify for `path` should be applied, and
    /// records it as the last accepted one if so.
    pub fn accept_modify(&mut self, path: &Path, now: Instant) -> bool {
        if let Some(&created) = self.just_created.get(path) {
            if now.duration_since(created) < self.create_window {
                return false;
            }
            self.just_created.remove(path);
        }
        if let Some(&last) = self.last_modify.get(path) {
            if now.duration_since(last) < self.modify_cooldown {
                return false;
            }
        }
        self.last_modify.insert(path.to_path_buf(), now);
        true
    }

    /// Drops all debounce state for a deleted path.
    pub fn forget(&mut self, path: &Path) {
        self.last_modify.remove(path);
        self.just_created.remove(path);
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_MODIFY_COOLDOWN, DEFAULT_CREATE_WINDOW)
    }
}

/// Everything the watch thread needs to apply an intent.
struct WatchContext {
    tree: Arc<TreeStore>,
    ledger: Arc<HistoryLedger>,
    bridge: EventBridge,
    debouncer: Debouncer,
}

/// Owns the platform watcher and the watch thread.
pub struct WatchAdapter {
    // Held so the platform watcher keeps running; dropped on stop.
    _watcher: RecommendedWatcher,
    tx: Sender<WatchMessage>,
    thread: Option<JoinHandle<()>>,
}

impl WatchAdapter {
    /// Starts watching the tree's root recursively and spawns the
    /// watch thread.
    pub fn start(
        tree: Arc<TreeStore>,
        ledger: Arc<HistoryLedger>,
        bridge: EventBridge,
        config: WatchConfig,
    ) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();

        let callback_tx = tx.clone();
        let mut watcher = recommended_watcher(move |result: notify::Result<notify::Event>| {
            let message = match result {
                Ok(event) => WatchMessage::Event(event),
                Err(error) => WatchMessage::Error(error.to_string()),
            };
            let _ = callback_tx.send(message);
        })
        .map_err(|error| {
            MirrorError::Watch(format!(
                "failed to create filesystem watcher for {}: {error}",
                tree.root_path().display()
            ))
        })?;

        watcher
            .watch(tree.root_path(), RecursiveMode::Recursive)
            .map_err(|error| {
                MirrorError::Watch(format!(
                    "failed to watch {}: {error}",
                    tree.root_path().display()
                ))
            })?;

        log::info!("watching {}", tree.root_path().display());

        let context = WatchContext {
            tree,
            ledger,
            bridge,
            debouncer: Debouncer::new(config.modify_cooldown, config.create_window),
        };
        let thread = std::thread::Builder::new()
            .name("mirror-watch".to_string())
            .spawn(move || watch_loop(rx, context))?;

        Ok(Self {
            _watcher: watcher,
            tx,
            thread: Some(thread),
        })
    }

    /// Stops the watcher and joins the watch thread. After this
    /// returns, no further tree mutations can occur.
    pub fn stop(mut self) {
        let _ = self.tx.send(WatchMessage::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        log::info!("watching stopped");
    }
}

impl Drop for WatchAdapter {
    fn drop(&mut self) {
        let _ = self.tx.send(WatchMessage::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn watch_loop(rx: Receiver<WatchMessage>, mut context: WatchContext) {
    while let Ok(message) = rx.recv() {
        match message {
            WatchMessage::Shutdown => break,
            WatchMessage::Error(error) => log::warn!("watch error: {error}"),
            WatchMessage::Event(event) => handle_event(&mut context, event),
        }
    }
}

/// Classifies a raw notification into an intent kind. Access events
/// carry no change; unclassifiable kinds fall back to an existence
/// probe.
fn classify(kind: &EventKind, path: &Path) -> Option<ChangeKind> {
    match kind {
        EventKind::Access(_) => None,
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeKind::Created),
        // Paired renames are split in handle_event; a rename that
        // arrives unpaired and unlabelled gets the existence probe.
        EventKind::Modify(ModifyKind::Name(_)) => Some(probe(path)),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        _ => Some(probe(path)),
    }
}

fn probe(path: &Path) -> ChangeKind {
    if path.exists() {
        ChangeKind::Modified
    } else {
        ChangeKind::Deleted
    }
}

fn handle_event(context: &mut WatchContext, event: notify::Event) {
    // The inotify backend pairs MOVED_FROM/MOVED_TO by cookie into one
    // event carrying [old, new]: the old path must be deleted, not
    // sampled as a modification of a path that no longer exists.
    if event.kind == EventKind::Modify(ModifyKind::Name(RenameMode::Both)) {
        if let [old, new] = event.paths.as_slice() {
            apply_intent(context, ChangeKind::Deleted, old);
            apply_intent(context, ChangeKind::Created, new);
            return;
        }
    }
    for path in &event.paths {
        let Some(kind) = classify(&event.kind, path) else {
            continue;
        };
        apply_intent(context, kind, path);
    }
}

fn apply_intent(context: &mut WatchContext, kind: ChangeKind, path: &Path) {
    match kind {
        ChangeKind::Deleted => {
            context.debouncer.forget(path);
            match context.tree.remove_node(path) {
                Ok(events) => {
                    publish_notification(context, ChangeKind::Deleted, Default::default());
                    publish_events(context, events);
                }
                Err(MirrorError::NotFound(_)) => {
                    log::debug!("delete for unindexed path {}", path.display());
                }
                Err(error) => log::warn!("failed to remove {}: {error}", path.display()),
            }
        }
        ChangeKind::Created | ChangeKind::Modified => {
            // Sample fresh; the path may already be gone again.
            let sample = match meta::sample(path) {
                Ok(sample) => sample,
                Err(error) => {
                    log::warn!("dropping {kind} intent: {error}");
                    return;
                }
            };

            let now = Instant::now();
            if !sample.is_directory {
                match kind {
                    ChangeKind::Created => context.debouncer.note_created(path, now),
                    ChangeKind::Modified => {
                        if !context.debouncer.accept_modify(path, now) {
                            log::debug!("debounced modify for {}", path.display());
                            return;
                        }
                    }
                    ChangeKind::Deleted => unreachable!(),
                }
            }

            let events = match kind {
                ChangeKind::Created => {
                    match context.tree.create_node(
                        path,
                        sample.is_directory,
                        Some(sample.metadata.clone()),
                    ) {
                        Ok((_, events)) => events,
                        Err(error) => {
                            log::warn!("failed to create {}: {error}", path.display());
                            return;
                        }
                    }
                }
                ChangeKind::Modified => {
                    match context.tree.update_node(path, &sample.metadata) {
                        Ok(event) => vec![event],
                        // Modify may arrive before we ever indexed the
                        // path; upsert keeps the mirror converging.
                        Err(MirrorError::NotFound(_)) => {
                            match context.tree.create_node(
                                path,
                                sample.is_directory,
                                Some(sample.metadata.clone()),
                            ) {
                                Ok((_, events)) => events,
                                Err(error) => {
                                    log::warn!(
                                        "failed to upsert {}: {error}",
                                        path.display()
                                    );
                                    return;
                                }
                            }
                        }
                        Err(error) => {
                            log::warn!("failed to update {}: {error}", path.display());
                            return;
                        }
                    }
                }
                ChangeKind::Deleted => unreachable!(),
            };

            if events.is_empty() {
                // Duplicate create: the mirror already knows this path.
                return;
            }
            publish_notification(context, kind, sample.metadata);
            publish_events(context, events);
        }
    }
}

fn publish_notification(
    context: &WatchContext,
    kind: ChangeKind,
    metadata: crate::node::NodeMetadata,
) {
    context
        .bridge
        .send(OutboundMessage::Notification(RawNotification {
            kind,
            metadata,
            timestamp: Utc::now().timestamp(),
        }));
}

fn publish_events(context: &WatchContext, events: Vec<crate::node::ChangeEvent>) {
    for event in events {
        context.ledger.append(&event);
        context.bridge.send(OutboundMessage::TreeEvent(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::CreateKind;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::TempDir;

    use crate::bridge;
    use crate::node::NodeMetadata;

    #[test]
    fn repeated_modify_within_cooldown_is_suppressed() {
        let mut debouncer = Debouncer::new(Duration::from_secs(1), Duration::from_secs(2));
        let base = Instant::now();
        let path = Path::new("/watched/a.txt");

        assert!(debouncer.accept_modify(path, base));
        assert!(!debouncer.accept_modify(path, base + Duration::from_millis(500)));
        assert!(debouncer.accept_modify(path, base + Duration::from_millis(1500)));
    }

    #[test]
    fn modify_echo_after_create_is_suppressed() {
        let mut debouncer = Debouncer::new(Duration::from_secs(1), Duration::from_secs(2));
        let base = Instant::now();
        let path = Path::new("/watched/new.txt");

        debouncer.note_created(path, base);
        assert!(!debouncer.accept_modify(path, base + Duration::from_millis(100)));
        assert!(!debouncer.accept_modify(path, base + Duration::from_millis(1900)));
        // Past the creation window the path behaves like any other.
        assert!(debouncer.accept_modify(path, base + Duration::from_millis(2100)));
    }

    #[test]
    fn forget_clears_debounce_state() {
        let mut debouncer = Debouncer::new(Duration::from_secs(1), Duration::from_secs(2));
        let base = Instant::now();
        let path = Path::new("/watched/gone.txt");

        debouncer.note_created(path, base);
        debouncer.forget(path);
        assert!(debouncer.accept_modify(path, base + Duration::from_millis(100)));
    }

    #[test]
    fn debounce_state_is_per_path() {
        let mut debouncer = Debouncer::new(Duration::from_secs(1), Duration::from_secs(2));
        let base = Instant::now();

        assert!(debouncer.accept_modify(Path::new("/watched/a"), base));
        assert!(debouncer.accept_modify(Path::new("/watched/b"), base));
    }

    #[test]
    fn classify_maps_notify_kinds() {
        let missing = Path::new("/definitely/not/here");
        assert_eq!(
            classify(&EventKind::Create(CreateKind::File), missing),
            Some(ChangeKind::Created)
        );
        assert_eq!(
            classify(
                &EventKind::Remove(notify::event::RemoveKind::File),
                missing
            ),
            Some(ChangeKind::Deleted)
        );
        assert_eq!(
            classify(
                &EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content)),
                missing
            ),
            Some(ChangeKind::Modified)
        );
        assert_eq!(
            classify(&EventKind::Access(notify::event::AccessKind::Read), missing),
            None
        );
        assert_eq!(classify(&EventKind::Any, missing), Some(ChangeKind::Deleted));
        // An unpaired, unlabelled rename falls back to the probe.
        assert_eq!(
            classify(
                &EventKind::Modify(ModifyKind::Name(RenameMode::Any)),
                missing
            ),
            Some(ChangeKind::Deleted)
        );
    }

    fn context(root: &Path, ledger_dir: &Path) -> (WatchContext, crossbeam_channel::Receiver<OutboundMessage>) {
        let tree = Arc::new(TreeStore::new(root.to_path_buf()));
        tree.create_node(root, true, None).unwrap();
        tree.mark_initialized();
        let ledger = Arc::new(HistoryLedger::open(ledger_dir).unwrap());
        let (bridge, rx) = bridge::channel();
        (
            WatchContext {
                tree,
                ledger,
                bridge,
                debouncer: Debouncer::default(),
            },
            rx,
        )
    }

    #[test]
    fn created_event_updates_tree_ledger_and_bridge() {
        let watched = TempDir::new().unwrap();
        let ledger_dir = TempDir::new().unwrap();
        let (mut ctx, rx) = context(watched.path(), ledger_dir.path());

        let path = watched.path().join("a.txt");
        File::create(&path).unwrap().write_all(b"abc").unwrap();

        let event = notify::Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone());
        handle_event(&mut ctx, event);

        let node = ctx.tree.get_by_path(&path).unwrap();
        assert!(!node.is_directory);
        assert_eq!(node.metadata.size, Some(3));
        assert_eq!(ctx.ledger.len(), 1);

        // One raw notification plus one tree event.
        let first = rx.try_recv().unwrap();
        assert!(matches!(first, OutboundMessage::Notification(_)));
        let second = rx.try_recv().unwrap();
        assert!(matches!(second, OutboundMessage::TreeEvent(_)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn modify_echo_after_create_yields_single_change_event() {
        let watched = TempDir::new().unwrap();
        let ledger_dir = TempDir::new().unwrap();
        let (mut ctx, _rx) = context(watched.path(), ledger_dir.path());

        let path = watched.path().join("echo.txt");
        File::create(&path).unwrap().write_all(b"x").unwrap();

        handle_event(
            &mut ctx,
            notify::Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone()),
        );
        handle_event(
            &mut ctx,
            notify::Event::new(EventKind::Modify(ModifyKind::Data(
                notify::event::DataChange::Content,
            )))
            .add_path(path.clone()),
        );

        // Only the creation reached the ledger.
        assert_eq!(ctx.ledger.len(), 1);
    }

    #[test]
    fn deleted_event_removes_subtree() {
        let watched = TempDir::new().unwrap();
        let ledger_dir = TempDir::new().unwrap();
        let (mut ctx, _rx) = context(watched.path(), ledger_dir.path());

        let sub = watched.path().join("sub");
        fs::create_dir(&sub).unwrap();
        File::create(sub.join("b.txt")).unwrap();
        ctx.tree.create_node(&sub.join("b.txt"), false, None).unwrap();

        fs::remove_dir_all(&sub).unwrap();
        handle_event(
            &mut ctx,
            notify::Event::new(EventKind::Remove(notify::event::RemoveKind::Folder))
                .add_path(sub.clone()),
        );

        assert!(ctx.tree.get_by_path(&sub).is_err());
        assert!(ctx.tree.get_by_path(&sub.join("b.txt")).is_err());
        // Two deletions, leaf before parent.
        let deleted = ctx.ledger.query(&crate::ledger::LedgerQuery {
            kind: Some(ChangeKind::Deleted),
            ..Default::default()
        });
        assert_eq!(deleted.len(), 2);
        assert_eq!(deleted[0].path, sub.join("b.txt"));
        assert_eq!(deleted[1].path, sub);
    }

    #[test]
    fn paired_rename_moves_node_to_new_path() {
        let watched = TempDir::new().unwrap();
        let ledger_dir = TempDir::new().unwrap();
        let (mut ctx, _rx) = context(watched.path(), ledger_dir.path());

        let old = watched.path().join("old.txt");
        let new = watched.path().join("new.txt");
        File::create(&old).unwrap().write_all(b"x").unwrap();
        ctx.tree.create_node(&old, false, None).unwrap();

        fs::rename(&old, &new).unwrap();
        handle_event(
            &mut ctx,
            notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path(old.clone())
                .add_path(new.clone()),
        );

        // The old name is gone from the mirror, the new one indexed.
        assert!(ctx.tree.get_by_path(&old).is_err());
        assert!(ctx.tree.get_by_path(&new).is_ok());

        let deleted = ctx.ledger.query(&crate::ledger::LedgerQuery {
            kind: Some(ChangeKind::Deleted),
            ..Default::default()
        });
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].path, old);
        let created = ctx.ledger.query(&crate::ledger::LedgerQuery {
            kind: Some(ChangeKind::Created),
            ..Default::default()
        });
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].path, new);
    }

    #[test]
    fn paired_rename_of_unindexed_path_still_indexes_target() {
        let watched = TempDir::new().unwrap();
        let ledger_dir = TempDir::new().unwrap();
        let (mut ctx, _rx) = context(watched.path(), ledger_dir.path());

        // Moved in from outside the watched root: only the new path is
        // known to the filesystem, the old one was never indexed.
        let old = watched.path().join("never-seen.txt");
        let new = watched.path().join("arrived.txt");
        File::create(&new).unwrap();

        handle_event(
            &mut ctx,
            notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path(old)
                .add_path(new.clone()),
        );

        assert!(ctx.tree.get_by_path(&new).is_ok());
        assert_eq!(ctx.ledger.len(), 1);
    }

    #[test]
    fn vanished_path_drops_intent() {
        let watched = TempDir::new().unwrap();
        let ledger_dir = TempDir::new().unwrap();
        let (mut ctx, rx) = context(watched.path(), ledger_dir.path());

        let ghost = watched.path().join("ghost.txt");
        handle_event(
            &mut ctx,
            notify::Event::new(EventKind::Create(CreateKind::File)).add_path(ghost.clone()),
        );

        assert!(ctx.tree.get_by_path(&ghost).is_err());
        assert_eq!(ctx.ledger.len(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn duplicate_create_publishes_nothing() {
        let watched = TempDir::new().unwrap();
        let ledger_dir = TempDir::new().unwrap();
        let (mut ctx, rx) = context(watched.path(), ledger_dir.path());

        let path = watched.path().join("dup.txt");
        File::create(&path).unwrap();
        ctx.tree.create_node(&path, false, None).unwrap();

        handle_event(
            &mut ctx,
            notify::Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone()),
        );

        assert_eq!(ctx.ledger.len(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn directory_events_bypass_debouncing() {
        let watched = TempDir::new().unwrap();
        let ledger_dir = TempDir::new().unwrap();
        let (mut ctx, _rx) = context(watched.path(), ledger_dir.path());

        let dir = watched.path().join("d");
        fs::create_dir(&dir).unwrap();

        handle_event(
            &mut ctx,
            notify::Event::new(EventKind::Create(CreateKind::Folder)).add_path(dir.clone()),
        );
        handle_event(
            &mut ctx,
            notify::Event::new(EventKind::Modify(ModifyKind::Metadata(
                notify::event::MetadataKind::WriteTime,
            )))
            .add_path(dir.clone()),
        );

        // Create plus modify, nothing suppressed for the directory.
        assert_eq!(ctx.ledger.len(), 2);
    }
}
