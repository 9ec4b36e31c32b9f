//! Assembly and lifecycle of the whole mirror.
//!
//! [`Mirror::start`] wires the pieces in dependency order and
//! [`Mirror::shutdown`] tears them down in the reverse order that
//! keeps the ledger complete: stop the mutator first, drain the bridge
//! next, close subscribers, flush last.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::{self, BridgeConsumer, DEFAULT_POLL_INTERVAL};
use crate::error::Result;
use crate::hub::{SubscriberHub, DEFAULT_SUBSCRIBER_BUFFER};
use crate::ledger::HistoryLedger;
use crate::scan::{self, ScanSummary};
use crate::tree::TreeStore;
use crate::watch::{WatchAdapter, WatchConfig, DEFAULT_CREATE_WINDOW, DEFAULT_MODIFY_COOLDOWN};

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Directory to watch and mirror.
    pub root: PathBuf,
    /// Directory holding the history log and current-state index.
    pub ledger_dir: PathBuf,
    pub poll_interval: Duration,
    pub modify_cooldown: Duration,
    pub create_window: Duration,
    pub subscriber_buffer: usize,
}

impl MirrorConfig {
    pub fn new(root: PathBuf, ledger_dir: PathBuf) -> Self {
        Self {
            root,
            ledger_dir,
            poll_interval: DEFAULT_POLL_INTERVAL,
            modify_cooldown: DEFAULT_MODIFY_COOLDOWN,
            create_window: DEFAULT_CREATE_WINDOW,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

/// A running mirror: tree, ledger, hubs, watcher, and the bridge
/// consumer, all live.
pub struct Mirror {
    tree: Arc<TreeStore>,
    ledger: Arc<HistoryLedger>,
    monitor_hub: Arc<SubscriberHub>,
    filesystem_hub: Arc<SubscriberHub>,
    watch: Option<WatchAdapter>,
    consumer: Option<BridgeConsumer>,
    scan_summary: ScanSummary,
}

impl Mirror {
    /// Starts every component and runs the bootstrap scan. Must be
    /// called from within a tokio runtime; the bridge consumer is
    /// spawned onto it.
    ///
    /// The watcher starts before the scan so that changes racing the
    /// scan are not lost; the idempotent insert path makes the overlap
    /// harmless.
    pub fn start(config: MirrorConfig) -> Result<Self> {
        let ledger = Arc::new(HistoryLedger::open(&config.ledger_dir)?);
        let tree = Arc::new(TreeStore::new(config.root.clone()));

        let monitor_hub = Arc::new(SubscriberHub::new(config.subscriber_buffer));
        let filesystem_hub = Arc::new(SubscriberHub::new(config.subscriber_buffer));

        let (event_bridge, bridge_rx) = bridge::channel();
        let consumer = BridgeConsumer::spawn(
            bridge_rx,
            monitor_hub.clone(),
            filesystem_hub.clone(),
            config.poll_interval,
        );

        if !config.root.exists() {
            std::fs::create_dir_all(&config.root)?;
        }
        let watch = WatchAdapter::start(
            tree.clone(),
            ledger.clone(),
            event_bridge,
            WatchConfig {
                modify_cooldown: config.modify_cooldown,
                create_window: config.create_window,
            },
        )?;

        let scan_summary = scan::bootstrap_scan(&tree, &ledger)?;

        Ok(Self {
            tree,
            ledger,
            monitor_hub,
            filesystem_hub,
            watch: Some(watch),
            consumer: Some(consumer),
            scan_summary,
        })
    }

    pub fn tree(&self) -> &Arc<TreeStore> {
        &self.tree
    }

    pub fn ledger(&self) -> &Arc<HistoryLedger> {
        &self.ledger
    }

    pub fn monitor_hub(&self) -> &Arc<SubscriberHub> {
        &self.monitor_hub
    }

    pub fn filesystem_hub(&self) -> &Arc<SubscriberHub> {
        &self.filesystem_hub
    }

    pub fn scan_summary(&self) -> ScanSummary {
        self.scan_summary
    }

    /// Orderly teardown. The sequence matters: stopping the watcher
    /// first means the bridge drain sees every event that will ever be
    /// produced, and the final flush leaves the ledger complete.
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(watch) = self.watch.take() {
            watch.stop();
        }
        if let Some(consumer) = self.consumer.take() {
            consumer.shutdown().await;
        }
        self.monitor_hub.close_all();
        self.filesystem_hub.close_all();
        self.ledger.flush()?;
        log::info!("mirror shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn config(root: &TempDir, ledger: &TempDir) -> MirrorConfig {
        MirrorConfig {
            // Short poll so tests observe fan-out quickly.
            poll_interval: Duration::from_millis(10),
            ..MirrorConfig::new(root.path().to_path_buf(), ledger.path().to_path_buf())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_scan_and_shutdown() {
        let root = TempDir::new().unwrap();
        let ledger_dir = TempDir::new().unwrap();
        File::create(root.path().join("seed.txt"))
            .unwrap()
            .write_all(b"seed")
            .unwrap();

        let mut mirror = Mirror::start(config(&root, &ledger_dir)).unwrap();

        assert!(mirror.tree().is_initialized());
        assert_eq!(mirror.scan_summary().files, 1);
        assert!(mirror
            .tree()
            .get_by_path(&root.path().join("seed.txt"))
            .is_ok());

        mirror.shutdown().await.unwrap();
        // History survives the shutdown flush.
        assert!(ledger_dir.path().join("history.jsonl").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn live_change_reaches_subscriber() {
        let root = TempDir::new().unwrap();
        let ledger_dir = TempDir::new().unwrap();
        let mut mirror = Mirror::start(config(&root, &ledger_dir)).unwrap();

        let (_, mut rx) = mirror.filesystem_hub().connect();

        File::create(root.path().join("live.txt"))
            .unwrap()
            .write_all(b"live")
            .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no fan-out within timeout")
            .expect("hub closed early");
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["type"], "created");
        assert_eq!(value["node"]["name"], "live.txt");

        mirror.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_is_idempotent_on_components() {
        let root = TempDir::new().unwrap();
        let ledger_dir = TempDir::new().unwrap();
        let mut mirror = Mirror::start(config(&root, &ledger_dir)).unwrap();

        mirror.shutdown().await.unwrap();
        // A second call has nothing left to stop and still succeeds.
        mirror.shutdown().await.unwrap();
    }
}
