//! Cross-thread event handoff.
//!
//! The watch thread is blocking-capable; the fan-out side runs on the
//! tokio runtime. Messages cross over an unbounded crossbeam channel —
//! the producer must never block on downstream delivery, and the
//! accepted cost is queue growth while the consumer is stalled. The
//! consumer drains everything queued on each tick, dispatches it, and
//! sleeps for the poll interval: worst-case delivery latency is the
//! poll interval plus broadcast time. Enqueue order is preserved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::hub::SubscriberHub;
use crate::node::{ChangeEvent, ChangeKind, NodeMetadata};

/// How often the consumer wakes to drain the queue. The sole latency
/// knob in the system.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Wire shape of the raw notification channel: the intent as observed
/// by the watch adapter, before it touched the tree.
#[derive(Debug, Clone, Serialize)]
pub struct RawNotification {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub metadata: NodeMetadata,
    /// Epoch seconds.
    pub timestamp: i64,
}

/// A message queued for fan-out. The two channels are deliberately not
/// unified: raw notifications go to the monitor hub, tree-mirror
/// events to the filesystem hub.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Notification(RawNotification),
    TreeEvent(ChangeEvent),
}

impl OutboundMessage {
    /// Serializes into the wire form for the respective channel.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Notification(raw) => {
                serde_json::to_string(raw).unwrap_or_else(|_| "{}".to_string())
            }
            Self::TreeEvent(event) => json!({
                "type": event.kind,
                "node": {
                    "id": event.node.id,
                    "name": event.node.name,
                    "path": event.node.path,
                    "is_directory": event.node.is_directory,
                    "metadata": event.node.metadata,
                },
            })
            .to_string(),
        }
    }
}

/// Sending half of the bridge, cloned into the watch thread.
#[derive(Debug, Clone)]
pub struct EventBridge {
    tx: Sender<OutboundMessage>,
}

impl EventBridge {
    /// Enqueues without blocking. A send after the consumer is gone is
    /// silently dropped — shutdown stops the producer first, so this
    /// only happens in teardown races.
    pub fn send(&self, message: OutboundMessage) {
        let _ = self.tx.send(message);
    }
}

/// Creates the bridge pair: a cloneable sender and the consumer's
/// receiving half.
pub fn channel() -> (EventBridge, Receiver<OutboundMessage>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (EventBridge { tx }, rx)
}

/// The fixed-interval polling consumer task.
#[derive(Debug)]
pub struct BridgeConsumer {
    stop: Arc<AtomicBool>,
    wake: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl BridgeConsumer {
    /// Spawns the consumer onto the current tokio runtime.
    pub fn spawn(
        rx: Receiver<OutboundMessage>,
        monitor_hub: Arc<SubscriberHub>,
        filesystem_hub: Arc<SubscriberHub>,
        poll_interval: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let stop_flag = stop.clone();
        let wake_signal = wake.clone();

        let handle = tokio::spawn(async move {
            loop {
                while let Ok(message) = rx.try_recv() {
                    dispatch(&monitor_hub, &filesystem_hub, &message);
                }
                if stop_flag.load(Ordering::Acquire) {
                    // Producer is already stopped by shutdown ordering;
                    // one final drain flushes anything left in flight.
                    while let Ok(message) = rx.try_recv() {
                        dispatch(&monitor_hub, &filesystem_hub, &message);
                    }
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = wake_signal.notified() => {}
                }
            }
        });

        Self { stop, wake, handle }
    }

    /// Signals the loop to drain once more and stop, then waits for it.
    pub async fn shutdown(self) {
        self.stop.store(true, Ordering::Release);
        self.wake.notify_one();
        let _ = self.handle.await;
    }
}

fn dispatch(
    monitor_hub: &SubscriberHub,
    filesystem_hub: &SubscriberHub,
    message: &OutboundMessage,
) {
    let wire = message.to_wire();
    match message {
        OutboundMessage::Notification(_) => {
            monitor_hub.broadcast(&wire);
        }
        OutboundMessage::TreeEvent(_) => {
            filesystem_hub.broadcast(&wire);
        }
    }
}
