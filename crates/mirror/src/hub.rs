//! Live subscriber registry and fan-out.
//!
//! Each subscriber owns the receiving half of a bounded channel; the
//! hub try-sends into the sending halves. A send that fails — the
//! receiver is gone, or its buffer is full because the subscriber has
//! stopped draining — marks that connection for removal without
//! interrupting delivery to the rest. Removals are applied only after
//! the full fan-out pass.
//!
//! Delivery is best-effort and at-most-once; there is no replay. The
//! durable record of every change is the ledger's job, not the hub's.

use parking_lot::Mutex;
use tokio::sync::mpsc;

pub type SubscriberId = u64;

/// Per-connection buffer: messages queued for a subscriber that has
/// not drained them yet. Once full the connection counts as broken.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug)]
struct Subscriber {
    id: SubscriberId,
    sender: mpsc::Sender<String>,
}

#[derive(Debug, Default)]
struct HubInner {
    next_id: SubscriberId,
    connections: Vec<Subscriber>,
}

/// Tracks live subscriber connections and fans out serialized events.
#[derive(Debug)]
pub struct SubscriberHub {
    buffer: usize,
    inner: Mutex<HubInner>,
}

impl SubscriberHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer,
            inner: Mutex::new(HubInner::default()),
        }
    }

    /// Registers a new subscriber and returns its id plus the receiving
    /// half the connection handler forwards to the wire.
    pub fn connect(&self) -> (SubscriberId, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.connections.push(Subscriber { id, sender });
        log::debug!("subscriber {id} connected ({} live)", inner.connections.len());
        (id, receiver)
    }

    /// Unregisters a subscriber. Idempotent; removing an id that is
    /// already gone is a no-op.
    pub fn disconnect(&self, id: SubscriberId) {
        let mut inner = self.inner.lock();
        inner.connections.retain(|conn| conn.id != id);
    }

    /// Sends `message` directly to one subscriber, e.g. a reply to a
    /// client request. Returns false if the connection is gone or full.
    pub fn send_to(&self, id: SubscriberId, message: &str) -> bool {
        let inner = self.inner.lock();
        inner
            .connections
            .iter()
            .find(|conn| conn.id == id)
            .map(|conn| conn.sender.try_send(message.to_owned()).is_ok())
            .unwrap_or(false)
    }

    /// Attempts delivery to every registered connection. Failed
    /// connections are pruned after the pass completes, never
    /// mid-iteration. Returns the number of successful deliveries.
    pub fn broadcast(&self, message: &str) -> usize {
        let mut inner = self.inner.lock();
        let mut dead: Vec<SubscriberId> = Vec::new();
        let mut delivered = 0;

        for conn in &inner.connections {
            match conn.sender.try_send(message.to_owned()) {
                Ok(()) => delivered += 1,
                Err(_) => dead.push(conn.id),
            }
        }

        if !dead.is_empty() {
            log::warn!("pruning {} broken subscriber connection(s)", dead.len());
            inner.connections.retain(|conn| !dead.contains(&conn.id));
        }

        delivered
    }

    /// Drops every connection; their receivers observe channel close.
    pub fn close_all(&self) {
        let mut inner = self.inner.lock();
        inner.connections.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().connections.is_empty()
    }
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}
