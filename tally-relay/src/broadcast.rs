//! Fan-out of encoded events to room members.
//!
//! Every live connection owns a bounded outbox (tokio mpsc). The dispatcher
//! enqueues while it still holds the room lock, so members see snapshots in
//! the order the mutations happened. Enqueueing never waits: a full or
//! closed outbox drops the frame and the drop is counted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};

use crate::session::ConnectionId;

/// One encoded text frame, shared between all recipients.
pub type Frame = Arc<str>;

/// Sending half of a connection's outbox.
pub type Outbox = mpsc::Sender<Frame>;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

/// Atomic counters, updated without taking the outbox lock for writing.
#[derive(Default)]
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

#[derive(Default)]
pub struct Broadcaster {
    outboxes: RwLock<HashMap<ConnectionId, Outbox>>,
    stats: AtomicBroadcastStats,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an outbox of `capacity` frames for `conn`, returning the
    /// receiving half for the transport's writer.
    pub async fn open(&self, conn: ConnectionId, capacity: usize) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.register(conn, tx).await;
        rx
    }

    pub async fn register(&self, conn: ConnectionId, outbox: Outbox) {
        self.outboxes.write().await.insert(conn, outbox);
    }

    pub async fn unregister(&self, conn: &ConnectionId) -> bool {
        self.outboxes.write().await.remove(conn).is_some()
    }

    /// Deliver a frame to a single connection.
    pub async fn send_to(&self, conn: &ConnectionId, frame: Frame) -> bool {
        let outboxes = self.outboxes.read().await;
        match outboxes.get(conn) {
            Some(outbox) => self.deliver(conn, outbox, frame),
            None => false,
        }
    }

    /// Deliver a frame to every registered connection in `members`.
    ///
    /// Returns the number of outboxes that accepted it.
    pub async fn broadcast<'a>(
        &self,
        members: impl IntoIterator<Item = &'a ConnectionId>,
        frame: Frame,
    ) -> usize {
        let outboxes = self.outboxes.read().await;
        members
            .into_iter()
            .filter_map(|conn| outboxes.get(conn).map(|outbox| (conn, outbox)))
            .filter(|(conn, outbox)| self.deliver(conn, outbox, frame.clone()))
            .count()
    }

    fn deliver(&self, conn: &ConnectionId, outbox: &Outbox, frame: Frame) -> bool {
        match outbox.try_send(frame) {
            Ok(()) => {
                self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Outbox for {conn} is full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("Outbox for {conn} is closed");
                false
            }
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.outboxes.read().await.len()
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: self.peer_count().await,
        }
    }
}
