use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Sent to subscribers after each successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphUpdate {
    /// Increases by one per published graph, starting at 1.
    pub generation: u64,
    pub path: PathBuf,
    pub nodes: usize,
    pub edges: usize,
    pub duration_ms: u64,
    pub completed_at: SystemTime,
}

type Senders = DashMap<u64, mpsc::Sender<GraphUpdate>>;

/// Fan-out of [`GraphUpdate`]s to any number of subscribers.
///
/// Each subscriber owns a bounded queue. Delivery uses `try_send`, so a
/// subscriber whose queue is full misses the new update (drop-newest) and a
/// publish never waits on a slow reader. Dropping the [`Subscription`]
/// unregisters it.
pub struct SubscriberRegistry {
    senders: Arc<Senders>,
    next_id: AtomicU64,
    capacity: usize,
}

/// Outcome of one [`SubscriberRegistry::broadcast`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
    pub closed: usize,
}

impl SubscriberRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            senders: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.senders.insert(id, tx);
        debug!("subscriber {id} registered");
        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.senders),
        }
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    pub fn broadcast(&self, update: &GraphUpdate) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut closed = Vec::new();

        for entry in self.senders.iter() {
            match entry.value().try_send(update.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    warn!(
                        "subscriber {} queue full, dropping update for generation {}",
                        entry.key(),
                        update.generation
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        // Removal has to wait until the iterator's shard locks are released.
        for id in closed {
            self.senders.remove(&id);
            report.closed += 1;
        }

        report
    }
}

/// Receiving end of a subscription. Dropping it leaves the fan-out set.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<GraphUpdate>,
    registry: Weak<Senders>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next update. `None` once the coordinator is gone.
    /// Cancel-safe: dropping the future loses nothing.
    pub async fn recv(&mut self) -> Option<GraphUpdate> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<GraphUpdate> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(senders) = self.registry.upgrade() {
            senders.remove(&self.id);
            debug!("subscriber {} unregistered", self.id);
        }
    }
}
