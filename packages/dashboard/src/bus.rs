use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tracing::debug;

type Registry = HashMap<u64, mpsc::Sender<()>>;

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<Registry>,
    next_id: AtomicU64,
}

impl BusInner {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Process-wide `refresh-data` broadcast.
///
/// Carries no payload: receivers re-check their own data. Signals that
/// arrive while a subscriber still has one pending are folded into it.
#[derive(Clone, Default)]
pub struct RefreshBus {
    inner: Arc<BusInner>,
}

impl RefreshBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. It stays registered until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(1);
        let count = {
            let mut subscribers = self.inner.lock();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        debug!(subscriber_id = id, subscribers = count, "Refresh bus subscription added");

        Subscription {
            id,
            receiver: rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Send `refresh-data` to every current subscriber; returns how many were reached
    pub fn publish(&self) -> usize {
        let mut subscribers = self.inner.lock();
        subscribers.retain(|_, tx| !tx.is_closed());
        for tx in subscribers.values() {
            // a full slot already holds an undelivered signal
            let _ = tx.try_send(());
        }
        debug!(subscribers = subscribers.len(), "Published refresh-data");
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Registration on the [`RefreshBus`]; deregisters on drop
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<()>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Wait for the next `refresh-data` signal
    pub async fn recv(&mut self) -> Option<()> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.lock().remove(&self.id);
            debug!(subscriber_id = self.id, "Refresh bus subscription released");
        }
    }
}
