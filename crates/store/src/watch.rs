//! Change fan-out: committed deltas are broadcast to every watcher; each watcher filters by kind and namespace.

use rulestore_core::{Delta, ObjectKey};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Publisher side, owned by a store.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Delta>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish after commit. Having no watchers is not an error.
    pub fn publish(&self, d: Delta) {
        let n = self.tx.send(d).unwrap_or(0);
        metrics::counter!("watch_events_total", 1u64);
        if n > 0 { debug!(receivers = n, "watch: event published"); }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Delta> { self.tx.subscribe() }
}

/// Filtered view over a store's change stream.
pub struct Watcher {
    rx: broadcast::Receiver<Delta>,
    kind: String,
    namespace: Option<String>,
    skipped: u64,
}

impl Watcher {
    pub fn new(rx: broadcast::Receiver<Delta>, kind: impl Into<String>, namespace: Option<&str>) -> Self {
        Self { rx, kind: kind.into(), namespace: namespace.map(str::to_string), skipped: 0 }
    }

    fn wants(&self, key: &ObjectKey) -> bool {
        key.kind == self.kind && self.namespace.as_deref().map_or(true, |ns| key.namespace == ns)
    }

    /// Events this watcher lost by falling behind.
    pub fn skipped(&self) -> u64 { self.skipped }

    /// Next matching event; `None` once the store is gone.
    pub async fn next(&mut self) -> Option<Delta> {
        loop {
            match self.rx.recv().await {
                Ok(d) if self.wants(&d.key) => return Some(d),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => self.lagged(n),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Watcher::next`]; `None` when nothing matching is queued.
    pub fn try_next(&mut self) -> Option<Delta> {
        loop {
            match self.rx.try_recv() {
                Ok(d) if self.wants(&d.key) => return Some(d),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.lagged(n),
                Err(_) => return None,
            }
        }
    }

    fn lagged(&mut self, n: u64) {
        self.skipped += n;
        metrics::counter!("watch_lagged_total", n);
        warn!(kind = %self.kind, skipped = n, "watch: receiver lagged; events skipped");
    }
}
