//! Live progress fan-out.
//!
//! Producers publish partial JSON documents. The hub folds each patch into a
//! full snapshot; observers start from that snapshot and fold subsequent
//! patches into their own copy, so late joiners see the same state as early
//! ones.

use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast};

use crate::store::JobCounts;

const CHANNEL_CAPACITY: usize = 256;

/// Recursively merges `patch` into `target`: objects merge key by key,
/// anything else replaces the target value.
pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

pub fn initial_snapshot() -> Value {
    json!({
        "scanning": {"manga": 0, "chapters": 0},
        "downloading": {"current": 0, "of": 0},
        "editing": {"chapters": 0},
    })
}

struct HubInner {
    state: Mutex<Value>,
    tx: broadcast::Sender<Value>,
}

/// Cheaply clonable handle to the progress channel.
#[derive(Clone)]
pub struct ProgressHub {
    inner: Arc<HubInner>,
}

impl fmt::Debug for ProgressHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ProgressHub");
        if let Ok(state) = self.inner.state.try_lock() {
            debug.field("state", &*state);
        }
        debug
            .field("observers", &self.inner.tx.receiver_count())
            .finish()
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(initial_snapshot()),
                tx,
            }),
        }
    }

    /// Folds `patch` into the snapshot and forwards it to observers.
    pub async fn publish(&self, patch: Value) {
        let mut state = self.inner.state.lock().await;
        deep_merge(&mut state, &patch);
        // No observers is fine; the snapshot still advances.
        let _ = self.inner.tx.send(patch);
    }

    pub async fn snapshot(&self) -> Value {
        self.inner.state.lock().await.clone()
    }

    /// Subscribes and seeds the observer with the current snapshot.
    pub async fn subscribe(&self) -> ProgressObserver {
        let state = self.inner.state.lock().await;
        // Subscribing under the lock means no patch falls between the
        // snapshot and the receiver.
        let rx = self.inner.tx.subscribe();
        ProgressObserver {
            hub: self.clone(),
            snapshot: state.clone(),
            rx,
        }
    }

    pub async fn downloading(&self, current: usize, of: usize) {
        self.publish(json!({"downloading": {"current": current, "of": of}}))
            .await;
    }

    pub async fn backlog(&self, counts: JobCounts) {
        self.publish(json!({
            "scanning": {"manga": counts.manga, "chapters": counts.chapters},
            "editing": {"chapters": counts.edits},
        }))
        .await;
    }
}

/// A subscriber's merged view of progress.
pub struct ProgressObserver {
    hub: ProgressHub,
    snapshot: Value,
    rx: broadcast::Receiver<Value>,
}

impl fmt::Debug for ProgressObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressObserver")
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

impl ProgressObserver {
    pub fn snapshot(&self) -> &Value {
        &self.snapshot
    }

    /// Waits for the next patch and returns the updated snapshot, or `None`
    /// once the hub is gone. A lagging observer resynchronizes from the
    /// hub's snapshot.
    pub async fn next(&mut self) -> Option<&Value> {
        match self.rx.recv().await {
            Ok(patch) => {
                deep_merge(&mut self.snapshot, &patch);
                Some(&self.snapshot)
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(target: "progress", skipped, "observer lagged, resyncing");
                self.snapshot = self.hub.snapshot().await;
                Some(&self.snapshot)
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Applies every patch already queued without waiting.
    pub fn drain(&mut self) -> &Value {
        loop {
            match self.rx.try_recv() {
                Ok(patch) => deep_merge(&mut self.snapshot, &patch),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        &self.snapshot
    }
}
