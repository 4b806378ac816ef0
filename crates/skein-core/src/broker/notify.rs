use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::storage::{keys, Storage, WriteBatchOp};

/// Emitted after an enqueue commits to a queue with notifications enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertNotification {
    pub queue: String,
    pub at: u64,
}

/// Per-queue throttle state. Only `throttle_interval_ms` is persisted;
/// `last_notified_at` starts empty after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyThrottle {
    pub throttle_interval_ms: u64,
    #[serde(skip)]
    pub last_notified_at: Option<u64>,
}

impl NotifyThrottle {
    fn due(&self, now_ms: u64) -> bool {
        match self.last_notified_at {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.throttle_interval_ms,
        }
    }
}

/// Decides, per queue, whether an enqueue produces an `InsertNotification`.
pub(crate) struct Notifier {
    storage: Arc<dyn Storage>,
    throttles: Mutex<HashMap<String, NotifyThrottle>>,
    tx: broadcast::Sender<InsertNotification>,
}

impl Notifier {
    /// Restore persisted settings from the `state` column family.
    pub fn load(storage: Arc<dyn Storage>, channel_capacity: usize) -> StorageResult<Self> {
        let mut throttles = HashMap::new();
        for (key, value) in storage.list_state_by_prefix(keys::NOTIFY_PREFIX)? {
            let queue = key
                .strip_prefix(keys::NOTIFY_PREFIX)
                .ok_or_else(|| StorageError::CorruptData(format!("bad notify key {key:?}")))?;
            let throttle: NotifyThrottle = serde_json::from_slice(&value)?;
            throttles.insert(queue.to_string(), throttle);
        }

        let (tx, _) = broadcast::channel(channel_capacity.max(1));
        Ok(Self {
            storage,
            throttles: Mutex::new(throttles),
            tx,
        })
    }

    /// Enable notifications for `queue`, or update the interval if already
    /// enabled. The caller validates the queue and the interval.
    pub fn enable(&self, queue: &str, throttle_interval_ms: u64) -> StorageResult<()> {
        let mut throttles = self.throttles.lock();
        let last_notified_at = throttles.get(queue).and_then(|t| t.last_notified_at);
        let throttle = NotifyThrottle {
            throttle_interval_ms,
            last_notified_at,
        };
        self.storage.write_batch(vec![WriteBatchOp::PutState {
            key: keys::notify_key(queue).into_bytes(),
            value: serde_json::to_vec(&throttle)?,
        }])?;
        throttles.insert(queue.to_string(), throttle);
        Ok(())
    }

    /// Returns whether notifications were enabled.
    pub fn disable(&self, queue: &str) -> StorageResult<bool> {
        let mut throttles = self.throttles.lock();
        if !throttles.contains_key(queue) {
            return Ok(false);
        }
        self.storage.write_batch(vec![WriteBatchOp::DeleteState {
            key: keys::notify_key(queue).into_bytes(),
        }])?;
        throttles.remove(queue);
        Ok(true)
    }

    /// Called after an enqueue to `queue` has committed. Returns whether a
    /// notification was emitted.
    pub fn on_enqueued(&self, queue: &str, now_ms: u64) -> bool {
        let mut throttles = self.throttles.lock();
        let Some(throttle) = throttles.get_mut(queue) else {
            return false;
        };
        if !throttle.due(now_ms) {
            return false;
        }
        throttle.last_notified_at = Some(now_ms);
        drop(throttles);

        let notification = InsertNotification {
            queue: queue.to_string(),
            at: now_ms,
        };
        // a send error only means nobody is subscribed right now
        if self.tx.send(notification).is_err() {
            debug!(queue = %queue, "insert notification has no subscribers");
        }
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InsertNotification> {
        self.tx.subscribe()
    }

    pub fn settings(&self, queue: &str) -> Option<NotifyThrottle> {
        self.throttles.lock().get(queue).cloned()
    }

    /// Every queue with notifications enabled, ordered by name.
    pub fn list(&self) -> Vec<(String, NotifyThrottle)> {
        let mut all: Vec<_> = self
            .throttles
            .lock()
            .iter()
            .map(|(queue, throttle)| (queue.clone(), throttle.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Drop in-memory state for a queue whose settings row was deleted as part
    /// of the queue's cascade.
    pub fn forget(&self, queue: &str) {
        if self.throttles.lock().remove(queue).is_some() {
            debug!(queue = %queue, "notify settings removed with queue");
        }
    }
}
