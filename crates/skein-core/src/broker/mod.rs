pub mod config;
mod index;
mod lease;
pub mod metrics;
mod notify;
mod router;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{AdminError, NotifyError, StorageError, StorageResult};
use crate::queue::{validate_queue_name, QueueMeta};
use crate::routing::BindingDirectory;
use crate::storage::{keys, RocksDbStorage, Storage, WriteBatchOp};

use index::MessageIndex;

pub use config::BrokerConfig;
pub use metrics::Metrics;
pub use notify::{InsertNotification, NotifyThrottle};

use notify::Notifier;

/// Mutable per-queue state guarded by the queue's mutex.
struct QueueState {
    /// Highest id assigned so far. Mirrors the persisted sequence row.
    last_id: u64,
    /// Set once the queue's cascade has committed. Handles can outlive the
    /// registry entry, so every operation re-checks this after locking.
    dropped: bool,
    /// Live messages by visibility. Updated only after a batch commits.
    index: MessageIndex,
}

struct QueueHandle {
    name: String,
    state: Mutex<QueueState>,
}

impl QueueHandle {
    fn new(name: String, last_id: u64, index: MessageIndex) -> Self {
        Self {
            name,
            state: Mutex::new(QueueState {
                last_id,
                dropped: false,
                index,
            }),
        }
    }

    /// Lock the queue unless it has been dropped.
    fn lock_live(&self) -> Option<MutexGuard<'_, QueueState>> {
        let state = self.state.lock();
        (!state.dropped).then_some(state)
    }
}

/// Queue engine: per-queue leased message stores plus the topic router.
///
/// `Broker` is `Send + Sync`; share it behind an `Arc`. Each queue has its
/// own mutex, the binding directory has a reader/writer lock and the notifier
/// has its own mutex. When more than one is needed they are taken in that
/// order, and a publish locks its target queues in ascending name order.
pub struct Broker {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    config: BrokerConfig,
    queues: RwLock<HashMap<String, Arc<QueueHandle>>>,
    directory: BindingDirectory,
    notifier: Notifier,
    metrics: Metrics,
}

impl Broker {
    /// Open (or create) the RocksDB database under `config.storage.data_dir`.
    #[tracing::instrument(skip_all, fields(data_dir = %config.storage.data_dir.display()))]
    pub fn open(config: BrokerConfig) -> StorageResult<Self> {
        let storage = Arc::new(RocksDbStorage::open(&config.storage.data_dir)?);
        Self::new(storage, config)
    }

    pub fn new(storage: Arc<dyn Storage>, config: BrokerConfig) -> StorageResult<Self> {
        Self::with_clock(storage, config, Arc::new(SystemClock))
    }

    /// Build a broker over existing storage with an explicit time source.
    pub fn with_clock(
        storage: Arc<dyn Storage>,
        config: BrokerConfig,
        clock: Arc<dyn Clock>,
    ) -> StorageResult<Self> {
        Self::with_parts(storage, config, clock, Metrics::new())
    }

    pub(crate) fn with_parts(
        storage: Arc<dyn Storage>,
        config: BrokerConfig,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> StorageResult<Self> {
        let mut queues = HashMap::new();
        for meta in storage.list_queues()? {
            let last_id = match storage.get_state(&keys::sequence_key(&meta.name))? {
                Some(raw) => keys::parse_sequence_value(&raw).ok_or_else(|| {
                    StorageError::CorruptData(format!(
                        "bad sequence value for queue {}",
                        meta.name
                    ))
                })?,
                None => 0,
            };
            let index = recover_index(storage.as_ref(), &meta.name)?;
            debug!(queue = %meta.name, last_id, messages = index.len(), "queue recovered");
            queues.insert(
                meta.name.clone(),
                Arc::new(QueueHandle::new(meta.name, last_id, index)),
            );
        }

        let directory = BindingDirectory::load(Arc::clone(&storage))?;
        let notifier = Notifier::load(Arc::clone(&storage), config.notify.channel_capacity)?;

        info!(
            queues = queues.len(),
            bindings = directory.len(),
            "broker opened"
        );

        Ok(Self {
            storage,
            clock,
            config,
            queues: RwLock::new(queues),
            directory,
            notifier,
            metrics,
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    fn queue_handle(&self, name: &str) -> Option<Arc<QueueHandle>> {
        self.queues.read().get(name).cloned()
    }

    /// Called once an enqueue to `queue` has committed.
    fn after_enqueue(&self, queue: &str, count: u64, now_ms: u64) {
        self.metrics.record_enqueue(queue, count);
        if self.notifier.on_enqueued(queue, now_ms) {
            self.metrics.record_notify(queue);
        }
    }

    // --- Queue administration ---

    /// Create a queue. Returns `false` if it already existed.
    #[tracing::instrument(skip_all, fields(queue = %name))]
    pub fn create_queue(&self, name: &str) -> Result<bool, AdminError> {
        validate_queue_name(name).map_err(AdminError::InvalidQueueName)?;

        let mut queues = self.queues.write();
        if queues.contains_key(name) {
            return Ok(false);
        }

        let meta = QueueMeta::new(name.to_string(), self.now_ms());
        self.storage.write_batch(vec![WriteBatchOp::PutQueue {
            key: keys::queue_key(name),
            value: serde_json::to_vec(&meta).map_err(StorageError::from)?,
        }])?;
        queues.insert(name.to_string(), Arc::new(QueueHandle::new(
            name.to_string(),
            0,
            MessageIndex::default(),
        )));

        info!(queue = %name, "queue created");
        Ok(true)
    }

    /// Drop a queue together with its messages, archive, sequence, notify
    /// settings and bindings, in one atomic write. Returns `false` if the
    /// queue did not exist.
    #[tracing::instrument(skip_all, fields(queue = %name))]
    pub fn drop_queue(&self, name: &str) -> Result<bool, AdminError> {
        let Some(handle) = self.queue_handle(name) else {
            return Ok(false);
        };
        let Some(mut state) = handle.lock_live() else {
            return Ok(false);
        };

        let prefix = keys::queue_prefix(name);
        let mut ops = vec![
            WriteBatchOp::DeleteQueue {
                key: keys::queue_key(name),
            },
            WriteBatchOp::DeleteState {
                key: keys::sequence_key(name).into_bytes(),
            },
            WriteBatchOp::DeleteState {
                key: keys::notify_key(name).into_bytes(),
            },
        ];
        for key in self.storage.list_message_keys(&prefix)? {
            ops.push(WriteBatchOp::DeleteMessage { key });
        }
        for key in self.storage.list_archived_keys(&prefix)? {
            ops.push(WriteBatchOp::DeleteArchived { key });
        }

        let bindings_removed = self.directory.drop_queue_bindings(name, |binding_ops| {
            ops.extend(binding_ops);
            self.storage.write_batch(ops)
        })?;
        self.notifier.forget(name);

        state.dropped = true;
        state.index.clear();
        self.queues.write().remove(name);
        drop(state);

        info!(queue = %name, bindings_removed, "queue dropped");
        Ok(true)
    }

    /// All queues, ordered by name.
    pub fn list_queues(&self) -> StorageResult<Vec<QueueMeta>> {
        self.storage.list_queues()
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.queues.read().contains_key(name)
    }

    // --- Insert notifications ---

    /// Enable insert notifications for `queue`, or update its interval.
    #[tracing::instrument(skip_all, fields(queue = %queue, throttle_interval_ms = throttle_interval_ms))]
    pub fn enable_notify_insert(
        &self,
        queue: &str,
        throttle_interval_ms: i64,
    ) -> Result<(), NotifyError> {
        let interval = u64::try_from(throttle_interval_ms).map_err(|_| {
            NotifyError::InvalidArgument("throttle_interval_ms must be non-negative".to_string())
        })?;
        let handle = self
            .queue_handle(queue)
            .ok_or_else(|| NotifyError::QueueNotFound(queue.to_string()))?;
        let _state = handle
            .lock_live()
            .ok_or_else(|| NotifyError::QueueNotFound(queue.to_string()))?;

        self.notifier.enable(queue, interval)?;
        debug!(queue = %queue, interval, "insert notifications enabled");
        Ok(())
    }

    /// Returns whether notifications had been enabled.
    pub fn disable_notify_insert(&self, queue: &str) -> Result<bool, NotifyError> {
        Ok(self.notifier.disable(queue)?)
    }

    pub fn notify_settings(&self, queue: &str) -> Option<NotifyThrottle> {
        self.notifier.settings(queue)
    }

    /// Every queue with insert notifications enabled, ordered by name.
    pub fn list_notify_settings(&self) -> Vec<(String, NotifyThrottle)> {
        self.notifier.list()
    }

    pub fn subscribe_inserts(&self) -> tokio::sync::broadcast::Receiver<InsertNotification> {
        self.notifier.subscribe()
    }

    /// Flush the storage write-ahead log.
    pub fn flush(&self) -> StorageResult<()> {
        self.storage.flush()
    }
}

/// Rebuild a queue's message index from storage. Rows that fail to decode
/// are left out of the index; they stay in storage until a purge or drop.
fn recover_index(storage: &dyn Storage, queue: &str) -> StorageResult<MessageIndex> {
    let mut index = MessageIndex::default();
    for key in storage.list_message_keys(&keys::queue_prefix(queue))? {
        match storage.get_message(&key) {
            Ok(Some(msg)) => index.insert(msg.id, msg.enqueued_at, msg.visible_at),
            Ok(None) => {}
            Err(StorageError::Serialization(err)) => {
                warn!(queue = %queue, error = %err, "undecodable message during recovery, skipping");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(index)
}

#[cfg(test)]
mod tests;
