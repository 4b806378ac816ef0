use super::*;
use crate::error::StorageResult;
use crate::message::{ArchivedMessage, Message};
use crate::routing::BindingRecord;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Fixed start time for the manual clock used by broker tests.
pub(super) const T0: u64 = 1_700_000_000_000;

pub(super) struct TestBroker {
    pub broker: Arc<Broker>,
    pub clock: Arc<ManualClock>,
    pub storage: Arc<dyn Storage>,
    pub _dir: tempfile::TempDir,
}

pub(super) fn test_broker() -> TestBroker {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(RocksDbStorage::open(dir.path()).unwrap());
    let clock = Arc::new(ManualClock::new(T0));
    let broker = Broker::with_clock(
        Arc::clone(&storage),
        BrokerConfig::default(),
        Arc::clone(&clock) as Arc<dyn Clock>,
    )
    .unwrap();
    TestBroker {
        broker: Arc::new(broker),
        clock,
        storage,
        _dir: dir,
    }
}

/// Helper: a broker with the given queues already created.
pub(super) fn test_broker_with_queues(names: &[&str]) -> TestBroker {
    let t = test_broker();
    for name in names {
        assert!(t.broker.create_queue(name).unwrap());
    }
    t
}

pub(super) fn payload(n: u64) -> NewMessage {
    NewMessage::new(json!({ "n": n }))
}

/// Helper: enqueue `count` messages with payloads `{"n": 0..count}`.
pub(super) fn send_n(broker: &Broker, queue: &str, count: u64) -> Vec<u64> {
    (0..count)
        .map(|n| broker.send(queue, payload(n), Delay::None).unwrap())
        .collect()
}

pub(super) fn ids(messages: &[Message]) -> Vec<u64> {
    messages.iter().map(|m| m.id).collect()
}

/// Storage wrapper whose writes can be made to fail on demand, for
/// exercising all-or-nothing behavior. It also counts decoded message rows.
pub(super) struct FaultyStorage {
    inner: Arc<dyn Storage>,
    fail_writes: AtomicBool,
    message_reads: AtomicU64,
}

impl FaultyStorage {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            message_reads: AtomicU64::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Message rows decoded since the last call.
    pub fn take_message_reads(&self) -> u64 {
        self.message_reads.swap(0, Ordering::SeqCst)
    }
}

/// Helper: a broker over `FaultyStorage`, sharing the manual clock.
pub(super) fn faulty_broker() -> (Broker, Arc<FaultyStorage>, Arc<ManualClock>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let inner: Arc<dyn Storage> = Arc::new(RocksDbStorage::open(dir.path()).unwrap());
    let faulty = Arc::new(FaultyStorage::new(inner));
    let clock = Arc::new(ManualClock::new(T0));
    let broker = Broker::with_clock(
        Arc::clone(&faulty) as Arc<dyn Storage>,
        BrokerConfig::default(),
        Arc::clone(&clock) as Arc<dyn Clock>,
    )
    .unwrap();
    (broker, faulty, clock, dir)
}

impl Storage for FaultyStorage {
    fn get_queue(&self, name: &str) -> StorageResult<Option<QueueMeta>> {
        self.inner.get_queue(name)
    }

    fn list_queues(&self) -> StorageResult<Vec<QueueMeta>> {
        self.inner.list_queues()
    }

    fn get_message(&self, key: &[u8]) -> StorageResult<Option<Message>> {
        self.message_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_message(key)
    }

    fn list_messages(&self, prefix: &[u8]) -> StorageResult<Vec<Message>> {
        let messages = self.inner.list_messages(prefix)?;
        self.message_reads
            .fetch_add(messages.len() as u64, Ordering::SeqCst);
        Ok(messages)
    }

    fn list_message_keys(&self, prefix: &[u8]) -> StorageResult<Vec<Vec<u8>>> {
        self.inner.list_message_keys(prefix)
    }

    fn get_archived(&self, key: &[u8]) -> StorageResult<Option<ArchivedMessage>> {
        self.inner.get_archived(key)
    }

    fn list_archived(&self, prefix: &[u8]) -> StorageResult<Vec<ArchivedMessage>> {
        self.inner.list_archived(prefix)
    }

    fn list_archived_keys(&self, prefix: &[u8]) -> StorageResult<Vec<Vec<u8>>> {
        self.inner.list_archived_keys(prefix)
    }

    fn count_archived(&self, prefix: &[u8]) -> StorageResult<u64> {
        self.inner.count_archived(prefix)
    }

    fn list_bindings(&self, prefix: &[u8]) -> StorageResult<Vec<BindingRecord>> {
        self.inner.list_bindings(prefix)
    }

    fn get_state(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get_state(key)
    }

    fn list_state_by_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        self.inner.list_state_by_prefix(prefix)
    }

    fn write_batch(&self, ops: Vec<WriteBatchOp>) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::RocksDb("injected write failure".to_string()));
        }
        self.inner.write_batch(ops)
    }

    fn flush(&self) -> StorageResult<()> {
        self.inner.flush()
    }
}
