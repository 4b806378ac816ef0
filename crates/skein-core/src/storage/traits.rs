use crate::error::StorageResult;
use crate::message::{ArchivedMessage, Message};
use crate::queue::QueueMeta;
use crate::routing::BindingRecord;

/// Represents a single operation in an atomic write batch.
#[derive(Debug, Clone)]
pub enum WriteBatchOp {
    PutQueue { key: Vec<u8>, value: Vec<u8> },
    DeleteQueue { key: Vec<u8> },
    PutMessage { key: Vec<u8>, value: Vec<u8> },
    DeleteMessage { key: Vec<u8> },
    PutArchived { key: Vec<u8>, value: Vec<u8> },
    DeleteArchived { key: Vec<u8> },
    PutBinding { key: Vec<u8>, value: Vec<u8> },
    DeleteBinding { key: Vec<u8> },
    PutState { key: Vec<u8>, value: Vec<u8> },
    DeleteState { key: Vec<u8> },
}

/// Storage trait for all persistence operations. Implementations must be thread-safe.
///
/// Every mutation goes through `write_batch`, which must apply all of its
/// operations atomically: either every op is visible to later reads or none is.
pub trait Storage: Send + Sync {
    // --- Queue operations ---

    /// Retrieve queue metadata by name.
    fn get_queue(&self, name: &str) -> StorageResult<Option<QueueMeta>>;

    /// List all queues, ordered by name.
    fn list_queues(&self) -> StorageResult<Vec<QueueMeta>>;

    // --- Message operations ---

    /// Retrieve a live message by its full key.
    fn get_message(&self, key: &[u8]) -> StorageResult<Option<Message>>;

    /// List live messages whose keys start with the given prefix, in key (id) order.
    fn list_messages(&self, prefix: &[u8]) -> StorageResult<Vec<Message>>;

    /// List the keys of live messages under a prefix without decoding values.
    fn list_message_keys(&self, prefix: &[u8]) -> StorageResult<Vec<Vec<u8>>>;

    // --- Archive operations ---

    /// Retrieve an archived message by its full key.
    fn get_archived(&self, key: &[u8]) -> StorageResult<Option<ArchivedMessage>>;

    /// List archived messages whose keys start with the given prefix, in key order.
    fn list_archived(&self, prefix: &[u8]) -> StorageResult<Vec<ArchivedMessage>>;

    /// List the keys of archived messages under a prefix without decoding values.
    fn list_archived_keys(&self, prefix: &[u8]) -> StorageResult<Vec<Vec<u8>>>;

    /// Count archived messages under a prefix without decoding them.
    fn count_archived(&self, prefix: &[u8]) -> StorageResult<u64>;

    // --- Binding operations ---

    /// List binding records whose keys start with the given prefix.
    /// An empty prefix lists every binding.
    fn list_bindings(&self, prefix: &[u8]) -> StorageResult<Vec<BindingRecord>>;

    // --- State operations ---

    /// Retrieve a state value by key.
    fn get_state(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// List state entries whose keys start with the given prefix.
    fn list_state_by_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>>;

    // --- Batch operations ---

    /// Atomically apply a batch of write operations across column families.
    fn write_batch(&self, ops: Vec<WriteBatchOp>) -> StorageResult<()>;

    /// Flush the write-ahead log to disk.
    fn flush(&self) -> StorageResult<()>;
}
