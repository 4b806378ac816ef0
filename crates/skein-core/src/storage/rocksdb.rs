use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::error::{StorageError, StorageResult};
use crate::message::{ArchivedMessage, Message};
use crate::queue::QueueMeta;
use crate::routing::BindingRecord;
use crate::storage::traits::{Storage, WriteBatchOp};

const CF_QUEUES: &str = "queues";
const CF_MESSAGES: &str = "messages";
const CF_ARCHIVE: &str = "archive";
const CF_BINDINGS: &str = "bindings";
const CF_STATE: &str = "state";

/// All column family names (excluding `default` which RocksDB creates automatically).
const COLUMN_FAMILIES: &[&str] = &[CF_QUEUES, CF_MESSAGES, CF_ARCHIVE, CF_BINDINGS, CF_STATE];

type DB = DBWithThreadMode<MultiThreaded>;

/// RocksDB-backed storage implementation.
pub struct RocksDbStorage {
    db: DB,
}

impl RocksDbStorage {
    /// Open or create a RocksDB database at the given path with all column families.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> StorageResult<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::RocksDb(format!("column family not found: {name}")))
    }

    /// Scan a column family from `prefix` forward, stopping at the first key
    /// outside the prefix.
    fn scan_prefix<T>(
        &self,
        cf_name: &str,
        prefix: &[u8],
        mut decode: impl FnMut(&[u8], &[u8]) -> StorageResult<T>,
    ) -> StorageResult<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));
        let mut results = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            results.push(decode(&key, &value)?);
        }
        Ok(results)
    }
}

impl Storage for RocksDbStorage {
    fn get_queue(&self, name: &str) -> StorageResult<Option<QueueMeta>> {
        let cf = self.cf(CF_QUEUES)?;
        match self.db.get_cf(&cf, name.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn list_queues(&self) -> StorageResult<Vec<QueueMeta>> {
        self.scan_prefix(CF_QUEUES, b"", |_, value| Ok(serde_json::from_slice(value)?))
    }

    fn get_message(&self, key: &[u8]) -> StorageResult<Option<Message>> {
        let cf = self.cf(CF_MESSAGES)?;
        match self.db.get_cf(&cf, key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn list_messages(&self, prefix: &[u8]) -> StorageResult<Vec<Message>> {
        self.scan_prefix(CF_MESSAGES, prefix, |_, value| {
            Ok(serde_json::from_slice(value)?)
        })
    }

    fn list_message_keys(&self, prefix: &[u8]) -> StorageResult<Vec<Vec<u8>>> {
        self.scan_prefix(CF_MESSAGES, prefix, |key, _| Ok(key.to_vec()))
    }

    fn get_archived(&self, key: &[u8]) -> StorageResult<Option<ArchivedMessage>> {
        let cf = self.cf(CF_ARCHIVE)?;
        match self.db.get_cf(&cf, key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn list_archived(&self, prefix: &[u8]) -> StorageResult<Vec<ArchivedMessage>> {
        self.scan_prefix(CF_ARCHIVE, prefix, |_, value| {
            Ok(serde_json::from_slice(value)?)
        })
    }

    fn list_archived_keys(&self, prefix: &[u8]) -> StorageResult<Vec<Vec<u8>>> {
        self.scan_prefix(CF_ARCHIVE, prefix, |key, _| Ok(key.to_vec()))
    }

    fn count_archived(&self, prefix: &[u8]) -> StorageResult<u64> {
        Ok(self.scan_prefix(CF_ARCHIVE, prefix, |_, _| Ok(()))?.len() as u64)
    }

    fn list_bindings(&self, prefix: &[u8]) -> StorageResult<Vec<BindingRecord>> {
        self.scan_prefix(CF_BINDINGS, prefix, |_, value| {
            Ok(serde_json::from_slice(value)?)
        })
    }

    fn get_state(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let cf = self.cf(CF_STATE)?;
        Ok(self.db.get_cf(&cf, key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn list_state_by_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        self.scan_prefix(CF_STATE, prefix.as_bytes(), |key, value| {
            let key = String::from_utf8(key.to_vec()).map_err(|_| {
                StorageError::CorruptData("non-UTF8 key in state column family".to_string())
            })?;
            Ok((key, value.to_vec()))
        })
    }

    fn write_batch(&self, ops: Vec<WriteBatchOp>) -> StorageResult<()> {
        let mut batch = WriteBatch::default();

        for op in ops {
            match op {
                WriteBatchOp::PutQueue { key, value } => {
                    batch.put_cf(&self.cf(CF_QUEUES)?, &key, &value);
                }
                WriteBatchOp::DeleteQueue { key } => {
                    batch.delete_cf(&self.cf(CF_QUEUES)?, &key);
                }
                WriteBatchOp::PutMessage { key, value } => {
                    batch.put_cf(&self.cf(CF_MESSAGES)?, &key, &value);
                }
                WriteBatchOp::DeleteMessage { key } => {
                    batch.delete_cf(&self.cf(CF_MESSAGES)?, &key);
                }
                WriteBatchOp::PutArchived { key, value } => {
                    batch.put_cf(&self.cf(CF_ARCHIVE)?, &key, &value);
                }
                WriteBatchOp::DeleteArchived { key } => {
                    batch.delete_cf(&self.cf(CF_ARCHIVE)?, &key);
                }
                WriteBatchOp::PutBinding { key, value } => {
                    batch.put_cf(&self.cf(CF_BINDINGS)?, &key, &value);
                }
                WriteBatchOp::DeleteBinding { key } => {
                    batch.delete_cf(&self.cf(CF_BINDINGS)?, &key);
                }
                WriteBatchOp::PutState { key, value } => {
                    batch.put_cf(&self.cf(CF_STATE)?, &key, &value);
                }
                WriteBatchOp::DeleteState { key } => {
                    batch.delete_cf(&self.cf(CF_STATE)?, &key);
                }
            }
        }

        self.db.write(batch)?;
        Ok(())
    }

    fn flush(&self) -> StorageResult<()> {
        self.db.flush_wal(true)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::keys;
    use serde_json::json;

    fn test_storage() -> (RocksDbStorage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = RocksDbStorage::open(dir.path()).unwrap();
        (storage, dir)
    }

    fn test_message(id: u64) -> Message {
        Message {
            id,
            payload: json!({"n": id}),
            headers: None,
            enqueued_at: 1_000,
            visible_at: 1_000,
            read_count: 0,
            last_read_at: None,
        }
    }

    fn put_message(queue: &str, msg: &Message) -> WriteBatchOp {
        WriteBatchOp::PutMessage {
            key: keys::message_key(queue, msg.id),
            value: serde_json::to_vec(msg).unwrap(),
        }
    }

    #[test]
    fn open_creates_all_column_families() {
        let (storage, _dir) = test_storage();
        for cf_name in COLUMN_FAMILIES {
            assert!(
                storage.db.cf_handle(cf_name).is_some(),
                "column family '{cf_name}' should exist"
            );
        }
    }

    #[test]
    fn message_put_get_delete() {
        let (storage, _dir) = test_storage();
        let msg = test_message(1);
        let key = keys::message_key("q1", 1);

        storage.write_batch(vec![put_message("q1", &msg)]).unwrap();
        assert_eq!(storage.get_message(&key).unwrap(), Some(msg));

        storage
            .write_batch(vec![WriteBatchOp::DeleteMessage { key: key.clone() }])
            .unwrap();
        assert!(storage.get_message(&key).unwrap().is_none());
    }

    #[test]
    fn list_messages_by_prefix_in_id_order() {
        let (storage, _dir) = test_storage();
        storage
            .write_batch(vec![
                put_message("q1", &test_message(300)),
                put_message("q1", &test_message(2)),
                put_message("q2", &test_message(1)),
                put_message("q1", &test_message(45)),
            ])
            .unwrap();

        let ids: Vec<u64> = storage
            .list_messages(&keys::queue_prefix("q1"))
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![2, 45, 300]);

        let q2 = storage.list_messages(&keys::queue_prefix("q2")).unwrap();
        assert_eq!(q2.len(), 1);
    }

    #[test]
    fn key_listing_skips_value_decoding() {
        let (storage, _dir) = test_storage();
        let corrupt = keys::message_key("q1", 9);
        storage
            .write_batch(vec![
                put_message("q1", &test_message(1)),
                WriteBatchOp::PutMessage {
                    key: corrupt.clone(),
                    value: b"not json".to_vec(),
                },
                WriteBatchOp::PutArchived {
                    key: keys::message_key("q1", 4),
                    value: b"not json".to_vec(),
                },
            ])
            .unwrap();

        let prefix = keys::queue_prefix("q1");
        assert_eq!(
            storage.list_message_keys(&prefix).unwrap(),
            vec![keys::message_key("q1", 1), corrupt]
        );
        assert_eq!(storage.list_archived_keys(&prefix).unwrap().len(), 1);
        assert!(storage.list_messages(&prefix).is_err());
    }

    #[test]
    fn archive_put_get_count() {
        let (storage, _dir) = test_storage();
        let archived = ArchivedMessage {
            message: test_message(7),
            archived_at: 2_000,
        };
        let key = keys::message_key("q1", 7);
        storage
            .write_batch(vec![WriteBatchOp::PutArchived {
                key: key.clone(),
                value: serde_json::to_vec(&archived).unwrap(),
            }])
            .unwrap();

        assert_eq!(storage.get_archived(&key).unwrap(), Some(archived));
        assert_eq!(storage.count_archived(&keys::queue_prefix("q1")).unwrap(), 1);
        assert_eq!(storage.count_archived(&keys::queue_prefix("q2")).unwrap(), 0);
    }

    #[test]
    fn queue_put_get_list_delete() {
        let (storage, _dir) = test_storage();
        for name in ["zeta", "alpha"] {
            let meta = QueueMeta::new(name.to_string(), 1);
            storage
                .write_batch(vec![WriteBatchOp::PutQueue {
                    key: keys::queue_key(name),
                    value: serde_json::to_vec(&meta).unwrap(),
                }])
                .unwrap();
        }

        assert_eq!(storage.get_queue("alpha").unwrap().unwrap().name, "alpha");
        let names: Vec<String> = storage
            .list_queues()
            .unwrap()
            .into_iter()
            .map(|q| q.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        storage
            .write_batch(vec![WriteBatchOp::DeleteQueue {
                key: keys::queue_key("alpha"),
            }])
            .unwrap();
        assert!(storage.get_queue("alpha").unwrap().is_none());
    }

    #[test]
    fn state_prefix_listing() {
        let (storage, _dir) = test_storage();
        storage
            .write_batch(vec![
                WriteBatchOp::PutState {
                    key: keys::notify_key("a").into_bytes(),
                    value: b"1".to_vec(),
                },
                WriteBatchOp::PutState {
                    key: keys::sequence_key("a").into_bytes(),
                    value: keys::sequence_value(9),
                },
            ])
            .unwrap();

        let notify = storage.list_state_by_prefix(keys::NOTIFY_PREFIX).unwrap();
        assert_eq!(notify, vec![("notify:a".to_string(), b"1".to_vec())]);

        let seq = storage.get_state(&keys::sequence_key("a")).unwrap().unwrap();
        assert_eq!(keys::parse_sequence_value(&seq), Some(9));
    }

    #[test]
    fn write_batch_is_all_or_nothing_across_queues() {
        let (storage, _dir) = test_storage();
        storage
            .write_batch(vec![
                put_message("q1", &test_message(1)),
                put_message("q2", &test_message(1)),
                WriteBatchOp::PutState {
                    key: keys::sequence_key("q1").into_bytes(),
                    value: keys::sequence_value(1),
                },
            ])
            .unwrap();

        assert_eq!(storage.list_messages(&keys::queue_prefix("q1")).unwrap().len(), 1);
        assert_eq!(storage.list_messages(&keys::queue_prefix("q2")).unwrap().len(), 1);
    }

    #[test]
    fn reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();

        {
            let storage = RocksDbStorage::open(dir.path()).unwrap();
            storage
                .write_batch(vec![put_message("persistent", &test_message(5))])
                .unwrap();
            storage.flush().unwrap();
        }

        {
            let storage = RocksDbStorage::open(dir.path()).unwrap();
            let msgs = storage
                .list_messages(&keys::queue_prefix("persistent"))
                .unwrap();
            assert_eq!(msgs, vec![test_message(5)]);
        }
    }
}
