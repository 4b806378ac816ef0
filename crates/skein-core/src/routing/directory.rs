use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StorageError, StorageResult, ValidationError};
use crate::routing::grammar;
use crate::routing::matcher::TopicMatcher;
use crate::storage::{keys, Storage, WriteBatchOp};

/// Binding row as persisted in the `bindings` column family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BindingRecord {
    pub pattern: String,
    pub queue_name: String,
    pub compiled_regex: String,
    pub bound_at: u64,
}

/// A live binding: a queue subscribed to a pattern, with its compiled matcher.
#[derive(Debug)]
pub struct Binding {
    matcher: TopicMatcher,
    queue_name: String,
    bound_at: u64,
}

impl Binding {
    pub fn pattern(&self) -> &str {
        self.matcher.pattern()
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn bound_at(&self) -> u64 {
        self.bound_at
    }

    pub fn matcher(&self) -> &TopicMatcher {
        &self.matcher
    }

    pub fn record(&self) -> BindingRecord {
        BindingRecord {
            pattern: self.pattern().to_string(),
            queue_name: self.queue_name.clone(),
            compiled_regex: self.matcher.source().to_string(),
            bound_at: self.bound_at,
        }
    }
}

/// One row of a dry-run route resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub pattern: String,
    pub queue_name: String,
    pub compiled_regex: String,
}

type BindingId = (String, String);

/// In-memory index of every binding, write-through to storage.
///
/// Entries are keyed by `(pattern, queue_name)`, so iteration order is
/// pattern first, then queue name.
pub struct BindingDirectory {
    storage: Arc<dyn Storage>,
    bindings: RwLock<BTreeMap<BindingId, Arc<Binding>>>,
}

impl BindingDirectory {
    /// Rebuild the directory from storage, recompiling every stored pattern.
    pub fn load(storage: Arc<dyn Storage>) -> StorageResult<Self> {
        let mut bindings = BTreeMap::new();
        for record in storage.list_bindings(b"")? {
            let matcher = TopicMatcher::compile(&record.pattern).map_err(|e| {
                StorageError::CorruptData(format!(
                    "stored binding {:?} -> {}: {e}",
                    record.pattern, record.queue_name
                ))
            })?;
            let binding = Binding {
                matcher,
                queue_name: record.queue_name.clone(),
                bound_at: record.bound_at,
            };
            bindings.insert((record.pattern, record.queue_name), Arc::new(binding));
        }
        debug!(count = bindings.len(), "binding directory loaded");
        Ok(Self {
            storage,
            bindings: RwLock::new(bindings),
        })
    }

    /// Insert a binding unless the pair already exists. Returns whether a new
    /// binding was created.
    ///
    /// The caller must hold the queue's lock and have checked that the queue
    /// exists.
    pub fn bind(&self, matcher: TopicMatcher, queue_name: &str, now_ms: u64) -> StorageResult<bool> {
        let id = (matcher.pattern().to_string(), queue_name.to_string());
        let mut bindings = self.bindings.write();
        if bindings.contains_key(&id) {
            return Ok(false);
        }

        let binding = Binding {
            matcher,
            queue_name: queue_name.to_string(),
            bound_at: now_ms,
        };
        self.storage.write_batch(vec![WriteBatchOp::PutBinding {
            key: keys::binding_key(queue_name, binding.pattern()),
            value: serde_json::to_vec(&binding.record())?,
        }])?;
        bindings.insert(id, Arc::new(binding));
        Ok(true)
    }

    /// Remove a binding. Returns whether one existed.
    pub fn unbind(&self, pattern: &str, queue_name: &str) -> StorageResult<bool> {
        let id = (pattern.to_string(), queue_name.to_string());
        let mut bindings = self.bindings.write();
        if !bindings.contains_key(&id) {
            return Ok(false);
        }

        self.storage.write_batch(vec![WriteBatchOp::DeleteBinding {
            key: keys::binding_key(queue_name, pattern),
        }])?;
        bindings.remove(&id);
        Ok(true)
    }

    /// Every binding whose pattern matches `routing_key`, ordered by pattern
    /// then queue name.
    pub fn matching(&self, routing_key: &str) -> Result<Vec<Arc<Binding>>, ValidationError> {
        grammar::validate_routing_key(routing_key)?;
        let bindings = self.bindings.read();
        Ok(bindings
            .values()
            .filter(|b| b.matcher.matches(routing_key))
            .cloned()
            .collect())
    }

    /// All bindings, optionally restricted to one queue.
    pub fn list(&self, queue_name: Option<&str>) -> Vec<Arc<Binding>> {
        let bindings = self.bindings.read();
        bindings
            .values()
            .filter(|b| queue_name.map_or(true, |q| b.queue_name == q))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    /// Remove every binding owned by `queue_name` as part of a larger atomic
    /// write.
    ///
    /// The binding deletions are handed to `commit` together with whatever the
    /// caller adds; the in-memory entries are only dropped once `commit`
    /// succeeds. Returns how many bindings were removed.
    pub fn drop_queue_bindings<F>(&self, queue_name: &str, commit: F) -> StorageResult<usize>
    where
        F: FnOnce(Vec<WriteBatchOp>) -> StorageResult<()>,
    {
        let mut bindings = self.bindings.write();
        let owned: Vec<BindingId> = bindings
            .keys()
            .filter(|(_, queue)| queue == queue_name)
            .cloned()
            .collect();

        let ops = owned
            .iter()
            .map(|(pattern, queue)| WriteBatchOp::DeleteBinding {
                key: keys::binding_key(queue, pattern),
            })
            .collect();
        commit(ops)?;

        for id in &owned {
            bindings.remove(id);
        }
        Ok(owned.len())
    }
}
