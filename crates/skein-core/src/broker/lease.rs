use std::sync::Arc;
use std::time::Duration;

use parking_lot::MutexGuard;
use serde_json::Value;
use tracing::debug;

use super::{Broker, QueueHandle, QueueState};
use crate::error::{QueueError, QueueResult, StorageError};
use crate::message::{payload_contains, ArchivedMessage, Delay, Message, NewMessage};
use crate::queue::QueueMetrics;
use crate::storage::{keys, WriteBatchOp};

/// Reject payloads the queue cannot store.
pub(super) fn check_payload(message: &NewMessage) -> Result<(), String> {
    if message.payload.is_null() {
        return Err("message cannot be NULL".to_string());
    }
    Ok(())
}

/// Resolve a delay, rejecting negative relative delays.
pub(super) fn resolve_delay(delay: Delay, now_ms: u64) -> Result<u64, String> {
    delay
        .visible_at(now_ms)
        .ok_or_else(|| "delay cannot be negative".to_string())
}

fn lease_millis(lease_ms: i64) -> QueueResult<u64> {
    u64::try_from(lease_ms)
        .map_err(|_| QueueError::InvalidArgument("lease duration cannot be negative".to_string()))
}

pub(super) fn put_message(queue: &str, msg: &Message) -> Result<WriteBatchOp, StorageError> {
    Ok(WriteBatchOp::PutMessage {
        key: keys::message_key(queue, msg.id),
        value: serde_json::to_vec(msg)?,
    })
}

pub(super) fn put_sequence(queue: &str, last_id: u64) -> WriteBatchOp {
    WriteBatchOp::PutState {
        key: keys::sequence_key(queue).into_bytes(),
        value: keys::sequence_value(last_id),
    }
}

impl Broker {
    fn live_queue(&self, queue: &str) -> QueueResult<Arc<QueueHandle>> {
        self.queue_handle(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))
    }

    fn lock<'a>(handle: &'a QueueHandle) -> QueueResult<MutexGuard<'a, QueueState>> {
        handle
            .lock_live()
            .ok_or_else(|| QueueError::QueueNotFound(handle.name.clone()))
    }

    /// Up to `limit` available messages in id order, optionally restricted by
    /// payload containment. Only rows the index reports as visible are read.
    fn available(
        &self,
        queue: &str,
        state: &mut QueueState,
        now_ms: u64,
        filter: Option<&Value>,
        limit: usize,
    ) -> QueueResult<Vec<Message>> {
        state.index.promote(now_ms);
        let mut found = Vec::new();
        for id in state.index.ready() {
            if found.len() == limit {
                break;
            }
            let Some(msg) = self.storage.get_message(&keys::message_key(queue, id))? else {
                continue;
            };
            if filter.map_or(true, |f| payload_contains(&msg.payload, f)) {
                found.push(msg);
            }
        }
        Ok(found)
    }

    // --- Enqueue ---

    /// Enqueue one message. Returns its id.
    #[tracing::instrument(skip_all, fields(queue = %queue))]
    pub fn send(&self, queue: &str, message: NewMessage, delay: Delay) -> QueueResult<u64> {
        let ids = self.send_batch(queue, vec![message], delay)?;
        ids.first()
            .copied()
            .ok_or_else(|| StorageError::CorruptData("enqueue assigned no id".to_string()).into())
    }

    /// Enqueue several messages atomically with one shared delay. Ids follow
    /// input order.
    #[tracing::instrument(skip_all, fields(queue = %queue, count = messages.len()))]
    pub fn send_batch(
        &self,
        queue: &str,
        messages: Vec<NewMessage>,
        delay: Delay,
    ) -> QueueResult<Vec<u64>> {
        for message in &messages {
            check_payload(message).map_err(QueueError::InvalidArgument)?;
        }
        let now = self.now_ms();
        let visible_at = resolve_delay(delay, now).map_err(QueueError::InvalidArgument)?;

        let handle = self.live_queue(queue)?;
        let mut state = Self::lock(&handle)?;
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let mut ops = Vec::with_capacity(messages.len() + 1);
        let mut ids = Vec::with_capacity(messages.len());
        let mut next_id = state.last_id;
        for message in messages {
            next_id += 1;
            let msg = Message {
                id: next_id,
                payload: message.payload,
                headers: message.headers,
                enqueued_at: now,
                visible_at,
                read_count: 0,
                last_read_at: None,
            };
            ops.push(put_message(queue, &msg)?);
            ids.push(next_id);
        }
        ops.push(put_sequence(queue, next_id));

        self.storage.write_batch(ops)?;
        state.last_id = next_id;
        for &id in &ids {
            state.index.insert(id, now, visible_at);
        }
        drop(state);

        debug!(queue = %queue, first_id = ids[0], count = ids.len(), "messages enqueued");
        self.after_enqueue(queue, ids.len() as u64, now);
        Ok(ids)
    }

    // --- Lease ---

    /// Lease up to `count` available messages for `lease_ms`, lowest id first.
    ///
    /// The returned messages carry the granted lease: `visible_at` is the new
    /// deadline, `read_count` is incremented and `last_read_at` is now.
    #[tracing::instrument(skip_all, fields(queue = %queue, count = count, lease_ms = lease_ms))]
    pub fn lease(
        &self,
        queue: &str,
        count: usize,
        lease_ms: i64,
        filter: Option<&Value>,
    ) -> QueueResult<Vec<Message>> {
        let lease_ms = lease_millis(lease_ms)?;
        let handle = self.live_queue(queue)?;
        let mut state = Self::lock(&handle)?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let now = self.now_ms();
        let mut leased = self.available(queue, &mut state, now, filter, count)?;
        if leased.is_empty() {
            return Ok(leased);
        }

        let mut ops = Vec::with_capacity(leased.len());
        for msg in &mut leased {
            msg.visible_at = now.saturating_add(lease_ms);
            msg.read_count = msg.read_count.saturating_add(1);
            msg.last_read_at = Some(now);
            ops.push(put_message(queue, msg)?);
        }
        self.storage.write_batch(ops)?;
        for msg in &leased {
            state.index.set_visible_at(msg.id, msg.visible_at);
        }
        drop(state);

        debug!(queue = %queue, leased = leased.len(), "messages leased");
        self.metrics.record_lease(queue, leased.len() as u64);
        Ok(leased)
    }

    /// Repeat `lease` every `poll_interval` until it returns something or
    /// `max_wait` has elapsed. No lock is held while waiting.
    pub async fn lease_with_poll(
        &self,
        queue: &str,
        count: usize,
        lease_ms: i64,
        max_wait: Duration,
        poll_interval: Duration,
        filter: Option<&Value>,
    ) -> QueueResult<Vec<Message>> {
        if poll_interval.is_zero() {
            return Err(QueueError::InvalidArgument(
                "poll interval must be positive".to_string(),
            ));
        }

        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let leased = self.lease(queue, count, lease_ms, filter)?;
            if !leased.is_empty() {
                return Ok(leased);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(leased);
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// Remove and return up to `count` available messages.
    #[tracing::instrument(skip_all, fields(queue = %queue, count = count))]
    pub fn pop(&self, queue: &str, count: usize) -> QueueResult<Vec<Message>> {
        let handle = self.live_queue(queue)?;
        let mut state = Self::lock(&handle)?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let now = self.now_ms();
        let popped = self.available(queue, &mut state, now, None, count)?;
        if popped.is_empty() {
            return Ok(popped);
        }
        let ops = popped
            .iter()
            .map(|m| WriteBatchOp::DeleteMessage {
                key: keys::message_key(queue, m.id),
            })
            .collect();
        self.storage.write_batch(ops)?;
        for msg in &popped {
            state.index.remove(msg.id);
        }
        drop(state);

        self.metrics.record_delete(queue, popped.len() as u64);
        Ok(popped)
    }

    /// Move a message's lease deadline to `now + lease_ms`. Returns the
    /// updated message, or `None` if it does not exist.
    #[tracing::instrument(skip_all, fields(queue = %queue, msg_id = msg_id, lease_ms = lease_ms))]
    pub fn reschedule(&self, queue: &str, msg_id: u64, lease_ms: i64) -> QueueResult<Option<Message>> {
        let lease_ms = lease_millis(lease_ms)?;
        let handle = self.live_queue(queue)?;
        let mut state = Self::lock(&handle)?;

        let Some(mut msg) = self.storage.get_message(&keys::message_key(queue, msg_id))? else {
            return Ok(None);
        };
        msg.visible_at = self.now_ms().saturating_add(lease_ms);
        self.storage.write_batch(vec![put_message(queue, &msg)?])?;
        state.index.set_visible_at(msg_id, msg.visible_at);

        debug!(queue = %queue, msg_id, visible_at = msg.visible_at, "message rescheduled");
        Ok(Some(msg))
    }

    // --- Delete / archive ---

    /// Returns whether the message existed.
    pub fn delete(&self, queue: &str, msg_id: u64) -> QueueResult<bool> {
        Ok(!self.delete_batch(queue, &[msg_id])?.is_empty())
    }

    /// Delete every listed message that exists, in one write. Returns the ids
    /// that were deleted.
    #[tracing::instrument(skip_all, fields(queue = %queue, count = msg_ids.len()))]
    pub fn delete_batch(&self, queue: &str, msg_ids: &[u64]) -> QueueResult<Vec<u64>> {
        let handle = self.live_queue(queue)?;
        let mut state = Self::lock(&handle)?;

        let mut ops = Vec::new();
        let mut deleted = Vec::new();
        for &id in msg_ids {
            if deleted.contains(&id) || !state.index.contains(id) {
                continue;
            }
            ops.push(WriteBatchOp::DeleteMessage {
                key: keys::message_key(queue, id),
            });
            deleted.push(id);
        }
        if ops.is_empty() {
            return Ok(deleted);
        }
        self.storage.write_batch(ops)?;
        for &id in &deleted {
            state.index.remove(id);
        }
        drop(state);

        debug!(queue = %queue, deleted = deleted.len(), "messages deleted");
        self.metrics.record_delete(queue, deleted.len() as u64);
        Ok(deleted)
    }

    /// Returns whether the message existed and was archived.
    pub fn archive(&self, queue: &str, msg_id: u64) -> QueueResult<bool> {
        Ok(!self.archive_batch(queue, &[msg_id])?.is_empty())
    }

    /// Move every listed message that exists into the archive, in one write.
    /// Returns the ids that were archived.
    #[tracing::instrument(skip_all, fields(queue = %queue, count = msg_ids.len()))]
    pub fn archive_batch(&self, queue: &str, msg_ids: &[u64]) -> QueueResult<Vec<u64>> {
        let handle = self.live_queue(queue)?;
        let mut state = Self::lock(&handle)?;

        let now = self.now_ms();
        let mut ops = Vec::new();
        let mut archived = Vec::new();
        for &id in msg_ids {
            if archived.contains(&id) || !state.index.contains(id) {
                continue;
            }
            let key = keys::message_key(queue, id);
            let Some(message) = self.storage.get_message(&key)? else {
                continue;
            };
            let row = ArchivedMessage {
                message,
                archived_at: now,
            };
            ops.push(WriteBatchOp::PutArchived {
                key: key.clone(),
                value: serde_json::to_vec(&row).map_err(StorageError::from)?,
            });
            ops.push(WriteBatchOp::DeleteMessage { key });
            archived.push(id);
        }
        if ops.is_empty() {
            return Ok(archived);
        }
        self.storage.write_batch(ops)?;
        for &id in &archived {
            state.index.remove(id);
        }
        drop(state);

        debug!(queue = %queue, archived = archived.len(), "messages archived");
        self.metrics.record_archive(queue, archived.len() as u64);
        Ok(archived)
    }

    /// Delete every live message row, including rows that no longer decode.
    /// Returns how many were removed. The id sequence is left untouched.
    #[tracing::instrument(skip_all, fields(queue = %queue))]
    pub fn purge(&self, queue: &str) -> QueueResult<u64> {
        let handle = self.live_queue(queue)?;
        let mut state = Self::lock(&handle)?;

        let ops: Vec<WriteBatchOp> = self
            .storage
            .list_message_keys(&keys::queue_prefix(queue))?
            .into_iter()
            .map(|key| WriteBatchOp::DeleteMessage { key })
            .collect();
        let purged = ops.len() as u64;
        if purged > 0 {
            self.storage.write_batch(ops)?;
            self.metrics.record_delete(queue, purged);
        }
        state.index.clear();
        drop(state);

        debug!(queue = %queue, purged, "queue purged");
        Ok(purged)
    }

    // --- Reads ---

    /// A live message by id, without leasing it.
    pub fn peek(&self, queue: &str, msg_id: u64) -> QueueResult<Option<Message>> {
        let handle = self.live_queue(queue)?;
        let _state = Self::lock(&handle)?;
        Ok(self.storage.get_message(&keys::message_key(queue, msg_id))?)
    }

    pub fn get_archived(&self, queue: &str, msg_id: u64) -> QueueResult<Option<ArchivedMessage>> {
        let handle = self.live_queue(queue)?;
        let _state = Self::lock(&handle)?;
        Ok(self.storage.get_archived(&keys::message_key(queue, msg_id))?)
    }

    /// The whole archive of a queue, in id order.
    pub fn list_archived(&self, queue: &str) -> QueueResult<Vec<ArchivedMessage>> {
        let handle = self.live_queue(queue)?;
        let _state = Self::lock(&handle)?;
        Ok(self.storage.list_archived(&keys::queue_prefix(queue))?)
    }

    pub fn queue_metrics(&self, queue: &str) -> QueueResult<QueueMetrics> {
        let handle = self.live_queue(queue)?;
        let state = Self::lock(&handle)?;
        let now = self.now_ms();
        let prefix = keys::queue_prefix(queue);

        let age_sec = |enqueued_at: u64| now.saturating_sub(enqueued_at) / 1000;
        let range = state.index.enqueued_range();
        Ok(QueueMetrics {
            queue_name: queue.to_string(),
            queue_length: state.index.len() as u64,
            newest_msg_age_sec: range.map(|(_, newest)| age_sec(newest)),
            oldest_msg_age_sec: range.map(|(oldest, _)| age_sec(oldest)),
            total_messages: state.last_id,
            archive_length: self.storage.count_archived(&prefix)?,
            scrape_time: now,
        })
    }

    /// Metrics for every queue, ordered by name.
    pub fn all_queue_metrics(&self) -> QueueResult<Vec<QueueMetrics>> {
        let mut all = Vec::new();
        for meta in self.storage.list_queues()? {
            match self.queue_metrics(&meta.name) {
                Ok(metrics) => all.push(metrics),
                // dropped between the listing and the lock
                Err(QueueError::QueueNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(all)
    }
}
