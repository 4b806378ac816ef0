use std::collections::BTreeSet;

use tracing::debug;

use super::lease::{check_payload, put_message, put_sequence, resolve_delay};
use super::Broker;
use crate::error::{BindError, PublishError, ValidationError};
use crate::message::{Delay, Message, NewMessage};
use crate::routing::{grammar, BindingRecord, RouteMatch, TopicMatcher};

impl Broker {
    /// Bind `queue` to `pattern`. Returns `false` if the pair was already bound.
    #[tracing::instrument(skip_all, fields(pattern = %pattern, queue = %queue))]
    pub fn bind(&self, pattern: &str, queue: &str) -> Result<bool, BindError> {
        let matcher = TopicMatcher::compile(pattern)?;
        let handle = self
            .queue_handle(queue)
            .ok_or_else(|| BindError::QueueNotFound(queue.to_string()))?;
        let _state = handle
            .lock_live()
            .ok_or_else(|| BindError::QueueNotFound(queue.to_string()))?;

        let created = self.directory.bind(matcher, queue, self.now_ms())?;
        if created {
            debug!(pattern = %pattern, queue = %queue, "binding created");
        }
        Ok(created)
    }

    /// Returns whether a binding was removed.
    #[tracing::instrument(skip_all, fields(pattern = %pattern, queue = %queue))]
    pub fn unbind(&self, pattern: &str, queue: &str) -> Result<bool, BindError> {
        let removed = self.directory.unbind(pattern, queue)?;
        if removed {
            debug!(pattern = %pattern, queue = %queue, "binding removed");
        }
        Ok(removed)
    }

    /// Every binding, optionally restricted to one queue, ordered by pattern
    /// then queue name.
    pub fn list_bindings(&self, queue: Option<&str>) -> Vec<BindingRecord> {
        self.directory
            .list(queue)
            .iter()
            .map(|binding| binding.record())
            .collect()
    }

    /// Resolve the bindings a publish to `routing_key` would use, without
    /// enqueuing anything.
    pub fn dry_run_matches(&self, routing_key: &str) -> Result<Vec<RouteMatch>, ValidationError> {
        Ok(self
            .directory
            .matching(routing_key)?
            .iter()
            .map(|binding| RouteMatch {
                pattern: binding.pattern().to_string(),
                queue_name: binding.queue_name().to_string(),
                compiled_regex: binding.matcher().source().to_string(),
            })
            .collect())
    }

    /// Publish a message to every queue with a binding matching
    /// `routing_key`. Returns the number of distinct queues that received it.
    ///
    /// All target queues are locked in name order and the enqueues are
    /// committed as one write batch: either every matched queue gets the
    /// message or none does.
    #[tracing::instrument(skip_all, fields(routing_key = %routing_key))]
    pub fn publish(
        &self,
        routing_key: &str,
        message: NewMessage,
        delay: Delay,
    ) -> Result<usize, PublishError> {
        grammar::validate_routing_key(routing_key)?;
        check_payload(&message).map_err(PublishError::InvalidArgument)?;
        let now = self.now_ms();
        let visible_at = resolve_delay(delay, now).map_err(PublishError::InvalidArgument)?;

        let targets: BTreeSet<String> = self
            .directory
            .matching(routing_key)?
            .iter()
            .map(|binding| binding.queue_name().to_string())
            .collect();
        if targets.is_empty() {
            debug!(routing_key = %routing_key, "no bindings matched");
            return Ok(0);
        }

        // BTreeSet iteration is sorted, so locks are taken in name order.
        // Queues dropped since the directory lookup are skipped.
        let handles: Vec<_> = targets
            .iter()
            .filter_map(|queue| self.queue_handle(queue))
            .collect();
        let mut locked: Vec<_> = handles
            .iter()
            .filter_map(|handle| handle.lock_live().map(|state| (handle.name.as_str(), state)))
            .collect();

        let mut ops = Vec::with_capacity(locked.len() * 2);
        for (queue, state) in &locked {
            let msg = Message {
                id: state.last_id + 1,
                payload: message.payload.clone(),
                headers: message.headers.clone(),
                enqueued_at: now,
                visible_at,
                read_count: 0,
                last_read_at: None,
            };
            ops.push(put_message(queue, &msg)?);
            ops.push(put_sequence(queue, msg.id));
        }
        self.storage.write_batch(ops)?;

        let mut delivered = Vec::with_capacity(locked.len());
        for (queue, state) in &mut locked {
            state.last_id += 1;
            let id = state.last_id;
            state.index.insert(id, now, visible_at);
            delivered.push((*queue, id));
        }
        drop(locked);

        for &(queue, msg_id) in &delivered {
            debug!(routing_key = %routing_key, queue = %queue, msg_id, "published");
            self.metrics.record_fanout(queue);
            self.after_enqueue(queue, 1, now);
        }
        Ok(delivered.len())
    }
}
