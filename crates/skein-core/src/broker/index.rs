use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy)]
struct Entry {
    enqueued_at: u64,
    visible_at: u64,
}

/// In-memory index of a queue's live messages, kept in step with the
/// `messages` column family under the queue's mutex.
///
/// Messages sit in one of two sets: `ready` (visible, ordered by id) or
/// `hidden` (ordered by the time they become visible). `promote` moves
/// hidden messages whose deadline has passed into `ready`, so picking the
/// next `count` available messages never touches storage rows that are
/// leased or delayed.
#[derive(Debug, Default)]
pub(super) struct MessageIndex {
    entries: BTreeMap<u64, Entry>,
    ready: BTreeSet<u64>,
    hidden: BTreeSet<(u64, u64)>,
}

impl MessageIndex {
    /// Track a message. It starts hidden and is promoted on the next read
    /// once `visible_at` has passed.
    pub fn insert(&mut self, id: u64, enqueued_at: u64, visible_at: u64) {
        self.remove(id);
        self.entries.insert(
            id,
            Entry {
                enqueued_at,
                visible_at,
            },
        );
        self.hidden.insert((visible_at, id));
    }

    /// Returns whether the id was tracked.
    pub fn remove(&mut self, id: u64) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };
        if !self.ready.remove(&id) {
            self.hidden.remove(&(entry.visible_at, id));
        }
        true
    }

    /// Move a tracked message's visibility deadline.
    pub fn set_visible_at(&mut self, id: u64, visible_at: u64) {
        if let Some(entry) = self.entries.get(&id).copied() {
            self.insert(id, entry.enqueued_at, visible_at);
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Move every hidden message with `visible_at <= now_ms` into `ready`.
    pub fn promote(&mut self, now_ms: u64) {
        while let Some(&(visible_at, id)) = self.hidden.first() {
            if visible_at > now_ms {
                break;
            }
            self.hidden.pop_first();
            self.ready.insert(id);
        }
    }

    /// Ids available at the last `promote`, lowest first.
    pub fn ready(&self) -> impl Iterator<Item = u64> + '_ {
        self.ready.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `(oldest, newest)` enqueue times over all live messages.
    pub fn enqueued_range(&self) -> Option<(u64, u64)> {
        self.entries.values().fold(None, |range, entry| {
            let at = entry.enqueued_at;
            Some(match range {
                None => (at, at),
                Some((lo, hi)) => (lo.min(at), hi.max(at)),
            })
        })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ready.clear();
        self.hidden.clear();
    }
}
