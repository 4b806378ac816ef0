use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Core message domain type as stored in the `messages` column family.
///
/// `visible_at` is the lease deadline: the message is available to `lease`
/// once `visible_at <= now`, and hidden from other consumers before that.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: u64,
    pub payload: Value,
    pub headers: Option<Value>,
    pub enqueued_at: u64,
    pub visible_at: u64,
    pub read_count: u32,
    pub last_read_at: Option<u64>,
}

impl Message {
    pub fn is_available(&self, now_ms: u64) -> bool {
        self.visible_at <= now_ms
    }
}

/// A message moved out of the live collection by `archive`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchivedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub archived_at: u64,
}

/// Payload and optional headers for a message that has not been enqueued yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub payload: Value,
    pub headers: Option<Value>,
}

impl NewMessage {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            headers: None,
        }
    }

    pub fn with_headers(mut self, headers: Value) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// When a freshly enqueued message becomes visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delay {
    #[default]
    None,
    /// Relative to the enqueue time. Negative values are rejected.
    Millis(i64),
    /// Absolute epoch-millisecond timestamp. Past timestamps make the
    /// message visible immediately.
    At(u64),
}

impl Delay {
    /// Resolve into an absolute `visible_at`. Returns `None` for a negative
    /// relative delay.
    pub fn visible_at(self, now_ms: u64) -> Option<u64> {
        match self {
            Delay::None => Some(now_ms),
            Delay::Millis(ms) => u64::try_from(ms).ok().map(|ms| now_ms.saturating_add(ms)),
            Delay::At(at) => Some(at),
        }
    }
}

/// Structural containment: does `payload` contain everything in `filter`?
///
/// Objects match when every key of `filter` is present in `payload` with a
/// contained value; arrays when every element of `filter` is contained by
/// some element of `payload`; scalars when equal.
pub fn payload_contains(payload: &Value, filter: &Value) -> bool {
    match (payload, filter) {
        (Value::Object(have), Value::Object(want)) => want.iter().all(|(key, wanted)| {
            have.get(key)
                .is_some_and(|value| payload_contains(value, wanted))
        }),
        (Value::Array(have), Value::Array(want)) => want
            .iter()
            .all(|wanted| have.iter().any(|value| payload_contains(value, wanted))),
        (Value::Array(have), scalar) if !scalar.is_object() => {
            have.iter().any(|value| value == scalar)
        }
        (have, want) => have == want,
    }
}
