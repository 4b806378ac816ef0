//! Key encoding for RocksDB column families.
//!
//! All numeric values use big-endian encoding for correct lexicographic ordering.
//! Composite keys use `:` (0x3A) as separator.
//! Variable-length strings are length-prefixed with a big-endian u16.

const SEPARATOR: u8 = b':';

/// State-CF key prefix for per-queue id sequences.
pub const SEQUENCE_PREFIX: &str = "seq:";

/// State-CF key prefix for per-queue insert-notification settings.
pub const NOTIFY_PREFIX: &str = "notify:";

/// Encode a u64 as 8 big-endian bytes.
fn encode_u64(val: u64) -> [u8; 8] {
    val.to_be_bytes()
}

/// Encode a variable-length string with a 2-byte big-endian length prefix.
fn encode_string(s: &str) -> Vec<u8> {
    let len = u16::try_from(s.len()).expect("key string exceeds 64 KiB");
    let mut buf = Vec::with_capacity(2 + s.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    buf
}

/// Build a prefix covering every row a queue owns in a per-queue column family
/// (`messages`, `archive`, `bindings`).
pub fn queue_prefix(queue: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(2 + queue.len() + 1);
    prefix.extend_from_slice(&encode_string(queue));
    prefix.push(SEPARATOR);
    prefix
}

/// Build a message key: `{queue}:{msg_id}`
///
/// Key layout (binary):
/// - length-prefixed queue name
/// - separator
/// - 8-byte big-endian message id
///
/// Ids are monotonic per queue, so a prefix scan yields messages in id order.
/// The archive column family uses the same layout.
pub fn message_key(queue: &str, msg_id: u64) -> Vec<u8> {
    let mut key = queue_prefix(queue);
    key.extend_from_slice(&encode_u64(msg_id));
    key
}

/// Build a binding key: `{queue}:{pattern}`
///
/// Queue-first so that all bindings owned by a queue share one prefix.
pub fn binding_key(queue: &str, pattern: &str) -> Vec<u8> {
    let mut key = queue_prefix(queue);
    key.extend_from_slice(&encode_string(pattern));
    key
}

/// Build a queue key for the `queues` column family.
pub fn queue_key(queue: &str) -> Vec<u8> {
    queue.as_bytes().to_vec()
}

/// State key holding the last id assigned in a queue.
pub fn sequence_key(queue: &str) -> String {
    format!("{SEQUENCE_PREFIX}{queue}")
}

/// State key holding a queue's insert-notification settings.
pub fn notify_key(queue: &str) -> String {
    format!("{NOTIFY_PREFIX}{queue}")
}

/// Encode a sequence value.
pub fn sequence_value(last_id: u64) -> Vec<u8> {
    encode_u64(last_id).to_vec()
}

/// Decode a sequence value written by `sequence_value`.
pub fn parse_sequence_value(value: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = value.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
