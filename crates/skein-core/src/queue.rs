use serde::{Deserialize, Serialize};

/// Queue metadata stored in the `queues` column family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueMeta {
    pub name: String,
    pub created_at: u64,
}

impl QueueMeta {
    /// Longest accepted queue name.
    pub const MAX_NAME_LEN: usize = 47;

    pub fn new(name: String, created_at: u64) -> Self {
        Self { name, created_at }
    }
}

/// Point-in-time statistics for a single queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMetrics {
    pub queue_name: String,
    pub queue_length: u64,
    pub newest_msg_age_sec: Option<u64>,
    pub oldest_msg_age_sec: Option<u64>,
    /// Number of ids ever assigned in this queue.
    pub total_messages: u64,
    pub archive_length: u64,
    pub scrape_time: u64,
}

/// Check a queue name: 1..=47 characters from `[A-Za-z0-9_-]`.
pub fn validate_queue_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("queue name cannot be empty".to_string());
    }
    if name.len() > QueueMeta::MAX_NAME_LEN {
        return Err(format!(
            "queue name cannot exceed {} characters (got {})",
            QueueMeta::MAX_NAME_LEN,
            name.len()
        ));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(format!("queue name contains invalid character {c:?}"));
    }
    Ok(())
}
