use std::fmt;

/// Low-level storage errors (RocksDB, serialization).
/// This is the error type for the `Storage` trait: storage operations can only
/// fail with infrastructure errors, never domain errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("rocksdb error: {0}")]
    RocksDb(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt data: {0}")]
    CorruptData(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::RocksDb(err.into_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// What a `ValidationError` was raised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    RoutingKey,
    Pattern,
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::RoutingKey => f.write_str("routing key"),
            Subject::Pattern => f.write_str("pattern"),
        }
    }
}

/// A routing key or topic pattern broke one of the segment grammar rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} cannot be empty")]
    Empty(Subject),

    #[error("{subject} cannot exceed {max} characters (got {len})")]
    TooLong {
        subject: Subject,
        len: usize,
        max: usize,
    },

    #[error("{subject} contains invalid characters: {found:?}")]
    InvalidCharacters { subject: Subject, found: char },

    #[error("{0} cannot start with a dot")]
    LeadingDot(Subject),

    #[error("{0} cannot end with a dot")]
    TrailingDot(Subject),

    #[error("{0} cannot contain consecutive dots")]
    ConsecutiveDots(Subject),

    #[error("pattern cannot contain adjacent wildcards: {0:?}")]
    AdjacentWildcards(String),

    #[error("pattern wildcard must be a whole segment: {0:?}")]
    PartialWildcard(String),
}

impl ValidationError {
    pub fn subject(&self) -> Subject {
        match self {
            ValidationError::Empty(s)
            | ValidationError::LeadingDot(s)
            | ValidationError::TrailingDot(s)
            | ValidationError::ConsecutiveDots(s) => *s,
            ValidationError::TooLong { subject, .. }
            | ValidationError::InvalidCharacters { subject, .. } => *subject,
            ValidationError::AdjacentWildcards(_) | ValidationError::PartialWildcard(_) => {
                Subject::Pattern
            }
        }
    }
}

/// Errors from per-queue message operations (send, lease, delete, archive, ...).
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from queue lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("invalid queue name: {0}")]
    InvalidQueueName(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from bind / unbind.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from topic publish.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from enabling or disabling insert notifications.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors loading a TOML configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("error parsing {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
pub type QueueResult<T> = std::result::Result<T, QueueError>;
