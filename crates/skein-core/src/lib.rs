pub mod broker;
pub mod clock;
pub mod error;
pub mod message;
pub mod queue;
pub mod routing;
pub mod storage;
pub mod telemetry;

pub use broker::{Broker, BrokerConfig, InsertNotification, NotifyThrottle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    AdminError, BindError, ConfigError, NotifyError, PublishError, QueueError, StorageError,
    StorageResult, ValidationError,
};
pub use message::{ArchivedMessage, Delay, Message, NewMessage};
pub use queue::{QueueMeta, QueueMetrics};
pub use routing::{BindingRecord, RouteMatch, TopicMatcher};
pub use storage::{RocksDbStorage, Storage, WriteBatchOp};
