use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;

/// OTel counters for the broker. Created once when the broker opens and
/// recorded after each committed operation.
pub struct Metrics {
    pub messages_enqueued: Counter<u64>,
    pub messages_leased: Counter<u64>,
    pub messages_deleted: Counter<u64>,
    pub messages_archived: Counter<u64>,
    pub publish_fanout: Counter<u64>,
    pub notify_sent: Counter<u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create metrics from the global meter provider. If no meter provider
    /// is configured, the instruments are no-op.
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("skein");
        Self::from_meter(&meter)
    }

    /// Create metrics from a specific meter (used in tests with in-memory exporter).
    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            messages_enqueued: meter
                .u64_counter("skein.messages.enqueued")
                .with_description("Total messages enqueued, direct or via publish")
                .build(),
            messages_leased: meter
                .u64_counter("skein.messages.leased")
                .with_description("Total messages handed out by lease")
                .build(),
            messages_deleted: meter
                .u64_counter("skein.messages.deleted")
                .with_description("Total messages deleted, popped or purged")
                .build(),
            messages_archived: meter
                .u64_counter("skein.messages.archived")
                .with_description("Total messages moved to the archive")
                .build(),
            publish_fanout: meter
                .u64_counter("skein.publish.fanout")
                .with_description("Queues reached by topic publishes")
                .build(),
            notify_sent: meter
                .u64_counter("skein.notify.sent")
                .with_description("Insert notifications emitted")
                .build(),
        }
    }

    fn queue_label(queue: &str) -> [KeyValue; 1] {
        [KeyValue::new("queue", queue.to_string())]
    }

    pub fn record_enqueue(&self, queue: &str, count: u64) {
        self.messages_enqueued.add(count, &Self::queue_label(queue));
    }

    pub fn record_lease(&self, queue: &str, count: u64) {
        self.messages_leased.add(count, &Self::queue_label(queue));
    }

    pub fn record_delete(&self, queue: &str, count: u64) {
        self.messages_deleted.add(count, &Self::queue_label(queue));
    }

    pub fn record_archive(&self, queue: &str, count: u64) {
        self.messages_archived.add(count, &Self::queue_label(queue));
    }

    pub fn record_fanout(&self, queue: &str) {
        self.publish_fanout.add(1, &Self::queue_label(queue));
    }

    pub fn record_notify(&self, queue: &str) {
        self.notify_sent.add(1, &Self::queue_label(queue));
    }
}
