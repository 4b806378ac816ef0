use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use skein_core::broker::config::LeaseConfig;
use skein_core::{
    AdminError, BindError, Broker, BrokerConfig, Delay, NewMessage, NotifyError, PublishError,
    QueueError,
};
use tracing::debug;

const CONFIG_PATHS: [&str; 2] = ["skein.toml", "/etc/skein/skein.toml"];

#[derive(Parser)]
#[command(name = "skein", about = "Skein queue and topic routing CLI")]
struct Cli {
    /// Data directory (overrides SKEIN_DATA_DIR and the config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage queues
    #[command(subcommand)]
    Queue(QueueCommands),

    /// Manage topic bindings
    #[command(subcommand)]
    Topic(TopicCommands),

    /// Publish a message to every queue bound to a matching pattern
    Publish {
        /// Routing key, e.g. "logs.api.error"
        routing_key: String,

        /// JSON payload
        payload: String,

        #[command(flatten)]
        opts: EnqueueOpts,
    },

    /// Send a message directly to a queue
    Send {
        queue: String,

        /// JSON payload
        payload: String,

        #[command(flatten)]
        opts: EnqueueOpts,
    },

    /// Lease messages, printing one JSON object per line
    Read {
        queue: String,

        #[arg(long, default_value = "1")]
        count: usize,

        /// Lease duration in milliseconds (defaults to the configured value)
        #[arg(long)]
        lease_ms: Option<i64>,

        /// Keep polling for up to this long when the queue is empty
        /// (defaults to the configured value)
        #[arg(long)]
        wait_ms: Option<u64>,

        /// Polling interval while waiting (defaults to the configured value)
        #[arg(long)]
        poll_ms: Option<u64>,

        /// Only lease messages whose payload contains this JSON
        #[arg(long)]
        filter: Option<String>,
    },

    /// Remove and print available messages
    Pop {
        queue: String,

        #[arg(long, default_value = "1")]
        count: usize,
    },

    /// Delete messages by id
    Delete {
        queue: String,

        #[arg(required = true)]
        ids: Vec<u64>,
    },

    /// Move messages to the queue's archive
    Archive {
        queue: String,

        #[arg(required = true)]
        ids: Vec<u64>,
    },

    /// Delete every message in a queue
    Purge { queue: String },

    /// Manage insert notifications
    #[command(subcommand)]
    Notify(NotifyCommands),
}

#[derive(clap::Args)]
struct EnqueueOpts {
    /// JSON headers
    #[arg(long)]
    headers: Option<String>,

    /// Delay before the message becomes visible, in milliseconds
    #[arg(long, allow_negative_numbers = true)]
    delay_ms: Option<i64>,
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Create a new queue
    Create { name: String },

    /// Drop a queue with its messages, archive and bindings
    Drop { name: String },

    /// List all queues
    List,

    /// Show queue metrics (all queues when no name is given)
    Metrics { name: Option<String> },
}

#[derive(Subcommand)]
enum TopicCommands {
    /// Bind a queue to a topic pattern
    Bind { pattern: String, queue: String },

    /// Remove a binding
    Unbind { pattern: String, queue: String },

    /// Show which bindings a routing key would match
    Routes { routing_key: String },

    /// List bindings
    List {
        #[arg(long)]
        queue: Option<String>,
    },
}

#[derive(Subcommand)]
enum NotifyCommands {
    /// Enable insert notifications for a queue
    Enable {
        queue: String,

        /// Minimum milliseconds between notifications
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        throttle_ms: i64,
    },

    /// Disable insert notifications for a queue
    Disable { queue: String },

    /// List queues with insert notifications enabled
    List,
}

fn load_config(data_dir: Option<PathBuf>) -> Result<BrokerConfig, String> {
    let mut config = BrokerConfig::discover(&CONFIG_PATHS).map_err(|e| e.to_string())?;
    if let Ok(dir) = std::env::var("SKEIN_DATA_DIR") {
        config.storage.data_dir = PathBuf::from(dir);
    }
    if let Some(dir) = data_dir {
        config.storage.data_dir = dir;
    }
    debug!(data_dir = %config.storage.data_dir.display(), "configuration loaded");
    Ok(config)
}

fn parse_json(what: &str, raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid {what} JSON: {e}"))
}

fn new_message(payload: &str, headers: Option<&str>) -> Result<NewMessage, String> {
    let mut message = NewMessage::new(parse_json("payload", payload)?);
    if let Some(raw) = headers {
        message = message.with_headers(parse_json("headers", raw)?);
    }
    Ok(message)
}

fn delay(delay_ms: Option<i64>) -> Delay {
    delay_ms.map_or(Delay::None, Delay::Millis)
}

fn queue_error(err: QueueError) -> String {
    match err {
        QueueError::QueueNotFound(q) => format!("queue \"{q}\" does not exist"),
        other => other.to_string(),
    }
}

fn bind_error(err: BindError) -> String {
    match err {
        BindError::QueueNotFound(q) => format!("queue \"{q}\" does not exist"),
        other => other.to_string(),
    }
}

fn notify_error(err: NotifyError) -> String {
    match err {
        NotifyError::QueueNotFound(q) => format!("queue \"{q}\" does not exist"),
        other => other.to_string(),
    }
}

fn admin_error(err: AdminError) -> String {
    err.to_string()
}

fn publish_error(err: PublishError) -> String {
    err.to_string()
}

/// Lease duration, poll budget and poll interval for `read`, falling back
/// to the configured defaults.
fn read_timing(
    lease: &LeaseConfig,
    lease_ms: Option<i64>,
    wait_ms: Option<u64>,
    poll_ms: Option<u64>,
) -> Result<(i64, Duration, Duration), String> {
    let lease_ms = match lease_ms {
        Some(ms) => ms,
        None => i64::try_from(lease.default_lease_ms).map_err(|_| {
            format!(
                "configured default_lease_ms {} is out of range",
                lease.default_lease_ms
            )
        })?,
    };
    let max_wait = wait_ms.map_or_else(|| lease.poll_max_wait(), Duration::from_millis);
    let poll = poll_ms.map_or_else(|| lease.poll_interval(), Duration::from_millis);
    Ok((lease_ms, max_wait, poll))
}

fn print_json_line<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let line = serde_json::to_string(value).map_err(|e| e.to_string())?;
    println!("{line}");
    Ok(())
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn cmd_queue(broker: &Broker, cmd: QueueCommands) -> Result<(), String> {
    match cmd {
        QueueCommands::Create { name } => {
            if broker.create_queue(&name).map_err(admin_error)? {
                println!("Created queue \"{name}\"");
            } else {
                println!("Queue \"{name}\" already exists");
            }
        }
        QueueCommands::Drop { name } => {
            if !broker.drop_queue(&name).map_err(admin_error)? {
                return Err(format!("queue \"{name}\" does not exist"));
            }
            println!("Dropped queue \"{name}\"");
        }
        QueueCommands::List => {
            let queues = broker.list_queues().map_err(|e| e.to_string())?;
            if queues.is_empty() {
                println!("No queues found.");
                return Ok(());
            }
            let name_width = queues.iter().map(|q| q.name.len()).max().unwrap_or(4).max(4);
            println!("{:<name_width$}  {:>13}", "NAME", "CREATED_AT_MS");
            for q in &queues {
                println!("{:<name_width$}  {:>13}", q.name, q.created_at);
            }
        }
        QueueCommands::Metrics { name } => {
            let all = match name {
                Some(name) => vec![broker.queue_metrics(&name).map_err(queue_error)?],
                None => broker.all_queue_metrics().map_err(queue_error)?,
            };
            if all.is_empty() {
                println!("No queues found.");
                return Ok(());
            }
            let age = |a: Option<u64>| a.map_or_else(|| "-".to_string(), |s| s.to_string());
            let name_width = all.iter().map(|m| m.queue_name.len()).max().unwrap_or(4).max(4);
            println!(
                "{:<name_width$}  {:>7}  {:>8}  {:>10}  {:>10}  {:>5}",
                "NAME", "LENGTH", "ARCHIVED", "NEWEST_SEC", "OLDEST_SEC", "TOTAL"
            );
            for m in &all {
                println!(
                    "{:<name_width$}  {:>7}  {:>8}  {:>10}  {:>10}  {:>5}",
                    m.queue_name,
                    m.queue_length,
                    m.archive_length,
                    age(m.newest_msg_age_sec),
                    age(m.oldest_msg_age_sec),
                    m.total_messages
                );
            }
        }
    }
    Ok(())
}

fn cmd_topic(broker: &Broker, cmd: TopicCommands) -> Result<(), String> {
    match cmd {
        TopicCommands::Bind { pattern, queue } => {
            if broker.bind(&pattern, &queue).map_err(bind_error)? {
                println!("Bound \"{queue}\" to \"{pattern}\"");
            } else {
                println!("\"{queue}\" is already bound to \"{pattern}\"");
            }
        }
        TopicCommands::Unbind { pattern, queue } => {
            if broker.unbind(&pattern, &queue).map_err(bind_error)? {
                println!("Unbound \"{queue}\" from \"{pattern}\"");
            } else {
                println!("No binding of \"{queue}\" to \"{pattern}\"");
            }
        }
        TopicCommands::Routes { routing_key } => {
            let routes = broker
                .dry_run_matches(&routing_key)
                .map_err(|e| e.to_string())?;
            if routes.is_empty() {
                println!("No bindings match \"{routing_key}\".");
                return Ok(());
            }
            let pattern_width = routes.iter().map(|r| r.pattern.len()).max().unwrap_or(7).max(7);
            let queue_width = routes.iter().map(|r| r.queue_name.len()).max().unwrap_or(5).max(5);
            println!("{:<pattern_width$}  {:<queue_width$}  REGEX", "PATTERN", "QUEUE");
            for r in &routes {
                println!(
                    "{:<pattern_width$}  {:<queue_width$}  {}",
                    r.pattern, r.queue_name, r.compiled_regex
                );
            }
        }
        TopicCommands::List { queue } => {
            let bindings = broker.list_bindings(queue.as_deref());
            if bindings.is_empty() {
                println!("No bindings found.");
                return Ok(());
            }
            let pattern_width = bindings.iter().map(|b| b.pattern.len()).max().unwrap_or(7).max(7);
            println!("{:<pattern_width$}  QUEUE", "PATTERN");
            for b in &bindings {
                println!("{:<pattern_width$}  {}", b.pattern, b.queue_name);
            }
        }
    }
    Ok(())
}

fn cmd_notify(broker: &Broker, cmd: NotifyCommands) -> Result<(), String> {
    match cmd {
        NotifyCommands::Enable { queue, throttle_ms } => {
            broker
                .enable_notify_insert(&queue, throttle_ms)
                .map_err(notify_error)?;
            println!("Insert notifications enabled for \"{queue}\" (throttle {throttle_ms} ms)");
        }
        NotifyCommands::Disable { queue } => {
            if broker.disable_notify_insert(&queue).map_err(notify_error)? {
                println!("Insert notifications disabled for \"{queue}\"");
            } else {
                println!("Insert notifications were not enabled for \"{queue}\"");
            }
        }
        NotifyCommands::List => {
            let settings = broker.list_notify_settings();
            if settings.is_empty() {
                println!("No queues have insert notifications enabled.");
                return Ok(());
            }
            let name_width = settings.iter().map(|(q, _)| q.len()).max().unwrap_or(4).max(4);
            println!("{:<name_width$}  {:>11}", "NAME", "THROTTLE_MS");
            for (queue, throttle) in &settings {
                println!("{:<name_width$}  {:>11}", queue, throttle.throttle_interval_ms);
            }
        }
    }
    Ok(())
}

async fn run(broker: &Broker, command: Commands) -> Result<(), String> {
    match command {
        Commands::Queue(cmd) => cmd_queue(broker, cmd)?,
        Commands::Topic(cmd) => cmd_topic(broker, cmd)?,
        Commands::Notify(cmd) => cmd_notify(broker, cmd)?,
        Commands::Publish {
            routing_key,
            payload,
            opts,
        } => {
            let message = new_message(&payload, opts.headers.as_deref())?;
            let matched = broker
                .publish(&routing_key, message, delay(opts.delay_ms))
                .map_err(publish_error)?;
            println!("Published to {matched} queue{}", plural(matched));
        }
        Commands::Send {
            queue,
            payload,
            opts,
        } => {
            let message = new_message(&payload, opts.headers.as_deref())?;
            let id = broker
                .send(&queue, message, delay(opts.delay_ms))
                .map_err(queue_error)?;
            println!("{id}");
        }
        Commands::Read {
            queue,
            count,
            lease_ms,
            wait_ms,
            poll_ms,
            filter,
        } => {
            let (lease_ms, max_wait, poll) =
                read_timing(&broker.config().lease, lease_ms, wait_ms, poll_ms)?;
            let filter = filter.map(|raw| parse_json("filter", &raw)).transpose()?;
            let messages = broker
                .lease_with_poll(
                    &queue,
                    count,
                    lease_ms,
                    max_wait,
                    poll,
                    filter.as_ref(),
                )
                .await
                .map_err(queue_error)?;
            for msg in &messages {
                print_json_line(msg)?;
            }
        }
        Commands::Pop { queue, count } => {
            for msg in &broker.pop(&queue, count).map_err(queue_error)? {
                print_json_line(msg)?;
            }
        }
        Commands::Delete { queue, ids } => {
            let deleted = broker.delete_batch(&queue, &ids).map_err(queue_error)?;
            println!("Deleted {} message{}", deleted.len(), plural(deleted.len()));
        }
        Commands::Archive { queue, ids } => {
            let archived = broker.archive_batch(&queue, &ids).map_err(queue_error)?;
            println!("Archived {} message{}", archived.len(), plural(archived.len()));
        }
        Commands::Purge { queue } => {
            let purged = broker.purge(&queue).map_err(queue_error)?;
            println!("Purged {purged} message{}", plural(purged as usize));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    skein_core::telemetry::init_tracing("warn");
    let cli = Cli::parse();

    let result = async move {
        let config = load_config(cli.data_dir)?;
        let broker = Broker::open(config).map_err(|e| format!("cannot open data directory: {e}"))?;
        run(&broker, cli.command).await?;
        broker.flush().map_err(|e| e.to_string())
    }
    .await;

    if let Err(message) = result {
        eprintln!("Error: {message}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::RocksDbStorage;
    use std::sync::Arc;

    fn test_broker() -> (Broker, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RocksDbStorage::open(dir.path()).unwrap());
        let broker = Broker::new(storage, BrokerConfig::default()).unwrap();
        (broker, dir)
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("skein").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn parses_publish_with_options() {
        let cli = parse(&[
            "--data-dir",
            "/tmp/x",
            "publish",
            "logs.api.error",
            r#"{"a":1}"#,
            "--headers",
            r#"{"h":true}"#,
            "--delay-ms",
            "250",
        ]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
        match cli.command {
            Commands::Publish {
                routing_key, opts, ..
            } => {
                assert_eq!(routing_key, "logs.api.error");
                assert_eq!(opts.delay_ms, Some(250));
                assert!(opts.headers.is_some());
            }
            _ => panic!("expected publish"),
        }
    }

    #[test]
    fn read_timing_falls_back_to_config() {
        let lease = LeaseConfig::default();
        let (lease_ms, max_wait, poll) = read_timing(&lease, None, None, None).unwrap();
        assert_eq!(lease_ms, 30_000);
        assert_eq!(max_wait, Duration::from_millis(5_000));
        assert_eq!(poll, Duration::from_millis(100));

        let (lease_ms, max_wait, poll) =
            read_timing(&lease, Some(-1), Some(0), Some(20)).unwrap();
        assert_eq!(lease_ms, -1);
        assert_eq!(max_wait, Duration::ZERO);
        assert_eq!(poll, Duration::from_millis(20));
    }

    #[test]
    fn oversized_default_lease_is_an_error() {
        let lease = LeaseConfig {
            default_lease_ms: u64::MAX,
            ..LeaseConfig::default()
        };
        let err = read_timing(&lease, None, None, None).unwrap_err();
        assert!(err.contains("default_lease_ms"));
        assert!(read_timing(&lease, Some(1_000), None, None).is_ok());
    }

    #[test]
    fn delete_requires_ids() {
        assert!(Cli::try_parse_from(["skein", "delete", "q"]).is_err());
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = new_message("{not json", None).unwrap_err();
        assert!(err.starts_with("invalid payload JSON"));
        let err = new_message("{}", Some("[")).unwrap_err();
        assert!(err.starts_with("invalid headers JSON"));
    }

    #[tokio::test]
    async fn commands_round_trip_through_the_broker() {
        let (broker, _dir) = test_broker();
        run(&broker, parse(&["queue", "create", "q1"]).command).await.unwrap();
        run(&broker, parse(&["topic", "bind", "logs.#", "q1"]).command)
            .await
            .unwrap();
        run(&broker, parse(&["publish", "logs.x", r#"{"n":1}"#]).command)
            .await
            .unwrap();

        assert_eq!(broker.queue_metrics("q1").unwrap().queue_length, 1);

        run(&broker, parse(&["read", "q1", "--lease-ms", "60000"]).command)
            .await
            .unwrap();
        run(&broker, parse(&["archive", "q1", "1"]).command).await.unwrap();
        assert_eq!(broker.list_archived("q1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn errors_name_the_missing_queue() {
        let (broker, _dir) = test_broker();
        let err = run(&broker, parse(&["send", "ghost", "1"]).command)
            .await
            .unwrap_err();
        assert_eq!(err, "queue \"ghost\" does not exist");

        let err = run(&broker, parse(&["queue", "drop", "ghost"]).command)
            .await
            .unwrap_err();
        assert_eq!(err, "queue \"ghost\" does not exist");
    }
}
