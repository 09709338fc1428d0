//! jobqueue
//!
//! Command line client and worker for Redis-backed job queues.
//!
//! ## Architecture
//!
//! ```text
//! jobqueue publish/peek/count/stats/take/reserve/finish
//!   ↓
//! Queue<RedisStore>
//!   ↓
//! Redis: queue:{name}:messages | delayed | reserved
//!
//! jobqueue work
//!   ↓
//! QueueWorker<LoggingProcessor> over Queue<RedisStore> (or Queue<MemoryStore> with --backend memory) (retry with backoff, graceful shutdown)
//! ```
//!
//! Configuration comes from the environment (`JOBQUEUE_REDIS_URL`,
//! `JOBQUEUE_TIMEOUT_SECS`, `JOBQUEUE_LEASE_SECS`, `JOBQUEUE_BACKEND`, ...)
//! and can be overridden per invocation with flags.

mod processor;

pub use processor::LoggingProcessor;

use clap::{Parser, Subcommand};
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::{Environment, FromEnv};
use eyre::{Result, WrapErr};
use job_queue::{
    decode, Backend, MemoryStore, Message, MessageQueue, MessageState, Queue, QueueBuilder,
    QueueOptions, QueueStore, QueueWorker, WorkerConfig,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "jobqueue")]
#[command(about = "Publish, inspect and process jobs on a Redis-backed queue")]
pub struct Cli {
    /// Queue name
    #[arg(short, long, global = true, default_value = "default")]
    pub queue: String,

    /// Redis URL (overrides JOBQUEUE_REDIS_URL / REDIS_URL)
    #[arg(long, global = true)]
    pub connection: Option<String>,

    /// Store backend: redis, or memory for `work` only (it does not outlive the process)
    #[arg(long, global = true)]
    pub backend: Option<Backend>,

    /// Reservation lease in seconds
    #[arg(long, global = true)]
    pub lease: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Publish a message (JSON, or a plain string)
    Publish {
        payload: String,

        /// Seconds before the message becomes visible
        #[arg(short, long, default_value_t = 0)]
        delay: u64,

        /// Attempt count to store with the message
        #[arg(long, default_value_t = 0)]
        attempts: u32,
    },

    /// Show ready messages without consuming them
    Peek {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Number of ready messages
    Count,

    /// Ready, delayed and reserved counts
    Stats,

    /// Dequeue one message; it is done as soon as it is taken
    Take {
        /// Seconds to wait; 0 waits forever, omitted uses the queue default
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Reserve one message under a lease; print it with its encoded form
    Reserve {
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Finish a reserved message, given the encoded form printed by `reserve`
    Finish { encoded: String },

    /// Run a worker that logs every message until interrupted
    Work {
        /// Deliveries before a failing message is abandoned
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,

        /// Blocking wait per reserve, in milliseconds
        #[arg(long, default_value_t = 1000)]
        poll_ms: u64,

        /// First retry delay in seconds; doubles per attempt
        #[arg(long, default_value_t = 1)]
        retry_base_secs: u64,

        /// Maximum retry delay in seconds
        #[arg(long, default_value_t = 30)]
        retry_max_secs: u64,
    },

    /// Move entries left by the legacy protocol back to the ready list
    RecoverLegacy,
}

impl Cli {
    /// Environment configuration with command line overrides applied.
    pub fn queue_options(&self) -> Result<QueueOptions> {
        let mut options =
            QueueOptions::from_env().wrap_err("Failed to load queue configuration")?;

        if let Some(connection) = &self.connection {
            options.connection = Some(connection.clone());
        }
        if let Some(backend) = self.backend {
            options.backend = backend;
        }
        if let Some(lease) = self.lease {
            options.lease_seconds = lease;
        }

        // The in-process store does not outlive a one-shot command
        if options.backend == Backend::Memory && !matches!(self.command, Commands::Work { .. }) {
            eyre::bail!("The memory backend only works with `jobqueue work`");
        }
        Ok(options)
    }
}

/// What the CLI prints for a message.
#[derive(Debug, Serialize)]
struct MessageView<'a> {
    identifier: Option<&'a str>,
    state: MessageState,
    attempts: u32,
    payload: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoded: Option<&'a str>,
}

impl<'a> MessageView<'a> {
    fn new(message: &'a Message) -> Self {
        Self {
            identifier: message.identifier(),
            state: message.state(),
            attempts: message.attempts(),
            payload: message.payload(),
            encoded: None,
        }
    }

    fn with_encoded(mut self, message: &'a Message) -> Self {
        self.encoded = message.encoded();
        self
    }
}

/// Interpret a payload argument as JSON, falling back to a plain string.
pub fn parse_payload(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run the CLI.
pub async fn run() -> Result<()> {
    install_color_eyre();

    let environment = Environment::from_env();
    init_tracing(&environment);

    job_queue::init_metrics().wrap_err("Failed to install metrics recorder")?;

    let cli = Cli::parse();
    let options = cli.queue_options()?;
    let builder = QueueBuilder::new(cli.queue.as_str()).options(options.clone());

    match options.backend {
        Backend::Redis => {
            let queue = builder
                .connect()
                .await
                .wrap_err_with(|| format!("Failed to open queue '{}'", cli.queue))?;
            execute(queue, cli.command).await
        }
        Backend::Memory => {
            let queue = builder
                .in_memory(MemoryStore::new())
                .wrap_err_with(|| format!("Failed to open queue '{}'", cli.queue))?;
            execute(queue, cli.command).await
        }
    }
}

async fn execute<S: QueueStore + 'static>(queue: Queue<S>, command: Commands) -> Result<()> {
    match command {
        Commands::Publish {
            payload,
            delay,
            attempts,
        } => {
            let mut message = Message::new(parse_payload(&payload)).with_attempts(attempts);
            if delay > 0 {
                message = message.with_delay(Duration::from_secs(delay));
            }
            let published = queue.publish(message).await?;
            print_json(&MessageView::new(&published))?;
        }

        Commands::Peek { limit } => {
            let messages = queue.peek(limit).await?;
            let views: Vec<_> = messages.iter().map(MessageView::new).collect();
            print_json(&views)?;
        }

        Commands::Count => {
            println!("{}", queue.count().await?);
        }

        Commands::Stats => {
            print_json(&queue.stats().await?)?;
        }

        Commands::Take { timeout } => {
            let taken = queue
                .wait_and_take(timeout.map(Duration::from_secs))
                .await?;
            print_json(&taken.as_ref().map(MessageView::new))?;
        }

        Commands::Reserve { timeout } => {
            let reserved = queue
                .wait_and_reserve(timeout.map(Duration::from_secs))
                .await?;
            print_json(&reserved.as_ref().map(|m| MessageView::new(m).with_encoded(m)))?;
        }

        Commands::Finish { encoded } => {
            let message = decode(encoded, MessageState::Reserved)
                .wrap_err("Argument is not an encoded message")?;
            let outcome = queue.finish(message).await?;
            print_json(&serde_json::json!({ "finished": outcome.finished }))?;
        }

        Commands::Work {
            max_attempts,
            poll_ms,
            retry_base_secs,
            retry_max_secs,
        } => {
            let config = WorkerConfig::new()
                .with_max_attempts(max_attempts)
                .with_poll_timeout(Duration::from_millis(poll_ms))
                .with_retry_delay(
                    Duration::from_secs(retry_base_secs),
                    Duration::from_secs(retry_max_secs),
                );

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if let Err(e) = shutdown_signal().await {
                    error!("Error waiting for shutdown signal: {}", e);
                }
                let _ = shutdown_tx.send(true);
            });

            let queue: Arc<dyn MessageQueue> = Arc::new(queue);
            let worker = QueueWorker::new(queue, LoggingProcessor, config);
            worker.run(shutdown_rx).await?;
        }

        Commands::RecoverLegacy => {
            let recovered = queue.recover_legacy().await?;
            info!(recovered, "Legacy recovery complete");
            println!("{}", recovered);
        }
    }

    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .wrap_err("Failed to install Ctrl+C handler")
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install signal handler")?
            .recv()
            .await;
        Ok::<(), eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_publish() {
        let cli = Cli::try_parse_from([
            "jobqueue", "--queue", "emails", "publish", r#"{"to":"a@b.c"}"#, "--delay", "30",
        ])
        .unwrap();

        assert_eq!(cli.queue, "emails");
        match cli.command {
            Commands::Publish {
                payload,
                delay,
                attempts,
            } => {
                assert_eq!(parse_payload(&payload), json!({"to": "a@b.c"}));
                assert_eq!(delay, 30);
                assert_eq!(attempts, 0);
            }
            other => panic!("expected publish, got {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["jobqueue", "stats", "--backend", "memory", "-q", "jobs"])
            .unwrap();

        assert_eq!(cli.backend, Some(Backend::Memory));
        assert_eq!(cli.queue, "jobs");
        assert!(matches!(cli.command, Commands::Stats));
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(Cli::try_parse_from(["jobqueue", "count", "--backend", "kafka"]).is_err());
    }

    #[test]
    fn test_parse_payload_falls_back_to_string() {
        assert_eq!(parse_payload("42"), json!(42));
        assert_eq!(parse_payload("resize image"), json!("resize image"));
    }

    #[test]
    fn test_flags_override_environment() {
        temp_env::with_vars(
            [
                ("JOBQUEUE_REDIS_URL", Some("redis://env-host:6379")),
                ("REDIS_DATABASE", None),
                ("JOBQUEUE_LEASE_SECS", Some("90")),
                ("JOBQUEUE_BACKEND", None),
            ],
            || {
                let cli = Cli::try_parse_from([
                    "jobqueue",
                    "--connection",
                    "redis://flag-host:6379/3",
                    "count",
                ])
                .unwrap();

                let options = cli.queue_options().unwrap();
                assert_eq!(options.connection.as_deref(), Some("redis://flag-host:6379/3"));
                assert_eq!(options.lease_seconds, 90);
                assert_eq!(options.backend, Backend::Redis);
            },
        );
    }

    #[test]
    fn test_memory_backend_is_limited_to_work() {
        temp_env::with_vars([("JOBQUEUE_BACKEND", None::<&str>)], || {
            let publish =
                Cli::try_parse_from(["jobqueue", "--backend", "memory", "publish", "x"]).unwrap();
            let work = Cli::try_parse_from(["jobqueue", "--backend", "memory", "work"]).unwrap();

            assert!(publish.queue_options().is_err());
            assert_eq!(work.queue_options().unwrap().backend, Backend::Memory);
        });
    }

    #[tokio::test]
    async fn test_execute_against_memory_queue() {
        let queue = QueueBuilder::new("cli")
            .in_memory(MemoryStore::new())
            .unwrap();

        execute(
            queue,
            Commands::Publish {
                payload: "hello".to_string(),
                delay: 0,
                attempts: 0,
            },
        )
        .await
        .unwrap();
    }

    #[test]
    fn test_message_view_hides_encoding_unless_asked() {
        let message = decode(
            r#"{"payload":1,"identifier":"x","attemps":0,"state":null}"#.to_string(),
            MessageState::Reserved,
        )
        .unwrap();

        let plain = serde_json::to_value(MessageView::new(&message)).unwrap();
        let full = serde_json::to_value(MessageView::new(&message).with_encoded(&message)).unwrap();

        assert!(plain.get("encoded").is_none());
        assert_eq!(full["identifier"], "x");
        assert!(full["encoded"].is_string());
        assert_eq!(full["state"], "reserved");
    }
}
