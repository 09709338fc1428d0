//! Worker loop on top of a [`MessageQueue`].
//!
//! Each iteration reserves one message, hands it to a [`MessageProcessor`]
//! and then either finishes it, republishes it with a backoff delay and an
//! incremented attempt count, or abandons it once retrying cannot help.

use crate::config::WorkerConfig;
use crate::error::{ErrorCategory, QueueError, Result};
use crate::message::Message;
use crate::metrics::{ProcessStatus, QueueMetrics};
use crate::queue::MessageQueue;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Handles reserved messages.
///
/// # Example
///
/// ```rust,ignore
/// use job_queue::{Message, MessageProcessor, QueueError};
///
/// struct ResizeProcessor;
///
/// #[async_trait]
/// impl MessageProcessor for ResizeProcessor {
///     async fn process(&self, message: &Message) -> Result<(), QueueError> {
///         let path = message.payload()["path"]
///             .as_str()
///             .ok_or_else(|| QueueError::permanent("missing path"))?;
///         resize(path).await.map_err(|e| QueueError::transient(e.to_string()))
///     }
///
///     fn name(&self) -> &'static str {
///         "ResizeProcessor"
///     }
/// }
/// ```
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Process a single message.
    ///
    /// Transient errors are retried until `max_attempts` deliveries; permanent
    /// errors abandon the message right away.
    async fn process(&self, message: &Message) -> std::result::Result<(), QueueError>;

    /// Processor name for logging.
    fn name(&self) -> &'static str;
}

/// What happened to one reserved message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing arrived within the poll timeout
    Idle,
    Completed,
    /// Republished for delivery number `attempt + 1`
    Retried { attempt: u32, delay: Duration },
    Abandoned,
    /// The lease expired before the worker finished; someone else owns it now
    LeaseLost,
}

impl Outcome {
    fn status(&self) -> Option<ProcessStatus> {
        match self {
            Outcome::Idle => None,
            Outcome::Completed => Some(ProcessStatus::Completed),
            Outcome::Retried { .. } => Some(ProcessStatus::Retried),
            Outcome::Abandoned => Some(ProcessStatus::Abandoned),
            Outcome::LeaseLost => Some(ProcessStatus::LeaseLost),
        }
    }
}

pub struct QueueWorker<P: MessageProcessor> {
    queue: Arc<dyn MessageQueue>,
    processor: P,
    config: WorkerConfig,
    metrics: QueueMetrics,
}

impl<P: MessageProcessor> QueueWorker<P> {
    pub fn new(queue: Arc<dyn MessageQueue>, processor: P, config: WorkerConfig) -> Self {
        let metrics = QueueMetrics::new(queue.name());
        Self {
            queue,
            processor,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run until `shutdown` flips to `true`.
    ///
    /// Store errors back off exponentially; a message in flight when the
    /// signal arrives is still processed to completion.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            queue = %self.queue.name(),
            processor = %self.processor.name(),
            poll_timeout_ms = self.config.poll_timeout.as_millis() as u64,
            max_attempts = self.config.max_attempts,
            "Starting queue worker"
        );

        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping worker");
                break;
            }

            match self.process_next().await {
                Ok(_) => {
                    if consecutive_errors > 0 {
                        info!("Store recovered after {} errors", consecutive_errors);
                        consecutive_errors = 0;
                    }
                }
                Err(e) if e.is_store_error() => {
                    consecutive_errors += 1;
                    self.metrics.store_error();

                    let backoff = ErrorCategory::Transient.backoff(
                        self.config.retry_base_delay,
                        self.config.retry_max_delay,
                        consecutive_errors - 1,
                    );
                    warn!(
                        error = %e,
                        consecutive_errors,
                        backoff_ms = backoff.as_millis() as u64,
                        "Store error, backing off"
                    );

                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "Error processing message");
                }
            }
        }

        info!(queue = %self.queue.name(), "Queue worker stopped");
        Ok(())
    }

    /// Reserve and handle at most one message.
    pub async fn process_next(&self) -> Result<Outcome> {
        let Some(message) = self
            .queue
            .wait_and_reserve(Some(self.config.poll_timeout))
            .await?
        else {
            return Ok(Outcome::Idle);
        };

        let started = Instant::now();
        let outcome = match self.processor.process(&message).await {
            Ok(()) => {
                if self.queue.finish(message).await?.finished {
                    Outcome::Completed
                } else {
                    Outcome::LeaseLost
                }
            }
            Err(e) => self.handle_failure(message, e).await?,
        };

        if let Some(status) = outcome.status() {
            self.metrics.processed(status, started.elapsed());
        }
        Ok(outcome)
    }

    async fn handle_failure(&self, message: Message, failure: QueueError) -> Result<Outcome> {
        let attempt = message.attempts() + 1;
        let identifier = message.identifier().unwrap_or_default().to_string();

        if !failure.is_retryable() || attempt >= self.config.max_attempts {
            if !self.queue.finish(message).await?.finished {
                return Ok(self.lease_lost(&identifier, &failure));
            }
            error!(
                processor = %self.processor.name(),
                identifier = %identifier,
                attempt,
                max_attempts = self.config.max_attempts,
                error = %failure,
                "Abandoning message"
            );
            return Ok(Outcome::Abandoned);
        }

        let delay = failure.category().backoff(
            self.config.retry_base_delay,
            self.config.retry_max_delay,
            attempt - 1,
        );

        // The retry goes in before the reserved copy comes out. A crash or
        // store error in between leaves a duplicate, never a gap.
        let retry = Message::new(message.payload().clone())
            .with_attempts(attempt)
            .with_delay(delay);
        let retry = self.queue.publish(retry).await?;

        if !self.queue.finish(message).await?.finished {
            return Ok(self.lease_lost(&identifier, &failure));
        }

        debug!(
            processor = %self.processor.name(),
            identifier = %identifier,
            retry_identifier = ?retry.identifier(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "Message scheduled for retry"
        );
        Ok(Outcome::Retried { attempt, delay })
    }

    fn lease_lost(&self, identifier: &str, failure: &QueueError) -> Outcome {
        warn!(
            processor = %self.processor.name(),
            identifier = %identifier,
            error = %failure,
            "Lease expired while processing, leaving redelivery to the queue"
        );
        Outcome::LeaseLost
    }
}
