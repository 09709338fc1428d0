//! Job Queue
//!
//! A durable message queue on Redis for background jobs.
//!
//! ## Features
//!
//! - **FIFO delivery**: ready messages live in a Redis list
//! - **Delayed delivery**: messages become visible after a per-message delay
//! - **Leases**: reserved messages return to the queue when not finished in time
//! - **At-least-once**: every reservation and migration is a single atomic step
//! - **Worker loop**: `QueueWorker` with retry backoff and graceful shutdown
//! - **In-memory backend**: same semantics without Redis, for tests and local runs
//! - **Prometheus metrics**: built-in observability
//!
//! ## Example
//!
//! ```ignore
//! use job_queue::{Message, MessageQueue, QueueBuilder, QueueOptions};
//!
//! let queue = QueueBuilder::new("orders")
//!     .options(QueueOptions::new().with_lease_seconds(30))
//!     .connect()
//!     .await?;
//!
//! queue.publish(Message::new(json!({"order": 42}))).await?;
//!
//! if let Some(message) = queue.wait_and_reserve(Some(Duration::from_secs(5))).await? {
//!     handle(message.payload()).await?;
//!     queue.finish(message).await?;
//! }
//! ```

pub mod clock;
mod config;
mod engine;
mod error;
pub mod keys;
mod message;
pub mod metrics;
mod queue;
pub mod store;
mod worker;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    Backend, BlockFor, ClientOptions, QueueOptions, WorkerConfig, DEFAULT_LEASE_SECS,
    DEFAULT_TIMEOUT_SECS,
};
pub use engine::{open_queue, MemoryQueue, Queue, QueueBuilder, QueueStats, RedisQueue};
pub use error::{ErrorCategory, QueueError, Result};
pub use keys::{KeyGroup, QueueKeys};
pub use message::{decode, encode, Message, MessageState};
pub use metrics::{init_metrics, render_metrics, QueueMetrics};
pub use queue::{FinishOutcome, MessageQueue};
pub use store::{MemoryStore, QueueStore, RedisStore};
pub use worker::{MessageProcessor, Outcome, QueueWorker};
