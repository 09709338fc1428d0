//! The message queue capability shared by every backend.

use crate::error::{QueueError, Result};
use crate::message::Message;
use async_trait::async_trait;
use std::time::Duration;

/// Result of [`MessageQueue::finish`].
#[derive(Debug, Clone, PartialEq)]
pub struct FinishOutcome {
    /// Whether this call removed the message from the queue.
    pub finished: bool,
    /// `Done` when `finished`, otherwise the message as passed in.
    pub message: Message,
}

/// Operations producers and workers use, independent of the store.
///
/// Every operation returns new message values; callers thread them into
/// subsequent calls instead of relying on shared mutable state.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Queue name.
    fn name(&self) -> &str;

    /// Publish a message. A message that already carries an identifier is
    /// treated as a republish: its previous copy is finished first.
    async fn publish(&self, message: Message) -> Result<Message>;

    /// Wait for a message and consider it done as soon as it is dequeued.
    ///
    /// `None` timeout uses the queue default; a zero timeout blocks
    /// indefinitely. Returns `Ok(None)` when the wait times out.
    async fn wait_and_take(&self, timeout: Option<Duration>) -> Result<Option<Message>>;

    /// Wait for a message and hold it under a lease until finished.
    async fn wait_and_reserve(&self, timeout: Option<Duration>) -> Result<Option<Message>>;

    /// Acknowledge a message.
    async fn finish(&self, message: Message) -> Result<FinishOutcome>;

    /// Look at up to `limit` ready messages without consuming them.
    async fn peek(&self, limit: usize) -> Result<Vec<Message>>;

    /// Number of ready messages. Delayed and reserved messages are not counted.
    async fn count(&self) -> Result<u64>;

    /// Look up a message by identifier. Unsupported unless a backend says otherwise.
    async fn get_message(&self, _identifier: &str) -> Result<Message> {
        Err(QueueError::NotImplemented("get_message"))
    }
}
