//! Processor used by `jobqueue work`.

use async_trait::async_trait;
use job_queue::{Message, MessageProcessor, QueueError};
use tracing::info;

/// Logs every message and succeeds.
///
/// A payload object with `"fail": "transient"` or `"fail": "permanent"`
/// fails with that category instead, which makes retry and abandon paths
/// easy to try from a shell.
pub struct LoggingProcessor;

#[async_trait]
impl MessageProcessor for LoggingProcessor {
    async fn process(&self, message: &Message) -> Result<(), QueueError> {
        info!(
            identifier = ?message.identifier(),
            attempts = message.attempts(),
            payload = %message.payload(),
            "Processing message"
        );

        match message.payload().get("fail").and_then(|v| v.as_str()) {
            Some("transient") => Err(QueueError::transient("payload requested a transient failure")),
            Some("permanent") => Err(QueueError::permanent("payload requested a permanent failure")),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "LoggingProcessor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_requested_failures() {
        let ok = Message::new(json!({"task": "noop"}));
        let transient = Message::new(json!({"fail": "transient"}));
        let permanent = Message::new(json!({"fail": "permanent"}));

        assert!(LoggingProcessor.process(&ok).await.is_ok());
        assert!(LoggingProcessor.process(&transient).await.unwrap_err().is_retryable());
        assert!(!LoggingProcessor.process(&permanent).await.unwrap_err().is_retryable());
    }
}
