//! Prometheus metrics for queues and workers
//!
//! Every metric carries a `queue` label.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() -> Result<(), BuildError> {
    PROMETHEUS_HANDLE
        .get_or_try_init(|| {
            let handle = PrometheusBuilder::new().install_recorder()?;
            info!("Prometheus metrics initialized");
            Ok(handle)
        })
        .map(|_| ())
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(|h| h.render())
        .unwrap_or_default()
}

/// Outcome label for processed messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Completed,
    Retried,
    Abandoned,
    LeaseLost,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Completed => "completed",
            ProcessStatus::Retried => "retried",
            ProcessStatus::Abandoned => "abandoned",
            ProcessStatus::LeaseLost => "lease_lost",
        }
    }
}

/// Queue metrics helper
#[derive(Debug, Clone)]
pub struct QueueMetrics {
    queue: String,
}

impl QueueMetrics {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }

    pub fn published(&self, delayed: bool) {
        counter!(
            "jobqueue_messages_published_total",
            "queue" => self.queue.clone(),
            "delayed" => if delayed { "true" } else { "false" }
        )
        .increment(1);
    }

    pub fn taken(&self) {
        counter!("jobqueue_messages_taken_total", "queue" => self.queue.clone()).increment(1);
    }

    pub fn reserved(&self) {
        counter!("jobqueue_messages_reserved_total", "queue" => self.queue.clone()).increment(1);
    }

    pub fn finished(&self, removed: bool) {
        counter!(
            "jobqueue_messages_finished_total",
            "queue" => self.queue.clone(),
            "removed" => if removed { "true" } else { "false" }
        )
        .increment(1);
    }

    /// Entries moved back to the ready list from `source` (`delayed` or `reserved`)
    pub fn promoted(&self, source: &'static str, count: usize) {
        if count == 0 {
            return;
        }
        counter!(
            "jobqueue_messages_promoted_total",
            "queue" => self.queue.clone(),
            "source" => source
        )
        .increment(count as u64);
    }

    /// A worker finished handling one message
    pub fn processed(&self, status: ProcessStatus, duration: Duration) {
        counter!(
            "jobqueue_worker_messages_total",
            "queue" => self.queue.clone(),
            "status" => status.as_str()
        )
        .increment(1);

        histogram!(
            "jobqueue_worker_process_duration_seconds",
            "queue" => self.queue.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn store_error(&self) {
        counter!("jobqueue_worker_store_errors_total", "queue" => self.queue.clone()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = QueueMetrics::new("orders");
        assert_eq!(metrics.queue, "orders");

        // No recorder installed: recording is a no-op
        metrics.published(true);
        metrics.promoted("delayed", 0);
        metrics.processed(ProcessStatus::Completed, Duration::from_millis(5));
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(ProcessStatus::LeaseLost.as_str(), "lease_lost");
        assert_eq!(ProcessStatus::Retried.as_str(), "retried");
    }

    #[test]
    fn test_render_without_init_is_empty() {
        if PROMETHEUS_HANDLE.get().is_none() {
            assert!(render_metrics().is_empty());
        }
    }
}
