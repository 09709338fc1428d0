//! jobqueue - Entry Point
//!
//! Command line client and worker for Redis-backed job queues.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    jobqueue_cli::run().await
}
