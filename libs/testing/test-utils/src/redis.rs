//! Redis test infrastructure
//!
//! Provides a `TestRedis` helper that creates a Redis container for testing.

use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::Client;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

/// Test Redis wrapper that ensures proper cleanup
///
/// The container is automatically stopped and removed when this struct is dropped.
///
/// # Example
///
/// ```no_run
/// use test_utils::TestRedis;
/// use redis::AsyncCommands;
///
/// # async fn example() {
/// let redis = TestRedis::new().await;
/// let mut conn = redis.connection_manager();
///
/// conn.rpush::<_, _, ()>("queue:jobs:messages", "payload").await.unwrap();
/// let len: usize = conn.llen("queue:jobs:messages").await.unwrap();
/// assert_eq!(len, 1);
/// # }
/// ```
pub struct TestRedis {
    #[allow(dead_code)]
    container: ContainerAsync<Redis>,
    manager: ConnectionManager,
    pub connection_string: String,
}

impl TestRedis {
    /// Create a new test Redis instance
    ///
    /// Uses Redis 8 Alpine image by default.
    pub async fn new() -> Self {
        let redis_image = Redis::default().with_tag("8-alpine");

        let container = redis_image
            .start()
            .await
            .expect("Failed to start Redis container");

        let host_port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis port");

        let connection_string = format!("redis://127.0.0.1:{}", host_port);

        let client = Client::open(connection_string.clone())
            .expect("Failed to create Redis client");

        // Usable as a queue client, so blocking waits must not hit a response timeout
        let manager = client
            .get_connection_manager_with_config(ConnectionManagerConfig::new().set_response_timeout(None))
            .await
            .expect("Failed to connect to Redis");

        tracing::info!(port = host_port, "Test Redis ready (Redis 8-alpine)");

        Self {
            container,
            manager,
            connection_string,
        }
    }

    /// Get a cloned connection manager (useful for passing to queues)
    pub fn connection_manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Get the connection string for manual client creation
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Remove every key from the current database
    pub async fn flush(&self) {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .expect("Failed to flush Redis");
    }
}

// Container is automatically cleaned up when TestRedis is dropped
impl Drop for TestRedis {
    fn drop(&mut self) {
        tracing::debug!("Cleaning up test Redis container");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::AsyncCommands;

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_redis_list_operations() {
        let redis = TestRedis::new().await;
        let mut conn = redis.connection_manager();

        conn.rpush::<_, _, ()>("my_list", "item1").await.unwrap();
        conn.rpush::<_, _, ()>("my_list", "item2").await.unwrap();

        let len: usize = conn.llen("my_list").await.unwrap();
        assert_eq!(len, 2);

        let item: String = conn.lpop("my_list", None).await.unwrap();
        assert_eq!(item, "item1");
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_flush() {
        let redis = TestRedis::new().await;
        let mut conn = redis.connection_manager();

        conn.set::<_, _, ()>("temp_key", "temp_value").await.unwrap();
        redis.flush().await;

        let exists: bool = conn.exists("temp_key").await.unwrap();
        assert!(!exists);
    }
}
