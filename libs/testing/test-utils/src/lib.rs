//! Shared test utilities for queue testing
//!
//! - `TestRedis`: Redis container with automatic cleanup
//! - `StubRedis`: in-process RESP stub for timeout paths, no Docker needed
//! - `TestDataBuilder`: Deterministic queue names and payloads per test
//! - `assertions`: Custom assertion helpers
//!
//! # Usage
//!
//! ```rust,ignore
//! use test_utils::{TestDataBuilder, TestRedis};
//!
//! #[tokio::test]
//! #[ignore = "requires Docker"]
//! async fn my_queue_test() {
//!     let redis = TestRedis::new().await;
//!     let builder = TestDataBuilder::from_test_name("my_queue_test");
//!
//!     let queue = QueueBuilder::new(builder.queue_name("main"))
//!         .options(QueueOptions::new().with_connection(redis.connection_string()))
//!         .connect()
//!         .await
//!         .unwrap();
//! }
//! ```

mod redis;
mod stub;

pub use redis::TestRedis;
pub use stub::StubRedis;

/// Builder for test data with deterministic randomization
///
/// Queue names derived from the test name keep concurrently running
/// tests from sharing keys on one Redis instance.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_reserve_and_finish");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Generate a queue name unique to this test
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::new(7);
    /// assert_eq!(builder.queue_name("orders"), "test-7-orders");
    /// ```
    pub fn queue_name(&self, suffix: &str) -> String {
        format!("test-{}-{}", self.seed, suffix)
    }

    /// Generate a payload string tagged with this test's seed
    pub fn payload(&self, label: &str, n: usize) -> String {
        format!("{}-{}-{}", label, self.seed, n)
    }
}

/// Test assertion helpers
pub mod assertions {
    /// Assert that an optional value is Some
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }

    /// Assert that an optional value is None
    pub fn assert_none<T: std::fmt::Debug>(value: Option<T>, context: &str) {
        if let Some(value) = value {
            panic!("{}: expected None, got {:?}", context, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_builder_deterministic() {
        let builder1 = TestDataBuilder::new(42);
        let builder2 = TestDataBuilder::new(42);

        assert_eq!(builder1.queue_name("jobs"), builder2.queue_name("jobs"));
        assert_eq!(builder1.payload("job", 1), builder2.payload("job", 1));
    }

    #[test]
    fn test_data_builder_different_names() {
        let builder1 = TestDataBuilder::from_test_name("test1");
        let builder2 = TestDataBuilder::from_test_name("test2");

        // Different test names should generate different queues
        assert_ne!(builder1.queue_name("jobs"), builder2.queue_name("jobs"));
    }

    #[test]
    fn test_queue_name_has_no_whitespace() {
        let builder = TestDataBuilder::from_test_name("a test with spaces");
        assert!(!builder.queue_name("main").contains(char::is_whitespace));
    }
}
