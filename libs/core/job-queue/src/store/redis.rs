//! Redis implementation of the store primitives.
//!
//! Multi-step operations (`claim`, `promote_due`, `drain_list`) run as Lua
//! scripts so Redis executes them atomically.

use super::QueueStore;
use crate::config::{BlockFor, ClientOptions};
use crate::error::{QueueError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client, Cmd, FromRedisValue, Script};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Pop the head of KEYS[1] and lease it in KEYS[2] with score ARGV[1].
static CLAIM: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        local value = redis.call('LPOP', KEYS[1])
        if value then
            redis.call('ZADD', KEYS[2], ARGV[1], value)
        end
        return value
        ",
    )
});

/// Move members of KEYS[1] scored <= ARGV[1] to the tail of KEYS[2].
static PROMOTE_DUE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
        if #due == 0 then
            return 0
        end
        redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
        for i = 1, #due, 100 do
            redis.call('RPUSH', KEYS[2], unpack(due, i, math.min(i + 99, #due)))
        end
        return #due
        ",
    )
});

/// Move all of KEYS[1] to the tail of KEYS[2].
static DRAIN_LIST: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        local items = redis.call('LRANGE', KEYS[1], 0, -1)
        if #items == 0 then
            return 0
        end
        for i = 1, #items, 100 do
            redis.call('RPUSH', KEYS[2], unpack(items, i, math.min(i + 99, #items)))
        end
        redis.call('DEL', KEYS[1])
        return #items
        ",
    )
});

/// Redis-backed store.
///
/// Regular commands share one multiplexed connection. A blocked command
/// holds up everything queued behind it on that connection, so
/// [`RedisStore::connect`] also opens a second connection that only carries
/// `BLPOP`/`BLMOVE`. Both reconnect on their own and live as long as the store.
///
/// Waits on one store are served one after another by Redis; give each
/// concurrent consumer its own store.
#[derive(Clone)]
pub struct RedisStore {
    redis: Arc<ConnectionManager>,
    blocking: Option<Arc<ConnectionManager>>,
    response_timeout: Option<Duration>,
}

impl RedisStore {
    /// Wrap an existing connection manager.
    ///
    /// Blocking waits run on this manager too, so it must be built without a
    /// response timeout (`ConnectionManagerConfig::set_response_timeout(None)`).
    /// The redis crate otherwise cuts every wait off after 500ms and the
    /// wait fails with a store error instead of returning nothing.
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis: Arc::new(redis),
            blocking: None,
            response_timeout: None,
        }
    }

    /// Apply a response timeout to every command.
    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Connect to `url` and verify the connection with PING.
    pub async fn connect(url: &str, options: &ClientOptions) -> Result<Self> {
        let client = Client::open(url)?;
        let info = client.get_connection_info();
        info!(
            addr = %info.addr(),
            db = info.redis_settings().db(),
            "Connecting to Redis"
        );

        let commands = open_manager(&client, options).await?;
        let blocking = open_manager(&client, options).await?;

        let store = Self {
            redis: Arc::new(commands),
            blocking: Some(Arc::new(blocking)),
            response_timeout: options.response_timeout(),
        };
        store.ping().await?;

        info!("Connected to Redis");
        Ok(store)
    }

    /// Round-trip check.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn();
        let _: String = self
            .bounded(None, redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    fn conn(&self) -> ConnectionManager {
        (*self.redis).clone()
    }

    fn blocking_conn(&self) -> ConnectionManager {
        match &self.blocking {
            Some(blocking) => (**blocking).clone(),
            None => self.conn(),
        }
    }

    /// Enforce the response timeout, extended by how long the command may block.
    async fn bounded<T, F>(&self, blocking: Option<BlockFor>, command: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>> + Send,
    {
        let limit = match (self.response_timeout, blocking) {
            (None, _) | (_, Some(BlockFor::Forever)) => None,
            (Some(timeout), None) => Some(timeout),
            (Some(timeout), Some(BlockFor::Duration(wait))) => Some(timeout + wait),
        };

        match limit {
            Some(limit) => tokio::time::timeout(limit, command)
                .await
                .map_err(|_| QueueError::StoreTimeout(limit))?
                .map_err(QueueError::from),
            None => command.await.map_err(QueueError::from),
        }
    }

    async fn blocking_query<T>(&self, command: Cmd, block: BlockFor) -> Result<T>
    where
        T: FromRedisValue + Send,
    {
        let mut conn = self.blocking_conn();
        self.bounded(Some(block), command.query_async(&mut conn))
            .await
    }
}

/// Open a connection manager for the store.
///
/// The crate-level response timeout is switched off: [`RedisStore`] applies
/// `responseTimeoutMs` itself, extended by the block time for waits.
async fn open_manager(client: &Client, options: &ClientOptions) -> Result<ConnectionManager> {
    let mut config = ConnectionManagerConfig::new().set_response_timeout(None);
    if let Some(limit) = options.connection_timeout() {
        config = config.set_connection_timeout(Some(limit));
    }
    if let Some(retries) = options.number_of_retries {
        config = config.set_number_of_retries(retries);
    }

    let connecting = ConnectionManager::new_with_config(client.clone(), config);
    let manager = match options.connection_timeout() {
        Some(limit) => tokio::time::timeout(limit, connecting)
            .await
            .map_err(|_| QueueError::StoreTimeout(limit))??,
        None => connecting.await?,
    };
    Ok(manager)
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn push(&self, list: &str, value: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = self.bounded(None, conn.rpush(list, value)).await?;
        Ok(())
    }

    async fn schedule(&self, set: &str, score: f64, value: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = self
            .bounded(
                None,
                redis::cmd("ZADD")
                    .arg(set)
                    .arg(score)
                    .arg(value)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn blocking_pop(&self, list: &str, block: BlockFor) -> Result<Option<String>> {
        let mut command = redis::cmd("BLPOP");
        command.arg(list).arg(block.as_store_secs());
        let popped: Option<(String, String)> = self.blocking_query(command, block).await?;
        Ok(popped.map(|(_key, value)| value))
    }

    async fn wait_ready(&self, list: &str, block: BlockFor) -> Result<bool> {
        // Moving the head onto itself leaves the list unchanged but blocks
        // like any other pop until something arrives.
        let mut command = redis::cmd("BLMOVE");
        command
            .arg(list)
            .arg(list)
            .arg("LEFT")
            .arg("LEFT")
            .arg(block.as_store_secs());
        let head: Option<String> = self.blocking_query(command, block).await?;
        Ok(head.is_some())
    }

    async fn claim(&self, list: &str, set: &str, score: f64) -> Result<Option<String>> {
        let mut conn = self.conn();
        let claimed: Option<String> = self
            .bounded(
                None,
                CLAIM.key(list).key(set).arg(score).invoke_async(&mut conn),
            )
            .await?;
        Ok(claimed)
    }

    async fn promote_due(&self, set: &str, list: &str, max_score: f64) -> Result<usize> {
        let mut conn = self.conn();
        let moved: usize = self
            .bounded(
                None,
                PROMOTE_DUE
                    .key(set)
                    .key(list)
                    .arg(max_score)
                    .invoke_async(&mut conn),
            )
            .await?;
        if moved > 0 {
            debug!(from = %set, to = %list, count = moved, "Promoted due entries");
        }
        Ok(moved)
    }

    async fn remove_from_list(&self, list: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn();
        let removed: i64 = self.bounded(None, conn.lrem(list, 1, value)).await?;
        Ok(removed > 0)
    }

    async fn remove_scored(&self, set: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn();
        let removed: i64 = self.bounded(None, conn.zrem(set, value)).await?;
        Ok(removed > 0)
    }

    async fn range(&self, list: &str, limit: usize) -> Result<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        self.bounded(None, conn.lrange(list, 0, stop)).await
    }

    async fn list_len(&self, list: &str) -> Result<u64> {
        let mut conn = self.conn();
        self.bounded(None, conn.llen(list)).await
    }

    async fn scored_len(&self, set: &str) -> Result<u64> {
        let mut conn = self.conn();
        self.bounded(None, conn.zcard(set)).await
    }

    async fn drain_list(&self, source: &str, dest: &str) -> Result<usize> {
        let mut conn = self.conn();
        self.bounded(
            None,
            DRAIN_LIST.key(source).key(dest).invoke_async(&mut conn),
        )
        .await
    }

    async fn delete(&self, keys: &[&str]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        self.bounded(None, conn.del(keys)).await
    }
}
