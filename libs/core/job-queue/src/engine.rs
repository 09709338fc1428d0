//! The queue engine.
//!
//! Protocol per queue name (see [`crate::keys`]):
//!
//! ```text
//! publish ──► messages (list) ◄── promote ── delayed  (zset, score = release time)
//!                 │                  ▲
//!           claim │                  └─ promote ── reserved (zset, score = lease expiry)
//!                 ▼                                   ▲
//!             reserved ───────────────────────────────┘
//! ```
//!
//! There is no background scheduler: due delayed entries and expired leases
//! are promoted at the start of every consume call. If nobody consumes,
//! nothing is promoted.

use crate::clock::{score, score_after, Clock, SystemClock};
use crate::config::{Backend, BlockFor, QueueOptions};
use crate::error::{QueueError, Result};
use crate::keys::{KeyGroup, QueueKeys};
use crate::message::{decode, encode, Message, MessageState};
use crate::metrics::QueueMetrics;
use crate::queue::{FinishOutcome, MessageQueue};
use crate::store::{MemoryStore, QueueStore, RedisStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Queue backed by Redis.
pub type RedisQueue = Queue<RedisStore>;

/// Queue backed by an in-process store.
pub type MemoryQueue = Queue<MemoryStore>;

/// Sizes of every key group of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub ready: u64,
    pub delayed: u64,
    pub reserved: u64,
}

impl QueueStats {
    /// Published, not yet finished messages.
    pub fn total(&self) -> u64 {
        self.ready + self.delayed + self.reserved
    }
}

/// Queue engine over a [`QueueStore`].
pub struct Queue<S: QueueStore> {
    name: String,
    keys: QueueKeys,
    store: S,
    options: QueueOptions,
    clock: Arc<dyn Clock>,
    metrics: QueueMetrics,
}

impl<S: QueueStore> Queue<S> {
    /// Create a queue over `store`.
    pub fn new(name: impl Into<String>, store: S, options: QueueOptions) -> Result<Self> {
        let name = name.into();
        options.validate(&name)?;

        Ok(Self {
            keys: QueueKeys::new(&name),
            metrics: QueueMetrics::new(&name),
            name,
            store,
            options,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the time source used for delay and lease scores.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Move due entries of `source` to the ready list.
    async fn migrate(&self, source: KeyGroup) -> Result<usize> {
        let now = score(self.clock.now());
        let moved = self
            .store
            .promote_due(self.keys.get(source), &self.keys.messages, now)
            .await?;

        if moved > 0 {
            match source {
                KeyGroup::Reserved => {
                    warn!(queue = %self.name, count = moved, "Requeued messages with expired leases")
                }
                _ => debug!(queue = %self.name, count = moved, "Released delayed messages"),
            }
            self.metrics.promoted(
                if source == KeyGroup::Reserved { "reserved" } else { "delayed" },
                moved,
            );
        }
        Ok(moved)
    }

    async fn promote_all(&self) -> Result<()> {
        self.migrate(KeyGroup::Delayed).await?;
        self.migrate(KeyGroup::Reserved).await?;
        Ok(())
    }

    /// Size of every key group. Unlike [`MessageQueue::count`] this includes
    /// delayed and reserved messages.
    pub async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            ready: self.store.list_len(&self.keys.messages).await?,
            delayed: self.store.scored_len(&self.keys.delayed).await?,
            reserved: self.store.scored_len(&self.keys.reserved).await?,
        })
    }

    /// One-shot migration off the legacy protocol.
    ///
    /// Entries left in `queue:{name}:processing` by the old
    /// pop-and-push reservation are returned to the ready list, and the
    /// legacy `queue:{name}:ids` set is dropped. Returns how many entries
    /// were recovered.
    pub async fn recover_legacy(&self) -> Result<usize> {
        let recovered = self
            .store
            .drain_list(&self.keys.processing, &self.keys.messages)
            .await?;
        let dropped = self.store.delete(&[self.keys.ids.as_str()]).await?;

        if recovered > 0 || dropped > 0 {
            warn!(
                queue = %self.name,
                recovered,
                dropped_id_set = dropped > 0,
                "Recovered legacy queue state"
            );
        } else {
            debug!(queue = %self.name, "No legacy queue state found");
        }
        Ok(recovered)
    }
}

#[async_trait]
impl<S: QueueStore> MessageQueue for Queue<S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, message: Message) -> Result<Message> {
        let message = if message.identifier().is_some() {
            let outcome = self.finish(message).await?;
            if outcome.finished {
                debug!(
                    queue = %self.name,
                    identifier = ?outcome.message.identifier(),
                    "Removed previous copy before republishing"
                );
            }
            outcome.message
        } else {
            message
        };

        let message = message.with_fresh_identifier(Uuid::new_v4().to_string());
        let encoded = encode(&message)?;

        match message.delay_secs() {
            Some(secs) => {
                let release = score_after(&*self.clock, Duration::from_secs(secs));
                self.store
                    .schedule(&self.keys.delayed, release, &encoded)
                    .await?;
            }
            None => self.store.push(&self.keys.messages, &encoded).await?,
        }

        self.metrics.published(message.delay_secs().is_some());
        debug!(
            queue = %self.name,
            identifier = ?message.identifier(),
            delay_secs = ?message.delay_secs(),
            "Published message"
        );

        Ok(message.with_stored(encoded).with_state(MessageState::Published))
    }

    async fn wait_and_take(&self, timeout: Option<Duration>) -> Result<Option<Message>> {
        self.promote_all().await?;

        let block = BlockFor::normalize(timeout, self.options.default_timeout());
        let Some(raw) = self.store.blocking_pop(&self.keys.messages, block).await? else {
            return Ok(None);
        };

        let message = decode(raw, MessageState::Done)?;
        self.metrics.taken();
        debug!(queue = %self.name, identifier = ?message.identifier(), "Took message");
        Ok(Some(message))
    }

    async fn wait_and_reserve(&self, timeout: Option<Duration>) -> Result<Option<Message>> {
        self.promote_all().await?;

        let block = BlockFor::normalize(timeout, self.options.default_timeout());
        let deadline = block.deadline();

        let raw = loop {
            let lease_expiry = score_after(&*self.clock, self.options.lease());
            if let Some(raw) = self
                .store
                .claim(&self.keys.messages, &self.keys.reserved, lease_expiry)
                .await?
            {
                break raw;
            }

            // Another consumer may win the race after we wake; wait again
            // with whatever time is left.
            let Some(remaining) = BlockFor::until(deadline) else {
                return Ok(None);
            };
            if !self.store.wait_ready(&self.keys.messages, remaining).await? {
                return Ok(None);
            }
        };

        match decode(raw, MessageState::Reserved) {
            Ok(message) => {
                self.metrics.reserved();
                debug!(
                    queue = %self.name,
                    identifier = ?message.identifier(),
                    lease_secs = self.options.lease_seconds,
                    "Reserved message"
                );
                Ok(Some(message))
            }
            Err(QueueError::Decode { raw, source }) => {
                // Left in place it would be redelivered every lease forever.
                self.store.remove_scored(&self.keys.reserved, &raw).await?;
                error!(queue = %self.name, error = %source, "Dropped malformed reserved entry");
                Err(QueueError::Decode { raw, source })
            }
            Err(e) => Err(e),
        }
    }

    async fn finish(&self, message: Message) -> Result<FinishOutcome> {
        let value = message.removal_key()?;

        let removed_from = if self
            .store
            .remove_from_list(&self.keys.messages, &value)
            .await?
        {
            Some(KeyGroup::Messages)
        } else if self.store.remove_scored(&self.keys.reserved, &value).await? {
            Some(KeyGroup::Reserved)
        } else if self.store.remove_scored(&self.keys.delayed, &value).await? {
            Some(KeyGroup::Delayed)
        } else {
            None
        };

        self.metrics.finished(removed_from.is_some());

        match removed_from {
            Some(group) => {
                debug!(
                    queue = %self.name,
                    identifier = ?message.identifier(),
                    from = %group,
                    "Finished message"
                );
                Ok(FinishOutcome {
                    finished: true,
                    message: message.with_state(MessageState::Done),
                })
            }
            None => {
                debug!(
                    queue = %self.name,
                    identifier = ?message.identifier(),
                    "Nothing to finish, already finished or lease expired"
                );
                Ok(FinishOutcome {
                    finished: false,
                    message,
                })
            }
        }
    }

    async fn peek(&self, limit: usize) -> Result<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.store
            .range(&self.keys.messages, limit)
            .await?
            .into_iter()
            .map(|raw| decode(raw, MessageState::Published))
            .collect()
    }

    async fn count(&self) -> Result<u64> {
        self.store.list_len(&self.keys.messages).await
    }
}

/// Builds queues from options, an optional pre-built client and an optional clock.
pub struct QueueBuilder {
    name: String,
    options: QueueOptions,
    client: Option<ConnectionManager>,
    clock: Option<Arc<dyn Clock>>,
}

impl QueueBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: QueueOptions::default(),
            client: None,
            clock: None,
        }
    }

    pub fn options(mut self, options: QueueOptions) -> Self {
        self.options = options;
        self
    }

    /// Use an existing connection instead of connecting from options.
    ///
    /// Blocking waits share this connection, so build it with
    /// `ConnectionManagerConfig::new().set_response_timeout(None)`; see
    /// [`RedisStore::new`].
    pub fn client(mut self, client: ConnectionManager) -> Self {
        self.client = Some(client);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    fn finalize<S: QueueStore>(self, store: S) -> Result<Queue<S>> {
        let queue = Queue::new(self.name, store, self.options)?;
        let queue = match self.clock {
            Some(clock) => queue.with_clock(clock),
            None => queue,
        };
        info!(
            queue = %queue.name,
            backend = %queue.options.backend,
            lease_secs = queue.options.lease_seconds,
            timeout_secs = queue.options.timeout,
            "Queue ready"
        );
        Ok(queue)
    }

    /// Build a Redis-backed queue, connecting unless a client was supplied.
    pub async fn connect(self) -> Result<RedisQueue> {
        self.options.validate(&self.name)?;
        check_sources(&self.options, self.client.is_some())?;

        let store = match &self.client {
            Some(client) => RedisStore::new(client.clone())
                .with_response_timeout(self.options.client_options.response_timeout()),
            None => {
                RedisStore::connect(&self.options.connection_url(), &self.options.client_options)
                    .await?
            }
        };
        self.finalize(store)
    }

    /// Build a queue over an in-process store.
    pub fn in_memory(self, store: MemoryStore) -> Result<MemoryQueue> {
        if self.client.is_some() {
            return Err(QueueError::config(
                "a Redis client cannot back an in-memory queue",
            ));
        }
        self.finalize(store)
    }

    /// Build whichever backend the options select.
    pub async fn open(self) -> Result<Box<dyn MessageQueue>> {
        match self.options.backend {
            Backend::Redis => Ok(Box::new(self.connect().await?)),
            Backend::Memory => Ok(Box::new(self.in_memory(MemoryStore::new())?)),
        }
    }
}

/// Open a queue with the backend selected by `options`.
pub async fn open_queue(name: &str, options: QueueOptions) -> Result<Box<dyn MessageQueue>> {
    QueueBuilder::new(name).options(options).open().await
}

/// A pre-built client and explicit connection parameters are mutually exclusive.
fn check_sources(options: &QueueOptions, has_client: bool) -> Result<()> {
    if has_client && options.connection.is_some() {
        return Err(QueueError::config(
            "provide either a Redis client or connection parameters, not both",
        ));
    }
    Ok(())
}
