//! Message value and its wire encoding
//!
//! A [`Message`] is an immutable value. Queue operations never mutate a
//! message in place; they return a new value carrying the updated state,
//! which callers thread forward into the next call.
//!
//! The wire form is a JSON object:
//!
//! ```json
//! {"payload": ..., "identifier": "...", "attemps": 0, "state": null}
//! ```
//!
//! `attemps` keeps its historical spelling so entries written by existing
//! deployments stay readable. `state` is always written as `null`: the
//! state of a message is a property of the key group holding it, not of
//! the stored bytes.

use crate::error::{QueueError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString};

/// Lifecycle state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    /// Created locally, never published.
    New,
    /// Waiting in the ready queue or the delayed set.
    Published,
    /// Taken with a lease; redelivered if the lease expires.
    Reserved,
    /// Finished. Terminal.
    Done,
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    payload: Value,
    identifier: Option<String>,
    state: MessageState,
    attempts: u32,
    delay: Option<Duration>,
    /// Exact bytes this message was stored as, if it came from the store.
    stored: Option<String>,
}

impl Message {
    /// Create a new, unpublished message.
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            payload: payload.into(),
            identifier: None,
            state: MessageState::New,
            attempts: 0,
            delay: None,
            stored: None,
        }
    }

    /// Delay delivery. Sub-second precision is dropped on publish.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Remove any delay.
    pub fn without_delay(mut self) -> Self {
        self.delay = None;
        self
    }

    /// Set the attempt counter.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Attach an identifier, marking this value as a previously seen message.
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }

    /// Whole seconds of delay, `None` when the message is immediately ready.
    pub fn delay_secs(&self) -> Option<u64> {
        self.delay.map(|d| d.as_secs()).filter(|secs| *secs > 0)
    }

    /// The stored representation this message was read from or written as.
    pub fn encoded(&self) -> Option<&str> {
        self.stored.as_deref()
    }

    pub(crate) fn with_state(mut self, state: MessageState) -> Self {
        self.state = state;
        self
    }

    pub(crate) fn with_stored(mut self, stored: String) -> Self {
        self.stored = Some(stored);
        self
    }

    pub(crate) fn with_fresh_identifier(mut self, identifier: String) -> Self {
        self.identifier = Some(identifier);
        self.stored = None;
        self
    }

    /// Bytes to match against the store when removing this message.
    ///
    /// Prefers the exact stored bytes; falls back to re-encoding, which
    /// matches anything this crate wrote for an unmodified message.
    pub(crate) fn removal_key(&self) -> Result<String> {
        match &self.stored {
            Some(stored) => Ok(stored.clone()),
            None => encode(self),
        }
    }
}

#[derive(Serialize)]
struct EncodedRef<'a> {
    payload: &'a Value,
    identifier: Option<&'a str>,
    #[serde(rename = "attemps")]
    attempts: u32,
    state: Option<MessageState>,
}

#[derive(Deserialize)]
struct Encoded {
    payload: Value,
    #[serde(default)]
    identifier: Option<String>,
    #[serde(rename = "attemps", default)]
    attempts: u32,
}

/// Encode a message into its stored representation.
pub fn encode(message: &Message) -> Result<String> {
    let encoded = EncodedRef {
        payload: &message.payload,
        identifier: message.identifier.as_deref(),
        attempts: message.attempts,
        state: None,
    };
    serde_json::to_string(&encoded).map_err(QueueError::Encode)
}

/// Decode a stored entry, assigning the state implied by where it was found.
pub fn decode(raw: String, state: MessageState) -> Result<Message> {
    // Serde would also accept a JSON array positionally
    let encoded = serde_json::from_str::<Value>(&raw).and_then(|value| match value {
        Value::Object(_) => serde_json::from_value::<Encoded>(value),
        _ => Err(<serde_json::Error as serde::de::Error>::custom(
            "stored entry is not a JSON object",
        )),
    });
    let encoded = match encoded {
        Ok(encoded) => encoded,
        Err(source) => return Err(QueueError::Decode { raw, source }),
    };

    Ok(Message {
        payload: encoded.payload,
        identifier: encoded.identifier,
        state,
        attempts: encoded.attempts,
        delay: None,
        stored: Some(raw),
    })
}
