//! Store key naming.
//!
//! Key names are shared with existing deployments and must not change:
//! `queue:{name}:messages`, `queue:{name}:delayed`, `queue:{name}:reserved`
//! and the legacy `queue:{name}:ids` / `queue:{name}:processing`.

use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Key groups owned by a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum KeyGroup {
    /// FIFO ready list.
    Messages,
    /// Sorted set scored by release time.
    Delayed,
    /// Sorted set scored by lease expiry.
    Reserved,
    /// Legacy dedup set.
    Ids,
    /// Legacy safety list fed by `BRPOPLPUSH`.
    Processing,
}

/// Fully qualified keys for one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub messages: String,
    pub delayed: String,
    pub reserved: String,
    pub ids: String,
    pub processing: String,
}

impl QueueKeys {
    pub fn new(name: &str) -> Self {
        Self {
            messages: key(name, KeyGroup::Messages),
            delayed: key(name, KeyGroup::Delayed),
            reserved: key(name, KeyGroup::Reserved),
            ids: key(name, KeyGroup::Ids),
            processing: key(name, KeyGroup::Processing),
        }
    }

    pub fn get(&self, group: KeyGroup) -> &str {
        match group {
            KeyGroup::Messages => &self.messages,
            KeyGroup::Delayed => &self.delayed,
            KeyGroup::Reserved => &self.reserved,
            KeyGroup::Ids => &self.ids,
            KeyGroup::Processing => &self.processing,
        }
    }
}

fn key(name: &str, group: KeyGroup) -> String {
    format!("queue:{}:{}", name, group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_key_names() {
        let keys = QueueKeys::new("orders");

        assert_eq!(keys.messages, "queue:orders:messages");
        assert_eq!(keys.delayed, "queue:orders:delayed");
        assert_eq!(keys.reserved, "queue:orders:reserved");
        assert_eq!(keys.ids, "queue:orders:ids");
        assert_eq!(keys.processing, "queue:orders:processing");
    }

    #[test]
    fn test_group_lookup() {
        let keys = QueueKeys::new("TestQueue");

        assert_eq!(keys.get(KeyGroup::Reserved), "queue:TestQueue:reserved");
        let all: Vec<&str> = KeyGroup::iter().map(|group| keys.get(group)).collect();
        assert_eq!(all.len(), 5);
        assert!(all.iter().all(|key| key.starts_with("queue:TestQueue:")));
        assert_eq!(KeyGroup::Messages.as_ref(), "messages");
    }
}
