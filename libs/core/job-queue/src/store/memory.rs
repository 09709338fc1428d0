//! In-process store with the same semantics as the Redis store.
//!
//! Clones share state, so several queue handles (and several blocked
//! consumers) can work against one store.

use super::QueueStore;
use crate::config::BlockFor;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct State {
    lists: HashMap<String, VecDeque<String>>,
    scored: HashMap<String, Vec<(f64, String)>>,
}

impl State {
    fn list(&mut self, key: &str) -> &mut VecDeque<String> {
        self.lists.entry(key.to_string()).or_default()
    }

    fn pop_front(&mut self, key: &str) -> Option<String> {
        let list = self.lists.get_mut(key)?;
        let value = list.pop_front();
        if list.is_empty() {
            self.lists.remove(key);
        }
        value
    }

    fn add_scored(&mut self, key: &str, score: f64, value: String) {
        let set = self.scored.entry(key.to_string()).or_default();
        match set.iter_mut().find(|(_, member)| *member == value) {
            Some(entry) => entry.0 = score,
            None => set.push((score, value)),
        }
    }

    /// Remove and return members scored at or below `max`, ordered like a sorted set.
    fn take_due(&mut self, key: &str, max: f64) -> Vec<String> {
        let Some(set) = self.scored.get_mut(key) else {
            return Vec::new();
        };

        let (mut due, rest): (Vec<_>, Vec<_>) = set.drain(..).partition(|(score, _)| *score <= max);
        *set = rest;
        if set.is_empty() {
            self.scored.remove(key);
        }

        due.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        due.into_iter().map(|(_, member)| member).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    pushed: Arc<Notify>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `attempt` until it yields a value or `block` runs out.
    async fn wait_for<T>(
        &self,
        block: BlockFor,
        mut attempt: impl FnMut(&mut State) -> Option<T> + Send,
    ) -> Option<T> {
        let deadline = block.deadline();

        loop {
            // Register interest before checking so a push between the check
            // and the await is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = attempt(&mut self.lock()) {
                return Some(value);
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn push(&self, list: &str, value: &str) -> Result<()> {
        self.lock().list(list).push_back(value.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn schedule(&self, set: &str, score: f64, value: &str) -> Result<()> {
        self.lock().add_scored(set, score, value.to_string());
        Ok(())
    }

    async fn blocking_pop(&self, list: &str, block: BlockFor) -> Result<Option<String>> {
        Ok(self.wait_for(block, |state| state.pop_front(list)).await)
    }

    async fn wait_ready(&self, list: &str, block: BlockFor) -> Result<bool> {
        let ready = self
            .wait_for(block, |state| {
                state
                    .lists
                    .get(list)
                    .is_some_and(|l| !l.is_empty())
                    .then_some(())
            })
            .await;
        Ok(ready.is_some())
    }

    async fn claim(&self, list: &str, set: &str, score: f64) -> Result<Option<String>> {
        let mut state = self.lock();
        let value = state.pop_front(list);
        if let Some(value) = &value {
            state.add_scored(set, score, value.clone());
        }
        Ok(value)
    }

    async fn promote_due(&self, set: &str, list: &str, max_score: f64) -> Result<usize> {
        let moved = {
            let mut state = self.lock();
            let due = state.take_due(set, max_score);
            let moved = due.len();
            if moved > 0 {
                state.list(list).extend(due);
            }
            moved
        };
        if moved > 0 {
            self.pushed.notify_waiters();
        }
        Ok(moved)
    }

    async fn remove_from_list(&self, list: &str, value: &str) -> Result<bool> {
        let mut state = self.lock();
        let Some(entries) = state.lists.get_mut(list) else {
            return Ok(false);
        };
        let removed = match entries.iter().position(|entry| entry == value) {
            Some(index) => entries.remove(index).is_some(),
            None => false,
        };
        if entries.is_empty() {
            state.lists.remove(list);
        }
        Ok(removed)
    }

    async fn remove_scored(&self, set: &str, value: &str) -> Result<bool> {
        let mut state = self.lock();
        let Some(members) = state.scored.get_mut(set) else {
            return Ok(false);
        };
        let before = members.len();
        members.retain(|(_, member)| member != value);
        let removed = members.len() < before;
        if members.is_empty() {
            state.scored.remove(set);
        }
        Ok(removed)
    }

    async fn range(&self, list: &str, limit: usize) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .lists
            .get(list)
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_len(&self, list: &str) -> Result<u64> {
        Ok(self.lock().lists.get(list).map_or(0, |l| l.len() as u64))
    }

    async fn scored_len(&self, set: &str) -> Result<u64> {
        Ok(self.lock().scored.get(set).map_or(0, |s| s.len() as u64))
    }

    async fn drain_list(&self, source: &str, dest: &str) -> Result<usize> {
        let moved = {
            let mut state = self.lock();
            let drained = state.lists.remove(source).unwrap_or_default();
            let moved = drained.len();
            if moved > 0 {
                state.list(dest).extend(drained);
            }
            moved
        };
        if moved > 0 {
            self.pushed.notify_waiters();
        }
        Ok(moved)
    }

    async fn delete(&self, keys: &[&str]) -> Result<u64> {
        let mut state = self.lock();
        let mut deleted = 0;
        for key in keys {
            let in_list = state.lists.remove(*key).is_some();
            let in_set = state.scored.remove(*key).is_some();
            if in_list || in_set {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const READY: &str = "queue:t:messages";
    const LEASED: &str = "queue:t:reserved";

    #[tokio::test]
    async fn test_fifo_order() {
        let store = MemoryStore::new();
        store.push(READY, "a").await.unwrap();
        store.push(READY, "b").await.unwrap();

        assert_eq!(store.range(READY, 10).await.unwrap(), vec!["a", "b"]);
        let block = BlockFor::Duration(Duration::from_millis(10));
        assert_eq!(store.blocking_pop(READY, block).await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.list_len(READY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_blocking_pop_times_out() {
        let store = MemoryStore::new();
        let block = BlockFor::Duration(Duration::from_millis(20));

        assert_eq!(store.blocking_pop(READY, block).await.unwrap(), None);
        assert!(!store.wait_ready(READY, block).await.unwrap());
    }

    #[tokio::test]
    async fn test_blocking_pop_wakes_on_push() {
        let store = MemoryStore::new();
        let consumer = store.clone();
        let handle = tokio::spawn(async move {
            consumer
                .blocking_pop(READY, BlockFor::Duration(Duration::from_secs(5)))
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.push(READY, "late").await.unwrap();

        let popped = handle.await.unwrap().unwrap();
        assert_eq!(popped.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_claim_moves_atomically() {
        let store = MemoryStore::new();
        store.push(READY, "job").await.unwrap();

        assert_eq!(store.claim(READY, LEASED, 10.0).await.unwrap().as_deref(), Some("job"));
        assert_eq!(store.list_len(READY).await.unwrap(), 0);
        assert_eq!(store.scored_len(LEASED).await.unwrap(), 1);
        assert_eq!(store.claim(READY, LEASED, 10.0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_promote_due_by_score() {
        let store = MemoryStore::new();
        store.schedule(LEASED, 30.0, "late").await.unwrap();
        store.schedule(LEASED, 20.0, "second").await.unwrap();
        store.schedule(LEASED, 10.0, "first").await.unwrap();

        assert_eq!(store.promote_due(LEASED, READY, 20.0).await.unwrap(), 2);
        assert_eq!(store.range(READY, 10).await.unwrap(), vec!["first", "second"]);
        assert_eq!(store.scored_len(LEASED).await.unwrap(), 1);

        // Nothing left in the window
        assert_eq!(store.promote_due(LEASED, READY, 20.0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_schedule_same_member_updates_score() {
        let store = MemoryStore::new();
        store.schedule(LEASED, 10.0, "job").await.unwrap();
        store.schedule(LEASED, 50.0, "job").await.unwrap();

        assert_eq!(store.scored_len(LEASED).await.unwrap(), 1);
        assert_eq!(store.promote_due(LEASED, READY, 20.0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_removals() {
        let store = MemoryStore::new();
        store.push(READY, "dup").await.unwrap();
        store.push(READY, "dup").await.unwrap();
        store.schedule(LEASED, 1.0, "held").await.unwrap();

        assert!(store.remove_from_list(READY, "dup").await.unwrap());
        assert_eq!(store.list_len(READY).await.unwrap(), 1);
        assert!(store.remove_scored(LEASED, "held").await.unwrap());
        assert!(!store.remove_scored(LEASED, "held").await.unwrap());
        assert!(!store.remove_from_list("queue:t:other", "dup").await.unwrap());
    }

    #[tokio::test]
    async fn test_drain_and_delete() {
        let store = MemoryStore::new();
        store.push("queue:t:processing", "stuck").await.unwrap();
        store.push(READY, "ready").await.unwrap();

        assert_eq!(store.drain_list("queue:t:processing", READY).await.unwrap(), 1);
        assert_eq!(store.range(READY, 10).await.unwrap(), vec!["ready", "stuck"]);
        assert_eq!(store.delete(&[READY, "queue:t:ids"]).await.unwrap(), 1);
        assert_eq!(store.list_len(READY).await.unwrap(), 0);
    }
}
