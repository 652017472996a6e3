//! In-memory store backend

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use crate::aor::new_etag;
use crate::error::{Error, Result};
use crate::storage::EventStateStore;
use crate::types::{EventState, QueuedMessage, Subscription};

/// DashMap-backed store for tests and single-process deployments.
///
/// Event state is keyed by `aor|event` with an entity-tag side index so
/// both lookup directions stay O(1); message queues are FIFO per aor.
pub struct MemoryStore {
    /// Live event state by `aor|event`
    states: DashMap<String, EventState>,

    /// Entity tag -> `aor|event`
    tags: DashMap<String, String>,

    /// Subscriptions by `aor|event`
    subscriptions: DashMap<String, Vec<Subscription>>,

    /// Stored messages by recipient aor, oldest first
    queues: DashMap<String, Vec<QueuedMessage>>,
}

fn state_key(aor: &str, event: &str) -> String {
    format!("{}|{}", aor, event)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
            tags: DashMap::new(),
            subscriptions: DashMap::new(),
            queues: DashMap::new(),
        }
    }

    /// Insert a subscription record.
    ///
    /// Subscription lifecycle is owned by the SUBSCRIBE handler outside
    /// this crate; tests and demos seed it here.
    pub fn insert_subscription(&self, sub: Subscription) {
        self.subscriptions
            .entry(state_key(&sub.aor, &sub.event_type))
            .or_default()
            .push(sub);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStateStore for MemoryStore {
    async fn add_event_state(
        &self,
        aor: &str,
        expires: u32,
        event: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<EventState> {
        let key = state_key(aor, event);
        let state = EventState {
            aor: aor.to_string(),
            event_type: event.to_string(),
            etag: new_etag(),
            expires,
            content_type: content_type.to_string(),
            body,
            updated_at: Utc::now(),
        };
        self.tags.insert(state.etag.clone(), key.clone());
        if let Some(prev) = self.states.insert(key, state.clone()) {
            // The pair had live state; its old tag is dead now
            self.tags.remove(&prev.etag);
            debug!("replaced event state {} for {}", prev.etag, aor);
        }
        Ok(state)
    }

    async fn get_event_state_by_tag(&self, etag: &str) -> Result<Option<EventState>> {
        let Some(key) = self.tags.get(etag).map(|entry| entry.clone()) else {
            return Ok(None);
        };
        Ok(self.states.get(&key).map(|entry| entry.clone()))
    }

    async fn refresh_event_state(&self, aor: &str, event: &str, expires: u32) -> Result<String> {
        let key = state_key(aor, event);
        let mut entry = self
            .states
            .get_mut(&key)
            .ok_or_else(|| Error::NoEventState(key.clone()))?;
        let old_tag = std::mem::replace(&mut entry.etag, new_etag());
        entry.expires = expires;
        entry.updated_at = Utc::now();
        let new_tag = entry.etag.clone();
        drop(entry);

        self.tags.remove(&old_tag);
        self.tags.insert(new_tag.clone(), key);
        Ok(new_tag)
    }

    async fn modify_event_state(
        &self,
        prev: &EventState,
        expires: u32,
        content_type: &str,
        body: Bytes,
    ) -> Result<String> {
        let key = state_key(&prev.aor, &prev.event_type);
        let mut entry = self
            .states
            .get_mut(&key)
            .ok_or_else(|| Error::NoEventState(prev.etag.clone()))?;
        let old_tag = std::mem::replace(&mut entry.etag, new_etag());
        entry.expires = expires;
        entry.content_type = content_type.to_string();
        entry.body = body;
        entry.updated_at = Utc::now();
        let new_tag = entry.etag.clone();
        drop(entry);

        self.tags.remove(&old_tag);
        self.tags.insert(new_tag.clone(), key);
        Ok(new_tag)
    }

    async fn remove_event_state(&self, etag: &str) -> Result<String> {
        let (_, key) = self
            .tags
            .remove(etag)
            .ok_or_else(|| Error::NoEventState(etag.to_string()))?;
        let (_, state) = self
            .states
            .remove(&key)
            .ok_or_else(|| Error::NoEventState(etag.to_string()))?;
        Ok(state.aor)
    }

    async fn find_subscriptions(&self, aor: &str, event: &str) -> Result<Vec<Subscription>> {
        let subs = self
            .subscriptions
            .get(&state_key(aor, event))
            .map(|entry| entry.clone())
            .unwrap_or_default();
        if subs.is_empty() {
            return Err(Error::NoSubscriptions {
                aor: aor.to_string(),
                event: event.to_string(),
            });
        }
        Ok(subs)
    }

    async fn save_message(&self, msg: QueuedMessage) -> Result<()> {
        self.queues.entry(msg.to.clone()).or_default().push(msg);
        Ok(())
    }

    async fn retrieve_messages(&self, aor: &str) -> Result<Vec<QueuedMessage>> {
        Ok(self
            .queues
            .get(aor)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn remove_message(&self, aor: &str, id: &str) -> Result<()> {
        if let Some(mut queue) = self.queues.get_mut(aor) {
            queue.retain(|msg| msg.id != id);
        }
        Ok(())
    }
}
