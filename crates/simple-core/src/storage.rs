//! Storage trait for event state, subscriptions, and queued messages

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::types::{EventState, QueuedMessage, Subscription};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Abstract store backing the compositor, dispatcher, relay, and flusher.
/// Implement this trait for different backends (memory, SQL, Redis, etc.)
///
/// Per-record atomicity is the backend's contract: the core never takes
/// locks of its own around a read-modify-write of a single key.
#[async_trait]
pub trait EventStateStore: Send + Sync {
    /// Create event state for (aor, event), replacing any prior row for
    /// the pair, and mint a fresh entity tag.
    async fn add_event_state(
        &self,
        aor: &str,
        expires: u32,
        event: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<EventState>;

    /// Fetch event state by entity tag. `Ok(None)` when the tag is unknown.
    async fn get_event_state_by_tag(&self, etag: &str) -> Result<Option<EventState>>;

    /// Extend the expiry of the (aor, event) row, reissuing its tag.
    async fn refresh_event_state(&self, aor: &str, event: &str, expires: u32) -> Result<String>;

    /// Replace body, content type, and expiry of an existing row,
    /// reissuing its tag.
    async fn modify_event_state(
        &self,
        prev: &EventState,
        expires: u32,
        content_type: &str,
        body: Bytes,
    ) -> Result<String>;

    /// Delete event state by entity tag, returning the owning aor.
    async fn remove_event_state(&self, etag: &str) -> Result<String>;

    /// All current subscriptions for (aor, event).
    ///
    /// Fails with `Error::NoSubscriptions` when none exist, which callers
    /// treat as the ordinary case rather than a fault.
    async fn find_subscriptions(&self, aor: &str, event: &str) -> Result<Vec<Subscription>>;

    /// Queue a message for later delivery.
    async fn save_message(&self, msg: QueuedMessage) -> Result<()>;

    /// All queued messages for `aor`, oldest first.
    async fn retrieve_messages(&self, aor: &str) -> Result<Vec<QueuedMessage>>;

    /// Drop one delivered message from `aor`'s queue.
    async fn remove_message(&self, aor: &str, id: &str) -> Result<()>;
}
