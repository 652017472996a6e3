//! Core types for event state, messaging, and configuration

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============ Event State Types ============

/// Published event state for one (resource, event type) pair
///
/// At most one live row exists per pair; its entity tag is globally
/// unique and is reissued on every mutating transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventState {
    /// Canonical address of record the state was published for
    pub aor: String,

    /// Event package token (e.g. "presence")
    pub event_type: String,

    /// Opaque version tag correlating this version of the state
    pub etag: String,

    /// Seconds of validity granted to the publication
    pub expires: u32,

    /// MIME type of the published document
    pub content_type: String,

    /// Opaque document body
    pub body: Bytes,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

/// Subscription to change notifications for a resource/event pair
///
/// Lifecycle is owned by the SUBSCRIBE handler outside this crate; the
/// core only reads these to fan out notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Destination contact of the watcher
    pub subscriber: String,

    /// Dialog correlation token for NOTIFY
    pub call_id: String,

    /// Watched resource
    pub aor: String,

    /// Event package being watched
    pub event_type: String,

    /// Seconds of remaining subscription validity
    pub expires: u32,
}

// ============ Messaging Types ============

/// An instant message held for later delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Unique message identifier
    pub id: String,

    /// Canonical sender address
    pub from: String,

    /// Canonical recipient address
    pub to: String,

    /// User part of the original request URI, kept for re-addressing
    pub to_user: String,

    /// MIME type of the message body
    pub content_type: String,

    /// Opaque message body
    pub body: Bytes,

    /// Original From header value, replayed verbatim
    pub from_header: String,

    /// Original To header value, replayed verbatim
    pub to_header: String,

    /// When the message was queued
    pub enqueued_at: DateTime<Utc>,
}

// ============ Resolution Types ============

/// Live network location of a registered user
///
/// Obtained fresh from the resolver on every delivery attempt; a
/// resolved contact can go stale between successive sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Network address
    pub host: String,

    /// Network port
    pub port: u16,
}

impl Contact {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// SIP URI addressing `user` at this contact
    pub fn uri(&self, user: &str) -> String {
        format!("sip:{}@{}:{}", user, self.host, self.port)
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ============ Configuration Types ============

/// Configuration for the signaling core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleConfig {
    /// Event packages accepted by PUBLISH
    pub supported_events: Vec<String>,

    /// Expiry applied when a request carries no Expires header
    pub default_expires: u32,

    /// Lower bound for nonzero requested expiry; below it requests get 423
    pub min_expires: Option<u32>,

    /// Upper bound requested expiry is clamped to
    pub max_expires: Option<u32>,

    /// Domain substituted for literal IP hosts when normalizing addresses
    pub domain: Option<String>,

    /// Settle time before a flush starts delivering
    pub flush_delay: Duration,
}

impl Default for SimpleConfig {
    fn default() -> Self {
        Self {
            supported_events: vec!["presence".to_string()],
            default_expires: 3600, // 1 hour
            min_expires: Some(60),
            max_expires: Some(86400),
            domain: None,
            flush_delay: Duration::from_secs(3),
        }
    }
}
