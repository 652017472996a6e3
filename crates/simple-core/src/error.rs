//! Error types for simple-core

use thiserror::Error;

/// Result type alias for signaling operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for signaling operations
///
/// Failures split into two propagation policies: `Protocol` carries a
/// status code destined for the peer, everything else is an
/// infrastructure or lookup condition that each handler maps to a status
/// itself.
#[derive(Error, Debug)]
pub enum Error {
    /// Explicit peer-facing failure carrying the status to send
    #[error("protocol error: status {0}")]
    Protocol(u16),

    /// Address has no live registration
    #[error("unregistered user: {0}")]
    NotRegistered(String),

    /// No event state stored under the given entity tag
    #[error("no event state for tag: {0}")]
    NoEventState(String),

    /// Stored event type does not match the request
    #[error("event type mismatch: stored {stored}, requested {requested}")]
    EventMismatch { stored: String, requested: String },

    /// No subscriptions exist for a resource/event pair; the expected
    /// common case during fan-out, distinct from storage failures
    #[error("no subscriptions for {aor} event {event}")]
    NoSubscriptions { aor: String, event: String },

    /// Storage backend failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Transport send failure
    #[error("transport error: {0}")]
    Transport(String),

    /// A forwarded request got a non-2xx final response
    #[error("request rejected with status {0}")]
    Rejected(u16),
}

impl Error {
    /// The lookup conditions that answer 412 during modify and refresh;
    /// any other failure there answers 500.
    pub fn is_not_found_or_mismatch(&self) -> bool {
        matches!(self, Error::NoEventState(_) | Error::EventMismatch { .. })
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
