//! # Simple Core
//!
//! Application-level signaling core for a SIP SIMPLE presence and
//! offline-messaging server.
//!
//! This crate provides:
//! - Event state compositing (PUBLISH) per RFC 3903
//! - Change notification fan-out to subscribers (NOTIFY)
//! - Instant message relay (MESSAGE) with store-and-forward fallback
//! - Replay of queued messages once a recipient registers again
//!
//! Message parsing, transaction handling, registration, and
//! authentication live in the layers around this crate; the core only
//! sees parsed requests plus the collaborator traits in [`registrar`],
//! [`storage`], and [`transport`], which are injected at construction.

pub mod aor;
pub mod error;
pub mod flush;
pub mod message;
pub mod notify;
pub mod publish;
pub mod registrar;
pub mod storage;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use error::{Error, Result};
pub use flush::StoredMessageFlusher;
pub use message::{MessageRelay, MessageRequest};
pub use notify::NotificationDispatcher;
pub use publish::{EventStateCompositor, PublishRequest, PublishResponse, PublishTransition};
pub use registrar::{ContactResolver, MemoryRegistrar};
pub use storage::{EventStateStore, MemoryStore, SqliteStore};
pub use transport::{Method, OutboundRequest, RequestSender};
pub use types::{Contact, EventState, QueuedMessage, SimpleConfig, Subscription};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
