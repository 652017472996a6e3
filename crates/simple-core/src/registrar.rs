//! Contact resolution against the location service

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::Contact;

/// Resolves a canonical address to a live network contact.
///
/// Implementations front the location service populated by REGISTER
/// processing, which happens outside this crate. Handlers receive a
/// resolver at construction and never consult ambient state.
#[async_trait]
pub trait ContactResolver: Send + Sync {
    /// Look up the current contact for `aor`.
    ///
    /// Fails with `Error::NotRegistered` when the address has no live
    /// registration.
    async fn resolve(&self, aor: &str) -> Result<Contact>;
}

/// In-memory location registry, the bundled resolver backend.
pub struct MemoryRegistrar {
    bindings: DashMap<String, Binding>,
}

#[derive(Debug, Clone)]
struct Binding {
    contact: Contact,
    expires_at: DateTime<Utc>,
}

impl MemoryRegistrar {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
        }
    }

    /// Record a registration for `aor`, replacing any previous binding.
    /// An expiry of zero unregisters.
    pub fn register(&self, aor: &str, contact: Contact, expires: u32) {
        if expires == 0 {
            self.unregister(aor);
            return;
        }
        let expires_at = Utc::now() + Duration::seconds(expires as i64);
        self.bindings
            .insert(aor.to_string(), Binding { contact, expires_at });
        info!("registered {} for {}s", aor, expires);
    }

    /// Drop the binding for `aor`, if any.
    pub fn unregister(&self, aor: &str) {
        if self.bindings.remove(aor).is_some() {
            info!("unregistered {}", aor);
        }
    }
}

impl Default for MemoryRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContactResolver for MemoryRegistrar {
    async fn resolve(&self, aor: &str) -> Result<Contact> {
        if let Some(binding) = self.bindings.get(aor) {
            if binding.expires_at > Utc::now() {
                return Ok(binding.contact.clone());
            }
        }
        // Expired bindings resolve the same as absent ones
        self.bindings
            .remove_if(aor, |_, binding| binding.expires_at <= Utc::now());
        debug!("no live registration for {}", aor);
        Err(Error::NotRegistered(aor.to_string()))
    }
}
