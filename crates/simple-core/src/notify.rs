//! Best-effort change notification fan-out

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::Error;
use crate::storage::EventStateStore;
use crate::transport::{Method, OutboundRequest, RequestSender};

/// Pushes event-state changes to current subscribers.
///
/// Fire and forget: a failed send is logged and neither retried nor
/// surfaced to the publisher, and subscribers are notified in no
/// particular order.
pub struct NotificationDispatcher {
    store: Arc<dyn EventStateStore>,
    sender: Arc<dyn RequestSender>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn EventStateStore>, sender: Arc<dyn RequestSender>) -> Self {
        Self { store, sender }
    }

    /// Notify every subscriber of (aor, event) of the new document.
    pub async fn notify(&self, aor: &str, event: &str, content_type: &str, body: Bytes) {
        let subs = match self.store.find_subscriptions(aor, event).await {
            Ok(subs) => subs,
            Err(Error::NoSubscriptions { .. }) => {
                debug!("no subscriptions for {}:{}", aor, event);
                return;
            }
            Err(err) => {
                warn!("subscription lookup failed for {}:{}: {}", aor, event, err);
                return;
            }
        };

        debug!("notifying {} subscriber(s) of {}:{}", subs.len(), aor, event);
        for sub in subs {
            let request = OutboundRequest::new(Method::Notify, sub.subscriber.clone())
                .header("Event", event)
                .header("Call-ID", sub.call_id.clone())
                .header("Content-Type", content_type)
                .header("Subscription-State", "active")
                .body(body.clone());

            let sender = Arc::clone(&self.sender);
            tokio::spawn(async move {
                if let Err(err) = sender.send(request).await {
                    warn!("NOTIFY to {} failed: {}", sub.subscriber, err);
                }
            });
        }
    }

    /// Fan out on a detached task; the caller's response is already
    /// decided and must not wait on subscribers.
    pub fn spawn_notify(self: &Arc<Self>, aor: String, event: String, content_type: String, body: Bytes) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            dispatcher.notify(&aor, &event, &content_type, body).await;
        });
    }
}
