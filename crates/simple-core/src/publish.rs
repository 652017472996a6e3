//! Event State Compositor: PUBLISH handling per RFC 3903

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::aor::parse_aor;
use crate::error::Error;
use crate::notify::NotificationDispatcher;
use crate::storage::EventStateStore;
use crate::types::SimpleConfig;

/// Inbound PUBLISH, already parsed by the transport layer
#[derive(Debug, Clone)]
pub struct PublishRequest {
    /// Request URI naming the resource
    pub target: String,

    /// Event header value
    pub event: Option<String>,

    /// Expires header value
    pub expires: Option<u32>,

    /// SIP-If-Match entity tag
    pub sip_if_match: Option<String>,

    /// Content-Type header value
    pub content_type: Option<String>,

    /// Published document, when present
    pub body: Option<Bytes>,

    /// Call-ID, carried for logging
    pub call_id: String,
}

/// Response for the original publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResponse {
    /// SIP status code
    pub status: u16,

    /// Granted expiration time
    pub expires: Option<u32>,

    /// Entity tag for subsequent updates
    pub entity_tag: Option<String>,

    /// Min-Expires hint on a 423
    pub min_expires: Option<u32>,
}

impl PublishResponse {
    fn ok(expires: u32, entity_tag: String) -> Self {
        Self {
            status: 200,
            expires: Some(expires),
            entity_tag: Some(entity_tag),
            min_expires: None,
        }
    }

    fn with_status(status: u16) -> Self {
        Self {
            status,
            expires: None,
            entity_tag: None,
            min_expires: None,
        }
    }

    fn interval_too_brief(min_expires: u32) -> Self {
        Self {
            status: 423,
            expires: None,
            entity_tag: None,
            min_expires: Some(min_expires),
        }
    }

    /// Check if the PUBLISH was accepted
    pub fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Which of the four RFC 3903 operations a request selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishTransition {
    Initial,
    Modify,
    Refresh,
    Remove,
    /// No operation matches this header combination
    Invalid,
}

impl PublishTransition {
    /// Decide over body presence, entity tag presence, and expiry.
    pub fn select(has_body: bool, has_if_match: bool, expiry: u32) -> Self {
        match (has_body, has_if_match) {
            (true, false) => PublishTransition::Initial,
            (true, true) if expiry > 0 => PublishTransition::Modify,
            (false, true) if expiry == 0 => PublishTransition::Remove,
            (false, true) => PublishTransition::Refresh,
            _ => PublishTransition::Invalid,
        }
    }
}

/// Event State Compositor: accepts published event state, stores it, and
/// fans change notifications out to interested subscribers.
pub struct EventStateCompositor {
    store: Arc<dyn EventStateStore>,
    dispatcher: Arc<NotificationDispatcher>,
    config: SimpleConfig,
}

impl EventStateCompositor {
    pub fn new(
        store: Arc<dyn EventStateStore>,
        dispatcher: Arc<NotificationDispatcher>,
        config: SimpleConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    /// Process one PUBLISH.
    ///
    /// Returns `None` when no transition matches the request shape, in
    /// which case no response is produced at all.
    pub async fn handle_publish(&self, req: PublishRequest) -> Option<PublishResponse> {
        let (event, expiry) = match self.validate(&req) {
            Ok(pair) => pair,
            Err(resp) => return Some(resp),
        };

        let transition =
            PublishTransition::select(req.body.is_some(), req.sip_if_match.is_some(), expiry);
        debug!("PUBLISH {} selected {:?} (call-id {})", req.target, transition, req.call_id);

        match transition {
            PublishTransition::Initial => Some(self.initial(&req, &event, expiry).await),
            PublishTransition::Modify => Some(self.modify(&req, &event, expiry).await),
            PublishTransition::Refresh => Some(self.refresh(&req, expiry).await),
            PublishTransition::Remove => Some(self.remove(&req, &event).await),
            PublishTransition::Invalid => {
                warn!(
                    "PUBLISH {} matches no transition (call-id {})",
                    req.target, req.call_id
                );
                None
            }
        }
    }

    /// Header validation and expiry computation, short-circuiting with
    /// the rejection response on failure.
    fn validate(&self, req: &PublishRequest) -> std::result::Result<(String, u32), PublishResponse> {
        let Some(event) = req.event.clone() else {
            info!("PUBLISH request is missing Event header: {}", req.call_id);
            return Err(PublishResponse::with_status(400));
        };
        if !self.config.supported_events.iter().any(|e| e == &event) {
            info!("PUBLISH request for unsupported event {}: {}", event, req.call_id);
            return Err(PublishResponse::with_status(489));
        }

        let mut expiry = req.expires.unwrap_or(self.config.default_expires);
        if let Some(max) = self.config.max_expires {
            if expiry > max {
                debug!("reducing Expires value to {}", max);
                expiry = max;
            }
        }
        if let Some(min) = self.config.min_expires {
            if expiry != 0 && expiry < min {
                let hint = self.config.max_expires.unwrap_or(3600);
                return Err(PublishResponse::interval_too_brief(hint));
            }
        }

        Ok((event, expiry))
    }

    async fn initial(&self, req: &PublishRequest, event: &str, expiry: u32) -> PublishResponse {
        let aor = parse_aor(&req.target, self.config.domain.as_deref());
        let content_type = req.content_type.clone().unwrap_or_default();
        let body = req.body.clone().unwrap_or_default();

        match self
            .store
            .add_event_state(&aor, expiry, event, &content_type, body.clone())
            .await
        {
            Ok(state) => {
                info!(
                    "added event state for {} event {} etag: {}",
                    aor, event, state.etag
                );
                self.dispatcher
                    .spawn_notify(aor, event.to_string(), content_type, body);
                PublishResponse::ok(expiry, state.etag)
            }
            Err(err) => {
                warn!("failed to add event state for {}: {}", aor, err);
                PublishResponse::with_status(480)
            }
        }
    }

    async fn modify(&self, req: &PublishRequest, event: &str, expiry: u32) -> PublishResponse {
        let etag = req.sip_if_match.clone().unwrap_or_default();
        let prev = match self.store.get_event_state_by_tag(&etag).await {
            Ok(Some(prev)) => prev,
            Ok(None) => {
                info!("modify etag: {} no state found", etag);
                return PublishResponse::with_status(412);
            }
            Err(err) => return self.lookup_failure("modify", &etag, err),
        };
        if prev.event_type != event {
            info!(
                "modify Event {} does not match stored type: {}",
                event, prev.event_type
            );
            return PublishResponse::with_status(412);
        }

        let content_type = req.content_type.clone().unwrap_or_default();
        let body = req.body.clone().unwrap_or_default();
        match self
            .store
            .modify_event_state(&prev, expiry, &content_type, body.clone())
            .await
        {
            Ok(new_tag) => {
                info!("modified state for aor: {} event {}", prev.aor, event);
                let aor = parse_aor(&req.target, self.config.domain.as_deref());
                self.dispatcher
                    .spawn_notify(aor, event.to_string(), content_type, body);
                PublishResponse::ok(expiry, new_tag)
            }
            Err(err) => self.lookup_failure("modify", &etag, err),
        }
    }

    async fn refresh(&self, req: &PublishRequest, expiry: u32) -> PublishResponse {
        let etag = req.sip_if_match.clone().unwrap_or_default();
        let prev = match self.store.get_event_state_by_tag(&etag).await {
            Ok(Some(prev)) => prev,
            Ok(None) => {
                info!("refresh etag: {} no state found", etag);
                return PublishResponse::with_status(412);
            }
            Err(err) => return self.lookup_failure("refresh", &etag, err),
        };

        match self
            .store
            .refresh_event_state(&prev.aor, &prev.event_type, expiry)
            .await
        {
            Ok(new_tag) => {
                info!(
                    "refreshed event state for aor {} event {}",
                    prev.aor, prev.event_type
                );
                PublishResponse::ok(expiry, new_tag)
            }
            Err(err) => self.lookup_failure("refresh", &etag, err),
        }
    }

    async fn remove(&self, req: &PublishRequest, event: &str) -> PublishResponse {
        let etag = req.sip_if_match.clone().unwrap_or_default();
        match self.store.remove_event_state(&etag).await {
            Ok(aor) => {
                info!("removed event state for {} event {}", aor, event);
                PublishResponse::with_status(200)
            }
            Err(err) => {
                // Every removal failure answers 412, unknown tag or not
                info!("failed to remove event state for ETag {}: {}", etag, err);
                PublishResponse::with_status(412)
            }
        }
    }

    /// Map a store failure during modify/refresh: explicit not-found or
    /// mismatch answers 412, a carried protocol status passes through,
    /// anything else is a 500.
    fn lookup_failure(&self, op: &str, etag: &str, err: Error) -> PublishResponse {
        match err {
            Error::Protocol(status) => PublishResponse::with_status(status),
            err if err.is_not_found_or_mismatch() => {
                info!("{} etag: {} no usable state: {}", op, etag, err);
                PublishResponse::with_status(412)
            }
            err => {
                error!("{} error retrieving state for {}: {}", op, etag, err);
                PublishResponse::with_status(500)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use crate::error::Result;
    use crate::storage::memory::MemoryStore;
    use crate::transport::{OutboundRequest, RequestSender};
    use crate::types::Subscription;

    struct RecordingSender {
        tx: mpsc::UnboundedSender<OutboundRequest>,
    }

    #[async_trait]
    impl RequestSender for RecordingSender {
        async fn send(&self, request: OutboundRequest) -> Result<u16> {
            let _ = self.tx.send(request);
            Ok(200)
        }
    }

    fn compositor(
        config: SimpleConfig,
    ) -> (
        EventStateCompositor,
        Arc<MemoryStore>,
        mpsc::UnboundedReceiver<OutboundRequest>,
    ) {
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(NotificationDispatcher::new(
            store.clone(),
            Arc::new(RecordingSender { tx }),
        ));
        (
            EventStateCompositor::new(store.clone(), dispatcher, config),
            store,
            rx,
        )
    }

    fn publish(target: &str) -> PublishRequest {
        PublishRequest {
            target: target.to_string(),
            event: Some("presence".to_string()),
            expires: None,
            sip_if_match: None,
            content_type: Some("application/pidf+xml".to_string()),
            body: Some(Bytes::from_static(b"<presence/>")),
            call_id: "call-1".to_string(),
        }
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(PublishTransition::select(true, false, 0), PublishTransition::Initial);
        assert_eq!(PublishTransition::select(true, false, 3600), PublishTransition::Initial);
        assert_eq!(PublishTransition::select(true, true, 3600), PublishTransition::Modify);
        assert_eq!(PublishTransition::select(false, true, 0), PublishTransition::Remove);
        assert_eq!(PublishTransition::select(false, true, 3600), PublishTransition::Refresh);
        assert_eq!(PublishTransition::select(true, true, 0), PublishTransition::Invalid);
        assert_eq!(PublishTransition::select(false, false, 3600), PublishTransition::Invalid);
    }

    #[tokio::test]
    async fn test_missing_event_header() {
        let (esc, _, _rx) = compositor(SimpleConfig::default());
        let mut req = publish("sip:alice@example.com");
        req.event = None;

        let resp = esc.handle_publish(req).await.unwrap();
        assert_eq!(resp.status, 400);
    }

    #[tokio::test]
    async fn test_unsupported_event() {
        let (esc, _, _rx) = compositor(SimpleConfig::default());
        let mut req = publish("sip:alice@example.com");
        req.event = Some("conference".to_string());

        let resp = esc.handle_publish(req).await.unwrap();
        assert_eq!(resp.status, 489);
    }

    #[tokio::test]
    async fn test_initial_publish() {
        let (esc, store, _rx) = compositor(SimpleConfig::default());

        let resp = esc.handle_publish(publish("sip:alice@example.com")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.expires, Some(3600));

        let etag = resp.entity_tag.unwrap();
        let state = store.get_event_state_by_tag(&etag).await.unwrap().unwrap();
        assert_eq!(state.aor, "alice@example.com");
        assert_eq!(state.event_type, "presence");
    }

    #[tokio::test]
    async fn test_initial_publish_notifies() {
        let (esc, store, mut rx) = compositor(SimpleConfig::default());
        store.insert_subscription(Subscription {
            subscriber: "sip:watcher@10.0.0.1:5060".to_string(),
            call_id: "sub-call-1".to_string(),
            aor: "alice@example.com".to_string(),
            event_type: "presence".to_string(),
            expires: 3600,
        });

        esc.handle_publish(publish("sip:alice@example.com")).await.unwrap();

        let notify = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(notify.target, "sip:watcher@10.0.0.1:5060");
        assert_eq!(notify.header_value("Call-ID"), Some("sub-call-1"));
        assert_eq!(notify.header_value("Subscription-State"), Some("active"));
        assert_eq!(notify.body, Bytes::from_static(b"<presence/>"));
    }

    #[tokio::test]
    async fn test_expiry_clamped_to_max() {
        let (esc, _, _rx) = compositor(SimpleConfig {
            max_expires: Some(7200),
            ..SimpleConfig::default()
        });
        let mut req = publish("sip:alice@example.com");
        req.expires = Some(999999);

        let resp = esc.handle_publish(req).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.expires, Some(7200));
    }

    #[tokio::test]
    async fn test_expiry_below_min() {
        let (esc, store, _rx) = compositor(SimpleConfig {
            min_expires: Some(60),
            max_expires: Some(7200),
            ..SimpleConfig::default()
        });

        // Seed state so we can prove the 423 touched nothing
        let seeded = esc.handle_publish(publish("sip:alice@example.com")).await.unwrap();
        let etag = seeded.entity_tag.unwrap();

        let mut req = publish("sip:alice@example.com");
        req.sip_if_match = Some(etag.clone());
        req.expires = Some(30);

        let resp = esc.handle_publish(req).await.unwrap();
        assert_eq!(resp.status, 423);
        assert_eq!(resp.min_expires, Some(7200));

        let state = store.get_event_state_by_tag(&etag).await.unwrap().unwrap();
        assert_eq!(state.body, Bytes::from_static(b"<presence/>"));
        assert_eq!(state.expires, 3600);
    }

    #[tokio::test]
    async fn test_modify_unknown_etag() {
        let (esc, _, _rx) = compositor(SimpleConfig::default());
        let mut req = publish("sip:alice@example.com");
        req.sip_if_match = Some("stale-tag".to_string());

        let resp = esc.handle_publish(req).await.unwrap();
        assert_eq!(resp.status, 412);
    }

    #[tokio::test]
    async fn test_modify_event_mismatch_leaves_state() {
        let config = SimpleConfig {
            supported_events: vec!["presence".to_string(), "dialog".to_string()],
            ..SimpleConfig::default()
        };
        let (esc, store, _rx) = compositor(config);

        let seeded = esc.handle_publish(publish("sip:alice@example.com")).await.unwrap();
        let etag = seeded.entity_tag.unwrap();

        let mut req = publish("sip:alice@example.com");
        req.event = Some("dialog".to_string());
        req.sip_if_match = Some(etag.clone());
        req.body = Some(Bytes::from_static(b"<dialog-info/>"));

        let resp = esc.handle_publish(req).await.unwrap();
        assert_eq!(resp.status, 412);

        // Stored state is untouched, original tag still live
        let state = store.get_event_state_by_tag(&etag).await.unwrap().unwrap();
        assert_eq!(state.event_type, "presence");
        assert_eq!(state.body, Bytes::from_static(b"<presence/>"));
    }

    #[tokio::test]
    async fn test_refresh_reissues_tag() {
        let (esc, store, _rx) = compositor(SimpleConfig::default());
        let seeded = esc.handle_publish(publish("sip:alice@example.com")).await.unwrap();
        let etag = seeded.entity_tag.unwrap();

        let mut req = publish("sip:alice@example.com");
        req.body = None;
        req.content_type = None;
        req.sip_if_match = Some(etag.clone());
        req.expires = Some(1800);

        let resp = esc.handle_publish(req).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.expires, Some(1800));

        let new_tag = resp.entity_tag.unwrap();
        let state = store.get_event_state_by_tag(&new_tag).await.unwrap().unwrap();
        assert_eq!(state.expires, 1800);
    }

    #[tokio::test]
    async fn test_remove_then_lookup_fails() {
        let (esc, store, _rx) = compositor(SimpleConfig::default());
        let seeded = esc.handle_publish(publish("sip:alice@example.com")).await.unwrap();
        let etag = seeded.entity_tag.unwrap();

        let mut req = publish("sip:alice@example.com");
        req.body = None;
        req.content_type = None;
        req.sip_if_match = Some(etag.clone());
        req.expires = Some(0);

        let resp = esc.handle_publish(req).await.unwrap();
        assert_eq!(resp.status, 200);
        assert!(store.get_event_state_by_tag(&etag).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_unknown_etag() {
        let (esc, _, _rx) = compositor(SimpleConfig::default());
        let mut req = publish("sip:alice@example.com");
        req.body = None;
        req.content_type = None;
        req.sip_if_match = Some("stale-tag".to_string());
        req.expires = Some(0);

        let resp = esc.handle_publish(req).await.unwrap();
        assert_eq!(resp.status, 412);
    }

    #[tokio::test]
    async fn test_invalid_shape_gets_no_response() {
        let (esc, _, _rx) = compositor(SimpleConfig::default());

        // Body plus entity tag with zero expiry matches nothing
        let mut req = publish("sip:alice@example.com");
        req.sip_if_match = Some("some-tag".to_string());
        req.expires = Some(0);
        assert!(esc.handle_publish(req).await.is_none());

        // Neither body nor entity tag matches nothing either
        let mut req = publish("sip:alice@example.com");
        req.body = None;
        req.content_type = None;
        assert!(esc.handle_publish(req).await.is_none());
    }
}
