//! MESSAGE relay with store-and-forward fallback

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::aor::{parse_aor, user_part};
use crate::error::{Error, Result};
use crate::registrar::ContactResolver;
use crate::storage::EventStateStore;
use crate::transport::{Method, OutboundRequest, RequestSender};
use crate::types::{QueuedMessage, SimpleConfig};

/// Inbound MESSAGE, already parsed by the transport layer
#[derive(Debug, Clone)]
pub struct MessageRequest {
    /// Request URI naming the recipient
    pub target: String,

    /// URI from the parsed From header
    pub from_uri: String,

    /// Verbatim From header value
    pub from_header: String,

    /// Verbatim To header value
    pub to_header: String,

    /// MIME type of the message body
    pub content_type: String,

    /// Opaque message body
    pub body: Bytes,
}

/// Relays instant messages to their recipient's live contact, queueing
/// them for later delivery when the recipient cannot be reached.
pub struct MessageRelay {
    resolver: Arc<dyn ContactResolver>,
    store: Arc<dyn EventStateStore>,
    sender: Arc<dyn RequestSender>,
    config: SimpleConfig,
}

impl MessageRelay {
    pub fn new(
        resolver: Arc<dyn ContactResolver>,
        store: Arc<dyn EventStateStore>,
        sender: Arc<dyn RequestSender>,
        config: SimpleConfig,
    ) -> Self {
        Self {
            resolver,
            store,
            sender,
            config,
        }
    }

    /// Process one MESSAGE and return the status for the original sender.
    pub async fn handle_message(&self, req: MessageRequest) -> u16 {
        let aor = parse_aor(&req.target, self.config.domain.as_deref());
        let to_user = user_part(&req.target).unwrap_or("undefined").to_string();

        let forwarded = self
            .forward(
                &aor,
                &to_user,
                &req.from_header,
                &req.to_header,
                &req.content_type,
                req.body.clone(),
            )
            .await;

        match forwarded {
            Ok(status) => status,
            Err(err) => {
                // The offline case is ordinary; only genuine
                // infrastructure trouble logs at error
                match &err {
                    Error::NotRegistered(_) => {
                        info!("message destined for offline aor {}, fall back to store and forward", aor);
                    }
                    Error::Rejected(status) => {
                        info!("message failed sending {}: status {}, fall back to store and forward", aor, status);
                    }
                    err => {
                        error!("error finding contact for {}: {}, fall back to store and forward", aor, err);
                    }
                }
                self.fall_back(req, aor, to_user).await
            }
        }
    }

    /// Resolve `aor` and forward one message to its live contact,
    /// accepting only a 200 or 202 final status.
    ///
    /// The flusher replays stored messages through this same path.
    pub(crate) async fn forward(
        &self,
        aor: &str,
        to_user: &str,
        from_header: &str,
        to_header: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<u16> {
        let contact = self.resolver.resolve(aor).await?;
        let uri = contact.uri(to_user);
        debug!("aor: {} uri: {}", aor, uri);

        let status = self
            .sender
            .send(
                OutboundRequest::new(Method::Message, uri)
                    .header("From", from_header)
                    .header("To", to_header)
                    .header("Content-Type", content_type)
                    .body(body),
            )
            .await?;

        if status == 200 || status == 202 {
            Ok(status)
        } else {
            Err(Error::Rejected(status))
        }
    }

    async fn fall_back(&self, req: MessageRequest, aor: String, to_user: String) -> u16 {
        if req.content_type.contains("im-iscomposing") {
            debug!("discarding im-composing message because target is offline");
            return 202;
        }

        let from = parse_aor(&req.from_uri, self.config.domain.as_deref());
        debug!("saving message type: {} for {}", req.content_type, aor);
        let msg = QueuedMessage {
            id: Uuid::new_v4().to_string(),
            from,
            to: aor.clone(),
            to_user,
            content_type: req.content_type,
            body: req.body,
            from_header: req.from_header,
            to_header: req.to_header,
            enqueued_at: Utc::now(),
        };

        match self.store.save_message(msg).await {
            Ok(()) => {
                info!("successfully saved message for sending later to {}", aor);
                202
            }
            Err(err) => {
                error!("failed to save message for {}: {}", aor, err);
                500
            }
        }
    }
}
