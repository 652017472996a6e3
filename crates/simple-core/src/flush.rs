//! Replay of stored messages once a resource becomes reachable

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::message::MessageRelay;
use crate::storage::EventStateStore;
use crate::types::{QueuedMessage, SimpleConfig};

/// Drains the offline-message queue for a resource, oldest first.
///
/// Invoked when a resource becomes reachable again, typically off a
/// fresh registration; the triggering event lives outside this crate.
/// Deliveries are strictly sequential and the first failure halts the
/// run, leaving the rest of the queue for a later attempt. Queues for
/// different resources may be flushed concurrently.
pub struct StoredMessageFlusher {
    store: Arc<dyn EventStateStore>,
    relay: Arc<MessageRelay>,
    config: SimpleConfig,
}

impl StoredMessageFlusher {
    pub fn new(
        store: Arc<dyn EventStateStore>,
        relay: Arc<MessageRelay>,
        config: SimpleConfig,
    ) -> Self {
        Self {
            store,
            relay,
            config,
        }
    }

    /// Deliver everything queued for `aor`, returning the delivered count.
    pub async fn flush(&self, aor: &str) -> Result<usize> {
        let msgs = self.store.retrieve_messages(aor).await?;
        if msgs.is_empty() {
            debug!("no stored messages for {}", aor);
            return Ok(0);
        }
        info!("flushing {} stored message(s) for {}", msgs.len(), aor);

        // Give the registration that triggered us time to settle
        tokio::time::sleep(self.config.flush_delay).await;

        let mut delivered = 0;
        for msg in &msgs {
            if let Err(err) = self.deliver(msg).await {
                warn!(
                    "stopping flush for {} after {} delivered: {}",
                    aor, delivered, err
                );
                return Err(err);
            }
            self.store.remove_message(aor, &msg.id).await?;
            delivered += 1;
        }

        info!("flushed {} message(s) for {}", delivered, aor);
        Ok(delivered)
    }

    async fn deliver(&self, msg: &QueuedMessage) -> Result<()> {
        debug!("sending saved message {} to {}", msg.id, msg.to);
        self.relay
            .forward(
                &msg.to,
                &msg.to_user,
                &msg.from_header,
                &msg.to_header,
                &msg.content_type,
                msg.body.clone(),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::Utc;

    use crate::aor::new_etag;
    use crate::error::Error;
    use crate::registrar::MemoryRegistrar;
    use crate::storage::memory::MemoryStore;
    use crate::transport::{OutboundRequest, RequestSender};
    use crate::types::Contact;

    enum Script {
        Ok(u16),
        Fail,
    }

    struct ScriptedSender {
        scripts: Mutex<VecDeque<Script>>,
        recorded: Mutex<Vec<OutboundRequest>>,
    }

    impl ScriptedSender {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                recorded: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RequestSender for ScriptedSender {
        async fn send(&self, request: OutboundRequest) -> crate::error::Result<u16> {
            self.recorded.lock().unwrap().push(request);
            match self.scripts.lock().unwrap().pop_front() {
                Some(Script::Fail) => Err(Error::Transport("connection refused".to_string())),
                Some(Script::Ok(status)) => Ok(status),
                None => Ok(200),
            }
        }
    }

    fn config() -> SimpleConfig {
        SimpleConfig {
            flush_delay: Duration::ZERO,
            ..SimpleConfig::default()
        }
    }

    async fn queue_message(store: &MemoryStore, text: &str, offset_secs: i64) {
        store
            .save_message(QueuedMessage {
                id: new_etag(),
                from: "bob@example.com".to_string(),
                to: "alice@example.com".to_string(),
                to_user: "alice".to_string(),
                content_type: "text/plain".to_string(),
                body: Bytes::copy_from_slice(text.as_bytes()),
                from_header: "<sip:bob@example.com>".to_string(),
                to_header: "<sip:alice@example.com>".to_string(),
                enqueued_at: Utc::now() + chrono::Duration::seconds(offset_secs),
            })
            .await
            .unwrap();
    }

    fn flusher(sender: Arc<ScriptedSender>) -> (StoredMessageFlusher, Arc<MemoryStore>, Arc<MemoryRegistrar>) {
        let store = Arc::new(MemoryStore::new());
        let registrar = Arc::new(MemoryRegistrar::new());
        let relay = Arc::new(MessageRelay::new(
            registrar.clone(),
            store.clone(),
            sender,
            config(),
        ));
        (
            StoredMessageFlusher::new(store.clone(), relay, config()),
            store,
            registrar,
        )
    }

    #[tokio::test]
    async fn test_flushes_in_enqueue_order() {
        let sender = ScriptedSender::new(vec![]);
        let (flusher, store, registrar) = flusher(sender.clone());
        registrar.register("alice@example.com", Contact::new("192.168.1.100", 5060), 3600);

        for (i, text) in ["one", "two", "three"].iter().enumerate() {
            queue_message(&store, text, i as i64).await;
        }

        let delivered = flusher.flush("alice@example.com").await.unwrap();
        assert_eq!(delivered, 3);

        let recorded = sender.recorded.lock().unwrap();
        let bodies: Vec<_> = recorded.iter().map(|r| r.body.clone()).collect();
        assert_eq!(
            bodies,
            vec![
                Bytes::from_static(b"one"),
                Bytes::from_static(b"two"),
                Bytes::from_static(b"three")
            ]
        );
        drop(recorded);

        assert!(store.retrieve_messages("alice@example.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_halts_on_first_failure() {
        let sender = ScriptedSender::new(vec![Script::Ok(200), Script::Fail]);
        let (flusher, store, registrar) = flusher(sender.clone());
        registrar.register("alice@example.com", Contact::new("192.168.1.100", 5060), 3600);

        for (i, text) in ["one", "two", "three"].iter().enumerate() {
            queue_message(&store, text, i as i64).await;
        }

        assert!(flusher.flush("alice@example.com").await.is_err());

        // Only the two attempted messages went out, in order
        let recorded = sender.recorded.lock().unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[1].body, Bytes::from_static(b"two"));
        drop(recorded);

        // The failed message and everything behind it stay queued
        let remaining = store.retrieve_messages("alice@example.com").await.unwrap();
        let bodies: Vec<_> = remaining.iter().map(|m| m.body.clone()).collect();
        assert_eq!(bodies, vec![Bytes::from_static(b"two"), Bytes::from_static(b"three")]);
    }

    #[tokio::test]
    async fn test_unresolvable_recipient_halts() {
        let sender = ScriptedSender::new(vec![]);
        let (flusher, store, _registrar) = flusher(sender.clone());

        queue_message(&store, "one", 0).await;

        let err = flusher.flush("alice@example.com").await.unwrap_err();
        assert!(matches!(err, Error::NotRegistered(_)));
        assert!(sender.recorded.lock().unwrap().is_empty());
        assert_eq!(store.retrieve_messages("alice@example.com").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let sender = ScriptedSender::new(vec![]);
        let (flusher, _store, _registrar) = flusher(sender);
        assert_eq!(flusher.flush("alice@example.com").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejected_status_halts() {
        let sender = ScriptedSender::new(vec![Script::Ok(486)]);
        let (flusher, store, registrar) = flusher(sender);
        registrar.register("alice@example.com", Contact::new("192.168.1.100", 5060), 3600);

        queue_message(&store, "one", 0).await;

        let err = flusher.flush("alice@example.com").await.unwrap_err();
        assert!(matches!(err, Error::Rejected(486)));
        assert_eq!(store.retrieve_messages("alice@example.com").await.unwrap().len(), 1);
    }
}
