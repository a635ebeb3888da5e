//! Outbound dispatcher: one send attempt per inbound event.
//!
//! The outbound message is logged only when the channel accepts it, so the
//! message log reflects what was actually delivered.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::channels::Channel;
use crate::channels::whatsapp::WHATSAPP_MAX_MESSAGE_LENGTH;
use crate::store::{Database, NewMessage};

/// What happened to a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Failed,
    /// No channel configured; nothing was attempted.
    Skipped,
}

pub struct OutboundDispatcher {
    channel: Option<Arc<dyn Channel>>,
    db: Arc<dyn Database>,
    timeout: Duration,
}

impl OutboundDispatcher {
    pub fn new(channel: Option<Arc<dyn Channel>>, db: Arc<dyn Database>, timeout: Duration) -> Self {
        Self { channel, db, timeout }
    }

    /// Send `text` to `to` once and log it on success. Without a
    /// conversation the reply is sent but not logged.
    pub async fn dispatch(
        &self,
        conversation_id: Option<Uuid>,
        to: &str,
        text: &str,
    ) -> DeliveryOutcome {
        let Some(channel) = self.channel.as_ref() else {
            warn!(to, "No messaging channel configured, reply not sent");
            return DeliveryOutcome::Skipped;
        };

        let body = truncate_chars(text, WHATSAPP_MAX_MESSAGE_LENGTH);
        match tokio::time::timeout(self.timeout, channel.send_text(to, body)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(to, channel = channel.name(), error = %e, "Reply delivery failed");
                return DeliveryOutcome::Failed;
            }
            Err(_) => {
                warn!(to, channel = channel.name(), timeout = ?self.timeout, "Reply delivery timed out");
                return DeliveryOutcome::Failed;
            }
        }

        if let Some(conversation_id) = conversation_id
            && let Err(e) = self
                .db
                .append_message(&NewMessage::outbound(conversation_id, body))
                .await
        {
            error!(to, error = %e, "Reply sent but could not be logged");
        }
        info!(to, channel = channel.name(), "Reply sent");
        DeliveryOutcome::Sent
    }
}

/// Cut `text` to at most `max` characters on a char boundary.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::ChannelError;
    use crate::media::MediaBlob;
    use crate::store::{Direction, LibSqlBackend};

    /// Channel stub that records every send.
    #[derive(Default)]
    pub(crate) struct RecordingChannel {
        pub sent: Mutex<Vec<(String, String)>>,
        pub fail: bool,
    }

    impl RecordingChannel {
        pub fn bodies(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, b)| b.clone()).collect()
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError> {
            if self.fail {
                return Err(ChannelError::SendFailed {
                    name: "recording".into(),
                    reason: "HTTP 500".into(),
                });
            }
            self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
            Ok(())
        }

        async fn fetch_media(&self, media_id: &str) -> Result<MediaBlob, ChannelError> {
            Err(ChannelError::MediaFetchFailed {
                name: "recording".into(),
                media_id: media_id.into(),
                reason: "no media".into(),
            })
        }
    }

    struct HangingChannel;

    #[async_trait]
    impl Channel for HangingChannel {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn send_text(&self, _to: &str, _body: &str) -> Result<(), ChannelError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }

        async fn fetch_media(&self, media_id: &str) -> Result<MediaBlob, ChannelError> {
            Err(ChannelError::InvalidMessage(media_id.to_string()))
        }
    }

    async fn setup() -> (Arc<dyn Database>, Uuid) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let conv = db.ensure_conversation("254700000001").await.unwrap();
        (db, conv)
    }

    #[tokio::test]
    async fn sent_reply_is_logged() {
        let (db, conv) = setup().await;
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = OutboundDispatcher::new(Some(channel.clone()), db.clone(), Duration::from_secs(1));

        let outcome = dispatcher.dispatch(Some(conv), "254700000001", "Karibu!").await;
        assert_eq!(outcome, DeliveryOutcome::Sent);
        assert_eq!(channel.bodies(), vec!["Karibu!".to_string()]);

        let log = db.list_messages(conv).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].direction, Direction::Outbound);
        assert_eq!(log[0].body, "Karibu!");
    }

    #[tokio::test]
    async fn failed_send_not_logged() {
        let (db, conv) = setup().await;
        let channel = Arc::new(RecordingChannel {
            fail: true,
            ..Default::default()
        });
        let dispatcher = OutboundDispatcher::new(Some(channel), db.clone(), Duration::from_secs(1));

        assert_eq!(
            dispatcher.dispatch(Some(conv), "254700000001", "hello").await,
            DeliveryOutcome::Failed
        );
        assert!(db.list_messages(conv).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hung_send_times_out() {
        let (db, conv) = setup().await;
        let dispatcher =
            OutboundDispatcher::new(Some(Arc::new(HangingChannel)), db.clone(), Duration::from_millis(50));

        assert_eq!(
            dispatcher.dispatch(Some(conv), "254700000001", "hello").await,
            DeliveryOutcome::Failed
        );
        assert!(db.list_messages(conv).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_channel_skips() {
        let (db, conv) = setup().await;
        let dispatcher = OutboundDispatcher::new(None, db.clone(), Duration::from_secs(1));
        assert_eq!(
            dispatcher.dispatch(Some(conv), "254700000001", "hello").await,
            DeliveryOutcome::Skipped
        );
        assert!(db.list_messages(conv).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn long_reply_truncated() {
        let (db, conv) = setup().await;
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = OutboundDispatcher::new(Some(channel.clone()), db.clone(), Duration::from_secs(1));

        let long = "é".repeat(WHATSAPP_MAX_MESSAGE_LENGTH + 10);
        dispatcher.dispatch(Some(conv), "254700000001", &long).await;
        assert_eq!(channel.bodies()[0].chars().count(), WHATSAPP_MAX_MESSAGE_LENGTH);
    }

    #[test]
    fn truncate_on_char_boundary() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 5), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("مرحبا", 2), "مر");
    }
}
