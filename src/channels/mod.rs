//! Messaging channel abstraction.
//!
//! A channel delivers plain-text replies to a phone number and serves the
//! bytes behind inbound media references. Inbound parsing is channel
//! specific and lives next to each implementation.

pub mod dispatch;
pub mod whatsapp;

pub use dispatch::{DeliveryOutcome, OutboundDispatcher};
pub use whatsapp::WhatsAppChannel;

pub use crate::pipeline::types::{InboundEvent, InboundKind};

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::media::MediaBlob;

/// Outbound side of a messaging provider.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name for logs and errors.
    fn name(&self) -> &str;

    /// Send one plain-text message. No retries.
    async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError>;

    /// Download the media behind a provider media id.
    async fn fetch_media(&self, media_id: &str) -> Result<MediaBlob, ChannelError>;
}

/// Keep only the digits of a phone number. Returns `None` when nothing is left.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() { None } else { Some(digits) }
}
