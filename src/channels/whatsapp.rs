//! WhatsApp Cloud API channel.
//!
//! Sends plain-text messages through the Graph API, downloads inbound media
//! in two hops (metadata, then the signed URL) and unwraps webhook envelopes
//! into [`InboundEvent`]s.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use crate::channels::{Channel, InboundEvent, InboundKind, normalize_phone};
use crate::config::WhatsAppConfig;
use crate::error::ChannelError;
use crate::media::MediaBlob;

const CHANNEL_NAME: &str = "whatsapp";

/// Maximum body length of a WhatsApp text message.
pub const WHATSAPP_MAX_MESSAGE_LENGTH: usize = 4096;

pub struct WhatsAppChannel {
    client: reqwest::Client,
    access_token: SecretString,
    phone_number_id: String,
    api_base: String,
}

impl WhatsAppChannel {
    pub fn new(
        access_token: SecretString,
        phone_number_id: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token,
            phone_number_id: phone_number_id.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build the channel if the send credentials are configured.
    pub fn from_config(config: &WhatsAppConfig) -> Option<Self> {
        let token = config.access_token.clone()?;
        let phone_number_id = config.phone_number_id.clone()?;
        Some(Self::new(token, phone_number_id, config.api_base.clone()))
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{path}", self.api_base)
    }

    fn send_failed(reason: impl Into<String>) -> ChannelError {
        ChannelError::SendFailed {
            name: CHANNEL_NAME.into(),
            reason: reason.into(),
        }
    }

    fn fetch_failed(media_id: &str, reason: impl Into<String>) -> ChannelError {
        ChannelError::MediaFetchFailed {
            name: CHANNEL_NAME.into(),
            media_id: media_id.into(),
            reason: reason.into(),
        }
    }
}

/// JSON body for a plain-text send.
fn text_message_body(to: &str, body: &str) -> serde_json::Value {
    serde_json::json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "text",
        "text": { "preview_url": false, "body": body },
    })
}

#[derive(Debug, Deserialize)]
struct MediaMetadata {
    url: String,
    #[serde(default)]
    mime_type: Option<String>,
}

#[async_trait]
impl Channel for WhatsAppChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError> {
        let url = self.api_url(&format!("{}/messages", self.phone_number_id));
        let resp = self
            .client
            .post(url)
            .bearer_auth(self.access_token.expose_secret())
            .json(&text_message_body(to, body))
            .send()
            .await
            .map_err(|e| Self::send_failed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(Self::send_failed(format!("HTTP {status}: {err}")));
        }

        debug!(to, chars = body.chars().count(), "WhatsApp message sent");
        Ok(())
    }

    async fn fetch_media(&self, media_id: &str) -> Result<MediaBlob, ChannelError> {
        let meta_resp = self
            .client
            .get(self.api_url(media_id))
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| Self::fetch_failed(media_id, e.to_string()))?;

        if !meta_resp.status().is_success() {
            let status = meta_resp.status();
            return Err(Self::fetch_failed(media_id, format!("metadata HTTP {status}")));
        }

        let meta: MediaMetadata = meta_resp
            .json()
            .await
            .map_err(|e| Self::fetch_failed(media_id, format!("metadata: {e}")))?;

        let media_resp = self
            .client
            .get(&meta.url)
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| Self::fetch_failed(media_id, e.to_string()))?;

        if !media_resp.status().is_success() {
            let status = media_resp.status();
            return Err(Self::fetch_failed(media_id, format!("download HTTP {status}")));
        }

        let mime_type = media_resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or(meta.mime_type)
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let bytes = media_resp
            .bytes()
            .await
            .map_err(|e| Self::fetch_failed(media_id, e.to_string()))?;

        debug!(media_id, bytes = bytes.len(), %mime_type, "WhatsApp media downloaded");
        Ok(MediaBlob {
            bytes: bytes.to_vec(),
            mime_type,
        })
    }
}

// ── Webhook signature ───────────────────────────────────────────────

/// Check an `X-Hub-Signature-256: sha256=<hex>` header against the raw body.
pub fn verify_signature(app_secret: &str, signature_header: Option<&str>, body: &[u8]) -> bool {
    let Some(header) = signature_header else {
        return false;
    };
    let hex_sig = header.trim().strip_prefix("sha256=").unwrap_or(header.trim());
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Check the `hub.verify_token` of a subscription handshake.
///
/// Both tokens are reduced to fixed-length HMAC tags and compared with
/// `verify_slice`, so neither length nor content leaks through timing.
pub fn verify_token(expected: &str, provided: &str) -> bool {
    const LABEL: &[u8] = b"hub.verify_token";
    if expected.is_empty() {
        return false;
    }
    let (Ok(mut ours), Ok(mut theirs)) = (
        Hmac::<Sha256>::new_from_slice(LABEL),
        Hmac::<Sha256>::new_from_slice(LABEL),
    ) else {
        return false;
    };
    theirs.update(provided.as_bytes());
    let tag = theirs.finalize().into_bytes();
    ours.update(expected.as_bytes());
    ours.verify_slice(&tag).is_ok()
}

// ── Envelope parsing ────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Default, Deserialize)]
struct Change {
    #[serde(default)]
    value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    metadata: Option<Metadata>,
    #[serde(default)]
    contacts: Vec<Contact>,
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    phone_number_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Contact {
    #[serde(default)]
    wa_id: Option<String>,
    #[serde(default)]
    profile: Option<ContactProfile>,
}

#[derive(Debug, Default, Deserialize)]
struct ContactProfile {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    #[serde(default)]
    from: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<RawText>,
    #[serde(default)]
    audio: Option<RawMedia>,
    #[serde(default)]
    voice: Option<RawMedia>,
    #[serde(default)]
    image: Option<RawMedia>,
}

#[derive(Debug, Default, Deserialize)]
struct RawText {
    #[serde(default)]
    body: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawMedia {
    #[serde(default)]
    id: String,
    #[serde(default)]
    caption: Option<String>,
}

impl RawMessage {
    fn inbound_kind(&self) -> Option<InboundKind> {
        match self.kind.as_str() {
            "text" => {
                let body = self.text.as_ref()?.body.clone();
                Some(InboundKind::Text { body })
            }
            "audio" | "voice" => {
                let media = self.audio.as_ref().or(self.voice.as_ref())?;
                (!media.id.is_empty()).then(|| InboundKind::Audio {
                    media_id: media.id.clone(),
                })
            }
            "image" => {
                let media = self.image.as_ref()?;
                (!media.id.is_empty()).then(|| InboundKind::Image {
                    media_id: media.id.clone(),
                    caption: media
                        .caption
                        .as_deref()
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(str::to_string),
                })
            }
            _ => None,
        }
    }

    fn received_at(&self) -> DateTime<Utc> {
        self.timestamp
            .as_deref()
            .and_then(|t| t.trim().parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now)
    }
}

/// Unwrap a webhook body into inbound events.
///
/// Unknown message types, status callbacks, messages for another business
/// number and unparseable bodies all yield nothing.
pub fn parse_envelope(body: &[u8], expected_phone_number_id: Option<&str>) -> Vec<InboundEvent> {
    let envelope: Envelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable webhook body");
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    for change in envelope.entry.into_iter().flat_map(|e| e.changes) {
        let value = change.value;
        let target = value
            .metadata
            .as_ref()
            .and_then(|m| m.phone_number_id.as_deref())
            .unwrap_or_default();
        if let Some(expected) = expected_phone_number_id
            && !target.is_empty()
            && target != expected
        {
            debug!(phone_number_id = target, "Skipping change for another phone number id");
            continue;
        }

        for message in &value.messages {
            let Some(sender) = normalize_phone(&message.from) else {
                continue;
            };
            if message.id.is_empty() {
                continue;
            }
            let Some(kind) = message.inbound_kind() else {
                debug!(kind = %message.kind, id = %message.id, "Skipping unsupported message type");
                continue;
            };
            let profile_name = value
                .contacts
                .iter()
                .find(|c| c.wa_id.as_deref().and_then(normalize_phone).as_deref() == Some(sender.as_str()))
                .and_then(|c| c.profile.as_ref())
                .and_then(|p| p.name.as_deref())
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string);

            events.push(InboundEvent {
                provider_message_id: message.id.clone(),
                sender,
                profile_name,
                kind,
                received_at: message.received_at(),
            });
        }
    }
    events
}
