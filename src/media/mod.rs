//! Media transcoding: voice notes to text, product photos to structured hints.
//!
//! Every external call (media download, speech-to-text, vision) is bounded
//! by the configured timeout and by the caller's event deadline. Failures
//! surface as [`MediaError`]; callers pick the fallback.

pub mod speech;

pub use speech::WhisperTranscriber;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

use crate::channels::Channel;
use crate::error::MediaError;
use crate::llm::{ChatMessage, CompletionRequest, ImageInput, LlmProvider, extract_json_object};
use crate::pipeline::call_expiry;

/// Downloaded media bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Speech-to-text backend.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &MediaBlob) -> Result<String, MediaError>;
}

/// What the vision model saw in a photo.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProductHints {
    #[serde(default)]
    pub is_product: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// One-line description suitable for storing as an onboarding answer.
    #[serde(default)]
    pub summary: Option<String>,
}

impl ProductHints {
    /// Best single-line text for the photo.
    pub fn summary_text(&self) -> Option<String> {
        let non_empty = |s: &Option<String>| s.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        non_empty(&self.summary).or_else(|| match (non_empty(&self.name), non_empty(&self.description)) {
            (Some(name), Some(desc)) => Some(format!("{name}: {desc}")),
            (Some(name), None) => Some(name),
            (None, desc) => desc,
        })
    }
}

const VISION_SYSTEM_PROMPT: &str = "You look at photos sent by traders on a B2B agricultural and \
commodity marketplace. Decide whether the photo shows a product that could be listed for sale. \
Respond with ONLY a JSON object: {\"is_product\": bool, \"name\": string|null, \"category\": \
string|null, \"description\": string|null, \"summary\": string|null}. The summary is one short \
sentence describing what is shown.";

const VISION_MAX_TOKENS: u32 = 300;

/// Converts inbound media into text the state machine can consume.
pub struct MediaTranscoder {
    channel: Option<Arc<dyn Channel>>,
    speech: Option<Arc<dyn SpeechToText>>,
    vision: Option<Arc<dyn LlmProvider>>,
    timeout: Duration,
}

impl MediaTranscoder {
    pub fn new(
        channel: Option<Arc<dyn Channel>>,
        speech: Option<Arc<dyn SpeechToText>>,
        vision: Option<Arc<dyn LlmProvider>>,
        timeout: Duration,
    ) -> Self {
        Self {
            channel,
            speech,
            vision,
            timeout,
        }
    }

    async fn fetch(&self, media_id: &str, deadline: Instant) -> Result<MediaBlob, MediaError> {
        let channel = self.channel.as_ref().ok_or(MediaError::Unavailable("media download"))?;
        bounded("media download", self.timeout, deadline, async {
            channel.fetch_media(media_id).await.map_err(MediaError::from)
        })
        .await
    }

    /// Download a voice note and transcribe it. An empty transcript is an error.
    pub async fn transcribe_voice(
        &self,
        media_id: &str,
        deadline: Instant,
    ) -> Result<String, MediaError> {
        let speech = self.speech.as_ref().ok_or(MediaError::Unavailable("speech-to-text"))?;
        let blob = self.fetch(media_id, deadline).await?;
        let text = bounded("speech-to-text", self.timeout, deadline, speech.transcribe(&blob)).await?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(MediaError::Transcription("empty transcript".to_string()));
        }
        debug!(media_id, chars = text.len(), "Voice note transcribed");
        Ok(text)
    }

    /// Download a photo and ask the vision model what it shows.
    pub async fn describe_image(
        &self,
        media_id: &str,
        caption: Option<&str>,
        deadline: Instant,
    ) -> Result<ProductHints, MediaError> {
        let vision = self.vision.as_ref().ok_or(MediaError::Unavailable("vision"))?;
        let blob = self.fetch(media_id, deadline).await?;

        let user_text = match caption.map(str::trim).filter(|c| !c.is_empty()) {
            Some(caption) => format!("Caption from the sender: {caption}"),
            None => "The sender did not add a caption.".to_string(),
        };
        let request = CompletionRequest::new(vec![
            ChatMessage::system(VISION_SYSTEM_PROMPT),
            ChatMessage::user_with_image(
                user_text,
                ImageInput {
                    mime_type: blob.mime_type,
                    data: blob.bytes,
                },
            ),
        ])
        .with_temperature(0.0)
        .with_max_tokens(VISION_MAX_TOKENS);

        let response = bounded("vision", self.timeout, deadline, async {
            vision
                .complete(request)
                .await
                .map_err(|e| MediaError::Vision(e.to_string()))
        })
        .await?;

        parse_hints(&response.content)
    }
}

fn parse_hints(content: &str) -> Result<ProductHints, MediaError> {
    let json = extract_json_object(content);
    serde_json::from_str(&json).map_err(|e| MediaError::Vision(format!("unparseable output: {e}")))
}

/// Run `fut` until its own timeout or the deadline, mapping expiry to
/// [`MediaError::Timeout`].
async fn bounded<T, F>(
    service: &'static str,
    timeout: Duration,
    deadline: Instant,
    fut: F,
) -> Result<T, MediaError>
where
    F: Future<Output = Result<T, MediaError>>,
{
    let expires = call_expiry(timeout, deadline);
    let allowed = expires.saturating_duration_since(Instant::now());
    tokio::time::timeout_at(expires, fut)
        .await
        .map_err(|_| MediaError::Timeout {
            service,
            timeout: allowed,
        })?
}
