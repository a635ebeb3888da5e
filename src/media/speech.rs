//! Speech-to-text over an OpenAI-compatible `/audio/transcriptions` endpoint.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};

use crate::error::MediaError;
use crate::media::{MediaBlob, SpeechToText};

pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl WhisperTranscriber {
    pub fn new(api_key: SecretString, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url)
    }
}

/// File name hint so the service can sniff the container format.
fn file_name_for(mime_type: &str) -> &'static str {
    let base = mime_type.split(';').next().unwrap_or_default().trim();
    match base {
        "audio/ogg" | "audio/opus" => "voice.ogg",
        "audio/mpeg" | "audio/mp3" => "voice.mp3",
        "audio/mp4" | "audio/m4a" | "audio/aac" => "voice.m4a",
        "audio/amr" => "voice.amr",
        "audio/wav" | "audio/x-wav" => "voice.wav",
        "audio/webm" => "voice.webm",
        _ => "voice.ogg",
    }
}

#[async_trait]
impl SpeechToText for WhisperTranscriber {
    async fn transcribe(&self, audio: &MediaBlob) -> Result<String, MediaError> {
        let part = Part::bytes(audio.bytes.clone())
            .file_name(file_name_for(&audio.mime_type))
            .mime_str(&audio.mime_type)
            .map_err(|e| MediaError::Transcription(format!("invalid mime type: {e}")))?;

        let form = Form::new()
            .text("model", self.model.clone())
            .text("response_format", "json")
            .part("file", part);

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| MediaError::Transcription(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(MediaError::Transcription(format!("HTTP {status}: {err}")));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MediaError::Transcription(e.to_string()))?;

        json["text"]
            .as_str()
            .map(|t| t.trim().to_string())
            .ok_or_else(|| MediaError::Transcription("response has no text field".to_string()))
    }
}
