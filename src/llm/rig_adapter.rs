//! Bridges rig's `CompletionModel` to our [`LlmProvider`] trait.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rig::OneOrMany;
use rig::completion::{AssistantContent, CompletionModel};
use rig::message::{ImageDetail, ImageMediaType, Message, UserContent};

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role};

pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider: "openai",
        }
    }
}

/// A request reshaped for rig: system text becomes the preamble, the last
/// message is the prompt and everything before it is history.
#[derive(Debug)]
struct RigRequest {
    preamble: Option<String>,
    history: Vec<Message>,
    prompt: Message,
}

fn split_request(provider: &str, messages: &[ChatMessage]) -> Result<RigRequest, LlmError> {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let preamble = (!system.is_empty()).then(|| system.join("\n\n"));

    let mut turns = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| to_rig_message(provider, m))
        .collect::<Result<Vec<_>, _>>()?;
    let prompt = turns.pop().ok_or_else(|| LlmError::RequestFailed {
        provider: provider.to_string(),
        reason: "request has no user message".to_string(),
    })?;

    Ok(RigRequest {
        preamble,
        history: turns,
        prompt,
    })
}

fn to_rig_message(provider: &str, message: &ChatMessage) -> Result<Message, LlmError> {
    match (message.role, &message.image) {
        (Role::Assistant, _) => Ok(Message::assistant(message.content.clone())),
        (_, None) => Ok(Message::user(message.content.clone())),
        (_, Some(image)) => {
            let parts = vec![
                UserContent::text(message.content.clone()),
                UserContent::image_base64(
                    BASE64.encode(&image.data),
                    Some(image_media_type(&image.mime_type)),
                    Some(ImageDetail::Auto),
                ),
            ];
            let content = OneOrMany::many(parts).map_err(|e| LlmError::RequestFailed {
                provider: provider.to_string(),
                reason: e.to_string(),
            })?;
            Ok(Message::User { content })
        }
    }
}

fn image_media_type(mime_type: &str) -> ImageMediaType {
    match mime_type.split(';').next().unwrap_or_default().trim() {
        "image/png" => ImageMediaType::PNG,
        "image/webp" => ImageMediaType::WEBP,
        "image/gif" => ImageMediaType::GIF,
        _ => ImageMediaType::JPEG,
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let RigRequest {
            preamble,
            history,
            prompt,
        } = split_request(self.provider, &request.messages)?;

        let mut builder = self.model.completion_request(prompt).messages(history);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.provider.to_string(),
            reason: e.to_string(),
        })?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect();
        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: "no text in completion".to_string(),
            });
        }

        Ok(CompletionResponse {
            content,
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        })
    }
}
