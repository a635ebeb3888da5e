//! Intent classification for messages from onboarded users.
//!
//! One LLM call returning the single best label. Any failure (no provider,
//! timeout, service error, unparseable output, unknown label) fails open to
//! `general_inquiry`.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, extract_json_object};
use crate::pipeline::complete_bounded;

pub use crate::pipeline::types::{Classification, Intent};

/// Max tokens for the classification call.
const CLASSIFY_MAX_TOKENS: u32 = 100;

const CLASSIFY_TEMPERATURE: f32 = 0.0;

fn build_system_prompt() -> String {
    "You classify WhatsApp messages sent to a B2B trade marketplace by registered traders. \
     Messages may be in English, French, Swahili or Arabic.\n\n\
     Intents:\n\
     - \"create_request\": the sender wants to buy or source goods (quantities, items, origins).\n\
     - \"track_shipment\": the sender asks where an order or shipment is.\n\
     - \"contact_support\": the sender wants a human, has a complaint or a problem.\n\
     - \"onboarding\": the sender asks how to register or update their profile.\n\
     - \"general_inquiry\": anything else.\n\n\
     Respond with ONLY a JSON object: {\"intent\": \"...\", \"confidence\": 0.0}"
        .to_string()
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    intent: String,
    #[serde(default)]
    confidence: f32,
}

fn parse_classification(raw: &str) -> Result<Classification, String> {
    let json = extract_json_object(raw);
    let response: ClassifyResponse =
        serde_json::from_str(&json).map_err(|e| format!("JSON parse error: {e}"))?;
    let intent = Intent::from_label(&response.intent)
        .ok_or_else(|| format!("unknown intent label '{}'", response.intent))?;
    Ok(Classification {
        intent,
        confidence: if response.confidence.is_finite() {
            response.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        },
    })
}

pub struct IntentClassifier {
    llm: Option<Arc<dyn LlmProvider>>,
    timeout: Duration,
}

impl IntentClassifier {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Classify `text`, giving up at `deadline`. Never fails.
    pub async fn classify(&self, text: &str, deadline: Instant) -> Classification {
        match self.try_classify(text, deadline).await {
            Ok(classification) => {
                debug!(
                    intent = %classification.intent,
                    confidence = classification.confidence,
                    "Message classified"
                );
                classification
            }
            Err(e) => {
                warn!(error = %e, "Intent classification failed, treating as general inquiry");
                Classification::fallback()
            }
        }
    }

    async fn try_classify(&self, text: &str, deadline: Instant) -> Result<Classification, PipelineError> {
        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| PipelineError::Classification("no language model configured".into()))?;

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt()),
            ChatMessage::user(text),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = complete_bounded(llm.as_ref(), request, self.timeout, deadline).await?;

        parse_classification(&response.content).map_err(|e| {
            warn!(raw_response = %response.content, "Unusable classification output");
            PipelineError::Classification(e)
        })
    }
}
