//! Inbound message pipeline.
//!
//! Every event from the webhook flows through [`ConversationHandler`]:
//! 1. receipt claim (duplicate deliveries stop here)
//! 2. session load, media transcoding
//! 3. one state step: onboarding, product confirmation, or intent routing
//! 4. conditional session write, then a single reply
//!
//! Classification and extraction fail open: a broken model never blocks
//! a reply. External calls share the event deadline, so a slow service
//! shortens the budget of the ones after it.

pub mod confirmation;
pub mod extractor;
pub mod handler;
pub mod intent;
pub mod trade;
pub mod types;

pub use handler::{ConversationHandler, EventOutcome, HandlerSettings};

use std::time::Duration;

use tokio::time::Instant;

use crate::error::LlmError;
use crate::llm::{CompletionRequest, CompletionResponse, LlmProvider};

/// When one external call gives up: after its own timeout, or at the event
/// deadline if that comes first.
pub fn call_expiry(timeout: Duration, deadline: Instant) -> Instant {
    deadline.min(Instant::now() + timeout)
}

/// One completion call bounded by [`call_expiry`].
pub(crate) async fn complete_bounded(
    llm: &dyn LlmProvider,
    request: CompletionRequest,
    timeout: Duration,
    deadline: Instant,
) -> Result<CompletionResponse, LlmError> {
    let expires = call_expiry(timeout, deadline);
    let allowed = expires.saturating_duration_since(Instant::now());
    tokio::time::timeout_at(expires, llm.complete(request))
        .await
        .map_err(|_| LlmError::Timeout {
            provider: llm.model_name().to_string(),
            timeout: allowed,
        })?
}
