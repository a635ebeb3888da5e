//! HTTP surface: the WhatsApp webhook and a health probe.
//!
//! Each POST is handled to completion inside the request: events in the
//! envelope run through the [`ConversationHandler`] one after another
//! before the provider gets its `200`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::channels::whatsapp::{parse_envelope, verify_signature, verify_token};
use crate::config::WhatsAppConfig;
use crate::pipeline::{ConversationHandler, EventOutcome};

const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Shared state for webhook handlers.
#[derive(Clone)]
pub struct WebhookState {
    pub handler: Arc<ConversationHandler>,
    pub verify_token: SecretString,
    /// Enables signature verification when set.
    pub app_secret: Option<SecretString>,
    /// Envelopes for other business numbers are ignored.
    pub phone_number_id: Option<String>,
}

impl WebhookState {
    pub fn new(handler: Arc<ConversationHandler>, config: &WhatsAppConfig) -> Self {
        Self {
            handler,
            verify_token: config.verify_token.clone(),
            app_secret: config.app_secret.clone(),
            phone_number_id: config.phone_number_id.clone(),
        }
    }
}

/// Build the router with webhook and health routes.
pub fn webhook_routes(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "trade-concierge"
    }))
}

// ── Verification handshake ──────────────────────────────────────────────

async fn verify_webhook(
    State(state): State<WebhookState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode = params.get("hub.mode").map(String::as_str).unwrap_or_default();
    let token = params.get("hub.verify_token").map(String::as_str).unwrap_or_default();
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    if mode == "subscribe"
        && !challenge.is_empty()
        && verify_token(state.verify_token.expose_secret(), token)
    {
        info!("Webhook verified");
        return (StatusCode::OK, challenge).into_response();
    }

    warn!(mode, "Webhook verification rejected");
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "error": "invalid webhook verification token" })),
    )
        .into_response()
}

// ── Delivery ────────────────────────────────────────────────────────────

async fn receive_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.app_secret {
        let header = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        if !verify_signature(secret.expose_secret(), header, &body) {
            warn!(bytes = body.len(), "Webhook signature rejected");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid webhook signature" })),
            )
                .into_response();
        }
    }

    let events = parse_envelope(&body, state.phone_number_id.as_deref());
    if events.is_empty() {
        debug!(bytes = body.len(), "Webhook payload carried no messages");
    }

    let mut replied = 0usize;
    let mut duplicates = 0usize;
    for event in &events {
        match state.handler.handle(event).await {
            EventOutcome::Replied { .. } => replied += 1,
            EventOutcome::Duplicate => duplicates += 1,
            EventOutcome::Superseded | EventOutcome::Failed => {}
        }
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "received": events.len(),
            "replied": replied,
            "duplicates": duplicates,
        })),
    )
        .into_response()
}
