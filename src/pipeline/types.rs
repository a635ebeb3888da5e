//! Shared types for the conversation pipeline.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ── Inbound event ───────────────────────────────────────────────────

/// One inbound chat message, already unwrapped from the provider envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// Provider message id, used for idempotency.
    pub provider_message_id: String,
    /// Sender phone number, digits only.
    pub sender: String,
    /// Display name from the provider contact card, if any.
    pub profile_name: Option<String>,
    pub kind: InboundKind,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundKind {
    Text { body: String },
    Audio { media_id: String },
    Image { media_id: String, caption: Option<String> },
}

impl InboundKind {
    /// Label stored in the message log.
    pub fn media_kind(&self) -> Option<&'static str> {
        match self {
            Self::Text { .. } => None,
            Self::Audio { .. } => Some("audio"),
            Self::Image { .. } => Some("image"),
        }
    }

    pub fn media_id(&self) -> Option<&str> {
        match self {
            Self::Text { .. } => None,
            Self::Audio { media_id } | Self::Image { media_id, .. } => Some(media_id),
        }
    }

    /// Text carried directly in the message (body or caption).
    pub fn inline_text(&self) -> Option<&str> {
        match self {
            Self::Text { body } => Some(body),
            Self::Image { caption, .. } => caption.as_deref(),
            Self::Audio { .. } => None,
        }
    }
}

// ── Intent ──────────────────────────────────────────────────────────

/// Fixed intent taxonomy for messages from onboarded users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    CreateRequest,
    TrackShipment,
    ContactSupport,
    GeneralInquiry,
    Onboarding,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateRequest => "create_request",
            Self::TrackShipment => "track_shipment",
            Self::ContactSupport => "contact_support",
            Self::GeneralInquiry => "general_inquiry",
            Self::Onboarding => "onboarding",
        }
    }

    /// Lenient label parsing for model output.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "create_request" | "rfq" | "buy_request" => Some(Self::CreateRequest),
            "track_shipment" | "tracking" => Some(Self::TrackShipment),
            "contact_support" | "support" => Some(Self::ContactSupport),
            "general_inquiry" | "general" => Some(Self::GeneralInquiry),
            "onboarding" => Some(Self::Onboarding),
            _ => None,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f32,
}

impl Classification {
    /// The fail-open result used whenever classification is unavailable.
    pub fn fallback() -> Self {
        Self {
            intent: Intent::GeneralInquiry,
            confidence: 0.0,
        }
    }
}

// ── Extracted fields ────────────────────────────────────────────────

/// Structured fields of a buying request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeFields {
    pub item: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub target_price: Option<Decimal>,
    pub currency: Option<String>,
}

impl TradeFields {
    /// Enough to publish: item, quantity and unit.
    pub fn is_complete(&self) -> bool {
        self.item.is_some() && self.quantity.is_some() && self.unit.is_some()
    }
}

/// A product extracted from a photo, awaiting the user's confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDraft {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Result of trade ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeOutcome {
    Published { reference: String },
    Draft { reference: String },
}

impl TradeOutcome {
    pub fn reference(&self) -> &str {
        match self {
            Self::Published { reference } | Self::Draft { reference } => reference,
        }
    }
}
