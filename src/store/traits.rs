//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::locale::Language;
use crate::onboarding::Role;
use crate::pipeline::types::{ProductDraft, TradeFields};

// ── Sessions ────────────────────────────────────────────────────────

/// A session row as stored. Validated into a `Session` by the session module.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub phone: String,
    pub language: String,
    pub mode: String,
    /// JSON state blob.
    pub state: String,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Message log ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub direction: Direction,
    pub body: String,
    pub media_id: Option<String>,
    pub media_kind: Option<String>,
    pub intent: Option<String>,
    pub provider_message_id: Option<String>,
}

impl NewMessage {
    pub fn outbound(conversation_id: Uuid, body: impl Into<String>) -> Self {
        Self {
            conversation_id,
            direction: Direction::Outbound,
            body: body.into(),
            media_id: None,
            media_kind: None,
            intent: None,
            provider_message_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub direction: Direction,
    pub body: String,
    pub media_id: Option<String>,
    pub media_kind: Option<String>,
    pub intent: Option<String>,
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Accounts ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub country: Option<String>,
}

/// Profile plus its company, if one exists.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub profile_id: Uuid,
    pub phone: String,
    pub full_name: String,
    pub role: Role,
    pub country: Option<String>,
    pub company: Option<Company>,
}

/// Inputs for the terminal onboarding transition.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub phone: String,
    pub full_name: String,
    pub role: Role,
    pub company_name: String,
    pub country: Option<String>,
    pub language: Language,
    /// Free-text product description; becomes a pending capability for sellers.
    pub products: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Capability {
    pub id: Uuid,
    pub company_id: Uuid,
    pub description: String,
    pub status: String,
}

// ── Trade requests ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStatus {
    Published,
    Draft,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Draft => "draft",
        }
    }
}

/// `RFQ-` plus the first 8 hex digits of the id, upper-cased.
pub fn trade_reference(id: &Uuid) -> String {
    let hex = id.simple().to_string();
    format!("RFQ-{}", hex[..8].to_uppercase())
}

/// A trade request to store. The id is chosen by the caller so the
/// reference can be quoted before the row is written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTradeRequest {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub company_id: Option<Uuid>,
    pub status: TradeStatus,
    pub fields: TradeFields,
    pub raw_text: String,
}

impl NewTradeRequest {
    pub fn reference(&self) -> String {
        trade_reference(&self.id)
    }
}

#[derive(Debug, Clone)]
pub struct TradeRequestRecord {
    pub id: Uuid,
    /// Human-readable `RFQ-XXXXXXXX`.
    pub reference: String,
    pub profile_id: Uuid,
    pub company_id: Option<Uuid>,
    pub status: TradeStatus,
    pub fields: TradeFields,
    pub raw_text: String,
    pub created_at: DateTime<Utc>,
}

// ── Products ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProductRecord {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub primary_media_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Turn commits ────────────────────────────────────────────────────

/// A record created by a conversation step, written together with the
/// session so it exists only if the step wins.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingRecord {
    Product {
        company_id: Uuid,
        draft: ProductDraft,
        media_id: Option<String>,
    },
    TradeRequest(NewTradeRequest),
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Sessions ────────────────────────────────────────────────────

    async fn get_session(&self, phone: &str) -> Result<Option<SessionRecord>, DatabaseError>;

    /// Insert a brand-new session. Returns `false` if one already exists.
    async fn insert_session(&self, session: &SessionRecord) -> Result<bool, DatabaseError>;

    /// Conditional write: applies only if the stored revision still equals
    /// `expected_revision`, and bumps it. Returns `false` on a lost race.
    async fn update_session(
        &self,
        session: &SessionRecord,
        expected_revision: i64,
    ) -> Result<bool, DatabaseError>;

    /// Conditional session write plus `pending`, in one transaction. The
    /// records are written only when the revision check passes; nothing is
    /// written on a lost race (`false`) or an error.
    async fn commit_turn(
        &self,
        session: &SessionRecord,
        expected_revision: i64,
        pending: &[PendingRecord],
    ) -> Result<bool, DatabaseError>;

    // ── Idempotency ─────────────────────────────────────────────────

    /// Claim a provider message id. Returns `false` if it was already seen.
    async fn claim_inbound(
        &self,
        provider_message_id: &str,
        phone: &str,
    ) -> Result<bool, DatabaseError>;

    // ── Conversations and messages ──────────────────────────────────

    /// Return the active conversation for `phone`, opening one if needed.
    async fn ensure_conversation(&self, phone: &str) -> Result<Uuid, DatabaseError>;

    async fn link_conversation_profile(
        &self,
        conversation_id: Uuid,
        profile_id: Uuid,
    ) -> Result<(), DatabaseError>;

    async fn append_message(&self, message: &NewMessage) -> Result<Uuid, DatabaseError>;

    /// Messages in a conversation, oldest first.
    async fn list_messages(&self, conversation_id: Uuid)
    -> Result<Vec<StoredMessage>, DatabaseError>;

    // ── Accounts ────────────────────────────────────────────────────

    async fn get_account_by_phone(&self, phone: &str) -> Result<Option<Account>, DatabaseError>;

    /// Create (or complete) the account for `phone`. Idempotent: converges on
    /// one profile, one company and at most one capability, all written in
    /// one transaction.
    async fn create_account(&self, account: &NewAccount) -> Result<Account, DatabaseError>;

    async fn list_capabilities(&self, company_id: Uuid) -> Result<Vec<Capability>, DatabaseError>;

    // ── Trade requests ──────────────────────────────────────────────

    async fn insert_trade_request(
        &self,
        request: &NewTradeRequest,
    ) -> Result<TradeRequestRecord, DatabaseError>;

    async fn list_trade_requests(
        &self,
        profile_id: Uuid,
    ) -> Result<Vec<TradeRequestRecord>, DatabaseError>;

    // ── Products ────────────────────────────────────────────────────

    /// Persist a confirmed product and, if given, its primary image, in one
    /// transaction.
    async fn create_product(
        &self,
        company_id: Uuid,
        draft: &ProductDraft,
        media_id: Option<&str>,
    ) -> Result<ProductRecord, DatabaseError>;

    async fn list_products(&self, company_id: Uuid) -> Result<Vec<ProductRecord>, DatabaseError>;
}
