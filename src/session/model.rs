//! Per-phone conversation session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::locale::Language;
use crate::onboarding::{OnboardingFields, OnboardingStep};
use crate::pipeline::types::ProductDraft;
use crate::store::{PendingRecord, SessionRecord};
use crate::templates::Reply;

/// Top-level flow a session is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Onboarding,
    ProductConfirmation,
    Idle,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Onboarding => "onboarding",
            Self::ProductConfirmation => "product_confirmation",
            Self::Idle => "idle",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onboarding" => Ok(Self::Onboarding),
            "product_confirmation" => Ok(Self::ProductConfirmation),
            "idle" => Ok(Self::Idle),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

/// The only step of the product-confirmation sub-flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStep {
    #[default]
    AwaitingConfirmation,
}

/// Mode plus the step and fields valid for that mode.
///
/// Serialized with a `mode` tag, so the stored blob carries its own shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FlowState {
    Onboarding {
        step: OnboardingStep,
        #[serde(default)]
        fields: OnboardingFields,
    },
    ProductConfirmation {
        #[serde(default)]
        step: ConfirmationStep,
        draft: ProductDraft,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_id: Option<String>,
    },
    Idle,
}

impl FlowState {
    pub fn mode(&self) -> Mode {
        match self {
            Self::Onboarding { .. } => Mode::Onboarding,
            Self::ProductConfirmation { .. } => Mode::ProductConfirmation,
            Self::Idle => Mode::Idle,
        }
    }

    /// Fresh onboarding at the first step.
    pub fn start_onboarding() -> Self {
        Self::Onboarding {
            step: OnboardingStep::AwaitingName,
            fields: OnboardingFields::default(),
        }
    }

    pub fn confirm_product(draft: ProductDraft, media_id: Option<String>) -> Self {
        Self::ProductConfirmation {
            step: ConfirmationStep::AwaitingConfirmation,
            draft,
            media_id,
        }
    }

    /// Human-readable step label for logs.
    pub fn step_label(&self) -> String {
        match self {
            Self::Onboarding { step, .. } => step.to_string(),
            Self::ProductConfirmation { .. } => "awaiting_confirmation".to_string(),
            Self::Idle => "idle".to_string(),
        }
    }

    /// Whether this state may be persisted. A completed onboarding is a
    /// transition, never a resting state: the session moves to `Idle`.
    fn check(&self) -> Result<(), String> {
        match self {
            Self::Onboarding { step, .. } if step.is_terminal() => {
                Err("onboarding cannot rest at the completed step".to_string())
            }
            Self::ProductConfirmation { draft, .. } if draft.name.trim().is_empty() => {
                Err("product confirmation without a product name".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// One session per phone number.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub phone: String,
    pub language: Language,
    pub state: FlowState,
    /// Bumped on every successful write; the optimistic-concurrency token.
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(phone: impl Into<String>, language: Language, state: FlowState) -> Self {
        let now = Utc::now();
        Self {
            phone: phone.into(),
            language,
            state,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mode(&self) -> Mode {
        self.state.mode()
    }

    /// Validate and convert a stored row.
    pub fn from_record(record: SessionRecord) -> Result<Self, DatabaseError> {
        let invalid = |reason: String| DatabaseError::InvalidState {
            phone: record.phone.clone(),
            reason,
        };

        let language = Language::from_code(&record.language)
            .ok_or_else(|| invalid(format!("unknown language '{}'", record.language)))?;
        let mode: Mode = record.mode.parse().map_err(invalid)?;
        let state: FlowState = serde_json::from_str(&record.state)
            .map_err(|e| invalid(format!("malformed state blob: {e}")))?;
        if state.mode() != mode {
            return Err(invalid(format!(
                "state blob is {} but mode column is {}",
                state.mode(),
                mode
            )));
        }
        state.check().map_err(invalid)?;

        Ok(Self {
            phone: record.phone,
            language,
            state,
            revision: record.revision,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    /// Convert to a row, rejecting states that must never be stored.
    pub fn to_record(&self) -> Result<SessionRecord, DatabaseError> {
        self.state.check().map_err(|reason| DatabaseError::InvalidState {
            phone: self.phone.clone(),
            reason,
        })?;
        let state = serde_json::to_string(&self.state)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        Ok(SessionRecord {
            phone: self.phone.clone(),
            language: self.language.code().to_string(),
            mode: self.mode().as_str().to_string(),
            state,
            revision: self.revision,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Result of one turn: the session to persist and the reply to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub session: Session,
    pub reply: Reply,
    /// Written in the same transaction as `session`.
    pub records: Vec<PendingRecord>,
    /// Taken instead when writing `records` fails.
    pub fallback: Option<Box<Transition>>,
}

impl Transition {
    pub fn new(session: Session, reply: Reply) -> Self {
        Self {
            session,
            reply,
            records: Vec::new(),
            fallback: None,
        }
    }

    pub fn with_record(mut self, record: PendingRecord) -> Self {
        self.records.push(record);
        self
    }

    pub fn or_else(mut self, fallback: Transition) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::Role;

    fn record(mode: &str, state: &str) -> SessionRecord {
        SessionRecord {
            phone: "254700000001".to_string(),
            language: "sw".to_string(),
            mode: mode.to_string(),
            state: state.to_string(),
            revision: 3,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn record_roundtrip() {
        let mut session = Session::new(
            "254700000001",
            Language::Swahili,
            FlowState::Onboarding {
                step: OnboardingStep::AwaitingCountry,
                fields: OnboardingFields {
                    full_name: Some("Wanjiru".into()),
                    role: Some(Role::Seller),
                    company_name: Some("Shamba Ltd".into()),
                    ..Default::default()
                },
            },
        );
        session.revision = 7;

        let restored = Session::from_record(session.to_record().unwrap()).unwrap();
        assert_eq!(restored, session);
        assert_eq!(restored.mode(), Mode::Onboarding);
    }

    #[test]
    fn idle_blob_shape() {
        let session = Session::new("1", Language::English, FlowState::Idle);
        let rec = session.to_record().unwrap();
        assert_eq!(rec.mode, "idle");
        assert_eq!(rec.state, r#"{"mode":"idle"}"#);
    }

    #[test]
    fn confirmation_roundtrip() {
        let state = FlowState::confirm_product(
            ProductDraft {
                name: "Avocados".into(),
                category: Some("fruit".into()),
                description: None,
            },
            Some("media-9".into()),
        );
        let session = Session::new("1", Language::French, state);
        let rec = session.to_record().unwrap();
        assert!(rec.state.contains("awaiting_confirmation"));
        let restored = Session::from_record(rec).unwrap();
        assert_eq!(restored.mode(), Mode::ProductConfirmation);
    }

    #[test]
    fn mismatched_mode_rejected() {
        let err = Session::from_record(record("idle", r#"{"mode":"onboarding","step":"awaiting_role"}"#))
            .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidState { .. }));
    }

    #[test]
    fn unknown_step_rejected() {
        let err = Session::from_record(record(
            "onboarding",
            r#"{"mode":"onboarding","step":"awaiting_shoe_size"}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidState { .. }));
    }

    #[test]
    fn completed_step_rejected_both_ways() {
        let err = Session::from_record(record(
            "onboarding",
            r#"{"mode":"onboarding","step":"completed"}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidState { .. }));

        let session = Session::new(
            "1",
            Language::English,
            FlowState::Onboarding {
                step: OnboardingStep::Completed,
                fields: OnboardingFields::default(),
            },
        );
        assert!(session.to_record().is_err());
    }

    #[test]
    fn bad_language_rejected() {
        let mut rec = record("idle", r#"{"mode":"idle"}"#);
        rec.language = "xx".to_string();
        assert!(Session::from_record(rec).is_err());
    }

    #[test]
    fn missing_fields_default() {
        let session = Session::from_record(record(
            "onboarding",
            r#"{"mode":"onboarding","step":"awaiting_role"}"#,
        ))
        .unwrap();
        match session.state {
            FlowState::Onboarding { step, fields } => {
                assert_eq!(step, OnboardingStep::AwaitingRole);
                assert_eq!(fields, OnboardingFields::default());
            }
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(session.revision, 3);
    }
}
