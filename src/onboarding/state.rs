//! Onboarding state machine: which question the user is answering.

use serde::{Deserialize, Serialize};

use crate::templates::MessageKey;

/// The steps of the onboarding conversation.
///
/// Progresses linearly: AwaitingName → AwaitingRole → AwaitingCompany →
/// AwaitingCountry → AwaitingProducts → Completed. Each inbound message
/// answers the current step's question and advances exactly one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    #[default]
    AwaitingName,
    AwaitingRole,
    AwaitingCompany,
    AwaitingCountry,
    AwaitingProducts,
    Completed,
}

impl OnboardingStep {
    pub const ALL: [OnboardingStep; 6] = [
        Self::AwaitingName,
        Self::AwaitingRole,
        Self::AwaitingCompany,
        Self::AwaitingCountry,
        Self::AwaitingProducts,
        Self::Completed,
    ];

    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: OnboardingStep) -> bool {
        self.next() == Some(target)
    }

    /// Whether onboarding is done.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Get the next step in the linear progression, if any.
    pub fn next(&self) -> Option<OnboardingStep> {
        use OnboardingStep::*;
        match self {
            AwaitingName => Some(AwaitingRole),
            AwaitingRole => Some(AwaitingCompany),
            AwaitingCompany => Some(AwaitingCountry),
            AwaitingCountry => Some(AwaitingProducts),
            AwaitingProducts => Some(Completed),
            Completed => None,
        }
    }

    /// The question asked while waiting in this step.
    pub fn prompt_key(&self) -> MessageKey {
        match self {
            Self::AwaitingName => MessageKey::WelcomeAskName,
            Self::AwaitingRole => MessageKey::AskRole,
            Self::AwaitingCompany => MessageKey::AskCompany,
            Self::AwaitingCountry => MessageKey::AskCountry,
            Self::AwaitingProducts => MessageKey::AskProducts,
            Self::Completed => MessageKey::OnboardingComplete,
        }
    }
}

impl std::fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AwaitingName => "awaiting_name",
            Self::AwaitingRole => "awaiting_role",
            Self::AwaitingCompany => "awaiting_company",
            Self::AwaitingCountry => "awaiting_country",
            Self::AwaitingProducts => "awaiting_products",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}
