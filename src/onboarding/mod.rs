//! Onboarding: the fixed question sequence a new phone number walks through
//! before an account exists.
//!
//! Each inbound message answers the current question and moves exactly one
//! step forward. The last answer creates the profile and company.

pub mod manager;
pub mod model;
pub mod state;

pub use manager::{OnboardingManager, fields_from_account, prompt_for};
pub use model::{OnboardingFields, Role, classify_role};
pub use state::OnboardingStep;
