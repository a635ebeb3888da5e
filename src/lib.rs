//! Trade Concierge: WhatsApp front door for a B2B trade marketplace.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod locale;
pub mod media;
pub mod onboarding;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod templates;
pub mod webhook;
