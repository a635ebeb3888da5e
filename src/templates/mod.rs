//! Localized reply templates.
//!
//! Every outbound message is a [`Reply`]: a logical [`MessageKey`] plus a
//! parameter object. [`TemplateEngine::render`] turns it into text for a
//! given language and always produces something, falling back to English
//! and finally to the bare key.

mod catalog;

use minijinja::Environment;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::locale::Language;

/// Logical message identifiers, independent of language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKey {
    WelcomeAskName,
    AskRole,
    AskCompany,
    AskCountry,
    AskProducts,
    OnboardingComplete,
    SetupFailed,
    VoiceNotUnderstood,
    ProductConfirm,
    ProductSaved,
    ProductDiscarded,
    ConfirmYesNo,
    RequestPublished,
    RequestDrafted,
    TrackingLookup,
    Help,
}

impl MessageKey {
    pub const ALL: [MessageKey; 16] = [
        Self::WelcomeAskName,
        Self::AskRole,
        Self::AskCompany,
        Self::AskCountry,
        Self::AskProducts,
        Self::OnboardingComplete,
        Self::SetupFailed,
        Self::VoiceNotUnderstood,
        Self::ProductConfirm,
        Self::ProductSaved,
        Self::ProductDiscarded,
        Self::ConfirmYesNo,
        Self::RequestPublished,
        Self::RequestDrafted,
        Self::TrackingLookup,
        Self::Help,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WelcomeAskName => "welcome_ask_name",
            Self::AskRole => "ask_role",
            Self::AskCompany => "ask_company",
            Self::AskCountry => "ask_country",
            Self::AskProducts => "ask_products",
            Self::OnboardingComplete => "onboarding_complete",
            Self::SetupFailed => "setup_failed",
            Self::VoiceNotUnderstood => "voice_not_understood",
            Self::ProductConfirm => "product_confirm",
            Self::ProductSaved => "product_saved",
            Self::ProductDiscarded => "product_discarded",
            Self::ConfirmYesNo => "confirm_yes_no",
            Self::RequestPublished => "request_published",
            Self::RequestDrafted => "request_drafted",
            Self::TrackingLookup => "tracking_lookup",
            Self::Help => "help",
        }
    }
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An outbound message before rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub key: MessageKey,
    pub params: Map<String, Value>,
}

impl Reply {
    pub fn new(key: MessageKey) -> Self {
        Self {
            key,
            params: Map::new(),
        }
    }

    /// Attach a template parameter. `None`-like values are simply omitted.
    pub fn with(mut self, name: &str, value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(Value::Null) | Err(_) => {}
            Ok(v) => {
                self.params.insert(name.to_string(), v);
            }
        }
        self
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }
}

/// Renders [`Reply`] values from the built-in catalog.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        for &(name, source) in catalog::TEMPLATES {
            if let Err(e) = env.add_template(name, source) {
                tracing::warn!(template = %name, error = %e, "Skipping invalid template");
            }
        }
        Self { env }
    }

    /// Render a reply in `language`.
    pub fn render(&self, language: Language, reply: &Reply) -> String {
        if let Some(text) = self.try_render(language, reply) {
            return text;
        }
        if language != Language::English {
            tracing::warn!(key = %reply.key, language = %language, "Template unavailable, using English");
            if let Some(text) = self.try_render(Language::English, reply) {
                return text;
            }
        }
        tracing::warn!(key = %reply.key, "English template unavailable, sending key");
        reply.key.as_str().to_string()
    }

    fn try_render(&self, language: Language, reply: &Reply) -> Option<String> {
        let name = format!("{}.{}", language.code(), reply.key.as_str());
        let template = self.env.get_template(&name).ok()?;
        match template.render(&reply.params) {
            Ok(text) => {
                let text = text.trim().to_string();
                if text.is_empty() { None } else { Some(text) }
            }
            Err(e) => {
                tracing::warn!(template = %name, error = %e, "Template render failed");
                None
            }
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}
