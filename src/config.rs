//! Configuration types.
//!
//! Everything is read from environment variables at startup. Secrets are
//! held as [`SecretString`] and only exposed at the point of use.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::locale::Language;

const DEFAULT_WHATSAPP_API_BASE: &str = "https://graph.facebook.com/v21.0";
const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
const DEFAULT_SPEECH_MODEL: &str = "whisper-1";

/// WhatsApp Cloud API settings.
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    /// Token the provider echoes back during the verification handshake.
    pub verify_token: SecretString,
    /// Bearer token for the Graph API. `None` disables outbound sends.
    pub access_token: Option<SecretString>,
    /// Business phone number id. Also used to filter inbound envelopes.
    pub phone_number_id: Option<String>,
    /// App secret for `X-Hub-Signature-256` verification.
    pub app_secret: Option<SecretString>,
    pub api_base: String,
}

/// OpenAI-compatible chat completion settings (intent, extraction, vision).
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
}

/// Speech-to-text settings.
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub whatsapp: WhatsAppConfig,
    /// `None` when the key is missing and strict mode is off.
    pub llm: Option<LlmConfig>,
    pub speech: Option<SpeechConfig>,
    pub database_path: PathBuf,
    pub port: u16,
    /// Bound on every single external call.
    pub external_timeout: Duration,
    /// Bound on one whole inbound event.
    pub handler_deadline: Duration,
    pub default_language: Language,
    pub log_dir: Option<PathBuf>,
    pub strict: bool,
    /// Variables that were missing in non-strict mode, for startup logging.
    pub missing: Vec<String>,
}

impl AppConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let verify_token = get("WHATSAPP_VERIFY_TOKEN")
            .ok_or_else(|| ConfigError::MissingEnvVar("WHATSAPP_VERIFY_TOKEN".to_string()))?;
        let database_path = get("DATABASE_PATH")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_PATH".to_string()))?;

        let strict = match get("TRADE_STRICT_CONFIG") {
            Some(v) => parse_bool("TRADE_STRICT_CONFIG", &v)?,
            None => true,
        };

        let access_token = get("WHATSAPP_ACCESS_TOKEN");
        let phone_number_id = get("WHATSAPP_PHONE_NUMBER_ID");
        let llm_key = get("LLM_API_KEY");
        let speech_key = get("SPEECH_API_KEY").or_else(|| llm_key.clone());

        let mut missing = Vec::new();
        if access_token.is_none() {
            missing.push("WHATSAPP_ACCESS_TOKEN".to_string());
        }
        if phone_number_id.is_none() {
            missing.push("WHATSAPP_PHONE_NUMBER_ID".to_string());
        }
        if llm_key.is_none() {
            missing.push("LLM_API_KEY".to_string());
        }
        if speech_key.is_none() {
            missing.push("SPEECH_API_KEY".to_string());
        }
        if strict && !missing.is_empty() {
            return Err(ConfigError::MissingRequired { keys: missing });
        }

        let llm_base = get("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string());
        let llm = llm_key.map(|key| LlmConfig {
            api_key: SecretString::from(key),
            base_url: llm_base.clone(),
            model: get("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
        });
        let speech = speech_key.map(|key| SpeechConfig {
            api_key: SecretString::from(key),
            base_url: get("SPEECH_BASE_URL").unwrap_or_else(|| llm_base.clone()),
            model: get("SPEECH_MODEL").unwrap_or_else(|| DEFAULT_SPEECH_MODEL.to_string()),
        });

        let port = parse_or("TRADE_PORT", get("TRADE_PORT"), 8080u16)?;
        let external_secs = parse_or("TRADE_EXTERNAL_TIMEOUT_SECS", get("TRADE_EXTERNAL_TIMEOUT_SECS"), 15u64)?;
        let deadline_secs = parse_or("TRADE_HANDLER_DEADLINE_SECS", get("TRADE_HANDLER_DEADLINE_SECS"), 25u64)?;
        if external_secs == 0 || deadline_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TRADE_EXTERNAL_TIMEOUT_SECS".to_string(),
                message: "timeouts must be at least one second".to_string(),
            });
        }

        let default_language = match get("TRADE_DEFAULT_LANGUAGE") {
            Some(code) => Language::from_code(&code).ok_or_else(|| ConfigError::InvalidValue {
                key: "TRADE_DEFAULT_LANGUAGE".to_string(),
                message: format!("unsupported language '{code}'"),
            })?,
            None => Language::English,
        };

        Ok(Self {
            whatsapp: WhatsAppConfig {
                verify_token: SecretString::from(verify_token),
                access_token: access_token.map(SecretString::from),
                phone_number_id,
                app_secret: get("WHATSAPP_APP_SECRET").map(SecretString::from),
                api_base: get("WHATSAPP_API_BASE")
                    .unwrap_or_else(|| DEFAULT_WHATSAPP_API_BASE.to_string()),
            },
            llm,
            speech,
            database_path: PathBuf::from(database_path),
            port,
            external_timeout: Duration::from_secs(external_secs),
            handler_deadline: Duration::from_secs(deadline_secs),
            default_language,
            log_dir: get("TRADE_LOG_DIR").map(PathBuf::from),
            strict,
            missing,
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}
