use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use trade_concierge::channels::{Channel, WhatsAppChannel};
use trade_concierge::config::AppConfig;
use trade_concierge::llm::{LlmProvider, create_provider};
use trade_concierge::media::{SpeechToText, WhisperTranscriber};
use trade_concierge::pipeline::{ConversationHandler, HandlerSettings};
use trade_concierge::store::{Database, LibSqlBackend};
use trade_concierge::webhook::{WebhookState, webhook_routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = AppConfig::from_env().context("Invalid configuration")?;

    // Initialize tracing; the guard flushes the file writer on exit.
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "trade-concierge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_target(false).with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    eprintln!("📦 Trade Concierge v{}", env!("CARGO_PKG_VERSION"));

    for key in &config.missing {
        tracing::error!(key = %key, "Missing configuration, dependent feature disabled");
    }

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.database_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.database_path.display()))?,
    );
    eprintln!("   Database: {}", config.database_path.display());

    // ── Collaborators ────────────────────────────────────────────────────
    let channel = WhatsAppChannel::from_config(&config.whatsapp).map(|c| Arc::new(c) as Arc<dyn Channel>);
    let llm: Option<Arc<dyn LlmProvider>> = match config.llm.as_ref().map(create_provider) {
        Some(Ok(provider)) => Some(provider),
        Some(Err(e)) => {
            tracing::error!(error = %e, "LLM client unavailable, classification disabled");
            None
        }
        None => None,
    };
    let speech = config.speech.as_ref().map(|s| {
        Arc::new(WhisperTranscriber::new(s.api_key.clone(), s.base_url.clone(), s.model.clone()))
            as Arc<dyn SpeechToText>
    });

    eprintln!(
        "   WhatsApp sends: {}",
        if channel.is_some() { "enabled" } else { "disabled" }
    );
    eprintln!(
        "   LLM: {}",
        config.llm.as_ref().map(|l| l.model.as_str()).unwrap_or("disabled")
    );
    eprintln!(
        "   Speech: {}",
        config.speech.as_ref().map(|s| s.model.as_str()).unwrap_or("disabled")
    );

    let handler = Arc::new(ConversationHandler::new(
        db,
        channel,
        llm,
        speech,
        HandlerSettings {
            external_timeout: config.external_timeout,
            deadline: config.handler_deadline,
            default_language: config.default_language,
        },
    ));

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = webhook_routes(WebhookState::new(handler, &config.whatsapp));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    eprintln!("   Webhook: http://0.0.0.0:{}/webhook\n", config.port);
    tracing::info!(port = config.port, "Webhook server started");

    axum::serve(listener, app).await?;
    Ok(())
}
