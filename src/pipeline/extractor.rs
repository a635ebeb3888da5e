//! Structured field extraction for trade requests and product drafts.

use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, extract_json_object};
use crate::media::ProductHints;
use crate::pipeline::complete_bounded;

pub use crate::pipeline::types::{ProductDraft, TradeFields};

const EXTRACT_MAX_TOKENS: u32 = 300;

/// "50 tons", "1,200 kg", "3.5 MT". Quantity then unit.
static QUANTITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,3}(?:,\d{3})+|\d+(?:\.\d+)?)\s*(tons?|tonnes?|mt|kgs?|kilograms?|kilos?|bags?|sacks?|containers?|litres?|liters?|pieces?|pcs|units?|cartons?|crates?)\b",
    )
    .unwrap()
});

fn build_trade_prompt() -> String {
    "You extract buying requests from WhatsApp messages sent to a B2B trade marketplace. \
     Messages may be in English, French, Swahili or Arabic.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"item\": string|null, \"quantity\": number|null, \"unit\": string|null, \
     \"origin\": string|null, \"destination\": string|null, \"target_price\": number|null, \
     \"currency\": string|null}\n\n\
     Rules:\n\
     - item is the commodity in English, singular, lower case (e.g. \"maize\")\n\
     - unit is the unit as written (e.g. \"tons\", \"kg\", \"bags\")\n\
     - origin is where the goods should come from, destination where they go\n\
     - Use null for anything not stated. Never guess."
        .to_string()
}

fn build_product_prompt() -> String {
    "You turn a trader's short product description into a catalogue entry. \
     Respond with ONLY a JSON object: {\"name\": string|null, \"category\": string|null, \
     \"description\": string|null}. Use null when the text names no product."
        .to_string()
}

#[derive(Debug, Default, Deserialize)]
struct RawTradeFields {
    #[serde(default)]
    item: Option<String>,
    #[serde(default)]
    quantity: Option<Value>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    destination: Option<String>,
    #[serde(default)]
    target_price: Option<Value>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProduct {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

fn clean(text: Option<String>) -> Option<String> {
    text.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Numbers may arrive as JSON numbers or strings like "1,200".
fn decimal_from_value(value: Option<&Value>) -> Option<Decimal> {
    let text = match value? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.replace(',', "").trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
        .filter(|d| d.is_sign_positive() && !d.is_zero())
}

fn parse_trade_fields(raw: &str) -> Result<TradeFields, String> {
    let json = extract_json_object(raw);
    let fields: RawTradeFields =
        serde_json::from_str(&json).map_err(|e| format!("JSON parse error: {e}"))?;
    Ok(TradeFields {
        item: clean(fields.item),
        quantity: decimal_from_value(fields.quantity.as_ref()),
        unit: clean(fields.unit),
        origin: clean(fields.origin),
        destination: clean(fields.destination),
        target_price: decimal_from_value(fields.target_price.as_ref()),
        currency: clean(fields.currency).map(|c| c.to_uppercase()),
    })
}

/// Pattern-only scan used to keep whatever can be salvaged when the
/// extraction service is down. Finds quantity and unit, never the item.
pub fn scan_trade_fields(text: &str) -> TradeFields {
    let Some(caps) = QUANTITY_PATTERN.captures(text) else {
        return TradeFields::default();
    };
    let quantity = caps
        .get(1)
        .and_then(|m| Decimal::from_str(&m.as_str().replace(',', "")).ok());
    let unit = caps.get(2).map(|m| m.as_str().to_lowercase());
    TradeFields {
        quantity,
        unit,
        ..TradeFields::default()
    }
}

impl ProductDraft {
    /// Build a draft from vision hints, using the caption to fill gaps.
    /// Returns `None` when neither names a product.
    pub fn from_hints(hints: &ProductHints, caption: Option<&str>) -> Option<Self> {
        let caption = caption.map(str::trim).filter(|c| !c.is_empty());
        let name = clean(hints.name.clone()).or_else(|| caption.map(str::to_string))?;
        Some(Self {
            name,
            category: clean(hints.category.clone()),
            description: clean(hints.description.clone())
                .or_else(|| caption.map(str::to_string)),
        })
    }
}

pub struct FieldExtractor {
    llm: Option<Arc<dyn LlmProvider>>,
    timeout: Duration,
}

impl FieldExtractor {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    async fn complete_json(
        &self,
        system: String,
        user: &str,
        deadline: Instant,
    ) -> Result<String, PipelineError> {
        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| PipelineError::Extraction("no language model configured".into()))?;

        let request = CompletionRequest::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
            .with_temperature(0.0)
            .with_max_tokens(EXTRACT_MAX_TOKENS);

        let response = complete_bounded(llm.as_ref(), request, self.timeout, deadline).await?;
        Ok(response.content)
    }

    /// Extract buying-request fields from free text.
    pub async fn extract_trade(
        &self,
        text: &str,
        deadline: Instant,
    ) -> Result<TradeFields, PipelineError> {
        let content = self.complete_json(build_trade_prompt(), text, deadline).await?;
        let fields = parse_trade_fields(&content).map_err(|e| {
            warn!(raw_response = %content, "Unusable extraction output");
            PipelineError::Extraction(e)
        })?;
        debug!(
            item = ?fields.item,
            quantity = ?fields.quantity,
            unit = ?fields.unit,
            complete = fields.is_complete(),
            "Trade fields extracted"
        );
        Ok(fields)
    }

    /// Turn a photo's hints (and caption) into a product draft.
    ///
    /// Vision hints win. With an unnamed photo the caption goes through the
    /// extraction service; if that fails the caption itself becomes the name.
    pub async fn extract_product(
        &self,
        caption: Option<&str>,
        hints: &ProductHints,
        deadline: Instant,
    ) -> Option<ProductDraft> {
        if clean(hints.name.clone()).is_some() {
            return ProductDraft::from_hints(hints, caption);
        }
        let caption_text = caption.map(str::trim).filter(|c| !c.is_empty())?;

        let extracted = match self
            .complete_json(build_product_prompt(), caption_text, deadline)
            .await {
            Ok(content) => serde_json::from_str::<RawProduct>(&extract_json_object(&content))
                .map_err(|e| PipelineError::Extraction(e.to_string())),
            Err(e) => Err(e),
        };
        match extracted {
            Ok(product) => match clean(product.name) {
                Some(name) => Some(ProductDraft {
                    name,
                    category: clean(product.category).or_else(|| clean(hints.category.clone())),
                    description: clean(product.description)
                        .or_else(|| Some(caption_text.to_string())),
                }),
                None => ProductDraft::from_hints(hints, Some(caption_text)),
            },
            Err(e) => {
                warn!(error = %e, "Product extraction failed, using caption");
                ProductDraft::from_hints(hints, Some(caption_text))
            }
        }
    }
}
