//! Trade ingestion: publish a complete buying request, or keep it as a draft.
//!
//! A request is never dropped. Extraction failures and incomplete fields end
//! in a draft carrying the raw text. Ingestion only plans the rows; they are
//! written together with the session step, and a failed publish falls back
//! to the draft attempt.

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::pipeline::extractor::scan_trade_fields;
use crate::pipeline::types::{TradeFields, TradeOutcome};
use crate::store::{Account, NewTradeRequest, TradeStatus};

/// One way of storing the request, with the outcome to report if it sticks.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeAttempt {
    pub outcome: TradeOutcome,
    pub request: NewTradeRequest,
}

impl TradeAttempt {
    fn new(account: &Account, raw_text: &str, status: TradeStatus, fields: TradeFields) -> Self {
        let request = NewTradeRequest {
            id: Uuid::new_v4(),
            profile_id: account.profile_id,
            company_id: account.company.as_ref().map(|c| c.id),
            status,
            fields,
            raw_text: raw_text.to_string(),
        };
        let reference = request.reference();
        let outcome = match status {
            TradeStatus::Published => TradeOutcome::Published { reference },
            TradeStatus::Draft => TradeOutcome::Draft { reference },
        };
        Self { outcome, request }
    }
}

/// Plan the storage of `raw_text` for `account`, best attempt first. The
/// last attempt is always a draft.
///
/// `extracted` is the field extractor's result; on error the raw text is
/// scanned for whatever quantity and unit it carries.
pub fn ingest(
    account: &Account,
    raw_text: &str,
    extracted: Result<TradeFields, PipelineError>,
) -> Vec<TradeAttempt> {
    match extracted {
        Ok(fields) if fields.is_complete() => {
            info!(phone = %account.phone, item = ?fields.item, "Trade request ready to publish");
            vec![
                TradeAttempt::new(account, raw_text, TradeStatus::Published, fields.clone()),
                TradeAttempt::new(account, raw_text, TradeStatus::Draft, fields),
            ]
        }
        Ok(fields) => {
            info!(phone = %account.phone, "Trade request incomplete, saving as draft");
            vec![TradeAttempt::new(account, raw_text, TradeStatus::Draft, fields)]
        }
        Err(e) => {
            warn!(phone = %account.phone, error = %e, "Extraction failed, saving as draft");
            let fields = scan_trade_fields(raw_text);
            vec![TradeAttempt::new(account, raw_text, TradeStatus::Draft, fields)]
        }
    }
}
