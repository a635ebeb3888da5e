//! Product-confirmation sub-flow.
//!
//! A photo recognised as a product parks the session in
//! `AwaitingConfirmation` with the draft. YES saves the product, NO drops
//! it, anything else re-asks without touching the draft. The product row is
//! written together with the session step.

use tracing::{info, warn};

use crate::pipeline::types::ProductDraft;
use crate::session::{FlowState, Session, Transition};
use crate::store::{Account, PendingRecord};
use crate::templates::{MessageKey, Reply};

const YES_TOKENS: &[&str] = &[
    "yes", "y", "yeah", "yep", "ok", "okay", "confirm", "save", "oui", "ndiyo", "ndio", "sawa",
    "نعم", "ايوه", "موافق",
];

const NO_TOKENS: &[&str] = &[
    "no", "n", "nope", "edit", "cancel", "discard", "non", "hapana", "لا",
];

/// How a confirmation answer was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationAnswer {
    Yes,
    No,
    Unclear,
}

/// Read a yes/no answer. Only the first word counts, so "yes please" and
/// "no, edit it" work.
pub fn classify_confirmation(text: &str) -> ConfirmationAnswer {
    let lowered = text.trim().to_lowercase();
    let first = lowered
        .split(|c: char| c.is_whitespace() || c == ',')
        .find(|w| !w.is_empty())
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .unwrap_or_default();

    if YES_TOKENS.contains(&first) {
        ConfirmationAnswer::Yes
    } else if NO_TOKENS.contains(&first) {
        ConfirmationAnswer::No
    } else {
        ConfirmationAnswer::Unclear
    }
}

/// The confirmation prompt for a freshly extracted draft.
pub fn confirm_prompt(draft: &ProductDraft) -> Reply {
    Reply::new(MessageKey::ProductConfirm)
        .with("name", &draft.name)
        .with("category", &draft.category)
        .with("description", &draft.description)
}

/// Resolve a reply while the session is awaiting confirmation.
///
/// If the product cannot be written the session stays where it is so the
/// same YES can be retried.
pub fn resolve_confirmation(account: Option<&Account>, mut session: Session, text: &str) -> Transition {
    let FlowState::ProductConfirmation { draft, media_id, .. } = &session.state else {
        return Transition::new(session, Reply::new(MessageKey::Help));
    };
    let draft = draft.clone();
    let media_id = media_id.clone();

    match classify_confirmation(text) {
        ConfirmationAnswer::Unclear => {
            let reply = Reply::new(MessageKey::ConfirmYesNo).with("name", &draft.name);
            Transition::new(session, reply)
        }
        ConfirmationAnswer::No => {
            info!(phone = %session.phone, product = %draft.name, "Product draft discarded");
            session.state = FlowState::Idle;
            Transition::new(session, Reply::new(MessageKey::ProductDiscarded))
        }
        ConfirmationAnswer::Yes => {
            let Some(company) = account.and_then(|a| a.company.as_ref()) else {
                warn!(phone = %session.phone, "Product confirmed without a company on file");
                return Transition::new(session, Reply::new(MessageKey::SetupFailed));
            };
            info!(phone = %session.phone, product = %draft.name, "Product confirmed");
            let retry = Transition::new(session.clone(), Reply::new(MessageKey::SetupFailed));
            session.state = FlowState::Idle;
            let reply = Reply::new(MessageKey::ProductSaved).with("name", &draft.name);
            Transition::new(session, reply)
                .with_record(PendingRecord::Product {
                    company_id: company.id,
                    draft,
                    media_id,
                })
                .or_else(retry)
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::locale::Language;
    use crate::onboarding::Role;
    use crate::session::Mode;
    use crate::store::Company;

    fn draft() -> ProductDraft {
        ProductDraft {
            name: "Cashew nuts".into(),
            category: Some("nuts".into()),
            description: None,
        }
    }

    fn setup() -> (Account, Session) {
        let account = Account {
            profile_id: Uuid::new_v4(),
            phone: "255700000001".into(),
            full_name: "Juma".into(),
            role: Role::Seller,
            country: Some("Tanzania".into()),
            company: Some(Company {
                id: Uuid::new_v4(),
                name: "Juma Exports".into(),
                country: Some("Tanzania".into()),
            }),
        };
        let session = Session::new(
            "255700000001",
            Language::Swahili,
            FlowState::confirm_product(draft(), Some("MEDIA1".into())),
        );
        (account, session)
    }

    #[test]
    fn answers_classified() {
        for yes in ["yes", "YES!", "Yes please", "ok", "oui", "Ndiyo", "sawa", "نعم"] {
            assert_eq!(classify_confirmation(yes), ConfirmationAnswer::Yes, "{yes}");
        }
        for no in ["no", "No.", "edit", "cancel", "non", "hapana", "لا", "no, edit it"] {
            assert_eq!(classify_confirmation(no), ConfirmationAnswer::No, "{no}");
        }
        for unclear in ["maybe", "", "   ", "not sure", "yesterday"] {
            assert_eq!(classify_confirmation(unclear), ConfirmationAnswer::Unclear, "{unclear}");
        }
    }

    #[test]
    fn yes_plans_product_with_session() {
        let (account, session) = setup();
        let before = session.state.clone();
        let t = resolve_confirmation(Some(&account), session, "yes");
        assert_eq!(t.session.mode(), Mode::Idle);
        assert_eq!(t.reply.key, MessageKey::ProductSaved);
        assert_eq!(
            t.records,
            vec![PendingRecord::Product {
                company_id: account.company.as_ref().unwrap().id,
                draft: draft(),
                media_id: Some("MEDIA1".into()),
            }]
        );

        let retry = t.fallback.expect("write failure keeps the draft");
        assert_eq!(retry.session.state, before);
        assert_eq!(retry.reply.key, MessageKey::SetupFailed);
        assert!(retry.records.is_empty());
    }

    #[test]
    fn no_discards_draft() {
        let (account, session) = setup();
        let t = resolve_confirmation(Some(&account), session, "no");
        assert_eq!(t.session.state, FlowState::Idle);
        assert_eq!(t.reply.key, MessageKey::ProductDiscarded);
        assert!(t.records.is_empty());
    }

    #[test]
    fn maybe_keeps_state() {
        let (account, session) = setup();
        let before = session.state.clone();
        let t = resolve_confirmation(Some(&account), session, "maybe");
        assert_eq!(t.session.state, before);
        assert_eq!(t.reply.key, MessageKey::ConfirmYesNo);
        assert_eq!(t.reply.param("name").and_then(|v| v.as_str()), Some("Cashew nuts"));
        assert!(t.records.is_empty());
    }

    #[test]
    fn yes_without_company_keeps_draft() {
        let (mut account, session) = setup();
        account.company = None;
        let before = session.state.clone();
        let t = resolve_confirmation(Some(&account), session, "yes");
        assert_eq!(t.session.state, before);
        assert_eq!(t.reply.key, MessageKey::SetupFailed);
        assert!(t.records.is_empty());
    }

    #[test]
    fn prompt_carries_draft_fields() {
        let reply = confirm_prompt(&draft());
        assert_eq!(reply.key, MessageKey::ProductConfirm);
        assert_eq!(reply.param("category").and_then(|v| v.as_str()), Some("nuts"));
        assert!(reply.param("description").is_none());
    }
}
