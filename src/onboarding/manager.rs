//! OnboardingManager: advances a session through the onboarding steps and
//! creates the account at the end.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::locale::language_for_country;
use crate::media::MediaTranscoder;
use crate::onboarding::model::{OnboardingFields, classify_role};
use crate::onboarding::state::OnboardingStep;
use crate::session::{FlowState, Session, Transition};
use crate::store::{Account, Database, NewAccount};
use crate::templates::{MessageKey, Reply};

/// Drives the onboarding conversation: one answer in, one step forward.
pub struct OnboardingManager {
    db: Arc<dyn Database>,
    media: Arc<MediaTranscoder>,
}

impl OnboardingManager {
    pub fn new(db: Arc<dyn Database>, media: Arc<MediaTranscoder>) -> Self {
        Self { db, media }
    }

    /// Consume one answer for the session's current step.
    ///
    /// `answer` is the message text (or transcript, or caption). When the
    /// message is a photo, `image_media_id` names it; at the products step
    /// the photo is described by the vision service, within `deadline`.
    pub async fn advance(
        &self,
        mut session: Session,
        conversation_id: Uuid,
        answer: &str,
        image_media_id: Option<&str>,
        deadline: Instant,
    ) -> Transition {
        let FlowState::Onboarding { step, fields } = &session.state else {
            warn!(phone = %session.phone, mode = %session.mode(), "Onboarding step requested outside onboarding");
            return Transition::new(session, Reply::new(MessageKey::Help));
        };
        let step = *step;
        let mut fields = fields.clone();
        let answer = answer.trim().to_string();

        match step {
            OnboardingStep::AwaitingName => fields.full_name = Some(answer),
            OnboardingStep::AwaitingRole => fields.role = Some(classify_role(&answer)),
            OnboardingStep::AwaitingCompany => fields.company_name = Some(answer),
            OnboardingStep::AwaitingCountry => {
                if let Some(language) = language_for_country(&answer) {
                    session.language = language;
                }
                fields.country = Some(answer);
            }
            OnboardingStep::AwaitingProducts | OnboardingStep::Completed => {
                let products = match image_media_id {
                    Some(media_id) => self.describe_products(media_id, &answer, deadline).await,
                    None => answer,
                };
                fields.products = Some(products);
                return self.complete(session, conversation_id, fields).await;
            }
        }

        let next = step.next().unwrap_or(OnboardingStep::AwaitingProducts);
        info!(phone = %session.phone, from = %step, to = %next, "Onboarding advanced");
        let reply = prompt_for(next, &fields);
        session.state = FlowState::Onboarding { step: next, fields };
        Transition::new(session, reply)
    }

    /// Vision summary of a product photo, falling back to its caption.
    async fn describe_products(&self, media_id: &str, caption: &str, deadline: Instant) -> String {
        let caption_opt = (!caption.is_empty()).then_some(caption);
        match self.media.describe_image(media_id, caption_opt, deadline).await {
            Ok(hints) => hints.summary_text().unwrap_or_else(|| caption.to_string()),
            Err(e) => {
                warn!(media_id, error = %e, "Product photo not described, using caption");
                caption.to_string()
            }
        }
    }

    /// Terminal transition. On failure the session stays at the products
    /// step so a resend retries account creation.
    async fn complete(
        &self,
        mut session: Session,
        conversation_id: Uuid,
        fields: OnboardingFields,
    ) -> Transition {
        let role = fields.role.unwrap_or_default();
        let new_account = NewAccount {
            phone: session.phone.clone(),
            full_name: fields.full_name.clone().unwrap_or_default(),
            role,
            company_name: fields.company_name.clone().unwrap_or_default(),
            country: fields.country.clone().filter(|c| !c.is_empty()),
            language: session.language,
            products: fields.products.clone().filter(|p| !p.is_empty()),
        };

        let account = match self.create(&new_account, conversation_id).await {
            Ok(account) => account,
            Err(e) => {
                warn!(phone = %session.phone, error = %e, "Account creation failed, staying at products step");
                session.state = FlowState::Onboarding {
                    step: OnboardingStep::AwaitingProducts,
                    fields,
                };
                return Transition::new(session, Reply::new(MessageKey::SetupFailed));
            }
        };

        info!(
            phone = %session.phone,
            profile_id = %account.profile_id,
            role = %role,
            "Onboarding completed"
        );
        session.state = FlowState::Idle;
        let reply = Reply::new(MessageKey::OnboardingComplete)
            .with("name", &fields.full_name)
            .with("company", account.company.as_ref().map(|c| &c.name));
        Transition::new(session, reply)
    }

    async fn create(
        &self,
        new_account: &NewAccount,
        conversation_id: Uuid,
    ) -> Result<Account, crate::error::DatabaseError> {
        let account = self.db.create_account(new_account).await?;
        self.db
            .link_conversation_profile(conversation_id, account.profile_id)
            .await?;
        Ok(account)
    }
}

/// The question for `step`, personalised from what is known so far.
pub fn prompt_for(step: OnboardingStep, fields: &OnboardingFields) -> Reply {
    let reply = Reply::new(step.prompt_key());
    match step {
        OnboardingStep::AwaitingRole | OnboardingStep::AwaitingCompany => {
            reply.with("name", &fields.full_name)
        }
        OnboardingStep::AwaitingCountry => reply.with("company", &fields.company_name),
        OnboardingStep::AwaitingProducts => {
            reply.with("role", fields.role.map(|r| r.as_str()))
        }
        OnboardingStep::AwaitingName | OnboardingStep::Completed => reply,
    }
}

/// Fields to resume onboarding with when an existing account lacks a company.
pub fn fields_from_account(account: &Account) -> OnboardingFields {
    OnboardingFields {
        full_name: Some(account.full_name.clone()),
        role: Some(account.role),
        company_name: None,
        country: account.country.clone(),
        products: None,
    }
}
