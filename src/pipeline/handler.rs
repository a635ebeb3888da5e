//! ConversationHandler: runs one inbound event end to end.
//!
//! receipt claim → session lookup → media transcoding → state step →
//! conditional session write → render → dispatch.
//!
//! The session is read once, stepped as a value and written back with the
//! revision it was read at, together with any records the step created. A
//! writer that lost the race writes and sends nothing.
//!
//! External calls share one deadline per event: each gets its own timeout
//! or whatever is left before the deadline, whichever is shorter, and falls
//! back when it runs out. The write and the reply are never cut off by it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channels::{Channel, DeliveryOutcome, InboundEvent, InboundKind, OutboundDispatcher};
use crate::error::{DatabaseError, PipelineError};
use crate::llm::LlmProvider;
use crate::locale::{Language, country_from_phone, resolve_language};
use crate::media::{MediaTranscoder, SpeechToText};
use crate::onboarding::{OnboardingManager, OnboardingStep, fields_from_account, prompt_for};
use crate::pipeline::confirmation::{confirm_prompt, resolve_confirmation};
use crate::pipeline::extractor::FieldExtractor;
use crate::pipeline::intent::{Intent, IntentClassifier};
use crate::pipeline::trade::{self, TradeAttempt};
use crate::pipeline::types::{ProductDraft, TradeFields, TradeOutcome};
use crate::session::{FlowState, Mode, Session, Transition};
use crate::store::{Account, Database, Direction, NewMessage, PendingRecord};
use crate::templates::{MessageKey, Reply, TemplateEngine};

/// Timeouts and defaults for the handler.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Bound on each external call.
    pub external_timeout: Duration,
    /// Budget shared by all external calls of one event.
    pub deadline: Duration,
    pub default_language: Language,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            external_timeout: Duration::from_secs(15),
            deadline: Duration::from_secs(25),
            default_language: Language::English,
        }
    }
}

/// What the handler did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Provider redelivery of an event already claimed.
    Duplicate,
    Replied {
        key: MessageKey,
        delivery: DeliveryOutcome,
    },
    /// Another invocation advanced the session first; nothing was sent.
    Superseded,
    /// The store failed; a generic failure reply was attempted.
    Failed,
}

/// A committed step's reply, sent once the session write is done.
struct Outgoing {
    conversation_id: Uuid,
    phone: String,
    language: Language,
    reply: Reply,
}

enum Processed {
    Done(EventOutcome),
    Send(Outgoing),
}

/// One step's result plus the intent it was classified as, if any.
struct Turn {
    transition: Transition,
    intent: Option<Intent>,
}

impl From<Transition> for Turn {
    fn from(transition: Transition) -> Self {
        Self {
            transition,
            intent: None,
        }
    }
}

pub struct ConversationHandler {
    db: Arc<dyn Database>,
    media: Arc<MediaTranscoder>,
    classifier: IntentClassifier,
    extractor: FieldExtractor,
    onboarding: OnboardingManager,
    templates: TemplateEngine,
    dispatcher: OutboundDispatcher,
    settings: HandlerSettings,
}

impl ConversationHandler {
    /// Wire the pipeline. Missing collaborators disable their step: no
    /// channel means replies are skipped, no LLM means classification fails
    /// open and extraction falls back to drafts.
    pub fn new(
        db: Arc<dyn Database>,
        channel: Option<Arc<dyn Channel>>,
        llm: Option<Arc<dyn LlmProvider>>,
        speech: Option<Arc<dyn SpeechToText>>,
        settings: HandlerSettings,
    ) -> Self {
        let timeout = settings.external_timeout;
        let media = Arc::new(MediaTranscoder::new(
            channel.clone(),
            speech,
            llm.clone(),
            timeout,
        ));
        Self {
            classifier: IntentClassifier::new(llm.clone(), timeout),
            extractor: FieldExtractor::new(llm, timeout),
            onboarding: OnboardingManager::new(db.clone(), media.clone()),
            templates: TemplateEngine::new(),
            dispatcher: OutboundDispatcher::new(channel, db.clone(), timeout),
            media,
            db,
            settings,
        }
    }

    /// Process one inbound event.
    pub async fn handle(&self, event: &InboundEvent) -> EventOutcome {
        let deadline = Instant::now() + self.settings.deadline;
        match self.process(event, deadline).await {
            Ok(Processed::Done(outcome)) => outcome,
            Ok(Processed::Send(outgoing)) => {
                if Instant::now() > deadline {
                    warn!(
                        phone = %event.sender,
                        message_id = %event.provider_message_id,
                        deadline = ?self.settings.deadline,
                        "Step committed past the deadline, replying anyway"
                    );
                }
                self.reply(outgoing).await
            }
            Err(e) => {
                error!(
                    phone = %event.sender,
                    message_id = %event.provider_message_id,
                    error = %e,
                    "Event processing failed"
                );
                let language = self.failure_language(event).await;
                let text = self.templates.render(language, &Reply::new(MessageKey::SetupFailed));
                self.dispatcher.dispatch(None, &event.sender, &text).await;
                EventOutcome::Failed
            }
        }
    }

    async fn process(
        &self,
        event: &InboundEvent,
        deadline: Instant,
    ) -> Result<Processed, PipelineError> {
        let phone = event.sender.as_str();

        if !self.db.claim_inbound(&event.provider_message_id, phone).await? {
            debug!(phone, message_id = %event.provider_message_id, "Duplicate delivery ignored");
            return Ok(Processed::Done(EventOutcome::Duplicate));
        }

        let conversation_id = self.db.ensure_conversation(phone).await?;

        let Some(record) = self.db.get_session(phone).await? else {
            return self.start_session(event, conversation_id).await;
        };
        let (session, expected_revision) = match Session::from_record(record.clone()) {
            Ok(session) => {
                let revision = session.revision;
                (session, revision)
            }
            Err(e) => {
                error!(phone, error = %e, "Stored session rejected, resetting");
                (self.reset_session(record.phone.as_str(), &record.language).await?, record.revision)
            }
        };

        info!(
            phone,
            mode = %session.mode(),
            step = %session.state.step_label(),
            revision = expected_revision,
            kind = event.kind.media_kind().unwrap_or("text"),
            "Inbound message"
        );

        let (text, turn) = match self.input_text(event, deadline).await {
            Some(text) => {
                let turn = self
                    .step(session, conversation_id, event, &text, deadline)
                    .await?;
                (text, turn)
            }
            None => {
                let reply = Reply::new(MessageKey::VoiceNotUnderstood);
                (String::new(), Transition::new(session, reply).into())
            }
        };

        self.log_inbound(conversation_id, event, &text, turn.intent).await;

        let mut transition = turn.transition;
        loop {
            transition.session.updated_at = Utc::now();
            let record = transition.session.to_record()?;
            match self
                .db
                .commit_turn(&record, expected_revision, &transition.records)
                .await
            {
                Ok(true) => break,
                Ok(false) => {
                    warn!(
                        phone,
                        revision = expected_revision,
                        "Session changed concurrently, dropping this turn"
                    );
                    return Ok(Processed::Done(EventOutcome::Superseded));
                }
                Err(e) => match transition.fallback.take() {
                    Some(fallback) => {
                        warn!(
                            phone,
                            error = %e,
                            records = transition.records.len(),
                            "Records not written, falling back"
                        );
                        transition = *fallback;
                    }
                    None => return Err(e.into()),
                },
            }
        }
        debug!(
            phone,
            mode = %transition.session.mode(),
            step = %transition.session.state.step_label(),
            "Session advanced"
        );

        Ok(Processed::Send(Outgoing {
            conversation_id,
            phone: phone.to_string(),
            language: transition.session.language,
            reply: transition.reply,
        }))
    }

    /// First message from an unknown number: create the session and greet.
    async fn start_session(
        &self,
        event: &InboundEvent,
        conversation_id: Uuid,
    ) -> Result<Processed, PipelineError> {
        let phone = event.sender.as_str();
        let country = country_from_phone(phone);
        let language = resolve_language(
            country,
            event.kind.inline_text(),
            self.settings.default_language,
        );
        let session = Session::new(phone, language, FlowState::start_onboarding());

        self.log_inbound(
            conversation_id,
            event,
            event.kind.inline_text().unwrap_or_default(),
            None,
        )
        .await;

        if !self.db.insert_session(&session.to_record()?).await? {
            warn!(phone, "Session created concurrently, dropping this turn");
            return Ok(Processed::Done(EventOutcome::Superseded));
        }
        info!(phone, %language, country = country.unwrap_or("unknown"), "New session");

        Ok(Processed::Send(Outgoing {
            conversation_id,
            phone: phone.to_string(),
            language,
            reply: Reply::new(MessageKey::WelcomeAskName),
        }))
    }

    /// Language for the generic failure reply: the stored session's if it
    /// can be read, otherwise the one a first message would get.
    async fn failure_language(&self, event: &InboundEvent) -> Language {
        let stored = match self.db.get_session(&event.sender).await {
            Ok(Some(record)) => Language::from_code(&record.language),
            _ => None,
        };
        stored.unwrap_or_else(|| {
            resolve_language(
                country_from_phone(&event.sender),
                event.kind.inline_text(),
                self.settings.default_language,
            )
        })
    }

    /// Replacement for a session whose stored shape is invalid.
    async fn reset_session(&self, phone: &str, language: &str) -> Result<Session, DatabaseError> {
        let language = Language::from_code(language).unwrap_or(self.settings.default_language);
        let state = match self.db.get_account_by_phone(phone).await? {
            Some(_) => FlowState::Idle,
            None => FlowState::start_onboarding(),
        };
        Ok(Session::new(phone, language, state))
    }

    /// Text the state machine consumes. `None` means a voice note that could
    /// not be understood.
    async fn input_text(&self, event: &InboundEvent, deadline: Instant) -> Option<String> {
        match &event.kind {
            InboundKind::Text { body } => Some(body.clone()),
            InboundKind::Image { caption, .. } => Some(caption.clone().unwrap_or_default()),
            InboundKind::Audio { media_id } => match self.media.transcribe_voice(media_id, deadline).await {
                Ok(transcript) => Some(transcript),
                Err(e) => {
                    warn!(phone = %event.sender, media_id, error = %e, "Voice note not transcribed");
                    None
                }
            },
        }
    }

    async fn step(
        &self,
        session: Session,
        conversation_id: Uuid,
        event: &InboundEvent,
        text: &str,
        deadline: Instant,
    ) -> Result<Turn, PipelineError> {
        let image = match &event.kind {
            InboundKind::Image { media_id, .. } => Some(media_id.as_str()),
            _ => None,
        };

        match session.mode() {
            Mode::Onboarding => Ok(self
                .onboarding
                .advance(session, conversation_id, text, image, deadline)
                .await
                .into()),
            Mode::ProductConfirmation => {
                let account = self.db.get_account_by_phone(&session.phone).await?;
                Ok(resolve_confirmation(account.as_ref(), session, text).into())
            }
            Mode::Idle => self.idle_step(session, text, image, deadline).await,
        }
    }

    /// Idle dispatch: product photos, then intent classification.
    async fn idle_step(
        &self,
        mut session: Session,
        text: &str,
        image: Option<&str>,
        deadline: Instant,
    ) -> Result<Turn, PipelineError> {
        let Some(account) = self.db.get_account_by_phone(&session.phone).await? else {
            info!(phone = %session.phone, "Idle session without an account, restarting onboarding");
            session.state = FlowState::start_onboarding();
            return Ok(Transition::new(session, Reply::new(MessageKey::WelcomeAskName)).into());
        };

        if let Some(media_id) = image
            && account.company.is_some()
            && let Some(draft) = self.product_from_photo(media_id, text, deadline).await
        {
            info!(phone = %session.phone, product = %draft.name, "Product photo awaiting confirmation");
            let reply = confirm_prompt(&draft);
            session.state = FlowState::confirm_product(draft, Some(media_id.to_string()));
            return Ok(Transition::new(session, reply).into());
        }

        if text.trim().is_empty() {
            let reply = help_reply(&account, Intent::GeneralInquiry);
            return Ok(Transition::new(session, reply).into());
        }

        let classification = self.classifier.classify(text, deadline).await;
        let intent = classification.intent;
        info!(
            phone = %session.phone,
            %intent,
            confidence = classification.confidence,
            "Intent classified"
        );

        let transition = match intent {
            Intent::CreateRequest if account.company.is_none() => {
                info!(phone = %session.phone, "Request without a company, asking for one");
                let fields = fields_from_account(&account);
                let reply = prompt_for(OnboardingStep::AwaitingCompany, &fields);
                session.state = FlowState::Onboarding {
                    step: OnboardingStep::AwaitingCompany,
                    fields,
                };
                Transition::new(session, reply)
            }
            Intent::CreateRequest => self.create_request(session, &account, text, deadline).await,
            Intent::TrackShipment => {
                let reply = Reply::new(MessageKey::TrackingLookup).with("name", &account.full_name);
                Transition::new(session, reply)
            }
            Intent::ContactSupport | Intent::GeneralInquiry | Intent::Onboarding => {
                Transition::new(session, help_reply(&account, intent))
            }
        };

        Ok(Turn {
            transition,
            intent: Some(intent),
        })
    }

    async fn product_from_photo(
        &self,
        media_id: &str,
        caption: &str,
        deadline: Instant,
    ) -> Option<ProductDraft> {
        let caption = (!caption.trim().is_empty()).then_some(caption);
        match self.media.describe_image(media_id, caption, deadline).await {
            Ok(hints) if hints.is_product => {
                self.extractor.extract_product(caption, &hints, deadline).await
            }
            Ok(_) => {
                debug!(media_id, "Photo is not a product");
                None
            }
            Err(e) => {
                warn!(media_id, error = %e, "Photo not described");
                None
            }
        }
    }

    /// Each storage attempt becomes a transition whose fallback is the next
    /// one; if even the draft cannot be written the user is told to retry.
    async fn create_request(
        &self,
        session: Session,
        account: &Account,
        text: &str,
        deadline: Instant,
    ) -> Transition {
        let extracted = self.extractor.extract_trade(text, deadline).await;
        let failed = Transition::new(session.clone(), Reply::new(MessageKey::SetupFailed));
        trade::ingest(account, text, extracted)
            .into_iter()
            .rev()
            .fold(failed, |fallback, TradeAttempt { outcome, request }| {
                let reply = trade_reply(&outcome, &request.fields);
                Transition::new(session.clone(), reply)
                    .with_record(PendingRecord::TradeRequest(request))
                    .or_else(fallback)
            })
    }

    async fn log_inbound(
        &self,
        conversation_id: Uuid,
        event: &InboundEvent,
        text: &str,
        intent: Option<Intent>,
    ) {
        let message = NewMessage {
            conversation_id,
            direction: Direction::Inbound,
            body: text.to_string(),
            media_id: event.kind.media_id().map(str::to_string),
            media_kind: event.kind.media_kind().map(str::to_string),
            intent: intent.map(|i| i.as_str().to_string()),
            provider_message_id: Some(event.provider_message_id.clone()),
        };
        if let Err(e) = self.db.append_message(&message).await {
            warn!(phone = %event.sender, error = %e, "Inbound message not logged");
        }
    }

    async fn reply(&self, outgoing: Outgoing) -> EventOutcome {
        let text = self.templates.render(outgoing.language, &outgoing.reply);
        let delivery = self
            .dispatcher
            .dispatch(Some(outgoing.conversation_id), &outgoing.phone, &text)
            .await;
        EventOutcome::Replied {
            key: outgoing.reply.key,
            delivery,
        }
    }
}

fn trade_reply(outcome: &TradeOutcome, fields: &TradeFields) -> Reply {
    match outcome {
        TradeOutcome::Published { reference } => Reply::new(MessageKey::RequestPublished)
            .with("reference", reference)
            .with("item", &fields.item)
            .with("quantity", fields.quantity.map(|q| q.normalize().to_string()))
            .with("unit", &fields.unit),
        TradeOutcome::Draft { reference } => {
            Reply::new(MessageKey::RequestDrafted).with("reference", reference)
        }
    }
}

fn help_reply(account: &Account, intent: Intent) -> Reply {
    Reply::new(MessageKey::Help)
        .with("name", &account.full_name)
        .with("intent", intent.as_str())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::channels::dispatch::tests::RecordingChannel;
    use crate::error::{ChannelError, LlmError, MediaError};
    use crate::llm::{CompletionRequest, CompletionResponse};
    use crate::media::MediaBlob;
    use crate::onboarding::Role;
    use crate::store::{
        Capability, LibSqlBackend, NewAccount, NewTradeRequest, ProductRecord, SessionRecord,
        StoredMessage, TradeRequestRecord, TradeStatus,
    };

    const PHONE: &str = "254700000001";

    /// Answers by prompt: classification, trade extraction, or vision.
    #[derive(Default)]
    struct ScriptedLlm {
        intent: Option<String>,
        trade: Option<String>,
        vision: Option<String>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let system = request
                .messages
                .first()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let answer = if request.messages.iter().any(|m| m.image.is_some()) {
                self.vision.clone()
            } else if system.starts_with("You classify") {
                self.intent.clone()
            } else if system.starts_with("You extract buying requests") {
                self.trade.clone()
            } else {
                None
            };
            answer
                .map(|content| CompletionResponse {
                    content,
                    input_tokens: 0,
                    output_tokens: 0,
                })
                .ok_or_else(|| LlmError::RequestFailed {
                    provider: "scripted".into(),
                    reason: "no scripted answer".into(),
                })
        }
    }

    /// Channel that serves one image and records sends, optionally slowly.
    #[derive(Default)]
    struct PhotoChannel {
        inner: RecordingChannel,
        fetch_delay: Option<Duration>,
        send_delay: Option<Duration>,
    }

    #[async_trait]
    impl Channel for PhotoChannel {
        fn name(&self) -> &str {
            "photo"
        }

        async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError> {
            if let Some(delay) = self.send_delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.send_text(to, body).await
        }

        async fn fetch_media(&self, _media_id: &str) -> Result<MediaBlob, ChannelError> {
            if let Some(delay) = self.fetch_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(MediaBlob {
                bytes: vec![0xFF, 0xD8],
                mime_type: "image/jpeg".into(),
            })
        }
    }

    struct BrokenSpeech;

    #[async_trait]
    impl SpeechToText for BrokenSpeech {
        async fn transcribe(&self, _audio: &MediaBlob) -> Result<String, MediaError> {
            Err(MediaError::Transcription("HTTP 500".into()))
        }
    }

    struct SlowSpeech {
        delay: Duration,
    }

    #[async_trait]
    impl SpeechToText for SlowSpeech {
        async fn transcribe(&self, _audio: &MediaBlob) -> Result<String, MediaError> {
            tokio::time::sleep(self.delay).await;
            Ok("Amina".into())
        }
    }

    struct Harness {
        db: Arc<LibSqlBackend>,
        channel: Arc<PhotoChannel>,
        handler: ConversationHandler,
    }

    impl Harness {
        fn sent(&self) -> Vec<String> {
            self.channel.inner.bodies()
        }

        async fn session(&self) -> Session {
            let record = self.db.get_session(PHONE).await.unwrap().unwrap();
            Session::from_record(record).unwrap()
        }

        async fn onboarded(&self, role: Role) -> Account {
            let account = self.db.create_account(&new_account(role)).await.unwrap();
            let session = Session::new(PHONE, Language::English, FlowState::Idle);
            self.db.insert_session(&session.to_record().unwrap()).await.unwrap();
            account
        }
    }

    fn new_account(role: Role) -> NewAccount {
        NewAccount {
            phone: PHONE.into(),
            full_name: "Amina".into(),
            role,
            company_name: "Amina Foods".into(),
            country: Some("Kenya".into()),
            language: Language::English,
            products: None,
        }
    }

    fn cashews() -> ProductDraft {
        ProductDraft {
            name: "Cashew nuts".into(),
            category: Some("nuts".into()),
            description: None,
        }
    }

    /// How [`ShiftingDb`] departs from the real store.
    #[derive(Debug, Default, Clone, Copy)]
    struct Shift {
        /// Bump the revision right after every session read.
        race: bool,
        /// Report accounts without their company.
        strip_company: bool,
        /// Fail every session write.
        fail_writes: bool,
        /// Fail turn commits that carry records.
        fail_records: bool,
    }

    /// Wraps the real store to inject concurrent writers and failures.
    struct ShiftingDb {
        inner: Arc<LibSqlBackend>,
        shift: Shift,
    }

    fn unavailable() -> DatabaseError {
        DatabaseError::Query("store unavailable".into())
    }

    #[async_trait]
    impl Database for ShiftingDb {
        async fn init_schema(&self) -> Result<(), DatabaseError> {
            self.inner.init_schema().await
        }

        async fn get_session(&self, phone: &str) -> Result<Option<SessionRecord>, DatabaseError> {
            let record = self.inner.get_session(phone).await?;
            if self.shift.race
                && let Some(r) = &record
            {
                self.inner.update_session(r, r.revision).await?;
            }
            Ok(record)
        }

        async fn insert_session(&self, session: &SessionRecord) -> Result<bool, DatabaseError> {
            if self.shift.fail_writes {
                return Err(unavailable());
            }
            self.inner.insert_session(session).await
        }

        async fn update_session(&self, session: &SessionRecord, expected: i64) -> Result<bool, DatabaseError> {
            if self.shift.fail_writes {
                return Err(unavailable());
            }
            self.inner.update_session(session, expected).await
        }

        async fn commit_turn(
            &self,
            session: &SessionRecord,
            expected: i64,
            pending: &[PendingRecord],
        ) -> Result<bool, DatabaseError> {
            if self.shift.fail_writes || (self.shift.fail_records && !pending.is_empty()) {
                return Err(unavailable());
            }
            self.inner.commit_turn(session, expected, pending).await
        }

        async fn claim_inbound(&self, id: &str, phone: &str) -> Result<bool, DatabaseError> {
            self.inner.claim_inbound(id, phone).await
        }

        async fn ensure_conversation(&self, phone: &str) -> Result<Uuid, DatabaseError> {
            self.inner.ensure_conversation(phone).await
        }

        async fn link_conversation_profile(&self, conv: Uuid, profile: Uuid) -> Result<(), DatabaseError> {
            self.inner.link_conversation_profile(conv, profile).await
        }

        async fn append_message(&self, message: &NewMessage) -> Result<Uuid, DatabaseError> {
            self.inner.append_message(message).await
        }

        async fn list_messages(&self, conv: Uuid) -> Result<Vec<StoredMessage>, DatabaseError> {
            self.inner.list_messages(conv).await
        }

        async fn get_account_by_phone(&self, phone: &str) -> Result<Option<Account>, DatabaseError> {
            let account = self.inner.get_account_by_phone(phone).await?;
            Ok(account.map(|mut a| {
                if self.shift.strip_company {
                    a.company = None;
                }
                a
            }))
        }

        async fn create_account(&self, account: &NewAccount) -> Result<Account, DatabaseError> {
            self.inner.create_account(account).await
        }

        async fn list_capabilities(&self, company_id: Uuid) -> Result<Vec<Capability>, DatabaseError> {
            self.inner.list_capabilities(company_id).await
        }

        async fn insert_trade_request(&self, request: &NewTradeRequest) -> Result<TradeRequestRecord, DatabaseError> {
            self.inner.insert_trade_request(request).await
        }

        async fn list_trade_requests(&self, profile_id: Uuid) -> Result<Vec<TradeRequestRecord>, DatabaseError> {
            self.inner.list_trade_requests(profile_id).await
        }

        async fn create_product(
            &self,
            company_id: Uuid,
            draft: &ProductDraft,
            media_id: Option<&str>,
        ) -> Result<ProductRecord, DatabaseError> {
            self.inner.create_product(company_id, draft, media_id).await
        }

        async fn list_products(&self, company_id: Uuid) -> Result<Vec<ProductRecord>, DatabaseError> {
            self.inner.list_products(company_id).await
        }
    }

    struct Setup {
        speech: Option<Arc<dyn SpeechToText>>,
        channel: PhotoChannel,
        settings: HandlerSettings,
        shift: Option<Shift>,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                speech: Some(Arc::new(BrokenSpeech)),
                channel: PhotoChannel::default(),
                settings: HandlerSettings {
                    external_timeout: Duration::from_secs(1),
                    deadline: Duration::from_secs(5),
                    default_language: Language::English,
                },
                shift: None,
            }
        }
    }

    async fn assemble(llm: ScriptedLlm, setup: Setup) -> Harness {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let store: Arc<dyn Database> = match setup.shift {
            Some(shift) => Arc::new(ShiftingDb {
                inner: db.clone(),
                shift,
            }),
            None => db.clone(),
        };
        let channel = Arc::new(setup.channel);
        let handler = ConversationHandler::new(
            store,
            Some(channel.clone()),
            Some(Arc::new(llm)),
            setup.speech,
            setup.settings,
        );
        Harness { db, channel, handler }
    }

    async fn shifting_harness(llm: ScriptedLlm, shift: Shift) -> Harness {
        let setup = Setup {
            shift: Some(shift),
            ..Default::default()
        };
        assemble(llm, setup).await
    }

    async fn harness_with(llm: ScriptedLlm, settings: HandlerSettings) -> Harness {
        let setup = Setup {
            settings,
            ..Default::default()
        };
        assemble(llm, setup).await
    }

    async fn harness(llm: ScriptedLlm) -> Harness {
        assemble(llm, Setup::default()).await
    }

    fn request_llm() -> ScriptedLlm {
        ScriptedLlm {
            intent: Some(r#"{"intent": "create_request", "confidence": 0.9}"#.into()),
            trade: Some(r#"{"item": "maize", "quantity": 50, "unit": "tons", "origin": "Kenya"}"#.into()),
            ..Default::default()
        }
    }

    /// Seller account sitting on an unconfirmed cashew photo.
    async fn awaiting_confirmation(h: &Harness) -> Uuid {
        let account = h.db.create_account(&new_account(Role::Seller)).await.unwrap();
        let state = FlowState::confirm_product(cashews(), Some("MEDIA1".into()));
        let session = Session::new(PHONE, Language::English, state);
        h.db.insert_session(&session.to_record().unwrap()).await.unwrap();
        account.company.unwrap().id
    }

    fn text_event(id: &str, body: &str) -> InboundEvent {
        InboundEvent {
            provider_message_id: id.into(),
            sender: PHONE.into(),
            profile_name: None,
            kind: InboundKind::Text { body: body.into() },
            received_at: Utc::now(),
        }
    }

    fn step_of(session: &Session) -> Option<OnboardingStep> {
        match &session.state {
            FlowState::Onboarding { step, .. } => Some(*step),
            _ => None,
        }
    }

    #[tokio::test]
    async fn first_message_creates_session_and_greets() {
        let h = harness(ScriptedLlm::default()).await;
        let outcome = h.handler.handle(&text_event("m1", "Habari")).await;
        assert_eq!(
            outcome,
            EventOutcome::Replied {
                key: MessageKey::WelcomeAskName,
                delivery: DeliveryOutcome::Sent
            }
        );

        let session = h.session().await;
        assert_eq!(step_of(&session), Some(OnboardingStep::AwaitingName));
        // 254 is Kenya, which replies in Swahili.
        assert_eq!(session.language, Language::Swahili);
        assert_eq!(h.sent().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_delivery_advances_once() {
        let h = harness(ScriptedLlm::default()).await;
        h.handler.handle(&text_event("m1", "hi")).await;

        let answer = text_event("m2", "Amina Njoroge");
        h.handler.handle(&answer).await;
        assert_eq!(h.handler.handle(&answer).await, EventOutcome::Duplicate);

        let session = h.session().await;
        assert_eq!(step_of(&session), Some(OnboardingStep::AwaitingRole));
        assert_eq!(session.revision, 1);
        assert_eq!(h.sent().len(), 2);
    }

    #[tokio::test]
    async fn full_onboarding_creates_seller_account() {
        let h = harness(ScriptedLlm::default()).await;
        let script = [
            "hello",
            "Amina Njoroge",
            "I sell avocados",
            "Green Valley Farms",
            "Kenya",
            "Hass avocados",
        ];
        for (i, body) in script.iter().enumerate() {
            h.handler.handle(&text_event(&format!("m{i}"), body)).await;
        }

        let session = h.session().await;
        assert_eq!(session.mode(), Mode::Idle);

        let account = h.db.get_account_by_phone(PHONE).await.unwrap().unwrap();
        assert_eq!(account.full_name, "Amina Njoroge");
        assert_eq!(account.role, Role::Seller);
        let company = account.company.unwrap();
        assert_eq!(company.name, "Green Valley Farms");
        let caps = h.db.list_capabilities(company.id).await.unwrap();
        assert_eq!(caps.len(), 1);

        let sent = h.sent();
        assert_eq!(sent.len(), script.len());

        let conversation = h.db.ensure_conversation(PHONE).await.unwrap();
        let log = h.db.list_messages(conversation).await.unwrap();
        assert_eq!(log.len(), script.len() * 2);
        assert_eq!(log[0].direction, Direction::Inbound);
        assert_eq!(log[1].direction, Direction::Outbound);
    }

    #[tokio::test]
    async fn lost_race_sends_nothing() {
        let shift = Shift {
            race: true,
            ..Default::default()
        };
        let h = shifting_harness(ScriptedLlm::default(), shift).await;
        let session = Session::new(PHONE, Language::English, FlowState::start_onboarding());
        h.db.insert_session(&session.to_record().unwrap()).await.unwrap();

        let outcome = h.handler.handle(&text_event("m1", "Amina")).await;
        assert_eq!(outcome, EventOutcome::Superseded);
        assert!(h.sent().is_empty());

        // Only the concurrent writer's bump landed.
        let session = h.session().await;
        assert_eq!(session.revision, 1);
        assert_eq!(step_of(&session), Some(OnboardingStep::AwaitingName));
    }

    #[tokio::test]
    async fn confirmation_lost_race_writes_no_product() {
        let shift = Shift {
            race: true,
            ..Default::default()
        };
        let h = shifting_harness(ScriptedLlm::default(), shift).await;
        let company_id = awaiting_confirmation(&h).await;

        let outcome = h.handler.handle(&text_event("m1", "yes")).await;
        assert_eq!(outcome, EventOutcome::Superseded);
        assert!(h.db.list_products(company_id).await.unwrap().is_empty());
        assert!(h.sent().is_empty());
        // The concurrent writer's session stands.
        assert_eq!(h.session().await.mode(), Mode::ProductConfirmation);
    }

    #[tokio::test]
    async fn request_lost_race_writes_no_trade_request() {
        let shift = Shift {
            race: true,
            ..Default::default()
        };
        let h = shifting_harness(request_llm(), shift).await;
        let account = h.onboarded(Role::Buyer).await;

        let outcome = h
            .handler
            .handle(&text_event("m1", "I need 50 tons of maize from Kenya"))
            .await;
        assert_eq!(outcome, EventOutcome::Superseded);
        assert!(h.db.list_trade_requests(account.profile_id).await.unwrap().is_empty());
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_product_write_keeps_confirmation() {
        let shift = Shift {
            fail_records: true,
            ..Default::default()
        };
        let h = shifting_harness(ScriptedLlm::default(), shift).await;
        let company_id = awaiting_confirmation(&h).await;

        let outcome = h.handler.handle(&text_event("m1", "yes")).await;
        assert_eq!(
            outcome,
            EventOutcome::Replied {
                key: MessageKey::SetupFailed,
                delivery: DeliveryOutcome::Sent
            }
        );
        let session = h.session().await;
        assert_eq!(session.mode(), Mode::ProductConfirmation);
        assert_eq!(session.revision, 1);
        assert!(h.db.list_products(company_id).await.unwrap().is_empty());

        // Answering again once the store recovers still works.
        let h2 = Harness {
            handler: ConversationHandler::new(
                h.db.clone(),
                Some(h.channel.clone()),
                None,
                None,
                HandlerSettings::default(),
            ),
            db: h.db.clone(),
            channel: h.channel.clone(),
        };
        h2.handler.handle(&text_event("m2", "yes")).await;
        assert_eq!(h2.db.list_products(company_id).await.unwrap().len(), 1);
        assert_eq!(h2.session().await.mode(), Mode::Idle);
    }

    #[tokio::test]
    async fn failed_trade_write_replies_setup_failed() {
        let shift = Shift {
            fail_records: true,
            ..Default::default()
        };
        let h = shifting_harness(request_llm(), shift).await;
        let account = h.onboarded(Role::Buyer).await;

        let outcome = h
            .handler
            .handle(&text_event("m1", "I need 50 tons of maize from Kenya"))
            .await;
        assert_eq!(
            outcome,
            EventOutcome::Replied {
                key: MessageKey::SetupFailed,
                delivery: DeliveryOutcome::Sent
            }
        );
        assert!(h.db.list_trade_requests(account.profile_id).await.unwrap().is_empty());
        let session = h.session().await;
        assert_eq!(session.mode(), Mode::Idle);
        assert_eq!(session.revision, 1);
    }

    #[tokio::test]
    async fn store_failure_reply_uses_sender_language() {
        let shift = Shift {
            fail_writes: true,
            ..Default::default()
        };
        let h = shifting_harness(ScriptedLlm::default(), shift).await;

        let outcome = h.handler.handle(&text_event("m1", "hello")).await;
        assert_eq!(outcome, EventOutcome::Failed);

        let templates = TemplateEngine::new();
        let failed = Reply::new(MessageKey::SetupFailed);
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        // 254 is Kenya.
        assert_eq!(sent[0], templates.render(Language::Swahili, &failed));
        assert_ne!(sent[0], templates.render(Language::English, &failed));
    }

    #[tokio::test]
    async fn store_failure_reply_uses_session_language() {
        let shift = Shift {
            fail_writes: true,
            ..Default::default()
        };
        let h = shifting_harness(ScriptedLlm::default(), shift).await;
        let session = Session::new(PHONE, Language::French, FlowState::start_onboarding());
        h.db.insert_session(&session.to_record().unwrap()).await.unwrap();

        let outcome = h.handler.handle(&text_event("m1", "Amina")).await;
        assert_eq!(outcome, EventOutcome::Failed);

        let failed = Reply::new(MessageKey::SetupFailed);
        assert_eq!(h.sent(), vec![TemplateEngine::new().render(Language::French, &failed)]);
        assert_eq!(h.session().await.revision, 0);
    }

    #[tokio::test]
    async fn maize_request_published() {
        let h = harness(request_llm()).await;
        let account = h.onboarded(Role::Buyer).await;

        let outcome = h
            .handler
            .handle(&text_event("m1", "I need 50 tons of maize from Kenya"))
            .await;
        assert_eq!(
            outcome,
            EventOutcome::Replied {
                key: MessageKey::RequestPublished,
                delivery: DeliveryOutcome::Sent
            }
        );

        let requests = h.db.list_trade_requests(account.profile_id).await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].status, TradeStatus::Published);
        assert_eq!(requests[0].fields.item.as_deref(), Some("maize"));
        assert_eq!(requests[0].fields.unit.as_deref(), Some("tons"));

        let reply = &h.sent()[0];
        assert!(reply.contains(&requests[0].reference), "reply: {reply}");
        assert!(reply.contains("50 tons"), "reply: {reply}");
        assert_eq!(h.session().await.mode(), Mode::Idle);
    }

    #[tokio::test]
    async fn extraction_failure_saves_draft() {
        let h = harness(ScriptedLlm {
            intent: Some(r#"{"intent": "create_request"}"#.into()),
            trade: None,
            ..Default::default()
        })
        .await;
        let account = h.onboarded(Role::Buyer).await;

        let outcome = h
            .handler
            .handle(&text_event("m1", "I need 50 tons of maize from Kenya"))
            .await;
        assert_eq!(
            outcome,
            EventOutcome::Replied {
                key: MessageKey::RequestDrafted,
                delivery: DeliveryOutcome::Sent
            }
        );

        let requests = h.db.list_trade_requests(account.profile_id).await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].status, TradeStatus::Draft);
        let reply = &h.sent()[0];
        assert!(reply.contains("draft"), "reply: {reply}");
        assert!(reply.contains(&requests[0].reference), "reply: {reply}");
    }

    #[tokio::test]
    async fn classification_failure_gets_help() {
        let h = harness(ScriptedLlm::default()).await;
        h.onboarded(Role::Buyer).await;

        let outcome = h.handler.handle(&text_event("m1", "hello?")).await;
        assert_eq!(
            outcome,
            EventOutcome::Replied {
                key: MessageKey::Help,
                delivery: DeliveryOutcome::Sent
            }
        );
        assert!(h.sent()[0].contains("Amina"));
    }

    #[tokio::test]
    async fn tracking_acknowledged() {
        let h = harness(ScriptedLlm {
            intent: Some(r#"{"intent": "track_shipment", "confidence": 0.8}"#.into()),
            ..Default::default()
        })
        .await;
        h.onboarded(Role::Buyer).await;

        let outcome = h.handler.handle(&text_event("m1", "where is my order?")).await;
        assert!(matches!(
            outcome,
            EventOutcome::Replied {
                key: MessageKey::TrackingLookup,
                ..
            }
        ));

        let conversation = h.db.ensure_conversation(PHONE).await.unwrap();
        let log = h.db.list_messages(conversation).await.unwrap();
        assert_eq!(log[0].intent.as_deref(), Some("track_shipment"));
    }

    #[tokio::test]
    async fn request_without_company_reenters_onboarding() {
        let h = shifting_harness(
            ScriptedLlm {
                intent: Some(r#"{"intent": "create_request"}"#.into()),
                ..Default::default()
            },
            Shift {
                strip_company: true,
                ..Default::default()
            },
        )
        .await;
        h.onboarded(Role::Buyer).await;

        let outcome = h.handler.handle(&text_event("m1", "I need sugar")).await;
        assert!(matches!(
            outcome,
            EventOutcome::Replied {
                key: MessageKey::AskCompany,
                ..
            }
        ));
        let session = h.session().await;
        assert_eq!(step_of(&session), Some(OnboardingStep::AwaitingCompany));
        let FlowState::Onboarding { fields, .. } = &session.state else {
            unreachable!();
        };
        assert_eq!(fields.full_name.as_deref(), Some("Amina"));
    }

    #[tokio::test]
    async fn product_photo_then_no() {
        let h = harness(ScriptedLlm {
            vision: Some(r#"{"is_product": true, "name": "Cashew nuts", "category": "nuts"}"#.into()),
            ..Default::default()
        })
        .await;
        let account = h.onboarded(Role::Seller).await;

        let photo = InboundEvent {
            kind: InboundKind::Image {
                media_id: "MEDIA1".into(),
                caption: None,
            },
            ..text_event("m1", "")
        };
        let outcome = h.handler.handle(&photo).await;
        assert!(matches!(
            outcome,
            EventOutcome::Replied {
                key: MessageKey::ProductConfirm,
                ..
            }
        ));
        assert_eq!(h.session().await.mode(), Mode::ProductConfirmation);

        h.handler.handle(&text_event("m2", "maybe")).await;
        assert_eq!(h.session().await.mode(), Mode::ProductConfirmation);

        h.handler.handle(&text_event("m3", "no")).await;
        assert_eq!(h.session().await.mode(), Mode::Idle);
        let company_id = account.company.unwrap().id;
        assert!(h.db.list_products(company_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn product_photo_then_yes() {
        let h = harness(ScriptedLlm {
            vision: Some(r#"{"is_product": true, "name": "Cashew nuts"}"#.into()),
            ..Default::default()
        })
        .await;
        let account = h.onboarded(Role::Seller).await;

        let photo = InboundEvent {
            kind: InboundKind::Image {
                media_id: "MEDIA1".into(),
                caption: Some("W320".into()),
            },
            ..text_event("m1", "")
        };
        h.handler.handle(&photo).await;
        h.handler.handle(&text_event("m2", "Yes")).await;

        assert_eq!(h.session().await.mode(), Mode::Idle);
        let products = h.db.list_products(account.company.unwrap().id).await.unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name, "Cashew nuts");
        assert_eq!(products[0].primary_media_id.as_deref(), Some("MEDIA1"));
    }

    #[tokio::test]
    async fn unreadable_voice_note_reprompts() {
        let h = harness(ScriptedLlm::default()).await;
        h.handler.handle(&text_event("m1", "hi")).await;

        let voice = InboundEvent {
            kind: InboundKind::Audio {
                media_id: "AUDIO1".into(),
            },
            ..text_event("m2", "")
        };
        let outcome = h.handler.handle(&voice).await;
        assert!(matches!(
            outcome,
            EventOutcome::Replied {
                key: MessageKey::VoiceNotUnderstood,
                ..
            }
        ));
        assert_eq!(step_of(&h.session().await), Some(OnboardingStep::AwaitingName));
    }

    #[tokio::test]
    async fn invalid_stored_state_is_reset() {
        let h = harness(ScriptedLlm::default()).await;
        h.handler.handle(&text_event("m1", "hi")).await;

        let mut record = h.db.get_session(PHONE).await.unwrap().unwrap();
        record.state = r#"{"mode":"onboarding","step":"awaiting_spaceship"}"#.into();
        h.db.update_session(&record, record.revision).await.unwrap();

        let outcome = h.handler.handle(&text_event("m2", "Amina")).await;
        assert!(matches!(outcome, EventOutcome::Replied { .. }));
        let session = h.session().await;
        assert_eq!(step_of(&session), Some(OnboardingStep::AwaitingRole));
    }

    #[tokio::test]
    async fn slow_services_still_reply_by_deadline() {
        let settings = HandlerSettings {
            external_timeout: Duration::from_secs(5),
            deadline: Duration::from_millis(100),
            default_language: Language::English,
        };
        let h = harness_with(
            ScriptedLlm {
                intent: Some(r#"{"intent": "general_inquiry"}"#.into()),
                delay: Some(Duration::from_secs(2)),
                ..Default::default()
            },
            settings,
        )
        .await;
        h.onboarded(Role::Buyer).await;
        let before = h.session().await;

        let started = Instant::now();
        let outcome = h.handler.handle(&text_event("m1", "hello")).await;
        assert_eq!(
            outcome,
            EventOutcome::Replied {
                key: MessageKey::Help,
                delivery: DeliveryOutcome::Sent
            }
        );
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(h.session().await.revision, before.revision + 1);
        assert_eq!(h.sent().len(), 1);

        // The redelivery is absorbed by the receipt.
        assert_eq!(h.handler.handle(&text_event("m1", "hello")).await, EventOutcome::Duplicate);
        assert_eq!(h.sent().len(), 1);
    }

    #[tokio::test]
    async fn voice_note_hops_share_deadline() {
        // Each hop fits its own timeout; together they overrun the deadline.
        let setup = Setup {
            speech: Some(Arc::new(SlowSpeech {
                delay: Duration::from_millis(300),
            })),
            channel: PhotoChannel {
                fetch_delay: Some(Duration::from_millis(300)),
                ..Default::default()
            },
            settings: HandlerSettings {
                external_timeout: Duration::from_millis(400),
                deadline: Duration::from_millis(500),
                default_language: Language::English,
            },
            shift: None,
        };
        let h = assemble(ScriptedLlm::default(), setup).await;
        let session = Session::new(PHONE, Language::English, FlowState::start_onboarding());
        h.db.insert_session(&session.to_record().unwrap()).await.unwrap();

        let voice = InboundEvent {
            kind: InboundKind::Audio {
                media_id: "AUDIO1".into(),
            },
            ..text_event("m1", "")
        };
        let outcome = h.handler.handle(&voice).await;
        assert_eq!(
            outcome,
            EventOutcome::Replied {
                key: MessageKey::VoiceNotUnderstood,
                delivery: DeliveryOutcome::Sent
            }
        );
        let session = h.session().await;
        assert_eq!(step_of(&session), Some(OnboardingStep::AwaitingName));
        assert_eq!(session.revision, 1);
        assert_eq!(h.sent().len(), 1);

        assert_eq!(h.handler.handle(&voice).await, EventOutcome::Duplicate);
        assert_eq!(h.sent().len(), 1);
    }

    #[tokio::test]
    async fn slow_send_after_commit_still_delivers() {
        let setup = Setup {
            channel: PhotoChannel {
                send_delay: Some(Duration::from_millis(800)),
                ..Default::default()
            },
            settings: HandlerSettings {
                external_timeout: Duration::from_secs(2),
                deadline: Duration::from_millis(500),
                default_language: Language::English,
            },
            ..Default::default()
        };
        let h = assemble(ScriptedLlm::default(), setup).await;
        let session = Session::new(PHONE, Language::English, FlowState::start_onboarding());
        h.db.insert_session(&session.to_record().unwrap()).await.unwrap();

        let outcome = h.handler.handle(&text_event("m1", "Amina")).await;
        assert_eq!(
            outcome,
            EventOutcome::Replied {
                key: MessageKey::AskRole,
                delivery: DeliveryOutcome::Sent
            }
        );
        let session = h.session().await;
        assert_eq!(step_of(&session), Some(OnboardingStep::AwaitingRole));
        assert_eq!(session.revision, 1);
        assert_eq!(h.sent().len(), 1);
    }

    #[tokio::test]
    async fn idle_without_account_restarts_onboarding() {
        let h = harness(ScriptedLlm::default()).await;
        let session = Session::new(PHONE, Language::French, FlowState::Idle);
        h.db.insert_session(&session.to_record().unwrap()).await.unwrap();

        let outcome = h.handler.handle(&text_event("m1", "bonjour")).await;
        assert!(matches!(
            outcome,
            EventOutcome::Replied {
                key: MessageKey::WelcomeAskName,
                ..
            }
        ));
        assert_eq!(step_of(&h.session().await), Some(OnboardingStep::AwaitingName));
    }

    #[test]
    fn settings_default() {
        let settings = HandlerSettings::default();
        assert!(settings.deadline > settings.external_timeout);
        assert_eq!(settings.default_language, Language::English);
    }
}
