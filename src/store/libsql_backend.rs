//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Transaction, TransactionBehavior, params};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::Role;
use crate::pipeline::types::{ProductDraft, TradeFields};
use crate::store::migrations;
use crate::store::traits::{
    Account, Capability, Company, Database, Direction, NewAccount, NewMessage, NewTradeRequest,
    PendingRecord, ProductRecord, SessionRecord, StoredMessage, TradeRequestRecord, TradeStatus,
};

/// How long a connection waits on another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// libSQL database backend.
///
/// Single statements share one connection. Multi-row writes run in a
/// transaction on a dedicated connection, except for `:memory:` databases,
/// which only exist on the shared one.
pub struct LibSqlBackend {
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    in_memory: bool,
    tx_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| DatabaseError::Pool(format!("Failed to set busy timeout: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            in_memory: false,
            tx_lock: Mutex::new(()),
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            in_memory: true,
            tx_lock: Mutex::new(()),
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open an immediate write transaction. Transactions are serialized.
    async fn begin(&self, op: &str) -> Result<(Transaction, MutexGuard<'_, ()>), DatabaseError> {
        let guard = self.tx_lock.lock().await;
        let conn = if self.in_memory {
            self.conn.clone()
        } else {
            let conn = self
                .db
                .connect()
                .map_err(|e| DatabaseError::Pool(format!("{op}: {e}")))?;
            conn.busy_timeout(BUSY_TIMEOUT)
                .map_err(|e| DatabaseError::Pool(format!("{op}: {e}")))?;
            conn
        };
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op} begin: {e}")))?;
        Ok((tx, guard))
    }
}

/// Commit on `Ok`, roll back on `Err`. A dropped libSQL transaction is left
/// open, so every path must end here.
async fn finish<T>(
    tx: Transaction,
    result: Result<T, DatabaseError>,
    op: &str,
) -> Result<T, DatabaseError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| DatabaseError::Query(format!("{op} commit: {e}")))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(op, error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_decimal(s: Option<String>) -> Option<Decimal> {
    s.and_then(|s| Decimal::from_str(&s).ok())
}

fn str_to_direction(s: &str) -> Direction {
    match s {
        "outbound" => Direction::Outbound,
        _ => Direction::Inbound,
    }
}

fn str_to_trade_status(s: &str) -> TradeStatus {
    match s {
        "published" => TradeStatus::Published,
        _ => TradeStatus::Draft,
    }
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_decimal(d: Option<Decimal>) -> libsql::Value {
    match d {
        Some(d) => libsql::Value::Text(d.normalize().to_string()),
        None => libsql::Value::Null,
    }
}

const SESSION_COLUMNS: &str = "phone, language, mode, state, revision, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, direction, body, media_id, media_kind, intent, provider_message_id, created_at";

const TRADE_COLUMNS: &str = "id, reference, profile_id, company_id, status, item, quantity, unit, origin, destination, target_price, currency, raw_text, created_at";

/// Map a libsql Row to a SessionRecord (column order: SESSION_COLUMNS).
fn row_to_session(row: &libsql::Row) -> Result<SessionRecord, libsql::Error> {
    let created: String = row.get(5)?;
    let updated: String = row.get(6)?;
    Ok(SessionRecord {
        phone: row.get(0)?,
        language: row.get(1)?,
        mode: row.get(2)?,
        state: row.get(3)?,
        revision: row.get(4)?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Map a libsql Row to a StoredMessage (column order: MESSAGE_COLUMNS).
fn row_to_message(row: &libsql::Row) -> Result<StoredMessage, libsql::Error> {
    let id: String = row.get(0)?;
    let conversation_id: String = row.get(1)?;
    let direction: String = row.get(2)?;
    let created: String = row.get(8)?;
    Ok(StoredMessage {
        id: parse_uuid(&id),
        conversation_id: parse_uuid(&conversation_id),
        direction: str_to_direction(&direction),
        body: row.get(3)?,
        media_id: row.get(4).ok(),
        media_kind: row.get(5).ok(),
        intent: row.get(6).ok(),
        provider_message_id: row.get(7).ok(),
        created_at: parse_datetime(&created),
    })
}

/// Map a libsql Row to a TradeRequestRecord (column order: TRADE_COLUMNS).
fn row_to_trade(row: &libsql::Row) -> Result<TradeRequestRecord, libsql::Error> {
    let id: String = row.get(0)?;
    let profile_id: String = row.get(2)?;
    let company_id: Option<String> = row.get(3).ok();
    let status: String = row.get(4)?;
    let created: String = row.get(13)?;
    Ok(TradeRequestRecord {
        id: parse_uuid(&id),
        reference: row.get(1)?,
        profile_id: parse_uuid(&profile_id),
        company_id: company_id.as_deref().map(parse_uuid),
        status: str_to_trade_status(&status),
        fields: TradeFields {
            item: row.get(5).ok(),
            quantity: parse_decimal(row.get(6).ok()),
            unit: row.get(7).ok(),
            origin: row.get(8).ok(),
            destination: row.get(9).ok(),
            target_price: parse_decimal(row.get(10).ok()),
            currency: row.get(11).ok(),
        },
        raw_text: row.get(12)?,
        created_at: parse_datetime(&created),
    })
}

// ── Row writers ─────────────────────────────────────────────────────
//
// Take a `Connection` so they run the same on the shared connection and
// inside a transaction.

async fn write_session(
    conn: &Connection,
    session: &SessionRecord,
    expected_revision: i64,
) -> Result<bool, DatabaseError> {
    let updated = conn
        .execute(
            "UPDATE sessions SET language = ?1, mode = ?2, state = ?3, revision = revision + 1, updated_at = ?4 WHERE phone = ?5 AND revision = ?6",
            params![
                session.language.as_str(),
                session.mode.as_str(),
                session.state.as_str(),
                Utc::now().to_rfc3339(),
                session.phone.as_str(),
                expected_revision,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("update_session: {e}")))?;
    Ok(updated == 1)
}

async fn company_for_profile(
    conn: &Connection,
    profile_id: Uuid,
) -> Result<Option<Company>, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT id, name, country FROM companies WHERE profile_id = ?1",
            params![profile_id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("company_for_profile: {e}")))?;

    match rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("company_for_profile: {e}")))?
    {
        Some(row) => {
            let id: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("company_for_profile: {e}")))?;
            Ok(Some(Company {
                id: parse_uuid(&id),
                name: row.get(1).unwrap_or_default(),
                country: row.get(2).ok(),
            }))
        }
        None => Ok(None),
    }
}

async fn account_by_phone(conn: &Connection, phone: &str) -> Result<Option<Account>, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT id, phone, full_name, role, country FROM profiles WHERE phone = ?1",
            params![phone],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("get_account_by_phone: {e}")))?;

    let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("get_account_by_phone: {e}")))?
    else {
        return Ok(None);
    };

    let id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("get_account_by_phone: {e}")))?;
    let role: String = row.get(3).unwrap_or_default();
    let profile_id = parse_uuid(&id);
    let company = company_for_profile(conn, profile_id).await?;

    Ok(Some(Account {
        profile_id,
        phone: row.get(1).unwrap_or_else(|_| phone.to_string()),
        full_name: row.get(2).unwrap_or_default(),
        role: role.parse().unwrap_or(Role::Buyer),
        country: row.get(4).ok(),
        company,
    }))
}

async fn write_account(conn: &Connection, account: &NewAccount) -> Result<Account, DatabaseError> {
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO profiles (id, phone, full_name, role, country, language, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) ON CONFLICT(phone) DO NOTHING",
        params![
            Uuid::new_v4().to_string(),
            account.phone.as_str(),
            account.full_name.as_str(),
            account.role.as_str(),
            opt_text(account.country.as_deref()),
            account.language.code(),
            now.as_str(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("create_account profile: {e}")))?;

    let profile = account_by_phone(conn, &account.phone)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "profile".to_string(),
            id: account.phone.clone(),
        })?;

    conn.execute(
        "INSERT INTO companies (id, profile_id, name, country, created_at) VALUES (?1, ?2, ?3, ?4, ?5) ON CONFLICT(profile_id) DO NOTHING",
        params![
            Uuid::new_v4().to_string(),
            profile.profile_id.to_string(),
            account.company_name.as_str(),
            opt_text(account.country.as_deref()),
            now.as_str(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("create_account company: {e}")))?;

    let company = company_for_profile(conn, profile.profile_id)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "company".to_string(),
            id: profile.profile_id.to_string(),
        })?;

    if account.role.sells() {
        let description = account.products.as_deref().unwrap_or_default();
        conn.execute(
            "INSERT INTO capabilities (id, company_id, description, status, created_at) SELECT ?1, ?2, ?3, 'pending', ?4 WHERE NOT EXISTS (SELECT 1 FROM capabilities WHERE company_id = ?2)",
            params![
                Uuid::new_v4().to_string(),
                company.id.to_string(),
                description,
                now.as_str(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_account capability: {e}")))?;
    }

    Ok(Account {
        company: Some(company),
        ..profile
    })
}

async fn write_trade_request(
    conn: &Connection,
    request: &NewTradeRequest,
) -> Result<TradeRequestRecord, DatabaseError> {
    let reference = request.reference();
    let created_at = Utc::now();
    let fields = &request.fields;

    conn.execute(
        &format!(
            "INSERT INTO trade_requests ({TRADE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        ),
        params![
            request.id.to_string(),
            reference.as_str(),
            request.profile_id.to_string(),
            opt_text(request.company_id.map(|c| c.to_string()).as_deref()),
            request.status.as_str(),
            opt_text(fields.item.as_deref()),
            opt_decimal(fields.quantity),
            opt_text(fields.unit.as_deref()),
            opt_text(fields.origin.as_deref()),
            opt_text(fields.destination.as_deref()),
            opt_decimal(fields.target_price),
            opt_text(fields.currency.as_deref()),
            request.raw_text.as_str(),
            created_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("insert_trade_request: {e}")))?;

    Ok(TradeRequestRecord {
        id: request.id,
        reference,
        profile_id: request.profile_id,
        company_id: request.company_id,
        status: request.status,
        fields: request.fields.clone(),
        raw_text: request.raw_text.clone(),
        created_at,
    })
}

async fn write_product(
    conn: &Connection,
    company_id: Uuid,
    draft: &ProductDraft,
    media_id: Option<&str>,
) -> Result<ProductRecord, DatabaseError> {
    let id = Uuid::new_v4();
    let created_at = Utc::now();

    conn.execute(
        "INSERT INTO products (id, company_id, name, category, description, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id.to_string(),
            company_id.to_string(),
            draft.name.as_str(),
            opt_text(draft.category.as_deref()),
            opt_text(draft.description.as_deref()),
            created_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("create_product: {e}")))?;

    if let Some(media_id) = media_id {
        conn.execute(
            "INSERT INTO product_images (id, product_id, media_id, is_primary, created_at) VALUES (?1, ?2, ?3, 1, ?4)",
            params![
                Uuid::new_v4().to_string(),
                id.to_string(),
                media_id,
                created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_product image: {e}")))?;
    }

    Ok(ProductRecord {
        id,
        company_id,
        name: draft.name.clone(),
        category: draft.category.clone(),
        description: draft.description.clone(),
        primary_media_id: media_id.map(str::to_string),
        created_at,
    })
}

/// Session first: a lost race returns before any record is written.
async fn write_turn(
    conn: &Connection,
    session: &SessionRecord,
    expected_revision: i64,
    pending: &[PendingRecord],
) -> Result<bool, DatabaseError> {
    if !write_session(conn, session, expected_revision).await? {
        return Ok(false);
    }
    for record in pending {
        match record {
            PendingRecord::Product {
                company_id,
                draft,
                media_id,
            } => {
                let product = write_product(conn, *company_id, draft, media_id.as_deref()).await?;
                debug!(product_id = %product.id, "Product staged");
            }
            PendingRecord::TradeRequest(request) => {
                write_trade_request(conn, request).await?;
                debug!(reference = %request.reference(), "Trade request staged");
            }
        }
    }
    Ok(true)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Sessions ────────────────────────────────────────────────────

    async fn get_session(&self, phone: &str) -> Result<Option<SessionRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE phone = ?1"),
                params![phone],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_session: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_session: {e}")))?
        {
            Some(row) => row_to_session(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_session: {e}"))),
            None => Ok(None),
        }
    }

    async fn insert_session(&self, session: &SessionRecord) -> Result<bool, DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO sessions ({SESSION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    session.phone.as_str(),
                    session.language.as_str(),
                    session.mode.as_str(),
                    session.state.as_str(),
                    session.revision,
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_session: {e}")))?;
        Ok(inserted == 1)
    }

    async fn update_session(
        &self,
        session: &SessionRecord,
        expected_revision: i64,
    ) -> Result<bool, DatabaseError> {
        write_session(self.conn(), session, expected_revision).await
    }

    async fn commit_turn(
        &self,
        session: &SessionRecord,
        expected_revision: i64,
        pending: &[PendingRecord],
    ) -> Result<bool, DatabaseError> {
        let (tx, _guard) = self.begin("commit_turn").await?;
        let result = write_turn(&tx, session, expected_revision, pending).await;
        let committed = finish(tx, result, "commit_turn").await?;
        if committed {
            for record in pending {
                match record {
                    PendingRecord::Product {
                        company_id, draft, ..
                    } => info!(company_id = %company_id, name = %draft.name, "Product created"),
                    PendingRecord::TradeRequest(request) => info!(
                        reference = %request.reference(),
                        status = request.status.as_str(),
                        profile_id = %request.profile_id,
                        "Trade request stored"
                    ),
                }
            }
        }
        Ok(committed)
    }

    // ── Idempotency ─────────────────────────────────────────────────

    async fn claim_inbound(
        &self,
        provider_message_id: &str,
        phone: &str,
    ) -> Result<bool, DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO inbound_receipts (provider_message_id, phone, received_at) VALUES (?1, ?2, ?3)",
                params![provider_message_id, phone, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_inbound: {e}")))?;
        Ok(inserted == 1)
    }

    // ── Conversations and messages ──────────────────────────────────

    async fn ensure_conversation(&self, phone: &str) -> Result<Uuid, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();

        // The partial unique index makes a concurrent open a no-op.
        conn.execute(
            "INSERT OR IGNORE INTO conversations (id, phone, status, started_at, last_activity) VALUES (?1, ?2, 'active', ?3, ?3)",
            params![Uuid::new_v4().to_string(), phone, now.as_str()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("ensure_conversation: {e}")))?;

        let mut rows = conn
            .query(
                "SELECT id FROM conversations WHERE phone = ?1 AND status = 'active'",
                params![phone],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("ensure_conversation: {e}")))?;
        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("ensure_conversation: {e}")))?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "conversation".to_string(),
                id: phone.to_string(),
            })?;
        let id: String = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("ensure_conversation: {e}")))?;

        conn.execute(
            "UPDATE conversations SET last_activity = ?1 WHERE id = ?2",
            params![now.as_str(), id.as_str()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("ensure_conversation: {e}")))?;

        Ok(parse_uuid(&id))
    }

    async fn link_conversation_profile(
        &self,
        conversation_id: Uuid,
        profile_id: Uuid,
    ) -> Result<(), DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE conversations SET profile_id = ?1 WHERE id = ?2",
                params![profile_id.to_string(), conversation_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("link_conversation_profile: {e}")))?;
        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "conversation".to_string(),
                id: conversation_id.to_string(),
            });
        }
        Ok(())
    }

    async fn append_message(&self, message: &NewMessage) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    id.to_string(),
                    message.conversation_id.to_string(),
                    message.direction.as_str(),
                    message.body.as_str(),
                    opt_text(message.media_id.as_deref()),
                    opt_text(message.media_kind.as_deref()),
                    opt_text(message.intent.as_deref()),
                    opt_text(message.provider_message_id.as_deref()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_message: {e}")))?;
        debug!(
            conversation_id = %message.conversation_id,
            direction = message.direction.as_str(),
            "Message logged"
        );
        Ok(id)
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<StoredMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC"
                ),
                params![conversation_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_message(&row) {
                Ok(msg) => messages.push(msg),
                Err(e) => tracing::warn!("Skipping message row: {e}"),
            }
        }
        Ok(messages)
    }

    // ── Accounts ────────────────────────────────────────────────────

    async fn get_account_by_phone(&self, phone: &str) -> Result<Option<Account>, DatabaseError> {
        account_by_phone(self.conn(), phone).await
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Account, DatabaseError> {
        let (tx, _guard) = self.begin("create_account").await?;
        let result = write_account(&tx, account).await;
        let created = finish(tx, result, "create_account").await?;

        info!(
            phone = %account.phone,
            profile_id = %created.profile_id,
            company_id = ?created.company.as_ref().map(|c| c.id),
            role = %account.role,
            "Account created"
        );
        Ok(created)
    }

    async fn list_capabilities(&self, company_id: Uuid) -> Result<Vec<Capability>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, company_id, description, status FROM capabilities WHERE company_id = ?1 ORDER BY created_at ASC",
                params![company_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_capabilities: {e}")))?;

        let mut capabilities = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: String = row.get(0).unwrap_or_default();
            let company: String = row.get(1).unwrap_or_default();
            capabilities.push(Capability {
                id: parse_uuid(&id),
                company_id: parse_uuid(&company),
                description: row.get(2).unwrap_or_default(),
                status: row.get(3).unwrap_or_default(),
            });
        }
        Ok(capabilities)
    }

    // ── Trade requests ──────────────────────────────────────────────

    async fn insert_trade_request(
        &self,
        request: &NewTradeRequest,
    ) -> Result<TradeRequestRecord, DatabaseError> {
        let stored = write_trade_request(self.conn(), request).await?;
        info!(
            reference = %stored.reference,
            status = request.status.as_str(),
            profile_id = %request.profile_id,
            "Trade request stored"
        );
        Ok(stored)
    }

    async fn list_trade_requests(
        &self,
        profile_id: Uuid,
    ) -> Result<Vec<TradeRequestRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TRADE_COLUMNS} FROM trade_requests WHERE profile_id = ?1 ORDER BY created_at ASC, rowid ASC"
                ),
                params![profile_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_trade_requests: {e}")))?;

        let mut requests = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_trade(&row) {
                Ok(req) => requests.push(req),
                Err(e) => tracing::warn!("Skipping trade request row: {e}"),
            }
        }
        Ok(requests)
    }

    // ── Products ────────────────────────────────────────────────────

    async fn create_product(
        &self,
        company_id: Uuid,
        draft: &ProductDraft,
        media_id: Option<&str>,
    ) -> Result<ProductRecord, DatabaseError> {
        let (tx, _guard) = self.begin("create_product").await?;
        let result = write_product(&tx, company_id, draft, media_id).await;
        let product = finish(tx, result, "create_product").await?;
        info!(product_id = %product.id, company_id = %company_id, name = %draft.name, "Product created");
        Ok(product)
    }

    async fn list_products(&self, company_id: Uuid) -> Result<Vec<ProductRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT p.id, p.company_id, p.name, p.category, p.description, i.media_id, p.created_at \
                 FROM products p LEFT JOIN product_images i ON i.product_id = p.id AND i.is_primary = 1 \
                 WHERE p.company_id = ?1 ORDER BY p.created_at ASC",
                params![company_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_products: {e}")))?;

        let mut products = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: String = row.get(0).unwrap_or_default();
            let company: String = row.get(1).unwrap_or_default();
            let created: String = row.get(6).unwrap_or_default();
            products.push(ProductRecord {
                id: parse_uuid(&id),
                company_id: parse_uuid(&company),
                name: row.get(2).unwrap_or_default(),
                category: row.get(3).ok(),
                description: row.get(4).ok(),
                primary_media_id: row.get(5).ok(),
                created_at: parse_datetime(&created),
            });
        }
        Ok(products)
    }
}
