//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::record::{Answers, OnboardingRecord, PetProfile, ProfileFields};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
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

        let backend = Self {
            db: Arc::new(db),
            conn,
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
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
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

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn parse_uuid(s: &str, column: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

/// Map a UNIQUE violation to `Constraint`, everything else to `Query`.
fn classify(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

/// Column order:
/// 0:id, 1:chat_id, 2:onboarding_step, 3:onboarding_state,
/// 4:onboarding_complete, 5:onboarding_completed_at
const USER_COLUMNS: &str = "id, chat_id, onboarding_step, onboarding_state, onboarding_complete, onboarding_completed_at";

fn row_to_record(row: &libsql::Row) -> Result<OnboardingRecord, DatabaseError> {
    let col = |e: libsql::Error| DatabaseError::Query(format!("users row parse: {e}"));

    let id_str: String = row.get(0).map_err(col)?;
    let identifier: String = row.get(1).map_err(col)?;
    let step: i64 = row.get(2).map_err(col)?;
    let state_str: String = row.get(3).unwrap_or_else(|_| "{}".to_string());
    let complete: i64 = row.get(4).unwrap_or(0);
    let completed_at: Option<String> = row.get(5).ok();

    let state: Answers = serde_json::from_str(&state_str)
        .map_err(|e| DatabaseError::Serialization(format!("onboarding_state: {e}")))?;
    let step = usize::try_from(step)
        .map_err(|_| DatabaseError::Serialization(format!("onboarding_step: {step}")))?;

    Ok(OnboardingRecord {
        user_id: parse_uuid(&id_str, "users.id")?,
        identifier,
        step,
        state,
        complete: complete != 0,
        completed_at: completed_at.as_deref().map(parse_datetime),
    })
}

/// Column order:
/// 0:id, 1:user_id, 2:name, 3:type, 4:breed, 5:dob, 6:preferences,
/// 7:created_at, 8:updated_at
const PET_COLUMNS: &str = "id, user_id, name, type, breed, dob, preferences, created_at, updated_at";

fn row_to_pet(row: &libsql::Row) -> Result<PetProfile, DatabaseError> {
    let col = |e: libsql::Error| DatabaseError::Query(format!("pets row parse: {e}"));

    let id_str: String = row.get(0).map_err(col)?;
    let user_id_str: String = row.get(1).map_err(col)?;
    let preferences_str: String = row.get(6).unwrap_or_else(|_| "{}".to_string());
    let created_str: String = row.get(7).map_err(col)?;
    let updated_str: String = row.get(8).map_err(col)?;

    let preferences = serde_json::from_str::<serde_json::Value>(&preferences_str)
        .ok()
        .and_then(|v| v.get("description").and_then(|d| d.as_str()).map(String::from));

    Ok(PetProfile {
        id: parse_uuid(&id_str, "pets.id")?,
        user_id: parse_uuid(&user_id_str, "pets.user_id")?,
        fields: ProfileFields {
            name: row.get(2).map_err(col)?,
            pet_type: row.get(3).map_err(col)?,
            breed: row.get(4).ok(),
            dob: row.get(5).ok(),
            preferences,
        },
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Users / onboarding ──────────────────────────────────────────

    async fn get_onboarding(
        &self,
        identifier: &str,
    ) -> Result<Option<OnboardingRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE chat_id = ?1"),
                params![identifier],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_onboarding: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_record(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_onboarding: {e}"))),
        }
    }

    async fn create_onboarding(&self, record: &OnboardingRecord) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let state = serde_json::to_string(&record.state)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO users (id, chat_id, onboarding_step, onboarding_state, onboarding_complete, onboarding_completed_at, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    record.user_id.to_string(),
                    record.identifier.as_str(),
                    record.step as i64,
                    state,
                    record.complete as i64,
                    opt_text(record.completed_at.map(|t| t.to_rfc3339()).as_deref()),
                    now,
                ],
            )
            .await
            .map_err(|e| classify("create_onboarding", e))?;

        debug!(identifier = %record.identifier, user_id = %record.user_id, "User created");
        Ok(())
    }

    async fn save_onboarding(&self, record: &OnboardingRecord) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let state = serde_json::to_string(&record.state)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        let updated = self
            .conn()
            .execute(
                "UPDATE users SET onboarding_step = ?1, onboarding_state = ?2, onboarding_complete = ?3, onboarding_completed_at = ?4, updated_at = ?5 WHERE id = ?6",
                params![
                    record.step as i64,
                    state,
                    record.complete as i64,
                    opt_text(record.completed_at.map(|t| t.to_rfc3339()).as_deref()),
                    now,
                    record.user_id.to_string(),
                ],
            )
            .await
            .map_err(|e| classify("save_onboarding", e))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "user".into(),
                id: record.user_id.to_string(),
            });
        }

        debug!(identifier = %record.identifier, step = record.step, complete = record.complete, "Onboarding saved");
        Ok(())
    }

    // ── Pets / profiles ─────────────────────────────────────────────

    async fn get_pet(&self, user_id: Uuid) -> Result<Option<PetProfile>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PET_COLUMNS} FROM pets WHERE user_id = ?1"),
                params![user_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_pet: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_pet(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_pet: {e}"))),
        }
    }

    async fn upsert_pet(
        &self,
        user_id: Uuid,
        fields: &ProfileFields,
    ) -> Result<Uuid, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let preferences = fields.preferences_json().to_string();

        let mut rows = self
            .conn()
            .query(
                "INSERT INTO pets (id, user_id, name, type, breed, dob, preferences, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT (user_id) DO UPDATE SET
                    name = excluded.name,
                    type = excluded.type,
                    breed = excluded.breed,
                    dob = excluded.dob,
                    preferences = excluded.preferences,
                    updated_at = excluded.updated_at
                 RETURNING id",
                params![
                    Uuid::new_v4().to_string(),
                    user_id.to_string(),
                    fields.name.as_str(),
                    fields.pet_type.as_str(),
                    opt_text(fields.breed.as_deref()),
                    opt_text(fields.dob.as_deref()),
                    preferences,
                    now,
                ],
            )
            .await
            .map_err(|e| classify("upsert_pet", e))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_pet: {e}")))?
            .ok_or_else(|| DatabaseError::Query("upsert_pet: no id returned".into()))?;
        let id: String = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("upsert_pet id: {e}")))?;

        debug!(user_id = %user_id, pet = %fields.name, "Pet profile upserted");
        parse_uuid(&id, "pets.id")
    }
}

// ── Tests ───────────────────────────────────────────────────────────
