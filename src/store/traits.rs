//! `Database` trait: async interface over the `users` and `pets` tables.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::record::{OnboardingRecord, PetProfile, ProfileFields};

/// Backend-agnostic persistence for onboarding records and pet profiles.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Users / onboarding ──────────────────────────────────────────

    /// Look up the onboarding record for an external identifier.
    async fn get_onboarding(
        &self,
        identifier: &str,
    ) -> Result<Option<OnboardingRecord>, DatabaseError>;

    /// Insert a new onboarding record.
    ///
    /// Fails with `DatabaseError::Constraint` if the identifier already exists.
    async fn create_onboarding(&self, record: &OnboardingRecord) -> Result<(), DatabaseError>;

    /// Overwrite step, state and completion for an existing record.
    async fn save_onboarding(&self, record: &OnboardingRecord) -> Result<(), DatabaseError>;

    // ── Pets / profiles ─────────────────────────────────────────────

    /// Get the pet profile owned by `user_id`.
    async fn get_pet(&self, user_id: Uuid) -> Result<Option<PetProfile>, DatabaseError>;

    /// Insert the user's pet profile, or update it in place if one exists.
    /// Returns the pet id.
    async fn upsert_pet(
        &self,
        user_id: Uuid,
        fields: &ProfileFields,
    ) -> Result<Uuid, DatabaseError>;
}
