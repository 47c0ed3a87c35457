//! Profile persistence gateway: the onboarding core's only view of storage.
//!
//! Wraps a `Database` with per-call timeouts and the create-race handling
//! required for first contact.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::record::{OnboardingRecord, PetProfile, ProfileFields};
use crate::store::Database;

/// Default per-call persistence timeout.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timed, race-tolerant access to onboarding records and pet profiles.
#[derive(Clone)]
pub struct ProfileGateway {
    db: Arc<dyn Database>,
    timeout: Duration,
}

impl ProfileGateway {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> Result<T, DatabaseError>
    where
        F: Future<Output = Result<T, DatabaseError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(DatabaseError::Timeout {
                operation,
                timeout: self.timeout,
            }),
        }
    }

    pub async fn load_onboarding(
        &self,
        identifier: &str,
    ) -> Result<Option<OnboardingRecord>, DatabaseError> {
        self.timed("load_onboarding", self.db.get_onboarding(identifier))
            .await
    }

    /// Create a step-0 record for `identifier`.
    ///
    /// If another message for the same identifier created the record first,
    /// the unique-constraint failure is absorbed and the winner is returned.
    pub async fn create_onboarding(
        &self,
        identifier: &str,
    ) -> Result<OnboardingRecord, DatabaseError> {
        let record = OnboardingRecord::new(identifier);
        match self
            .timed("create_onboarding", self.db.create_onboarding(&record))
            .await
        {
            Ok(()) => Ok(record),
            Err(e) if e.is_constraint() => {
                debug!(identifier, "Concurrent create detected, re-reading");
                self.load_onboarding(identifier)
                    .await?
                    .ok_or_else(|| DatabaseError::NotFound {
                        entity: "user".into(),
                        id: identifier.to_string(),
                    })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn save_onboarding(&self, record: &OnboardingRecord) -> Result<(), DatabaseError> {
        self.timed("save_onboarding", self.db.save_onboarding(record))
            .await
    }

    /// Insert or update the user's single pet profile.
    pub async fn upsert_profile(
        &self,
        user_id: Uuid,
        fields: &ProfileFields,
    ) -> Result<Uuid, DatabaseError> {
        self.timed("upsert_profile", self.db.upsert_pet(user_id, fields))
            .await
    }

    pub async fn load_profile(&self, user_id: Uuid) -> Result<Option<PetProfile>, DatabaseError> {
        self.timed("load_profile", self.db.get_pet(user_id)).await
    }

    /// Look up a pet profile by external identifier.
    pub async fn load_profile_for(
        &self,
        identifier: &str,
    ) -> Result<Option<PetProfile>, DatabaseError> {
        match self.load_onboarding(identifier).await? {
            Some(record) => self.load_profile(record.user_id).await,
            None => {
                warn!(identifier, "No user found for profile lookup");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::store::LibSqlBackend;

    /// Delegates to libSQL but can stall or pretend a concurrent insert won.
    struct RacyDb {
        inner: LibSqlBackend,
        stall: bool,
    }

    #[async_trait]
    impl Database for RacyDb {
        async fn init_schema(&self) -> Result<(), DatabaseError> {
            self.inner.init_schema().await
        }
        async fn get_onboarding(
            &self,
            identifier: &str,
        ) -> Result<Option<OnboardingRecord>, DatabaseError> {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.inner.get_onboarding(identifier).await
        }
        async fn create_onboarding(&self, record: &OnboardingRecord) -> Result<(), DatabaseError> {
            // Another task inserts first.
            self.inner
                .create_onboarding(&OnboardingRecord::new(&record.identifier))
                .await?;
            self.inner.create_onboarding(record).await
        }
        async fn save_onboarding(&self, record: &OnboardingRecord) -> Result<(), DatabaseError> {
            self.inner.save_onboarding(record).await
        }
        async fn get_pet(&self, user_id: Uuid) -> Result<Option<PetProfile>, DatabaseError> {
            self.inner.get_pet(user_id).await
        }
        async fn upsert_pet(
            &self,
            user_id: Uuid,
            fields: &ProfileFields,
        ) -> Result<Uuid, DatabaseError> {
            self.inner.upsert_pet(user_id, fields).await
        }
    }

    async fn racy(stall: bool) -> ProfileGateway {
        let inner = LibSqlBackend::new_memory().await.unwrap();
        ProfileGateway::new(Arc::new(RacyDb { inner, stall }))
    }

    #[tokio::test]
    async fn create_race_returns_existing_record() {
        let gw = racy(false).await;
        let record = gw.create_onboarding("U1").await.unwrap();
        assert_eq!(record.identifier, "U1");
        assert_eq!(record.step, 0);

        let stored = gw.load_onboarding("U1").await.unwrap().unwrap();
        assert_eq!(stored.user_id, record.user_id);
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let gw = racy(true).await.with_timeout(Duration::from_millis(50));
        let err = gw.load_onboarding("U1").await.unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::Timeout {
                operation: "load_onboarding",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn profile_lookup_for_unknown_identifier_is_none() {
        let gw = ProfileGateway::new(Arc::new(LibSqlBackend::new_memory().await.unwrap()));
        assert!(gw.load_profile_for("nobody").await.unwrap().is_none());
    }
}
