//! Placeholder resolution for prompt templates.
//!
//! Templates reference captured values as `{{name}}` tokens. Each token is
//! looked up against persisted data; when the value is unknown (or the lookup
//! fails) a generic fallback phrase is substituted. Resolution never fails and
//! never writes.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::error::DatabaseError;
use crate::store::ProfileGateway;

use super::catalog::FieldId;

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("valid placeholder regex"));

/// A named token that may appear in a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    PetName,
}

impl Placeholder {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "petName" => Some(Self::PetName),
            _ => None,
        }
    }

    /// Text used when the value is not known yet.
    pub fn fallback(&self) -> &'static str {
        match self {
            Self::PetName => "your pet",
        }
    }
}

/// Resolves placeholders for one identifier against stored profile data.
#[derive(Clone)]
pub struct PlaceholderResolver {
    gateway: ProfileGateway,
}

impl PlaceholderResolver {
    pub fn new(gateway: ProfileGateway) -> Self {
        Self { gateway }
    }

    /// Substitute every known placeholder in `template`.
    ///
    /// Unknown tokens are left as written.
    pub async fn resolve(&self, identifier: &str, template: &str) -> String {
        let mut values: HashMap<Placeholder, String> = HashMap::new();
        for caps in TOKEN.captures_iter(template) {
            let Some(placeholder) = Placeholder::from_token(&caps[1]) else {
                debug!(token = &caps[1], "Unknown placeholder left unresolved");
                continue;
            };
            if values.contains_key(&placeholder) {
                continue;
            }
            let value = match self.lookup(identifier, placeholder).await {
                Ok(Some(v)) => v,
                Ok(None) => placeholder.fallback().to_string(),
                Err(e) => {
                    warn!(identifier, error = %e, "Placeholder lookup failed, using fallback");
                    placeholder.fallback().to_string()
                }
            };
            values.insert(placeholder, value);
        }

        if values.is_empty() {
            return template.to_string();
        }

        TOKEN
            .replace_all(template, |caps: &Captures| {
                Placeholder::from_token(&caps[1])
                    .and_then(|p| values.get(&p).cloned())
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// An answer given in the current onboarding run wins, since a restart
    /// keeps the previous profile. Otherwise the profile, then whatever
    /// answer is stored.
    async fn lookup(
        &self,
        identifier: &str,
        placeholder: Placeholder,
    ) -> Result<Option<String>, DatabaseError> {
        match placeholder {
            Placeholder::PetName => {
                let Some(record) = self.gateway.load_onboarding(identifier).await? else {
                    return Ok(None);
                };
                let answer = record.answer(FieldId::PetName).map(String::from);
                if !record.complete && answer.is_some() {
                    return Ok(answer);
                }
                if let Some(pet) = self.gateway.load_profile(record.user_id).await? {
                    return Ok(Some(pet.fields.name));
                }
                Ok(answer)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::onboarding::record::{OnboardingRecord, ProfileFields};
    use crate::store::{Database, LibSqlBackend};

    async fn setup() -> (Arc<LibSqlBackend>, PlaceholderResolver) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let resolver = PlaceholderResolver::new(ProfileGateway::new(db.clone()));
        (db, resolver)
    }

    #[tokio::test]
    async fn template_without_placeholders_is_unchanged() {
        let (_db, r) = setup().await;
        assert_eq!(r.resolve("U1", "Hello there!").await, "Hello there!");
    }

    #[tokio::test]
    async fn unknown_user_gets_fallback() {
        let (_db, r) = setup().await;
        let out = r.resolve("U1", "Is {{petName}} hungry? {{petName}}!").await;
        assert_eq!(out, "Is your pet hungry? your pet!");
    }

    #[tokio::test]
    async fn persisted_answer_is_used_before_profile_exists() {
        let (db, r) = setup().await;
        let mut record = OnboardingRecord::new("U1");
        db.create_onboarding(&record).await.unwrap();
        record.state.insert(FieldId::PetName, Some("Mochi".into()));
        record.step = 2;
        db.save_onboarding(&record).await.unwrap();

        let out = r.resolve("U1", "What type of pet is {{petName}}?").await;
        assert_eq!(out, "What type of pet is Mochi?");
    }

    fn mochi() -> ProfileFields {
        ProfileFields {
            name: "Mochi".into(),
            pet_type: "Dog".into(),
            breed: None,
            dob: None,
            preferences: None,
        }
    }

    #[tokio::test]
    async fn profile_name_is_used_without_a_pending_answer() {
        let (db, r) = setup().await;
        let record = OnboardingRecord::new("U1");
        db.create_onboarding(&record).await.unwrap();
        db.upsert_pet(record.user_id, &mochi()).await.unwrap();

        assert_eq!(r.resolve("U1", "Hi {{petName}}").await, "Hi Mochi");
    }

    #[tokio::test]
    async fn profile_name_wins_once_complete() {
        let (db, r) = setup().await;
        let mut record = OnboardingRecord::new("U1");
        db.create_onboarding(&record).await.unwrap();
        record.state.insert(FieldId::PetName, Some("Old".into()));
        record.step = 6;
        record.complete = true;
        db.save_onboarding(&record).await.unwrap();
        db.upsert_pet(record.user_id, &mochi()).await.unwrap();

        assert_eq!(r.resolve("U1", "Hi {{petName}}").await, "Hi Mochi");
    }

    #[tokio::test]
    async fn new_answer_wins_over_kept_profile_after_restart() {
        let (db, r) = setup().await;
        let mut record = OnboardingRecord::new("U1");
        db.create_onboarding(&record).await.unwrap();
        db.upsert_pet(record.user_id, &mochi()).await.unwrap();

        record.state.insert(FieldId::Name, Some("Bob".into()));
        record.state.insert(FieldId::PetName, Some("Rex".into()));
        record.step = 2;
        db.save_onboarding(&record).await.unwrap();

        assert_eq!(
            r.resolve("U1", "What type of pet is {{petName}}?").await,
            "What type of pet is Rex?"
        );
    }

    #[tokio::test]
    async fn unknown_token_is_left_alone() {
        let (_db, r) = setup().await;
        assert_eq!(
            r.resolve("U1", "{{ownerName}} and {{petName}}").await,
            "{{ownerName}} and your pet"
        );
    }
}
