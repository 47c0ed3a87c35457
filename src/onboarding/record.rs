//! Onboarding and profile data models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::catalog::FieldId;

/// Captured answers keyed by field.
///
/// `None` is the explicit "unknown" marker (skipped breed, unknown date of
/// birth). Absent keys have not been asked yet.
pub type Answers = BTreeMap<FieldId, Option<String>>;

/// Persisted onboarding progress for one user.
///
/// Stored in the `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingRecord {
    /// Internal per-user id.
    pub user_id: Uuid,
    /// External conversation key (the chat id).
    pub identifier: String,
    /// Index of the pending question.
    pub step: usize,
    /// Captured answers so far.
    pub state: Answers,
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl OnboardingRecord {
    /// A fresh record at step 0 for a first-contact identifier.
    pub fn new(identifier: &str) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            identifier: identifier.to_string(),
            step: 0,
            state: Answers::new(),
            complete: false,
            completed_at: None,
        }
    }

    /// A captured value, flattening "unknown" and "not asked" to `None`.
    pub fn answer(&self, field: FieldId) -> Option<&str> {
        self.state.get(&field).and_then(|v| v.as_deref())
    }

    /// Reset to the first question, keeping the user id.
    pub fn restarted(&self) -> Self {
        Self {
            step: 0,
            state: Answers::new(),
            complete: false,
            completed_at: None,
            ..self.clone()
        }
    }
}

/// The pet profile derived from a completed onboarding.
///
/// Stored in the `pets` table, one row per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFields {
    pub name: String,
    pub pet_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<String>,
}

impl ProfileFields {
    /// Derive the profile from captured answers.
    ///
    /// Returns `None` if the pet's name or type was never captured.
    pub fn from_answers(answers: &Answers) -> Option<Self> {
        let get = |field| answers.get(&field).cloned().flatten();
        Some(Self {
            name: get(FieldId::PetName)?,
            pet_type: get(FieldId::PetType)?,
            breed: get(FieldId::PetBreed),
            dob: get(FieldId::PetDob),
            preferences: get(FieldId::PetPreferences),
        })
    }

    /// The `preferences` column value: `{"description": ...}` or `{}`.
    pub fn preferences_json(&self) -> serde_json::Value {
        match self.preferences {
            Some(ref description) => serde_json::json!({ "description": description }),
            None => serde_json::json!({}),
        }
    }
}

/// A stored pet profile row.
#[derive(Debug, Clone, PartialEq)]
pub struct PetProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub fields: ProfileFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PetProfile {
    /// Render the profile for the assistant's system message.
    pub fn to_prompt_section(&self) -> String {
        let f = &self.fields;
        let info = format!(
            "Pet Name: {}, Type: {}, Breed: {}, Age/DOB: {}",
            f.name,
            f.pet_type,
            f.breed.as_deref().unwrap_or("N/A"),
            f.dob.as_deref().unwrap_or("N/A"),
        );
        let preferences = match f.preferences {
            Some(_) => f.preferences_json().to_string(),
            None => "No specific preferences recorded.".to_string(),
        };
        format!("{info}\nPet Preferences & Routines: {preferences}")
    }
}
