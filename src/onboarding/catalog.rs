//! Question catalog: the fixed, ordered onboarding questions.

use serde::{Deserialize, Serialize};

/// Identifies a captured onboarding field.
///
/// Serialized in camelCase; these names are the keys of the persisted
/// `onboarding_state` JSON object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldId {
    Name,
    PetName,
    PetType,
    PetBreed,
    PetDob,
    PetPreferences,
}

impl FieldId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::PetName => "petName",
            Self::PetType => "petType",
            Self::PetBreed => "petBreed",
            Self::PetDob => "petDob",
            Self::PetPreferences => "petPreferences",
        }
    }
}

impl std::fmt::Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an answer to a question is validated and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// The owner's name. Accepts the restart token at step 0.
    Greeting,
    /// Non-empty trimmed text, stored verbatim.
    RequiredText,
    /// Any text; empty is stored as unknown.
    OptionalText,
    /// `YYYY-MM-DD` or the literal `unknown`.
    Date,
    /// Non-empty text that also completes onboarding.
    Terminal,
}

/// A single catalog entry.
#[derive(Debug, Clone, Copy)]
pub struct Question {
    pub field: FieldId,
    pub kind: FieldKind,
    /// Prompt shown when this question becomes current. May contain placeholders.
    pub prompt: &'static str,
    /// Re-prompt shown when the answer is rejected. May contain placeholders.
    pub reminder: &'static str,
}

/// The onboarding questions, in order. `QUESTIONS.len()` is the terminal step.
pub static QUESTIONS: &[Question] = &[
    Question {
        field: FieldId::Name,
        kind: FieldKind::Greeting,
        prompt: "Hello there! I'm your Pet Butler. What's your name?",
        reminder: "Please tell me your name so we can get started!",
    },
    Question {
        field: FieldId::PetName,
        kind: FieldKind::RequiredText,
        prompt: "What's your pet's name?",
        reminder: "Please tell me your pet's name!",
    },
    Question {
        field: FieldId::PetType,
        kind: FieldKind::RequiredText,
        prompt: "And what type of pet is {{petName}}? (e.g., Dog, Cat, Bird, etc.)",
        reminder: "Please tell me your pet's type!",
    },
    Question {
        field: FieldId::PetBreed,
        kind: FieldKind::OptionalText,
        prompt: "Do you know {{petName}}'s breed? If not, no worries!",
        reminder: "",
    },
    Question {
        field: FieldId::PetDob,
        kind: FieldKind::Date,
        prompt: "What is {{petName}}'s date of birth? (YYYY-MM-DD, or \"unknown\" if you don't know)",
        reminder: "Please use YYYY-MM-DD format or type 'unknown'.",
    },
    Question {
        field: FieldId::PetPreferences,
        kind: FieldKind::Terminal,
        prompt: "Awesome! Just a few questions about {{petName}}'s preferences. For example, \"likes chicken, allergic to beef, needs daily walks\".",
        reminder: "Please tell me a little about {{petName}}'s preferences!",
    },
];

/// Ordered, immutable view over a question list.
///
/// The state machine is written against a `Catalog` rather than the static
/// list directly so other question sets can be driven through it.
#[derive(Debug, Clone, Copy)]
pub struct Catalog {
    questions: &'static [Question],
}

impl Catalog {
    pub const fn new(questions: &'static [Question]) -> Self {
        Self { questions }
    }

    /// The question pending at `step`, if any.
    pub fn get(&self, step: usize) -> Option<&'static Question> {
        self.questions.get(step)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(QUESTIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_order_matches_profile_fields() {
        let fields: Vec<FieldId> = QUESTIONS.iter().map(|q| q.field).collect();
        assert_eq!(
            fields,
            vec![
                FieldId::Name,
                FieldId::PetName,
                FieldId::PetType,
                FieldId::PetBreed,
                FieldId::PetDob,
                FieldId::PetPreferences,
            ]
        );
    }

    #[test]
    fn only_last_question_is_terminal() {
        let catalog = Catalog::default();
        let terminal: Vec<usize> = (0..catalog.len())
            .filter(|&i| catalog.get(i).unwrap().kind == FieldKind::Terminal)
            .collect();
        assert_eq!(terminal, vec![catalog.len() - 1]);
    }

    #[test]
    fn get_past_end_is_none() {
        let catalog = Catalog::default();
        assert!(catalog.get(catalog.len()).is_none());
        assert!(catalog.get(usize::MAX).is_none());
    }

    #[test]
    fn field_display_matches_serde() {
        for q in QUESTIONS {
            let json = serde_json::to_string(&q.field).unwrap();
            assert_eq!(json, format!("\"{}\"", q.field));
        }
    }
}
