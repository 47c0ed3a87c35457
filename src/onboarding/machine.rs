//! Onboarding state machine: pure transition from (record, message) to the
//! next record and a reply plan.
//!
//! Nothing here touches storage. The manager commits the resulting record
//! and renders the reply through the placeholder resolver.

use std::sync::LazyLock;

use regex::Regex;

use super::catalog::{Catalog, FieldKind, Question};
use super::record::{OnboardingRecord, ProfileFields};

/// Re-initiates onboarding when sent at step 0.
pub const RESTART_TOKEN: &str = "/start";

/// Accepted in the date field to record an unknown date.
pub const UNKNOWN_TOKEN: &str = "unknown";

/// Sent when the final answer completes onboarding.
pub const COMPLETION_MESSAGE: &str =
    "Got it! We're all set for {{petName}}. I'll start looking after your pet!";

/// Sent when a record is past the last question but was never marked complete.
pub const WELCOME_BACK_MESSAGE: &str =
    "Welcome aboard! How can I help you manage your pet's life today?";

/// Sent when there is nothing left to ask.
pub const ALREADY_COMPLETE_MESSAGE: &str =
    "It seems you've completed onboarding. How can I assist you?";

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date regex"));

/// What to say after a transition.
///
/// Templates are rendered by the placeholder resolver after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A fixed template (reminder, completion, welcome back).
    Template(&'static str),
    /// Literal acknowledgment text followed by the prompt for the new step.
    AckThenPrompt(String),
    /// The prompt for the new current step, or the already-complete message.
    NextPrompt,
}

/// Result of one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub record: OnboardingRecord,
    pub reply: Reply,
    /// True exactly when `complete` flipped from false to true.
    pub completed_now: bool,
}

impl Transition {
    /// Whether the record changed and needs saving.
    pub fn is_dirty(&self, before: &OnboardingRecord) -> bool {
        self.record != *before
    }

    /// The profile to upsert, if this transition completed onboarding.
    pub fn profile(&self) -> Option<ProfileFields> {
        if self.completed_now {
            ProfileFields::from_answers(&self.record.state)
        } else {
            None
        }
    }
}

/// Outcome of validating an answer for one question.
enum Answer {
    /// Store the value (or the unknown marker) and advance.
    Accept(Option<String>),
    /// Leave the step unchanged and send the reminder.
    Reject,
}

/// Validate `message` against a question's kind.
fn validate(kind: FieldKind, message: &str) -> Answer {
    let trimmed = message.trim();
    match kind {
        FieldKind::Greeting | FieldKind::RequiredText | FieldKind::Terminal => {
            if trimmed.is_empty() {
                Answer::Reject
            } else {
                Answer::Accept(Some(trimmed.to_string()))
            }
        }
        FieldKind::OptionalText => {
            Answer::Accept((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        FieldKind::Date => {
            if trimmed.eq_ignore_ascii_case(UNKNOWN_TOKEN) {
                Answer::Accept(None)
            } else if is_calendar_date(trimmed) {
                Answer::Accept(Some(trimmed.to_string()))
            } else {
                Answer::Reject
            }
        }
    }
}

/// `YYYY-MM-DD` that is also a real calendar date.
pub fn is_calendar_date(s: &str) -> bool {
    ISO_DATE.is_match(s) && chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Compute the next record and reply for an inbound message.
pub fn advance(catalog: &Catalog, record: &OnboardingRecord, message: &str) -> Transition {
    let mut next = record.clone();

    let reply = match catalog.get(record.step) {
        Some(question) if !record.complete => answer_question(question, &mut next, message),
        Some(_) => Reply::Template(ALREADY_COMPLETE_MESSAGE),
        None if record.complete => Reply::Template(ALREADY_COMPLETE_MESSAGE),
        None => Reply::Template(WELCOME_BACK_MESSAGE),
    };

    // Repairs a step that has run past the catalog without the flag set.
    if next.step >= catalog.len() && !next.complete {
        next.complete = true;
    }

    let completed_now = next.complete && !record.complete;
    if completed_now {
        next.completed_at = Some(chrono::Utc::now());
    }

    Transition {
        record: next,
        reply,
        completed_now,
    }
}

fn answer_question(question: &Question, record: &mut OnboardingRecord, message: &str) -> Reply {
    if question.kind == FieldKind::Greeting
        && record.step == 0
        && message.eq_ignore_ascii_case(RESTART_TOKEN)
    {
        record.state.clear();
        return Reply::NextPrompt;
    }

    let value = match validate(question.kind, message) {
        Answer::Accept(value) => value,
        Answer::Reject => return Reply::Template(question.reminder),
    };

    let ack = match (question.kind, &value) {
        (FieldKind::Greeting, Some(name)) => Some(format!("Nice to meet you, {name}!")),
        _ => None,
    };

    record.state.insert(question.field, value);
    record.step += 1;

    match question.kind {
        FieldKind::Terminal => {
            record.complete = true;
            Reply::Template(COMPLETION_MESSAGE)
        }
        _ => match ack {
            Some(ack) => Reply::AckThenPrompt(ack),
            None => Reply::NextPrompt,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::catalog::{FieldId, QUESTIONS};

    fn catalog() -> Catalog {
        Catalog::default()
    }

    fn at_step(step: usize) -> OnboardingRecord {
        let mut r = OnboardingRecord::new("U1");
        r.step = step;
        r
    }

    #[test]
    fn name_is_captured_and_acknowledged() {
        let t = advance(&catalog(), &at_step(0), "  Alice ");
        assert_eq!(t.record.step, 1);
        assert_eq!(t.record.answer(FieldId::Name), Some("Alice"));
        assert_eq!(t.reply, Reply::AckThenPrompt("Nice to meet you, Alice!".into()));
        assert!(!t.completed_now);
    }

    #[test]
    fn restart_token_clears_state_without_advancing() {
        let mut r = at_step(0);
        r.state.insert(FieldId::Name, Some("stale".into()));
        let t = advance(&catalog(), &r, "/START");
        assert_eq!(t.record.step, 0);
        assert!(t.record.state.is_empty());
        assert_eq!(t.reply, Reply::NextPrompt);
    }

    #[test]
    fn restart_token_is_a_plain_answer_after_step_zero() {
        let t = advance(&catalog(), &at_step(1), "/start");
        assert_eq!(t.record.step, 2);
        assert_eq!(t.record.answer(FieldId::PetName), Some("/start"));
    }

    #[test]
    fn empty_required_fields_reprompt_with_field_reminder() {
        for step in [0, 1, 2, 5] {
            let before = at_step(step);
            let t = advance(&catalog(), &before, "   ");
            assert_eq!(t.record.step, step, "step {step} must not advance");
            assert_eq!(t.reply, Reply::Template(QUESTIONS[step].reminder));
            assert!(!t.is_dirty(&before));
        }
    }

    #[test]
    fn reminders_are_distinct_per_required_field() {
        let reminders: Vec<&str> = [0, 1, 2, 4, 5].iter().map(|&i| QUESTIONS[i].reminder).collect();
        let mut unique = reminders.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), reminders.len());
    }

    #[test]
    fn empty_breed_is_stored_as_unknown() {
        let t = advance(&catalog(), &at_step(3), "");
        assert_eq!(t.record.step, 4);
        assert_eq!(t.record.state.get(&FieldId::PetBreed), Some(&None));
        assert_eq!(t.reply, Reply::NextPrompt);
    }

    #[test]
    fn breed_is_stored_trimmed() {
        let t = advance(&catalog(), &at_step(3), " Shiba Inu ");
        assert_eq!(t.record.answer(FieldId::PetBreed), Some("Shiba Inu"));
    }

    #[test]
    fn iso_date_is_stored_raw() {
        let t = advance(&catalog(), &at_step(4), "2020-05-01");
        assert_eq!(t.record.step, 5);
        assert_eq!(t.record.answer(FieldId::PetDob), Some("2020-05-01"));
    }

    #[test]
    fn unknown_date_is_stored_as_marker() {
        let t = advance(&catalog(), &at_step(4), "Unknown");
        assert_eq!(t.record.step, 5);
        assert_eq!(t.record.state.get(&FieldId::PetDob), Some(&None));
    }

    #[test]
    fn malformed_dates_are_rejected() {
        for input in ["may 1st", "2020-5-1", "2020-13-01", "2021-02-30", "", "20200501"] {
            let t = advance(&catalog(), &at_step(4), input);
            assert_eq!(t.record.step, 4, "{input:?} must be rejected");
            assert!(!t.record.state.contains_key(&FieldId::PetDob));
            assert_eq!(t.reply, Reply::Template(QUESTIONS[4].reminder));
        }
    }

    #[test]
    fn terminal_answer_completes_once() {
        let mut r = at_step(5);
        r.state.insert(FieldId::PetName, Some("Mochi".into()));
        r.state.insert(FieldId::PetType, Some("Dog".into()));
        let t = advance(&catalog(), &r, "likes chicken");
        assert_eq!(t.record.step, 6);
        assert!(t.record.complete);
        assert!(t.completed_now);
        assert!(t.record.completed_at.is_some());
        assert_eq!(t.reply, Reply::Template(COMPLETION_MESSAGE));

        let profile = t.profile().unwrap();
        assert_eq!(profile.preferences.as_deref(), Some("likes chicken"));
    }

    #[test]
    fn drift_past_catalog_forces_completion() {
        let r = at_step(catalog().len() + 3);
        let t = advance(&catalog(), &r, "hello?");
        assert!(t.record.complete);
        assert!(t.completed_now);
        assert_eq!(t.record.step, r.step);
        assert_eq!(t.reply, Reply::Template(WELCOME_BACK_MESSAGE));
    }

    #[test]
    fn drift_exactly_at_catalog_end_forces_completion() {
        let t = advance(&catalog(), &at_step(catalog().len()), "x");
        assert!(t.completed_now);
        assert_eq!(t.reply, Reply::Template(WELCOME_BACK_MESSAGE));
    }

    #[test]
    fn complete_record_is_left_untouched() {
        let mut r = at_step(catalog().len());
        r.complete = true;
        let t = advance(&catalog(), &r, "anything");
        assert!(!t.completed_now);
        assert!(!t.is_dirty(&r));
        assert_eq!(t.reply, Reply::Template(ALREADY_COMPLETE_MESSAGE));
    }

    #[test]
    fn calendar_date_check() {
        assert!(is_calendar_date("2020-05-01"));
        assert!(is_calendar_date("2024-02-29"));
        assert!(!is_calendar_date("2023-02-29"));
        assert!(!is_calendar_date(" 2020-05-01"));
    }

    #[test]
    fn step_never_exceeds_catalog_length_in_normal_flow() {
        let answers = ["Alice", "Mochi", "Dog", "", "unknown", "likes chicken"];
        let mut record = at_step(0);
        for answer in answers {
            record = advance(&catalog(), &record, answer).record;
            assert!(record.step <= catalog().len());
        }
        assert!(record.complete);
        assert_eq!(record.step, catalog().len());
    }
}
