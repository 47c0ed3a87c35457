//! Onboarding system: fixed question flow for new users.
//!
//! Each inbound message from an unfinished user advances a persisted record
//! through the question catalog. Answers become the user's pet profile once
//! the last question is answered.

pub mod catalog;
pub mod machine;
pub mod manager;
pub mod placeholders;
pub mod record;
pub mod routes;

pub use catalog::{Catalog, FieldId, FieldKind, QUESTIONS, Question};
pub use machine::{Reply, Transition, advance};
pub use manager::OnboardingManager;
pub use placeholders::PlaceholderResolver;
pub use record::{Answers, OnboardingRecord, PetProfile, ProfileFields};
pub use routes::{OnboardingRouteState, onboarding_routes};
