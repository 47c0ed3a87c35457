//! Pet Butler: chat assistant that onboards pet owners and then answers
//! their questions with the pet's profile as context.

pub mod assistant;
pub mod channels;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod llm;
pub mod onboarding;
pub mod server;
pub mod store;
