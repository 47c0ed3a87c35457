//! Post-onboarding assistant.
//!
//! Answers free-form messages from users who finished onboarding, with the
//! stored pet profile placed in the system message. Failures never escape as
//! errors; each degrades to a fixed apology.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::store::ProfileGateway;

pub const NO_USER_REPLY: &str =
    "I can't seem to find your user profile to get your pet's preferences. Please try again.";
pub const NO_PET_REPLY: &str = "I can't seem to find your pet's details to provide personalized assistance. Please ensure pet onboarding is complete.";
pub const EMPTY_COMPLETION_REPLY: &str =
    "I'm sorry, I couldn't get a response from the AI at this moment.";
pub const UPSTREAM_FAILURE_REPLY: &str =
    "I am currently having trouble communicating with the AI. Please try again shortly.";

/// The conversation partner for onboarded users.
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn reply(&self, identifier: &str, message: &str) -> String;
}

/// Build the system message around a rendered pet profile.
pub fn system_message(pet_section: &str) -> String {
    format!(
        "You are a helpful and proactive Pet Butler AI. Your primary goal is to assist pet owners \
by monitoring pet food, routines, and proactively sending reminders and suggestions. You have \
memory of pet preferences and routines.
Here is the information about the user's pet:
{pet_section}

Handle requests related to:
- Auto food reorder reminders (provide product links if appropriate).
- Vet/spa auto-reminder + booking simulation.
- Proactive messages like \"Mochi hasn't walked today\" or \"Time for grooming?\".
- General pet care advice based on the provided preferences.
- Always maintain a friendly and helpful tone.
- If a request involves reordering or booking, simulate the action and inform the user, e.g., \
\"I've simulated a reorder reminder for [product].\" or \"I've simulated a booking for [service].\"
"
    )
}

/// LLM-backed assistant with the user's pet profile as context.
pub struct PetAssistant {
    gateway: ProfileGateway,
    llm: Arc<dyn LlmProvider>,
    max_tokens: u32,
}

impl PetAssistant {
    pub fn new(gateway: ProfileGateway, llm: Arc<dyn LlmProvider>, max_tokens: u32) -> Self {
        Self {
            gateway,
            llm,
            max_tokens,
        }
    }
}

#[async_trait]
impl Assistant for PetAssistant {
    async fn reply(&self, identifier: &str, message: &str) -> String {
        let record = match self.gateway.load_onboarding(identifier).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(identifier, "Assistant found no user");
                return NO_USER_REPLY.to_string();
            }
            Err(e) => {
                warn!(identifier, error = %e, "Assistant user lookup failed");
                return NO_USER_REPLY.to_string();
            }
        };

        let pet = match self.gateway.load_profile(record.user_id).await {
            Ok(Some(pet)) => pet,
            Ok(None) => {
                warn!(identifier, "Assistant found no pet profile");
                return NO_PET_REPLY.to_string();
            }
            Err(e) => {
                warn!(identifier, error = %e, "Assistant pet lookup failed");
                return NO_PET_REPLY.to_string();
            }
        };

        let request = CompletionRequest::new(vec![
            ChatMessage::system(system_message(&pet.to_prompt_section())),
            ChatMessage::user(message),
        ])
        .with_max_tokens(self.max_tokens);

        match self.llm.complete(request).await {
            Ok(response) if !response.content.trim().is_empty() => {
                debug!(
                    identifier,
                    model = self.llm.model_name(),
                    input_tokens = response.input_tokens,
                    output_tokens = response.output_tokens,
                    "Assistant replied"
                );
                response.content
            }
            Ok(_) => {
                warn!(identifier, "LLM returned an empty completion");
                EMPTY_COMPLETION_REPLY.to_string()
            }
            Err(e) => {
                warn!(identifier, error = %e, "LLM request failed");
                UPSTREAM_FAILURE_REPLY.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use crate::error::LlmError;
    use crate::llm::{CompletionResponse, Role};
    use crate::onboarding::OnboardingManager;
    use crate::store::LibSqlBackend;

    /// Returns a canned reply and records the last request.
    struct StubLlm {
        reply: Result<String, ()>,
        last: Mutex<Option<CompletionRequest>>,
    }

    impl StubLlm {
        fn new(reply: Result<&str, ()>) -> Self {
            Self {
                reply: reply.map(String::from),
                last: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for StubLlm {
        fn model_name(&self) -> &str {
            "stub"
        }
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            *self.last.lock().unwrap() = Some(request);
            match &self.reply {
                Ok(content) => Ok(CompletionResponse {
                    content: content.clone(),
                    ..Default::default()
                }),
                Err(()) => Err(LlmError::RateLimited {
                    provider: "stub".into(),
                }),
            }
        }
    }

    async fn onboarded(finish: bool) -> ProfileGateway {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let gateway = ProfileGateway::new(db);
        let manager = OnboardingManager::new(gateway.clone());
        let mut script = vec!["Alice", "Mochi", "Dog", "", "unknown"];
        if finish {
            script.push("likes chicken");
        }
        for msg in script {
            manager.handle("U1", msg).await;
        }
        gateway
    }

    #[tokio::test]
    async fn reply_includes_pet_context() {
        let llm = Arc::new(StubLlm::new(Ok("Time for a walk!")));
        let assistant = PetAssistant::new(onboarded(true).await, llm.clone(), 1500);

        assert_eq!(assistant.reply("U1", "what now?").await, "Time for a walk!");

        let request = llm.last.lock().unwrap().clone().unwrap();
        assert_eq!(request.max_tokens, Some(1500));
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0].content.contains("Pet Name: Mochi, Type: Dog"));
        assert!(request.messages[0].content.contains("Breed: N/A"));
        assert!(request.messages[0].content.contains("likes chicken"));
        assert_eq!(request.messages[1].content, "what now?");
    }

    #[tokio::test]
    async fn unknown_user_gets_fixed_reply() {
        let llm = Arc::new(StubLlm::new(Ok("unused")));
        let assistant = PetAssistant::new(onboarded(true).await, llm.clone(), 1500);
        assert_eq!(assistant.reply("nobody", "hi").await, NO_USER_REPLY);
        assert!(llm.last.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_pet_gets_fixed_reply() {
        let llm = Arc::new(StubLlm::new(Ok("unused")));
        let assistant = PetAssistant::new(onboarded(false).await, llm, 1500);
        assert_eq!(assistant.reply("U1", "hi").await, NO_PET_REPLY);
    }

    #[tokio::test]
    async fn empty_completion_degrades() {
        let llm = Arc::new(StubLlm::new(Ok("  ")));
        let assistant = PetAssistant::new(onboarded(true).await, llm, 1500);
        assert_eq!(assistant.reply("U1", "hi").await, EMPTY_COMPLETION_REPLY);
    }

    #[tokio::test]
    async fn upstream_error_degrades() {
        let llm = Arc::new(StubLlm::new(Err(())));
        let assistant = PetAssistant::new(onboarded(true).await, llm, 1500);
        assert_eq!(assistant.reply("U1", "hi").await, UPSTREAM_FAILURE_REPLY);
    }
}
