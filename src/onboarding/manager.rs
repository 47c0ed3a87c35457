//! OnboardingManager: coordinates record loading, the pure transition,
//! commit of effects, and reply rendering.

use tracing::{debug, error, info, warn};

use crate::store::ProfileGateway;

use super::catalog::Catalog;
use super::machine::{self, ALREADY_COMPLETE_MESSAGE, Reply, Transition};
use super::placeholders::PlaceholderResolver;
use super::record::OnboardingRecord;

/// Resets onboarding from any step, including after completion.
pub const RESTART_COMMAND: &str = "/restart";

pub const CHECK_STATUS_FAILED: &str = "An error occurred while checking your status.";
pub const SETUP_FAILED: &str = "I had trouble setting you up. Please try again.";
pub const SAVE_FAILED: &str = "An error occurred while saving your progress. Please try again.";

/// Whether `message` is the explicit restart command.
pub fn is_restart_command(message: &str) -> bool {
    message.trim().eq_ignore_ascii_case(RESTART_COMMAND)
}

/// Drives one onboarding turn per inbound message.
///
/// Callers must serialize calls for the same identifier; the manager holds
/// no locks of its own.
#[derive(Clone)]
pub struct OnboardingManager {
    gateway: ProfileGateway,
    resolver: PlaceholderResolver,
    catalog: Catalog,
}

impl OnboardingManager {
    pub fn new(gateway: ProfileGateway) -> Self {
        Self {
            resolver: PlaceholderResolver::new(gateway.clone()),
            gateway,
            catalog: Catalog::default(),
        }
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Process one message and return the reply text.
    ///
    /// Every path returns text. Persistence failures map to fixed status
    /// messages and leave the stored step unchanged.
    pub async fn handle(&self, identifier: &str, message: &str) -> String {
        let record = match self.gateway.load_onboarding(identifier).await {
            Ok(Some(record)) => record,
            Ok(None) => match self.gateway.create_onboarding(identifier).await {
                Ok(record) => {
                    info!(identifier, "Created onboarding record");
                    record
                }
                Err(e) => {
                    error!(identifier, error = %e, "Failed to create onboarding record");
                    return SETUP_FAILED.to_string();
                }
            },
            Err(e) => {
                error!(identifier, error = %e, "Failed to load onboarding record");
                return CHECK_STATUS_FAILED.to_string();
            }
        };

        if is_restart_command(message) {
            return self.restart(identifier, &record).await;
        }

        let transition = machine::advance(&self.catalog, &record, message);
        debug!(
            identifier,
            from_step = record.step,
            to_step = transition.record.step,
            completed_now = transition.completed_now,
            "Onboarding transition"
        );

        if let Err(reply) = self.commit(identifier, &record, &transition).await {
            return reply;
        }

        self.render(identifier, &transition).await
    }

    /// Whether `identifier` has finished onboarding. Unknown identifiers are
    /// not complete.
    pub async fn is_complete(&self, identifier: &str) -> Result<bool, crate::error::DatabaseError> {
        Ok(self
            .gateway
            .load_onboarding(identifier)
            .await?
            .is_some_and(|r| r.complete))
    }

    /// Current record for `identifier`, if any.
    pub async fn status(
        &self,
        identifier: &str,
    ) -> Result<Option<OnboardingRecord>, crate::error::DatabaseError> {
        self.gateway.load_onboarding(identifier).await
    }

    async fn restart(&self, identifier: &str, record: &OnboardingRecord) -> String {
        let reset = record.restarted();
        if let Err(e) = self.gateway.save_onboarding(&reset).await {
            error!(identifier, error = %e, "Failed to save restarted onboarding");
            return SAVE_FAILED.to_string();
        }
        info!(identifier, "Onboarding restarted");
        self.render_prompt(identifier, 0).await
    }

    /// Upsert the profile (on completion) and then save the record.
    ///
    /// On failure returns the reply to send instead.
    async fn commit(
        &self,
        identifier: &str,
        before: &OnboardingRecord,
        transition: &Transition,
    ) -> Result<(), String> {
        if transition.completed_now {
            match transition.profile() {
                Some(fields) => {
                    if let Err(e) = self
                        .gateway
                        .upsert_profile(transition.record.user_id, &fields)
                        .await
                    {
                        error!(identifier, error = %e, "Failed to upsert pet profile");
                        return Err(SAVE_FAILED.to_string());
                    }
                    info!(identifier, pet = %fields.name, "Onboarding complete, profile stored");
                }
                None => {
                    warn!(
                        identifier,
                        step = transition.record.step,
                        "Completed without pet name and type, no profile stored"
                    );
                }
            }
        }

        if transition.is_dirty(before) {
            if let Err(e) = self.gateway.save_onboarding(&transition.record).await {
                error!(
                    identifier,
                    step = transition.record.step,
                    error = %e,
                    "Failed to save onboarding progress"
                );
                return Err(SAVE_FAILED.to_string());
            }
        }
        Ok(())
    }

    async fn render(&self, identifier: &str, transition: &Transition) -> String {
        match &transition.reply {
            Reply::Template(template) => self.resolver.resolve(identifier, template).await,
            Reply::AckThenPrompt(ack) => {
                let prompt = self.render_prompt(identifier, transition.record.step).await;
                format!("{ack} {prompt}")
            }
            Reply::NextPrompt => self.render_prompt(identifier, transition.record.step).await,
        }
    }

    async fn render_prompt(&self, identifier: &str, step: usize) -> String {
        let template = self
            .catalog
            .get(step)
            .map(|q| q.prompt)
            .unwrap_or(ALREADY_COMPLETE_MESSAGE);
        self.resolver.resolve(identifier, template).await
    }
}
