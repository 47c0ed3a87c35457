//! Dispatcher: routes each inbound message to onboarding or to the
//! assistant, one message at a time per identifier.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::assistant::Assistant;
use crate::channels::{ChannelManager, IncomingMessage, OutgoingResponse};
use crate::error::Error;
use crate::onboarding::OnboardingManager;
use crate::onboarding::manager::is_restart_command;

pub const UNEXPECTED_ERROR: &str = "An unexpected error occurred. Please try again later.";

/// Sent when handling a message fails outright.
pub const PROCESSING_FAILED: &str = "I apologize, but I encountered an error trying to process your request. Could you please try again?";

/// How long shutdown waits for in-flight messages.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// One async mutex per key, created on demand and dropped when idle.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

/// Holds the lock for one key until dropped.
pub struct KeyedGuard {
    key: String,
    locks: KeyedLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        KeyedGuard {
            key: key.to_string(),
            locks: self.clone(),
            guard: Some(mutex.lock_owned().await),
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.inner.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map's reference left: nobody holds or waits on it.
        if map
            .get(&self.key)
            .is_some_and(|m| Arc::strong_count(m) == 1)
        {
            map.remove(&self.key);
        }
    }
}

/// Pending messages per identifier.
///
/// An entry exists exactly while one worker is draining it, so messages for
/// an identifier are handled in arrival order and never two at a time.
#[derive(Clone, Default)]
struct Mailboxes {
    inner: Arc<StdMutex<HashMap<String, VecDeque<IncomingMessage>>>>,
}

impl Mailboxes {
    /// Queue `message`. Returns true when no worker is draining its
    /// identifier and the caller must start one.
    fn push(&self, message: IncomingMessage) -> bool {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match map.get_mut(&message.user_id) {
            Some(queue) => {
                queue.push_back(message);
                false
            }
            None => {
                map.insert(message.user_id.clone(), VecDeque::from([message]));
                true
            }
        }
    }

    /// Next message for `identifier`. Removes the entry once it is empty.
    fn pop(&self, identifier: &str) -> Option<IncomingMessage> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let next = map.get_mut(identifier).and_then(VecDeque::pop_front);
        if next.is_none() {
            map.remove(identifier);
        }
        next
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Chooses the handler for each message.
pub struct Dispatcher {
    onboarding: OnboardingManager,
    assistant: Arc<dyn Assistant>,
    locks: KeyedLocks,
}

impl Dispatcher {
    pub fn new(onboarding: OnboardingManager, assistant: Arc<dyn Assistant>) -> Self {
        Self {
            onboarding,
            assistant,
            locks: KeyedLocks::new(),
        }
    }

    /// Produce the reply for one message.
    ///
    /// Messages for the same identifier are handled strictly one after
    /// another; different identifiers proceed in parallel.
    pub async fn route(&self, identifier: &str, message: &str) -> String {
        let _guard = self.locks.lock(identifier).await;

        if is_restart_command(message) {
            return self.onboarding.handle(identifier, message).await;
        }

        match self.onboarding.is_complete(identifier).await {
            Ok(true) => {
                debug!(identifier, "Routing to assistant");
                self.assistant.reply(identifier, message).await
            }
            Ok(false) => {
                debug!(identifier, "Routing to onboarding");
                self.onboarding.handle(identifier, message).await
            }
            Err(e) => {
                error!(identifier, error = %e, "Failed to read onboarding status");
                UNEXPECTED_ERROR.to_string()
            }
        }
    }

    /// Route in a separate task so a panic still yields a reply.
    async fn route_guarded(self: &Arc<Self>, message: &IncomingMessage) -> String {
        let this = Arc::clone(self);
        let identifier = message.user_id.clone();
        let content = message.content.clone();
        match tokio::spawn(async move { this.route(&identifier, &content).await }).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(identifier = %message.user_id, error = %e, "Message handler failed");
                PROCESSING_FAILED.to_string()
            }
        }
    }

    /// Route one message and send the reply back on its channel.
    async fn deliver(self: &Arc<Self>, channels: &ChannelManager, message: &IncomingMessage) {
        let reply = self.route_guarded(message).await;
        if reply.is_empty() {
            return;
        }
        if let Err(e) = channels
            .respond(message, OutgoingResponse::text(reply))
            .await
        {
            error!(
                identifier = %message.user_id,
                channel = %message.channel,
                error = %e,
                "Failed to send reply"
            );
        }
    }

    /// Run until Ctrl+C or until every channel stream ends.
    pub async fn run(self: Arc<Self>, channels: ChannelManager) -> Result<(), Error> {
        self.run_until(channels, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            info!("Ctrl+C received, shutting down...");
        })
        .await
    }

    /// Main message loop with an explicit shutdown signal.
    pub async fn run_until(
        self: Arc<Self>,
        channels: ChannelManager,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let channels = Arc::new(channels);
        let mut message_stream = channels.start_all().await?;
        let mut tasks = JoinSet::new();
        let mailboxes = Mailboxes::default();
        tokio::pin!(shutdown);

        info!(channels = ?channels.names(), "Dispatcher ready and listening");

        loop {
            let message = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                msg = message_stream.next() => match msg {
                    Some(m) => m,
                    None => {
                        info!("All channel streams ended, shutting down...");
                        break;
                    }
                },
            };

            while tasks.try_join_next().is_some() {}

            let identifier = message.user_id.clone();
            if !mailboxes.push(message) {
                debug!(identifier, "Queued behind in-flight message");
                continue;
            }

            let dispatcher = Arc::clone(&self);
            let channels = Arc::clone(&channels);
            let mailboxes = mailboxes.clone();
            tasks.spawn(async move {
                while let Some(message) = mailboxes.pop(&identifier) {
                    dispatcher.deliver(&channels, &message).await;
                }
            });
        }

        let drain = async { while tasks.join_next().await.is_some() {} };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            warn!("In-flight messages still running at shutdown, aborting");
        }
        channels.shutdown_all().await?;
        Ok(())
    }
}
