//! ChannelManager: owns every active channel, merges their inbound streams
//! and routes replies back by channel name.

use futures::stream;

use super::channel::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::error::ChannelError;

#[derive(Default)]
pub struct ChannelManager {
    channels: Vec<Box<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, channel: Box<dyn Channel>) {
        tracing::info!(channel = channel.name(), "Channel registered");
        self.channels.push(channel);
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    fn get(&self, name: &str) -> Result<&dyn Channel, ChannelError> {
        self.channels
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
            .ok_or_else(|| ChannelError::UnknownChannel(name.to_string()))
    }

    /// Start every channel and merge their streams.
    ///
    /// Fails if any channel fails to start.
    pub async fn start_all(&self) -> Result<MessageStream, ChannelError> {
        let mut streams = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            streams.push(channel.start().await?);
            tracing::info!(channel = channel.name(), "Channel started");
        }
        Ok(Box::pin(stream::select_all(streams)))
    }

    /// Send `response` over the channel `msg` arrived on.
    pub async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        self.get(&msg.channel)?.respond(msg, response).await
    }

    pub async fn health_check_all(&self) -> Vec<(String, Result<(), ChannelError>)> {
        let mut results = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            results.push((channel.name().to_string(), channel.health_check().await));
        }
        results
    }

    pub async fn shutdown_all(&self) -> Result<(), ChannelError> {
        for channel in &self.channels {
            if let Err(e) = channel.shutdown().await {
                tracing::warn!(channel = channel.name(), error = %e, "Channel shutdown failed");
            }
        }
        Ok(())
    }
}
