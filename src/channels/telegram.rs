//! Telegram channel: Bot API over long-polling or webhook.
//!
//! In polling mode a background task calls `getUpdates`. In webhook mode
//! Telegram pushes updates to `POST /telegram/webhook`, which is served by
//! the router returned from [`TelegramChannel::webhook_router`]. Both paths
//! feed the same queue and share [`parse_update`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use futures::stream;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, mpsc};

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to `getUpdates`, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause after a failed poll.
const POLL_BACKOFF: Duration = Duration::from_secs(5);

pub const WEBHOOK_PATH: &str = "/telegram/webhook";
pub const SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

/// How updates reach the bot.
#[derive(Debug, Clone)]
pub enum TelegramMode {
    Polling,
    /// `url` is the public base URL; the webhook path is appended.
    Webhook { url: String, secret: SecretString },
}

pub struct TelegramChannel {
    bot_token: SecretString,
    mode: TelegramMode,
    client: reqwest::Client,
    incoming_tx: mpsc::UnboundedSender<IncomingMessage>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<IncomingMessage>>>,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, mode: TelegramMode) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        // Must outlive the long-poll wait.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 15))
            .build()
            .unwrap_or_default();
        Self {
            bot_token,
            mode,
            client,
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    /// Routes for webhook mode. Empty in polling mode.
    pub fn webhook_router(&self) -> Router {
        match &self.mode {
            TelegramMode::Polling => Router::new(),
            TelegramMode::Webhook { secret, .. } => webhook_routes(WebhookState {
                secret: Arc::new(secret.clone()),
                tx: self.incoming_tx.clone(),
            }),
        }
    }

    /// Send a text message, splitting at Telegram's length limit.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(chat_id, &chunk).await?;
        }
        Ok(())
    }

    async fn send_message_chunk(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| send_failed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(send_failed(format!("sendMessage returned {status}: {err}")));
        }
        Ok(())
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| startup_failed(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            Err(startup_failed(format!("{method} returned {status}: {err}")))
        }
    }

    fn spawn_poller(&self) {
        let tx = self.incoming_tx.clone();
        let client = self.client.clone();
        let url = self.api_url("getUpdates");

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            tracing::info!("Telegram channel polling for updates");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message"]
                });

                let data: serde_json::Value = match client.post(&url).json(&body).send().await {
                    Ok(resp) => match resp.json().await {
                        Ok(d) => d,
                        Err(e) => {
                            tracing::warn!(error = %e, "Telegram parse error");
                            tokio::time::sleep(POLL_BACKOFF).await;
                            continue;
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "Telegram poll error");
                        tokio::time::sleep(POLL_BACKOFF).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(serde_json::Value::as_array)
                else {
                    tracing::warn!(response = %data, "Telegram getUpdates returned no result");
                    tokio::time::sleep(POLL_BACKOFF).await;
                    continue;
                };

                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64)
                    {
                        offset = uid + 1;
                    }
                    let Some(incoming) = parse_update(update) else {
                        continue;
                    };
                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });
    }
}

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: "telegram".into(),
        reason,
    }
}

fn startup_failed(reason: String) -> ChannelError {
    ChannelError::StartupFailed {
        name: "telegram".into(),
        reason,
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let rx = self
            .incoming_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| startup_failed("start() already called".to_string()))?;

        match &self.mode {
            TelegramMode::Polling => {
                // getUpdates is rejected while a webhook is registered.
                self.call("deleteWebhook", serde_json::json!({})).await?;
                self.spawn_poller();
            }
            TelegramMode::Webhook { url, secret } => {
                let full_url = format!("{}{WEBHOOK_PATH}", url.trim_end_matches('/'));
                self.call(
                    "setWebhook",
                    serde_json::json!({
                        "url": full_url,
                        "secret_token": secret.expose_secret(),
                        "allowed_updates": ["message"],
                    }),
                )
                .await?;
                tracing::info!(url = %full_url, "Telegram webhook registered");
            }
        }

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let chat_id = msg
            .metadata
            .get("chat_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| send_failed("No chat_id in message metadata".into()))?;

        self.send_message(chat_id, &response.content).await
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| startup_failed(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(startup_failed(format!("getMe returned {}", resp.status())))
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Webhook ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct WebhookState {
    secret: Arc<SecretString>,
    tx: mpsc::UnboundedSender<IncomingMessage>,
}

/// POST /telegram/webhook
///
/// Requests without the registered secret are rejected. Accepted updates
/// are acknowledged immediately and processed asynchronously.
async fn receive_update(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(update): Json<serde_json::Value>,
) -> StatusCode {
    let supplied = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    if supplied != Some(state.secret.expose_secret()) {
        tracing::warn!("Telegram webhook request with bad secret token");
        return StatusCode::UNAUTHORIZED;
    }

    if let Some(incoming) = parse_update(&update) {
        if state.tx.send(incoming).is_err() {
            tracing::error!("Telegram webhook queue closed");
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    }
    StatusCode::OK
}

fn webhook_routes(state: WebhookState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(receive_update))
        .with_state(state)
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Convert a Telegram update into an inbound message.
///
/// Only text messages are consumed. The chat id is the conversation
/// identifier.
pub fn parse_update(update: &serde_json::Value) -> Option<IncomingMessage> {
    let message = update.get("message")?;
    let text = message.get("text").and_then(serde_json::Value::as_str)?;
    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(serde_json::Value::as_i64)?
        .to_string();

    let from = message.get("from");
    let username = from
        .and_then(|f| f.get("username"))
        .and_then(serde_json::Value::as_str);
    let first_name = from
        .and_then(|f| f.get("first_name"))
        .and_then(serde_json::Value::as_str);

    let mut incoming = IncomingMessage::new("telegram", &chat_id, text).with_metadata(
        serde_json::json!({
            "chat_id": chat_id,
            "username": username,
        }),
    );
    if let Some(name) = first_name.or(username) {
        incoming = incoming.with_user_name(name);
    }
    Some(incoming)
}

/// Largest char boundary in `s` at or below `index`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    (0..=index).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let cut = floor_char_boundary(remaining, max_len);
        let chunk = &remaining[..cut];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(cut);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn text_update(chat_id: i64, text: &str) -> serde_json::Value {
        serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 1,
                "from": {"id": 42, "first_name": "Alice", "username": "alice"},
                "chat": {"id": chat_id, "type": "private"},
                "text": text
            }
        })
    }

    fn webhook_channel() -> TelegramChannel {
        TelegramChannel::new(
            SecretString::from("123:ABC"),
            TelegramMode::Webhook {
                url: "https://bot.example.com/".into(),
                secret: SecretString::from("s3cret"),
            },
        )
    }

    #[test]
    fn telegram_api_url() {
        let ch = TelegramChannel::new(SecretString::from("123:ABC"), TelegramMode::Polling);
        assert_eq!(ch.name(), "telegram");
        assert_eq!(
            ch.api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
    }

    #[test]
    fn parse_text_update_uses_chat_id() {
        let msg = parse_update(&text_update(99887766, "hello")).unwrap();
        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.user_id, "99887766");
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.user_name.as_deref(), Some("Alice"));
        assert_eq!(msg.metadata["chat_id"], "99887766");
    }

    #[test]
    fn parse_ignores_non_text_updates() {
        let photo = serde_json::json!({
            "update_id": 11,
            "message": {"chat": {"id": 1}, "photo": [{"file_id": "x"}]}
        });
        assert!(parse_update(&photo).is_none());

        let edited = serde_json::json!({
            "update_id": 12,
            "edited_message": {"chat": {"id": 1}, "text": "hi"}
        });
        assert!(parse_update(&edited).is_none());
    }

    #[test]
    fn parse_keeps_empty_text() {
        let msg = parse_update(&text_update(1, "")).unwrap();
        assert_eq!(msg.content, "");
    }

    fn webhook_request(secret: Option<&str>, body: &serde_json::Value) -> Request<Body> {
        let mut builder = Request::post(WEBHOOK_PATH).header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(SECRET_HEADER, secret);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn webhook_rejects_bad_secret() {
        let ch = webhook_channel();
        let router = ch.webhook_router();
        let resp = router
            .clone()
            .oneshot(webhook_request(Some("wrong"), &text_update(1, "hi")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = router
            .oneshot(webhook_request(None, &text_update(1, "hi")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn webhook_queues_text_messages() {
        let ch = webhook_channel();
        let router = ch.webhook_router();
        let resp = router
            .oneshot(webhook_request(Some("s3cret"), &text_update(7, "Alice")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let mut rx = ch.incoming_rx.lock().await.take().unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.user_id, "7");
        assert_eq!(msg.content, "Alice");
    }

    // ── Message splitting tests ─────────────────────────────────────

    #[test]
    fn split_message_short() {
        assert_eq!(split_message("Hello", 4096), vec!["Hello"]);
    }

    #[test]
    fn split_message_exact_limit() {
        let msg = "a".repeat(4096);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 4096);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks, vec!["a".repeat(2000), "b".repeat(3000)]);
    }

    #[test]
    fn split_message_no_good_split_point() {
        let msg = "a".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn split_message_respects_char_boundaries() {
        // 3-byte chars; 4096 is not a multiple of 3.
        let msg = "犬".repeat(2000);
        let chunks = split_message(&msg, 4096);
        assert!(chunks.iter().all(|c| c.len() <= 4096));
        assert_eq!(chunks.concat(), msg);
    }
}
