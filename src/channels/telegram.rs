//! Telegram Bot API client.
//!
//! Reads the source group through `getUpdates` (the bot must be a member,
//! or an admin for channels) and sends through `sendMessage`.
//!
//! Updates are only confirmed to Telegram once they are irrelevant or already
//! below the watermark. Anything the relay has not finalized stays queued on
//! Telegram's side, so a restart sees it again.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::channels::client::MessagingClient;
use crate::error::{FetchError, SendError, UpstreamError};
use crate::pipeline::types::{ChatRef, Message, MessageId};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// `getUpdates` returns at most this many updates per call.
const MAX_UPDATES_PER_CALL: usize = 100;

/// Used when a 429 response carries no `retry_after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

// ── Wire types ──────────────────────────────────────────────────────

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TgMessage>,
    channel_post: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    chat: TgChat,
    text: Option<String>,
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
    title: Option<String>,
    username: Option<String>,
}

// ── Client ──────────────────────────────────────────────────────────

/// Telegram client backed by the Bot API.
pub struct TelegramClient {
    bot_token: SecretString,
    api_base: String,
    client: reqwest::Client,
    /// Next `getUpdates` offset. Everything below it is confirmed.
    offset: AtomicI64,
}

impl TelegramClient {
    pub fn new(bot_token: SecretString) -> Self {
        Self::with_api_base(bot_token, TELEGRAM_API_BASE)
    }

    /// Point the client at a different Bot API server.
    pub fn with_api_base(bot_token: SecretString, api_base: impl Into<String>) -> Self {
        Self {
            bot_token,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            offset: AtomicI64::new(0),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }
}

#[async_trait]
impl MessagingClient for TelegramClient {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn resolve_group(&self, name: &str) -> Result<ChatRef, UpstreamError> {
        let chat_id = normalize_chat_id(name);
        let lookup_failed = |reason: String| UpstreamError::LookupFailed {
            name: name.to_string(),
            reason,
        };

        let resp = self
            .client
            .post(self.api_url("getChat"))
            .json(&serde_json::json!({ "chat_id": chat_id }))
            .send()
            .await
            .map_err(|e| lookup_failed(e.to_string()))?;

        let body: ApiResponse<TgChat> = resp
            .json()
            .await
            .map_err(|e| lookup_failed(format!("invalid getChat response: {e}")))?;

        match body {
            ApiResponse {
                ok: true,
                result: Some(chat),
                ..
            } => {
                let title = chat
                    .title
                    .or(chat.username.map(|u| format!("@{u}")))
                    .unwrap_or_else(|| name.to_string());
                info!(chat_id = chat.id, title = %title, "Resolved source group");
                Ok(ChatRef { id: chat.id, title })
            }
            ApiResponse { description, .. } => Err(UpstreamError::GroupNotFound {
                name: name.to_string(),
                reason: description.unwrap_or_else(|| "getChat returned no chat".into()),
            }),
        }
    }

    async fn fetch_since(
        &self,
        group: &ChatRef,
        min_id: MessageId,
        limit: usize,
    ) -> Result<Vec<Message>, FetchError> {
        let offset = self.offset.load(Ordering::Relaxed);
        let body = serde_json::json!({
            "offset": offset,
            "timeout": 0,
            "limit": limit.clamp(1, MAX_UPDATES_PER_CALL),
            "allowed_updates": ["message", "channel_post"],
        });

        let resp = self
            .client
            .post(self.api_url("getUpdates"))
            .json(&body)
            .send()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;

        let data: ApiResponse<Vec<Update>> = resp
            .json()
            .await
            .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;

        if !data.ok {
            return Err(FetchError::Api(
                data.description.unwrap_or_else(|| "getUpdates failed".into()),
            ));
        }

        let updates = data.result.unwrap_or_default();
        let batch = plan_batch(updates, group.id, min_id, limit);

        if let Some(next) = batch.next_offset {
            self.offset.fetch_max(next, Ordering::Relaxed);
        }
        debug!(
            count = batch.messages.len(),
            offset = self.offset.load(Ordering::Relaxed),
            "Fetched updates"
        );

        Ok(batch.messages)
    }

    async fn send(&self, destination: i64, text: &str, silent: bool) -> Result<(), SendError> {
        let body = serde_json::json!({
            "chat_id": destination,
            "text": text,
            "disable_notification": silent,
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| SendError::Failed(e.to_string()))?;

        let status = resp.status().as_u16();
        let data: ApiResponse<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| SendError::Failed(format!("HTTP {status}, unreadable body: {e}")))?;

        send_result(status, data)
    }

    async fn shutdown(&self) {
        info!("Telegram client shutting down");
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Bare usernames get an `@`; numeric ids and `@names` pass through.
fn normalize_chat_id(name: &str) -> String {
    let name = name.trim();
    if name.starts_with('@') || name.parse::<i64>().is_ok() {
        name.to_string()
    } else {
        format!("@{name}")
    }
}

/// Messages selected from one `getUpdates` call.
#[derive(Debug, Default)]
struct Batch {
    messages: Vec<Message>,
    /// Offset confirming the leading run of updates we no longer need.
    next_offset: Option<i64>,
}

/// Pick the group's messages above `min_id` and work out how far the update
/// queue can be confirmed.
fn plan_batch(mut updates: Vec<Update>, chat_id: i64, min_id: MessageId, limit: usize) -> Batch {
    updates.sort_by_key(|u| u.update_id);

    let mut batch = Batch::default();
    let mut confirming = true;

    for update in updates {
        let wanted = update
            .channel_post
            .or(update.message)
            .filter(|m| m.chat.id == chat_id)
            .and_then(|m| u64::try_from(m.message_id).ok().map(|id| (id, m)))
            .filter(|(id, _)| *id > min_id);

        match wanted {
            Some((id, m)) => {
                confirming = false;
                let text = m.text.or(m.caption).unwrap_or_default();
                batch.messages.push(Message {
                    id,
                    text,
                    // Not exposed by the Bot API.
                    silent: false,
                });
            }
            None if confirming => batch.next_offset = Some(update.update_id + 1),
            None => {}
        }
    }

    batch.messages.sort_by_key(|m| m.id);
    batch.messages.dedup_by_key(|m| m.id);
    batch.messages.truncate(limit);
    batch
}

/// Map a `sendMessage` response to the client's result.
fn send_result(status: u16, data: ApiResponse<serde_json::Value>) -> Result<(), SendError> {
    if data.ok && (200..300).contains(&status) {
        return Ok(());
    }

    if status == 429 || data.error_code == Some(429) {
        let secs = data
            .parameters
            .and_then(|p| p.retry_after)
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        warn!(retry_after = secs, "Telegram rate limit hit");
        return Err(SendError::RateLimited {
            retry_after: Duration::from_secs(secs),
        });
    }

    Err(SendError::Failed(format!(
        "sendMessage failed (HTTP {status}): {}",
        data.description.unwrap_or_default()
    )))
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn updates(json: serde_json::Value) -> Vec<Update> {
        serde_json::from_value(json).unwrap()
    }

    fn response(json: serde_json::Value) -> ApiResponse<serde_json::Value> {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn telegram_client_name() {
        let client = TelegramClient::new(SecretString::from("fake-token"));
        assert_eq!(client.name(), "telegram");
    }

    #[test]
    fn telegram_api_url() {
        let client = TelegramClient::new(SecretString::from("123:ABC"));
        assert_eq!(
            client.api_url("getUpdates"),
            "https://api.telegram.org/bot123:ABC/getUpdates"
        );
    }

    #[test]
    fn custom_api_base_strips_trailing_slash() {
        let client =
            TelegramClient::with_api_base(SecretString::from("t"), "http://localhost:8081/");
        assert_eq!(client.api_url("getMe"), "http://localhost:8081/bott/getMe");
    }

    #[test]
    fn chat_id_normalization() {
        assert_eq!(normalize_chat_id("visa_slots"), "@visa_slots");
        assert_eq!(normalize_chat_id("@visa_slots"), "@visa_slots");
        assert_eq!(normalize_chat_id("-1001234567890"), "-1001234567890");
        assert_eq!(normalize_chat_id("  @padded "), "@padded");
    }

    #[test]
    fn plan_batch_filters_group_and_watermark() {
        let batch = plan_batch(
            updates(serde_json::json!([
                {"update_id": 10, "channel_post": {"message_id": 99, "chat": {"id": -5}, "text": "old"}},
                {"update_id": 11, "channel_post": {"message_id": 101, "chat": {"id": -5}, "text": "no slots"}},
                {"update_id": 12, "message": {"message_id": 7, "chat": {"id": 42}, "text": "other chat"}},
                {"update_id": 13, "channel_post": {"message_id": 102, "chat": {"id": -5}, "caption": "open"}},
            ])),
            -5,
            100,
            100,
        );

        let ids: Vec<_> = batch.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![101, 102]);
        assert_eq!(batch.messages[1].text, "open");
        // Only update 10 precedes the first unprocessed message.
        assert_eq!(batch.next_offset, Some(11));
    }

    #[test]
    fn plan_batch_confirms_everything_when_nothing_is_pending() {
        let batch = plan_batch(
            updates(serde_json::json!([
                {"update_id": 20, "channel_post": {"message_id": 50, "chat": {"id": -5}, "text": "x"}},
                {"update_id": 21, "message": {"message_id": 8, "chat": {"id": 42}, "text": "y"}},
            ])),
            -5,
            50,
            100,
        );
        assert!(batch.messages.is_empty());
        assert_eq!(batch.next_offset, Some(22));
    }

    #[test]
    fn plan_batch_sorts_dedups_and_limits() {
        let batch = plan_batch(
            updates(serde_json::json!([
                {"update_id": 3, "channel_post": {"message_id": 205, "chat": {"id": -5}, "text": "c"}},
                {"update_id": 1, "channel_post": {"message_id": 203, "chat": {"id": -5}, "text": "a"}},
                {"update_id": 2, "channel_post": {"message_id": 204, "chat": {"id": -5}, "text": "b"}},
                {"update_id": 4, "channel_post": {"message_id": 204, "chat": {"id": -5}, "text": "b"}},
            ])),
            -5,
            0,
            2,
        );
        let ids: Vec<_> = batch.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![203, 204]);
        assert_eq!(batch.next_offset, None);
    }

    #[test]
    fn plan_batch_media_without_caption_is_empty_text() {
        let batch = plan_batch(
            updates(serde_json::json!([
                {"update_id": 1, "channel_post": {"message_id": 9, "chat": {"id": -5}}},
            ])),
            -5,
            0,
            10,
        );
        assert_eq!(batch.messages, vec![Message::new(9, "")]);
    }

    #[test]
    fn send_result_ok() {
        let data = response(serde_json::json!({"ok": true, "result": {"message_id": 1}}));
        assert!(send_result(200, data).is_ok());
    }

    #[test]
    fn send_result_rate_limited_uses_retry_after() {
        let data = response(serde_json::json!({
            "ok": false,
            "error_code": 429,
            "description": "Too Many Requests: retry after 17",
            "parameters": {"retry_after": 17}
        }));
        match send_result(429, data) {
            Err(SendError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(17));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn send_result_rate_limited_without_parameters() {
        let data = response(serde_json::json!({"ok": false, "error_code": 429}));
        assert!(matches!(
            send_result(429, data),
            Err(SendError::RateLimited { retry_after }) if retry_after == Duration::from_secs(DEFAULT_RETRY_AFTER_SECS)
        ));
    }

    #[test]
    fn send_result_other_error_is_failed() {
        let data = response(serde_json::json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: chat not found"
        }));
        match send_result(400, data) {
            Err(SendError::Failed(reason)) => assert!(reason.contains("chat not found")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    // ── Network error tests (expected to fail with no server) ───────

    #[tokio::test]
    async fn send_without_server_is_a_transient_failure() {
        let client = TelegramClient::with_api_base(SecretString::from("t"), "http://127.0.0.1:9");
        let result = client.send(1, "hello", false).await;
        assert!(matches!(result, Err(SendError::Failed(_))));
    }

    #[tokio::test]
    async fn resolve_without_server_is_a_lookup_failure() {
        let client = TelegramClient::with_api_base(SecretString::from("t"), "http://127.0.0.1:9");
        let result = client.resolve_group("@visa_slots").await;
        assert!(matches!(result, Err(UpstreamError::LookupFailed { .. })));
    }
}
