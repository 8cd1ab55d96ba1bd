//! Messaging client abstraction.
//!
//! The relay only needs three things from the platform: find the source
//! group, list messages newer than the watermark, and send a message.

use async_trait::async_trait;

use crate::error::{FetchError, SendError, UpstreamError};
use crate::pipeline::types::{ChatRef, Message, MessageId};

/// Platform client used by the relay loop.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Short platform name, for logs.
    fn name(&self) -> &str;

    /// Resolve a group by `@username` or numeric id.
    async fn resolve_group(&self, name: &str) -> Result<ChatRef, UpstreamError>;

    /// Messages in `group` with id greater than `min_id`, oldest first,
    /// at most `limit` of them.
    async fn fetch_since(
        &self,
        group: &ChatRef,
        min_id: MessageId,
        limit: usize,
    ) -> Result<Vec<Message>, FetchError>;

    /// Send `text` to `destination`. `silent` delivers without a notification.
    async fn send(&self, destination: i64, text: &str, silent: bool) -> Result<(), SendError>;

    /// Release connections. Called once when the relay stops.
    async fn shutdown(&self) {}
}
