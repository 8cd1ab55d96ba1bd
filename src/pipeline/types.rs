//! Shared types for the relay pipeline.

use serde::{Deserialize, Serialize};

/// Platform-assigned message identifier. Monotonic within a chat.
pub type MessageId = u64;

// ── Inbound message ─────────────────────────────────────────────────

/// A message fetched from the source group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Text body, or caption for media posts. Empty if neither.
    pub text: String,
    /// Posted without notification.
    pub silent: bool,
}

impl Message {
    pub fn new(id: MessageId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            silent: false,
        }
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

// ── Classification outcome ──────────────────────────────────────────

/// What to do with a fetched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Announces an open slot. Send it to the broadcast destination.
    Forward,
    /// Noise. Count it for the next heartbeat and move on.
    Suppress,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Suppress => "suppress",
        }
    }
}

// ── Watermark ───────────────────────────────────────────────────────

/// Highest message id that has been fully processed.
///
/// Never moves backwards: [`Watermark::advance`] ignores lower ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(MessageId);

impl Watermark {
    pub const fn new(id: MessageId) -> Self {
        Self(id)
    }

    pub const fn get(self) -> MessageId {
        self.0
    }

    /// Whether a message with this id was already processed.
    pub fn covers(self, id: MessageId) -> bool {
        id <= self.0
    }

    /// Move forward to `id`. Returns `true` if the watermark changed.
    pub fn advance(&mut self, id: MessageId) -> bool {
        if id > self.0 {
            self.0 = id;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Chat reference ──────────────────────────────────────────────────

/// A resolved chat on the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRef {
    pub id: i64,
    /// Human-readable title or username, for logs.
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_never_moves_backwards() {
        let mut wm = Watermark::new(100);
        assert!(!wm.advance(99));
        assert!(!wm.advance(100));
        assert_eq!(wm.get(), 100);
        assert!(wm.advance(103));
        assert_eq!(wm.get(), 103);
    }

    #[test]
    fn watermark_covers_processed_ids() {
        let wm = Watermark::new(100);
        assert!(wm.covers(1));
        assert!(wm.covers(100));
        assert!(!wm.covers(101));
        assert!(!Watermark::default().covers(1));
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(Outcome::Forward.label(), "forward");
        assert_eq!(Outcome::Suppress.label(), "suppress");
        assert_eq!(
            serde_json::to_string(&Outcome::Suppress).unwrap(),
            "\"suppress\""
        );
    }
}
