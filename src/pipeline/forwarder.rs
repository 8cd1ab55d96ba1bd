//! Sends accepted messages to the broadcast destination.
//!
//! The forwarder never sleeps. A rate-limit answer comes back as
//! [`ForwardError::RateLimited`] with the wait the platform asked for, and the
//! relay loop decides when to try again.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::channels::MessagingClient;
use crate::error::ForwardError;

pub struct Forwarder {
    client: Arc<dyn MessagingClient>,
    destination: i64,
}

impl Forwarder {
    pub fn new(client: Arc<dyn MessagingClient>, destination: i64) -> Self {
        Self {
            client,
            destination,
        }
    }

    /// Send a message body to the destination with a notification.
    pub async fn forward(&self, text: &str) -> Result<(), ForwardError> {
        self.send(text, false).await
    }

    /// Send a low-priority message (no notification sound).
    pub async fn notify_silently(&self, text: &str) -> Result<(), ForwardError> {
        self.send(text, true).await
    }

    async fn send(&self, text: &str, silent: bool) -> Result<(), ForwardError> {
        match self.client.send(self.destination, text, silent).await {
            Ok(()) => {
                debug!(destination = self.destination, silent, "Message sent");
                Ok(())
            }
            Err(e) => {
                let err = ForwardError::from(e);
                if let ForwardError::Transient(ref reason) = err {
                    warn!(destination = self.destination, reason = %reason, "Send failed");
                }
                Err(err)
            }
        }
    }
}
