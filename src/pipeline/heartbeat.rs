//! Periodic "still alive" summary sent to the broadcast destination.
//!
//! Counts suppressed messages between heartbeats. When the interval has
//! elapsed, a silent summary is sent and the counter starts over. A failed
//! send keeps both the counter and the clock, so the next cycle retries.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};

use crate::pipeline::forwarder::Forwarder;

/// What a heartbeat check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    NotDue,
    /// Summary sent; carries the count it reported.
    Sent(u64),
    Failed,
}

#[derive(Debug)]
pub struct Heartbeat {
    interval: TimeDelta,
    interval_hours: u64,
    last_sent: DateTime<Utc>,
    suppressed: u64,
}

impl Heartbeat {
    /// Start the clock at `started_at` with an interval in hours.
    pub fn new(interval_hours: u64, started_at: DateTime<Utc>) -> Self {
        let interval = i64::try_from(interval_hours)
            .ok()
            .and_then(TimeDelta::try_hours)
            .unwrap_or(TimeDelta::MAX);
        Self {
            interval,
            interval_hours,
            last_sent: started_at,
            suppressed: 0,
        }
    }

    pub fn last_sent(&self) -> DateTime<Utc> {
        self.last_sent
    }

    /// Suppressed messages since the last heartbeat.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    pub fn record_suppressed(&mut self) {
        self.suppressed = self.suppressed.saturating_add(1);
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_sent) >= self.interval
    }

    /// The summary text for the current count.
    pub fn summary(&self) -> String {
        format!(
            "ignored {} messages in the last {} hours",
            self.suppressed, self.interval_hours
        )
    }

    /// Send the summary if the interval has elapsed at `now`.
    pub async fn tick(&mut self, forwarder: &Forwarder, now: DateTime<Utc>) -> HeartbeatStatus {
        if !self.is_due(now) {
            return HeartbeatStatus::NotDue;
        }

        let summary = self.summary();
        match forwarder.notify_silently(&summary).await {
            Ok(()) => {
                let reported = self.suppressed;
                info!(suppressed = reported, "💓 Heartbeat sent");
                self.suppressed = 0;
                self.last_sent = now;
                HeartbeatStatus::Sent(reported)
            }
            Err(e) => {
                warn!(error = %e, suppressed = self.suppressed, "Heartbeat failed, will retry next cycle");
                HeartbeatStatus::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::channels::MessagingClient;
    use crate::error::{FetchError, SendError, UpstreamError};
    use crate::pipeline::types::{ChatRef, Message, MessageId};

    /// Records sends; fails them while `failing` is set.
    #[derive(Default)]
    struct RecordingClient {
        sent: Mutex<Vec<(String, bool)>>,
        failing: Mutex<bool>,
    }

    #[async_trait]
    impl MessagingClient for RecordingClient {
        fn name(&self) -> &str {
            "recording"
        }
        async fn resolve_group(&self, _name: &str) -> Result<ChatRef, UpstreamError> {
            unimplemented!("not used in heartbeat tests")
        }
        async fn fetch_since(
            &self,
            _group: &ChatRef,
            _min_id: MessageId,
            _limit: usize,
        ) -> Result<Vec<Message>, FetchError> {
            unimplemented!("not used in heartbeat tests")
        }
        async fn send(&self, _dest: i64, text: &str, silent: bool) -> Result<(), SendError> {
            if *self.failing.lock().unwrap() {
                return Err(SendError::Failed("offline".into()));
            }
            self.sent.lock().unwrap().push((text.to_string(), silent));
            Ok(())
        }
    }

    fn setup() -> (Arc<RecordingClient>, Forwarder, DateTime<Utc>) {
        let client = Arc::new(RecordingClient::default());
        let forwarder = Forwarder::new(client.clone(), -100);
        let t0 = DateTime::parse_from_rfc3339("2024-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        (client, forwarder, t0)
    }

    #[tokio::test]
    async fn not_due_before_interval() {
        let (client, forwarder, t0) = setup();
        let mut hb = Heartbeat::new(1, t0);
        hb.record_suppressed();
        hb.record_suppressed();

        let status = hb.tick(&forwarder, t0 + TimeDelta::minutes(59)).await;

        assert_eq!(status, HeartbeatStatus::NotDue);
        assert_eq!(hb.suppressed(), 2);
        assert!(client.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sends_and_resets_after_interval() {
        let (client, forwarder, t0) = setup();
        let mut hb = Heartbeat::new(1, t0);
        for _ in 0..7 {
            hb.record_suppressed();
        }

        let now = t0 + TimeDelta::minutes(61);
        let status = hb.tick(&forwarder, now).await;

        assert_eq!(status, HeartbeatStatus::Sent(7));
        assert_eq!(hb.suppressed(), 0);
        assert_eq!(hb.last_sent(), now);
        assert_eq!(
            *client.sent.lock().unwrap(),
            vec![("ignored 7 messages in the last 1 hours".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn due_exactly_at_interval() {
        let (_client, forwarder, t0) = setup();
        let mut hb = Heartbeat::new(4, t0);
        let status = hb.tick(&forwarder, t0 + TimeDelta::hours(4)).await;
        assert_eq!(status, HeartbeatStatus::Sent(0));
    }

    #[tokio::test]
    async fn failure_keeps_counter_and_clock() {
        let (client, forwarder, t0) = setup();
        let mut hb = Heartbeat::new(1, t0);
        hb.record_suppressed();
        *client.failing.lock().unwrap() = true;

        let status = hb.tick(&forwarder, t0 + TimeDelta::minutes(90)).await;
        assert_eq!(status, HeartbeatStatus::Failed);
        assert_eq!(hb.suppressed(), 1);
        assert_eq!(hb.last_sent(), t0);

        // Retried on the next qualifying cycle.
        *client.failing.lock().unwrap() = false;
        hb.record_suppressed();
        let status = hb.tick(&forwarder, t0 + TimeDelta::minutes(91)).await;
        assert_eq!(status, HeartbeatStatus::Sent(2));
    }

    #[test]
    fn huge_interval_never_overflows() {
        let t0 = Utc::now();
        let hb = Heartbeat::new(u64::MAX, t0);
        assert!(!hb.is_due(t0 + TimeDelta::days(365 * 100)));
    }
}
