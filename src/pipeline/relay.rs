//! The fetch → classify → forward → persist loop.
//!
//! One cycle:
//! 1. Fetch messages newer than the watermark (oldest first)
//! 2. Classify every fetched message once
//! 3. Drain in id order. Suppressed messages are finalized immediately,
//!    forwarded ones after a successful send. The watermark is persisted
//!    after every finalized message.
//! 4. Heartbeat check
//! 5. Idle sleep
//!
//! A message whose send fails is not finalized, and the drain stops there.
//! The watermark stays below it, so the next cycle fetches it again along
//! with everything after it.
//!
//! Shutdown is observed while awaiting the fetch, sends and sleeps. State
//! writes are never interrupted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::channels::MessagingClient;
use crate::config::RelayConfig;
use crate::error::{ForwardError, StateError};
use crate::pipeline::classifier::{Classifier, Decision};
use crate::pipeline::forwarder::Forwarder;
use crate::pipeline::heartbeat::{Heartbeat, HeartbeatStatus};
use crate::pipeline::types::{ChatRef, Message, MessageId, Outcome, Watermark};
use crate::store::StateStore;

/// Summary of one polling cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// New messages classified this cycle.
    pub fetched: usize,
    /// Returned by the client but already covered by the watermark.
    pub skipped: usize,
    pub forwarded: usize,
    pub suppressed: usize,
    /// Rate-limit backoffs taken.
    pub rate_limit_waits: usize,
    pub fetch_failed: bool,
    /// Message whose send failed; the drain stopped before it.
    pub stopped_at: Option<MessageId>,
    pub heartbeat: HeartbeatStatus,
    /// Shutdown was requested mid-cycle.
    pub cancelled: bool,
    /// Watermark at the end of the cycle.
    pub watermark: Watermark,
}

impl CycleReport {
    fn new(watermark: Watermark) -> Self {
        Self {
            fetched: 0,
            skipped: 0,
            forwarded: 0,
            suppressed: 0,
            rate_limit_waits: 0,
            fetch_failed: false,
            stopped_at: None,
            heartbeat: HeartbeatStatus::NotDue,
            cancelled: false,
            watermark,
        }
    }
}

/// Result of trying to deliver one message.
enum Delivery {
    Sent,
    GaveUp(String),
    Cancelled,
}

/// Long-running relay task. Owns the watermark and the suppressed counter.
pub struct Relay {
    client: Arc<dyn MessagingClient>,
    forwarder: Forwarder,
    classifier: Classifier,
    store: StateStore,
    group: ChatRef,
    watermark: Watermark,
    heartbeat: Heartbeat,
    fetch_limit: usize,
    fetch_interval: Duration,
    floodwait_delay: u64,
    max_rate_limit_retries: u32,
}

impl Relay {
    /// Load the persisted watermark and build a relay for `group`.
    pub async fn open(
        config: &RelayConfig,
        client: Arc<dyn MessagingClient>,
        group: ChatRef,
        destination: i64,
    ) -> Result<Self, StateError> {
        let mut store = StateStore::new(&config.state_file_path);
        let watermark = store.load().await?;

        Ok(Self {
            forwarder: Forwarder::new(Arc::clone(&client), destination),
            client,
            classifier: Classifier::default(),
            store,
            group,
            watermark,
            heartbeat: Heartbeat::new(config.heartbeat_interval_hours, Utc::now()),
            fetch_limit: config.message_fetch_limit,
            fetch_interval: config.message_fetch_interval,
            floodwait_delay: config.floodwait_delay,
            max_rate_limit_retries: config.max_rate_limit_retries,
        })
    }

    /// Replace the built-in slot patterns.
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// Suppressed messages since the last heartbeat.
    pub fn suppressed(&self) -> u64 {
        self.heartbeat.suppressed()
    }

    /// Poll until shutdown is signalled or the shutdown sender is dropped.
    ///
    /// Only a state write failure ends the loop with an error.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), StateError> {
        info!(
            client = self.client.name(),
            group = %self.group.title,
            watermark = self.watermark.get(),
            interval_secs = self.fetch_interval.as_secs(),
            "Relay started"
        );

        let result = loop {
            match self.run_cycle(&mut shutdown).await {
                Err(e) => break Err(e),
                Ok(report) if report.cancelled => break Ok(()),
                Ok(report) => log_report(&report),
            }

            if cancellable(&mut shutdown, tokio::time::sleep(self.fetch_interval))
                .await
                .is_none()
            {
                break Ok(());
            }
        };

        if let Err(ref e) = result {
            error!(error = %e, "Relay stopping on state error");
        }
        self.client.shutdown().await;
        info!(watermark = self.watermark.get(), "Relay stopped");
        result
    }

    /// Run one cycle, checking the heartbeat against the current time.
    pub async fn run_cycle(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<CycleReport, StateError> {
        self.run_cycle_at(Utc::now(), shutdown).await
    }

    /// Run one cycle, checking the heartbeat against `now`.
    pub async fn run_cycle_at(
        &mut self,
        now: DateTime<Utc>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<CycleReport, StateError> {
        let mut report = CycleReport::new(self.watermark);

        // ── Fetch ────────────────────────────────────────────────────
        let fetch = self
            .client
            .fetch_since(&self.group, self.watermark.get(), self.fetch_limit);
        let fetched = match cancellable(shutdown, fetch).await {
            None => {
                report.cancelled = true;
                return Ok(report);
            }
            Some(Ok(messages)) => messages,
            Some(Err(e)) => {
                error!(group = %self.group.title, error = %e, "Fetch failed");
                report.fetch_failed = true;
                Vec::new()
            }
        };

        // ── Classify ─────────────────────────────────────────────────
        let mut fresh: Vec<Message> = Vec::with_capacity(fetched.len());
        for message in fetched {
            if self.watermark.covers(message.id) {
                debug!(id = message.id, watermark = self.watermark.get(), "Skipping already processed message");
                report.skipped += 1;
            } else {
                fresh.push(message);
            }
        }
        fresh.sort_by_key(|m| m.id);
        fresh.dedup_by_key(|m| m.id);

        let batch: Vec<(Message, Decision)> = fresh
            .into_iter()
            .map(|m| {
                let decision = self.classifier.evaluate(&m.text, m.silent);
                debug!(
                    id = m.id,
                    outcome = decision.outcome.label(),
                    reason = %decision.reason,
                    "Classified message"
                );
                (m, decision)
            })
            .collect();
        report.fetched = batch.len();

        // ── Drain ────────────────────────────────────────────────────
        self.drain(batch, &mut report, shutdown).await?;
        report.watermark = self.watermark;
        if report.cancelled {
            return Ok(report);
        }

        // ── Heartbeat ────────────────────────────────────────────────
        match cancellable(shutdown, self.heartbeat.tick(&self.forwarder, now)).await {
            Some(status) => report.heartbeat = status,
            None => report.cancelled = true,
        }

        Ok(report)
    }

    async fn drain(
        &mut self,
        batch: Vec<(Message, Decision)>,
        report: &mut CycleReport,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), StateError> {
        let mut consecutive_forwards: u64 = 0;

        for (message, decision) in batch {
            match decision.outcome {
                Outcome::Suppress => {
                    self.finalize(message.id).await?;
                    self.heartbeat.record_suppressed();
                    report.suppressed += 1;
                    info!(id = message.id, reason = %decision.reason, "⏭ Suppressed");
                }
                Outcome::Forward => {
                    let delivery = self.deliver(&message, report, shutdown).await;
                    match delivery {
                        Delivery::Sent => {
                            self.finalize(message.id).await?;
                            report.forwarded += 1;
                            info!(id = message.id, reason = %decision.reason, "✅ Forwarded");

                            consecutive_forwards += 1;
                            if self.floodwait_delay > 0
                                && consecutive_forwards >= self.floodwait_delay
                            {
                                consecutive_forwards = 0;
                                let pause = Duration::from_secs(self.floodwait_delay);
                                debug!(pause_secs = self.floodwait_delay, "Pausing between forwards");
                                if cancellable(shutdown, tokio::time::sleep(pause)).await.is_none() {
                                    report.cancelled = true;
                                    return Ok(());
                                }
                            }
                        }
                        Delivery::GaveUp(reason) => {
                            error!(
                                id = message.id,
                                reason = %reason,
                                "❌ Forward failed, will retry next cycle"
                            );
                            report.stopped_at = Some(message.id);
                            return Ok(());
                        }
                        Delivery::Cancelled => {
                            warn!(id = message.id, "Shutdown during forward, message left for next run");
                            report.cancelled = true;
                            return Ok(());
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Send one message, backing off on rate limits up to the retry budget.
    async fn deliver(
        &self,
        message: &Message,
        report: &mut CycleReport,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Delivery {
        let mut retries: u32 = 0;

        loop {
            match cancellable(shutdown, self.forwarder.forward(&message.text)).await {
                None => return Delivery::Cancelled,
                Some(Ok(())) => return Delivery::Sent,
                Some(Err(ForwardError::Transient(reason))) => return Delivery::GaveUp(reason),
                Some(Err(ForwardError::RateLimited { wait })) => {
                    if retries >= self.max_rate_limit_retries {
                        return Delivery::GaveUp(format!(
                            "still rate limited after {retries} retries"
                        ));
                    }
                    retries += 1;
                    report.rate_limit_waits += 1;
                    warn!(
                        id = message.id,
                        wait_secs = wait.as_secs(),
                        attempt = retries,
                        "Rate limited, backing off"
                    );
                    if cancellable(shutdown, tokio::time::sleep(wait)).await.is_none() {
                        return Delivery::Cancelled;
                    }
                }
            }
        }
    }

    /// Advance the watermark past `id` and persist it.
    async fn finalize(&mut self, id: MessageId) -> Result<(), StateError> {
        if self.watermark.advance(id) {
            self.store.save(self.watermark).await?;
        }
        Ok(())
    }
}

/// Await `fut` unless shutdown is signalled first.
async fn cancellable<F: Future>(
    shutdown: &mut watch::Receiver<bool>,
    fut: F,
) -> Option<F::Output> {
    if *shutdown.borrow() {
        return None;
    }
    tokio::select! {
        biased;
        _ = shutdown_requested(shutdown) => None,
        out = fut => Some(out),
    }
}

/// Resolves once the flag is set or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn log_report(report: &CycleReport) {
    if report.fetched == 0 && !report.fetch_failed {
        debug!(watermark = report.watermark.get(), "No new messages");
        return;
    }
    info!(
        fetched = report.fetched,
        forwarded = report.forwarded,
        suppressed = report.suppressed,
        skipped = report.skipped,
        watermark = report.watermark.get(),
        stopped_at = ?report.stopped_at,
        "Cycle complete"
    );
}
