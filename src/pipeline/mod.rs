//! Slot relay pipeline.
//!
//! Every message from the source group flows through:
//! 1. `MessagingClient::fetch_since()`: platform I/O
//! 2. `Classifier::evaluate()`: slot-availability patterns
//! 3. `Forwarder::forward()`: broadcast accepted messages
//! 4. `StateStore::save()`: persist the watermark per finalized message
//!
//! `Relay` drives the cycle and owns the heartbeat.

pub mod classifier;
pub mod forwarder;
pub mod heartbeat;
pub mod relay;
pub mod types;

pub use classifier::{Classifier, Decision, Reason, classify};
pub use forwarder::Forwarder;
pub use heartbeat::{Heartbeat, HeartbeatStatus};
pub use relay::{CycleReport, Relay};
pub use types::{ChatRef, Message, MessageId, Outcome, Watermark};
