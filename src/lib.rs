//! Slot relay: forwards appointment-slot announcements from a Telegram group.

pub mod channels;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod pipeline;
pub mod store;
