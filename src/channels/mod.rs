//! Messaging platform access.

pub mod client;
pub mod telegram;

pub use client::MessagingClient;
pub use telegram::TelegramClient;
