//! Persistence layer. The relay only persists a single watermark.

pub mod state_file;

pub use state_file::{StateFile, StateStore};
