//! Shared domain types for the voiceassistant workspace.

pub mod assistant;
pub mod config;
pub mod error;
pub mod history;
pub mod stream;
pub mod tool;
pub mod trace;
