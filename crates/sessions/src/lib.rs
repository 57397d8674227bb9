//! Persistence for assistants and their conversation histories.
//!
//! Both stores are file-backed under the configured state path:
//! `assistants.json` holds every assistant record, and each assistant's
//! history is an append-only `history/<assistantId>.jsonl`.

pub mod assistants;
pub mod history;

pub use assistants::AssistantStore;
pub use history::HistoryStore;
