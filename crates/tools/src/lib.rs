//! The web-search tool offered to the model.
//!
//! - [`search`]: the search backend seam and the Bocha web-search client
//! - [`executor`]: turns a model tool call into a tool-result message, with retry
//! - [`format`]: renders search hits for the model

pub mod executor;
pub mod format;
pub mod search;

pub use executor::{SearchToolExecutor, WEB_SEARCH_TOOL};
pub use search::{BochaClient, SearchBackend, SearchHit, SearchQuery};
