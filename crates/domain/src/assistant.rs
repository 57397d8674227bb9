use serde::{Deserialize, Serialize};

/// A configured assistant persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// System prompt used when a turn does not override it.
    pub prompt: String,
    pub gmt_create: String,
    pub gmt_modified: String,
    /// Last activity (creation, update, or a persisted turn).
    pub time_stamp: String,
}

/// Caller-supplied fields for creating or updating an assistant.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantDraft {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prompt: String,
}
