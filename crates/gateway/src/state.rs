use std::sync::Arc;

use va_domain::config::Config;
use va_sessions::{AssistantStore, HistoryStore};

use crate::runtime::{CancelMap, Orchestrator};

/// Shared application state passed to all API handlers.
///
/// The stores and the cancel map are the same instances the orchestrator
/// holds, so a handler and a running turn always see one view of them.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,

    // ── Storage ───────────────────────────────────────────────────────
    pub assistants: Arc<AssistantStore>,
    pub history: HistoryStore,

    // ── Runtime ───────────────────────────────────────────────────────
    /// In-flight turn per assistant, for the stop endpoint.
    pub cancel_map: Arc<CancelMap>,
}
