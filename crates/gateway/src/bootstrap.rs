//! AppState construction extracted from `main.rs`.
//!
//! [`build_app_state`] wires the real HTTP clients from config;
//! [`assemble`] takes the two outbound seams as trait objects so tests can
//! boot the same state against stubs.

use std::sync::Arc;

use anyhow::Context;

use va_domain::config::{Config, ConfigSeverity};
use va_providers::{ChatTransport, OpenAiCompatTransport};
use va_sessions::{AssistantStore, HistoryStore};
use va_tools::{BochaClient, SearchBackend, SearchToolExecutor};

use crate::runtime::{CancelMap, Orchestrator};
use crate::state::AppState;

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Chat transport ───────────────────────────────────────────────
    let transport: Arc<dyn ChatTransport> = Arc::new(
        OpenAiCompatTransport::from_config(&config.llm).context("initializing chat transport")?,
    );
    tracing::info!(
        base_url = %config.llm.base_url,
        model = %config.llm.model,
        "chat transport ready"
    );

    // ── Web search ───────────────────────────────────────────────────
    let search: Arc<dyn SearchBackend> = Arc::new(
        BochaClient::from_config(&config.search).context("initializing search client")?,
    );
    tracing::info!(base_url = %config.search.base_url, "search client ready");

    assemble(config, transport, search)
}

/// Build the stores and the orchestrator around the given outbound clients.
pub fn assemble(
    config: Arc<Config>,
    transport: Arc<dyn ChatTransport>,
    search: Arc<dyn SearchBackend>,
) -> anyhow::Result<AppState> {
    // ── Storage ──────────────────────────────────────────────────────
    let state_path = &config.storage.state_path;
    let assistants = Arc::new(
        AssistantStore::new(state_path).context("initializing assistant store")?,
    );
    let history = HistoryStore::new(state_path).context("initializing history store")?;
    tracing::info!(
        path = %state_path.display(),
        assistants = assistants.list().len(),
        "stores ready"
    );

    // ── Runtime ──────────────────────────────────────────────────────
    let cancel_map = Arc::new(CancelMap::new());
    let executor = Arc::new(SearchToolExecutor::new(search, &config.search));
    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        transport,
        executor,
        assistants.clone(),
        history.clone(),
        cancel_map.clone(),
    ));

    Ok(AppState {
        config,
        orchestrator,
        assistants,
        history,
        cancel_map,
    })
}
