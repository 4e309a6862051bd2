//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;

use nc_callhome::{DeviceStatusTable, ListenerSet, SessionContextManager};
use nc_domain::config::{Config, ConfigSeverity};
use nc_domain::TransportProtocol;
use nc_sessions::SessionMonitor;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Validate the config and wire the call-home registries, the device
/// status table and the session monitor together.
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }

    // ── Device allow-list ────────────────────────────────────────────
    let status = Arc::new(DeviceStatusTable::from_config(&config.callhome.devices));
    tracing::info!(
        devices = config.callhome.devices.len(),
        "call-home allow-list loaded"
    );

    // ── Session monitor ──────────────────────────────────────────────
    let monitor = Arc::new(SessionMonitor::new());

    // ── Per-protocol registries ──────────────────────────────────────
    let listeners = Arc::new(
        ListenerSet::new()
            .with(status.clone())
            .with(monitor.clone()),
    );
    let registry = |protocol| {
        Arc::new(SessionContextManager::new(
            protocol,
            status.clone(),
            status.clone(),
            listeners.clone(),
        ))
    };
    let ssh = registry(TransportProtocol::Ssh);
    let tls = registry(TransportProtocol::Tls);

    Ok(AppState {
        config,
        status,
        monitor,
        ssh,
        tls,
        shutdown: CancellationToken::new(),
    })
}

/// Spawn the long-running background tasks.
///
/// Call this **after** [`build_app_state`] when running the HTTP server.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Session monitoring feed ──────────────────────────────────────
    match state.config.monitoring.update_interval() {
        Some(interval) => {
            state.monitor.spawn_feed(interval, state.shutdown.clone());
        }
        None => tracing::info!("session monitoring feed disabled"),
    }
}

/// Release both registries once the listener has stopped.
pub fn close_registries(state: &AppState) {
    state.shutdown.cancel();
    state.ssh.close();
    state.tls.close();
}
