//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `GET /metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::MetricsRecorder(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from a recorder handle.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Upgraded connections registered (counter).
pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Currently registered connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Connections refused because the registry was full (counter).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "relay_connections_rejected_total";
/// Sessions ended (counter).
pub const DISCONNECTIONS_TOTAL: &str = "relay_disconnections_total";
/// Messages accepted from clients and published (counter).
pub const MESSAGES_RECEIVED_TOTAL: &str = "relay_messages_received_total";
/// Messages fanned out by the dispatcher (counter).
pub const MESSAGES_BROADCAST_TOTAL: &str = "relay_messages_broadcast_total";
/// Failed writes that retired a connection (counter, labels: kind).
pub const DELIVERY_FAILURES_TOTAL: &str = "relay_delivery_failures_total";
/// Time to fan one message out to the whole registry (histogram).
pub const BROADCAST_DURATION_SECONDS: &str = "relay_broadcast_duration_seconds";
