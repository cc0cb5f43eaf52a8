//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if another global
/// recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Subscriptions opened total (counter, labels: flow).
pub const SUBSCRIPTIONS_OPENED_TOTAL: &str = "relay_subscriptions_opened_total";
/// Subscriptions closed total (counter).
pub const SUBSCRIPTIONS_CLOSED_TOTAL: &str = "relay_subscriptions_closed_total";
/// Registered listener handles (gauge).
pub const LISTENERS_ACTIVE: &str = "relay_listeners_active";
/// Broadcasts issued total (counter, labels: event).
pub const BROADCASTS_TOTAL: &str = "relay_broadcasts_total";
/// Messages written to listener queues total (counter).
pub const DELIVERIES_TOTAL: &str = "relay_deliveries_total";
/// Messages dropped on full or closed listener queues (counter).
pub const DELIVERY_DROPS_TOTAL: &str = "relay_delivery_drops_total";
/// Commands accepted total (counter).
pub const COMMANDS_ACCEPTED_TOTAL: &str = "relay_commands_accepted_total";
/// Closed listeners removed by the sweeper (counter).
pub const SWEEP_REMOVED_TOTAL: &str = "relay_sweep_removed_total";
