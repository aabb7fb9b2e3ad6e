//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define mediator metrics (connections, handshakes, messages, frame errors)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `ws_connections_total` (counter): accepted transport connections
//! - `ws_handshakes_total` (counter): handshake outcomes by `outcome`
//! - `ws_connections_established` (gauge): connections in the registry
//! - `ws_messages_received_total` (counter): data messages delivered to handlers
//! - `ws_frame_errors_total` (counter): fatal decode failures
//! - `ws_handler_panics_total` (counter): caught handler panics by `callback`
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Recording without an installed recorder is a no-op, so tests and
//!   metrics-disabled deployments pay nothing

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
pub const WS_HANDSHAKES_TOTAL: &str = "ws_handshakes_total";
pub const WS_CONNECTIONS_ESTABLISHED: &str = "ws_connections_established";
pub const WS_MESSAGES_RECEIVED_TOTAL: &str = "ws_messages_received_total";
pub const WS_FRAME_ERRORS_TOTAL: &str = "ws_frame_errors_total";
pub const WS_HANDLER_PANICS_TOTAL: &str = "ws_handler_panics_total";

/// Install the global Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection_accepted() {
    metrics::counter!(WS_CONNECTIONS_TOTAL).increment(1);
}

/// Count one handshake outcome (`established`, `overflow`, ...).
pub fn record_handshake(outcome: &'static str) {
    metrics::counter!(WS_HANDSHAKES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_established() {
    metrics::gauge!(WS_CONNECTIONS_ESTABLISHED).increment(1.0);
}

pub fn record_deregistered() {
    metrics::gauge!(WS_CONNECTIONS_ESTABLISHED).decrement(1.0);
}

pub fn record_message_received() {
    metrics::counter!(WS_MESSAGES_RECEIVED_TOTAL).increment(1);
}

pub fn record_frame_error() {
    metrics::counter!(WS_FRAME_ERRORS_TOTAL).increment(1);
}

pub fn record_handler_panic(callback: &'static str) {
    metrics::counter!(WS_HANDLER_PANICS_TOTAL, "callback" => callback).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_metrics_render() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            record_connection_accepted();
            record_handshake("established");
            record_established();
            record_handler_panic("on_message");
        });

        let output = handle.render();
        assert!(output.contains(WS_CONNECTIONS_TOTAL));
        assert!(output.contains(r#"ws_handshakes_total{outcome="established"} 1"#));
        assert!(output.contains(WS_CONNECTIONS_ESTABLISHED));
        assert!(output.contains(r#"ws_handler_panics_total{callback="on_message"} 1"#));
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_error();
        record_message_received();
        record_deregistered();
    }
}
