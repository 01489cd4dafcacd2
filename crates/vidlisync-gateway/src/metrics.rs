//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Record a new WebSocket connection.
pub fn record_ws_connect() {
    metrics::gauge!("ws_connections_active").increment(1.0);
}

/// Record a WebSocket disconnection.
pub fn record_ws_disconnect() {
    metrics::gauge!("ws_connections_active").decrement(1.0);
}

/// Record a client message with its handling duration.
pub fn record_message(kind: &str, duration_secs: f64) {
    let labels = [("type", kind.to_string())];
    metrics::counter!("ws_messages_total", &labels).increment(1);
    metrics::histogram!("ws_message_duration_seconds", &labels).record(duration_secs);
}

/// Record one pipeline run (single-target or fan-out).
pub fn record_pipeline(success: bool, latency_ms: f64) {
    let labels = [("success", success.to_string())];
    metrics::counter!("pipeline_runs_total", &labels).increment(1);
    metrics::histogram!("pipeline_latency_seconds").record(latency_ms / 1000.0);
}

/// Record an error reported to a client, by error code.
pub fn record_error(code: &str) {
    let labels = [("code", code.to_string())];
    metrics::counter!("errors_total", &labels).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_prometheus_recorder() {
        // Only one recorder per process; a second install fails cleanly.
        if let Ok(handle) = install_prometheus_recorder() {
            record_error("not_found");
            let output = handle.render();
            assert!(output.is_empty() || output.contains("errors_total"));
        }
    }

    #[test]
    fn test_record_message_does_not_panic() {
        record_message("ping", 0.002);
    }

    #[test]
    fn test_record_pipeline_does_not_panic() {
        record_ws_connect();
        record_pipeline(true, 120.0);
        record_pipeline(false, 5000.0);
        record_ws_disconnect();
    }
}
