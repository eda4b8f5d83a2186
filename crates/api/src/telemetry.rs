//! Process-level logging and metrics bootstrap for hosts embedding the store.

use std::str::FromStr;

/// Install a `tracing` subscriber filtered by `RULESTORE_LOG` (default `info`). A second call is a no-op.
pub fn init_tracing() {
    let env = std::env::var("RULESTORE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init();
}

/// Start the Prometheus exporter when `RULESTORE_METRICS_ADDR` is set. Returns whether it was installed.
pub fn init_metrics() -> bool {
    let Ok(addr) = std::env::var("RULESTORE_METRICS_ADDR") else { return false };
    match addr.parse::<std::net::SocketAddr>() {
        Ok(sock) => match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
            Ok(_) => {
                tracing::info!(addr = %addr, "Prometheus metrics exporter listening");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install metrics exporter");
                false
            }
        },
        Err(_) => {
            tracing::warn!(addr = %addr, "invalid RULESTORE_METRICS_ADDR; expected host:port");
            false
        }
    }
}
