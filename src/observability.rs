use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::error::Error;

/// Set up logs, reading the filter from `RUST_LOG` the same way the teacher does.
pub fn setup_logs() {
    let log_level = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ab_gateway=debug,warn".into());

    tracing_subscriber::registry()
        .with(log_level)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_target(false),
        )
        .init();
}

/// Installs the Prometheus exporter on its own listener, bound to
/// `PROMETHEUS_ADDRESS`, separate from the main JSON API listener.
pub fn setup_metrics(config: &Config) -> Result<(), Error> {
    PrometheusBuilder::new()
        .with_http_listener(config.prometheus_address)
        .install()
        .map_err(|e| Error::AppState {
            message: format!("failed to install Prometheus exporter: {e}"),
        })?;
    Ok(())
}
