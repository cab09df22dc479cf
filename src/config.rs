//! Environment-driven configuration, read with bare `std::env::var` the same
//! way the teacher reads `CLICKHOUSE_URL` in `gateway_util.rs`.

use std::net::SocketAddr;

use crate::error::Error;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
const DEFAULT_PROMETHEUS_ADDRESS: &str = "0.0.0.0:9090";

#[derive(Debug, Clone)]
pub struct Config {
    pub assignment_store: String,
    pub metrics_store: String,
    pub delivery_stream_name: String,
    pub delivery_sync: bool,
    pub endpoint_prefix: String,
    pub stage_name: String,
    pub bind_address: SocketAddr,
    pub prometheus_address: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        let bind_address = parse_socket_addr_var("BIND_ADDRESS", DEFAULT_BIND_ADDRESS)?;
        let prometheus_address =
            parse_socket_addr_var("PROMETHEUS_ADDRESS", DEFAULT_PROMETHEUS_ADDRESS)?;

        Ok(Self {
            assignment_store: env_or("ASSIGNMENT_STORE", "in-memory"),
            metrics_store: env_or("METRICS_STORE", "in-memory"),
            delivery_stream_name: env_or("DELIVERY_STREAM_NAME", "ab-gateway-events"),
            delivery_sync: env_bool("DELIVERY_SYNC", true),
            endpoint_prefix: env_or("ENDPOINT_PREFIX", ""),
            stage_name: env_or("STAGE_NAME", "prod"),
            bind_address,
            prometheus_address,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn parse_socket_addr_var(key: &str, default: &str) -> Result<SocketAddr, Error> {
    let raw = env_or(key, default);
    raw.parse().map_err(|e| Error::AppState {
        message: format!("invalid {key} value `{raw}`: {e}"),
    })
}
