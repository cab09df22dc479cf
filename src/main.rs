use std::fmt::Display;
use std::io::ErrorKind;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use clap::Parser;
use mimalloc::MiMalloc;
use tokio::signal;
use tower_http::trace::{DefaultOnFailure, TraceLayer};
use tracing::Level;

use ab_gateway::assignment::InMemoryAssignmentStore;
use ab_gateway::backend::StubInferenceBackend;
use ab_gateway::config::Config;
use ab_gateway::event_buffer::{InMemoryDurableStream, StreamEventBuffer, SyncEventBuffer};
use ab_gateway::gateway_util::AppStateData;
use ab_gateway::metrics_store::InMemoryMetricsStore;
use ab_gateway::observability;
use ab_gateway::routes::build_router;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Override BIND_ADDRESS from the environment.
    #[arg(long)]
    bind_address: Option<std::net::SocketAddr>,
}

#[tokio::main]
async fn main() {
    observability::setup_logs();

    let args = Args::parse();

    let mut config = Config::from_env().expect_pretty("Failed to load configuration");
    if let Some(bind_address) = args.bind_address {
        config.bind_address = bind_address;
    }
    let config = Arc::new(config);

    observability::setup_metrics(&config).expect_pretty("Failed to set up metrics exporter");

    tracing::info!("Starting ab-gateway {}", env!("CARGO_PKG_VERSION"));

    let assignment_store = Arc::new(InMemoryAssignmentStore::new());
    let metrics_store: Arc<InMemoryMetricsStore> = Arc::new(InMemoryMetricsStore::new());
    let inference_backend = Arc::new(StubInferenceBackend::new());

    let event_buffer: Arc<dyn ab_gateway::event_buffer::EventBuffer> = if config.delivery_sync {
        Arc::new(SyncEventBuffer::new(metrics_store.clone()))
    } else {
        let stream = Arc::new(InMemoryDurableStream::default());
        Arc::new(StreamEventBuffer::new(stream))
    };

    let app_state = AppStateData::new(
        config.clone(),
        assignment_store,
        metrics_store,
        event_buffer,
        inference_backend,
    );

    let router = build_router()
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(TraceLayer::new_for_http().on_failure(DefaultOnFailure::new().level(Level::DEBUG)))
        .with_state(app_state);

    let listener = match tokio::net::TcpListener::bind(config.bind_address).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == ErrorKind::AddrInUse => {
            tracing::error!(
                "Failed to bind to socket address {}: {e}. Tip: Ensure no other process is using port {} or try a different port.",
                config.bind_address,
                config.bind_address.port()
            );
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("Failed to bind to socket address {}: {e}", config.bind_address);
            std::process::exit(1);
        }
    };

    tracing::info!("ab-gateway is listening on {}", config.bind_address);
    tracing::info!("├ Assignment store: {}", config.assignment_store);
    tracing::info!("├ Metrics store: {}", config.metrics_store);
    tracing::info!(
        "└ Delivery: {}",
        if config.delivery_sync { "synchronous" } else { "stream" }
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect_pretty("Failed to start server");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect_pretty("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect_pretty("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        }
    };
}

/// ┌──────────────────────────────────────────────────────────────────────────┐
/// │                           MAIN.RS ESCAPE HATCH                           │
/// └──────────────────────────────────────────────────────────────────────────┘
///
/// We don't allow panics or unwraps outside of main.rs during initialization.
/// `expect_pretty` logs and exits instead of unwinding.
trait ExpectPretty<T> {
    fn expect_pretty(self, msg: &str) -> T;
}

impl<T, E: Display> ExpectPretty<T> for Result<T, E> {
    fn expect_pretty(self, msg: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::error!("{msg}: {err}");
                std::process::exit(1);
            }
        }
    }
}
