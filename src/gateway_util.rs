use std::sync::Arc;

use axum::extract::{rejection::JsonRejection, FromRequest, Json, Request};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::assignment::AssignmentStore;
use crate::backend::InferenceBackend;
use crate::config::Config;
use crate::error::Error;
use crate::event_buffer::EventBuffer;
use crate::metrics_store::MetricsStore;

/// State for the API. Every field is an injected, trait-typed handle so
/// tests can swap in stubs the same way the teacher swaps in
/// `ClickHouseConnectionInfo::Mock`.
#[derive(Clone)]
pub struct AppStateData {
    pub config: Arc<Config>,
    pub assignment_store: Arc<dyn AssignmentStore>,
    pub metrics_store: Arc<dyn MetricsStore>,
    pub event_buffer: Arc<dyn EventBuffer>,
    pub inference_backend: Arc<dyn InferenceBackend>,
    /// Per-process PRNG shared by handlers. Seeded from OS entropy at
    /// startup; guarded by a lock since bandit draws are infrequent relative
    /// to request volume and a fresh `rand::rng()` per call would otherwise
    /// need its own thread-local plumbing through the trait objects above.
    pub rng: Arc<Mutex<StdRng>>,
}
pub type AppState = axum::extract::State<AppStateData>;

impl AppStateData {
    pub fn new(
        config: Arc<Config>,
        assignment_store: Arc<dyn AssignmentStore>,
        metrics_store: Arc<dyn MetricsStore>,
        event_buffer: Arc<dyn EventBuffer>,
        inference_backend: Arc<dyn InferenceBackend>,
    ) -> Self {
        Self {
            config,
            assignment_store,
            metrics_store,
            event_buffer,
            inference_backend,
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }
}

/// Custom Axum extractor that validates the JSON body and deserializes it into a custom type
///
/// When this extractor is present, we don't check if the `Content-Type` header is `application/json`,
/// and instead simply assume that the request body is a JSON object.
pub struct StructuredJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for StructuredJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
    T: Send + Sync + DeserializeOwned,
{
    type Rejection = Error;

    #[instrument(skip_all, level = "trace", name = "StructuredJson::from_request")]
    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        // Retrieve the request body as Bytes before deserializing it
        let bytes =
            bytes::Bytes::from_request(req, state)
                .await
                .map_err(|e| Error::JsonRequest {
                    message: format!("{} ({})", e, e.status()),
                })?;

        // Convert the entire body into `serde_json::Value`
        let value = Json::<serde_json::Value>::from_bytes(&bytes)
            .map_err(|e| Error::JsonRequest {
                message: format!("{} ({})", e, e.status()),
            })?
            .0;

        // Now use `serde_path_to_error::deserialize` to attempt deserialization into `T`
        let deserialized: T =
            serde_path_to_error::deserialize(&value).map_err(|e| Error::JsonRequest {
                message: e.to_string(),
            })?;

        Ok(StructuredJson(deserialized))
    }
}

#[cfg(test)]
pub fn test_app_state() -> AppStateData {
    use crate::assignment::InMemoryAssignmentStore;
    use crate::backend::StubInferenceBackend;
    use crate::event_buffer::SyncEventBuffer;
    use crate::metrics_store::InMemoryMetricsStore;
    use std::net::SocketAddr;

    let metrics_store: Arc<dyn MetricsStore> = Arc::new(InMemoryMetricsStore::new());
    AppStateData::new(
        Arc::new(Config {
            assignment_store: "in-memory".to_string(),
            metrics_store: "in-memory".to_string(),
            delivery_stream_name: "test-stream".to_string(),
            delivery_sync: true,
            endpoint_prefix: String::new(),
            stage_name: "test".to_string(),
            bind_address: SocketAddr::from(([0, 0, 0, 0], 0)),
            prometheus_address: SocketAddr::from(([0, 0, 0, 0], 0)),
        }),
        Arc::new(InMemoryAssignmentStore::new()),
        metrics_store.clone(),
        Arc::new(SyncEventBuffer::new(metrics_store)),
        Arc::new(StubInferenceBackend::new()),
    )
}
