//! The external inference backend (C6 dispatch target, C7 roster source).
//!
//! Trait-object injected the same way the teacher injects a mock
//! `ClickHouseConnectionInfo` for tests — production code would implement
//! this against the real model-hosting API; here we also ship an in-memory
//! stub good enough to drive the assignment/registration handlers end to end.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::Error;

/// The result of dispatching one invocation to the backend.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// The variant the backend actually routed the request to. May differ
    /// from the requested `target_variant` if the backend does its own
    /// internal routing; callers must count against this value, not the
    /// target.
    pub endpoint_variant: String,
    pub predictions: Value,
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Invokes `endpoint_name`, requesting (but not guaranteeing) that the
    /// backend routes to `target_variant`. `None` is the Fallback path: the
    /// endpoint record could not be read, so no variant was chosen, and the
    /// backend is left to route by its own weights.
    async fn dispatch(
        &self,
        endpoint_name: &str,
        target_variant: Option<&str>,
        payload: &Value,
        deadline: Duration,
    ) -> Result<DispatchOutcome, Error>;

    /// The variant roster currently deployed behind `endpoint_name`, as
    /// `(variant_name, initial_variant_weight)` pairs, mirroring
    /// `sm_client.describe_endpoint`'s production-variant list.
    async fn describe_endpoint(
        &self,
        endpoint_name: &str,
        deadline: Duration,
    ) -> Result<Vec<(String, f64)>, Error>;
}

/// An in-process stand-in backend: endpoints and their variant rosters are
/// registered ahead of time, and `dispatch` always honors `target_variant`
/// (i.e. it never reroutes).
#[derive(Default)]
pub struct StubInferenceBackend {
    rosters: RwLock<HashMap<String, Vec<(String, f64)>>>,
}

impl StubInferenceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_roster(&self, endpoint_name: &str, roster: Vec<(String, f64)>) {
        self.rosters
            .write()
            .await
            .insert(endpoint_name.to_string(), roster);
    }
}

#[async_trait]
impl InferenceBackend for StubInferenceBackend {
    async fn dispatch(
        &self,
        endpoint_name: &str,
        target_variant: Option<&str>,
        payload: &Value,
        _deadline: Duration,
    ) -> Result<DispatchOutcome, Error> {
        let endpoint_variant = match target_variant {
            Some(variant) => variant.to_string(),
            None => self
                .rosters
                .read()
                .await
                .get(endpoint_name)
                .and_then(|roster| roster.first())
                .map(|(name, _)| name.clone())
                .unwrap_or_else(|| "unknown".to_string()),
        };
        Ok(DispatchOutcome {
            endpoint_variant,
            predictions: serde_json::json!({ "echo": payload }),
        })
    }

    async fn describe_endpoint(
        &self,
        endpoint_name: &str,
        _deadline: Duration,
    ) -> Result<Vec<(String, f64)>, Error> {
        self.rosters
            .read()
            .await
            .get(endpoint_name)
            .cloned()
            .ok_or_else(|| Error::EndpointUnknown {
                endpoint_name: endpoint_name.to_string(),
            })
    }
}
