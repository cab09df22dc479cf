use axum::extract::State;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use crate::bandit::Strategy;
use crate::error::Error;
use crate::gateway_util::{AppState, StructuredJson};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Params {
    pub endpoint_name: String,
}

#[derive(Debug, Serialize)]
pub struct VariantMetrics {
    pub variant_name: String,
    pub initial_variant_weight: f64,
    pub invocation_count: u64,
    pub reward_sum: f64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub endpoint_name: String,
    pub strategy: Strategy,
    pub epsilon: f64,
    pub warmup: u64,
    pub variant_metrics: Vec<VariantMetrics>,
}

/// Projects the metrics store's counters into the read-model returned by
/// `/stats`; takes only a read lock, never blocking writers.
pub async fn stats_handler(
    State(app_state): AppState,
    StructuredJson(params): StructuredJson<Params>,
) -> Result<Json<StatsResponse>, Error> {
    let snapshot = app_state.metrics_store.read(&params.endpoint_name).await?;
    Ok(Json(StatsResponse {
        endpoint_name: params.endpoint_name,
        strategy: snapshot.strategy,
        epsilon: snapshot.epsilon,
        warmup: snapshot.warmup,
        variant_metrics: snapshot
            .variants
            .into_iter()
            .map(|v| VariantMetrics {
                variant_name: v.variant_name,
                initial_variant_weight: v.initial_variant_weight,
                invocation_count: v.invocation_count,
                reward_sum: v.reward_sum,
            })
            .collect(),
    }))
}
