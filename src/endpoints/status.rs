use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::{json, Value};

use crate::error::Error;
use crate::gateway_util::{AppState, AppStateData};

const AB_GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A handler for a simple liveness check
pub async fn status_handler() -> Json<Value> {
    Json(json!({ "status": "ok", "version": AB_GATEWAY_VERSION }))
}

/// A handler for a readiness check that also probes store reachability.
pub async fn health_handler(
    State(AppStateData {
        assignment_store,
        metrics_store,
        ..
    }): AppState,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let assignment_ok = assignment_store.get("__health__", "__health__").await.is_ok();
    // A "not found" read still proves the store answered; only a transient
    // store error means unreachable.
    let metrics_ok = !matches!(
        metrics_store.read("__health__").await,
        Err(Error::StoreTransient { .. })
    );

    if !assignment_ok || !metrics_ok {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "gateway": "ok",
                "assignment_store": if assignment_ok { "ok" } else { "error" },
                "metrics_store": if metrics_ok { "ok" } else { "error" },
            })),
        ));
    }
    Ok(Json(
        json!({ "gateway": "ok", "assignment_store": "ok", "metrics_store": "ok" }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway_util::test_app_state;
    use axum::extract::State;

    #[tokio::test]
    async fn health_handler_reports_ok_stores() {
        let app_state = test_app_state();
        let response = health_handler(State(app_state)).await;
        assert!(response.is_ok());
        let body = response.unwrap();
        assert_eq!(body.get("gateway").unwrap(), "ok");
        assert_eq!(body.get("metrics_store").unwrap(), "ok");
    }

    #[tokio::test]
    async fn status_handler_reports_version() {
        let response = status_handler().await;
        assert_eq!(response.get("version").unwrap(), AB_GATEWAY_VERSION);
    }
}
