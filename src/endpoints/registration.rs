use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use axum::extract::State;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::bandit::Strategy;
use crate::error::Error;
use crate::gateway_util::{AppState, StructuredJson};

const DESCRIBE_DEADLINE: Duration = Duration::from_secs(5);
const TAG_ENABLED: &str = "ab-testing:enabled";
const TAG_STRATEGY: &str = "ab-testing:strategy";
const TAG_EPSILON: &str = "ab-testing:epsilon";
const TAG_WARMUP: &str = "ab-testing:warmup";
const TAG_STAGE: &str = "sagemaker:deployment-stage";

#[derive(Debug, Deserialize)]
pub struct Notification {
    pub source: String,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    pub detail: Detail,
}

#[derive(Debug, Deserialize)]
pub struct Detail {
    #[serde(rename = "EndpointName")]
    pub endpoint_name: String,
    #[serde(rename = "EndpointStatus")]
    pub endpoint_status: String,
    #[serde(rename = "Tags", default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: Value,
}

/// Consumes an endpoint lifecycle notification and mutates the metrics
/// store's registration accordingly. Filters, then dispatches on
/// `EndpointStatus` per the state machine in the component design.
pub async fn registration_handler(
    State(app_state): AppState,
    StructuredJson(notification): StructuredJson<Notification>,
) -> Result<Json<NotificationResponse>, Error> {
    let detail = &notification.detail;

    if !detail
        .endpoint_name
        .starts_with(&app_state.config.endpoint_prefix)
    {
        return Ok(filtered("endpoint name does not match configured prefix"));
    }
    if detail.tags.get(TAG_ENABLED).map(String::as_str) != Some("true") {
        return Ok(filtered("ab-testing:enabled tag is not \"true\""));
    }
    if detail.tags.get(TAG_STAGE).map(String::as_str) != Some(app_state.config.stage_name.as_str())
    {
        return Ok(filtered("sagemaker:deployment-stage tag does not match this stage"));
    }

    match detail.endpoint_status.as_str() {
        "IN_SERVICE" => {
            let roster = app_state
                .inference_backend
                .describe_endpoint(&detail.endpoint_name, DESCRIBE_DEADLINE)
                .await?;
            let strategy = detail
                .tags
                .get(TAG_STRATEGY)
                .map(|name| Strategy::parse(name))
                .transpose()?
                .unwrap_or_default();
            let epsilon = detail
                .tags
                .get(TAG_EPSILON)
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.1);
            let warmup = detail
                .tags
                .get(TAG_WARMUP)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);

            let existed = app_state
                .metrics_store
                .register(
                    &detail.endpoint_name,
                    &roster,
                    strategy,
                    epsilon,
                    warmup,
                    SystemTime::now(),
                )
                .await?;
            let status_code = if existed { 200 } else { 201 };
            Ok(Json(NotificationResponse {
                status_code,
                body: json!({ "endpoint_name": detail.endpoint_name, "registered": true }),
            }))
        }
        "DELETING" => {
            app_state
                .metrics_store
                .soft_delete(&detail.endpoint_name, SystemTime::now())
                .await?;
            Ok(Json(NotificationResponse {
                status_code: 200,
                body: json!({ "endpoint_name": detail.endpoint_name, "deleted": true }),
            }))
        }
        other => Err(Error::UnsupportedLifecycleStatus {
            status: other.to_string(),
        }),
    }
}

fn filtered(reason: &str) -> Json<NotificationResponse> {
    Json(NotificationResponse {
        status_code: 304,
        body: json!({ "filtered": reason }),
    })
}
