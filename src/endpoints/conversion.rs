use std::net::SocketAddr;
use std::time::SystemTime;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{retry_once, Error, ResultExt};
use crate::event::Event;
use crate::gateway_util::{AppState, StructuredJson};

const DEFAULT_REWARD: f64 = 1.0;

/// The expected payload for `/conversion`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Params {
    pub endpoint_name: String,
    pub user_id: String,
    pub inference_id: Uuid,
    pub reward: Option<f64>,
    pub endpoint_variant: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversionResponse {
    pub strategy: Option<crate::bandit::Strategy>,
    pub endpoint_name: String,
    pub endpoint_variant: String,
    pub inference_id: Uuid,
    pub user_id: String,
    pub reward: f64,
}

/// Records a conversion against the caller's current sticky variant, or
/// against the client-supplied `endpoint_variant` when no sticky assignment
/// exists — conversions are never dropped for want of a sticky record.
pub async fn conversion_handler(
    State(app_state): AppState,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    StructuredJson(params): StructuredJson<Params>,
) -> Result<Response, Error> {
    let source_ip = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let reward = params.reward.unwrap_or(DEFAULT_REWARD);

    let sticky =
        retry_once(|| app_state.assignment_store.get(&params.user_id, &params.endpoint_name))
            .await?;
    let had_sticky = sticky.is_some();

    let endpoint_variant = match sticky.or(params.endpoint_variant) {
        Some(variant) => variant,
        None => {
            return Err(Error::InvalidRequest {
                message: "conversion requires either a sticky assignment or an explicit endpoint_variant"
                    .to_string(),
            })
        }
    };
    let status = if had_sticky {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };

    let strategy = retry_once(|| app_state.metrics_store.read(&params.endpoint_name))
        .await
        .map(|snapshot| snapshot.strategy)
        .ok();

    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let event = Event::conversion(
        timestamp,
        &params.endpoint_name,
        &endpoint_variant,
        &params.user_id,
        params.inference_id,
        reward,
    )
    .with_request_identity(source_ip, user_agent);
    // Transient emission failures never fail the client; they're logged.
    app_state.event_buffer.emit(event).await.ok_or_log();

    Ok((
        status,
        Json(ConversionResponse {
            strategy,
            endpoint_name: params.endpoint_name,
            endpoint_variant,
            inference_id: params.inference_id,
            user_id: params.user_id,
            reward,
        }),
    )
        .into_response())
}
