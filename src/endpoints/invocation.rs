use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::assignment::put_sticky;
use crate::bandit::{self, Strategy};
use crate::error::{retry_once, Error, ResultExt};
use crate::event::Event;
use crate::gateway_util::{AppState, AppStateData, StructuredJson};

const DISPATCH_DEADLINE: Duration = Duration::from_secs(5);

/// The expected payload for `/invocation`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Params {
    pub endpoint_name: String,
    pub user_id: Option<String>,
    pub inference_id: Option<Uuid>,
    pub endpoint_variant: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct InvocationResponse {
    pub strategy: Option<Strategy>,
    pub endpoint_name: String,
    pub target_variant: Option<String>,
    pub endpoint_variant: String,
    pub inference_id: Uuid,
    pub user_id: String,
    pub predictions: Value,
}

pub async fn invocation_handler(
    State(app_state): AppState,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    StructuredJson(params): StructuredJson<Params>,
) -> Result<Response, Error> {
    let source_ip = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());
    let user_agent = user_agent(&headers);
    let inference_id = params.inference_id.unwrap_or_else(Uuid::now_v7);
    let user_id = params.user_id.unwrap_or_else(|| inference_id.to_string());

    // Manual override: caller names the variant, the algorithm is bypassed.
    if let Some(endpoint_variant) = params.endpoint_variant {
        let outcome = app_state
            .inference_backend
            .dispatch(
                &params.endpoint_name,
                Some(&endpoint_variant),
                &params.data,
                DISPATCH_DEADLINE,
            )
            .await?;
        emit_invocation(
            &app_state,
            &params.endpoint_name,
            &outcome.endpoint_variant,
            &user_id,
            inference_id,
            source_ip.clone(),
            user_agent.clone(),
        )
        .await
        .ok_or_log();
        return Ok(response(
            StatusCode::ACCEPTED,
            InvocationResponse {
                strategy: None,
                endpoint_name: params.endpoint_name,
                target_variant: Some(endpoint_variant),
                endpoint_variant: outcome.endpoint_variant,
                inference_id,
                user_id,
                predictions: outcome.predictions,
            },
        ));
    }

    let snapshot = match retry_once(|| app_state.metrics_store.read(&params.endpoint_name)).await {
        Ok(snapshot) => snapshot,
        Err(Error::EndpointUnknown { .. }) => {
            let outcome = app_state
                .inference_backend
                .dispatch(&params.endpoint_name, None, &params.data, DISPATCH_DEADLINE)
                .await?;
            emit_invocation(
                &app_state,
                &params.endpoint_name,
                &outcome.endpoint_variant,
                &user_id,
                inference_id,
                source_ip.clone(),
                user_agent.clone(),
            )
            .await
            .ok_or_log();
            return Ok(response(
                StatusCode::ACCEPTED,
                InvocationResponse {
                    strategy: None,
                    endpoint_name: params.endpoint_name,
                    target_variant: None,
                    endpoint_variant: outcome.endpoint_variant,
                    inference_id,
                    user_id,
                    predictions: outcome.predictions,
                },
            ));
        }
        Err(other) => return Err(other),
    };

    let sticky = retry_once(|| app_state.assignment_store.get(&user_id, &params.endpoint_name)).await?;

    let (target_variant, status, wrote_sticky) = match sticky {
        Some(variant_name) if snapshot.has_variant(&variant_name) => {
            (variant_name, StatusCode::OK, false)
        }
        _ => {
            let strategy = if !snapshot.underwarmed().is_empty() {
                Strategy::WeightedSampling
            } else {
                snapshot.strategy
            };
            let chosen = {
                let mut rng = app_state.rng.lock().await;
                bandit::select(strategy, &snapshot.variants, snapshot.epsilon, &mut *rng)?
            };
            (chosen, StatusCode::CREATED, true)
        }
    };

    if wrote_sticky {
        put_sticky(
            app_state.assignment_store.as_ref(),
            &user_id,
            &params.endpoint_name,
            &target_variant,
        )
        .await?;
    }

    let outcome = app_state
        .inference_backend
        .dispatch(
            &params.endpoint_name,
            Some(&target_variant),
            &params.data,
            DISPATCH_DEADLINE,
        )
        .await?;

    emit_invocation(
        &app_state,
        &params.endpoint_name,
        &outcome.endpoint_variant,
        &user_id,
        inference_id,
        source_ip,
        user_agent,
    )
    .await
    .ok_or_log();

    Ok(response(
        status,
        InvocationResponse {
            strategy: Some(snapshot.strategy),
            endpoint_name: params.endpoint_name,
            target_variant: Some(target_variant),
            endpoint_variant: outcome.endpoint_variant,
            inference_id,
            user_id,
            predictions: outcome.predictions,
        },
    ))
}

#[allow(clippy::too_many_arguments)]
async fn emit_invocation(
    app_state: &AppStateData,
    endpoint_name: &str,
    endpoint_variant: &str,
    user_id: &str,
    inference_id: Uuid,
    source_ip: Option<String>,
    user_agent: Option<String>,
) -> Result<(), Error> {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let event = Event::invocation(timestamp, endpoint_name, endpoint_variant, user_id, inference_id)
        .with_request_identity(source_ip, user_agent);
    app_state.event_buffer.emit(event).await
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn response(status: StatusCode, body: InvocationResponse) -> Response {
    (status, Json(body)).into_response()
}
