//! Request Handlers

use super::{
    errors::ApiError,
    middleware::{operator_authorized, RequestId},
    models::*,
};
use crate::{
    gateway::{Gateway, SessionRegistration},
    providers::{CallbackError, ProviderAdapter, ProviderRegistry, RawCallback},
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    Extension, Json,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
pub struct AppState {
    pub gateway: Gateway,
    pub providers: ProviderRegistry,
    pub operator_key: Option<String>,
}

impl AppState {
    fn adapter(&self, request_id: &RequestId, provider: &str) -> Result<Arc<dyn ProviderAdapter>, ApiError> {
        self.providers
            .get(provider)
            .ok_or_else(|| ApiError::not_found(request_id.0.clone(), format!("Unknown provider {}", provider)))
    }

    fn authorize(&self, request_id: &RequestId, headers: &HeaderMap) -> Result<(), ApiError> {
        if operator_authorized(headers, self.operator_key.as_deref()) {
            Ok(())
        } else {
            warn!(request_id = %request_id.0, "Rejected internal request without a valid operator key");
            Err(ApiError::unauthorized(request_id.0.clone(), "Missing or invalid API key".to_string()))
        }
    }
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.gateway.environment().to_string(),
        providers: state.providers.names().into_iter().map(str::to_string).collect(),
    })
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.gateway.metrics().render(),
    )
}

/// Provider callback. Protocol errors are answered with HTTP 200.
/// POST /{provider}/{currency}/{*rest}
pub async fn callback_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path((provider, currency, _rest)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let adapter = state.adapter(&request_id, &provider)?;
    let metrics = state.gateway.metrics();

    let callback = RawCallback { currency, headers, body };
    match adapter.handle(&state.gateway, callback).await {
        Ok(reply) => {
            metrics.record_callback(adapter.name(), &reply.action, reply.outcome);
            Ok(Json(reply.body))
        }
        Err(CallbackError::Unparseable(msg)) => {
            metrics.record_callback(adapter.name(), "unknown", "unparseable");
            warn!(request_id = %request_id.0, provider = adapter.name(), error = %msg, "Unparseable callback");
            Err(ApiError::unprocessable(request_id.0, msg))
        }
        Err(e @ CallbackError::Encode(_)) => Err(ApiError::internal_error(request_id.0, e.to_string())),
    }
}

/// Register or rotate a player session
/// POST /internal/{provider}/sessions
pub async fn register_session_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SessionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    state.authorize(&request_id, &headers)?;
    let adapter = state.adapter(&request_id, &provider)?;

    let registration = SessionRegistration {
        play_id: request.play_id,
        username: request.username,
        currency: request.currency,
        token: request.token,
        game_code: request.game_code,
    };
    let player = state
        .gateway
        .register_session(adapter.name(), registration)
        .await
        .map_err(|e| ApiError::from_gateway(request_id.0.clone(), e))?;

    info!(provider = adapter.name(), play_id = %player.play_id, "Registered player session");
    Ok(Json(SessionResponse { player }))
}

/// Ledger rows of one round
/// GET /internal/{provider}/rounds/{round_id}
pub async fn round_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path((provider, round_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<RoundResponse>, ApiError> {
    state.authorize(&request_id, &headers)?;
    let adapter = state.adapter(&request_id, &provider)?;

    let records = state
        .gateway
        .ledger()
        .round_records(adapter.name(), &round_id)
        .await
        .map_err(|e| ApiError::internal_error(request_id.0.clone(), e.to_string()))?;
    if records.is_empty() {
        return Err(ApiError::not_found(request_id.0, format!("No ledger rows for round {}", round_id)));
    }

    Ok(Json(RoundResponse {
        provider: adapter.name().to_string(),
        settled: records.iter().any(|r| r.kind.is_settlement()),
        round_id,
        records,
    }))
}
