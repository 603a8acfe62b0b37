//! HTTP handlers for the presence operations.
//!
//! Each handler follows the same shape: resolve the caller from request
//! extensions, spend one unit of that caller's operation quota (a rejection
//! short-circuits before any validation or store access), validate the
//! payload, delegate to the lifecycle service, and stamp the rate-limit
//! bookkeeping onto the success response.

use axum::{
    extract::{Extension, State},
    http::{header::USER_AGENT, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use validator::Validate;

use crate::{
    error::AppError,
    middleware::request_id::RequestId,
    models::profile::Profile,
    models::session::{
        CheckInRequest, CheckOutRequest, ForcedCheckOutRequest, HeartbeatRequest,
        StatusUpdateRequest,
    },
    ratelimit::RateLimitDecision,
    services::presence::RequestMeta,
    state::AppState,
};

pub async fn check_in(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    request_id: Option<Extension<RequestId>>,
    headers: HeaderMap,
    Json(payload): Json<CheckInRequest>,
) -> Result<Response, AppError> {
    let decision = spend_quota(&state, "check_in", &profile, state.config.checkin_quota())?;
    payload.validate()?;

    let meta = request_meta(&headers, request_id);
    let response = state
        .presence
        .check_in(&state.pool, profile.id, payload, meta)
        .await?;
    Ok(with_rate_limit_headers(decision, Json(response)))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    Json(payload): Json<HeartbeatRequest>,
) -> Result<Response, AppError> {
    let decision = spend_quota(&state, "heartbeat", &profile, state.config.heartbeat_quota())?;
    payload.validate()?;

    let response = state
        .presence
        .heartbeat(&state.pool, profile.id, payload)
        .await?;
    Ok(with_rate_limit_headers(decision, Json(response)))
}

pub async fn update_status(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    Json(payload): Json<StatusUpdateRequest>,
) -> Result<Response, AppError> {
    let decision = spend_quota(&state, "status", &profile, state.config.heartbeat_quota())?;
    payload.validate()?;

    let response = state
        .presence
        .update_status(&state.pool, profile.id, payload)
        .await?;
    Ok(with_rate_limit_headers(decision, Json(response)))
}

pub async fn check_out(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    Json(payload): Json<CheckOutRequest>,
) -> Result<Response, AppError> {
    let decision = spend_quota(&state, "check_out", &profile, state.config.checkin_quota())?;
    payload.validate()?;

    let response = state
        .presence
        .check_out(&state.pool, profile.id, payload)
        .await?;
    Ok(with_rate_limit_headers(decision, Json(response)))
}

pub async fn force_check_out(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    request_id: Option<Extension<RequestId>>,
    headers: HeaderMap,
    Json(payload): Json<ForcedCheckOutRequest>,
) -> Result<Response, AppError> {
    let decision = spend_quota(&state, "force_check_out", &profile, state.config.forced_quota())?;
    payload.validate()?;

    let meta = request_meta(&headers, request_id);
    let response = state
        .presence
        .force_check_out(&state.pool, profile.id, payload, meta)
        .await?;
    Ok(with_rate_limit_headers(decision, Json(response)))
}

pub async fn current_session(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
) -> Result<Response, AppError> {
    let decision = spend_quota(&state, "me", &profile, state.config.heartbeat_quota())?;

    let response = state
        .presence
        .current_session(&state.pool, profile.id)
        .await?;
    Ok(with_rate_limit_headers(decision, Json(response)))
}

fn spend_quota(
    state: &AppState,
    operation: &str,
    profile: &Profile,
    quota: crate::ratelimit::RateLimitQuota,
) -> Result<RateLimitDecision, AppError> {
    let identifier = format!("{}:{}", operation, profile.id);
    let decision = state.rate_limiter.check(&identifier, quota);
    if !decision.allowed {
        return Err(AppError::TooManyRequests {
            retry_after: decision.retry_after_secs(),
        });
    }
    Ok(decision)
}

fn with_rate_limit_headers(decision: RateLimitDecision, body: impl IntoResponse) -> Response {
    let mut response = body.into_response();
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        response.headers_mut().insert("x-ratelimit-remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.reset_in.as_secs().to_string()) {
        response.headers_mut().insert("x-ratelimit-reset", value);
    }
    response
}

/// Best-effort request metadata: a missing or unparseable header never blocks
/// the operation.
fn request_meta(headers: &HeaderMap, request_id: Option<Extension<RequestId>>) -> RequestMeta {
    let device = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let country = headers
        .get("cf-ipcountry")
        .or_else(|| headers.get("x-country"))
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        });

    RequestMeta {
        country,
        device,
        ip_address,
        request_id: request_id.map(|Extension(RequestId(id))| id),
    }
}
