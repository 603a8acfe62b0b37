#![allow(dead_code)] // OpenAPI doc stubs are only referenced by utoipa macros.

use crate::models::session::{
    ActivityEntry, CheckInRequest, CheckInResponse, CheckOutRequest, CheckOutResponse,
    CurrentSessionResponse, ForcedCheckOutRequest, ForcedCheckOutResponse, HeartbeatRequest,
    HeartbeatResponse, PresenceStatus, SessionSnapshot, StatusUpdateRequest, StatusUpdateResponse,
};
use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        check_in_doc,
        heartbeat_doc,
        status_doc,
        check_out_doc,
        force_check_out_doc,
        current_session_doc
    ),
    components(
        schemas(
            CheckInRequest,
            CheckInResponse,
            HeartbeatRequest,
            HeartbeatResponse,
            StatusUpdateRequest,
            StatusUpdateResponse,
            CheckOutRequest,
            CheckOutResponse,
            ForcedCheckOutRequest,
            ForcedCheckOutResponse,
            CurrentSessionResponse,
            SessionSnapshot,
            ActivityEntry,
            PresenceStatus
        )
    ),
    modifiers(&SecuritySchemes),
    tags(
        (name = "Presence", description = "Telework presence session API")
    ),
    security(("BearerAuth" = []))
)]
pub struct ApiDoc;

struct SecuritySchemes;

impl Modify for SecuritySchemes {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_default();

        let mut bearer = Http::new(HttpAuthScheme::Bearer);
        bearer.bearer_format = Some("JWT".to_string());

        components.add_security_scheme("BearerAuth", SecurityScheme::Http(bearer));
    }
}

#[utoipa::path(
    post,
    path = "/api/presence/check-in",
    request_body = CheckInRequest,
    responses(
        (status = 200, description = "Session opened", body = CheckInResponse),
        (status = 409, description = "A session is already active"),
        (status = 429, description = "Rate limit exceeded")
    ),
    tag = "Presence"
)]
fn check_in_doc() {}

#[utoipa::path(
    post,
    path = "/api/presence/heartbeat",
    request_body = HeartbeatRequest,
    responses(
        (status = 200, body = HeartbeatResponse),
        (status = 404, description = "Session not found or already closed"),
        (status = 429, description = "Rate limit exceeded")
    ),
    tag = "Presence"
)]
fn heartbeat_doc() {}

#[utoipa::path(
    put,
    path = "/api/presence/status",
    request_body = StatusUpdateRequest,
    responses(
        (status = 200, body = StatusUpdateResponse),
        (status = 404, description = "Session not found or already closed")
    ),
    tag = "Presence"
)]
fn status_doc() {}

#[utoipa::path(
    post,
    path = "/api/presence/check-out",
    request_body = CheckOutRequest,
    responses(
        (status = 200, body = CheckOutResponse),
        (status = 409, description = "Session already closed")
    ),
    tag = "Presence"
)]
fn check_out_doc() {}

#[utoipa::path(
    post,
    path = "/api/presence/force-check-out",
    request_body = ForcedCheckOutRequest,
    responses(
        (status = 200, body = ForcedCheckOutResponse),
        (status = 403, description = "Permission denied"),
        (status = 409, description = "Session already closed")
    ),
    tag = "Presence"
)]
fn force_check_out_doc() {}

#[utoipa::path(
    get,
    path = "/api/presence/me",
    responses((status = 200, body = CurrentSessionResponse)),
    tag = "Presence"
)]
fn current_session_doc() {}
