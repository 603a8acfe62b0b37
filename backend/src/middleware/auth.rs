//! Bearer-token authentication.
//!
//! The service consumes an already-issued token whose subject is a profile
//! id; it never mints one. Verification resolves the caller to a profile row
//! and rejects inactive accounts before any presence logic runs.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::{
    repositories::{ProfileRepository, ProfileRepositoryTrait},
    state::AppState,
    types::ProfileId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Profile id of the authenticated caller.
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

pub async fn auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_owned());

    let token = auth_header
        .as_deref()
        .and_then(parse_bearer_token)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims =
        verify_token(token, &state.config.jwt_secret).map_err(|_| StatusCode::UNAUTHORIZED)?;
    let profile_id: ProfileId = claims.sub.parse().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let profile = ProfileRepository::new()
        .find_by_id(&state.pool, profile_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if !profile.active {
        return Err(StatusCode::FORBIDDEN);
    }

    request.extensions_mut().insert(claims);
    request.extensions_mut().insert(profile);
    Ok(next.run(request).await)
}

fn verify_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::default();
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )?;

    Ok(token_data.claims)
}

fn parse_bearer_token(header: &str) -> Option<&str> {
    if let Some(rest) = header.strip_prefix("Bearer ") {
        return Some(rest);
    }
    if let Some(rest) = header.strip_prefix("bearer ") {
        return Some(rest);
    }
    if let Some(space_idx) = header.find(' ') {
        let (scheme, rest) = header.split_at(space_idx);
        if scheme.eq_ignore_ascii_case("bearer") {
            return Some(rest.trim_start());
        }
    }
    None
}
