//! Request id propagation.
//!
//! Every request carries an id that ends up in audit rows and the response,
//! so correlating a user report with an audit entry needs no guesswork. A
//! client-supplied id is kept only if it looks like a plain token; anything
//! else is replaced server-side.

use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_REQUEST_ID_LEN: usize = 64;

#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Accepts a client id made of ASCII alphanumerics and `-_.`, capped in
/// length. Untrusted header content never reaches audit rows verbatim.
fn accept_client_id(raw: &str) -> Option<String> {
    if raw.is_empty() || raw.len() > MAX_REQUEST_ID_LEN {
        return None;
    }
    if raw
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
    {
        Some(raw.to_string())
    } else {
        None
    }
}

pub async fn request_id(mut req: Request, next: Next) -> Response {
    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);

    let id = req
        .headers()
        .get(&header_name)
        .and_then(|v| v.to_str().ok())
        .and_then(accept_client_id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(header_name, value);
    }

    response
}
