//! Input sanitization and validation for untrusted request fields.
//!
//! Every function here is total: malformed input degrades to an empty or
//! clamped value instead of failing the request. Content constraints live
//! here; shape constraints (field lengths, required fields) are expressed
//! with `validator` derives on the request payloads.

use crate::models::session::PresenceStatus;
use crate::types::SessionId;

/// Maximum length for activity notes.
pub const ACTIVITY_MAX_LEN: usize = 500;
/// Maximum length for forced-checkout reasons.
pub const REASON_MAX_LEN: usize = 100;
/// Maximum length for request metadata fields (device label, country, address).
pub const METADATA_MAX_LEN: usize = 120;

/// Characters allowed through text sanitization besides alphanumerics and
/// spaces. HTML-sensitive characters (`&<>"`) are intentionally absent so the
/// escape step stays stable under repeated application.
const ALLOWED_PUNCTUATION: &str = ".,;:!?()'-_/@+";

/// Normalizes free-form text: control and disallowed characters become
/// whitespace, whitespace runs collapse to single spaces, the survivors are
/// HTML-escaped, and the result is truncated to `max_len` characters.
///
/// Idempotent: sanitizing already-sanitized text returns it unchanged.
pub fn sanitize_text(input: &str, max_len: usize) -> String {
    let mapped: String = input
        .chars()
        .map(|c| if is_allowed_char(c) { c } else { ' ' })
        .collect();

    let collapsed = mapped.split_whitespace().collect::<Vec<_>>().join(" ");
    let escaped = escape_html(&collapsed);

    let truncated: String = escaped.chars().take(max_len).collect();
    truncated.trim_end().to_string()
}

fn is_allowed_char(c: char) -> bool {
    c.is_alphanumeric() || c == ' ' || ALLOWED_PUNCTUATION.contains(c)
}

/// Escapes the HTML-sensitive characters `&`, `<`, `>` and `"`.
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Sanitizes an activity note. Empty output means "no note".
pub fn sanitize_activity(input: &str) -> String {
    sanitize_text(input, ACTIVITY_MAX_LEN)
}

/// Sanitizes a short audit reason.
pub fn sanitize_reason(input: &str) -> String {
    sanitize_text(input, REASON_MAX_LEN)
}

/// Sanitizes best-effort request metadata (device label, country, address).
pub fn sanitize_metadata(input: &str) -> Option<String> {
    let cleaned = sanitize_text(input, METADATA_MAX_LEN);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Strictly parses an opaque session reference. The token must be exactly the
/// canonical hyphenated UUID shape; braced, urn or compact forms are rejected
/// before they reach the store.
pub fn parse_session_id(raw: &str) -> Option<SessionId> {
    let candidate = raw.trim();
    if candidate.len() != 36 {
        return None;
    }
    let bytes = candidate.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        let is_separator = matches!(i, 8 | 13 | 18 | 23);
        if is_separator {
            if *b != b'-' {
                return None;
            }
        } else if !b.is_ascii_hexdigit() {
            return None;
        }
    }
    candidate.parse().ok()
}

/// Parses a client-supplied presence status. The terminal state is never
/// client-settable.
pub fn parse_client_status(raw: &str) -> Option<PresenceStatus> {
    PresenceStatus::parse_client(raw)
}

/// Clamps a client-reported elapsed-seconds increment into `[0, ceiling]`.
pub fn clamp_active_seconds(delta: i64, ceiling: i64) -> i64 {
    delta.clamp(0, ceiling.max(0))
}

/// Returns a short pseudonymized prefix of an identifier for operational
/// logs. Full ids never appear in log output.
pub fn id_prefix(id: &str) -> String {
    id.chars().take(8).collect()
}
