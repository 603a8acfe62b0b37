//! Models for telework presence sessions and their activity log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use utoipa::ToSchema;
use validator::Validate;

use crate::types::{ProfileId, SessionId};

/// Presence status of a session.
///
/// `HorsLigne` is the terminal/no-session state and is never accepted from
/// clients; it is only set by checkout paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Connecte,
    Pause,
    Reunion,
    HorsLigne,
}

impl PresenceStatus {
    /// Returns the canonical snake_case representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Connecte => "connecte",
            PresenceStatus::Pause => "pause",
            PresenceStatus::Reunion => "reunion",
            PresenceStatus::HorsLigne => "hors_ligne",
        }
    }

    /// Parses a client-supplied status. The terminal `hors_ligne` value is
    /// rejected along with anything unknown.
    pub fn parse_client(raw: &str) -> Option<Self> {
        match raw.trim() {
            "connecte" => Some(PresenceStatus::Connecte),
            "pause" => Some(PresenceStatus::Pause),
            "reunion" => Some(PresenceStatus::Reunion),
            _ => None,
        }
    }
}

/// One append-only entry in a session's activity log.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ActivityEntry {
    pub fn new(timestamp: DateTime<Utc>, description: String, status: PresenceStatus) -> Self {
        Self {
            timestamp,
            description,
            kind: status.as_str().to_string(),
        }
    }
}

/// Database representation of a telework session.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TeleworkSession {
    pub id: SessionId,
    pub user_id: ProfileId,
    /// Set at creation, immutable thereafter.
    pub check_in: DateTime<Utc>,
    /// Null while the session is open. Once set it is never cleared.
    pub check_out: Option<DateTime<Utc>>,
    pub current_status: PresenceStatus,
    pub active_seconds: i64,
    pub activities: Json<Vec<ActivityEntry>>,
    pub country: Option<String>,
    pub device: Option<String>,
    pub ip_address: Option<String>,
    pub forced_checkout: bool,
    pub forced_by: Option<ProfileId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Tagged view of a session's lifecycle position. Write paths go through this
/// so a row with `check_out` set but a non-terminal status cannot be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open(PresenceStatus),
    Closed { check_out: DateTime<Utc> },
}

impl TeleworkSession {
    pub fn new(user_id: ProfileId, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            user_id,
            check_in: now,
            check_out: None,
            current_status: PresenceStatus::Connecte,
            active_seconds: 0,
            activities: Json(Vec::new()),
            country: None,
            device: None,
            ip_address: None,
            forced_checkout: false,
            forced_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> SessionState {
        match self.check_out {
            Some(check_out) => SessionState::Closed { check_out },
            None => SessionState::Open(self.current_status),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state(), SessionState::Open(_))
    }

    /// Wall-clock duration between check-in and the given instant, in seconds.
    pub fn duration_seconds(&self, until: DateTime<Utc>) -> i64 {
        (until - self.check_in).num_seconds().max(0)
    }
}

/// Fields applied when a session is terminated.
#[derive(Debug, Clone)]
pub struct SessionClosure {
    pub check_out: DateTime<Utc>,
    /// Floor for the persisted accumulator: `GREATEST(active_seconds, duration)`.
    pub duration_seconds: i64,
    pub forced_by: Option<ProfileId>,
    pub entries: Vec<ActivityEntry>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
/// Payload for opening a presence session.
pub struct CheckInRequest {
    /// Optional first activity note.
    #[serde(default)]
    #[validate(length(max = 500))]
    pub activity: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
/// Payload reporting periodic activity on an open session.
pub struct HeartbeatRequest {
    pub session_id: String,
    /// Elapsed active seconds since the previous heartbeat; clamped server-side.
    #[serde(default)]
    pub active_seconds: Option<i64>,
    #[serde(default)]
    pub current_status: Option<String>,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub activity: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
/// Payload switching the presence status of an open session.
pub struct StatusUpdateRequest {
    pub session_id: String,
    pub current_status: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
/// Payload closing the caller's own session.
pub struct CheckOutRequest {
    pub session_id: String,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub final_activity: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
/// Payload for a manager-initiated termination of another user's session.
pub struct ForcedCheckOutRequest {
    pub session_id: String,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckInResponse {
    #[schema(value_type = String)]
    pub session_id: SessionId,
    pub check_in: DateTime<Utc>,
    pub current_status: PresenceStatus,
    pub country: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HeartbeatResponse {
    #[schema(value_type = String)]
    pub session_id: SessionId,
    pub active_seconds: i64,
    pub current_status: PresenceStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusUpdateResponse {
    #[schema(value_type = String)]
    pub session_id: SessionId,
    pub current_status: PresenceStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckOutResponse {
    #[schema(value_type = String)]
    pub session_id: SessionId,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub duration_seconds: i64,
    pub duration_formatted: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ForcedCheckOutResponse {
    #[schema(value_type = String)]
    pub session_id: SessionId,
    pub check_out: DateTime<Utc>,
    pub forced_checkout: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Snapshot of the caller's current presence, for dashboard polling.
pub struct CurrentSessionResponse {
    pub session: Option<SessionSnapshot>,
    pub current_status: PresenceStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionSnapshot {
    #[schema(value_type = String)]
    pub session_id: SessionId,
    pub check_in: DateTime<Utc>,
    pub current_status: PresenceStatus,
    pub active_seconds: i64,
    pub activities: Vec<ActivityEntry>,
}

impl From<TeleworkSession> for SessionSnapshot {
    fn from(session: TeleworkSession) -> Self {
        SessionSnapshot {
            session_id: session.id,
            check_in: session.check_in,
            current_status: session.current_status,
            active_seconds: session.active_seconds,
            activities: session.activities.0,
        }
    }
}
