use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{types::Json, FromRow};

use crate::types::{AuditLogId, ProfileId};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLog {
    pub id: AuditLogId,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<ProfileId>,
    pub action: String,
    pub target_table: String,
    pub target_id: Option<String>,
    pub before: Option<Json<Value>>,
    pub after: Option<Json<Value>>,
    pub ip: Option<String>,
    pub request_id: Option<String>,
}
