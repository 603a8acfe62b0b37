use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{types::Json, PgPool};

use crate::error::AppError;
use crate::models::audit_log::AuditLog;
use crate::repositories::audit_log as audit_log_repo;
use crate::types::{AuditLogId, ProfileId};

#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<ProfileId>,
    pub action: String,
    pub target_table: String,
    pub target_id: Option<String>,
    /// Snapshot of the target before the mutation.
    pub before: Option<Value>,
    /// Snapshot of the target after the mutation.
    pub after: Option<Value>,
    pub ip: Option<String>,
    pub request_id: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditLogServiceTrait: Send + Sync {
    async fn record_event(&self, db: &PgPool, entry: AuditLogEntry) -> Result<(), AppError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AuditLogService;

impl AuditLogService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditLogServiceTrait for AuditLogService {
    async fn record_event(&self, db: &PgPool, entry: AuditLogEntry) -> Result<(), AppError> {
        let log = AuditLog {
            id: AuditLogId::new(),
            occurred_at: entry.occurred_at,
            actor_id: entry.actor_id,
            action: entry.action,
            target_table: entry.target_table,
            target_id: entry.target_id,
            before: entry.before.map(Json),
            after: entry.after.map(Json),
            ip: entry.ip,
            request_id: entry.request_id,
        };

        audit_log_repo::insert_audit_log(db, &log)
            .await
            .map_err(AppError::from)
    }
}
