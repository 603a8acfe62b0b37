use sqlx::PgPool;

use crate::models::audit_log::AuditLog;

pub async fn insert_audit_log(pool: &PgPool, log: &AuditLog) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_logs \
         (id, occurred_at, actor_id, action, target_table, target_id, before, after, ip, request_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(log.id)
    .bind(log.occurred_at)
    .bind(log.actor_id)
    .bind(&log.action)
    .bind(&log.target_table)
    .bind(&log.target_id)
    .bind(&log.before)
    .bind(&log.after)
    .bind(&log.ip)
    .bind(&log.request_id)
    .execute(pool)
    .await
    .map(|_| ())
}
