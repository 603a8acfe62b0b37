//! Session store accessor.
//!
//! Single source of truth for telework session records. Every mutating query
//! is scoped `WHERE ... AND check_out IS NULL`, so a writer racing against a
//! concurrent close observes "no row" instead of resurrecting or double-closing
//! a session. The one-open-session invariant itself is backed by a partial
//! unique index; the INSERT surfaces its violation as a conflict.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgPool};

use crate::error::AppError;
use crate::models::session::{
    ActivityEntry, PresenceStatus, SessionClosure, TeleworkSession,
};
use crate::types::{ProfileId, SessionId};

const SELECT_COLUMNS: &str = "id, user_id, check_in, check_out, current_status, active_seconds, \
     activities, country, device, ip_address, forced_checkout, forced_by, created_at, updated_at";

/// Repository trait for telework session operations.
///
/// Mockable with mockall; use `MockSessionRepositoryTrait` in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionRepositoryTrait: Send + Sync {
    /// The caller's open session whose check-in falls within `[from, to)`,
    /// if any.
    async fn find_open_for_user(
        &self,
        db: &PgPool,
        user_id: ProfileId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<TeleworkSession>, AppError>;

    /// Inserts a freshly opened session. A concurrent open session for the
    /// same user trips the partial unique index and surfaces as `Conflict`.
    async fn insert_session(
        &self,
        db: &PgPool,
        session: &TeleworkSession,
    ) -> Result<TeleworkSession, AppError>;

    /// Unscoped read, used to locate a forced-checkout target before
    /// permission resolution.
    async fn find_by_id(
        &self,
        db: &PgPool,
        id: SessionId,
    ) -> Result<Option<TeleworkSession>, AppError>;

    /// Applies a heartbeat to an open session owned by `owner`. Returns the
    /// updated row, or `None` when the session is missing, foreign or closed.
    async fn apply_heartbeat(
        &self,
        db: &PgPool,
        id: SessionId,
        owner: ProfileId,
        delta_seconds: i64,
        status: Option<PresenceStatus>,
        entries: Vec<ActivityEntry>,
    ) -> Result<Option<TeleworkSession>, AppError>;

    /// Terminates an open session owned by `owner`. Returns the closed row,
    /// or `None` when it was already closed (or never existed).
    async fn close_session(
        &self,
        db: &PgPool,
        id: SessionId,
        owner: ProfileId,
        closure: SessionClosure,
    ) -> Result<Option<TeleworkSession>, AppError>;
}

/// Concrete Postgres implementation of [`SessionRepositoryTrait`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionRepository;

impl SessionRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionRepositoryTrait for SessionRepository {
    async fn find_open_for_user(
        &self,
        db: &PgPool,
        user_id: ProfileId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<TeleworkSession>, AppError> {
        let query = format!(
            "SELECT {} FROM telework_sessions \
             WHERE user_id = $1 AND check_out IS NULL AND check_in >= $2 AND check_in < $3 \
             ORDER BY check_in DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, TeleworkSession>(&query)
            .bind(user_id)
            .bind(from)
            .bind(to)
            .fetch_optional(db)
            .await?;
        Ok(row)
    }

    async fn insert_session(
        &self,
        db: &PgPool,
        session: &TeleworkSession,
    ) -> Result<TeleworkSession, AppError> {
        let query = format!(
            "INSERT INTO telework_sessions \
             (id, user_id, check_in, check_out, current_status, active_seconds, activities, \
              country, device, ip_address, forced_checkout, forced_by, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING {}",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, TeleworkSession>(&query)
            .bind(session.id)
            .bind(session.user_id)
            .bind(session.check_in)
            .bind(session.check_out)
            .bind(session.current_status.as_str())
            .bind(session.active_seconds)
            .bind(&session.activities)
            .bind(&session.country)
            .bind(&session.device)
            .bind(&session.ip_address)
            .bind(session.forced_checkout)
            .bind(session.forced_by)
            .bind(session.created_at)
            .bind(session.updated_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }

    async fn find_by_id(
        &self,
        db: &PgPool,
        id: SessionId,
    ) -> Result<Option<TeleworkSession>, AppError> {
        let query = format!(
            "SELECT {} FROM telework_sessions WHERE id = $1",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, TeleworkSession>(&query)
            .bind(id)
            .fetch_optional(db)
            .await?;
        Ok(row)
    }

    async fn apply_heartbeat(
        &self,
        db: &PgPool,
        id: SessionId,
        owner: ProfileId,
        delta_seconds: i64,
        status: Option<PresenceStatus>,
        entries: Vec<ActivityEntry>,
    ) -> Result<Option<TeleworkSession>, AppError> {
        let query = format!(
            "UPDATE telework_sessions \
             SET active_seconds = active_seconds + $3, \
                 current_status = COALESCE($4, current_status), \
                 activities = activities || $5, \
                 updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND check_out IS NULL \
             RETURNING {}",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, TeleworkSession>(&query)
            .bind(id)
            .bind(owner)
            .bind(delta_seconds)
            .bind(status.map(|s| s.as_str()))
            .bind(Json(entries))
            .fetch_optional(db)
            .await?;
        Ok(row)
    }

    async fn close_session(
        &self,
        db: &PgPool,
        id: SessionId,
        owner: ProfileId,
        closure: SessionClosure,
    ) -> Result<Option<TeleworkSession>, AppError> {
        let query = format!(
            "UPDATE telework_sessions \
             SET check_out = $3, \
                 current_status = 'hors_ligne', \
                 active_seconds = GREATEST(active_seconds, $4), \
                 forced_checkout = $5, \
                 forced_by = $6, \
                 activities = activities || $7, \
                 updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND check_out IS NULL \
             RETURNING {}",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, TeleworkSession>(&query)
            .bind(id)
            .bind(owner)
            .bind(closure.check_out)
            .bind(closure.duration_seconds)
            .bind(closure.forced_by.is_some())
            .bind(closure.forced_by)
            .bind(Json(closure.entries))
            .fetch_optional(db)
            .await?;
        Ok(row)
    }
}
