//! Telework presence lifecycle service.
//!
//! Orchestrates the five presence operations over the session store, the
//! permission resolver, and the audit/notification side channels. All clock
//! reads happen here on the server; client-reported time only ever enters as
//! a clamped per-heartbeat increment.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::notification::Notification;
use crate::models::session::{
    ActivityEntry, CheckInRequest, CheckInResponse, CheckOutRequest, CheckOutResponse,
    CurrentSessionResponse, ForcedCheckOutRequest, ForcedCheckOutResponse, HeartbeatRequest,
    HeartbeatResponse, PresenceStatus, SessionClosure, StatusUpdateRequest, StatusUpdateResponse,
    TeleworkSession,
};
use crate::permissions::{self, Access, DenyReason};
use crate::repositories::{
    NotificationRepositoryTrait, ProfileRepositoryTrait, SessionRepositoryTrait,
};
use crate::services::audit_log::{AuditLogEntry, AuditLogServiceTrait};
use crate::types::{ProfileId, SessionId};
use crate::utils::time;
use crate::validation;

const MSG_INVALID_SESSION_REF: &str = "Invalid session reference";
const MSG_SESSION_NOT_FOUND: &str = "Session not found";
const MSG_SESSION_CLOSED: &str = "Session already closed";
const MSG_PERMISSION_DENIED: &str = "Permission denied";
const MSG_OWN_TEAM_ONLY: &str = "You can only act on members of your own team";

const TERMINAL_NOTE: &str = "Session terminée";
const FORCED_TERMINAL_NOTE: &str = "Session terminée par le responsable";
const FORCED_NOTIFICATION_TITLE: &str = "Session clôturée";

/// Best-effort request metadata captured at check-in.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub country: Option<String>,
    pub device: Option<String>,
    pub ip_address: Option<String>,
    pub request_id: Option<String>,
}

pub struct PresenceService {
    sessions: Arc<dyn SessionRepositoryTrait>,
    profiles: Arc<dyn ProfileRepositoryTrait>,
    notifications: Arc<dyn NotificationRepositoryTrait>,
    audit: Arc<dyn AuditLogServiceTrait>,
    time_zone: Tz,
    heartbeat_ceiling: i64,
}

impl PresenceService {
    pub fn new(
        sessions: Arc<dyn SessionRepositoryTrait>,
        profiles: Arc<dyn ProfileRepositoryTrait>,
        notifications: Arc<dyn NotificationRepositoryTrait>,
        audit: Arc<dyn AuditLogServiceTrait>,
        time_zone: Tz,
        heartbeat_ceiling: i64,
    ) -> Self {
        Self {
            sessions,
            profiles,
            notifications,
            audit,
            time_zone,
            heartbeat_ceiling,
        }
    }

    /// Opens a presence session for the caller. At most one open session per
    /// user exists; a conflicting check-in reports the existing session id.
    pub async fn check_in(
        &self,
        db: &PgPool,
        caller: ProfileId,
        payload: CheckInRequest,
        meta: RequestMeta,
    ) -> Result<CheckInResponse, AppError> {
        let now = Utc::now();
        let (day_start, day_end) = time::day_bounds_utc(&self.time_zone, time::today_local(&self.time_zone));

        if let Some(existing) = self
            .sessions
            .find_open_for_user(db, caller, day_start, day_end)
            .await?
        {
            return Err(AppError::AlreadyCheckedIn(existing.id));
        }

        let mut session = TeleworkSession::new(caller, now);
        session.country = meta.country.as_deref().and_then(validation::sanitize_metadata);
        session.device = meta.device.as_deref().and_then(validation::sanitize_metadata);
        session.ip_address = meta
            .ip_address
            .as_deref()
            .and_then(validation::sanitize_metadata);

        if let Some(raw) = payload.activity.as_deref() {
            let note = validation::sanitize_activity(raw);
            if !note.is_empty() {
                session
                    .activities
                    .0
                    .push(ActivityEntry::new(now, note, PresenceStatus::Connecte));
            }
        }

        let created = match self.sessions.insert_session(db, &session).await {
            Ok(created) => created,
            // Lost a same-instant race: the unique index fired after our
            // precondition read. Report the winner's session id.
            Err(AppError::Conflict(_)) => {
                let winner = self
                    .sessions
                    .find_open_for_user(db, caller, day_start, day_end)
                    .await?;
                return match winner {
                    Some(existing) => Err(AppError::AlreadyCheckedIn(existing.id)),
                    None => Err(AppError::Conflict("A session is already active".to_string())),
                };
            }
            Err(err) => return Err(err),
        };

        tracing::info!(
            session = %validation::id_prefix(&created.id.to_string()),
            user = %validation::id_prefix(&caller.to_string()),
            "Telework session opened"
        );
        self.record_audit(
            db,
            "presence.check_in",
            caller,
            created.id,
            None,
            snapshot(&created),
            &meta,
            now,
        )
        .await;

        Ok(CheckInResponse {
            session_id: created.id,
            check_in: created.check_in,
            current_status: created.current_status,
            country: created.country,
        })
    }

    /// Applies a heartbeat to the caller's open session: any subset of a
    /// clamped elapsed-seconds delta, a status switch, and an activity note.
    pub async fn heartbeat(
        &self,
        db: &PgPool,
        caller: ProfileId,
        payload: HeartbeatRequest,
    ) -> Result<HeartbeatResponse, AppError> {
        let status = match payload.current_status.as_deref() {
            Some(raw) => Some(
                validation::parse_client_status(raw)
                    .ok_or_else(|| AppError::BadRequest("Invalid status value".to_string()))?,
            ),
            None => None,
        };
        let delta = validation::clamp_active_seconds(
            payload.active_seconds.unwrap_or(0),
            self.heartbeat_ceiling,
        );

        let updated = self
            .apply_to_open_session(
                db,
                caller,
                &payload.session_id,
                delta,
                status,
                payload.activity.as_deref(),
                "presence.heartbeat",
            )
            .await?;

        Ok(HeartbeatResponse {
            session_id: updated.id,
            active_seconds: updated.active_seconds,
            current_status: updated.current_status,
        })
    }

    /// Heartbeat specialization that only switches the presence status.
    pub async fn update_status(
        &self,
        db: &PgPool,
        caller: ProfileId,
        payload: StatusUpdateRequest,
    ) -> Result<StatusUpdateResponse, AppError> {
        let status = validation::parse_client_status(&payload.current_status)
            .ok_or_else(|| AppError::BadRequest("Invalid status value".to_string()))?;

        let updated = self
            .apply_to_open_session(
                db,
                caller,
                &payload.session_id,
                0,
                Some(status),
                None,
                "presence.status",
            )
            .await?;

        Ok(StatusUpdateResponse {
            session_id: updated.id,
            current_status: updated.current_status,
        })
    }

    /// Closes the caller's own open session.
    pub async fn check_out(
        &self,
        db: &PgPool,
        caller: ProfileId,
        payload: CheckOutRequest,
    ) -> Result<CheckOutResponse, AppError> {
        let session_id = validation::parse_session_id(&payload.session_id)
            .ok_or_else(|| AppError::BadRequest(MSG_INVALID_SESSION_REF.to_string()))?;

        let prior = self.owned_session(db, session_id, caller).await?;
        if !prior.is_open() {
            return Err(AppError::Conflict(MSG_SESSION_CLOSED.to_string()));
        }

        let now = Utc::now();
        let duration_seconds = prior.duration_seconds(now);

        let mut entries = Vec::new();
        if let Some(raw) = payload.final_activity.as_deref() {
            let note = validation::sanitize_activity(raw);
            if !note.is_empty() {
                entries.push(ActivityEntry::new(now, note, prior.current_status));
            }
        }
        entries.push(ActivityEntry::new(
            now,
            TERMINAL_NOTE.to_string(),
            PresenceStatus::HorsLigne,
        ));

        let closure = SessionClosure {
            check_out: now,
            duration_seconds,
            forced_by: None,
            entries,
        };
        let closed = self
            .sessions
            .close_session(db, session_id, caller, closure)
            .await?
            .ok_or_else(|| AppError::Conflict(MSG_SESSION_CLOSED.to_string()))?;

        tracing::info!(
            session = %validation::id_prefix(&session_id.to_string()),
            duration_seconds,
            "Telework session closed"
        );
        self.record_audit(
            db,
            "presence.check_out",
            caller,
            session_id,
            snapshot(&prior),
            snapshot(&closed),
            &RequestMeta::default(),
            now,
        )
        .await;

        Ok(CheckOutResponse {
            session_id: closed.id,
            check_in: closed.check_in,
            check_out: closed.check_out.unwrap_or(now),
            duration_seconds,
            duration_formatted: time::format_duration_hm(duration_seconds),
        })
    }

    /// Terminates another user's open session on behalf of an authorized
    /// manager or auditor, notifying the affected user.
    pub async fn force_check_out(
        &self,
        db: &PgPool,
        actor: ProfileId,
        payload: ForcedCheckOutRequest,
        meta: RequestMeta,
    ) -> Result<ForcedCheckOutResponse, AppError> {
        let session_id = validation::parse_session_id(&payload.session_id)
            .ok_or_else(|| AppError::BadRequest(MSG_INVALID_SESSION_REF.to_string()))?;

        let actor_perms = self
            .profiles
            .permission_profile(db, actor)
            .await?
            .ok_or_else(|| AppError::Forbidden(MSG_PERMISSION_DENIED.to_string()))?;

        let target = self
            .sessions
            .find_by_id(db, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(MSG_SESSION_NOT_FOUND.to_string()))?;
        if !target.is_open() {
            return Err(AppError::Conflict(MSG_SESSION_CLOSED.to_string()));
        }

        let owner_perms = self
            .profiles
            .permission_profile(db, target.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(MSG_SESSION_NOT_FOUND.to_string()))?;

        match permissions::can_force_checkout(&actor_perms, &owner_perms) {
            Access::Allowed => {}
            Access::Denied(reason) => {
                tracing::warn!(
                    actor = %validation::id_prefix(&actor.to_string()),
                    session = %validation::id_prefix(&session_id.to_string()),
                    %reason,
                    "Forced checkout denied"
                );
                let message = match reason {
                    DenyReason::NotDirectReport => MSG_OWN_TEAM_ONLY,
                    _ => MSG_PERMISSION_DENIED,
                };
                return Err(AppError::Forbidden(message.to_string()));
            }
        }

        let now = Utc::now();
        let duration_seconds = target.duration_seconds(now);
        let reason = payload
            .reason
            .as_deref()
            .map(validation::sanitize_reason)
            .filter(|r| !r.is_empty());
        let note = match reason.as_deref() {
            Some(reason) => format!("{}: {}", FORCED_TERMINAL_NOTE, reason),
            None => FORCED_TERMINAL_NOTE.to_string(),
        };

        let closure = SessionClosure {
            check_out: now,
            duration_seconds,
            forced_by: Some(actor),
            entries: vec![ActivityEntry::new(now, note.clone(), PresenceStatus::HorsLigne)],
        };
        let closed = self
            .sessions
            .close_session(db, session_id, target.user_id, closure)
            .await?
            .ok_or_else(|| AppError::Conflict(MSG_SESSION_CLOSED.to_string()))?;

        let notification = Notification::new(target.user_id, FORCED_NOTIFICATION_TITLE.to_string(), note, now);
        if let Err(err) = self.notifications.insert(db, &notification).await {
            tracing::error!(?err, "Failed to write forced-checkout notification");
        }

        tracing::info!(
            session = %validation::id_prefix(&session_id.to_string()),
            actor = %validation::id_prefix(&actor.to_string()),
            "Telework session force-closed"
        );
        self.record_audit(
            db,
            "presence.force_check_out",
            actor,
            session_id,
            snapshot(&target),
            snapshot(&closed),
            &meta,
            now,
        )
        .await;

        Ok(ForcedCheckOutResponse {
            session_id: closed.id,
            check_out: closed.check_out.unwrap_or(now),
            forced_checkout: true,
        })
    }

    /// Read-only snapshot of the caller's current presence.
    pub async fn current_session(
        &self,
        db: &PgPool,
        caller: ProfileId,
    ) -> Result<CurrentSessionResponse, AppError> {
        let (day_start, day_end) = time::day_bounds_utc(&self.time_zone, time::today_local(&self.time_zone));
        let open = self
            .sessions
            .find_open_for_user(db, caller, day_start, day_end)
            .await?;

        Ok(match open {
            Some(session) => CurrentSessionResponse {
                current_status: session.current_status,
                session: Some(session.into()),
            },
            None => CurrentSessionResponse {
                session: None,
                current_status: PresenceStatus::HorsLigne,
            },
        })
    }

    /// Shared heartbeat/status path: verifies ownership and openness, applies
    /// the update scoped to still-open rows, and audits the transition.
    #[allow(clippy::too_many_arguments)]
    async fn apply_to_open_session(
        &self,
        db: &PgPool,
        caller: ProfileId,
        session_id_raw: &str,
        delta_seconds: i64,
        status: Option<PresenceStatus>,
        activity: Option<&str>,
        action: &str,
    ) -> Result<TeleworkSession, AppError> {
        let session_id = validation::parse_session_id(session_id_raw)
            .ok_or_else(|| AppError::BadRequest(MSG_INVALID_SESSION_REF.to_string()))?;

        let prior = self.owned_session(db, session_id, caller).await?;
        if !prior.is_open() {
            return Err(AppError::NotFound(MSG_SESSION_NOT_FOUND.to_string()));
        }

        let now = Utc::now();
        let mut entries = Vec::new();
        if let Some(raw) = activity {
            let note = validation::sanitize_activity(raw);
            if !note.is_empty() {
                let effective = status.unwrap_or(prior.current_status);
                entries.push(ActivityEntry::new(now, note, effective));
            }
        }

        let updated = self
            .sessions
            .apply_heartbeat(db, session_id, caller, delta_seconds, status, entries)
            .await?
            .ok_or_else(|| AppError::NotFound(MSG_SESSION_NOT_FOUND.to_string()))?;

        self.record_audit(
            db,
            action,
            caller,
            session_id,
            snapshot(&prior),
            snapshot(&updated),
            &RequestMeta::default(),
            now,
        )
        .await;

        Ok(updated)
    }

    /// Loads a session and collapses "missing" and "foreign" into the same
    /// not-found answer so callers cannot probe other users' session ids.
    async fn owned_session(
        &self,
        db: &PgPool,
        session_id: SessionId,
        caller: ProfileId,
    ) -> Result<TeleworkSession, AppError> {
        let session = self
            .sessions
            .find_by_id(db, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(MSG_SESSION_NOT_FOUND.to_string()))?;
        match permissions::can_act_on(caller, &session) {
            Access::Allowed => Ok(session),
            Access::Denied(reason) => {
                tracing::debug!(
                    session = %validation::id_prefix(&session_id.to_string()),
                    caller = %validation::id_prefix(&caller.to_string()),
                    %reason,
                    "Session access refused"
                );
                Err(AppError::NotFound(MSG_SESSION_NOT_FOUND.to_string()))
            }
        }
    }

    /// Audit write failures are logged in full server-side but never fail the
    /// user-visible operation.
    #[allow(clippy::too_many_arguments)]
    async fn record_audit(
        &self,
        db: &PgPool,
        action: &str,
        actor: ProfileId,
        target: SessionId,
        before: Option<Value>,
        after: Option<Value>,
        meta: &RequestMeta,
        now: DateTime<Utc>,
    ) {
        let entry = AuditLogEntry {
            occurred_at: now,
            actor_id: Some(actor),
            action: action.to_string(),
            target_table: "telework_sessions".to_string(),
            target_id: Some(target.to_string()),
            before,
            after,
            ip: meta.ip_address.clone(),
            request_id: meta.request_id.clone(),
        };
        if let Err(err) = self.audit.record_event(db, entry).await {
            tracing::error!(?err, action, "Failed to write audit record");
        }
    }
}

fn snapshot(session: &TeleworkSession) -> Option<Value> {
    serde_json::to_value(session).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::profile::PermissionProfile;
    use crate::repositories::notification::MockNotificationRepositoryTrait;
    use crate::repositories::profile::MockProfileRepositoryTrait;
    use crate::repositories::session::MockSessionRepositoryTrait;
    use crate::services::audit_log::MockAuditLogServiceTrait;
    use chrono::Duration;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy("postgres://localhost/test")
            .expect("create lazy pool")
    }

    fn service(
        sessions: MockSessionRepositoryTrait,
        profiles: MockProfileRepositoryTrait,
        notifications: MockNotificationRepositoryTrait,
        audit: MockAuditLogServiceTrait,
    ) -> PresenceService {
        PresenceService::new(
            Arc::new(sessions),
            Arc::new(profiles),
            Arc::new(notifications),
            Arc::new(audit),
            chrono_tz::UTC,
            300,
        )
    }

    fn quiet_audit() -> MockAuditLogServiceTrait {
        let mut audit = MockAuditLogServiceTrait::new();
        audit.expect_record_event().returning(|_, _| Ok(()));
        audit
    }

    fn open_session(owner: ProfileId, opened_ago: Duration) -> TeleworkSession {
        let mut session = TeleworkSession::new(owner, Utc::now() - opened_ago);
        session.active_seconds = 0;
        session
    }

    fn perms(
        profile_id: ProfileId,
        can_force_checkout: bool,
        can_view_all_data: bool,
        manager_id: Option<ProfileId>,
    ) -> PermissionProfile {
        PermissionProfile {
            profile_id,
            manager_id,
            can_force_checkout,
            can_manage_team: false,
            can_view_all_data,
        }
    }

    #[tokio::test]
    async fn check_in_creates_connected_session_with_sanitized_metadata() {
        let pool = lazy_pool();
        let caller = ProfileId::new();

        let mut sessions = MockSessionRepositoryTrait::new();
        sessions
            .expect_find_open_for_user()
            .times(1)
            .returning(|_, _, _, _| Ok(None));
        sessions
            .expect_insert_session()
            .times(1)
            .withf(|_, session| {
                session.device.as_deref() == Some("Mozilla/5.0 X11")
                    && session.country.as_deref() == Some("FR")
                    && session.activities.0.len() == 1
                    && session.activities.0[0].description == "Point du matin"
                    && session.activities.0[0].kind == "connecte"
            })
            .returning(|_, session| Ok(session.clone()));

        let mut audit = MockAuditLogServiceTrait::new();
        audit
            .expect_record_event()
            .times(1)
            .withf(|_, entry| {
                entry.action == "presence.check_in"
                    && entry.target_table == "telework_sessions"
                    && entry.before.is_none()
                    && entry.after.is_some()
            })
            .returning(|_, _| Ok(()));

        let svc = service(
            sessions,
            MockProfileRepositoryTrait::new(),
            MockNotificationRepositoryTrait::new(),
            audit,
        );
        let meta = RequestMeta {
            country: Some("FR".to_string()),
            device: Some("Mozilla/5.0 <X11>".to_string()),
            ..Default::default()
        };
        let payload = CheckInRequest {
            activity: Some("  Point   du matin ".to_string()),
        };

        let response = svc.check_in(&pool, caller, payload, meta).await.expect("check in");
        assert_eq!(response.current_status, PresenceStatus::Connecte);
        assert_eq!(response.country.as_deref(), Some("FR"));
    }

    #[tokio::test]
    async fn check_in_without_note_creates_empty_activity_log() {
        let pool = lazy_pool();
        let caller = ProfileId::new();

        let mut sessions = MockSessionRepositoryTrait::new();
        sessions
            .expect_find_open_for_user()
            .returning(|_, _, _, _| Ok(None));
        sessions
            .expect_insert_session()
            .withf(|_, session| session.activities.0.is_empty() && session.active_seconds == 0)
            .returning(|_, session| Ok(session.clone()));

        let svc = service(
            sessions,
            MockProfileRepositoryTrait::new(),
            MockNotificationRepositoryTrait::new(),
            quiet_audit(),
        );
        let response = svc
            .check_in(&pool, caller, CheckInRequest { activity: None }, RequestMeta::default())
            .await
            .expect("check in");
        assert_eq!(response.current_status, PresenceStatus::Connecte);
    }

    #[tokio::test]
    async fn second_check_in_reports_the_existing_session_id() {
        let pool = lazy_pool();
        let caller = ProfileId::new();
        let existing = open_session(caller, Duration::minutes(30));
        let existing_id = existing.id;

        let mut sessions = MockSessionRepositoryTrait::new();
        sessions
            .expect_find_open_for_user()
            .times(1)
            .returning(move |_, _, _, _| Ok(Some(existing.clone())));
        sessions.expect_insert_session().never();

        let svc = service(
            sessions,
            MockProfileRepositoryTrait::new(),
            MockNotificationRepositoryTrait::new(),
            MockAuditLogServiceTrait::new(),
        );
        let err = svc
            .check_in(&pool, caller, CheckInRequest { activity: None }, RequestMeta::default())
            .await
            .expect_err("conflict");
        match err {
            AppError::AlreadyCheckedIn(id) => assert_eq!(id, existing_id),
            other => panic!("expected AlreadyCheckedIn, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn check_in_losing_a_race_reports_the_winner_session_id() {
        let pool = lazy_pool();
        let caller = ProfileId::new();
        let winner = open_session(caller, Duration::seconds(1));
        let winner_id = winner.id;

        let calls = AtomicUsize::new(0);
        let mut sessions = MockSessionRepositoryTrait::new();
        sessions
            .expect_find_open_for_user()
            .times(2)
            .returning(move |_, _, _, _| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(None)
                } else {
                    Ok(Some(winner.clone()))
                }
            });
        sessions
            .expect_insert_session()
            .times(1)
            .returning(|_, _| Err(AppError::Conflict("Duplicate record".to_string())));

        let svc = service(
            sessions,
            MockProfileRepositoryTrait::new(),
            MockNotificationRepositoryTrait::new(),
            MockAuditLogServiceTrait::new(),
        );
        let err = svc
            .check_in(&pool, caller, CheckInRequest { activity: None }, RequestMeta::default())
            .await
            .expect_err("conflict");
        match err {
            AppError::AlreadyCheckedIn(id) => assert_eq!(id, winner_id),
            other => panic!("expected AlreadyCheckedIn, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn heartbeat_applies_clamped_delta_status_and_note() {
        let pool = lazy_pool();
        let caller = ProfileId::new();
        let prior = open_session(caller, Duration::minutes(10));
        let session_id = prior.id;

        let mut sessions = MockSessionRepositoryTrait::new();
        {
            let prior = prior.clone();
            sessions
                .expect_find_by_id()
                .times(1)
                .returning(move |_, _| Ok(Some(prior.clone())));
        }
        sessions
            .expect_apply_heartbeat()
            .times(1)
            .withf(move |_, id, owner, delta, status, entries| {
                *id == session_id
                    && *owner == caller
                    && *delta == 120
                    && *status == Some(PresenceStatus::Pause)
                    && entries.len() == 1
                    && entries[0].kind == "pause"
            })
            .returning(move |_, _, _, delta, status, _| {
                let mut updated = prior.clone();
                updated.active_seconds += delta;
                if let Some(status) = status {
                    updated.current_status = status;
                }
                Ok(Some(updated))
            });

        let mut audit = MockAuditLogServiceTrait::new();
        audit
            .expect_record_event()
            .times(1)
            .withf(|_, entry| entry.action == "presence.heartbeat" && entry.before.is_some())
            .returning(|_, _| Ok(()));

        let svc = service(
            sessions,
            MockProfileRepositoryTrait::new(),
            MockNotificationRepositoryTrait::new(),
            audit,
        );
        let payload = HeartbeatRequest {
            session_id: session_id.to_string(),
            active_seconds: Some(120),
            current_status: Some("pause".to_string()),
            activity: Some("Pause café".to_string()),
        };

        let response = svc.heartbeat(&pool, caller, payload).await.expect("heartbeat");
        assert_eq!(response.active_seconds, 120);
        assert_eq!(response.current_status, PresenceStatus::Pause);
    }

    #[tokio::test]
    async fn heartbeat_clamps_oversized_and_negative_deltas() {
        for (supplied, expected) in [(5_000i64, 300i64), (-50, 0)] {
            let pool = lazy_pool();
            let caller = ProfileId::new();
            let prior = open_session(caller, Duration::minutes(5));
            let session_id = prior.id;

            let mut sessions = MockSessionRepositoryTrait::new();
            {
                let prior = prior.clone();
                sessions
                    .expect_find_by_id()
                    .returning(move |_, _| Ok(Some(prior.clone())));
            }
            sessions
                .expect_apply_heartbeat()
                .withf(move |_, _, _, delta, _, _| *delta == expected)
                .returning(move |_, _, _, delta, _, _| {
                    let mut updated = prior.clone();
                    updated.active_seconds += delta;
                    Ok(Some(updated))
                });

            let svc = service(
                sessions,
                MockProfileRepositoryTrait::new(),
                MockNotificationRepositoryTrait::new(),
                quiet_audit(),
            );
            let payload = HeartbeatRequest {
                session_id: session_id.to_string(),
                active_seconds: Some(supplied),
                current_status: None,
                activity: None,
            };
            let response = svc.heartbeat(&pool, caller, payload).await.expect("heartbeat");
            assert_eq!(response.active_seconds, expected);
        }
    }

    #[tokio::test]
    async fn heartbeat_rejects_malformed_session_reference_before_the_store() {
        let pool = lazy_pool();
        let svc = service(
            MockSessionRepositoryTrait::new(),
            MockProfileRepositoryTrait::new(),
            MockNotificationRepositoryTrait::new(),
            MockAuditLogServiceTrait::new(),
        );
        let payload = HeartbeatRequest {
            session_id: "'; DROP TABLE telework_sessions; --".to_string(),
            active_seconds: Some(60),
            current_status: None,
            activity: None,
        };
        let err = svc
            .heartbeat(&pool, ProfileId::new(), payload)
            .await
            .expect_err("bad request");
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn heartbeat_rejects_terminal_status_value() {
        let pool = lazy_pool();
        let svc = service(
            MockSessionRepositoryTrait::new(),
            MockProfileRepositoryTrait::new(),
            MockNotificationRepositoryTrait::new(),
            MockAuditLogServiceTrait::new(),
        );
        let payload = HeartbeatRequest {
            session_id: SessionId::new().to_string(),
            active_seconds: None,
            current_status: Some("hors_ligne".to_string()),
            activity: None,
        };
        let err = svc
            .heartbeat(&pool, ProfileId::new(), payload)
            .await
            .expect_err("bad request");
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn heartbeat_on_foreign_or_closed_session_is_not_found() {
        let pool = lazy_pool();
        let caller = ProfileId::new();

        // Foreign session: owned by someone else.
        let foreign = open_session(ProfileId::new(), Duration::minutes(5));
        let foreign_id = foreign.id;
        let mut sessions = MockSessionRepositoryTrait::new();
        sessions
            .expect_find_by_id()
            .returning(move |_, _| Ok(Some(foreign.clone())));
        let svc = service(
            sessions,
            MockProfileRepositoryTrait::new(),
            MockNotificationRepositoryTrait::new(),
            MockAuditLogServiceTrait::new(),
        );
        let payload = HeartbeatRequest {
            session_id: foreign_id.to_string(),
            active_seconds: Some(60),
            current_status: None,
            activity: None,
        };
        let err = svc.heartbeat(&pool, caller, payload).await.expect_err("not found");
        assert!(matches!(err, AppError::NotFound(_)));

        // Closed session owned by the caller.
        let mut closed = open_session(caller, Duration::hours(3));
        closed.check_out = Some(Utc::now());
        closed.current_status = PresenceStatus::HorsLigne;
        let closed_id = closed.id;
        let mut sessions = MockSessionRepositoryTrait::new();
        sessions
            .expect_find_by_id()
            .returning(move |_, _| Ok(Some(closed.clone())));
        let svc = service(
            sessions,
            MockProfileRepositoryTrait::new(),
            MockNotificationRepositoryTrait::new(),
            MockAuditLogServiceTrait::new(),
        );
        let payload = HeartbeatRequest {
            session_id: closed_id.to_string(),
            active_seconds: Some(60),
            current_status: None,
            activity: None,
        };
        let err = svc.heartbeat(&pool, caller, payload).await.expect_err("not found");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn status_update_switches_only_the_status() {
        let pool = lazy_pool();
        let caller = ProfileId::new();
        let prior = open_session(caller, Duration::minutes(20));
        let session_id = prior.id;

        let mut sessions = MockSessionRepositoryTrait::new();
        {
            let prior = prior.clone();
            sessions
                .expect_find_by_id()
                .returning(move |_, _| Ok(Some(prior.clone())));
        }
        sessions
            .expect_apply_heartbeat()
            .withf(|_, _, _, delta, status, entries| {
                *delta == 0 && *status == Some(PresenceStatus::Reunion) && entries.is_empty()
            })
            .returning(move |_, _, _, _, status, _| {
                let mut updated = prior.clone();
                updated.current_status = status.expect("status set");
                Ok(Some(updated))
            });

        let mut audit = MockAuditLogServiceTrait::new();
        audit
            .expect_record_event()
            .withf(|_, entry| entry.action == "presence.status")
            .returning(|_, _| Ok(()));

        let svc = service(
            sessions,
            MockProfileRepositoryTrait::new(),
            MockNotificationRepositoryTrait::new(),
            audit,
        );
        let payload = StatusUpdateRequest {
            session_id: session_id.to_string(),
            current_status: "reunion".to_string(),
        };
        let response = svc.update_status(&pool, caller, payload).await.expect("status");
        assert_eq!(response.current_status, PresenceStatus::Reunion);
    }

    #[tokio::test]
    async fn checkout_computes_server_side_duration_and_floors_the_accumulator() {
        let pool = lazy_pool();
        let caller = ProfileId::new();
        let prior = open_session(caller, Duration::hours(2));
        let session_id = prior.id;

        let mut sessions = MockSessionRepositoryTrait::new();
        {
            let prior = prior.clone();
            sessions
                .expect_find_by_id()
                .returning(move |_, _| Ok(Some(prior.clone())));
        }
        sessions
            .expect_close_session()
            .times(1)
            .withf(|_, _, _, closure| {
                (7200..7205).contains(&closure.duration_seconds)
                    && closure.forced_by.is_none()
                    && closure
                        .entries
                        .last()
                        .map(|entry| entry.description == "Session terminée" && entry.kind == "hors_ligne")
                        .unwrap_or(false)
            })
            .returning(move |_, _, _, closure| {
                let mut closed = prior.clone();
                closed.check_out = Some(closure.check_out);
                closed.current_status = PresenceStatus::HorsLigne;
                closed.active_seconds = closed.active_seconds.max(closure.duration_seconds);
                closed.activities.0.extend(closure.entries);
                Ok(Some(closed))
            });

        let mut audit = MockAuditLogServiceTrait::new();
        audit
            .expect_record_event()
            .times(1)
            .withf(|_, entry| {
                entry.action == "presence.check_out"
                    && entry.before.is_some()
                    && entry.after.is_some()
            })
            .returning(|_, _| Ok(()));

        let svc = service(
            sessions,
            MockProfileRepositoryTrait::new(),
            MockNotificationRepositoryTrait::new(),
            audit,
        );
        let payload = CheckOutRequest {
            session_id: session_id.to_string(),
            final_activity: None,
        };
        let response = svc.check_out(&pool, caller, payload).await.expect("check out");
        assert!((7200..7205).contains(&response.duration_seconds));
        assert_eq!(response.duration_formatted, "2h00");
        assert!(response.check_out > response.check_in);
    }

    #[tokio::test]
    async fn checkout_of_an_already_closed_session_conflicts() {
        let pool = lazy_pool();
        let caller = ProfileId::new();
        let mut closed = open_session(caller, Duration::hours(1));
        closed.check_out = Some(Utc::now());
        closed.current_status = PresenceStatus::HorsLigne;
        let session_id = closed.id;

        let mut sessions = MockSessionRepositoryTrait::new();
        sessions
            .expect_find_by_id()
            .returning(move |_, _| Ok(Some(closed.clone())));
        sessions.expect_close_session().never();

        let svc = service(
            sessions,
            MockProfileRepositoryTrait::new(),
            MockNotificationRepositoryTrait::new(),
            MockAuditLogServiceTrait::new(),
        );
        let payload = CheckOutRequest {
            session_id: session_id.to_string(),
            final_activity: None,
        };
        let err = svc.check_out(&pool, caller, payload).await.expect_err("conflict");
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn checkout_racing_a_concurrent_close_conflicts_instead_of_double_closing() {
        let pool = lazy_pool();
        let caller = ProfileId::new();
        let prior = open_session(caller, Duration::hours(1));
        let session_id = prior.id;

        let mut sessions = MockSessionRepositoryTrait::new();
        sessions
            .expect_find_by_id()
            .returning(move |_, _| Ok(Some(prior.clone())));
        // The open-scoped UPDATE matched no row: someone else closed it first.
        sessions
            .expect_close_session()
            .returning(|_, _, _, _| Ok(None));

        let svc = service(
            sessions,
            MockProfileRepositoryTrait::new(),
            MockNotificationRepositoryTrait::new(),
            MockAuditLogServiceTrait::new(),
        );
        let payload = CheckOutRequest {
            session_id: session_id.to_string(),
            final_activity: None,
        };
        let err = svc.check_out(&pool, caller, payload).await.expect_err("conflict");
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn forced_checkout_by_direct_manager_closes_notifies_and_audits() {
        let pool = lazy_pool();
        let actor = ProfileId::new();
        let owner = ProfileId::new();
        let target = open_session(owner, Duration::hours(1));
        let session_id = target.id;

        let mut profiles = MockProfileRepositoryTrait::new();
        {
            let actor_perms = perms(actor, true, false, None);
            profiles
                .expect_permission_profile()
                .withf(move |_, id| *id == actor)
                .returning(move |_, _| Ok(Some(actor_perms.clone())));
        }
        {
            let owner_perms = perms(owner, false, false, Some(actor));
            profiles
                .expect_permission_profile()
                .withf(move |_, id| *id == owner)
                .returning(move |_, _| Ok(Some(owner_perms.clone())));
        }

        let mut sessions = MockSessionRepositoryTrait::new();
        {
            let target = target.clone();
            sessions
                .expect_find_by_id()
                .returning(move |_, _| Ok(Some(target.clone())));
        }
        sessions
            .expect_close_session()
            .times(1)
            .withf(move |_, id, session_owner, closure| {
                *id == session_id
                    && *session_owner == owner
                    && closure.forced_by == Some(actor)
                    && closure
                        .entries
                        .last()
                        .map(|entry| entry.description.contains("pas de réponse"))
                        .unwrap_or(false)
            })
            .returning(move |_, _, _, closure| {
                let mut closed = target.clone();
                closed.check_out = Some(closure.check_out);
                closed.current_status = PresenceStatus::HorsLigne;
                closed.forced_checkout = true;
                closed.forced_by = closure.forced_by;
                Ok(Some(closed))
            });

        let mut notifications = MockNotificationRepositoryTrait::new();
        notifications
            .expect_insert()
            .times(1)
            .withf(move |_, notification| {
                notification.recipient_id == owner && notification.body.contains("pas de réponse")
            })
            .returning(|_, _| Ok(()));

        let mut audit = MockAuditLogServiceTrait::new();
        audit
            .expect_record_event()
            .times(1)
            .withf(move |_, entry| {
                entry.action == "presence.force_check_out"
                    && entry.actor_id == Some(actor)
                    && entry.target_id.as_deref() == Some(session_id.to_string().as_str())
            })
            .returning(|_, _| Ok(()));

        let svc = service(sessions, profiles, notifications, audit);
        let payload = ForcedCheckOutRequest {
            session_id: session_id.to_string(),
            reason: Some("pas de réponse".to_string()),
        };
        let response = svc
            .force_check_out(&pool, actor, payload, RequestMeta::default())
            .await
            .expect("forced checkout");
        assert!(response.forced_checkout);
        assert_eq!(response.session_id, session_id);
    }

    #[tokio::test]
    async fn forced_checkout_without_grade_flags_is_denied() {
        let pool = lazy_pool();
        let actor = ProfileId::new();
        let owner = ProfileId::new();
        let target = open_session(owner, Duration::minutes(30));
        let session_id = target.id;

        let mut profiles = MockProfileRepositoryTrait::new();
        {
            let actor_perms = perms(actor, false, false, None);
            profiles
                .expect_permission_profile()
                .withf(move |_, id| *id == actor)
                .returning(move |_, _| Ok(Some(actor_perms.clone())));
        }
        {
            let owner_perms = perms(owner, false, false, Some(actor));
            profiles
                .expect_permission_profile()
                .withf(move |_, id| *id == owner)
                .returning(move |_, _| Ok(Some(owner_perms.clone())));
        }

        let mut sessions = MockSessionRepositoryTrait::new();
        sessions
            .expect_find_by_id()
            .returning(move |_, _| Ok(Some(target.clone())));
        sessions.expect_close_session().never();

        let svc = service(
            sessions,
            profiles,
            MockNotificationRepositoryTrait::new(),
            MockAuditLogServiceTrait::new(),
        );
        let payload = ForcedCheckOutRequest {
            session_id: session_id.to_string(),
            reason: None,
        };
        let err = svc
            .force_check_out(&pool, actor, payload, RequestMeta::default())
            .await
            .expect_err("forbidden");
        match err {
            AppError::Forbidden(message) => assert_eq!(message, MSG_PERMISSION_DENIED),
            other => panic!("expected Forbidden, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn forced_checkout_outside_own_team_is_denied() {
        let pool = lazy_pool();
        let actor = ProfileId::new();
        let owner = ProfileId::new();
        let target = open_session(owner, Duration::minutes(30));
        let session_id = target.id;

        let mut profiles = MockProfileRepositoryTrait::new();
        {
            let actor_perms = perms(actor, true, false, None);
            profiles
                .expect_permission_profile()
                .withf(move |_, id| *id == actor)
                .returning(move |_, _| Ok(Some(actor_perms.clone())));
        }
        {
            let owner_perms = perms(owner, false, false, Some(ProfileId::new()));
            profiles
                .expect_permission_profile()
                .withf(move |_, id| *id == owner)
                .returning(move |_, _| Ok(Some(owner_perms.clone())));
        }

        let mut sessions = MockSessionRepositoryTrait::new();
        sessions
            .expect_find_by_id()
            .returning(move |_, _| Ok(Some(target.clone())));
        sessions.expect_close_session().never();

        let svc = service(
            sessions,
            profiles,
            MockNotificationRepositoryTrait::new(),
            MockAuditLogServiceTrait::new(),
        );
        let payload = ForcedCheckOutRequest {
            session_id: session_id.to_string(),
            reason: None,
        };
        let err = svc
            .force_check_out(&pool, actor, payload, RequestMeta::default())
            .await
            .expect_err("forbidden");
        match err {
            AppError::Forbidden(message) => assert_eq!(message, MSG_OWN_TEAM_ONLY),
            other => panic!("expected Forbidden, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn forced_checkout_of_closed_session_conflicts() {
        let pool = lazy_pool();
        let actor = ProfileId::new();
        let owner = ProfileId::new();
        let mut target = open_session(owner, Duration::hours(2));
        target.check_out = Some(Utc::now());
        target.current_status = PresenceStatus::HorsLigne;
        let session_id = target.id;

        let mut profiles = MockProfileRepositoryTrait::new();
        {
            let actor_perms = perms(actor, true, true, None);
            profiles
                .expect_permission_profile()
                .returning(move |_, _| Ok(Some(actor_perms.clone())));
        }

        let mut sessions = MockSessionRepositoryTrait::new();
        sessions
            .expect_find_by_id()
            .returning(move |_, _| Ok(Some(target.clone())));
        sessions.expect_close_session().never();

        let svc = service(
            sessions,
            profiles,
            MockNotificationRepositoryTrait::new(),
            MockAuditLogServiceTrait::new(),
        );
        let payload = ForcedCheckOutRequest {
            session_id: session_id.to_string(),
            reason: None,
        };
        let err = svc
            .force_check_out(&pool, actor, payload, RequestMeta::default())
            .await
            .expect_err("conflict");
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn current_session_defaults_to_offline_when_nothing_is_open() {
        let pool = lazy_pool();
        let mut sessions = MockSessionRepositoryTrait::new();
        sessions
            .expect_find_open_for_user()
            .returning(|_, _, _, _| Ok(None));

        let svc = service(
            sessions,
            MockProfileRepositoryTrait::new(),
            MockNotificationRepositoryTrait::new(),
            MockAuditLogServiceTrait::new(),
        );
        let response = svc
            .current_session(&pool, ProfileId::new())
            .await
            .expect("current session");
        assert!(response.session.is_none());
        assert_eq!(response.current_status, PresenceStatus::HorsLigne);
    }
}
