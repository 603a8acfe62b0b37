//! Decision logic for acting on another user's presence session.
//!
//! Pure functions over resolved [`PermissionProfile`] values; no I/O happens
//! here. Denial reasons are written to audit metadata only and never echoed
//! verbatim to callers.

use thiserror::Error;

use crate::models::profile::PermissionProfile;
use crate::models::session::TeleworkSession;
use crate::types::ProfileId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("actor grade carries neither can_force_checkout nor can_view_all_data")]
    InsufficientGrade,
    #[error("target session owner is not a direct report of the actor")]
    NotDirectReport,
    #[error("actor is not the session owner")]
    NotOwner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allowed,
    Denied(DenyReason),
}

impl Access {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Access::Allowed)
    }
}

/// Whether the actor may touch this session through the self-service paths
/// (heartbeat, status switch, checkout). Only the owner may; terminating
/// someone else's session goes through [`can_force_checkout`].
pub fn can_act_on(actor: ProfileId, session: &TeleworkSession) -> Access {
    if session.user_id == actor {
        Access::Allowed
    } else {
        Access::Denied(DenyReason::NotOwner)
    }
}

/// Whether the actor may force-terminate a session owned by `owner`.
///
/// Requires `can_force_checkout` or `can_view_all_data` on the actor's grade.
/// Without the global-view flag, the owner must additionally report directly
/// to the actor.
pub fn can_force_checkout(actor: &PermissionProfile, owner: &PermissionProfile) -> Access {
    if !actor.can_force_checkout && !actor.can_view_all_data {
        return Access::Denied(DenyReason::InsufficientGrade);
    }
    if actor.can_view_all_data {
        return Access::Allowed;
    }
    if owner.manager_id == Some(actor.profile_id) {
        Access::Allowed
    } else {
        Access::Denied(DenyReason::NotDirectReport)
    }
}
