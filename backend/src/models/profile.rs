//! Models for user profiles and their permission grades.
//!
//! Profiles and grades are owned by the wider HR application; this service
//! only reads them to resolve caller identity and forced-checkout rights.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{GradeId, ProfileId};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
/// Database representation of a user profile.
pub struct Profile {
    pub id: ProfileId,
    pub full_name: String,
    /// Inactive accounts are rejected before any presence operation.
    pub active: bool,
    pub manager_id: Option<ProfileId>,
    pub grade_id: Option<GradeId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Flattened view of a profile joined to its grade, as consumed by the
/// permission resolver. A profile without a grade resolves with every flag
/// false.
#[derive(Debug, Clone, FromRow)]
pub struct PermissionProfile {
    pub profile_id: ProfileId,
    pub manager_id: Option<ProfileId>,
    pub can_force_checkout: bool,
    pub can_manage_team: bool,
    pub can_view_all_data: bool,
}
