//! Read access to profiles and their permission grades.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::profile::{PermissionProfile, Profile};
use crate::types::ProfileId;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileRepositoryTrait: Send + Sync {
    async fn find_by_id(
        &self,
        db: &PgPool,
        id: ProfileId,
    ) -> Result<Option<Profile>, AppError>;

    /// Resolves a profile joined to its grade into a single optional
    /// permission view. A profile without a grade resolves with all flags
    /// false; a missing profile resolves to `None`.
    async fn permission_profile(
        &self,
        db: &PgPool,
        id: ProfileId,
    ) -> Result<Option<PermissionProfile>, AppError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProfileRepository;

impl ProfileRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProfileRepositoryTrait for ProfileRepository {
    async fn find_by_id(
        &self,
        db: &PgPool,
        id: ProfileId,
    ) -> Result<Option<Profile>, AppError> {
        let row = sqlx::query_as::<_, Profile>(
            "SELECT id, full_name, active, manager_id, grade_id, created_at, updated_at \
             FROM profiles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    async fn permission_profile(
        &self,
        db: &PgPool,
        id: ProfileId,
    ) -> Result<Option<PermissionProfile>, AppError> {
        let row = sqlx::query_as::<_, PermissionProfile>(
            "SELECT p.id AS profile_id, p.manager_id, \
                    COALESCE(g.can_force_checkout, FALSE) AS can_force_checkout, \
                    COALESCE(g.can_manage_team, FALSE) AS can_manage_team, \
                    COALESCE(g.can_view_all_data, FALSE) AS can_view_all_data \
             FROM profiles p \
             LEFT JOIN grades g ON g.id = p.grade_id \
             WHERE p.id = $1",
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }
}
