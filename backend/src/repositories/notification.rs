//! Persistence for user-facing notifications.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::notification::Notification;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationRepositoryTrait: Send + Sync {
    async fn insert(&self, db: &PgPool, notification: &Notification) -> Result<(), AppError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NotificationRepository;

impl NotificationRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationRepositoryTrait for NotificationRepository {
    async fn insert(&self, db: &PgPool, notification: &Notification) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO notifications (id, recipient_id, title, body, read, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(notification.id)
        .bind(notification.recipient_id)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(db)
        .await
        .map(|_| ())
        .map_err(AppError::from)
    }
}
