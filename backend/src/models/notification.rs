//! Models for user-facing notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{NotificationId, ProfileId};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_id: ProfileId,
    pub title: String,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(recipient_id: ProfileId, title: String, body: String, now: DateTime<Utc>) -> Self {
        Self {
            id: NotificationId::new(),
            recipient_id,
            title,
            body,
            read: false,
            created_at: now,
        }
    }
}
