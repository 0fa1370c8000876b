//! Notification records on Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Db;
use crate::error::{Error, Result};
use crate::model::*;
use crate::store::NotificationStore;

const SELECT_NOTIFICATION: &str = "SELECT id, user_id, title, message, kind, reference_id, channel, is_read, sent, created_at FROM notifications";

#[async_trait]
impl NotificationStore for Db {
    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        sqlx::query(
            "INSERT INTO notifications (id, user_id, title, message, kind, reference_id, channel, is_read, sent, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(notification.id)
        .bind(notification.user_id.0)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.kind.as_str())
        .bind(notification.reference_id.map(|c| c.0))
        .bind(notification.channel.as_str())
        .bind(notification.read)
        .bind(notification.sent)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn notifications_for_user(
        &self,
        user_id: UserId,
        read: Option<bool>,
    ) -> Result<Vec<Notification>> {
        let rows: Vec<NotificationRow> = sqlx::query_as(&format!(
            "{SELECT_NOTIFICATION}
             WHERE user_id = $1 AND ($2::boolean IS NULL OR is_read = $2)
             ORDER BY created_at DESC"
        ))
        .bind(user_id.0)
        .bind(read)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(NotificationRow::try_into_notification)
            .collect()
    }

    async fn mark_read(&self, id: Uuid) -> Result<Notification> {
        let row: Option<NotificationRow> = sqlx::query_as(
            "UPDATE notifications SET is_read = TRUE WHERE id = $1
             RETURNING id, user_id, title, message, kind, reference_id, channel, is_read, sent, created_at",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| Error::NotFound(format!("notification {id}")))?
            .try_into_notification()
    }

    async fn mark_all_read(&self, user_id: UserId) -> Result<u64> {
        let changed = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE user_id = $1 AND NOT is_read",
        )
        .bind(user_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(changed)
    }

    async fn count_unread(&self, user_id: UserId) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND NOT is_read")
                .bind(user_id.0)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    user_id: Uuid,
    title: String,
    message: String,
    kind: String,
    reference_id: Option<Uuid>,
    channel: String,
    is_read: bool,
    sent: bool,
    created_at: DateTime<Utc>,
}

impl NotificationRow {
    fn try_into_notification(self) -> Result<Notification> {
        Ok(Notification {
            id: self.id,
            user_id: UserId(self.user_id),
            title: self.title,
            message: self.message,
            kind: self.kind.parse()?,
            reference_id: self.reference_id.map(ComplaintId),
            channel: self.channel.parse()?,
            read: self.is_read,
            sent: self.sent,
            created_at: self.created_at,
        })
    }
}
