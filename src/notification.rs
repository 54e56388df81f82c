use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::{
    error::Result,
    query::pagination::{Page, Pagination},
    realtime::RealtimePush,
    utils::now,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Enrollment,
    CourseCompleted,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub is_read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: i64,
        title: &str,
        message: &str,
        kind: NotificationKind,
    ) -> anyhow::Result<()>;
}

/// Persisted notifications, pushed live to the user as they are created.
#[derive(Clone)]
pub struct NotificationStore {
    database: SqlitePool,
    realtime: Arc<dyn RealtimePush>,
}

impl NotificationStore {
    pub fn new(database: SqlitePool, realtime: Arc<dyn RealtimePush>) -> Self {
        Self { database, realtime }
    }

    pub async fn create(
        &self,
        user_id: i64,
        title: &str,
        message: &str,
        kind: NotificationKind,
    ) -> Result<Notification> {
        let notification = sqlx::query_as::<_, Notification>(
            "INSERT INTO notifications (user_id, title, message, kind, is_read, created_at) \
             VALUES (?, ?, ?, ?, 0, ?) \
             RETURNING id, user_id, title, message, kind, is_read, created_at",
        )
        .bind(user_id)
        .bind(title)
        .bind(message)
        .bind(kind)
        .bind(now())
        .fetch_one(&self.database)
        .await?;
        self.realtime.push(
            user_id,
            "notification:new",
            json!({
                "id": notification.id,
                "title": notification.title,
                "message": notification.message,
                "type": notification.kind,
            }),
        );
        Ok(notification)
    }

    /// Newest first
    pub async fn list(&self, user_id: i64, page: Pagination) -> Result<Page<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(
            "SELECT id, user_id, title, message, kind, is_read, created_at FROM notifications \
             WHERE user_id = ?1 \
               AND (?2 IS NULL OR (created_at, id) < \
                    (SELECT created_at, id FROM notifications WHERE id = ?2)) \
             ORDER BY created_at DESC, id DESC \
             LIMIT ?3",
        )
        .bind(user_id)
        .bind(page.after)
        .bind(page.fetch_limit())
        .fetch_all(&self.database)
        .await?;
        Ok(Page::from_rows(rows, page.limit, |n| n.id))
    }

    pub async fn unread_count(&self, user_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0",
        )
        .bind(user_id)
        .fetch_one(&self.database)
        .await?;
        Ok(count)
    }

    /// Only the owner's notifications are touched; returns whether one was updated.
    pub async fn mark_read(&self, id: i64, user_id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.database)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_all_read(&self, user_id: i64) -> Result<u64> {
        let result =
            sqlx::query("UPDATE notifications SET is_read = 1 WHERE user_id = ? AND is_read = 0")
                .bind(user_id)
                .execute(&self.database)
                .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Notifier for NotificationStore {
    async fn notify(
        &self,
        user_id: i64,
        title: &str,
        message: &str,
        kind: NotificationKind,
    ) -> anyhow::Result<()> {
        self.create(user_id, title, message, kind).await?;
        Ok(())
    }
}
