//! Notification feed rows consumed by the dashboard.

use sqlx::MySqlPool;

use crate::text::normalize_owner;

#[derive(Debug, Clone, Default)]
pub struct NotificationEvent {
    pub event_type: String,
    pub status: String,
    pub title: String,
    pub message: Option<String>,
    pub owner: Option<String>,
    pub account_name: Option<String>,
    pub account_id: Option<i64>,
    pub order_id: Option<String>,
    pub user_id: i64,
    pub workspace_id: Option<i64>,
}

pub async fn log_event(pool: &MySqlPool, event: &NotificationEvent) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO notification_logs (
            event_type, status, title, message, owner, account_name,
            account_id, order_id, user_id, workspace_id
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&event.event_type)
    .bind(&event.status)
    .bind(&event.title)
    .bind(event.message.as_deref())
    .bind(event.owner.as_deref().map(normalize_owner))
    .bind(
        event
            .account_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty()),
    )
    .bind(event.account_id)
    .bind(
        event
            .order_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty()),
    )
    .bind(event.user_id)
    .bind(event.workspace_id)
    .execute(pool)
    .await?;
    Ok(())
}
