//! Chat snapshots, message history and the outbound message queue.
//!
//! Message rows are unique per (workspace, chat, message_id), which is what
//! makes a duplicate send after a crash harmless. Admin-call commands inside
//! incoming messages bump the chat's admin counters and leave a notification
//! for the dashboard.

use chrono::NaiveDateTime;
use sqlx::MySqlPool;

use crate::store::notifications::{self, NotificationEvent};
use crate::text;

/// An incoming or outgoing chat message to persist.
#[derive(Debug, Clone)]
pub struct NewChatMessage<'a> {
    pub user_id: i64,
    pub workspace_id: Option<i64>,
    pub chat_id: i64,
    pub message_id: i64,
    pub author: Option<&'a str>,
    pub text: Option<&'a str>,
    pub by_bot: bool,
    pub message_type: Option<&'a str>,
    pub sent_time: Option<NaiveDateTime>,
}

/// Insert a message if unseen. Returns whether a row was created. A fresh
/// buyer message containing the admin command flags the chat.
pub async fn insert_message(
    pool: &MySqlPool,
    message: &NewChatMessage<'_>,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO chat_messages (
            message_id, chat_id, author, text, sent_time, by_bot, message_type,
            user_id, workspace_id
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE id = id
        "#,
    )
    .bind(message.message_id)
    .bind(message.chat_id)
    .bind(message.author.map(str::trim))
    .bind(message.text)
    .bind(message.sent_time)
    .bind(message.by_bot)
    .bind(message.message_type)
    .bind(message.user_id)
    .bind(message.workspace_id)
    .execute(pool)
    .await?;

    let inserted = result.rows_affected() == 1;
    if inserted
        && !message.by_bot
        && message.text.map(text::contains_admin_call).unwrap_or(false)
    {
        record_admin_call(pool, message).await?;
    }
    Ok(inserted)
}

async fn record_admin_call(
    pool: &MySqlPool,
    message: &NewChatMessage<'_>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE chats
        SET admin_unread_count = admin_unread_count + 1,
            admin_requested = 1
        WHERE user_id = ? AND workspace_id <=> ? AND chat_id = ?
        "#,
    )
    .bind(message.user_id)
    .bind(message.workspace_id)
    .bind(message.chat_id)
    .execute(pool)
    .await?;

    notifications::log_event(
        pool,
        &NotificationEvent {
            event_type: "admin_call".into(),
            status: "new".into(),
            title: "Admin request received".into(),
            message: Some(format!(
                "Buyer requested admin assistance. Open chat: https://funpay.com/chat/?node={}",
                message.chat_id
            )),
            owner: message.author.map(|a| a.to_string()),
            account_name: None,
            account_id: None,
            order_id: None,
            user_id: message.user_id,
            workspace_id: message.workspace_id,
        },
    )
    .await
}

/// Upsert a chat snapshot. Admin flags are never touched here — the
/// dashboard clears them. The last-message time only advances when the
/// preview text actually changed.
pub async fn upsert_summary(
    pool: &MySqlPool,
    user_id: i64,
    workspace_id: Option<i64>,
    chat_id: i64,
    name: Option<&str>,
    last_message_text: Option<&str>,
    unread: bool,
    last_message_time: Option<NaiveDateTime>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chats (
            chat_id, name, last_message_text, last_message_time, unread,
            admin_unread_count, admin_requested, user_id, workspace_id
        )
        VALUES (?, ?, ?, ?, ?, 0, 0, ?, ?)
        ON DUPLICATE KEY UPDATE
            name = COALESCE(VALUES(name), name),
            last_message_text = VALUES(last_message_text),
            last_message_time = CASE
                WHEN VALUES(last_message_time) IS NULL THEN last_message_time
                WHEN last_message_text IS NULL OR VALUES(last_message_text) <> last_message_text
                    THEN VALUES(last_message_time)
                ELSE last_message_time
            END,
            unread = VALUES(unread)
        "#,
    )
    .bind(chat_id)
    .bind(name.map(str::trim).filter(|s| !s.is_empty()))
    .bind(last_message_text.map(str::trim).filter(|s| !s.is_empty()))
    .bind(last_message_time)
    .bind(unread)
    .bind(user_id)
    .bind(workspace_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// A queued outbound chat message.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxRow {
    pub id: i64,
    pub chat_id: i64,
    pub text: String,
    pub attempts: i32,
}

/// Oldest pending outbox rows, FIFO per workspace.
pub async fn fetch_outbox(
    pool: &MySqlPool,
    user_id: i64,
    workspace_id: Option<i64>,
    limit: i64,
) -> sqlx::Result<Vec<OutboxRow>> {
    sqlx::query_as::<_, OutboxRow>(
        r#"
        SELECT id, chat_id, text, COALESCE(attempts, 0) AS attempts
        FROM chat_outbox
        WHERE status = 'pending' AND user_id = ? AND workspace_id <=> ?
        ORDER BY id ASC
        LIMIT ?
        "#,
    )
    .bind(user_id)
    .bind(workspace_id)
    .bind(limit.clamp(1, 200))
    .fetch_all(pool)
    .await
}

pub async fn mark_outbox_sent(pool: &MySqlPool, outbox_id: i64) -> sqlx::Result<()> {
    sqlx::query("UPDATE chat_outbox SET status = 'sent', sent_at = NOW() WHERE id = ?")
        .bind(outbox_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Bump attempts; past the cap the row is parked as `failed` with the error.
pub async fn mark_outbox_failed(
    pool: &MySqlPool,
    outbox_id: i64,
    attempts: i32,
    max_attempts: i32,
    error: &str,
) -> sqlx::Result<()> {
    let status = if attempts >= max_attempts {
        "failed"
    } else {
        "pending"
    };
    sqlx::query(
        "UPDATE chat_outbox SET status = ?, attempts = ?, last_error = ? WHERE id = ?",
    )
    .bind(status)
    .bind(attempts)
    .bind(error.chars().take(500).collect::<String>())
    .bind(outbox_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Of the given chats, the ones with no stored message history (candidates
/// for backfill).
pub async fn chats_missing_history(
    pool: &MySqlPool,
    user_id: i64,
    workspace_id: Option<i64>,
    chat_ids: &[i64],
) -> sqlx::Result<Vec<i64>> {
    if chat_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; chat_ids.len()].join(", ");
    let query = format!(
        r#"
        SELECT DISTINCT chat_id FROM chat_messages
        WHERE user_id = ? AND workspace_id <=> ? AND chat_id IN ({placeholders})
        "#
    );
    let mut q = sqlx::query_scalar::<_, i64>(&query)
        .bind(user_id)
        .bind(workspace_id);
    for id in chat_ids {
        q = q.bind(id);
    }
    let existing: Vec<i64> = q.fetch_all(pool).await?;
    Ok(chat_ids
        .iter()
        .copied()
        .filter(|id| !existing.contains(id))
        .collect())
}
