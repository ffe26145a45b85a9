//! Blacklist entries, the immutable audit log and compensation accounting.
//!
//! A blacklisted buyer's payments accumulate as compensation; once the total
//! reaches the configured threshold the entry is removed automatically and
//! the buyer regains access.

use sqlx::MySqlPool;

use crate::text::normalize_owner;

pub async fn is_blacklisted(
    pool: &MySqlPool,
    user_id: i64,
    workspace_id: Option<i64>,
    owner: &str,
) -> sqlx::Result<bool> {
    let owner_key = normalize_owner(owner);
    if owner_key.is_empty() {
        return Ok(false);
    }
    let found = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT 1 FROM blacklist
        WHERE owner = ? AND user_id = ? AND workspace_id <=> ?
        LIMIT 1
        "#,
    )
    .bind(&owner_key)
    .bind(user_id)
    .bind(workspace_id)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

/// Append to the immutable blacklist audit log.
pub async fn log_event(
    pool: &MySqlPool,
    user_id: i64,
    workspace_id: Option<i64>,
    owner: &str,
    action: &str,
    reason: Option<&str>,
    details: Option<&str>,
    amount: Option<i64>,
) -> sqlx::Result<()> {
    let owner_key = normalize_owner(owner);
    if owner_key.is_empty() {
        return Ok(());
    }
    sqlx::query(
        r#"
        INSERT INTO blacklist_logs (owner, action, reason, details, amount, user_id, workspace_id)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&owner_key)
    .bind(action)
    .bind(reason)
    .bind(details)
    .bind(amount)
    .bind(user_id)
    .bind(workspace_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Total compensation minutes the buyer has paid so far.
pub async fn compensation_total(
    pool: &MySqlPool,
    user_id: i64,
    owner: &str,
) -> sqlx::Result<i64> {
    let owner_key = normalize_owner(owner);
    if owner_key.is_empty() {
        return Ok(0);
    }
    let total: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT CAST(COALESCE(SUM(amount), 0) AS SIGNED) FROM blacklist_logs
        WHERE owner = ? AND user_id = ? AND action = 'blacklist_comp'
        "#,
    )
    .bind(&owner_key)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(total.unwrap_or(0))
}

pub async fn remove_entry(pool: &MySqlPool, user_id: i64, owner: &str) -> sqlx::Result<bool> {
    let owner_key = normalize_owner(owner);
    if owner_key.is_empty() {
        return Ok(false);
    }
    let result = sqlx::query("DELETE FROM blacklist WHERE owner = ? AND user_id = ?")
        .bind(&owner_key)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Record a suggested blacklist candidate for the dashboard to review (for
/// example the previous holder of an account that needed replacement).
/// Returns whether a new suggestion row was created.
pub async fn upsert_suggestion(
    pool: &MySqlPool,
    user_id: i64,
    workspace_id: Option<i64>,
    owner: &str,
    reason: &str,
    details: &str,
) -> sqlx::Result<bool> {
    let owner_key = normalize_owner(owner);
    if owner_key.is_empty() {
        return Ok(false);
    }
    let result = sqlx::query(
        r#"
        INSERT INTO blacklist_suggestions (owner, reason, details, user_id, workspace_id)
        VALUES (?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE details = VALUES(details), updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(&owner_key)
    .bind(reason)
    .bind(details)
    .bind(user_id)
    .bind(workspace_id)
    .execute(pool)
    .await?;
    // MySQL reports 1 for insert, 2 for duplicate-key update.
    Ok(result.rows_affected() == 1)
}
