//! Bonus wallet: rental-minutes buyers can apply to active rentals.
//!
//! The balance and its history are written atomically inside a row-locked
//! transaction so a review bonus and a `!бонус` application cannot race.

use sqlx::MySqlPool;

use crate::text::normalize_owner;

pub async fn balance(
    pool: &MySqlPool,
    user_id: i64,
    workspace_id: Option<i64>,
    owner: &str,
) -> sqlx::Result<i64> {
    let owner_key = normalize_owner(owner);
    if owner_key.is_empty() {
        return Ok(0);
    }
    let value: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT balance_minutes FROM bonus_wallet
        WHERE user_id = ? AND workspace_id <=> ? AND owner = ?
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(workspace_id)
    .bind(&owner_key)
    .fetch_optional(pool)
    .await?;
    Ok(value.unwrap_or(0))
}

/// Adjust the wallet by `delta_minutes` (negative to spend), clamped at
/// zero, and append a history row. Returns `(new_balance, applied)` where
/// `applied` is the actual signed change.
pub async fn adjust(
    pool: &MySqlPool,
    user_id: i64,
    workspace_id: Option<i64>,
    owner: &str,
    delta_minutes: i64,
    reason: &str,
    order_id: Option<&str>,
    account_id: Option<i64>,
) -> sqlx::Result<(i64, i64)> {
    let owner_key = normalize_owner(owner);
    if owner_key.is_empty() {
        return Ok((0, 0));
    }

    let mut tx = pool.begin().await?;

    let current: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT balance_minutes FROM bonus_wallet
        WHERE user_id = ? AND workspace_id <=> ? AND owner = ?
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(user_id)
    .bind(workspace_id)
    .bind(&owner_key)
    .fetch_optional(&mut *tx)
    .await?;

    let current = current.unwrap_or(0);
    let new_balance = (current + delta_minutes).max(0);
    let applied = new_balance - current;

    if current == 0 && new_balance == 0 {
        // Nothing to write; skip creating empty wallets on failed debits.
        tx.rollback().await?;
        return Ok((0, 0));
    }

    sqlx::query(
        r#"
        INSERT INTO bonus_wallet (user_id, workspace_id, owner, balance_minutes)
        VALUES (?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
            balance_minutes = VALUES(balance_minutes),
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(user_id)
    .bind(workspace_id)
    .bind(&owner_key)
    .bind(new_balance)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO bonus_history (
            user_id, workspace_id, owner, delta_minutes, balance_minutes,
            reason, order_id, account_id
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(workspace_id)
    .bind(&owner_key)
    .bind(applied)
    .bind(new_balance)
    .bind(reason.chars().take(64).collect::<String>())
    .bind(order_id.map(str::trim))
    .bind(account_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok((new_balance, applied))
}
