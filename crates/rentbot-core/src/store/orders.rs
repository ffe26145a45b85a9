//! Append-only order history.
//!
//! Every order-related decision leaves a row here: it is the dedup source
//! for replayed events, the audit trail for review bonuses and blacklist
//! compensation, and the dataset behind the dashboard statistics.

use sqlx::MySqlPool;

use crate::store::notifications::{self, NotificationEvent};
use crate::text::normalize_owner;

/// What happened to an order. Stored as a short string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    Paid,
    Assign,
    Extend,
    ReplaceAssign,
    Refunded,
    Closed,
    Busy,
    Unmapped,
    Blacklisted,
    BlacklistComp,
    ReviewBonus,
    ReviewBonusRevert,
    TicketAuto,
}

impl OrderAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderAction::Paid => "paid",
            OrderAction::Assign => "assign",
            OrderAction::Extend => "extend",
            OrderAction::ReplaceAssign => "replace_assign",
            OrderAction::Refunded => "refunded",
            OrderAction::Closed => "closed",
            OrderAction::Busy => "busy",
            OrderAction::Unmapped => "unmapped",
            OrderAction::Blacklisted => "blacklisted",
            OrderAction::BlacklistComp => "blacklist_comp",
            OrderAction::ReviewBonus => "review_bonus",
            OrderAction::ReviewBonusRevert => "review_bonus_revert",
            OrderAction::TicketAuto => "ticket_auto",
        }
    }
}

/// Actions that mean the order already went through intake; a replayed
/// purchase event with one of these on file is a no-op.
const TERMINAL_ACTIONS: &[&str] = &[
    "assign",
    "extend",
    "replace_assign",
    "busy",
    "unmapped",
    "blacklist_comp",
];

/// One history insert. Only the identifying fields are mandatory.
#[derive(Debug, Clone, Default)]
pub struct OrderRecord {
    pub order_id: String,
    pub owner: String,
    pub user_id: i64,
    pub workspace_id: Option<i64>,
    pub account_id: Option<i64>,
    pub account_name: Option<String>,
    pub steam_id: Option<String>,
    pub rental_minutes: Option<i64>,
    pub lot_number: Option<i64>,
    pub amount: Option<i64>,
    pub price: Option<f64>,
}

/// Strip the leading `#` the marketplace shows in front of order ids.
pub fn normalize_order_id(order_id: &str) -> String {
    order_id.trim().trim_start_matches('#').to_string()
}

/// Append a history row and mirror it into the notification feed.
pub async fn log_order(
    pool: &MySqlPool,
    record: &OrderRecord,
    action: OrderAction,
) -> sqlx::Result<()> {
    let order_key = normalize_order_id(&record.order_id);
    let owner_key = normalize_owner(&record.owner);
    if order_key.is_empty() || owner_key.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r#"
        INSERT INTO order_history (
            order_id, owner, account_name, account_id, steam_id, rental_minutes,
            lot_number, amount, price, action, user_id, workspace_id
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&order_key)
    .bind(&owner_key)
    .bind(record.account_name.as_deref().map(str::trim))
    .bind(record.account_id)
    .bind(record.steam_id.as_deref())
    .bind(record.rental_minutes)
    .bind(record.lot_number)
    .bind(record.amount)
    .bind(record.price)
    .bind(action.as_str())
    .bind(record.user_id)
    .bind(record.workspace_id)
    .execute(pool)
    .await?;

    notifications::log_event(
        pool,
        &NotificationEvent {
            event_type: "purchase".into(),
            status: "ok".into(),
            title: "Order activity".into(),
            message: Some(format!("Order {} action: {}.", order_key, action.as_str())),
            owner: Some(owner_key),
            account_name: record.account_name.clone(),
            account_id: record.account_id,
            order_id: Some(order_key.clone()),
            user_id: record.user_id,
            workspace_id: record.workspace_id,
        },
    )
    .await?;
    Ok(())
}

/// Whether intake already produced a terminal action for this order.
pub async fn is_order_handled(
    pool: &MySqlPool,
    user_id: i64,
    workspace_id: Option<i64>,
    order_id: &str,
) -> sqlx::Result<bool> {
    let order_key = normalize_order_id(order_id);
    let placeholders = vec!["?"; TERMINAL_ACTIONS.len()].join(", ");
    let query = format!(
        r#"
        SELECT 1 FROM order_history
        WHERE order_id = ? AND user_id = ? AND workspace_id <=> ? AND action IN ({placeholders})
        LIMIT 1
        "#
    );
    let mut q = sqlx::query_scalar::<_, i64>(&query)
        .bind(&order_key)
        .bind(user_id)
        .bind(workspace_id);
    for action in TERMINAL_ACTIONS {
        q = q.bind(*action);
    }
    Ok(q.fetch_optional(pool).await?.is_some())
}

pub async fn has_action(
    pool: &MySqlPool,
    user_id: i64,
    workspace_id: Option<i64>,
    order_id: &str,
    owner: &str,
    action: OrderAction,
) -> sqlx::Result<bool> {
    let found = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT 1 FROM order_history
        WHERE order_id = ? AND owner = ? AND user_id = ? AND workspace_id <=> ? AND action = ?
        LIMIT 1
        "#,
    )
    .bind(normalize_order_id(order_id))
    .bind(normalize_owner(owner))
    .bind(user_id)
    .bind(workspace_id)
    .bind(action.as_str())
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

/// The issue row behind an order (what was handed out and for how long),
/// used by review bonuses.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderSummary {
    pub account_id: Option<i64>,
    pub account_name: Option<String>,
    pub user_id: i64,
    pub workspace_id: Option<i64>,
    pub rental_minutes: Option<i64>,
    pub lot_number: Option<i64>,
    pub action: String,
}

pub async fn fetch_order_summary(
    pool: &MySqlPool,
    order_id: &str,
    owner: &str,
) -> sqlx::Result<Option<OrderSummary>> {
    sqlx::query_as::<_, OrderSummary>(
        r#"
        SELECT account_id, account_name, user_id, workspace_id, rental_minutes, lot_number, action
        FROM order_history
        WHERE order_id = ? AND owner = ?
          AND action IN ('assign', 'extend', 'replace_assign')
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(normalize_order_id(order_id))
    .bind(normalize_owner(owner))
    .fetch_optional(pool)
    .await
}

/// The buyer behind an order, from its most recent history row.
pub async fn fetch_order_owner(
    pool: &MySqlPool,
    order_id: &str,
) -> sqlx::Result<Option<String>> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT owner FROM order_history
        WHERE order_id = ?
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(normalize_order_id(order_id))
    .fetch_optional(pool)
    .await
}

/// Account the buyer most recently received for a lot; lets a repeat
/// purchase of the same lot extend the account actually in hand.
pub async fn latest_account_for_owner_lot(
    pool: &MySqlPool,
    user_id: i64,
    workspace_id: Option<i64>,
    owner: &str,
    lot_number: i64,
) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar::<_, Option<i64>>(
        r#"
        SELECT account_id FROM order_history
        WHERE owner = ? AND lot_number = ? AND user_id = ? AND workspace_id <=> ?
          AND account_id IS NOT NULL
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(normalize_owner(owner))
    .bind(lot_number)
    .bind(user_id)
    .bind(workspace_id)
    .fetch_optional(pool)
    .await
    .map(Option::flatten)
}

/// Latest order id involving an account + buyer; fills the confirm deep
/// link in the expiry message.
pub async fn latest_order_id_for_account(
    pool: &MySqlPool,
    user_id: i64,
    workspace_id: Option<i64>,
    account_id: i64,
    owner: &str,
) -> sqlx::Result<Option<String>> {
    sqlx::query_scalar::<_, Option<String>>(
        r#"
        SELECT order_id FROM order_history
        WHERE user_id = ? AND account_id = ? AND owner = ? AND workspace_id <=> ?
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(account_id)
    .bind(normalize_owner(owner))
    .bind(workspace_id)
    .fetch_optional(pool)
    .await
    .map(Option::flatten)
}

/// Buyer who held the account before the current one (blacklist suggestion
/// input for low-priority replacements).
pub async fn previous_owner_for_account(
    pool: &MySqlPool,
    user_id: i64,
    workspace_id: Option<i64>,
    account_id: i64,
    current_owner: &str,
) -> sqlx::Result<Option<String>> {
    sqlx::query_scalar::<_, Option<String>>(
        r#"
        SELECT owner FROM order_history
        WHERE user_id = ? AND account_id = ? AND workspace_id <=> ? AND owner != ?
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(account_id)
    .bind(workspace_id)
    .bind(normalize_owner(current_owner))
    .fetch_optional(pool)
    .await
    .map(Option::flatten)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_normalization() {
        assert_eq!(normalize_order_id("#A1B2C3D4"), "A1B2C3D4");
        assert_eq!(normalize_order_id("  A1B2C3D4 "), "A1B2C3D4");
    }

    #[test]
    fn action_strings_are_stable() {
        assert_eq!(OrderAction::ReplaceAssign.as_str(), "replace_assign");
        assert_eq!(OrderAction::BlacklistComp.as_str(), "blacklist_comp");
        assert_eq!(OrderAction::ReviewBonusRevert.as_str(), "review_bonus_revert");
    }

    #[test]
    fn terminal_actions_cover_every_intake_outcome() {
        for action in [
            OrderAction::Assign,
            OrderAction::Extend,
            OrderAction::ReplaceAssign,
            OrderAction::Busy,
            OrderAction::Unmapped,
            OrderAction::BlacklistComp,
        ] {
            assert!(TERMINAL_ACTIONS.contains(&action.as_str()), "{:?}", action);
        }
        // Review bonuses and tickets must not block a replayed purchase.
        assert!(!TERMINAL_ACTIONS.contains(&OrderAction::ReviewBonus.as_str()));
        assert!(!TERMINAL_ACTIONS.contains(&OrderAction::TicketAuto.as_str()));
    }
}
