//! Rentable accounts and their lot mappings.
//!
//! An account is a Steam credential (login + password + authenticator
//! payload). A lot maps a marketplace SKU number to exactly one account per
//! (user, workspace). Every mutation below preserves the release invariant:
//! `owner IS NULL ⇔ rental_start IS NULL ∧ rental_frozen = 0 ∧
//! rental_frozen_at IS NULL`.

use chrono::NaiveDateTime;
use sqlx::MySqlPool;
use tracing::warn;

use crate::text::normalize_owner;
use crate::vault::Vault;

/// An account row joined with its lot mapping. Credentials arrive decrypted.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    pub id: i64,
    pub account_name: Option<String>,
    pub display_name: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
    pub mafile_json: Option<String>,
    pub owner: Option<String>,
    pub rental_start: Option<NaiveDateTime>,
    pub rental_duration_minutes: i64,
    pub account_frozen: bool,
    pub rental_frozen: bool,
    pub rental_frozen_at: Option<NaiveDateTime>,
    pub low_priority: bool,
    pub mmr: Option<i64>,
    pub lot_number: Option<i64>,
    pub lot_url: Option<String>,
}

impl AccountRow {
    /// Rented, not paused by the buyer and not frozen by the admin.
    pub fn is_rental_active(&self) -> bool {
        self.owner.is_some()
            && !self.account_frozen
            && !self.rental_frozen
            && self.rental_duration_minutes > 0
    }

    /// Display label: lot number prefix + best available name.
    pub fn display_label(&self) -> String {
        let name = self
            .display_name
            .as_deref()
            .or(self.account_name.as_deref())
            .or(self.login.as_deref())
            .unwrap_or("")
            .trim()
            .to_string();
        match self.lot_number {
            Some(lot) if !name.starts_with('№') => {
                if name.is_empty() {
                    format!("№{}", lot)
                } else {
                    format!("№{} {}", lot, name)
                }
            }
            _ if name.is_empty() => "Аккаунт".into(),
            _ => name,
        }
    }
}

const ACCOUNT_COLUMNS: &str = r#"
    a.id, a.account_name, l.display_name, a.login, a.password, a.mafile_json, a.owner,
    a.rental_start, COALESCE(a.rental_duration_minutes, 0) AS rental_duration_minutes,
    COALESCE(a.account_frozen, 0) AS account_frozen,
    COALESCE(a.rental_frozen, 0) AS rental_frozen,
    a.rental_frozen_at,
    COALESCE(a.low_priority, 0) AS low_priority,
    a.mmr, l.lot_number, l.lot_url
"#;

fn decrypt_row(vault: &Vault, row: &mut AccountRow) {
    for field in [&mut row.password, &mut row.mafile_json] {
        if let Some(value) = field.as_deref() {
            match vault.decrypt(value) {
                Ok(plain) => *field = Some(plain),
                Err(e) => warn!(account = row.id, "Credential decrypt failed: {}", e),
            }
        }
    }
}

fn decrypt_rows(vault: &Vault, mut rows: Vec<AccountRow>) -> Vec<AccountRow> {
    for row in &mut rows {
        decrypt_row(vault, row);
    }
    rows
}

/// The account mapped to a lot number, if any.
pub async fn fetch_lot_mapping(
    pool: &MySqlPool,
    vault: &Vault,
    user_id: i64,
    workspace_id: Option<i64>,
    lot_number: i64,
) -> sqlx::Result<Option<AccountRow>> {
    let query = format!(
        r#"
        SELECT {ACCOUNT_COLUMNS}
        FROM lots l
        JOIN accounts a ON a.id = l.account_id
        WHERE l.user_id = ? AND l.lot_number = ?
          AND (l.workspace_id <=> ? OR l.workspace_id IS NULL)
        ORDER BY CASE WHEN l.workspace_id <=> ? THEN 0 ELSE 1 END, a.id
        LIMIT 1
        "#
    );
    let row = sqlx::query_as::<_, AccountRow>(&query)
        .bind(user_id)
        .bind(lot_number)
        .bind(workspace_id)
        .bind(workspace_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|mut r| {
        decrypt_row(vault, &mut r);
        r
    }))
}

/// Free, unfrozen, non-low-priority accounts with a lot mapping — the stock
/// list and the replacement candidate pool.
pub async fn fetch_available_accounts(
    pool: &MySqlPool,
    vault: &Vault,
    user_id: i64,
    workspace_id: Option<i64>,
) -> sqlx::Result<Vec<AccountRow>> {
    let query = format!(
        r#"
        SELECT {ACCOUNT_COLUMNS}
        FROM accounts a
        JOIN lots l ON l.account_id = a.id
        WHERE a.user_id = ?
          AND (a.owner IS NULL OR a.owner = '')
          AND COALESCE(a.account_frozen, 0) = 0
          AND COALESCE(a.rental_frozen, 0) = 0
          AND COALESCE(a.low_priority, 0) = 0
          AND (l.workspace_id <=> ? OR l.workspace_id IS NULL)
        ORDER BY l.lot_number ASC, a.id ASC
        "#
    );
    let rows = sqlx::query_as::<_, AccountRow>(&query)
        .bind(user_id)
        .bind(workspace_id)
        .fetch_all(pool)
        .await?;
    Ok(decrypt_rows(vault, rows))
}

/// Every account currently rented by the buyer, newest rental first.
pub async fn fetch_owner_accounts(
    pool: &MySqlPool,
    vault: &Vault,
    user_id: i64,
    owner: &str,
    workspace_id: Option<i64>,
) -> sqlx::Result<Vec<AccountRow>> {
    let owner_key = normalize_owner(owner);
    if owner_key.is_empty() {
        return Ok(Vec::new());
    }
    let query = format!(
        r#"
        SELECT {ACCOUNT_COLUMNS}
        FROM accounts a
        LEFT JOIN lots l ON l.account_id = a.id
        WHERE LOWER(a.owner) = ? AND a.user_id = ?
          AND (l.workspace_id <=> ? OR l.workspace_id IS NULL)
        ORDER BY a.rental_start DESC, a.id DESC
        "#
    );
    let rows = sqlx::query_as::<_, AccountRow>(&query)
        .bind(&owner_key)
        .bind(user_id)
        .bind(workspace_id)
        .fetch_all(pool)
        .await?;
    Ok(decrypt_rows(vault, rows))
}

/// Rented accounts for the reaper scan.
pub async fn fetch_active_rentals(
    pool: &MySqlPool,
    vault: &Vault,
    user_id: i64,
    workspace_id: Option<i64>,
) -> sqlx::Result<Vec<AccountRow>> {
    let query = format!(
        r#"
        SELECT {ACCOUNT_COLUMNS}
        FROM accounts a
        LEFT JOIN lots l ON l.account_id = a.id
        WHERE a.user_id = ? AND a.owner IS NOT NULL AND a.owner != ''
          AND (l.workspace_id <=> ? OR l.workspace_id IS NULL)
        ORDER BY a.rental_start DESC, a.id DESC
        "#
    );
    let rows = sqlx::query_as::<_, AccountRow>(&query)
        .bind(user_id)
        .bind(workspace_id)
        .fetch_all(pool)
        .await?;
    Ok(decrypt_rows(vault, rows))
}

/// Assign a free account to a buyer. The timer stays unset — it starts on
/// the first guard-code request. Guarded against double assignment.
pub async fn assign_to_buyer(
    pool: &MySqlPool,
    account_id: i64,
    user_id: i64,
    buyer: &str,
    total_minutes: i64,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET owner = ?,
            rental_duration_minutes = ?,
            rental_start = NULL,
            rental_frozen = 0,
            rental_frozen_at = NULL
        WHERE id = ? AND user_id = ? AND (owner IS NULL OR owner = '')
        "#,
    )
    .bind(normalize_owner(buyer))
    .bind(total_minutes)
    .bind(account_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Add minutes to an existing rental of the same buyer. Row-locked so a
/// replayed order and a bonus application cannot race. Returns the new
/// total, or `None` when the account is not rented by this buyer.
pub async fn extend_for_buyer(
    pool: &MySqlPool,
    account_id: i64,
    user_id: i64,
    buyer: &str,
    add_minutes: i64,
) -> sqlx::Result<Option<i64>> {
    let owner_key = normalize_owner(buyer);
    let mut tx = pool.begin().await?;

    let row: Option<(Option<String>, i64)> = sqlx::query_as(
        r#"
        SELECT owner, COALESCE(rental_duration_minutes, 0)
        FROM accounts
        WHERE id = ? AND user_id = ?
        FOR UPDATE
        "#,
    )
    .bind(account_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((owner, minutes)) = row else {
        tx.rollback().await?;
        return Ok(None);
    };
    if owner.as_deref().map(normalize_owner) != Some(owner_key) {
        tx.rollback().await?;
        return Ok(None);
    }

    let total = (minutes + add_minutes).max(0);
    sqlx::query(
        "UPDATE accounts SET rental_duration_minutes = ? WHERE id = ? AND user_id = ?",
    )
    .bind(total)
    .bind(account_id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(Some(total))
}

/// Release a rental: clears the owner, the timer and both pause fields.
pub async fn release_account(
    pool: &MySqlPool,
    account_id: i64,
    user_id: i64,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET owner = NULL, rental_start = NULL, rental_frozen = 0, rental_frozen_at = NULL
        WHERE id = ? AND user_id = ?
        "#,
    )
    .bind(account_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Reset the duration budget (used by cancellation: back to one unit).
pub async fn reset_duration(
    pool: &MySqlPool,
    account_id: i64,
    user_id: i64,
    minutes: i64,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE accounts SET rental_duration_minutes = ? WHERE id = ? AND user_id = ?")
        .bind(minutes)
        .bind(account_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Pause or resume a rental. On resume the caller passes the rebased
/// `rental_start` so remaining time is preserved.
pub async fn update_freeze_state(
    pool: &MySqlPool,
    account_id: i64,
    user_id: i64,
    owner: &str,
    frozen: bool,
    frozen_at: Option<NaiveDateTime>,
    rental_start: Option<NaiveDateTime>,
) -> sqlx::Result<bool> {
    let mut sets = vec!["rental_frozen = ?", "rental_frozen_at = ?"];
    if rental_start.is_some() {
        sets.push("rental_start = ?");
    }
    let query = format!(
        "UPDATE accounts SET {} WHERE id = ? AND user_id = ? AND LOWER(owner) = ?",
        sets.join(", ")
    );
    let mut q = sqlx::query(&query)
        .bind(frozen)
        .bind(if frozen { frozen_at } else { None });
    if let Some(start) = rental_start {
        q = q.bind(start);
    }
    let result = q
        .bind(account_id)
        .bind(user_id)
        .bind(normalize_owner(owner))
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Start the deferred timer on the buyer's rentals that have none yet.
pub async fn start_rentals_for_owner(
    pool: &MySqlPool,
    user_id: i64,
    owner: &str,
    account_ids: &[i64],
    start: NaiveDateTime,
) -> sqlx::Result<u64> {
    if account_ids.is_empty() {
        return Ok(0);
    }
    let placeholders = vec!["?"; account_ids.len()].join(", ");
    let query = format!(
        r#"
        UPDATE accounts
        SET rental_start = ?
        WHERE user_id = ? AND LOWER(owner) = ? AND rental_start IS NULL AND id IN ({placeholders})
        "#
    );
    let mut q = sqlx::query(&query)
        .bind(start)
        .bind(user_id)
        .bind(normalize_owner(owner));
    for id in account_ids {
        q = q.bind(id);
    }
    Ok(q.execute(pool).await?.rows_affected())
}

/// Transfer a rental from one account to another in a single transaction.
/// The new account inherits the running timer and duration; the old one is
/// released.
pub async fn replace_rental(
    pool: &MySqlPool,
    old_account_id: i64,
    new_account_id: i64,
    user_id: i64,
    owner: &str,
    rental_start: Option<NaiveDateTime>,
    rental_minutes: i64,
) -> sqlx::Result<bool> {
    let owner_key = normalize_owner(owner);
    if owner_key.is_empty() {
        return Ok(false);
    }
    let mut tx = pool.begin().await?;

    let claimed = sqlx::query(
        r#"
        UPDATE accounts
        SET owner = ?, rental_start = ?, rental_duration_minutes = ?,
            rental_frozen = 0, rental_frozen_at = NULL
        WHERE id = ? AND user_id = ? AND (owner IS NULL OR owner = '')
        "#,
    )
    .bind(&owner_key)
    .bind(rental_start)
    .bind(rental_minutes)
    .bind(new_account_id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    if claimed.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query(
        r#"
        UPDATE accounts
        SET owner = NULL, rental_start = NULL, rental_frozen = 0, rental_frozen_at = NULL
        WHERE id = ? AND user_id = ? AND LOWER(owner) = ?
        "#,
    )
    .bind(old_account_id)
    .bind(user_id)
    .bind(&owner_key)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

/// Pick a replacement from the available pool: same lot first; otherwise the
/// MMR band ±`max_delta` (inclusive), closest MMR then smallest id.
pub fn select_replacement<'a>(
    available: &'a [AccountRow],
    lot_number: Option<i64>,
    target_mmr: Option<i64>,
    exclude_id: i64,
    max_delta: i64,
) -> Option<&'a AccountRow> {
    let pool: Vec<&AccountRow> = available.iter().filter(|a| a.id != exclude_id).collect();

    if let Some(lot) = lot_number {
        if let Some(found) = pool
            .iter()
            .filter(|a| a.lot_number == Some(lot))
            .min_by_key(|a| a.id)
        {
            return Some(found);
        }
    }

    let target = target_mmr?;
    pool.into_iter()
        .filter_map(|a| {
            let mmr = a.mmr?;
            let diff = (mmr - target).abs();
            (diff <= max_delta).then_some((diff, a.id, a))
        })
        .min_by_key(|(diff, id, _)| (*diff, *id))
        .map(|(_, _, a)| a)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: i64, lot: Option<i64>, mmr: Option<i64>) -> AccountRow {
        AccountRow {
            id,
            account_name: Some(format!("acc{}", id)),
            display_name: None,
            login: Some(format!("login{}", id)),
            password: None,
            mafile_json: None,
            owner: None,
            rental_start: None,
            rental_duration_minutes: 0,
            account_frozen: false,
            rental_frozen: false,
            rental_frozen_at: None,
            low_priority: false,
            mmr,
            lot_number: lot,
            lot_url: None,
        }
    }

    #[test]
    fn replacement_prefers_same_lot() {
        let pool = vec![
            account(10, Some(5), Some(9000)),
            account(11, Some(77), Some(1000)),
            account(12, Some(77), Some(2000)),
        ];
        let picked = select_replacement(&pool, Some(77), Some(6500), 42, 1000).unwrap();
        assert_eq!(picked.id, 11, "smallest id wins within the same lot");
    }

    #[test]
    fn replacement_falls_back_to_mmr_band() {
        let pool = vec![
            account(10, Some(5), Some(5400)),
            account(11, Some(6), Some(6400)),
            account(12, Some(7), Some(8000)),
        ];
        let picked = select_replacement(&pool, Some(77), Some(6500), 42, 1000).unwrap();
        assert_eq!(picked.id, 11, "closest MMR in band");
    }

    #[test]
    fn replacement_band_is_inclusive_at_the_edge() {
        let pool = vec![account(10, Some(5), Some(7500))];
        // Exactly +1000 away → included.
        assert!(select_replacement(&pool, None, Some(6500), 42, 1000).is_some());
        let pool = vec![account(10, Some(5), Some(7501))];
        assert!(select_replacement(&pool, None, Some(6500), 42, 1000).is_none());
    }

    #[test]
    fn replacement_excludes_the_broken_account() {
        let pool = vec![account(42, Some(77), Some(6500))];
        assert!(select_replacement(&pool, Some(77), Some(6500), 42, 1000).is_none());
    }

    #[test]
    fn replacement_ties_break_on_smallest_id() {
        let pool = vec![
            account(20, Some(5), Some(6600)),
            account(19, Some(6), Some(6400)),
        ];
        let picked = select_replacement(&pool, None, Some(6500), 42, 1000).unwrap();
        assert_eq!(picked.id, 19, "equal distance → smaller id");
    }

    #[test]
    fn rental_active_requires_owner_minutes_and_no_freeze() {
        let mut row = account(1, None, None);
        assert!(!row.is_rental_active());
        row.owner = Some("alice".into());
        row.rental_duration_minutes = 60;
        assert!(row.is_rental_active());
        row.rental_frozen = true;
        assert!(!row.is_rental_active());
        row.rental_frozen = false;
        row.account_frozen = true;
        assert!(!row.is_rental_active());
    }

    #[test]
    fn display_label_prefixes_lot_number() {
        let mut row = account(1, Some(77), None);
        row.account_name = Some("Immortal".into());
        assert_eq!(row.display_label(), "№77 Immortal");
        row.lot_number = None;
        assert_eq!(row.display_label(), "Immortal");
        row.account_name = None;
        row.login = None;
        assert_eq!(row.display_label(), "Аккаунт");
    }
}
