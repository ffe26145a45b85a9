//! Rental reaper: pause expiry, freeze notifications, near-expiry
//! reminders, and expiry with an optional in-match grace window.
//!
//! Each tick is split into a pure planning phase over the fetched rentals
//! (everything in this module up to [`run_tick`]) and an applying phase that
//! touches the store, the marketplace and the Steam adapters. All time math
//! runs in marketplace wall-clock, the timezone `rental_start` is stored in.

use chrono::{Duration, NaiveDateTime};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::bot::{replies, send_by_owner, BotCtx};
use crate::market::MarketClient;
use crate::messages;
use crate::steam::guard;
use crate::store::accounts::{self, AccountRow};
use crate::store::notifications::{self, NotificationEvent};
use crate::store::orders;
use crate::text;

/// Pause auto-expires after this long.
const PAUSE_LIMIT: Duration = Duration::hours(1);

/// Recheck cadence while a rental is deferred for an ongoing match.
const GRACE_RECHECK: Duration = Duration::minutes(1);

/// Per-bot reaper memory between ticks.
#[derive(Debug, Default)]
pub struct ReaperState {
    freeze_cache: HashMap<i64, bool>,
    expire_delay_since: HashMap<i64, NaiveDateTime>,
    expire_delay_next_check: HashMap<i64, NaiveDateTime>,
    expire_delay_notified: HashSet<i64>,
    expire_soon_notified: HashMap<i64, i64>,
}

impl ReaperState {
    /// Drop memory for rentals no longer active (released or cancelled) so
    /// stale reminder/grace state cannot fire on a future rental.
    pub fn retain_active(&mut self, active_ids: &HashSet<i64>) {
        self.freeze_cache.retain(|id, _| active_ids.contains(id));
        self.expire_delay_since.retain(|id, _| active_ids.contains(id));
        self.expire_delay_next_check
            .retain(|id, _| active_ids.contains(id));
        self.expire_delay_notified.retain(|id| active_ids.contains(id));
        self.expire_soon_notified
            .retain(|id, _| active_ids.contains(id));
    }

    fn clear_grace(&mut self, account_id: i64) {
        self.expire_delay_since.remove(&account_id);
        self.expire_delay_next_check.remove(&account_id);
        self.expire_delay_notified.remove(&account_id);
    }
}

// ── Planning ───────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
pub enum FreezePlan {
    /// Pause older than one hour: unfreeze with a rebased start.
    AutoUnpause,
    NotifyFrozen,
    NotifyUnfrozen,
    Nothing,
}

pub fn plan_freeze(row: &AccountRow, now: NaiveDateTime, state: &mut ReaperState) -> FreezePlan {
    let frozen = row.rental_frozen;
    if frozen {
        if let Some(frozen_at) = row.rental_frozen_at {
            if now >= frozen_at + PAUSE_LIMIT {
                state.freeze_cache.insert(row.id, false);
                return FreezePlan::AutoUnpause;
            }
        }
    }
    match state.freeze_cache.insert(row.id, frozen) {
        None => FreezePlan::Nothing,
        Some(prev) if prev == frozen => FreezePlan::Nothing,
        Some(_) if frozen => FreezePlan::NotifyFrozen,
        Some(_) => FreezePlan::NotifyUnfrozen,
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ExpiryPlan {
    NotDue,
    /// One-shot reminder, keyed by (account, expiry timestamp).
    Remind { seconds_left: i64 },
    Due,
}

pub fn plan_expiry(
    row: &AccountRow,
    now: NaiveDateTime,
    state: &mut ReaperState,
    remind_minutes: i64,
) -> ExpiryPlan {
    if row.owner.is_none() || row.rental_frozen {
        state.clear_grace(row.id);
        state.expire_soon_notified.remove(&row.id);
        return ExpiryPlan::NotDue;
    }
    let (Some(start), minutes) = (row.rental_start, row.rental_duration_minutes) else {
        state.clear_grace(row.id);
        state.expire_soon_notified.remove(&row.id);
        return ExpiryPlan::NotDue;
    };
    if minutes <= 0 {
        state.clear_grace(row.id);
        state.expire_soon_notified.remove(&row.id);
        return ExpiryPlan::NotDue;
    }

    let expiry = start + Duration::minutes(minutes);
    if now < expiry {
        state.clear_grace(row.id);
        let seconds_left = expiry.signed_duration_since(now).num_seconds();
        if remind_minutes > 0 && seconds_left <= remind_minutes * 60 {
            let expiry_ts = expiry.and_utc().timestamp();
            if state.expire_soon_notified.get(&row.id) != Some(&expiry_ts) {
                state.expire_soon_notified.insert(row.id, expiry_ts);
                return ExpiryPlan::Remind { seconds_left };
            }
        } else {
            state.expire_soon_notified.remove(&row.id);
        }
        return ExpiryPlan::NotDue;
    }
    ExpiryPlan::Due
}

/// Whether a previous defer decision is still in force (skip the presence
/// lookup entirely until the recheck moment).
pub fn grace_wait_active(state: &ReaperState, account_id: i64, now: NaiveDateTime) -> bool {
    state
        .expire_delay_next_check
        .get(&account_id)
        .map(|next| now < *next)
        .unwrap_or(false)
}

#[derive(Debug, PartialEq, Eq)]
pub enum GracePlan {
    Proceed,
    Defer { first_notice: bool },
}

/// Decide whether an expired rental gets deferred for an ongoing match.
pub fn plan_grace(
    state: &mut ReaperState,
    account_id: i64,
    now: NaiveDateTime,
    in_match: bool,
    grace_minutes: i64,
) -> GracePlan {
    if !in_match {
        state.clear_grace(account_id);
        return GracePlan::Proceed;
    }
    let since = *state
        .expire_delay_since
        .entry(account_id)
        .or_insert(now);
    if now.signed_duration_since(since) >= Duration::minutes(grace_minutes) {
        state.clear_grace(account_id);
        return GracePlan::Proceed;
    }
    state
        .expire_delay_next_check
        .insert(account_id, now + GRACE_RECHECK);
    let first_notice = state.expire_delay_notified.insert(account_id);
    GracePlan::Defer { first_notice }
}

// ── Applying ───────────────────────────────────────────────────────

/// One reaper pass over the workspace's active rentals.
pub async fn run_tick<C: MarketClient>(
    ctx: &BotCtx<C>,
    state: &mut ReaperState,
) -> anyhow::Result<()> {
    let rentals = accounts::fetch_active_rentals(
        &ctx.pool,
        &ctx.vault,
        ctx.user_id,
        ctx.workspace_id,
    )
    .await?;
    let active_ids: HashSet<i64> = rentals.iter().map(|r| r.id).collect();
    state.retain_active(&active_ids);

    let now = text::market_now();

    for row in &rentals {
        let Some(owner) = row.owner.clone() else {
            continue;
        };
        match plan_freeze(row, now, state) {
            FreezePlan::AutoUnpause => {
                let rebased = text::resume_start(row.rental_start, row.rental_frozen_at, now);
                let unfrozen = accounts::update_freeze_state(
                    &ctx.pool,
                    row.id,
                    ctx.user_id,
                    &owner,
                    false,
                    None,
                    rebased,
                )
                .await?;
                if unfrozen {
                    info!(account = row.id, "Pause expired, rental resumed");
                    send_by_owner(ctx, &owner, messages::RENTAL_PAUSE_EXPIRED_MESSAGE).await;
                }
            }
            FreezePlan::NotifyFrozen => {
                send_by_owner(ctx, &owner, messages::RENTAL_FROZEN_MESSAGE).await;
            }
            FreezePlan::NotifyUnfrozen => {
                send_by_owner(ctx, &owner, messages::RENTAL_UNFROZEN_MESSAGE).await;
            }
            FreezePlan::Nothing => {}
        }
    }

    // Re-read nothing: the unfreeze above rewrote the row, but an unpaused
    // rental expiring on the very same tick is fine to pick up next tick.
    for row in &rentals {
        let Some(owner) = row.owner.clone() else {
            continue;
        };
        match plan_expiry(row, now, state, ctx.cfg.remind_minutes) {
            ExpiryPlan::NotDue => {}
            ExpiryPlan::Remind { seconds_left } => {
                let message = replies::build_expire_soon_message(row, seconds_left);
                send_by_owner(ctx, &owner, &message).await;
            }
            ExpiryPlan::Due => {
                expire_rental(ctx, state, row, &owner, now).await?;
            }
        }
    }
    Ok(())
}

async fn expire_rental<C: MarketClient>(
    ctx: &BotCtx<C>,
    state: &mut ReaperState,
    row: &AccountRow,
    owner: &str,
    now: NaiveDateTime,
) -> anyhow::Result<()> {
    if ctx.cfg.match_delay_expire {
        if grace_wait_active(state, row.id, now) {
            return Ok(());
        }
        let steam_id = row
            .mafile_json
            .as_deref()
            .and_then(guard::steam_id_from_mafile);
        if let Some(steam_id) = steam_id {
            let snapshot = ctx.presence.fetch(steam_id, Some(ctx.user_id)).await;
            match plan_grace(
                state,
                row.id,
                now,
                snapshot.in_match,
                ctx.cfg.match_grace_minutes,
            ) {
                GracePlan::Defer { first_notice } => {
                    if first_notice {
                        let mut message = messages::RENTAL_EXPIRE_DELAY_MESSAGE.to_string();
                        if let Some(display) = snapshot
                            .presence_display
                            .as_deref()
                            .or(snapshot.presence_state.as_deref())
                        {
                            message.push_str(&format!("\nСтатус: {}", display));
                        }
                        send_by_owner(ctx, owner, &message).await;
                    }
                    return Ok(());
                }
                GracePlan::Proceed => {}
            }
        }
    }

    if ctx.cfg.auto_deauthorize_on_expire {
        let deauth_ok = ctx
            .steam_worker
            .deauthorize_all(
                row.login.as_deref().unwrap_or(""),
                row.password.as_deref().unwrap_or(""),
                row.mafile_json.as_deref().unwrap_or(""),
            )
            .await;
        let _ = notifications::log_event(
            &ctx.pool,
            &NotificationEvent {
                event_type: "deauthorize".into(),
                status: if deauth_ok { "ok" } else { "failed" }.into(),
                title: "Steam deauthorize on expiry".into(),
                message: Some("Auto deauthorize triggered by rental expiration.".into()),
                owner: Some(owner.to_string()),
                account_name: row.account_name.clone().or(row.login.clone()),
                account_id: Some(row.id),
                order_id: None,
                user_id: ctx.user_id,
                workspace_id: ctx.workspace_id,
            },
        )
        .await;
    }

    let released = accounts::release_account(&ctx.pool, row.id, ctx.user_id).await?;
    let _ = notifications::log_event(
        &ctx.pool,
        &NotificationEvent {
            event_type: "rental_expired".into(),
            status: if released { "ok" } else { "failed" }.into(),
            title: "Rental expired".into(),
            message: Some(
                if released {
                    "Rental expired and account was released."
                } else {
                    "Rental expired but release failed."
                }
                .into(),
            ),
            owner: Some(owner.to_string()),
            account_name: row.account_name.clone().or(row.login.clone()),
            account_id: Some(row.id),
            order_id: None,
            user_id: ctx.user_id,
            workspace_id: ctx.workspace_id,
        },
    )
    .await;

    if released {
        send_by_owner(ctx, owner, messages::RENTAL_EXPIRED_MESSAGE).await;
        let order_id = orders::latest_order_id_for_account(
            &ctx.pool,
            ctx.user_id,
            ctx.workspace_id,
            row.id,
            owner,
        )
        .await
        .unwrap_or_else(|e| {
            warn!(account = row.id, "Order lookup for confirm link failed: {}", e);
            None
        });
        let order_suffix = order_id.unwrap_or_else(|| "______".into());
        let confirm = format!(
            "{}\n\nПодтвердите тут -> https://funpay.com/orders/{}/",
            messages::RENTAL_EXPIRED_CONFIRM_MESSAGE,
            order_suffix
        );
        send_by_owner(ctx, owner, &confirm).await;
    }
    state.clear_grace(row.id);
    state.expire_soon_notified.remove(&row.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn rental(id: i64) -> AccountRow {
        AccountRow {
            id,
            account_name: Some("acc".into()),
            display_name: None,
            login: Some("login".into()),
            password: Some("pass".into()),
            mafile_json: None,
            owner: Some("alice".into()),
            rental_start: Some(dt(10, 0)),
            rental_duration_minutes: 120,
            account_frozen: false,
            rental_frozen: false,
            rental_frozen_at: None,
            low_priority: false,
            mmr: None,
            lot_number: Some(77),
            lot_url: None,
        }
    }

    #[test]
    fn pause_auto_expires_after_exactly_one_hour() {
        let mut state = ReaperState::default();
        let mut row = rental(1);
        row.rental_frozen = true;
        row.rental_frozen_at = Some(dt(10, 0));
        assert_eq!(plan_freeze(&row, dt(10, 59), &mut state), FreezePlan::Nothing);
        // Boundary: exactly 60 minutes → unpause on this tick.
        let mut state = ReaperState::default();
        assert_eq!(plan_freeze(&row, dt(11, 0), &mut state), FreezePlan::AutoUnpause);
    }

    #[test]
    fn freeze_transitions_notify_once() {
        let mut state = ReaperState::default();
        let mut row = rental(1);
        // First observation only seeds the cache.
        assert_eq!(plan_freeze(&row, dt(10, 0), &mut state), FreezePlan::Nothing);
        row.rental_frozen = true;
        row.rental_frozen_at = Some(dt(10, 30));
        assert_eq!(plan_freeze(&row, dt(10, 31), &mut state), FreezePlan::NotifyFrozen);
        assert_eq!(plan_freeze(&row, dt(10, 32), &mut state), FreezePlan::Nothing);
        row.rental_frozen = false;
        row.rental_frozen_at = None;
        assert_eq!(
            plan_freeze(&row, dt(10, 33), &mut state),
            FreezePlan::NotifyUnfrozen
        );
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let mut state = ReaperState::default();
        let row = rental(1);
        assert_eq!(
            plan_expiry(&row, dt(11, 59), &mut state, 0),
            ExpiryPlan::NotDue
        );
        // Exactly start + duration → expired on this tick.
        assert_eq!(plan_expiry(&row, dt(12, 0), &mut state, 0), ExpiryPlan::Due);
    }

    #[test]
    fn reminder_fires_once_per_expiry() {
        let mut state = ReaperState::default();
        let row = rental(1);
        match plan_expiry(&row, dt(11, 51), &mut state, 10) {
            ExpiryPlan::Remind { seconds_left } => assert_eq!(seconds_left, 540),
            other => panic!("expected reminder, got {:?}", other),
        }
        // Same expiry → no second reminder.
        assert_eq!(
            plan_expiry(&row, dt(11, 55), &mut state, 10),
            ExpiryPlan::NotDue
        );
        // Extension moved the expiry → the reminder re-arms.
        let mut extended = row.clone();
        extended.rental_duration_minutes = 180;
        assert_eq!(
            plan_expiry(&extended, dt(12, 51), &mut state, 10),
            ExpiryPlan::Remind { seconds_left: 540 }
        );
    }

    #[test]
    fn paused_and_deferred_rentals_do_not_expire() {
        let mut state = ReaperState::default();
        let mut row = rental(1);
        row.rental_frozen = true;
        assert_eq!(plan_expiry(&row, dt(13, 0), &mut state, 10), ExpiryPlan::NotDue);

        let mut deferred = rental(2);
        deferred.rental_start = None; // waiting for !код
        assert_eq!(
            plan_expiry(&deferred, dt(13, 0), &mut state, 10),
            ExpiryPlan::NotDue
        );
    }

    #[test]
    fn grace_defers_then_proceeds_at_limit() {
        let mut state = ReaperState::default();
        // First defer notifies.
        assert_eq!(
            plan_grace(&mut state, 1, dt(12, 0), true, 90),
            GracePlan::Defer { first_notice: true }
        );
        assert!(grace_wait_active(&state, 1, dt(12, 0)));
        assert!(!grace_wait_active(&state, 1, dt(12, 1)));
        // Still in match, later recheck: defer without another notice.
        assert_eq!(
            plan_grace(&mut state, 1, dt(12, 5), true, 90),
            GracePlan::Defer { first_notice: false }
        );
        // Grace window exhausted → proceed even while in match.
        assert_eq!(plan_grace(&mut state, 1, dt(13, 30), true, 90), GracePlan::Proceed);
    }

    #[test]
    fn leaving_the_match_clears_grace() {
        let mut state = ReaperState::default();
        plan_grace(&mut state, 1, dt(12, 0), true, 90);
        assert_eq!(plan_grace(&mut state, 1, dt(12, 2), false, 90), GracePlan::Proceed);
        assert!(!grace_wait_active(&state, 1, dt(12, 2)));
        // A fresh match later starts a fresh window with a fresh notice.
        assert_eq!(
            plan_grace(&mut state, 1, dt(12, 10), true, 90),
            GracePlan::Defer { first_notice: true }
        );
    }

    #[test]
    fn retain_active_drops_released_rentals() {
        let mut state = ReaperState::default();
        plan_grace(&mut state, 1, dt(12, 0), true, 90);
        state.expire_soon_notified.insert(2, 123);
        let active: HashSet<i64> = [2].into_iter().collect();
        state.retain_active(&active);
        assert!(!grace_wait_active(&state, 1, dt(12, 0)));
        assert!(state.expire_soon_notified.contains_key(&2));
    }
}
