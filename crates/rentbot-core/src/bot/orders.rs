//! Order intake and the order-lifecycle events around it.
//!
//! A paid order arrives as a system message; the decision tree below either
//! assigns an account, extends the buyer's existing rental, issues a
//! replacement, or explains why nothing was issued — and always leaves a
//! history row. Intake is idempotent: a replayed event is a no-op.

use tracing::{info, warn};

use crate::bot::{replies, send_chat, tickets::TicketScheduler, BotCtx, BotState};
use crate::market::{MarketClient, SystemEvent};
use crate::messages;
use crate::steam::guard;
use crate::store::accounts::{self, AccountRow};
use crate::store::blacklist;
use crate::store::orders::{self, OrderAction, OrderRecord};
use crate::store::settings;
use crate::text::{
    format_duration_minutes, format_penalty_label, normalize_owner, parse_lot_number,
};

/// Minutes of rental per paid unit.
pub const RENTAL_UNIT_MINUTES: i64 = 60;

/// Route a classified system event.
pub async fn handle_system_event<C: MarketClient + 'static>(
    ctx: &BotCtx<C>,
    state: &mut BotState,
    tickets: &TicketScheduler,
    event: &SystemEvent,
) -> anyhow::Result<()> {
    match event {
        SystemEvent::OrderPurchased { order_id } => {
            handle_order_purchased(ctx, state, tickets, order_id).await
        }
        e if e.is_confirmation() => {
            tickets.cancel(e.order_id()).await;
            log_lifecycle(ctx, e.order_id(), OrderAction::Closed).await
        }
        e if e.is_refund() => {
            tickets.cancel(e.order_id()).await;
            log_lifecycle(ctx, e.order_id(), OrderAction::Refunded).await
        }
        SystemEvent::NewFeedback { order_id } | SystemEvent::FeedbackChanged { order_id } => {
            apply_review_bonus(ctx, order_id).await
        }
        SystemEvent::FeedbackDeleted { order_id } => revert_review_bonus(ctx, order_id).await,
        _ => Ok(()),
    }
}

async fn log_lifecycle<C: MarketClient>(
    ctx: &BotCtx<C>,
    order_id: &str,
    action: OrderAction,
) -> anyhow::Result<()> {
    let Some(owner) = orders::fetch_order_owner(&ctx.pool, order_id).await? else {
        return Ok(());
    };
    orders::log_order(
        &ctx.pool,
        &OrderRecord {
            order_id: order_id.to_string(),
            owner,
            user_id: ctx.user_id,
            workspace_id: ctx.workspace_id,
            ..Default::default()
        },
        action,
    )
    .await?;
    Ok(())
}

/// The paid-order state machine.
pub async fn handle_order_purchased<C: MarketClient + 'static>(
    ctx: &BotCtx<C>,
    state: &mut BotState,
    tickets: &TicketScheduler,
    order_id: &str,
) -> anyhow::Result<()> {
    let order_key = orders::normalize_order_id(order_id);
    if state.processed_orders.contains(&order_key) {
        return Ok(());
    }
    if orders::is_order_handled(&ctx.pool, ctx.user_id, ctx.workspace_id, &order_key).await? {
        state.processed_orders.insert(order_key);
        return Ok(());
    }

    let order = match ctx.market.get_order(&order_key).await {
        Ok(order) => order,
        Err(e) => {
            warn!("{} Failed to fetch order {}: {}", ctx.label, order_key, e);
            return Ok(());
        }
    };
    let buyer = order.buyer_username.trim().to_string();
    if buyer.is_empty() {
        warn!("{} Order {} missing buyer username.", ctx.label, order_key);
        return Ok(());
    }

    let chat_id = match order.chat_id {
        Some(chat_id) => Some(chat_id),
        None => ctx.market.chat_id_for(&buyer).await.unwrap_or(None),
    };
    let Some(chat_id) = chat_id else {
        warn!("{} Skipping order {}: chat id not found.", ctx.label, order_key);
        return Ok(());
    };

    let amount = order.amount.max(1);
    let record = OrderRecord {
        order_id: order_key.clone(),
        owner: buyer.clone(),
        user_id: ctx.user_id,
        workspace_id: ctx.workspace_id,
        amount: Some(amount),
        price: order.price,
        ..Default::default()
    };

    // The payment itself is on file before any decision; the terminal
    // action (assign/extend/…) joins it below.
    let already_paid = orders::has_action(
        &ctx.pool,
        ctx.user_id,
        ctx.workspace_id,
        &order_key,
        &buyer,
        OrderAction::Paid,
    )
    .await?;
    if !already_paid {
        orders::log_order(&ctx.pool, &record, OrderAction::Paid).await?;
    }

    // 1. No lot number in the description → nothing to issue.
    let Some(lot_number) = parse_lot_number(&order.description) else {
        orders::log_order(&ctx.pool, &record, OrderAction::Unmapped).await?;
        send_chat(ctx, chat_id, messages::ORDER_LOT_MISSING).await;
        state.processed_orders.insert(order_key);
        return Ok(());
    };
    let record = OrderRecord {
        lot_number: Some(lot_number),
        ..record
    };

    let mapping = accounts::fetch_lot_mapping(
        &ctx.pool,
        &ctx.vault,
        ctx.user_id,
        ctx.workspace_id,
        lot_number,
    )
    .await?;
    let steam_id = mapping
        .as_ref()
        .and_then(|m| m.mafile_json.as_deref())
        .and_then(guard::steam_id_from_mafile)
        .map(|id| id.to_string());

    // 2. Blacklisted buyers pay compensation instead of renting.
    if blacklist::is_blacklisted(&ctx.pool, ctx.user_id, ctx.workspace_id, &buyer).await? {
        return handle_blacklisted_order(
            ctx, state, chat_id, &buyer, order_key, record, mapping.as_ref(), amount, steam_id,
        )
        .await;
    }

    // 3./4. Resolve the mapping, preferring the account this buyer already
    // holds for the lot (repeat purchase = extension of the account in hand).
    let owner_accounts = accounts::fetch_owner_accounts(
        &ctx.pool,
        &ctx.vault,
        ctx.user_id,
        &buyer,
        ctx.workspace_id,
    )
    .await
    .unwrap_or_default();
    let mapping = resolve_mapping_for_buyer(
        ctx,
        mapping,
        &owner_accounts,
        &buyer,
        lot_number,
    )
    .await;
    let Some(mapping) = mapping else {
        orders::log_order(&ctx.pool, &record, OrderAction::Unmapped).await?;
        send_chat(ctx, chat_id, messages::ORDER_LOT_UNMAPPED).await;
        state.processed_orders.insert(order_key);
        return Ok(());
    };

    let total_minutes = RENTAL_UNIT_MINUTES * amount;
    let record = OrderRecord {
        account_id: Some(mapping.id),
        account_name: mapping.account_name.clone(),
        steam_id,
        ..record
    };

    let owner_key = mapping.owner.as_deref().map(normalize_owner);
    let buyer_key = normalize_owner(&buyer);
    let unusable = mapping.account_frozen || mapping.rental_frozen || mapping.low_priority;
    let foreign_owner = owner_key
        .as_deref()
        .map(|o| !o.is_empty() && o != buyer_key)
        .unwrap_or(false);

    // 5. Unusable or taken → replacement search.
    if unusable || foreign_owner {
        issue_replacement_or_busy(
            ctx, state, tickets, chat_id, &buyer, order_key, record, &mapping, total_minutes,
        )
        .await?;
        return Ok(());
    }

    // 6. Same buyer → extension; free account → fresh assignment.
    if owner_key.map(|o| !o.is_empty()).unwrap_or(false) {
        let extended = accounts::extend_for_buyer(
            &ctx.pool,
            mapping.id,
            ctx.user_id,
            &buyer,
            total_minutes,
        )
        .await?;
        let Some(new_total) = extended else {
            // The owner changed between the read and the lock.
            orders::log_order(&ctx.pool, &record, OrderAction::Busy).await?;
            send_chat(ctx, chat_id, messages::ORDER_ACCOUNT_NO_REPLACEMENT).await;
            state.processed_orders.insert(order_key);
            return Ok(());
        };
        orders::log_order(
            &ctx.pool,
            &OrderRecord {
                rental_minutes: Some(total_minutes),
                ..record
            },
            OrderAction::Extend,
        )
        .await?;
        let reply = format!(
            "✅ Оплата получена. Аренда продлена.\nТекущая аренда: {}.\nДля данных: !акк {}.",
            format_duration_minutes(new_total),
            mapping.id,
        );
        send_chat(ctx, chat_id, &reply).await;
        info!("{} Order {}: extended account {} to {} min.", ctx.label, order_key, mapping.id, new_total);
        finish_issued(ctx, tickets, &order_key, &buyer, total_minutes).await;
    } else {
        let assigned = accounts::assign_to_buyer(
            &ctx.pool,
            mapping.id,
            ctx.user_id,
            &buyer,
            total_minutes,
        )
        .await?;
        if !assigned {
            orders::log_order(&ctx.pool, &record, OrderAction::Busy).await?;
            send_chat(ctx, chat_id, messages::ORDER_ACCOUNT_NO_REPLACEMENT).await;
            state.processed_orders.insert(order_key);
            return Ok(());
        }
        orders::log_order(
            &ctx.pool,
            &OrderRecord {
                rental_minutes: Some(total_minutes),
                ..record
            },
            OrderAction::Assign,
        )
        .await?;
        let mut issued = mapping.clone();
        issued.owner = Some(buyer_key);
        issued.rental_start = None;
        issued.rental_duration_minutes = total_minutes;
        let reply = replies::build_account_message(&issued, total_minutes, true, crate::text::market_now());
        send_chat(ctx, chat_id, &reply).await;
        info!("{} Order {}: assigned account {} for {} min.", ctx.label, order_key, mapping.id, total_minutes);
        finish_issued(ctx, tickets, &order_key, &buyer, total_minutes).await;
    }

    if let Err(e) = ctx.market.confirm_order(&order_key).await {
        warn!("{} Order {} confirm failed: {}", ctx.label, order_key, e);
    }
    state.processed_orders.insert(order_key);
    Ok(())
}

/// Pick the account this buyer should get for the lot: the mapped account,
/// or the one of their rentals already tied to the lot (directly or through
/// history).
async fn resolve_mapping_for_buyer<C: MarketClient>(
    ctx: &BotCtx<C>,
    mapping: Option<AccountRow>,
    owner_accounts: &[AccountRow],
    buyer: &str,
    lot_number: i64,
) -> Option<AccountRow> {
    let mapping = mapping?;
    if let Some(held) = owner_accounts
        .iter()
        .find(|a| a.lot_number == Some(lot_number))
    {
        return Some(held.clone());
    }
    if !owner_accounts.is_empty() {
        let from_history = orders::latest_account_for_owner_lot(
            &ctx.pool,
            ctx.user_id,
            ctx.workspace_id,
            buyer,
            lot_number,
        )
        .await
        .unwrap_or(None);
        if let Some(account_id) = from_history {
            if let Some(held) = owner_accounts.iter().find(|a| a.id == account_id) {
                return Some(held.clone());
            }
        }
    }
    Some(mapping)
}

#[allow(clippy::too_many_arguments)]
async fn handle_blacklisted_order<C: MarketClient>(
    ctx: &BotCtx<C>,
    state: &mut BotState,
    chat_id: i64,
    buyer: &str,
    order_key: String,
    record: OrderRecord,
    mapping: Option<&AccountRow>,
    amount: i64,
    steam_id: Option<String>,
) -> anyhow::Result<()> {
    let threshold = ctx.cfg.blacklist_comp_threshold_minutes();
    let paid_minutes = (ctx.cfg.blacklist_comp_unit_minutes * amount).max(0);
    let lot_number = record.lot_number;

    orders::log_order(
        &ctx.pool,
        &OrderRecord {
            account_id: mapping.map(|m| m.id),
            account_name: mapping.and_then(|m| m.account_name.clone()),
            steam_id,
            rental_minutes: Some(paid_minutes),
            ..record
        },
        OrderAction::BlacklistComp,
    )
    .await?;
    blacklist::log_event(
        &ctx.pool,
        ctx.user_id,
        ctx.workspace_id,
        buyer,
        "blacklist_comp",
        None,
        Some(&format!(
            "order={}; lot={:?}; amount={}",
            order_key, lot_number, amount
        )),
        Some(paid_minutes),
    )
    .await?;

    let total_paid = blacklist::compensation_total(&ctx.pool, ctx.user_id, buyer).await?;
    if total_paid >= threshold {
        // Invariant: the entry is gone before the buyer reads the reply.
        let removed = blacklist::remove_entry(&ctx.pool, ctx.user_id, buyer).await?;
        blacklist::log_event(
            &ctx.pool,
            ctx.user_id,
            ctx.workspace_id,
            buyer,
            "auto_unblacklist",
            None,
            Some(&format!(
                "total_minutes={}/{}; order={}; lot={:?}",
                total_paid, threshold, order_key, lot_number
            )),
            None,
        )
        .await?;
        if removed {
            let reply = format!(
                "{} ({}). {}",
                messages::BLACKLIST_UNBLOCKED_PREFIX,
                format_duration_minutes(total_paid),
                messages::BLACKLIST_UNBLOCKED_SUFFIX,
            );
            send_chat(ctx, chat_id, &reply).await;
        }
        state.processed_orders.insert(order_key);
        return Ok(());
    }

    let remaining = (threshold - total_paid).max(0);
    let lot_label = match mapping.and_then(|m| m.lot_url.as_deref()) {
        Some(url) => format!("лот {}", url),
        None => match lot_number {
            Some(lot) => format!("лот №{}", lot),
            None => "лот".to_string(),
        },
    };
    let reply = format!(
        "Вы в черном списке.\nОплатите штраф {}, чтобы разблокировать доступ.\nОплачено: {}. Осталось: {}.\nЕсли хотите продлить — пожалуйста оплатите этот {}.",
        format_penalty_label(threshold),
        format_duration_minutes(total_paid),
        format_duration_minutes(remaining),
        lot_label,
    );
    send_chat(ctx, chat_id, &reply).await;
    blacklist::log_event(
        &ctx.pool,
        ctx.user_id,
        ctx.workspace_id,
        buyer,
        "blocked_order",
        None,
        Some(&format!(
            "order={}; lot={:?}; amount={}; paid={}; remaining={}",
            order_key, lot_number, amount, total_paid, remaining
        )),
        None,
    )
    .await?;
    state.processed_orders.insert(order_key);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn issue_replacement_or_busy<C: MarketClient + 'static>(
    ctx: &BotCtx<C>,
    state: &mut BotState,
    tickets: &TicketScheduler,
    chat_id: i64,
    buyer: &str,
    order_key: String,
    record: OrderRecord,
    mapping: &AccountRow,
    total_minutes: i64,
) -> anyhow::Result<()> {
    let available = accounts::fetch_available_accounts(
        &ctx.pool,
        &ctx.vault,
        ctx.user_id,
        ctx.workspace_id,
    )
    .await?;
    let replacement = accounts::select_replacement(
        &available,
        mapping.lot_number,
        mapping.mmr,
        mapping.id,
        1000,
    )
    .cloned();

    let Some(replacement) = replacement else {
        orders::log_order(&ctx.pool, &record, OrderAction::Busy).await?;
        send_chat(ctx, chat_id, messages::ORDER_ACCOUNT_NO_REPLACEMENT).await;
        state.processed_orders.insert(order_key);
        return Ok(());
    };

    let assigned = accounts::assign_to_buyer(
        &ctx.pool,
        replacement.id,
        ctx.user_id,
        buyer,
        total_minutes,
    )
    .await?;
    if !assigned {
        orders::log_order(&ctx.pool, &record, OrderAction::Busy).await?;
        send_chat(ctx, chat_id, messages::ORDER_ACCOUNT_NO_REPLACEMENT).await;
        state.processed_orders.insert(order_key);
        return Ok(());
    }

    orders::log_order(
        &ctx.pool,
        &OrderRecord {
            account_id: Some(replacement.id),
            account_name: replacement.account_name.clone(),
            rental_minutes: Some(total_minutes),
            ..record
        },
        OrderAction::ReplaceAssign,
    )
    .await?;

    let mut issued = replacement.clone();
    issued.owner = Some(normalize_owner(buyer));
    issued.rental_start = None;
    issued.rental_duration_minutes = total_minutes;
    issued.account_frozen = false;
    issued.rental_frozen = false;
    let reply = format!(
        "{}\n{}",
        messages::ORDER_ACCOUNT_REPLACEMENT_PREFIX,
        replies::build_account_message(&issued, total_minutes, true, crate::text::market_now()),
    );
    send_chat(ctx, chat_id, &reply).await;
    info!(
        "{} Order {}: replacement {} issued instead of {}.",
        ctx.label, order_key, replacement.id, mapping.id
    );

    finish_issued(ctx, tickets, &order_key, buyer, total_minutes).await;
    if let Err(e) = ctx.market.confirm_order(&order_key).await {
        warn!("{} Order {} confirm failed: {}", ctx.label, order_key, e);
    }
    state.processed_orders.insert(order_key);
    Ok(())
}

/// Post-issue hook: schedule the auto-ticket watcher when enabled.
async fn finish_issued<C: MarketClient + 'static>(
    ctx: &BotCtx<C>,
    tickets: &TicketScheduler,
    order_id: &str,
    buyer: &str,
    rental_minutes: i64,
) {
    match settings::auto_ticket_enabled(&ctx.pool, ctx.user_id).await {
        Ok(true) => {
            tickets
                .schedule(
                    ctx.clone(),
                    order_id.to_string(),
                    buyer.to_string(),
                    rental_minutes,
                )
                .await;
        }
        Ok(false) => {}
        Err(e) => warn!("{} Auto-ticket setting read failed: {}", ctx.label, e),
    }
}

// ── Review bonuses ─────────────────────────────────────────────────

/// Bonus hour applied per kept review.
const REVIEW_BONUS_MINUTES: i64 = 60;

/// Grant a one-time rental extension for a review on the order.
pub async fn apply_review_bonus<C: MarketClient>(
    ctx: &BotCtx<C>,
    order_id: &str,
) -> anyhow::Result<()> {
    let Some(owner) = orders::fetch_order_owner(&ctx.pool, order_id).await? else {
        return Ok(());
    };
    let Some(summary) = orders::fetch_order_summary(&ctx.pool, order_id, &owner).await? else {
        return Ok(());
    };
    let granted = orders::has_action(
        &ctx.pool,
        ctx.user_id,
        ctx.workspace_id,
        order_id,
        &owner,
        OrderAction::ReviewBonus,
    )
    .await?;
    let reverted = orders::has_action(
        &ctx.pool,
        ctx.user_id,
        ctx.workspace_id,
        order_id,
        &owner,
        OrderAction::ReviewBonusRevert,
    )
    .await?;
    if granted && !reverted {
        return Ok(());
    }
    let (Some(account_id), Some(minutes)) = (summary.account_id, summary.rental_minutes) else {
        return Ok(());
    };
    if minutes == 0 {
        return Ok(());
    }

    let extended = accounts::extend_for_buyer(
        &ctx.pool,
        account_id,
        ctx.user_id,
        &owner,
        REVIEW_BONUS_MINUTES,
    )
    .await?;
    if extended.is_none() {
        return Ok(());
    }
    orders::log_order(
        &ctx.pool,
        &OrderRecord {
            order_id: order_id.to_string(),
            owner: owner.clone(),
            user_id: ctx.user_id,
            workspace_id: summary.workspace_id,
            account_id: Some(account_id),
            account_name: summary.account_name.clone(),
            rental_minutes: Some(REVIEW_BONUS_MINUTES),
            lot_number: summary.lot_number,
            ..Default::default()
        },
        OrderAction::ReviewBonus,
    )
    .await?;
    info!("{} Review bonus granted for order {}.", ctx.label, order_id);
    Ok(())
}

/// Take the bonus back when the review is deleted. At most once.
pub async fn revert_review_bonus<C: MarketClient>(
    ctx: &BotCtx<C>,
    order_id: &str,
) -> anyhow::Result<()> {
    let Some(owner) = orders::fetch_order_owner(&ctx.pool, order_id).await? else {
        return Ok(());
    };
    let granted = orders::has_action(
        &ctx.pool,
        ctx.user_id,
        ctx.workspace_id,
        order_id,
        &owner,
        OrderAction::ReviewBonus,
    )
    .await?;
    let reverted = orders::has_action(
        &ctx.pool,
        ctx.user_id,
        ctx.workspace_id,
        order_id,
        &owner,
        OrderAction::ReviewBonusRevert,
    )
    .await?;
    if !granted || reverted {
        return Ok(());
    }
    let Some(summary) = orders::fetch_order_summary(&ctx.pool, order_id, &owner).await? else {
        return Ok(());
    };
    let Some(account_id) = summary.account_id else {
        return Ok(());
    };

    let shrunk = accounts::extend_for_buyer(
        &ctx.pool,
        account_id,
        ctx.user_id,
        &owner,
        -REVIEW_BONUS_MINUTES,
    )
    .await?;
    if shrunk.is_none() {
        return Ok(());
    }
    orders::log_order(
        &ctx.pool,
        &OrderRecord {
            order_id: order_id.to_string(),
            owner: owner.clone(),
            user_id: ctx.user_id,
            workspace_id: summary.workspace_id,
            account_id: Some(account_id),
            account_name: summary.account_name.clone(),
            rental_minutes: Some(-REVIEW_BONUS_MINUTES),
            lot_number: summary.lot_number,
            ..Default::default()
        },
        OrderAction::ReviewBonusRevert,
    )
    .await?;
    info!("{} Review bonus reverted for order {}.", ctx.label, order_id);
    Ok(())
}
