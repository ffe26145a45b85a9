//! Buyer chat commands.
//!
//! Commands operate on the sender's own rentals, resolved by chat author
//! name. Anything that needs a specific rental and cannot infer it stores a
//! pending command and asks the buyer for the id; the next plain message
//! completes the command (see [`super::pending`]).

use chrono::Duration;
use tracing::warn;

use crate::bot::{pending, replies, send_chat, BotCtx, BotState};
use crate::market::MarketClient;
use crate::messages;
use crate::steam::guard;
use crate::store::accounts::{self, AccountRow};
use crate::store::notifications::{self, NotificationEvent};
use crate::store::{blacklist, bonus, orders};
use crate::text::{
    self, format_duration_minutes, normalize_owner, parse_account_id_arg, Command,
};

/// Replacement window after the first guard code.
const LP_REPLACE_WINDOW_MINUTES: i64 = 10;

/// Replacement MMR band.
const LP_REPLACE_MMR_RANGE: i64 = 1000;

/// One replacement per buyer per hour.
const LP_REPLACE_COOLDOWN_SECS: u64 = 3600;

/// Cancellation resets the rental budget to one unit.
const CANCEL_RESET_MINUTES: i64 = 60;

pub async fn handle_command<C: MarketClient + 'static>(
    ctx: &BotCtx<C>,
    state: &mut BotState,
    chat_id: i64,
    sender: &str,
    command: Command,
    args: &str,
) -> anyhow::Result<()> {
    match command {
        Command::Stock => handle_stock(ctx, chat_id).await,
        Command::Account => handle_account(ctx, state, chat_id, sender, args).await,
        Command::Code => handle_code(ctx, chat_id, sender).await,
        Command::Extend => handle_extend(ctx, chat_id, sender, args).await,
        Command::Pause => handle_pause(ctx, state, chat_id, sender, args).await,
        Command::Resume => handle_resume(ctx, state, chat_id, sender, args).await,
        Command::AdminCall => handle_admin(ctx, chat_id).await,
        Command::LpReplace => handle_lp_replace(ctx, state, chat_id, sender, args).await,
        Command::Cancel => handle_cancel(ctx, state, chat_id, sender, args).await,
        Command::Bonus => handle_bonus(ctx, chat_id, sender, args).await,
    }
}

/// Common preamble: the sender's rentals, with the empty reply sent.
async fn load_rentals<C: MarketClient>(
    ctx: &BotCtx<C>,
    chat_id: i64,
    sender: &str,
) -> anyhow::Result<Option<Vec<AccountRow>>> {
    let rentals = accounts::fetch_owner_accounts(
        &ctx.pool,
        &ctx.vault,
        ctx.user_id,
        sender,
        ctx.workspace_id,
    )
    .await?;
    if rentals.is_empty() {
        send_chat(ctx, chat_id, messages::RENTALS_EMPTY).await;
        return Ok(None);
    }
    Ok(Some(rentals))
}

/// Resolve which rental a command targets. With several rentals and no id
/// the choice list goes out and the command is parked as pending.
async fn select_rental<C: MarketClient>(
    ctx: &BotCtx<C>,
    pending: &mut pending::PendingCommands,
    chat_id: i64,
    sender: &str,
    rentals: &[AccountRow],
    args: &str,
    command: Command,
) -> Option<AccountRow> {
    if rentals.len() == 1 && parse_account_id_arg(args).is_none() {
        return Some(rentals[0].clone());
    }
    match parse_account_id_arg(args) {
        Some(id) => {
            if let Some(found) = rentals.iter().find(|a| a.id == id) {
                return Some(found.clone());
            }
            pending.set(chat_id, sender, command, "");
            send_chat(ctx, chat_id, &replies::build_choice_message(rentals, command)).await;
            None
        }
        None => {
            pending.set(chat_id, sender, command, "");
            send_chat(ctx, chat_id, &replies::build_choice_message(rentals, command)).await;
            None
        }
    }
}

async fn handle_stock<C: MarketClient>(ctx: &BotCtx<C>, chat_id: i64) -> anyhow::Result<()> {
    let available = accounts::fetch_available_accounts(
        &ctx.pool,
        &ctx.vault,
        ctx.user_id,
        ctx.workspace_id,
    )
    .await?;
    let lines = replies::build_stock_lines(&available);
    if lines.is_empty() {
        send_chat(ctx, chat_id, messages::STOCK_EMPTY).await;
        return Ok(());
    }

    let limit = ctx.cfg.stock_list_limit;
    if limit == 0 {
        let message = std::iter::once(messages::STOCK_TITLE.to_string())
            .chain(lines)
            .collect::<Vec<_>>()
            .join("\n");
        send_chat(ctx, chat_id, &message).await;
        return Ok(());
    }
    for (index, chunk) in lines.chunks(limit).enumerate() {
        let message = if index == 0 {
            std::iter::once(messages::STOCK_TITLE.to_string())
                .chain(chunk.iter().cloned())
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            chunk.join("\n")
        };
        send_chat(ctx, chat_id, &message).await;
    }
    Ok(())
}

async fn handle_account<C: MarketClient>(
    ctx: &BotCtx<C>,
    state: &mut BotState,
    chat_id: i64,
    sender: &str,
    args: &str,
) -> anyhow::Result<()> {
    let Some(rentals) = load_rentals(ctx, chat_id, sender).await? else {
        return Ok(());
    };
    let Some(selected) = select_rental(
        ctx,
        &mut state.pending,
        chat_id,
        sender,
        &rentals,
        args,
        Command::Account,
    )
    .await
    else {
        return Ok(());
    };

    if !selected.is_rental_active() {
        send_chat(ctx, chat_id, messages::RENTAL_NOT_ACTIVE_MESSAGE).await;
        return Ok(());
    }
    let message = replies::build_account_message(
        &selected,
        selected.rental_duration_minutes,
        true,
        text::market_now(),
    );
    send_chat(ctx, chat_id, &message).await;
    Ok(())
}

async fn handle_code<C: MarketClient>(
    ctx: &BotCtx<C>,
    chat_id: i64,
    sender: &str,
) -> anyhow::Result<()> {
    let Some(rentals) = load_rentals(ctx, chat_id, sender).await? else {
        return Ok(());
    };

    let active: Vec<&AccountRow> = rentals.iter().filter(|a| a.is_rental_active()).collect();
    if active.is_empty() {
        let reply = if rentals.iter().any(|a| a.rental_frozen) {
            messages::RENTAL_CODE_BLOCKED_MESSAGE
        } else if rentals.iter().any(|a| a.account_frozen) {
            messages::RENTAL_CODE_FROZEN_MESSAGE
        } else {
            messages::RENTAL_NOT_ACTIVE_MESSAGE
        };
        send_chat(ctx, chat_id, reply).await;
        return Ok(());
    }

    let mut lines = vec!["Коды Steam Guard:".to_string()];
    let mut starting_ids = Vec::new();
    for account in &active {
        let login = account.login.as_deref().unwrap_or("-");
        let line = match account.mafile_json.as_deref() {
            Some(mafile) => match ctx.guard.code_for(mafile).await {
                Ok(code) => format!("{} ({}): {}", account.display_label(), login, code),
                Err(e) => format!("{} ({}): ошибка {}", account.display_label(), login, e),
            },
            None => format!("{} ({}): ошибка нет maFile", account.display_label(), login),
        };
        lines.push(line);
        if account.rental_start.is_none() {
            starting_ids.push(account.id);
        }
    }

    // The first code starts the deferred timer.
    if !starting_ids.is_empty() {
        accounts::start_rentals_for_owner(
            &ctx.pool,
            ctx.user_id,
            sender,
            &starting_ids,
            text::market_now(),
        )
        .await?;
        lines.push(String::new());
        lines.push(messages::RENTAL_STARTED_MESSAGE.to_string());
    }

    send_chat(ctx, chat_id, &lines.join("\n")).await;
    Ok(())
}

async fn handle_extend<C: MarketClient>(
    ctx: &BotCtx<C>,
    chat_id: i64,
    sender: &str,
    args: &str,
) -> anyhow::Result<()> {
    let mut tokens = args.split_whitespace();
    let hours: i64 = tokens.next().and_then(|t| t.parse().ok()).unwrap_or(0);
    if hours <= 0 {
        send_chat(ctx, chat_id, messages::EXTEND_USAGE_MESSAGE).await;
        return Ok(());
    }
    let account_id = tokens.next().and_then(|t| t.parse::<i64>().ok());

    let Some(rentals) = load_rentals(ctx, chat_id, sender).await? else {
        return Ok(());
    };
    let selected = match account_id {
        Some(id) => rentals.iter().find(|a| a.id == id),
        None if rentals.len() == 1 => rentals.first(),
        None => None,
    };
    let Some(selected) = selected else {
        send_chat(
            ctx,
            chat_id,
            &replies::build_choice_message(&rentals, Command::Extend),
        )
        .await;
        return Ok(());
    };

    // Payment drives the actual extension: the bot only points at the lot.
    let duration_label = format_duration_minutes(hours * 60);
    let lot_label = selected
        .lot_url
        .clone()
        .or_else(|| selected.lot_number.map(|n| format!("лот №{}", n)));
    let message = match lot_label {
        Some(lot) => format!(
            "Чтобы продлить аренду на {}, оплатите этот лот: {}.\n1 шт = 1 час.",
            duration_label, lot
        ),
        None => format!(
            "Чтобы продлить аренду на {}, оплатите соответствующий лот.\nЛот не найден, пожалуйста напишите !админ.",
            duration_label
        ),
    };
    send_chat(ctx, chat_id, &message).await;
    Ok(())
}

async fn handle_pause<C: MarketClient>(
    ctx: &BotCtx<C>,
    state: &mut BotState,
    chat_id: i64,
    sender: &str,
    args: &str,
) -> anyhow::Result<()> {
    let Some(rentals) = load_rentals(ctx, chat_id, sender).await? else {
        return Ok(());
    };
    let Some(selected) = select_rental(
        ctx,
        &mut state.pending,
        chat_id,
        sender,
        &rentals,
        args,
        Command::Pause,
    )
    .await
    else {
        return Ok(());
    };

    if selected.rental_frozen {
        send_chat(ctx, chat_id, messages::RENTAL_ALREADY_PAUSED_MESSAGE).await;
        return Ok(());
    }
    let paused = accounts::update_freeze_state(
        &ctx.pool,
        selected.id,
        ctx.user_id,
        sender,
        true,
        Some(text::market_now()),
        None,
    )
    .await?;
    if !paused {
        send_chat(ctx, chat_id, messages::RENTAL_PAUSE_FAILED_MESSAGE).await;
        return Ok(());
    }

    let mut reply = messages::RENTAL_PAUSED_MESSAGE.to_string();
    if rentals.len() > 1 {
        reply.push_str(&format!(" (ID {})", selected.id));
    }
    send_chat(ctx, chat_id, &reply).await;
    Ok(())
}

async fn handle_resume<C: MarketClient>(
    ctx: &BotCtx<C>,
    state: &mut BotState,
    chat_id: i64,
    sender: &str,
    args: &str,
) -> anyhow::Result<()> {
    let Some(rentals) = load_rentals(ctx, chat_id, sender).await? else {
        return Ok(());
    };
    let Some(selected) = select_rental(
        ctx,
        &mut state.pending,
        chat_id,
        sender,
        &rentals,
        args,
        Command::Resume,
    )
    .await
    else {
        return Ok(());
    };

    if !selected.rental_frozen {
        send_chat(ctx, chat_id, messages::RENTAL_NOT_PAUSED_MESSAGE).await;
        return Ok(());
    }
    let new_start = text::resume_start(
        selected.rental_start,
        selected.rental_frozen_at,
        text::market_now(),
    );
    let resumed = accounts::update_freeze_state(
        &ctx.pool,
        selected.id,
        ctx.user_id,
        sender,
        false,
        None,
        new_start,
    )
    .await?;
    if !resumed {
        send_chat(ctx, chat_id, messages::RENTAL_RESUME_FAILED_MESSAGE).await;
        return Ok(());
    }

    let mut reply = messages::RENTAL_RESUMED_MESSAGE.to_string();
    if rentals.len() > 1 {
        reply.push_str(&format!(" (ID {})", selected.id));
    }
    send_chat(ctx, chat_id, &reply).await;
    Ok(())
}

/// The admin counters were already bumped when the incoming message hit the
/// store (see `store::chats::insert_message`); here we only acknowledge.
async fn handle_admin<C: MarketClient>(ctx: &BotCtx<C>, chat_id: i64) -> anyhow::Result<()> {
    send_chat(ctx, chat_id, messages::ADMIN_CALLED_MESSAGE).await;
    Ok(())
}

async fn handle_lp_replace<C: MarketClient>(
    ctx: &BotCtx<C>,
    state: &mut BotState,
    chat_id: i64,
    sender: &str,
    args: &str,
) -> anyhow::Result<()> {
    let Some(rentals) = load_rentals(ctx, chat_id, sender).await? else {
        return Ok(());
    };
    let Some(selected) = select_rental(
        ctx,
        &mut state.pending,
        chat_id,
        sender,
        &rentals,
        args,
        Command::LpReplace,
    )
    .await
    else {
        return Ok(());
    };

    // Flag the previous holder for review: a low-priority penalty usually
    // comes from the rental before this one.
    let previous_owner = orders::previous_owner_for_account(
        &ctx.pool,
        ctx.user_id,
        ctx.workspace_id,
        selected.id,
        sender,
    )
    .await
    .unwrap_or(None);
    let suggestion_details = format!(
        "Account: {} (ID {}); login={}; steam_id={}; current_owner={}; previous_owner={}",
        selected.display_label(),
        selected.id,
        selected.login.as_deref().unwrap_or("-"),
        selected
            .mafile_json
            .as_deref()
            .and_then(guard::steam_id_from_mafile)
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unknown".into()),
        sender,
        previous_owner.as_deref().unwrap_or("unknown"),
    );
    let mut suggestion_owner = None;
    if let Some(previous) = &previous_owner {
        if normalize_owner(previous) != normalize_owner(sender) {
            let added = blacklist::upsert_suggestion(
                &ctx.pool,
                ctx.user_id,
                ctx.workspace_id,
                previous,
                "LP replacement request",
                &suggestion_details,
            )
            .await
            .unwrap_or(false);
            if added {
                suggestion_owner = Some(previous.clone());
            }
        }
    }

    let Some(rental_start) = selected.rental_start else {
        send_chat(ctx, chat_id, messages::LP_REPLACE_NO_CODE_MESSAGE).await;
        return Ok(());
    };
    let now = text::market_now();
    if now.signed_duration_since(rental_start) > Duration::minutes(LP_REPLACE_WINDOW_MINUTES) {
        send_chat(ctx, chat_id, messages::LP_REPLACE_TOO_LATE_MESSAGE).await;
        return Ok(());
    }

    let owner_key = normalize_owner(sender);
    if let Some(last) = state.lp_replace_last.get(&owner_key) {
        if last.elapsed().as_secs() < LP_REPLACE_COOLDOWN_SECS {
            send_chat(ctx, chat_id, messages::LP_REPLACE_RATE_LIMIT_MESSAGE).await;
            return Ok(());
        }
    }

    let Some(target_mmr) = selected.mmr else {
        send_chat(ctx, chat_id, messages::LP_REPLACE_NO_MMR_MESSAGE).await;
        return Ok(());
    };

    let available = accounts::fetch_available_accounts(
        &ctx.pool,
        &ctx.vault,
        ctx.user_id,
        ctx.workspace_id,
    )
    .await?;
    let replacement = accounts::select_replacement(
        &available,
        None,
        Some(target_mmr),
        selected.id,
        LP_REPLACE_MMR_RANGE,
    )
    .cloned();
    let Some(replacement) = replacement else {
        send_chat(ctx, chat_id, messages::LP_REPLACE_NO_MATCH_MESSAGE).await;
        return Ok(());
    };

    let minutes = selected.rental_duration_minutes;
    let transferred = accounts::replace_rental(
        &ctx.pool,
        selected.id,
        replacement.id,
        ctx.user_id,
        sender,
        Some(rental_start),
        minutes,
    )
    .await?;
    let result = if transferred { "success" } else { "failed" };
    if let Some(owner) = &suggestion_owner {
        let logged = blacklist::log_event(
            &ctx.pool,
            ctx.user_id,
            ctx.workspace_id,
            owner,
            "lp_replace_request",
            Some("LP replacement request"),
            Some(&format!("{}; result={}", suggestion_details, result)),
            None,
        )
        .await;
        if let Err(e) = logged {
            warn!("{} LP suggestion log failed: {}", ctx.label, e);
        }
    }
    if !transferred {
        send_chat(ctx, chat_id, messages::LP_REPLACE_FAILED_MESSAGE).await;
        return Ok(());
    }

    let mut issued = replacement;
    issued.owner = Some(owner_key.clone());
    issued.rental_start = Some(rental_start);
    issued.rental_duration_minutes = minutes;
    let reply = format!(
        "{}\n{}",
        messages::LP_REPLACE_SUCCESS_PREFIX,
        replies::build_account_message(&issued, minutes, false, now),
    );
    send_chat(ctx, chat_id, &reply).await;
    state.lp_replace_last.insert(owner_key, std::time::Instant::now());
    Ok(())
}

async fn handle_cancel<C: MarketClient>(
    ctx: &BotCtx<C>,
    state: &mut BotState,
    chat_id: i64,
    sender: &str,
    args: &str,
) -> anyhow::Result<()> {
    let Some(rentals) = load_rentals(ctx, chat_id, sender).await? else {
        return Ok(());
    };
    let Some(selected) = select_rental(
        ctx,
        &mut state.pending,
        chat_id,
        sender,
        &rentals,
        args,
        Command::Cancel,
    )
    .await
    else {
        return Ok(());
    };

    // Kick remote sessions first; release regardless of the outcome.
    ctx.steam_worker
        .deauthorize_all(
            selected.login.as_deref().unwrap_or(""),
            selected.password.as_deref().unwrap_or(""),
            selected.mafile_json.as_deref().unwrap_or(""),
        )
        .await;

    let released = accounts::release_account(&ctx.pool, selected.id, ctx.user_id).await?;
    if !released {
        send_chat(ctx, chat_id, messages::RENTAL_CANCEL_FAILED_MESSAGE).await;
        return Ok(());
    }
    accounts::reset_duration(&ctx.pool, selected.id, ctx.user_id, CANCEL_RESET_MINUTES).await?;

    let _ = notifications::log_event(
        &ctx.pool,
        &NotificationEvent {
            event_type: "rental_cancelled".into(),
            status: "ok".into(),
            title: "Rental cancelled by buyer".into(),
            message: Some("Buyer cancelled the rental with !отмена.".into()),
            owner: Some(sender.to_string()),
            account_name: selected.account_name.clone().or(selected.login.clone()),
            account_id: Some(selected.id),
            order_id: None,
            user_id: ctx.user_id,
            workspace_id: ctx.workspace_id,
        },
    )
    .await;
    send_chat(ctx, chat_id, messages::RENTAL_CANCELLED_MESSAGE).await;
    Ok(())
}

async fn handle_bonus<C: MarketClient>(
    ctx: &BotCtx<C>,
    chat_id: i64,
    sender: &str,
    args: &str,
) -> anyhow::Result<()> {
    let balance =
        bonus::balance(&ctx.pool, ctx.user_id, ctx.workspace_id, sender).await?;
    let rentals = accounts::fetch_owner_accounts(
        &ctx.pool,
        &ctx.vault,
        ctx.user_id,
        sender,
        ctx.workspace_id,
    )
    .await?;

    let Some(account_id) = parse_account_id_arg(args) else {
        if balance <= 0 {
            send_chat(ctx, chat_id, messages::BONUS_EMPTY_MESSAGE).await;
            return Ok(());
        }
        let mut lines = vec![format!(
            "Ваш баланс бонусов (время): {}.",
            format_duration_minutes(balance)
        )];
        if rentals.is_empty() {
            lines.push(
                "Активных аренд сейчас нет. Бонус сохранён — примените позже командой !бонус <ID аккаунта>."
                    .to_string(),
            );
        } else {
            lines.push("Чтобы применить бонус к аренде, напишите: !бонус <ID аккаунта>.".into());
            for account in &rentals {
                lines.push(format!("{} - ID {}", account.display_label(), account.id));
            }
        }
        send_chat(ctx, chat_id, &lines.join("\n")).await;
        return Ok(());
    };

    if balance < 60 {
        let reply = format!(
            "Недостаточно бонусных часов. Баланс: {}.",
            format_duration_minutes(balance)
        );
        send_chat(ctx, chat_id, &reply).await;
        return Ok(());
    }
    if !rentals.iter().any(|a| a.id == account_id) {
        send_chat(ctx, chat_id, messages::BONUS_BAD_ID_MESSAGE).await;
        return Ok(());
    }

    let extended =
        accounts::extend_for_buyer(&ctx.pool, account_id, ctx.user_id, sender, 60).await?;
    if extended.is_none() {
        send_chat(ctx, chat_id, messages::BONUS_APPLY_FAILED_MESSAGE).await;
        return Ok(());
    }
    let (new_balance, applied) = bonus::adjust(
        &ctx.pool,
        ctx.user_id,
        ctx.workspace_id,
        sender,
        -60,
        "apply_bonus",
        None,
        Some(account_id),
    )
    .await?;
    if applied == 0 {
        send_chat(ctx, chat_id, "Недостаточно бонусных часов.").await;
        return Ok(());
    }

    let reply = format!(
        "✅ Бонусный час применён. Новый баланс: {}.",
        format_duration_minutes(new_balance)
    );
    send_chat(ctx, chat_id, &reply).await;
    Ok(())
}
