//! Automatic lot raising.
//!
//! Raising bumps the workspace's lots back to the top of their category
//! listing. The marketplace only allows it every few hours and answers a
//! premature attempt with a wait hint, which we obey per category.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::bot::BotCtx;
use crate::market::{MarketClient, MarketError};
use crate::store::settings;

/// Default spacing between successful raises of one category.
const RAISE_INTERVAL: Duration = Duration::from_secs(4 * 3600);

/// Retry spacing after an unexpected error.
const RAISE_RETRY: Duration = Duration::from_secs(600);

/// Refresh the discovered category list this often.
const CATEGORY_SYNC_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Default)]
pub struct RaiseState {
    next_attempt: HashMap<i64, Instant>,
    categories: Vec<(i64, String)>,
    last_category_sync: Option<Instant>,
}

/// One auto-raise pass; called from the bot's chat-sync cadence.
pub async fn run_tick<C: MarketClient>(
    ctx: &BotCtx<C>,
    state: &mut RaiseState,
) -> anyhow::Result<()> {
    if !settings::auto_raise_enabled(&ctx.pool, ctx.user_id).await? {
        return Ok(());
    }

    let now = Instant::now();
    let sync_due = state
        .last_category_sync
        .map(|at| now.duration_since(at) >= CATEGORY_SYNC_INTERVAL)
        .unwrap_or(true);
    if sync_due {
        match ctx.market.get_sorted_categories().await {
            Ok(categories) => {
                state.categories = categories
                    .into_iter()
                    .map(|c| (c.id, c.name))
                    .collect();
                state.last_category_sync = Some(now);
                settings::upsert_raise_categories(
                    &ctx.pool,
                    ctx.user_id,
                    ctx.workspace_id,
                    &state.categories,
                )
                .await?;
            }
            Err(e) => {
                debug!("{} Category discovery failed: {}", ctx.label, e);
            }
        }
    }
    if state.categories.is_empty() {
        return Ok(());
    }

    let filter = settings::auto_raise_categories(&ctx.pool, ctx.user_id).await?;
    for (category_id, name) in state.categories.clone() {
        if let Some(allowed) = &filter {
            if !allowed.contains(&category_id) {
                continue;
            }
        }
        if let Some(next) = state.next_attempt.get(&category_id) {
            if now < *next {
                continue;
            }
        }
        match ctx.market.raise_lots(category_id).await {
            Ok(()) => {
                info!("{} Raised lots in {} ({}).", ctx.label, name, category_id);
                state.next_attempt.insert(category_id, now + RAISE_INTERVAL);
            }
            Err(MarketError::RateLimited { wait_secs }) => {
                debug!(
                    "{} Raise for {} rate limited, next try in {}s.",
                    ctx.label, name, wait_secs
                );
                state
                    .next_attempt
                    .insert(category_id, now + Duration::from_secs(wait_secs));
            }
            Err(e) => {
                warn!("{} Raise for {} failed: {}", ctx.label, name, e);
                state.next_attempt.insert(category_id, now + RAISE_RETRY);
            }
        }
    }
    Ok(())
}
