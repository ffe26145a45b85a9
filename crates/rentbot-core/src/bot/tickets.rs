//! Auto-ticket watchers.
//!
//! Buyers routinely forget to confirm finished orders, which holds the
//! payout. After an issue or extension, a watcher sleeps until the rental
//! budget plus a day has passed; if by then the order is neither closed nor
//! refunded, a support ticket is filed asking the marketplace to close it.

use chrono::Duration as ChronoDuration;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bot::BotCtx;
use crate::market::{MarketClient, SupportTicket};
use crate::store::orders::{self, OrderAction, OrderRecord};
use crate::store::settings;

/// Extra slack on top of the rental budget before a ticket is considered.
const CONFIRM_SLACK: ChronoDuration = ChronoDuration::hours(24);

const TICKET_TOPIC: &str = "Покупатель не подтвердил заказ";
const TICKET_ROLE: &str = "seller";

const FALLBACK_BODY: &str = "Здравствуйте! Заказ выполнен: аккаунт был выдан и аренда \
     завершилась, но покупатель не подтвердил выполнение. Прошу закрыть заказ. Спасибо!";

/// Per-bot registry of pending watchers, keyed by order id.
pub struct TicketScheduler {
    watchers: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl TicketScheduler {
    pub fn new() -> Self {
        Self {
            watchers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule a watcher for an issued/extended order. A second schedule
    /// for the same order resets the timer (the extension moved the budget).
    pub async fn schedule<C: MarketClient + 'static>(
        &self,
        ctx: BotCtx<C>,
        order_id: String,
        buyer: String,
        rental_minutes: i64,
    ) {
        let token = CancellationToken::new();
        {
            let mut watchers = self.watchers.lock().await;
            if let Some(previous) = watchers.insert(order_id.clone(), token.clone()) {
                previous.cancel();
            }
        }

        let delay = ChronoDuration::minutes(rental_minutes.max(0)) + CONFIRM_SLACK;
        let delay = Duration::from_secs(delay.num_seconds().max(0) as u64);
        let watchers = Arc::clone(&self.watchers);
        debug!(order = %order_id, delay_secs = delay.as_secs(), "Auto-ticket watcher armed");

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(order = %order_id, "Auto-ticket watcher cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = fire(&ctx, &order_id, &buyer).await {
                        warn!(order = %order_id, "Auto-ticket failed: {}", e);
                    }
                }
            }
            watchers.lock().await.remove(&order_id);
        });
    }

    /// Drop the watcher (order was confirmed or refunded).
    pub async fn cancel(&self, order_id: &str) {
        let key = orders::normalize_order_id(order_id);
        if let Some(token) = self.watchers.lock().await.remove(&key) {
            token.cancel();
        }
    }

    pub async fn shutdown(&self) {
        let mut watchers = self.watchers.lock().await;
        for (_, token) in watchers.drain() {
            token.cancel();
        }
    }
}

impl Default for TicketScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn fire<C: MarketClient>(
    ctx: &BotCtx<C>,
    order_id: &str,
    buyer: &str,
) -> anyhow::Result<()> {
    // Setting may have been flipped while the watcher slept.
    if !settings::auto_ticket_enabled(&ctx.pool, ctx.user_id).await? {
        return Ok(());
    }
    for action in [OrderAction::Closed, OrderAction::Refunded] {
        if orders::has_action(
            &ctx.pool,
            ctx.user_id,
            ctx.workspace_id,
            order_id,
            buyer,
            action,
        )
        .await?
        {
            return Ok(());
        }
    }

    let prompt = format!(
        "Составь короткое вежливое обращение в поддержку торговой площадки от продавца: \
         заказ {} выполнен (аренда аккаунта завершена), покупатель {} не подтвердил заказ. \
         Попроси закрыть заказ. Без приветствий в несколько абзацев, 2-4 предложения.",
        order_id, buyer
    );
    let body = ctx
        .ai
        .generate("Ты помощник продавца игровых аккаунтов.", &prompt)
        .await
        .unwrap_or_else(|| FALLBACK_BODY.to_string());

    ctx.market
        .submit_support_ticket(&SupportTicket {
            topic: TICKET_TOPIC,
            role: TICKET_ROLE,
            order_id,
            body: &body,
        })
        .await?;

    orders::log_order(
        &ctx.pool,
        &OrderRecord {
            order_id: order_id.to_string(),
            owner: buyer.to_string(),
            user_id: ctx.user_id,
            workspace_id: ctx.workspace_id,
            ..Default::default()
        },
        OrderAction::TicketAuto,
    )
    .await?;
    info!(order = %order_id, "Auto-ticket submitted");
    Ok(())
}
