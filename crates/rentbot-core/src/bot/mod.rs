//! The per-workspace bot and its manager.
//!
//! One [`Bot`] serves one workspace: it long-polls marketplace events,
//! answers buyer commands, enforces rental lifetimes and mirrors chat state
//! into the store. [`manager::BotManager`] reconciles the set of live bots
//! against the workspaces table.

pub mod bridge;
pub mod commands;
pub mod manager;
pub mod orders;
pub mod pending;
pub mod raise;
pub mod reaper;
pub mod replies;
pub mod tickets;

use sqlx::MySqlPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ai::AiClient;
use crate::cache::Cache;
use crate::config::Config;
use crate::market::{events, MarketClient, MarketError};
use crate::steam::guard::GuardCodes;
use crate::steam::presence::PresenceBridge;
use crate::steam::worker::SteamWorker;
use crate::store::workspaces::{self, WorkspaceStatus};
use crate::text;
use crate::vault::Vault;

/// Everything a handler needs, cheap to clone into spawned watchers.
pub struct BotCtx<C: MarketClient> {
    pub cfg: Arc<Config>,
    pub pool: MySqlPool,
    pub cache: Cache,
    pub vault: Vault,
    pub market: Arc<C>,
    pub guard: Arc<GuardCodes>,
    pub steam_worker: Arc<SteamWorker>,
    pub presence: Arc<PresenceBridge>,
    pub ai: AiClient,
    pub user_id: i64,
    pub workspace_id: Option<i64>,
    /// Marketplace account name behind the session (authors our messages).
    pub username: String,
    /// Log label, e.g. `[Main]`.
    pub label: String,
}

impl<C: MarketClient> Clone for BotCtx<C> {
    fn clone(&self) -> Self {
        Self {
            cfg: Arc::clone(&self.cfg),
            pool: self.pool.clone(),
            cache: self.cache.clone(),
            vault: self.vault.clone(),
            market: Arc::clone(&self.market),
            guard: Arc::clone(&self.guard),
            steam_worker: Arc::clone(&self.steam_worker),
            presence: Arc::clone(&self.presence),
            ai: self.ai.clone(),
            user_id: self.user_id,
            workspace_id: self.workspace_id,
            username: self.username.clone(),
            label: self.label.clone(),
        }
    }
}

/// Send a chat message and record it in the store. Failures are logged; the
/// caller decides nothing on them (user-visible errors get their own reply
/// path through the outbox retries).
pub async fn send_chat<C: MarketClient>(ctx: &BotCtx<C>, chat_id: i64, text: &str) -> bool {
    match ctx.market.send_message(chat_id, text).await {
        Ok(sent) => {
            bridge::log_outgoing(ctx, chat_id, text, sent.id).await;
            true
        }
        Err(e) => {
            warn!("{} Failed to send chat message: {}", ctx.label, e);
            false
        }
    }
}

/// Resolve the buyer's chat and send there.
pub async fn send_by_owner<C: MarketClient>(ctx: &BotCtx<C>, owner: &str, text: &str) -> bool {
    let chat_id = match ctx.market.chat_id_for(owner).await {
        Ok(Some(chat_id)) => chat_id,
        Ok(None) => {
            warn!("{} Chat not found for {}.", ctx.label, owner);
            return false;
        }
        Err(e) => {
            warn!("{} Failed to resolve chat for {}: {}", ctx.label, owner, e);
            return false;
        }
    };
    send_chat(ctx, chat_id, text).await
}

/// Per-bot mutable state. Everything here dies with the bot; the store is
/// the only durable state.
pub struct BotState {
    pub processed_orders: std::collections::HashSet<String>,
    pub pending: pending::PendingCommands,
    pub dedup: bridge::DedupWindow,
    pub reaper: reaper::ReaperState,
    pub prefetch: bridge::PrefetchState,
    /// Low-priority replacement rate limiter: owner → last use.
    pub lp_replace_last: HashMap<String, Instant>,
    pub raise: raise::RaiseState,
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            processed_orders: Default::default(),
            pending: Default::default(),
            dedup: Default::default(),
            reaper: Default::default(),
            prefetch: Default::default(),
            lp_replace_last: HashMap::new(),
            raise: Default::default(),
        }
    }
}

pub struct Bot<C: MarketClient> {
    ctx: BotCtx<C>,
    cancel: CancellationToken,
    state: BotState,
    tickets: tickets::TicketScheduler,
}

impl<C: MarketClient + 'static> Bot<C> {
    pub fn new(ctx: BotCtx<C>, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            cancel,
            state: BotState::default(),
            tickets: tickets::TicketScheduler::new(),
        }
    }

    /// Run until cancelled. Returns `Err` on a fatal session problem; the
    /// manager records the status and restarts with backoff.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let cfg = Arc::clone(&self.ctx.cfg);
        let mut poll = tokio::time::interval(Duration::from_secs(cfg.poll_seconds.max(1)));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let started = Instant::now();
        let mut last_ok_call = started;
        let mut last_reaper = started - Duration::from_secs(cfg.rental_check_seconds);
        let mut last_chat_sync = started - Duration::from_secs(cfg.chat_sync_seconds);
        let mut last_status_ping = started;

        info!("{} Bot started for {}.", self.ctx.label, self.ctx.username);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = poll.tick() => {}
            }

            // Re-bootstrap a stale session before polling on it.
            if last_ok_call.elapsed() > Duration::from_secs(cfg.session_refresh_seconds) {
                match self.ctx.market.bootstrap().await {
                    Ok(session) => {
                        self.ctx.username = session.username;
                        last_ok_call = Instant::now();
                        info!("{} Session refreshed.", self.ctx.label);
                    }
                    Err(MarketError::Unauthorized) => {
                        anyhow::bail!("session refresh unauthorized");
                    }
                    Err(e) => {
                        warn!("{} Session refresh failed: {}", self.ctx.label, e);
                        continue;
                    }
                }
            }

            match self.ctx.market.poll().await {
                Ok(batch) => {
                    last_ok_call = Instant::now();
                    for message in &batch.messages {
                        self.handle_message(message).await;
                    }
                }
                Err(MarketError::Unauthorized) => {
                    anyhow::bail!("marketplace session unauthorized");
                }
                Err(MarketError::RateLimited { wait_secs }) => {
                    warn!("{} Rate limited, waiting {}s.", self.ctx.label, wait_secs);
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(wait_secs)) => {}
                    }
                }
                Err(e) => {
                    warn!("{} Poll failed: {}", self.ctx.label, e);
                }
            }

            if last_reaper.elapsed() >= Duration::from_secs(cfg.rental_check_seconds) {
                last_reaper = Instant::now();
                if let Err(e) = reaper::run_tick(&self.ctx, &mut self.state.reaper).await {
                    warn!("{} Reaper tick failed: {}", self.ctx.label, e);
                }
            }

            if last_chat_sync.elapsed() >= Duration::from_secs(cfg.chat_sync_seconds) {
                last_chat_sync = Instant::now();
                if let Err(e) = bridge::sync_chats(&self.ctx, &mut self.state.prefetch).await {
                    warn!("{} Chat sync failed: {}", self.ctx.label, e);
                }
                if let Err(e) = raise::run_tick(&self.ctx, &mut self.state.raise).await {
                    debug!("{} Auto-raise tick failed: {}", self.ctx.label, e);
                }
            }

            if let Err(e) = bridge::drain_outbox(&self.ctx).await {
                warn!("{} Outbox drain failed: {}", self.ctx.label, e);
            }

            if last_status_ping.elapsed() >= Duration::from_secs(60) {
                last_status_ping = Instant::now();
                let _ = workspaces::upsert_status(
                    &self.ctx.pool,
                    self.ctx.user_id,
                    self.ctx.workspace_id,
                    WorkspaceStatus::Ok,
                    Some("Connected to FunPay."),
                )
                .await;
            }
        }

        self.tickets.shutdown().await;
        info!("{} Bot stopped.", self.ctx.label);
        Ok(())
    }

    async fn handle_message(&mut self, message: &crate::market::ChatMessageIn) {
        if self.state.dedup.is_duplicate(message) {
            return;
        }
        bridge::log_incoming(&self.ctx, message).await;

        if message.is_system() {
            if let Some(event) = events::classify(message) {
                if let Err(e) = orders::handle_system_event(
                    &self.ctx,
                    &mut self.state,
                    &self.tickets,
                    &event,
                )
                .await
                {
                    warn!("{} System event handling failed: {}", self.ctx.label, e);
                }
            }
            return;
        }
        if message.by_bot {
            return;
        }

        let Some(sender) = message.author.as_deref().filter(|a| !a.is_empty()) else {
            return;
        };

        let dispatched = if let Some((command, args)) = text::parse_command(&message.text) {
            self.state.pending.clear(message.chat_id, sender);
            Some((command, args))
        } else {
            // A plain message may complete a pending choice ("!пауза" → "42").
            self.state
                .pending
                .pop(message.chat_id, sender)
                .map(|(command, prefix)| {
                    let args = format!("{} {}", prefix, message.text.trim())
                        .trim()
                        .to_string();
                    (command, args)
                })
        };
        let Some((command, args)) = dispatched else {
            return;
        };

        info!(
            "{} command={} args={} chat={} author={}",
            self.ctx.label,
            command.as_str(),
            if args.is_empty() { "-" } else { &args },
            message.chat_id,
            sender,
        );
        if let Err(e) = commands::handle_command(
            &self.ctx,
            &mut self.state,
            message.chat_id,
            sender,
            command,
            &args,
        )
        .await
        {
            warn!("{} Command {} failed: {}", self.ctx.label, command.as_str(), e);
        }
    }
}
