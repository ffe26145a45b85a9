//! Bot manager: one live bot per eligible workspace.
//!
//! Reconciles the set of running bots against the workspaces table every
//! sync interval: new workspaces get a bot, removed ones are stopped, a
//! proxy change restarts the bot, a token-only change is hot-swapped into
//! the running session. A worker that fails keeps retrying with a 30 s
//! backoff and surfaces its state through `workspace_status`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ai::AiClient;
use crate::bot::{Bot, BotCtx};
use crate::cache::Cache;
use crate::config::Config;
use crate::market::{proxy, FunpayClient, MarketClient, MarketError};
use crate::steam::guard::GuardCodes;
use crate::steam::presence::PresenceBridge;
use crate::steam::worker::SteamWorker;
use crate::store::workspaces::{self, WorkspaceRow, WorkspaceStatus};
use crate::vault::Vault;

/// Backoff between worker restarts.
const RESTART_BACKOFF: Duration = Duration::from_secs(30);

/// Slot the worker publishes its client into, for token hot-swaps.
type ClientSlot = Arc<RwLock<Option<Arc<FunpayClient>>>>;

struct BotHandle {
    token: String,
    proxy_url: Option<String>,
    user_id: i64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
    client: ClientSlot,
}

pub struct BotManager {
    cfg: Arc<Config>,
    pool: sqlx::MySqlPool,
    cache: Cache,
    vault: Vault,
    guard: Arc<GuardCodes>,
    steam_worker: Arc<SteamWorker>,
    presence: Arc<PresenceBridge>,
    ai: AiClient,
    bots: HashMap<i64, BotHandle>,
    cancel: CancellationToken,
}

impl BotManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<Config>,
        pool: sqlx::MySqlPool,
        cache: Cache,
        vault: Vault,
        guard: Arc<GuardCodes>,
        steam_worker: Arc<SteamWorker>,
        presence: Arc<PresenceBridge>,
        ai: AiClient,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            pool,
            cache,
            vault,
            guard,
            steam_worker,
            presence,
            ai,
            bots: HashMap::new(),
            cancel,
        }
    }

    /// Start every eligible workspace, then reconcile until cancelled.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            "Bot manager started. Sync interval: {}s.",
            self.cfg.user_sync_seconds
        );
        self.cache.clear_lot_cache().await;

        loop {
            if let Err(e) = self.reconcile().await {
                error!("Workspace sync failed: {}. Retrying in 30s.", e);
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(RESTART_BACKOFF) => continue,
                }
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(self.cfg.user_sync_seconds)) => {}
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// One sweep: stop bots whose workspace is gone, restart changed ones,
    /// start new ones.
    pub async fn reconcile(&mut self) -> anyhow::Result<()> {
        let mut desired: Vec<WorkspaceRow> = workspaces::fetch_workspaces(&self.pool).await?;
        if self.cfg.max_workspaces > 0 {
            desired.truncate(self.cfg.max_workspaces);
        }
        let desired: HashMap<i64, WorkspaceRow> = desired
            .into_iter()
            .map(|ws| (ws.workspace_id, ws))
            .collect();

        let stale: Vec<i64> = self
            .bots
            .keys()
            .filter(|id| !desired.contains_key(id))
            .copied()
            .collect();
        for workspace_id in stale {
            self.stop_workspace(workspace_id).await;
        }

        for (workspace_id, ws) in desired {
            if let Some(existing) = self.bots.get(&workspace_id) {
                let proxy_changed = existing.proxy_url != ws.proxy_url;
                let token_changed = existing.token != ws.golden_key;
                let slot = Arc::clone(&existing.client);
                if !proxy_changed && !token_changed {
                    continue;
                }
                // Token rotation only: swap it into the live session.
                let live_client = if proxy_changed {
                    None
                } else {
                    slot.read().await.clone()
                };
                if let Some(client) = live_client {
                    client.update_token(ws.golden_key.clone()).await;
                    if let Some(handle) = self.bots.get_mut(&workspace_id) {
                        handle.token = ws.golden_key.clone();
                    }
                    info!("{} Session token rotated.", ws.label());
                    continue;
                }
                self.stop_workspace(workspace_id).await;
            }
            self.start_workspace(ws);
        }
        Ok(())
    }

    /// Launch a worker for the workspace, unless its token is already in use.
    pub fn start_workspace(&mut self, ws: WorkspaceRow) {
        // A token binds to one marketplace account, so at most one bot may
        // poll with it. Within one user the first workspace wins (the
        // duplicate is an alias); across users the attempt is refused.
        for handle in self.bots.values() {
            if handle.token != ws.golden_key {
                continue;
            }
            if handle.user_id == ws.user_id {
                info!(
                    "{} Token already served by another workspace of the same user, skipping.",
                    ws.label()
                );
            } else {
                warn!(
                    "{} Token already bound to a bot of another user, refusing to start.",
                    ws.label()
                );
            }
            return;
        }

        let cancel = self.cancel.child_token();
        let slot: ClientSlot = Arc::new(RwLock::new(None));
        let worker = Worker {
            cfg: Arc::clone(&self.cfg),
            pool: self.pool.clone(),
            cache: self.cache.clone(),
            vault: self.vault.clone(),
            guard: Arc::clone(&self.guard),
            steam_worker: Arc::clone(&self.steam_worker),
            presence: Arc::clone(&self.presence),
            ai: self.ai.clone(),
            slot: Arc::clone(&slot),
            cancel: cancel.clone(),
        };
        let token = ws.golden_key.clone();
        let proxy_url = ws.proxy_url.clone();
        let user_id = ws.user_id;
        let workspace_id = ws.workspace_id;
        let join = tokio::spawn(async move { worker.run(ws).await });

        self.bots.insert(
            workspace_id,
            BotHandle {
                token,
                proxy_url,
                user_id,
                cancel,
                join,
                client: slot,
            },
        );
    }

    pub async fn stop_workspace(&mut self, workspace_id: i64) {
        let Some(handle) = self.bots.remove(&workspace_id) else {
            return;
        };
        handle.cancel.cancel();
        if let Err(e) = handle.join.await {
            warn!(workspace_id, "Bot task join failed: {}", e);
        }
        info!(workspace_id, "Bot stopped.");
    }

    pub async fn shutdown(&mut self) {
        let ids: Vec<i64> = self.bots.keys().copied().collect();
        let handles: Vec<_> = ids
            .into_iter()
            .filter_map(|id| self.bots.remove(&id))
            .collect();
        for handle in &handles {
            handle.cancel.cancel();
        }
        futures::future::join_all(handles.into_iter().map(|h| h.join)).await;
        info!("Bot manager stopped.");
    }
}

/// The restart-with-backoff wrapper around one workspace's bot.
struct Worker {
    cfg: Arc<Config>,
    pool: sqlx::MySqlPool,
    cache: Cache,
    vault: Vault,
    guard: Arc<GuardCodes>,
    steam_worker: Arc<SteamWorker>,
    presence: Arc<PresenceBridge>,
    ai: AiClient,
    slot: ClientSlot,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, ws: WorkspaceRow) {
        let label = ws.label();
        while !self.cancel.is_cancelled() {
            match self.run_once(&ws, &label).await {
                Ok(()) => break,
                Err(WorkerError::Fatal(message)) => {
                    warn!("{} {}", label, message);
                    break;
                }
                Err(WorkerError::Retry(status, message)) => {
                    let _ = workspaces::upsert_status(
                        &self.pool,
                        ws.user_id,
                        Some(ws.workspace_id),
                        status,
                        Some(&message),
                    )
                    .await;
                    error!("{} Worker error: {}. Restarting in 30s.", label, message);
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(RESTART_BACKOFF) => {}
                    }
                }
            }
        }
        info!("{} Worker stopped.", label);
    }

    async fn run_once(&self, ws: &WorkspaceRow, label: &str) -> Result<(), WorkerError> {
        if ws.golden_key.is_empty() {
            let _ = workspaces::upsert_status(
                &self.pool,
                ws.user_id,
                Some(ws.workspace_id),
                WorkspaceStatus::Unauthorized,
                Some("Missing golden key."),
            )
            .await;
            return Err(WorkerError::Fatal("Missing golden_key, skipping.".into()));
        }
        let Some(proxy_url) = ws
            .proxy_url
            .as_deref()
            .and_then(proxy::normalize_proxy_url)
        else {
            let _ = workspaces::upsert_status(
                &self.pool,
                ws.user_id,
                Some(ws.workspace_id),
                WorkspaceStatus::Error,
                Some("Missing proxy_url."),
            )
            .await;
            return Err(WorkerError::Fatal("Missing proxy_url, bot will not start.".into()));
        };

        let http = proxy::ensure_proxy_isolated(
            &proxy_url,
            self.cfg.user_agent.as_deref(),
            label,
        )
        .await
        .map_err(|e| {
            WorkerError::Retry(WorkspaceStatus::Error, format!("Proxy check failed: {}", e))
        })?;

        let client = Arc::new(FunpayClient::new(http, ws.golden_key.clone()));
        *self.slot.write().await = Some(Arc::clone(&client));

        let session = match client.bootstrap().await {
            Ok(session) => session,
            Err(MarketError::Unauthorized) => {
                return Err(WorkerError::Retry(
                    WorkspaceStatus::Unauthorized,
                    "Authorization required.".into(),
                ));
            }
            Err(e) => {
                return Err(WorkerError::Retry(
                    WorkspaceStatus::Error,
                    format!("Session bootstrap failed: {}", e),
                ));
            }
        };

        let _ = workspaces::upsert_status(
            &self.pool,
            ws.user_id,
            Some(ws.workspace_id),
            WorkspaceStatus::Ok,
            Some("Connected to FunPay."),
        )
        .await;

        let ctx = BotCtx {
            cfg: Arc::clone(&self.cfg),
            pool: self.pool.clone(),
            cache: self.cache.clone(),
            vault: self.vault.clone(),
            market: client,
            guard: Arc::clone(&self.guard),
            steam_worker: Arc::clone(&self.steam_worker),
            presence: Arc::clone(&self.presence),
            ai: self.ai.clone(),
            user_id: ws.user_id,
            workspace_id: Some(ws.workspace_id),
            username: session.username,
            label: label.to_string(),
        };
        Bot::new(ctx, self.cancel.clone())
            .run()
            .await
            .map_err(|e| WorkerError::Retry(WorkspaceStatus::Unauthorized, e.to_string()))
    }
}

enum WorkerError {
    /// Do not retry until the workspace row changes.
    Fatal(String),
    /// Record the status and retry after the backoff.
    Retry(WorkspaceStatus, String),
}
