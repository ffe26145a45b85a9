//! rentbot CLI — run the bot manager, inspect configuration, seal secrets.
//!
//! Usage:
//!   rentbot run        — Start the bot manager (one bot per workspace)
//!   rentbot status     — Validate configuration and show what would run
//!   rentbot encrypt    — Seal a secret for storage in a credential column

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use rentbot_core::ai::AiClient;
use rentbot_core::bot::manager::BotManager;
use rentbot_core::cache::Cache;
use rentbot_core::config::Config;
use rentbot_core::steam::guard::GuardCodes;
use rentbot_core::steam::presence::PresenceBridge;
use rentbot_core::steam::worker::SteamWorker;
use rentbot_core::store;
use rentbot_core::vault::Vault;

#[derive(Parser)]
#[command(
    name = "rentbot",
    version,
    about = "Marketplace rental automation",
    long_about = "Runs one bot per seller workspace: issues rented game accounts to buyers, \
                  answers chat commands, and enforces rental lifetimes."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot manager
    Run,
    /// Validate configuration and show what would run
    Status,
    /// Encrypt a secret with DATA_ENCRYPTION_KEY for storage
    Encrypt {
        /// The plaintext value to seal
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run => run().await,
        Commands::Status => status().await,
        Commands::Encrypt { value } => encrypt(&value),
    }
}

async fn run() -> Result<()> {
    let cfg = Arc::new(Config::from_env());
    if let Err(errors) = cfg.validate() {
        for error in &errors {
            eprintln!("config error: {}", error);
        }
        anyhow::bail!("invalid configuration");
    }

    let pool = store::connect(&cfg.db).await?;
    let cache = Cache::connect(cfg.redis_url.as_deref()).await;
    let vault = Vault::from_env()?;
    if !vault.is_active() {
        info!("DATA_ENCRYPTION_KEY is not set; credentials stored as plaintext.");
    }

    let shared_http = reqwest::Client::new();
    let guard = Arc::new(GuardCodes::new(shared_http.clone()));
    let steam_worker = Arc::new(SteamWorker::new(
        shared_http.clone(),
        cfg.steam_worker_url.clone(),
        cfg.steam_worker_timeout,
    ));
    let presence = Arc::new(PresenceBridge::new(
        shared_http.clone(),
        cfg.steam_bridge_url.clone(),
        cfg.steam_bridge_token.clone(),
        cache.clone(),
        cfg.presence_cache_ttl_seconds,
        cfg.presence_cache_empty_ttl_seconds,
    ));
    let ai = AiClient::new(shared_http, cfg.groq.clone());

    let cancel = CancellationToken::new();
    let manager = BotManager::new(
        Arc::clone(&cfg),
        pool,
        cache,
        vault,
        guard,
        steam_worker,
        presence,
        ai,
        cancel.clone(),
    );

    let ctrl_c = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested.");
                cancel.cancel();
            }
        }
    });

    manager.run().await?;
    ctrl_c.abort();
    Ok(())
}

async fn status() -> Result<()> {
    let cfg = Config::from_env();
    match cfg.validate() {
        Ok(()) => println!("configuration: ok"),
        Err(errors) => {
            println!("configuration: {} problem(s)", errors.len());
            for error in &errors {
                println!("  - {}", error);
            }
            return Ok(());
        }
    }

    let pool = store::connect(&cfg.db).await?;
    let workspaces = rentbot_core::store::workspaces::fetch_workspaces(&pool).await?;
    println!("workspaces eligible for a bot: {}", workspaces.len());
    for ws in &workspaces {
        let proxy = if ws.proxy_url.as_deref().unwrap_or("").is_empty() {
            "no proxy (bot will not start)"
        } else {
            "proxy configured"
        };
        println!(
            "  {} user={} — {}",
            ws.label(),
            ws.username.as_deref().unwrap_or("?"),
            proxy
        );
    }

    let vault = Vault::from_env()?;
    println!(
        "column encryption: {}",
        if vault.is_active() { "on" } else { "off (plaintext)" }
    );
    println!(
        "cache: {}",
        if cfg.redis_url.is_some() { "redis" } else { "disabled" }
    );
    Ok(())
}

fn encrypt(value: &str) -> Result<()> {
    let vault = Vault::from_env()?;
    if !vault.is_active() {
        anyhow::bail!("DATA_ENCRYPTION_KEY must be set to encrypt values");
    }
    println!("{}", vault.encrypt(value)?);
    Ok(())
}
