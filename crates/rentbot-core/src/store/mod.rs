//! MySQL access layer.
//!
//! One module per entity family. The pool is the single source of truth;
//! bots keep no authoritative in-memory state beyond short-lived dedup sets.
//! Row-level ordering for owner assignment, freeze flips and wallet
//! adjustments is enforced with `SELECT … FOR UPDATE` inside short
//! transactions.

pub mod accounts;
pub mod blacklist;
pub mod bonus;
pub mod chats;
pub mod notifications;
pub mod orders;
pub mod settings;
pub mod workspaces;

use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use std::time::Duration;

use crate::config::DbConfig;

/// Connect to MySQL with a small pool; bots run many short queries, not
/// long-lived sessions.
pub async fn connect(db: &DbConfig) -> anyhow::Result<MySqlPool> {
    let url = db
        .connection_url()
        .ok_or_else(|| anyhow::anyhow!("MySQL connection is not configured"))?;
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&url)
        .await?;
    Ok(pool)
}
