//! rentbot-core: library behind the marketplace rental-automation engine.
//!
//! One bot per seller workspace listens to marketplace events, issues rented
//! game accounts to buyers, answers in-chat commands (credentials, guard
//! codes, pause/resume, replacement, bonuses) and enforces rental lifetimes.
//!
//! Building blocks:
//!
//! - [`config`] — typed configuration from environment variables
//! - [`vault`] — AES-256-GCM column encryption for credentials at rest
//! - [`store`] — MySQL access layer (workspaces, accounts, orders, chats, …)
//! - [`cache`] — optional redis cache for presence snapshots and chat reads
//! - [`market`] — marketplace client: cookie session, long-poll, chat, orders
//! - [`steam`] — guard-code generation, session deauthorization, presence
//! - [`ai`] — optional text generation for support tickets
//! - [`bot`] — the bot manager, per-workspace worker loop and its handlers

pub mod ai;
pub mod bot;
pub mod cache;
pub mod config;
pub mod market;
pub mod messages;
pub mod steam;
pub mod store;
pub mod text;
pub mod vault;
