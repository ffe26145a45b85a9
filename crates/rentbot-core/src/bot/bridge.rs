//! Chat bridge: marketplace chat state ↔ store.
//!
//! Three duties: log incoming messages (with replay suppression), keep the
//! chat snapshots in sync, and drain the outbound message queue the
//! dashboard writes into. Bot-authored sends also pass through here so every
//! outgoing message lands in the history exactly once.

use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::bot::BotCtx;
use crate::market::{ChatMessageIn, ChatPreview, MarketClient};
use crate::store::chats::{self, NewChatMessage};

/// Replay storms repeat (chat, author, text) within a couple of seconds.
const SIGNATURE_TTL: Duration = Duration::from_secs(2);

/// Remember this many processed message ids.
const SEEN_IDS_CAP: usize = 5000;

/// In-memory message dedup: id ring + short signature window.
#[derive(Debug, Default)]
pub struct DedupWindow {
    signatures: HashMap<(i64, String, String), Instant>,
    seen_ids: HashSet<i64>,
    seen_order: VecDeque<i64>,
}

impl DedupWindow {
    pub fn is_duplicate(&mut self, message: &ChatMessageIn) -> bool {
        self.is_duplicate_at(message, Instant::now())
    }

    pub fn is_duplicate_at(&mut self, message: &ChatMessageIn, now: Instant) -> bool {
        if message.id > 0 && self.seen_ids.contains(&message.id) {
            return true;
        }
        let signature = (
            message.chat_id,
            message
                .author
                .as_deref()
                .unwrap_or_default()
                .to_lowercase(),
            message.text.to_lowercase(),
        );
        if let Some(last) = self.signatures.get(&signature) {
            if now.duration_since(*last) < SIGNATURE_TTL {
                return true;
            }
        }
        self.signatures.retain(|_, at| now.duration_since(*at) < SIGNATURE_TTL);
        self.signatures.insert(signature, now);

        if message.id > 0 {
            self.seen_ids.insert(message.id);
            self.seen_order.push_back(message.id);
            while self.seen_order.len() > SEEN_IDS_CAP {
                if let Some(evicted) = self.seen_order.pop_front() {
                    self.seen_ids.remove(&evicted);
                }
            }
        }
        false
    }
}

/// Per-chat history backfill cooldowns.
#[derive(Debug, Default)]
pub struct PrefetchState {
    last_attempt: HashMap<i64, Instant>,
}

impl PrefetchState {
    fn should_attempt(&mut self, chat_id: i64, cooldown: Duration, now: Instant) -> bool {
        match self.last_attempt.get(&chat_id) {
            Some(last) if now.duration_since(*last) < cooldown => false,
            _ => {
                self.last_attempt.insert(chat_id, now);
                true
            }
        }
    }
}

/// Persist an incoming marketplace message and refresh the chat snapshot.
pub async fn log_incoming<C: MarketClient>(ctx: &BotCtx<C>, message: &ChatMessageIn) {
    let sent_time = message.sent_time.unwrap_or_else(|| Utc::now().naive_utc());
    let message_id = if message.id > 0 {
        message.id
    } else {
        Utc::now().timestamp_millis()
    };
    let result = chats::insert_message(
        &ctx.pool,
        &NewChatMessage {
            user_id: ctx.user_id,
            workspace_id: ctx.workspace_id,
            chat_id: message.chat_id,
            message_id,
            author: message.author.as_deref(),
            text: Some(&message.text),
            by_bot: message.by_bot,
            message_type: None,
            sent_time: Some(sent_time),
        },
    )
    .await;
    if let Err(e) = result {
        warn!(chat = message.chat_id, "Chat message insert failed: {}", e);
        return;
    }
    let summary = chats::upsert_summary(
        &ctx.pool,
        ctx.user_id,
        ctx.workspace_id,
        message.chat_id,
        message.author.as_deref(),
        Some(&message.text),
        !message.by_bot,
        Some(sent_time),
    )
    .await;
    if let Err(e) = summary {
        warn!(chat = message.chat_id, "Chat summary upsert failed: {}", e);
    }
    ctx.cache
        .invalidate_chat(ctx.user_id, ctx.workspace_id, message.chat_id)
        .await;
}

/// Persist a message the bot just sent.
pub async fn log_outgoing<C: MarketClient>(
    ctx: &BotCtx<C>,
    chat_id: i64,
    text: &str,
    message_id: i64,
) {
    let now = Utc::now().naive_utc();
    let message_id = if message_id > 0 {
        message_id
    } else {
        -Utc::now().timestamp_millis()
    };
    let result = chats::insert_message(
        &ctx.pool,
        &NewChatMessage {
            user_id: ctx.user_id,
            workspace_id: ctx.workspace_id,
            chat_id,
            message_id,
            author: Some(&ctx.username),
            text: Some(text),
            by_bot: true,
            message_type: None,
            sent_time: Some(now),
        },
    )
    .await;
    if let Err(e) = result {
        warn!(chat = chat_id, "Outgoing message insert failed: {}", e);
    }
    let summary = chats::upsert_summary(
        &ctx.pool,
        ctx.user_id,
        ctx.workspace_id,
        chat_id,
        None,
        Some(text),
        false,
        Some(now),
    )
    .await;
    if let Err(e) = summary {
        warn!(chat = chat_id, "Outgoing summary upsert failed: {}", e);
    }
    ctx.cache
        .invalidate_chat(ctx.user_id, ctx.workspace_id, chat_id)
        .await;
}

/// Upsert the chat list into the store and backfill history for chats we
/// have never seen, in small batches with per-chat cooldowns.
pub async fn sync_chats<C: MarketClient>(
    ctx: &BotCtx<C>,
    prefetch: &mut PrefetchState,
) -> anyhow::Result<()> {
    let previews = ctx.market.get_chats().await?;
    for preview in &previews {
        upsert_preview(ctx, preview).await;
    }

    if !ctx.cfg.prefetch.enabled || ctx.cfg.prefetch.max_chats == 0 {
        return Ok(());
    }
    let chat_ids: Vec<i64> = previews.iter().map(|p| p.id).collect();
    let missing =
        chats::chats_missing_history(&ctx.pool, ctx.user_id, ctx.workspace_id, &chat_ids)
            .await?;
    let now = Instant::now();
    let eligible: Vec<i64> = missing
        .into_iter()
        .filter(|id| prefetch.should_attempt(*id, ctx.cfg.prefetch.cooldown, now))
        .take(ctx.cfg.prefetch.max_chats)
        .collect();

    for batch in eligible.chunks(ctx.cfg.prefetch.batch_size.max(1)) {
        for &chat_id in batch {
            let history = match ctx.market.get_chat_history(chat_id).await {
                Ok(history) => history,
                Err(e) => {
                    debug!(chat_id, "History prefetch failed: {}", e);
                    continue;
                }
            };
            let keep_from = history.len().saturating_sub(ctx.cfg.prefetch.message_limit);
            for message in &history[keep_from..] {
                log_incoming(ctx, message).await;
            }
        }
    }
    Ok(())
}

async fn upsert_preview<C: MarketClient>(ctx: &BotCtx<C>, preview: &ChatPreview) {
    let result = chats::upsert_summary(
        &ctx.pool,
        ctx.user_id,
        ctx.workspace_id,
        preview.id,
        preview.name.as_deref(),
        preview.last_message_text.as_deref(),
        preview.unread,
        preview.last_message_time,
    )
    .await;
    if let Err(e) = result {
        warn!(chat = preview.id, "Chat preview upsert failed: {}", e);
    }
}

/// Send up to 20 pending outbox rows, oldest first. Success flips the row to
/// `sent` and records the message; failures accumulate attempts until the
/// row is parked as `failed`.
pub async fn drain_outbox<C: MarketClient>(ctx: &BotCtx<C>) -> anyhow::Result<()> {
    let pending =
        chats::fetch_outbox(&ctx.pool, ctx.user_id, ctx.workspace_id, 20).await?;
    for item in pending {
        if item.text.is_empty() || item.chat_id == 0 {
            continue;
        }
        match ctx.market.send_message(item.chat_id, &item.text).await {
            Ok(sent) => {
                log_outgoing(ctx, item.chat_id, &item.text, sent.id).await;
                chats::mark_outbox_sent(&ctx.pool, item.id).await?;
            }
            Err(e) => {
                let attempts = item.attempts + 1;
                warn!(outbox = item.id, attempts, "Outbox send failed: {}", e);
                chats::mark_outbox_failed(
                    &ctx.pool,
                    item.id,
                    attempts,
                    ctx.cfg.outbox_max_attempts,
                    &e.to_string(),
                )
                .await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: i64, chat_id: i64, author: &str, text: &str) -> ChatMessageIn {
        ChatMessageIn {
            id,
            chat_id,
            author: Some(author.into()),
            author_id: 7,
            text: text.into(),
            sent_time: None,
            by_bot: false,
        }
    }

    #[test]
    fn repeated_message_id_is_duplicate() {
        let mut dedup = DedupWindow::default();
        let now = Instant::now();
        assert!(!dedup.is_duplicate_at(&msg(100, 1, "alice", "!код"), now));
        assert!(dedup.is_duplicate_at(&msg(100, 1, "alice", "!код"), now + Duration::from_secs(60)));
    }

    #[test]
    fn same_signature_within_window_is_duplicate() {
        let mut dedup = DedupWindow::default();
        let now = Instant::now();
        assert!(!dedup.is_duplicate_at(&msg(0, 1, "alice", "привет"), now));
        // Different (unknown) id, same text, within 2 s.
        assert!(dedup.is_duplicate_at(&msg(0, 1, "ALICE", "Привет"), now + Duration::from_millis(500)));
        // Past the window it is a legitimate repeat.
        assert!(!dedup.is_duplicate_at(&msg(0, 1, "alice", "привет"), now + Duration::from_secs(3)));
    }

    #[test]
    fn different_chats_do_not_collide() {
        let mut dedup = DedupWindow::default();
        let now = Instant::now();
        assert!(!dedup.is_duplicate_at(&msg(0, 1, "alice", "!код"), now));
        assert!(!dedup.is_duplicate_at(&msg(0, 2, "alice", "!код"), now));
    }

    #[test]
    fn seen_ids_are_capped() {
        let mut dedup = DedupWindow::default();
        let now = Instant::now();
        for id in 1..=(SEEN_IDS_CAP as i64 + 10) {
            // Unique texts keep the signature window out of the way.
            dedup.is_duplicate_at(&msg(id, 1, "alice", &format!("m{}", id)), now + Duration::from_secs(id as u64 * 3));
        }
        assert!(dedup.seen_ids.len() <= SEEN_IDS_CAP);
        assert!(!dedup.seen_ids.contains(&1), "oldest id evicted");
    }

    #[test]
    fn prefetch_cooldown() {
        let mut prefetch = PrefetchState::default();
        let now = Instant::now();
        let cooldown = Duration::from_secs(600);
        assert!(prefetch.should_attempt(5, cooldown, now));
        assert!(!prefetch.should_attempt(5, cooldown, now + Duration::from_secs(10)));
        assert!(prefetch.should_attempt(5, cooldown, now + Duration::from_secs(601)));
        assert!(prefetch.should_attempt(6, cooldown, now));
    }
}
