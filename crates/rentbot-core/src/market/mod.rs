//! Marketplace client: session, long-poll events, chats, orders, lots.
//!
//! The marketplace has no public API — everything goes through the HTML
//! pages and the same runner endpoint the web client long-polls, behind a
//! `golden_key` cookie session routed over the workspace proxy. The
//! [`MarketClient`] trait is the seam the bot is written against;
//! [`client::FunpayClient`] is the real implementation and tests substitute
//! their own.

pub mod client;
pub mod events;
pub mod proxy;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;

pub use client::FunpayClient;
pub use events::SystemEvent;

/// Error taxonomy for marketplace calls.
///
/// `Unauthorized` flips the workspace status and triggers a re-bootstrap
/// with the stored token; `RateLimited` carries the server-suggested wait;
/// everything transient is retried on the next loop iteration.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("marketplace session is not authorized")]
    Unauthorized,
    #[error("rate limited, retry in {wait_secs}s")]
    RateLimited { wait_secs: u64 },
    #[error("transient marketplace error: {0}")]
    Transient(String),
    #[error("unexpected page structure: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for MarketError {
    fn from(e: reqwest::Error) -> Self {
        MarketError::Transient(e.to_string())
    }
}

/// Bootstrap result: who this session belongs to.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub user_id: i64,
    pub username: String,
}

/// A chat preview from the chat list.
#[derive(Debug, Clone)]
pub struct ChatPreview {
    pub id: i64,
    pub name: Option<String>,
    pub last_message_text: Option<String>,
    pub unread: bool,
    pub last_message_time: Option<NaiveDateTime>,
}

/// A single chat message.
#[derive(Debug, Clone)]
pub struct ChatMessageIn {
    pub id: i64,
    pub chat_id: i64,
    pub author: Option<String>,
    pub author_id: i64,
    pub text: String,
    pub sent_time: Option<NaiveDateTime>,
    pub by_bot: bool,
}

impl ChatMessageIn {
    /// System messages come from the marketplace itself (author id 0).
    pub fn is_system(&self) -> bool {
        self.author_id == 0
            || self
                .author
                .as_deref()
                .map(|a| a.eq_ignore_ascii_case("funpay"))
                .unwrap_or(false)
    }
}

/// Confirmation of a sent message.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub id: i64,
}

/// An order page snapshot.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: String,
    pub buyer_username: String,
    pub chat_id: Option<i64>,
    pub amount: i64,
    pub price: Option<f64>,
    pub description: String,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Paid,
    Closed,
    Refunded,
}

/// A lot category eligible for raising.
#[derive(Debug, Clone)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

/// Support-ticket submission payload.
#[derive(Debug, Clone)]
pub struct SupportTicket<'a> {
    pub topic: &'a str,
    pub role: &'a str,
    pub order_id: &'a str,
    pub body: &'a str,
}

/// One batch of long-poll updates.
#[derive(Debug, Clone, Default)]
pub struct PollBatch {
    /// New messages since the previous poll, oldest first.
    pub messages: Vec<ChatMessageIn>,
    /// Refreshed chat previews, when the runner sent the chat list.
    pub chats: Vec<ChatPreview>,
}

/// The marketplace operations the bot needs. One session per workspace; the
/// owning bot is the only caller.
#[async_trait]
pub trait MarketClient: Send + Sync {
    /// (Re-)establish the session; returns the account behind the token.
    async fn bootstrap(&self) -> Result<SessionInfo, MarketError>;

    /// Swap the session token; takes effect on the next bootstrap.
    async fn update_token(&self, token: String);

    /// Long-poll one batch of updates.
    async fn poll(&self) -> Result<PollBatch, MarketError>;

    async fn get_chats(&self) -> Result<Vec<ChatPreview>, MarketError>;

    async fn get_chat_history(&self, chat_id: i64)
        -> Result<Vec<ChatMessageIn>, MarketError>;

    async fn send_message(&self, chat_id: i64, text: &str)
        -> Result<SentMessage, MarketError>;

    /// Resolve the chat id for a buyer by username, if a chat exists.
    async fn chat_id_for(&self, username: &str) -> Result<Option<i64>, MarketError>;

    async fn get_order(&self, order_id: &str) -> Result<Order, MarketError>;

    /// Best-effort order confirmation.
    async fn confirm_order(&self, order_id: &str) -> Result<(), MarketError>;

    /// Raise all lots of a category. `RateLimited` carries the wait hint.
    async fn raise_lots(&self, category_id: i64) -> Result<(), MarketError>;

    async fn get_sorted_categories(&self) -> Result<Vec<Category>, MarketError>;

    async fn submit_support_ticket(
        &self,
        ticket: &SupportTicket<'_>,
    ) -> Result<(), MarketError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_detection() {
        let mut msg = ChatMessageIn {
            id: 1,
            chat_id: 2,
            author: Some("FunPay".into()),
            author_id: 5,
            text: "t".into(),
            sent_time: None,
            by_bot: false,
        };
        assert!(msg.is_system());
        msg.author = Some("alice".into());
        assert!(!msg.is_system());
        msg.author_id = 0;
        assert!(msg.is_system());
    }
}
