//! HTTP implementation of [`MarketClient`] for funpay.com.
//!
//! The session is a `golden_key` cookie; pages are HTML and the web client's
//! own long-poll endpoint (`/runner/`) delivers updates. All HTML parsing
//! happens in sync helpers over owned strings so no `scraper` document ever
//! crosses an await point.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rand::distributions::Alphanumeric;
use rand::Rng;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{
    Category, ChatMessageIn, ChatPreview, MarketClient, MarketError, Order, OrderStatus,
    PollBatch, SentMessage, SessionInfo, SupportTicket,
};

const BASE_URL: &str = "https://funpay.com";

/// How many changed chats we are willing to re-read per poll.
const MAX_HISTORY_FETCHES_PER_POLL: usize = 10;

/// Mutable session state behind the immutable client handle.
struct RunnerState {
    user_id: i64,
    username: String,
    csrf_token: String,
    bookmarks_tag: String,
    orders_tag: String,
    /// Highest message id already emitted per chat.
    last_seen: HashMap<i64, i64>,
    /// Last chat preview text, to detect changed chats cheaply.
    previews: HashMap<i64, String>,
    /// The first poll only records positions instead of emitting history.
    primed: bool,
}

impl RunnerState {
    fn new() -> Self {
        Self {
            user_id: 0,
            username: String::new(),
            csrf_token: String::new(),
            bookmarks_tag: random_tag(),
            orders_tag: random_tag(),
            last_seen: HashMap::new(),
            previews: HashMap::new(),
            primed: false,
        }
    }
}

pub struct FunpayClient {
    http: reqwest::Client,
    golden_key: RwLock<String>,
    state: Mutex<RunnerState>,
}

impl FunpayClient {
    /// `http` must already be routed through the workspace proxy (see
    /// [`super::proxy::ensure_proxy_isolated`]).
    pub fn new(http: reqwest::Client, golden_key: String) -> Self {
        Self {
            http,
            golden_key: RwLock::new(golden_key),
            state: Mutex::new(RunnerState::new()),
        }
    }

    async fn cookie_header(&self) -> String {
        format!("golden_key={}", self.golden_key.read().await)
    }

    async fn get_page(&self, path: &str) -> Result<String, MarketError> {
        let response = self
            .http
            .get(format!("{}{}", BASE_URL, path))
            .header(reqwest::header::COOKIE, self.cookie_header().await)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(MarketError::Unauthorized);
        }
        if status.as_u16() == 429 {
            return Err(MarketError::RateLimited { wait_secs: 60 });
        }
        if !status.is_success() {
            return Err(MarketError::Transient(format!("GET {} -> {}", path, status)));
        }
        Ok(response.text().await?)
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<Value, MarketError> {
        let response = self
            .http
            .post(format!("{}{}", BASE_URL, path))
            .header(reqwest::header::COOKIE, self.cookie_header().await)
            .header("X-Requested-With", "XMLHttpRequest")
            .form(form)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(MarketError::Unauthorized);
        }
        if status.as_u16() == 429 {
            return Err(MarketError::RateLimited { wait_secs: 60 });
        }
        if !status.is_success() {
            return Err(MarketError::Transient(format!("POST {} -> {}", path, status)));
        }
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|_| MarketError::Parse(format!("POST {} returned non-JSON", path)))
    }

    async fn csrf_token(&self) -> Result<String, MarketError> {
        let state = self.state.lock().await;
        if state.csrf_token.is_empty() {
            return Err(MarketError::Unauthorized);
        }
        Ok(state.csrf_token.clone())
    }
}

#[async_trait]
impl MarketClient for FunpayClient {
    async fn bootstrap(&self) -> Result<SessionInfo, MarketError> {
        let html = self.get_page("/").await?;
        let app = parse_app_data(&html)?;
        if app.user_id == 0 {
            return Err(MarketError::Unauthorized);
        }
        let mut state = self.state.lock().await;
        state.user_id = app.user_id;
        state.username = app.username.clone();
        state.csrf_token = app.csrf_token;
        Ok(SessionInfo {
            user_id: app.user_id,
            username: app.username,
        })
    }

    async fn update_token(&self, token: String) {
        *self.golden_key.write().await = token;
        // Force a fresh bootstrap before the next authenticated call.
        self.state.lock().await.csrf_token.clear();
    }

    async fn poll(&self) -> Result<PollBatch, MarketError> {
        let (user_id, csrf, bookmarks_tag, orders_tag) = {
            let state = self.state.lock().await;
            if state.csrf_token.is_empty() {
                return Err(MarketError::Unauthorized);
            }
            (
                state.user_id,
                state.csrf_token.clone(),
                state.bookmarks_tag.clone(),
                state.orders_tag.clone(),
            )
        };

        let objects = serde_json::json!([
            {"type": "chat_bookmarks", "id": user_id, "tag": bookmarks_tag, "data": false},
            {"type": "orders_counters", "id": user_id, "tag": orders_tag, "data": false},
        ]);
        let body = self
            .post_form(
                "/runner/",
                &[
                    ("objects", objects.to_string()),
                    ("request", "false".to_string()),
                    ("csrf_token", csrf),
                ],
            )
            .await?;

        let mut batch = PollBatch::default();
        let mut changed_chats: Vec<i64> = Vec::new();

        for object in body["objects"].as_array().into_iter().flatten() {
            let obj_type = object["type"].as_str().unwrap_or("");
            let tag = object["tag"].as_str().unwrap_or("").to_string();
            match obj_type {
                "chat_bookmarks" => {
                    if !tag.is_empty() {
                        self.state.lock().await.bookmarks_tag = tag;
                    }
                    let Some(html) = object["data"]["html"].as_str() else {
                        continue;
                    };
                    let previews = parse_chat_previews(html);
                    let mut state = self.state.lock().await;
                    for preview in &previews {
                        let text = preview.last_message_text.clone().unwrap_or_default();
                        let changed = state
                            .previews
                            .insert(preview.id, text.clone())
                            .map(|old| old != text)
                            .unwrap_or(true);
                        if (preview.unread || changed)
                            && changed_chats.len() < MAX_HISTORY_FETCHES_PER_POLL
                        {
                            changed_chats.push(preview.id);
                        }
                    }
                    batch.chats = previews;
                }
                "orders_counters" => {
                    if !tag.is_empty() {
                        self.state.lock().await.orders_tag = tag;
                    }
                }
                other => debug!(object = other, "Unhandled runner object"),
            }
        }

        let primed = self.state.lock().await.primed;
        for chat_id in changed_chats {
            let history = match self.get_chat_history(chat_id).await {
                Ok(history) => history,
                Err(e) => {
                    warn!(chat_id, "Chat history fetch failed during poll: {}", e);
                    continue;
                }
            };
            let mut state = self.state.lock().await;
            let seen = state.last_seen.get(&chat_id).copied().unwrap_or(0);
            let newest = history.iter().map(|m| m.id).max().unwrap_or(seen);
            if primed {
                batch
                    .messages
                    .extend(history.into_iter().filter(|m| m.id > seen));
            }
            state.last_seen.insert(chat_id, newest.max(seen));
        }
        self.state.lock().await.primed = true;

        batch.messages.sort_by_key(|m| m.id);
        Ok(batch)
    }

    async fn get_chats(&self) -> Result<Vec<ChatPreview>, MarketError> {
        let html = self.get_page("/chat/").await?;
        Ok(parse_chat_previews(&html))
    }

    async fn get_chat_history(&self, chat_id: i64) -> Result<Vec<ChatMessageIn>, MarketError> {
        let html = self.get_page(&format!("/chat/?node={}", chat_id)).await?;
        let own_id = self.state.lock().await.user_id;
        Ok(parse_chat_messages(&html, chat_id, own_id))
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<SentMessage, MarketError> {
        let csrf = self.csrf_token().await?;
        let request = serde_json::json!({
            "action": "chat_message",
            "data": {"node": chat_id, "content": text},
        });
        let body = self
            .post_form(
                "/runner/",
                &[
                    ("objects", "[]".to_string()),
                    ("request", request.to_string()),
                    ("csrf_token", csrf),
                ],
            )
            .await?;

        if let Some(error) = body["response"]["error"].as_str() {
            if !error.is_empty() {
                return Err(MarketError::Transient(format!("send refused: {}", error)));
            }
        }
        let message_id = body["response"]["data"]["message"]["id"].as_i64().unwrap_or(0);
        Ok(SentMessage { id: message_id })
    }

    async fn chat_id_for(&self, username: &str) -> Result<Option<i64>, MarketError> {
        let needle = username.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }
        let chats = self.get_chats().await?;
        Ok(chats
            .into_iter()
            .find(|c| {
                c.name
                    .as_deref()
                    .map(|n| n.trim().to_lowercase() == needle)
                    .unwrap_or(false)
            })
            .map(|c| c.id))
    }

    async fn get_order(&self, order_id: &str) -> Result<Order, MarketError> {
        let html = self.get_page(&format!("/orders/{}/", order_id)).await?;
        parse_order(&html, order_id)
    }

    async fn confirm_order(&self, order_id: &str) -> Result<(), MarketError> {
        let csrf = self.csrf_token().await?;
        self.post_form(
            "/orders/confirm",
            &[
                ("orderId", order_id.to_string()),
                ("csrf_token", csrf),
            ],
        )
        .await?;
        Ok(())
    }

    async fn raise_lots(&self, category_id: i64) -> Result<(), MarketError> {
        let csrf = self.csrf_token().await?;
        let body = self
            .post_form(
                "/lots/raise",
                &[
                    ("game_id", category_id.to_string()),
                    ("csrf_token", csrf),
                ],
            )
            .await?;
        let message = body["msg"].as_str().unwrap_or("");
        if body["error"].as_bool().unwrap_or(false) || body["error"].as_i64().unwrap_or(0) != 0 {
            if let Some(wait) = parse_wait_seconds(message) {
                return Err(MarketError::RateLimited { wait_secs: wait });
            }
            return Err(MarketError::Transient(format!("raise refused: {}", message)));
        }
        Ok(())
    }

    async fn get_sorted_categories(&self) -> Result<Vec<Category>, MarketError> {
        let user_id = self.state.lock().await.user_id;
        let html = self.get_page(&format!("/users/{}/", user_id)).await?;
        Ok(parse_profile_categories(&html))
    }

    async fn submit_support_ticket(
        &self,
        ticket: &SupportTicket<'_>,
    ) -> Result<(), MarketError> {
        let form_html = self.get_page("/support/tickets/new").await?;
        let form_token = parse_hidden_input(&form_html, "csrf_token")
            .ok_or_else(|| MarketError::Parse("support form has no csrf field".into()))?;

        let response = self
            .http
            .post(format!("{}/support/tickets", BASE_URL))
            .header(reqwest::header::COOKIE, self.cookie_header().await)
            .timeout(std::time::Duration::from_secs(20))
            .form(&[
                ("csrf_token", form_token.as_str()),
                ("topic", ticket.topic),
                ("role", ticket.role),
                ("order", ticket.order_id),
                ("message", ticket.body),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MarketError::Transient(format!(
                "ticket submit -> {}",
                response.status()
            )));
        }
        Ok(())
    }
}

// ── HTML parsing (sync, string in / data out) ──────────────────────

struct AppData {
    user_id: i64,
    username: String,
    csrf_token: String,
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// The page `<body>` carries a `data-app-data` JSON attribute with the
/// session identity and csrf token.
fn parse_app_data(html: &str) -> Result<AppData, MarketError> {
    let document = Html::parse_document(html);
    let body = document
        .select(&selector("body[data-app-data]"))
        .next()
        .ok_or_else(|| MarketError::Parse("no app data on page".into()))?;
    let raw = body
        .value()
        .attr("data-app-data")
        .ok_or_else(|| MarketError::Parse("empty app data".into()))?;
    let data: Value = serde_json::from_str(raw)
        .map_err(|e| MarketError::Parse(format!("app data is not JSON: {}", e)))?;

    let user_id = data["userId"].as_i64().unwrap_or(0);
    let csrf_token = data["csrf-token"].as_str().unwrap_or("").to_string();
    let username = document
        .select(&selector("div.user-link-name"))
        .next()
        .map(|n| n.text().collect::<String>().trim().to_string())
        .unwrap_or_default();
    Ok(AppData {
        user_id,
        username,
        csrf_token,
    })
}

/// Chat previews from the chat list (or a runner `chat_bookmarks` fragment).
fn parse_chat_previews(html: &str) -> Vec<ChatPreview> {
    let document = Html::parse_document(html);
    let item_sel = selector("a.contact-item");
    let name_sel = selector("div.media-user-name");
    let preview_sel = selector("div.contact-item-message");

    let mut previews = Vec::new();
    for item in document.select(&item_sel) {
        let Some(id) = item
            .value()
            .attr("data-id")
            .and_then(|v| v.parse::<i64>().ok())
        else {
            continue;
        };
        let name = item
            .select(&name_sel)
            .next()
            .map(|n| n.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty());
        let last_message_text = item
            .select(&preview_sel)
            .next()
            .map(|n| n.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty());
        let unread = item
            .value()
            .attr("class")
            .map(|c| c.contains("unread"))
            .unwrap_or(false);
        previews.push(ChatPreview {
            id,
            name,
            last_message_text,
            unread,
            last_message_time: None,
        });
    }
    previews
}

/// Messages from a chat page. `own_id` marks our outgoing messages.
fn parse_chat_messages(html: &str, chat_id: i64, own_id: i64) -> Vec<ChatMessageIn> {
    let document = Html::parse_document(html);
    let item_sel = selector("div.chat-msg-item");
    let author_sel = selector("a.chat-msg-author-link");
    let text_sel = selector("div.chat-msg-text");
    let date_sel = selector("div.chat-msg-date");

    let mut messages = Vec::new();
    let mut current_author: Option<(String, i64)> = None;
    for item in document.select(&item_sel) {
        let Some(id) = item
            .value()
            .attr("id")
            .and_then(|v| v.strip_prefix("message-"))
            .and_then(|v| v.parse::<i64>().ok())
        else {
            continue;
        };
        // Consecutive messages of one author omit the header; carry it over.
        if let Some(author_node) = item.select(&author_sel).next() {
            let name = author_node.text().collect::<String>().trim().to_string();
            let author_id = author_node
                .value()
                .attr("href")
                .and_then(|href| {
                    href.trim_end_matches('/')
                        .rsplit('/')
                        .next()
                        .and_then(|v| v.parse::<i64>().ok())
                })
                .unwrap_or(0);
            current_author = Some((name, author_id));
        }
        let text = item
            .select(&text_sel)
            .next()
            .map(|n| n.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        let sent_time = item
            .select(&date_sel)
            .next()
            .and_then(|n| n.value().attr("title"))
            .and_then(parse_message_datetime);
        let (author, author_id) = current_author
            .clone()
            .unwrap_or((String::new(), 0));
        messages.push(ChatMessageIn {
            id,
            chat_id,
            author: (!author.is_empty()).then_some(author),
            author_id,
            text,
            sent_time,
            by_bot: author_id != 0 && author_id == own_id,
        });
    }
    messages.sort_by_key(|m| m.id);
    messages
}

/// Timestamps on messages look like "12.05.2024 21:40:05".
fn parse_message_datetime(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), "%d.%m.%Y %H:%M:%S").ok()
}

fn parse_order(html: &str, order_id: &str) -> Result<Order, MarketError> {
    let document = Html::parse_document(html);

    let buyer = document
        .select(&selector("div.chat-header a.user-link-name, a.user-link-name"))
        .next()
        .map(|n| n.text().collect::<String>().trim().to_string())
        .unwrap_or_default();
    if buyer.is_empty() {
        return Err(MarketError::Parse("order page has no buyer".into()));
    }

    let status_text = document
        .select(&selector("span.order-status, h1.page-header span"))
        .next()
        .map(|n| n.text().collect::<String>().to_lowercase())
        .unwrap_or_default();
    let status = if status_text.contains("возврат") {
        OrderStatus::Refunded
    } else if status_text.contains("закрыт") {
        OrderStatus::Closed
    } else {
        OrderStatus::Paid
    };

    let description = document
        .select(&selector("div.order-desc, div.param-item div"))
        .next()
        .map(|n| n.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let mut amount = 1i64;
    let mut price = None;
    let param_sel = selector("div.param-item");
    for param in document.select(&param_sel) {
        let text = param.text().collect::<String>();
        let lowered = text.to_lowercase();
        if lowered.contains("количество") {
            if let Some(n) = first_int(&text) {
                amount = n.max(1);
            }
        } else if lowered.contains("сумма") || lowered.contains("цена") {
            price = first_float(&text);
        }
    }

    let chat_id = document
        .select(&selector("div.chat[data-id]"))
        .next()
        .and_then(|n| n.value().attr("data-id"))
        .and_then(|v| v.parse::<i64>().ok());

    Ok(Order {
        id: order_id.to_string(),
        buyer_username: buyer,
        chat_id,
        amount,
        price,
        description,
        status,
    })
}

fn parse_profile_categories(html: &str) -> Vec<Category> {
    let document = Html::parse_document(html);
    let block_sel = selector("div.offer-list-title a");

    let mut seen = Vec::new();
    let mut categories = Vec::new();
    for link in document.select(&block_sel) {
        let Some(id) = link.value().attr("href").and_then(category_id_from_href) else {
            continue;
        };
        if seen.contains(&id) {
            continue;
        }
        let name = link.text().collect::<String>().trim().to_string();
        if name.is_empty() {
            continue;
        }
        seen.push(id);
        categories.push(Category { id, name });
    }
    categories.sort_by_key(|c| c.id);
    categories
}

fn category_id_from_href(href: &str) -> Option<i64> {
    // Hrefs look like "/lots/123/" or "https://funpay.com/lots/123/trade".
    let mut parts = href.trim_end_matches('/').rsplit('/');
    let mut candidate = parts.next()?;
    if candidate.parse::<i64>().is_err() {
        candidate = parts.next()?;
    }
    candidate.parse().ok()
}

fn parse_hidden_input(html: &str, name: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let sel = Selector::parse(&format!("input[name=\"{}\"]", name)).ok()?;
    document
        .select(&sel)
        .next()
        .and_then(|n| n.value().attr("value"))
        .map(|v| v.to_string())
}

/// Server wait hints: "Подождите 2 часа", "Подождите 10 минут", …
fn parse_wait_seconds(message: &str) -> Option<u64> {
    let lowered = message.to_lowercase();
    let number = first_int(&lowered)? as u64;
    if lowered.contains("час") {
        Some(number * 3600)
    } else if lowered.contains("минут") {
        Some(number * 60)
    } else if lowered.contains("секунд") {
        Some(number)
    } else {
        None
    }
}

fn first_int(text: &str) -> Option<i64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn first_float(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    cleaned.replace(',', ".").parse().ok()
}

fn random_tag() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_parsing() {
        let html = r#"<html><body data-app-data='{"userId": 4321, "csrf-token": "tok123"}'>
            <div class="user-link-name">seller</div></body></html>"#;
        let app = parse_app_data(html).unwrap();
        assert_eq!(app.user_id, 4321);
        assert_eq!(app.csrf_token, "tok123");
        assert_eq!(app.username, "seller");
    }

    #[test]
    fn app_data_missing_is_parse_error() {
        assert!(matches!(
            parse_app_data("<html><body></body></html>"),
            Err(MarketError::Parse(_))
        ));
    }

    #[test]
    fn chat_preview_parsing() {
        let html = r#"
            <a class="contact-item unread" data-id="515">
                <div class="media-user-name">alice</div>
                <div class="contact-item-message">!код</div>
            </a>
            <a class="contact-item" data-id="516">
                <div class="media-user-name">bob</div>
                <div class="contact-item-message">спасибо</div>
            </a>"#;
        let previews = parse_chat_previews(html);
        assert_eq!(previews.len(), 2);
        assert_eq!(previews[0].id, 515);
        assert!(previews[0].unread);
        assert_eq!(previews[0].name.as_deref(), Some("alice"));
        assert_eq!(previews[0].last_message_text.as_deref(), Some("!код"));
        assert!(!previews[1].unread);
    }

    #[test]
    fn chat_message_parsing_carries_author_forward() {
        let html = r#"
            <div class="chat-msg-item" id="message-100">
                <a class="chat-msg-author-link" href="/users/77/">alice</a>
                <div class="chat-msg-date" title="12.05.2024 21:40:05"></div>
                <div class="chat-msg-text">привет</div>
            </div>
            <div class="chat-msg-item" id="message-101">
                <div class="chat-msg-text">!код</div>
            </div>
            <div class="chat-msg-item" id="message-102">
                <a class="chat-msg-author-link" href="/users/4321/">seller</a>
                <div class="chat-msg-text">Ваш код: ABC</div>
            </div>"#;
        let messages = parse_chat_messages(html, 515, 4321);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].author.as_deref(), Some("alice"));
        assert_eq!(messages[0].author_id, 77);
        assert!(messages[0].sent_time.is_some());
        // Header omitted → author carried from the previous message.
        assert_eq!(messages[1].author.as_deref(), Some("alice"));
        assert_eq!(messages[1].text, "!код");
        assert!(!messages[1].by_bot);
        assert!(messages[2].by_bot);
    }

    #[test]
    fn order_parsing() {
        let html = r#"
            <h1 class="page-header">Заказ #A1B2C3D4 <span>Оплачен</span></h1>
            <a class="user-link-name" href="/users/77/">alice</a>
            <div class="order-desc">Аренда Dota 2, лот №77, 1 час</div>
            <div class="param-item">Количество<div>2 шт.</div></div>
            <div class="param-item">Сумма<div>198 ₽</div></div>
            <div class="chat" data-id="515"></div>"#;
        let order = parse_order(html, "A1B2C3D4").unwrap();
        assert_eq!(order.buyer_username, "alice");
        assert_eq!(order.amount, 2);
        assert_eq!(order.price, Some(198.0));
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.chat_id, Some(515));
        assert!(order.description.contains("№77"));
    }

    #[test]
    fn order_status_variants() {
        let closed = r#"<h1 class="page-header">Заказ <span>Закрыт</span></h1>
            <a class="user-link-name">bob</a>"#;
        assert_eq!(parse_order(closed, "X").unwrap().status, OrderStatus::Closed);
        let refunded = r#"<h1 class="page-header">Заказ <span>Возврат</span></h1>
            <a class="user-link-name">bob</a>"#;
        assert_eq!(
            parse_order(refunded, "X").unwrap().status,
            OrderStatus::Refunded
        );
    }

    #[test]
    fn profile_categories() {
        let html = r#"
            <div class="offer-list-title"><a href="/lots/41/">Dota 2</a></div>
            <div class="offer-list-title"><a href="/lots/9/">CS2</a></div>
            <div class="offer-list-title"><a href="/lots/41/">Dota 2 dup</a></div>"#;
        let categories = parse_profile_categories(html);
        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].id, 9);
        assert_eq!(categories[1].id, 41);
        assert_eq!(categories[1].name, "Dota 2");
    }

    #[test]
    fn wait_hint_parsing() {
        assert_eq!(parse_wait_seconds("Подождите 2 часа."), Some(7200));
        assert_eq!(parse_wait_seconds("Подождите 10 минут."), Some(600));
        assert_eq!(parse_wait_seconds("Подождите 30 секунд."), Some(30));
        assert_eq!(parse_wait_seconds("Лоты подняты."), None);
    }

    #[test]
    fn hidden_input_extraction() {
        let html = r#"<form><input type="hidden" name="csrf_token" value="f0rm"></form>"#;
        assert_eq!(parse_hidden_input(html, "csrf_token").as_deref(), Some("f0rm"));
        assert_eq!(parse_hidden_input(html, "missing"), None);
    }

    #[test]
    fn message_datetime_format() {
        let parsed = parse_message_datetime("12.05.2024 21:40:05").unwrap();
        assert_eq!(parsed.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-05-12 21:40:05");
        assert!(parse_message_datetime("yesterday").is_none());
    }
}
