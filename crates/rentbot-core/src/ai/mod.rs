//! Optional AI helper over Groq's OpenAI-compatible chat endpoint.
//!
//! Used for drafting support-ticket bodies and for yes/no classification of
//! chat transcripts. Every caller has a static fallback, so this adapter is
//! strictly best-effort: failures return `None` and the caller degrades.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GroqConfig;

const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Maximum number of retry attempts for transient errors.
const MAX_RETRIES: u32 = 2;

/// Base delay for exponential backoff (milliseconds).
const BASE_DELAY_MS: u64 = 500;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Clone)]
pub struct AiClient {
    client: reqwest::Client,
    config: Option<GroqConfig>,
}

impl AiClient {
    pub fn new(client: reqwest::Client, config: Option<GroqConfig>) -> Self {
        Self { client, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    /// Generate free text for a prompt. `None` when unconfigured or failed.
    pub async fn generate(&self, system: &str, prompt: &str) -> Option<String> {
        let config = self.config.as_ref()?;
        let request = ChatRequest {
            model: &config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: 512,
            temperature: 0.4,
        };

        for attempt in 0..=MAX_RETRIES {
            let response = self
                .client
                .post(format!("{}/chat/completions", GROQ_BASE_URL))
                .timeout(Duration::from_secs(20))
                .bearer_auth(&config.api_key)
                .json(&request)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: ChatResponse = resp.json().await.ok()?;
                    return parsed
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.message.content)
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty());
                }
                Ok(resp) if is_retryable(resp.status().as_u16()) && attempt < MAX_RETRIES => {
                    let delay = BASE_DELAY_MS * 2u64.pow(attempt);
                    debug!(status = %resp.status(), delay_ms = delay, "Groq transient error, retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Ok(resp) => {
                    warn!(status = %resp.status(), "Groq request failed");
                    return None;
                }
                Err(e) if attempt < MAX_RETRIES => {
                    let delay = BASE_DELAY_MS * 2u64.pow(attempt);
                    debug!(delay_ms = delay, "Groq network error, retrying: {}", e);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => {
                    warn!("Groq request failed: {}", e);
                    return None;
                }
            }
        }
        None
    }

    /// Binary classification over a transcript. The model is asked to answer
    /// strictly yes/no; anything unparseable returns `None`.
    pub async fn classify(&self, transcript: &str, question: &str) -> Option<bool> {
        let prompt = format!(
            "{}\n\nПереписка:\n{}\n\nОтветь строго одним словом: да или нет.",
            question, transcript
        );
        let answer = self
            .generate("Ты классификатор. Отвечай одним словом.", &prompt)
            .await?;
        parse_yes_no(&answer)
    }
}

fn is_retryable(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn parse_yes_no(answer: &str) -> Option<bool> {
    let normalized = answer
        .trim()
        .trim_matches(|c: char| !c.is_alphabetic())
        .to_lowercase();
    match normalized.as_str() {
        "да" | "yes" => Some(true),
        "нет" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_no_parsing() {
        assert_eq!(parse_yes_no("Да"), Some(true));
        assert_eq!(parse_yes_no(" нет. "), Some(false));
        assert_eq!(parse_yes_no("yes"), Some(true));
        assert_eq!(parse_yes_no("возможно"), None);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(429));
        assert!(is_retryable(503));
        assert!(!is_retryable(400));
        assert!(!is_retryable(401));
    }

    #[tokio::test]
    async fn disabled_client_generates_nothing() {
        let ai = AiClient::new(reqwest::Client::new(), None);
        assert!(!ai.is_enabled());
        assert_eq!(ai.generate("s", "p").await, None);
    }
}
