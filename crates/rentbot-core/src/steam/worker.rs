//! Remote-session deauthorization through the Steam worker service.
//!
//! The worker logs into the account with the authenticator payload and kills
//! every remote session. Best-effort: a failure is logged and the rental
//! release continues regardless.

use serde::Serialize;
use std::time::Duration;
use tracing::warn;

#[derive(Serialize)]
struct DeauthorizeRequest<'a> {
    steam_login: &'a str,
    steam_password: &'a str,
    mafile_json: &'a str,
}

pub struct SteamWorker {
    client: reqwest::Client,
    base_url: Option<String>,
    timeout: Duration,
}

impl SteamWorker {
    pub fn new(client: reqwest::Client, base_url: Option<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            timeout,
        }
    }

    /// Deauthorize all remote sessions. Returns whether the worker accepted
    /// the request; `false` covers both "not configured" and failures.
    pub async fn deauthorize_all(&self, login: &str, password: &str, mafile_json: &str) -> bool {
        let Some(base) = &self.base_url else {
            return false;
        };
        if login.is_empty() || password.is_empty() || mafile_json.is_empty() {
            return false;
        }

        let payload = DeauthorizeRequest {
            steam_login: login,
            steam_password: password,
            mafile_json,
        };
        let response = self
            .client
            .post(format!("{}/api/steam/deauthorize", base))
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(%status, "Steam worker refused deauthorize: {}", body);
                false
            }
            Err(e) => {
                warn!("Steam worker request failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_worker_declines() {
        let worker = SteamWorker::new(reqwest::Client::new(), None, Duration::from_secs(1));
        assert!(!worker.deauthorize_all("login", "pass", "{}").await);
    }

    #[tokio::test]
    async fn empty_credentials_decline_without_network() {
        let worker = SteamWorker::new(
            reqwest::Client::new(),
            Some("http://worker.invalid".into()),
            Duration::from_secs(1),
        );
        assert!(!worker.deauthorize_all("", "pass", "{}").await);
        assert!(!worker.deauthorize_all("login", "", "{}").await);
    }
}
