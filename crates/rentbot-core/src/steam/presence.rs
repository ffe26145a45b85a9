//! Presence lookups through the Steam bridge service.
//!
//! The bridge answers `GET /presence/{steam_id}` with a small snapshot used
//! by the reaper's match-grace logic. Snapshots are cached with a short TTL
//! so a tick over many rentals does not hammer the bridge.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::cache::{presence_key, Cache};

/// What the bridge knows about an account right now.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    #[serde(default)]
    pub in_match: bool,
    #[serde(default)]
    pub presence_state: Option<String>,
    #[serde(default)]
    pub presence_display: Option<String>,
    #[serde(default)]
    pub match_seconds: Option<i64>,
}

pub struct PresenceBridge {
    client: reqwest::Client,
    base_url: Option<String>,
    bearer_token: Option<String>,
    cache: Cache,
    cache_ttl: u64,
    cache_empty_ttl: u64,
}

impl PresenceBridge {
    pub fn new(
        client: reqwest::Client,
        base_url: Option<String>,
        bearer_token: Option<String>,
        cache: Cache,
        cache_ttl: u64,
        cache_empty_ttl: u64,
    ) -> Self {
        Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            bearer_token,
            cache,
            cache_ttl,
            cache_empty_ttl,
        }
    }

    /// Fetch a presence snapshot, consulting the cache first. Without a
    /// configured bridge this always returns the default (not in match) so
    /// expiry proceeds normally.
    pub async fn fetch(&self, steam_id: u64, user_id: Option<i64>) -> PresenceSnapshot {
        let key = presence_key(steam_id, user_id);
        if let Some(cached) = self.cache.get_json::<PresenceSnapshot>(&key).await {
            return cached;
        }

        let Some(base) = &self.base_url else {
            return PresenceSnapshot::default();
        };

        let mut request = self
            .client
            .get(format!("{}/presence/{}", base, steam_id))
            .timeout(Duration::from_secs(10));
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let snapshot = match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                resp.json::<PresenceSnapshot>().await.unwrap_or_default()
            }
            Ok(resp) => {
                debug!(status = %resp.status(), steam_id, "Presence bridge error");
                PresenceSnapshot::default()
            }
            Err(e) => {
                debug!(steam_id, "Presence bridge unreachable: {}", e);
                PresenceSnapshot::default()
            }
        };

        let ttl = if snapshot.in_match || snapshot.presence_state.is_some() {
            self.cache_ttl
        } else {
            self.cache_empty_ttl
        };
        self.cache.set_json(&key, &snapshot, ttl).await;
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_deserializes_with_defaults() {
        let snap: PresenceSnapshot =
            serde_json::from_str(r#"{"in_match":true,"presence_display":"Dota 2 — 21:40"}"#)
                .unwrap();
        assert!(snap.in_match);
        assert_eq!(snap.presence_display.as_deref(), Some("Dota 2 — 21:40"));
        assert_eq!(snap.match_seconds, None);

        let empty: PresenceSnapshot = serde_json::from_str("{}").unwrap();
        assert!(!empty.in_match);
    }

    #[tokio::test]
    async fn no_bridge_means_not_in_match() {
        let bridge = PresenceBridge::new(
            reqwest::Client::new(),
            None,
            None,
            Cache::default(),
            15,
            5,
        );
        let snap = bridge.fetch(76_561_198_000_000_001, Some(1)).await;
        assert!(!snap.in_match);
    }
}
