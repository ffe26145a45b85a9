//! Optional redis cache.
//!
//! Everything stored here is reconstructible from MySQL: presence snapshots,
//! chat list/history fan-out for the dashboard, lot stock. Without
//! `REDIS_URL` the handle degrades to a no-op and every method returns as if
//! the key were missing.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// Shared cache handle. Clone is cheap (the connection manager multiplexes).
#[derive(Clone, Default)]
pub struct Cache {
    conn: Option<ConnectionManager>,
}

impl Cache {
    /// Connect when a URL is configured. Connection failures degrade to the
    /// no-op cache with a warning — the store remains the source of truth.
    pub async fn connect(url: Option<&str>) -> Self {
        let Some(url) = url else {
            return Self { conn: None };
        };
        let client = match redis::Client::open(url) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid REDIS_URL, cache disabled: {}", e);
                return Self { conn: None };
            }
        };
        match ConnectionManager::new(client).await {
            Ok(conn) => Self { conn: Some(conn) },
            Err(e) => {
                warn!("Redis connection failed, cache disabled: {}", e);
                Self { conn: None }
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone()?;
        let raw: Option<String> = conn.get(key).await.ok()?;
        raw.and_then(|s| serde_json::from_str(&s).ok())
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let Ok(raw) = serde_json::to_string(value) else {
            return;
        };
        if let Err(e) = conn.set_ex::<_, _, ()>(key, raw, ttl_seconds).await {
            debug!("Cache write failed for {}: {}", key, e);
        }
    }

    /// Delete every key matching the pattern (SCAN + DEL in batches).
    pub async fn delete_pattern(&self, pattern: &str) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let mut cursor: u64 = 0;
        loop {
            let scanned: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await;
            let (next, keys) = match scanned {
                Ok(v) => v,
                Err(e) => {
                    debug!("Cache scan failed for {}: {}", pattern, e);
                    return;
                }
            };
            if !keys.is_empty() {
                if let Err(e) = conn.del::<_, ()>(keys).await {
                    debug!("Cache delete failed for {}: {}", pattern, e);
                }
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
    }

    /// Drop lot/stock keys on process start: lot mappings may have been
    /// edited while no bot was running.
    pub async fn clear_lot_cache(&self) {
        for pattern in ["lot:*", "lot_mapping:*", "lot:list:*", "lot:stock:*"] {
            self.delete_pattern(pattern).await;
        }
    }

    /// Invalidate dashboard chat reads after a chat write.
    pub async fn invalidate_chat(&self, user_id: i64, workspace_id: Option<i64>, chat_id: i64) {
        self.delete_pattern(&chat_list_pattern(user_id, workspace_id))
            .await;
        self.delete_pattern(&chat_history_pattern(user_id, workspace_id, chat_id))
            .await;
    }
}

fn workspace_key(workspace_id: Option<i64>) -> String {
    match workspace_id {
        Some(id) => id.to_string(),
        None => "none".into(),
    }
}

pub fn chat_list_pattern(user_id: i64, workspace_id: Option<i64>) -> String {
    format!("chat:list:{}:{}:*", user_id, workspace_key(workspace_id))
}

pub fn chat_history_pattern(user_id: i64, workspace_id: Option<i64>, chat_id: i64) -> String {
    format!(
        "chat:history:{}:{}:{}:*",
        user_id,
        workspace_key(workspace_id),
        chat_id
    )
}

pub fn presence_key(steam_id: u64, user_id: Option<i64>) -> String {
    let user_part = user_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "global".into());
    format!("presence:{}:{}", user_part, steam_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_builders() {
        assert_eq!(chat_list_pattern(3, Some(9)), "chat:list:3:9:*");
        assert_eq!(chat_list_pattern(3, None), "chat:list:3:none:*");
        assert_eq!(chat_history_pattern(3, Some(9), 51), "chat:history:3:9:51:*");
        assert_eq!(
            presence_key(76_561_198_000_000_001, Some(4)),
            "presence:4:76561198000000001"
        );
        assert_eq!(
            presence_key(76_561_198_000_000_001, None),
            "presence:global:76561198000000001"
        );
    }

    #[tokio::test]
    async fn disabled_cache_is_a_noop() {
        let cache = Cache::connect(None).await;
        assert!(!cache.is_enabled());
        cache.set_json("k", &42, 10).await;
        assert_eq!(cache.get_json::<i64>("k").await, None);
        cache.delete_pattern("k*").await;
    }
}
