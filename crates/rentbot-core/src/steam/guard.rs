//! Steam Guard code generation from a mobile-authenticator payload.
//!
//! The authenticator ("maFile") is a JSON blob containing `shared_secret`
//! (base64) and the session's SteamID64. Codes are a 5-character TOTP over a
//! 30-second window with Steam's reduced alphabet. Steam rejects codes that
//! drift from *its* clock, so the generator corrects local time with an
//! offset queried once from the vendor time endpoint.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use thiserror::Error;
use tokio::sync::OnceCell;

use base64::{engine::general_purpose::STANDARD as B64, Engine};

/// Steam's guard-code alphabet.
const CODE_CHARS: &[u8] = b"23456789BCDFGHJKMNPQRTVWXY";

/// Code length.
const CODE_LEN: usize = 5;

/// TOTP window in seconds.
const WINDOW_SECS: i64 = 30;

/// Minimum valid SteamID64. Anything below this is a parse artifact, not an
/// account id.
const MIN_STEAM_ID: u64 = 70_000_000_000_000_000;

const QUERY_TIME_URL: &str = "https://api.steampowered.com/ITwoFactorService/QueryTime/v0001";

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("maFile is empty")]
    EmptyMafile,
    #[error("maFile has no shared_secret")]
    MissingSharedSecret,
    #[error("maFile is not valid JSON: {0}")]
    BadMafile(#[from] serde_json::Error),
    #[error("shared_secret is not valid base64: {0}")]
    BadSecret(#[from] base64::DecodeError),
}

#[derive(Debug, Deserialize)]
struct Mafile {
    #[serde(default)]
    shared_secret: Option<String>,
    #[serde(rename = "Session", default)]
    session: Option<MafileSession>,
    #[serde(default, alias = "SteamID")]
    steamid: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MafileSession {
    #[serde(rename = "SteamID", default)]
    steam_id: Option<serde_json::Value>,
}

/// Generates guard codes with a cached server-time correction.
pub struct GuardCodes {
    client: reqwest::Client,
    offset: OnceCell<i64>,
}

impl GuardCodes {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            offset: OnceCell::new(),
        }
    }

    /// Current guard code for the given maFile JSON.
    pub async fn code_for(&self, mafile_json: &str) -> Result<String, GuardError> {
        let secret = shared_secret(mafile_json)?;
        let offset = *self.offset.get_or_init(|| self.query_offset()).await;
        let timestamp = chrono::Utc::now().timestamp() + offset;
        code_at(&secret, timestamp)
    }

    /// Seconds the Steam clock is ahead of ours. Failures clamp to 0 so a
    /// flaky endpoint never blocks code issuance.
    async fn query_offset(&self) -> i64 {
        let response = self
            .client
            .post(QUERY_TIME_URL)
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await;
        let Ok(resp) = response else {
            tracing::warn!("Steam time query failed, assuming zero offset");
            return 0;
        };
        let Ok(body) = resp.json::<serde_json::Value>().await else {
            return 0;
        };
        let server_time = body
            .get("response")
            .and_then(|r| r.get("server_time"))
            .and_then(|t| t.as_str().and_then(|s| s.parse::<i64>().ok()).or(t.as_i64()));
        match server_time {
            Some(t) => t - chrono::Utc::now().timestamp(),
            None => 0,
        }
    }
}

fn shared_secret(mafile_json: &str) -> Result<String, GuardError> {
    if mafile_json.trim().is_empty() {
        return Err(GuardError::EmptyMafile);
    }
    let mafile: Mafile = serde_json::from_str(mafile_json)?;
    mafile.shared_secret.filter(|s| !s.is_empty()).ok_or(GuardError::MissingSharedSecret)
}

/// Guard code for an explicit timestamp. Pure; the async wrapper above adds
/// the server-time correction.
pub fn code_at(shared_secret_b64: &str, timestamp: i64) -> Result<String, GuardError> {
    let key = B64.decode(shared_secret_b64.trim())?;
    let counter = (timestamp / WINDOW_SECS) as u64;

    let mut mac =
        Hmac::<Sha1>::new_from_slice(&key).expect("hmac accepts any key length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let start = (digest[19] & 0x0f) as usize;
    let mut value = u32::from_be_bytes([
        digest[start],
        digest[start + 1],
        digest[start + 2],
        digest[start + 3],
    ]) & 0x7fff_ffff;

    let mut code = String::with_capacity(CODE_LEN);
    for _ in 0..CODE_LEN {
        code.push(CODE_CHARS[value as usize % CODE_CHARS.len()] as char);
        value /= CODE_CHARS.len() as u32;
    }
    Ok(code)
}

/// Extract the SteamID64 from a maFile: `Session.SteamID` preferred, with
/// the legacy top-level `steamid`/`SteamID` fallbacks.
pub fn steam_id_from_mafile(mafile_json: &str) -> Option<u64> {
    let mafile: Mafile = serde_json::from_str(mafile_json).ok()?;
    let raw = mafile
        .session
        .and_then(|s| s.steam_id)
        .or(mafile.steamid)?;
    let id = match raw {
        serde_json::Value::Number(n) => n.as_u64()?,
        serde_json::Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (id >= MIN_STEAM_ID).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "zvIBYD5dyqRkv2nmsBp3SaeBU8c="; // 20 random bytes, b64

    #[test]
    fn code_shape_and_determinism() {
        let code = code_at(SECRET, 1_700_000_000).unwrap();
        assert_eq!(code.len(), CODE_LEN);
        assert!(code.bytes().all(|b| CODE_CHARS.contains(&b)));
        // Same window → same code; next window → (almost surely) different.
        assert_eq!(code, code_at(SECRET, 1_700_000_000 + 29).unwrap());
        assert_ne!(code, code_at(SECRET, 1_700_000_000 + 60).unwrap());
    }

    #[test]
    fn bad_secret_is_an_error() {
        assert!(code_at("not base64 at all!!!", 0).is_err());
    }

    #[test]
    fn shared_secret_extraction() {
        let mafile = format!(r#"{{"shared_secret":"{SECRET}","account_name":"x"}}"#);
        assert_eq!(shared_secret(&mafile).unwrap(), SECRET);
        assert!(matches!(
            shared_secret(r#"{"account_name":"x"}"#),
            Err(GuardError::MissingSharedSecret)
        ));
        assert!(matches!(shared_secret(""), Err(GuardError::EmptyMafile)));
    }

    #[test]
    fn steam_id_prefers_session_and_rejects_low_values() {
        let mafile = r#"{"Session":{"SteamID":76561198000000001},"steamid":1}"#;
        assert_eq!(steam_id_from_mafile(mafile), Some(76_561_198_000_000_001));

        let string_form = r#"{"Session":{"SteamID":"76561198000000002"}}"#;
        assert_eq!(steam_id_from_mafile(string_form), Some(76_561_198_000_000_002));

        let legacy = r#"{"steamid":76561198000000003}"#;
        assert_eq!(steam_id_from_mafile(legacy), Some(76_561_198_000_000_003));

        // Below the SteamID64 floor.
        assert_eq!(steam_id_from_mafile(r#"{"steamid":12345}"#), None);
        assert_eq!(steam_id_from_mafile("{}"), None);
    }
}
