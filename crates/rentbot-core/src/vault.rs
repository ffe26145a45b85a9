//! Vault — AES-256-GCM encryption at rest for credential columns.
//!
//! Account passwords and authenticator payloads are sealed before they hit
//! MySQL. Encrypted values are prefixed with `enc:` followed by the
//! base64-encoded nonce + ciphertext. Plain values (without the prefix) are
//! returned as-is, allowing graceful migration of rows written before the
//! key was configured.
//!
//! The key comes from `DATA_ENCRYPTION_KEY` (base64 or hex, 32 bytes). When
//! the variable is unset the vault degrades to identity: values are stored
//! and read as plaintext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use rand::RngCore;

/// Prefix for encrypted values stored in credential columns.
const ENC_PREFIX: &str = "enc:";

/// Length of AES-256-GCM nonce (96 bits).
const NONCE_LEN: usize = 12;

/// Length of AES-256 key (256 bits).
const KEY_LEN: usize = 32;

/// Column-encryption handle. Cheap to clone and share per bot.
#[derive(Clone, Default)]
pub struct Vault {
    key: Option<[u8; KEY_LEN]>,
}

impl Vault {
    /// Build a vault from a raw key string (base64 or hex encoded 32 bytes).
    /// `None` produces a passthrough vault.
    pub fn new(raw_key: Option<&str>) -> anyhow::Result<Self> {
        let Some(raw) = raw_key.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Self { key: None });
        };

        let bytes = decode_key(raw)?;
        if bytes.len() != KEY_LEN {
            anyhow::bail!(
                "DATA_ENCRYPTION_KEY decodes to {} bytes (expected {})",
                bytes.len(),
                KEY_LEN
            );
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(Self { key: Some(key) })
    }

    /// Read the key from `DATA_ENCRYPTION_KEY`.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(std::env::var("DATA_ENCRYPTION_KEY").ok().as_deref())
    }

    /// Whether a key is configured (values will actually be sealed).
    pub fn is_active(&self) -> bool {
        self.key.is_some()
    }

    /// Encrypt a plaintext secret into an `enc:...` storage string.
    /// Without a key the plaintext is returned unchanged.
    pub fn encrypt(&self, plaintext: &str) -> anyhow::Result<String> {
        let Some(key) = &self.key else {
            return Ok(plaintext.to_string());
        };
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| anyhow::anyhow!("cipher init: {}", e))?;

        // Random 96-bit nonce per value
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        #[allow(deprecated)]
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("encrypt: {}", e))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", ENC_PREFIX, B64.encode(&combined)))
    }

    /// Decrypt an `enc:...` string. Values without the prefix pass through
    /// unchanged — this is the plaintext migration path.
    pub fn decrypt(&self, value: &str) -> anyhow::Result<String> {
        if !value.starts_with(ENC_PREFIX) {
            return Ok(value.to_string());
        }
        let Some(key) = &self.key else {
            anyhow::bail!("value is encrypted but DATA_ENCRYPTION_KEY is not set");
        };

        let combined = B64
            .decode(&value[ENC_PREFIX.len()..])
            .map_err(|e| anyhow::anyhow!("base64 decode: {}", e))?;
        if combined.len() < NONCE_LEN {
            anyhow::bail!("encrypted value too short");
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| anyhow::anyhow!("cipher init: {}", e))?;
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        #[allow(deprecated)]
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("decrypt: {} (wrong key?)", e))?;
        String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("utf8 decode: {}", e))
    }

    /// Returns `true` if the value carries the encrypted prefix.
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENC_PREFIX)
    }
}

fn decode_key(raw: &str) -> anyhow::Result<Vec<u8>> {
    if raw.len() == KEY_LEN * 2 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
        let mut out = Vec::with_capacity(KEY_LEN);
        for i in (0..raw.len()).step_by(2) {
            out.push(u8::from_str_radix(&raw[i..i + 2], 16)?);
        }
        return Ok(out);
    }
    B64.decode(raw)
        .map_err(|e| anyhow::anyhow!("DATA_ENCRYPTION_KEY is neither hex nor base64: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> Vault {
        Vault::new(Some(&B64.encode([7u8; 32]))).unwrap()
    }

    #[test]
    fn roundtrip() {
        let vault = test_vault();
        let secret = "hunter2-steam-password";
        let sealed = vault.encrypt(secret).unwrap();
        assert!(sealed.starts_with(ENC_PREFIX));
        assert_ne!(sealed, secret);
        assert_eq!(vault.decrypt(&sealed).unwrap(), secret);
    }

    #[test]
    fn plaintext_passthrough() {
        let vault = test_vault();
        assert_eq!(vault.decrypt("legacy-plain").unwrap(), "legacy-plain");
    }

    #[test]
    fn different_nonces_per_value() {
        let vault = test_vault();
        let a = vault.encrypt("same").unwrap();
        let b = vault.encrypt("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(vault.decrypt(&a).unwrap(), "same");
        assert_eq!(vault.decrypt(&b).unwrap(), "same");
    }

    #[test]
    fn keyless_vault_is_identity() {
        let vault = Vault::new(None).unwrap();
        assert!(!vault.is_active());
        assert_eq!(vault.encrypt("open").unwrap(), "open");
        assert_eq!(vault.decrypt("open").unwrap(), "open");
    }

    #[test]
    fn hex_key_accepted() {
        let hex: String = (0..32).map(|_| "ab").collect();
        let vault = Vault::new(Some(&hex)).unwrap();
        assert!(vault.is_active());
    }

    #[test]
    fn rejects_wrong_key_length() {
        assert!(Vault::new(Some(&B64.encode([1u8; 16]))).is_err());
    }
}
