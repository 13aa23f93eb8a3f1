use std::{
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

/// Symmetric key used by the AES-GCM ring.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Identifier for logging/rotation (never log key bytes).
    pub id: String,
    /// 256-bit symmetric key.
    pub bytes: Zeroizing<[u8; 32]>,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("no key material stored")]
    Missing,
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
}

/// Source of the vault key (OS keychain in production; memory in tests).
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Existing key material, `KeyError::Missing` if none was ever created.
    async fn load(&self) -> Result<KeyMaterial, KeyError>;

    /// Existing key material, or a freshly generated and stored key.
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError>;
}

/// OS keyring-backed provider. The key is stored base64-encoded under
/// `service`/`account`.
pub struct KeyringProvider {
    service: String,
    account: String,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, KeyError> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| KeyError::Keyring(e.to_string()))
    }
}

#[async_trait]
impl KeyProvider for KeyringProvider {
    async fn load(&self) -> Result<KeyMaterial, KeyError> {
        match self.entry()?.get_password() {
            Ok(secret) => decode_key(&self.account, &secret),
            Err(keyring::Error::NoEntry) => Err(KeyError::Missing),
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }

    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        match self.load().await {
            Err(KeyError::Missing) => {}
            other => return other,
        }

        debug!(service = %self.service, account = %self.account, "generating vault key");
        let material = generate_key(&self.account);
        self.entry()?
            .set_password(&encode_key(&material))
            .map_err(|e| KeyError::Keyring(e.to_string()))?;
        Ok(material)
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
}

impl InMemoryKeyProvider {
    /// Provider that already holds a key, as if it had been created earlier.
    pub fn with_key() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(generate_key("memory")))),
        }
    }
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    async fn load(&self) -> Result<KeyMaterial, KeyError> {
        let guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;
        guard.clone().ok_or(KeyError::Missing)
    }

    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        if let Some(existing) = guard.clone() {
            return Ok(existing);
        }

        let material = generate_key("memory");
        *guard = Some(material.clone());
        Ok(material)
    }
}

fn generate_key(id: &str) -> KeyMaterial {
    let mut bytes = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(&mut bytes[..]);
    KeyMaterial {
        id: id.to_string(),
        bytes,
    }
}

fn encode_key(material: &KeyMaterial) -> Zeroizing<String> {
    Zeroizing::new(general_purpose::STANDARD.encode(&material.bytes[..]))
}

fn decode_key(id: &str, secret: &str) -> Result<KeyMaterial, KeyError> {
    let bytes = Zeroizing::new(
        general_purpose::STANDARD
            .decode(secret)
            .map_err(|e| KeyError::Decode(e.to_string()))?,
    );

    if bytes.len() != 32 {
        return Err(KeyError::Decode(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }

    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(&bytes);
    Ok(KeyMaterial {
        id: id.to_string(),
        bytes: out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_provider_creates_once() {
        let provider = InMemoryKeyProvider::default();
        assert!(matches!(provider.load().await, Err(KeyError::Missing)));

        let first = provider.get_or_create().await.unwrap();
        let second = provider.get_or_create().await.unwrap();
        let loaded = provider.load().await.unwrap();

        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first.bytes, loaded.bytes);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = decode_key("test", "abcd").expect_err("should reject wrong length");
        assert!(matches!(err, KeyError::Decode(_)));
    }

    #[test]
    fn encoded_key_decodes_to_same_bytes() {
        let material = generate_key("test");
        let decoded = decode_key("test", &encode_key(&material)).expect("decode");
        assert_eq!(decoded, material);
    }

    #[test]
    fn debug_omits_key_bytes() {
        let material = generate_key("test");
        let rendered = format!("{material:?}");
        assert!(rendered.contains("test"));
        assert!(!rendered.contains("bytes"));
    }
}
