use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use tracing::instrument;
use vaultenv_core::{Concealed, Encrypted, Ring, RingError};
use zeroize::Zeroizing;

use crate::key_provider::{KeyError, KeyMaterial, KeyProvider};

const NONCE_LEN: usize = 12;

/// AES-256-GCM ring. Ciphertext is laid out as `nonce || sealed`, with a
/// fresh random nonce per value.
pub struct AesGcmRing<P: KeyProvider> {
    key_provider: P,
}

impl<P: KeyProvider> AesGcmRing<P> {
    pub fn new(key_provider: P) -> Self {
        Self { key_provider }
    }
}

#[async_trait]
impl<P: KeyProvider> Ring for AesGcmRing<P> {
    #[instrument(skip_all)]
    async fn encrypt(&self, plain: &Concealed) -> Result<Encrypted, RingError> {
        let key_material =
            self.key_provider
                .get_or_create()
                .await
                .map_err(|e| RingError::KeyUnavailable {
                    reason: e.to_string(),
                })?;

        let cipher = build_cipher(&key_material).map_err(|reason| RingError::Encrypt { reason })?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plain.expose().as_bytes())
            .map_err(|e| RingError::Encrypt {
                reason: format!("encrypt failed: {e}"),
            })?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&sealed);
        Ok(Encrypted::new(out))
    }

    #[instrument(skip_all, fields(len = value.len()))]
    async fn decrypt(&self, value: &Encrypted) -> Result<Concealed, RingError> {
        let key_material = self.key_provider.load().await.map_err(|e| match e {
            KeyError::Missing => cannot_decrypt("no key material available"),
            other => cannot_decrypt(format!("key provider: {other}")),
        })?;
        let cipher = build_cipher(&key_material).map_err(cannot_decrypt)?;

        let bytes = value.as_bytes();
        if bytes.len() < NONCE_LEN {
            return Err(cannot_decrypt("ciphertext too short"));
        }
        let (nonce_bytes, sealed) = bytes.split_at(NONCE_LEN);

        let plain = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(nonce_bytes), sealed)
                .map_err(|_| cannot_decrypt("ciphertext failed authentication"))?,
        );
        let text = std::str::from_utf8(&plain)
            .map_err(|_| cannot_decrypt("plaintext is not valid UTF-8"))?;
        Ok(Concealed::new(text))
    }
}

fn build_cipher(material: &KeyMaterial) -> Result<Aes256Gcm, String> {
    Aes256Gcm::new_from_slice(&material.bytes[..]).map_err(|e| format!("cipher init failed: {e}"))
}

fn cannot_decrypt(reason: impl Into<String>) -> RingError {
    RingError::CannotDecrypt {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_provider::InMemoryKeyProvider;

    #[tokio::test]
    async fn sealed_value_opens_with_same_key() {
        let ring = AesGcmRing::new(InMemoryKeyProvider::default());
        let sealed = ring
            .encrypt(&Concealed::new("passw0rd"))
            .await
            .expect("encrypt");

        assert!(
            !sealed
                .as_bytes()
                .windows(b"passw0rd".len())
                .any(|w| w == b"passw0rd"),
            "plaintext must not appear in ciphertext"
        );

        let opened = ring.decrypt(&sealed).await.expect("decrypt");
        assert_eq!(opened.expose(), "passw0rd");
    }

    #[tokio::test]
    async fn tampered_ciphertext_cannot_decrypt() {
        let ring = AesGcmRing::new(InMemoryKeyProvider::default());
        let sealed = ring
            .encrypt(&Concealed::new("hunter2"))
            .await
            .expect("encrypt");

        let mut bytes = sealed.as_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        let err = ring
            .decrypt(&Encrypted::new(bytes))
            .await
            .expect_err("tampered value must not open");
        assert!(matches!(err, RingError::CannotDecrypt { .. }));

        let err = ring
            .decrypt(&Encrypted::new(vec![1, 2, 3]))
            .await
            .expect_err("short value must not open");
        assert!(matches!(err, RingError::CannotDecrypt { .. }));
    }

    #[tokio::test]
    async fn foreign_or_missing_key_cannot_decrypt() {
        let ring = AesGcmRing::new(InMemoryKeyProvider::default());
        let sealed = ring
            .encrypt(&Concealed::new("hunter2"))
            .await
            .expect("encrypt");

        let other = AesGcmRing::new(InMemoryKeyProvider::with_key());
        assert!(matches!(
            other.decrypt(&sealed).await,
            Err(RingError::CannotDecrypt { .. })
        ));

        let empty = AesGcmRing::new(InMemoryKeyProvider::default());
        assert!(matches!(
            empty.decrypt(&sealed).await,
            Err(RingError::CannotDecrypt { .. })
        ));
    }
}
