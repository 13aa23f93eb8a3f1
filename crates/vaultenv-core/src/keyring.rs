use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::namespace::Encrypted;

/// A decrypted secret. The buffer is wiped when dropped and never rendered
/// by `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct Concealed(Zeroizing<String>);

impl Concealed {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Borrow the plaintext. Callers must not log or persist it.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for Concealed {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for Concealed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Concealed(********)")
    }
}

impl fmt::Display for Concealed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("********")
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    /// Key material is missing or ciphertext is malformed/tampered.
    #[error("cannot decrypt: {reason}")]
    CannotDecrypt { reason: String },
    #[error("key material unavailable: {reason}")]
    KeyUnavailable { reason: String },
    #[error("cannot encrypt: {reason}")]
    Encrypt { reason: String },
}

/// Encrypts and decrypts secret values with locally protected key material.
#[async_trait]
pub trait Ring: Send + Sync {
    async fn encrypt(&self, plain: &Concealed) -> Result<Encrypted, RingError>;

    /// Deterministic for a given key and ciphertext.
    async fn decrypt(&self, value: &Encrypted) -> Result<Concealed, RingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concealed_hides_value_in_formatting() {
        let secret = Concealed::new("hunter2");
        assert_eq!(secret.to_string(), "********");
        assert!(!format!("{secret:?}").contains("hunter2"));
        assert_eq!(secret.expose(), "hunter2");
    }
}
