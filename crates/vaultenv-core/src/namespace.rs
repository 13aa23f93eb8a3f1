use std::{collections::BTreeMap, fmt};

use crate::storage::SafeError;

/// Opaque ciphertext as produced by a [`Ring`](crate::keyring::Ring).
///
/// The storage layer never interprets these bytes. There is deliberately no
/// `Display` impl and `Debug` only reports the length.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Encrypted(Vec<u8>);

impl Encrypted {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Encrypted {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Encrypted {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Debug for Encrypted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Encrypted(<{} bytes>)", self.0.len())
    }
}

/// A named group of encrypted secrets, backed by one storage bucket.
///
/// Content is kept in a `BTreeMap` so iteration is always sorted by key;
/// decryption and environment composition rely on that order.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Namespace {
    pub name: String,
    pub content: BTreeMap<String, Encrypted>,
}

impl Namespace {
    /// Create an empty namespace after validating its name.
    pub fn new(name: impl Into<String>) -> Result<Self, SafeError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            content: BTreeMap::new(),
        })
    }

    /// Build a namespace from existing content. Keys are validated by the
    /// store at write time, not here.
    pub fn with_content(
        name: impl Into<String>,
        content: BTreeMap<String, Encrypted>,
    ) -> Result<Self, SafeError> {
        let mut ns = Self::new(name)?;
        ns.content = content;
        Ok(ns)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Encrypted) -> Option<Encrypted> {
        self.content.insert(key.into(), value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.content.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

// Both renderings list key names only. Values must never reach a log line.
impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.keys().collect();
        write!(f, "({} [{}])", self.name, keys.join(" "))
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Namespace names map verbatim to bucket names.
pub fn validate_name(name: &str) -> Result<(), SafeError> {
    if name.is_empty() {
        return Err(SafeError::InvalidName {
            name: name.to_string(),
            reason: "namespace name cannot be empty".to_string(),
        });
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '/' | '.')))
    {
        return Err(SafeError::InvalidName {
            name: name.to_string(),
            reason: format!("invalid character {c:?}"),
        });
    }
    Ok(())
}

/// Keys become environment variable names of the spawned process.
pub fn validate_key(key: &str) -> Result<(), SafeError> {
    if key.is_empty() {
        return Err(SafeError::InvalidKey {
            key: key.to_string(),
            reason: "key cannot be empty".to_string(),
        });
    }
    if let Some(c) = key
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(SafeError::InvalidKey {
            key: key.to_string(),
            reason: format!("invalid character {c:?}"),
        });
    }
    Ok(())
}
