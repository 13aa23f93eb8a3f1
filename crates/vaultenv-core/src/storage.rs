use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;

use crate::namespace::{validate_key, validate_name, Encrypted, Namespace};

/// Errors produced by [`Safe`] implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SafeError {
    /// Referenced namespace has no bucket in the store.
    #[error("namespace {name:?} does not exist")]
    NamespaceNotFound { name: String },
    #[error("invalid namespace name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },
    /// The backing file stayed locked for the whole bounded wait. Retryable.
    #[error("persistent storage is locked by another process (waited {waited:?})")]
    Busy { waited: Duration },
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

/// Persistent storage of encrypted namespaces.
///
/// Every operation is one atomic transaction. Values are stored and returned
/// as-is; implementations never decrypt.
#[async_trait]
pub trait Safe: Send + Sync {
    /// Upsert every pair of `ns`, creating the namespace if absent.
    async fn set(&self, ns: &Namespace) -> Result<(), SafeError>;

    /// Remove `keys` from the namespace (idempotent per key).
    async fn delete(&self, name: &str, keys: &BTreeSet<String>) -> Result<(), SafeError>;

    /// Remove the namespace and all of its content.
    async fn purge(&self, name: &str) -> Result<(), SafeError>;

    /// Snapshot of the namespace content.
    async fn get(&self, name: &str) -> Result<Namespace, SafeError>;

    /// Names of every namespace in the store.
    async fn list(&self) -> Result<Vec<String>, SafeError>;
}

type Buckets = BTreeMap<String, BTreeMap<String, Encrypted>>;

/// In-memory safe for tests and smoke runs. Nothing touches the disk.
#[derive(Debug, Default, Clone)]
pub struct InMemorySafe {
    inner: Arc<Mutex<Buckets>>,
}

impl InMemorySafe {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_buckets<T>(
        &self,
        op: impl FnOnce(&mut Buckets) -> Result<T, SafeError>,
    ) -> Result<T, SafeError> {
        let mut guard = self.inner.lock().map_err(|err| SafeError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;

        // Work on a copy and swap it in only on success, so a failed batch
        // leaves nothing behind.
        let mut staged = guard.clone();
        let out = op(&mut staged)?;
        *guard = staged;
        Ok(out)
    }
}

#[async_trait]
impl Safe for InMemorySafe {
    async fn set(&self, ns: &Namespace) -> Result<(), SafeError> {
        validate_name(&ns.name)?;
        self.with_buckets(|buckets| {
            let bucket = buckets.entry(ns.name.clone()).or_default();
            for (key, value) in &ns.content {
                validate_key(key)?;
                bucket.insert(key.clone(), value.clone());
            }
            Ok(())
        })
    }

    async fn delete(&self, name: &str, keys: &BTreeSet<String>) -> Result<(), SafeError> {
        validate_name(name)?;
        self.with_buckets(|buckets| {
            let bucket = buckets.entry(name.to_string()).or_default();
            for key in keys {
                bucket.remove(key);
            }
            Ok(())
        })
    }

    async fn purge(&self, name: &str) -> Result<(), SafeError> {
        validate_name(name)?;
        self.with_buckets(|buckets| {
            buckets
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| SafeError::NamespaceNotFound {
                    name: name.to_string(),
                })
        })
    }

    async fn get(&self, name: &str) -> Result<Namespace, SafeError> {
        validate_name(name)?;
        let guard = self.inner.lock().map_err(|err| SafeError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        let content = guard
            .get(name)
            .cloned()
            .ok_or_else(|| SafeError::NamespaceNotFound {
                name: name.to_string(),
            })?;
        Ok(Namespace {
            name: name.to_string(),
            content,
        })
    }

    async fn list(&self) -> Result<Vec<String>, SafeError> {
        let guard = self.inner.lock().map_err(|err| SafeError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        Ok(guard.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(name: &str, pairs: &[(&str, &str)]) -> Namespace {
        let mut ns = Namespace::new(name).expect("valid name");
        for (k, v) in pairs {
            ns.insert(*k, Encrypted::from(v.as_bytes()));
        }
        ns
    }

    #[tokio::test]
    async fn set_merges_into_existing_namespace() {
        let safe = InMemorySafe::new();
        safe.set(&ns("app", &[("a", "1"), ("b", "2")]))
            .await
            .expect("first set");
        safe.set(&ns("app", &[("b", "3")])).await.expect("second set");

        let got = safe.get("app").await.expect("get");
        assert_eq!(got.content["a"], Encrypted::from(&b"1"[..]));
        assert_eq!(got.content["b"], Encrypted::from(&b"3"[..]));
    }

    #[tokio::test]
    async fn failed_batch_leaves_namespace_untouched() {
        let safe = InMemorySafe::new();
        safe.set(&ns("app", &[("a", "1")])).await.expect("set");

        let err = safe
            .set(&ns("app", &[("a", "changed"), ("bad=key", "x")]))
            .await
            .expect_err("invalid key must fail");
        assert!(matches!(err, SafeError::InvalidKey { .. }));

        let got = safe.get("app").await.expect("get");
        assert_eq!(got.len(), 1);
        assert_eq!(got.content["a"], Encrypted::from(&b"1"[..]));
    }

    #[tokio::test]
    async fn purge_then_get_is_not_found() {
        let safe = InMemorySafe::new();
        safe.set(&ns("app", &[("a", "1")])).await.expect("set");
        safe.purge("app").await.expect("purge");

        let err = safe.get("app").await.expect_err("purged");
        assert_eq!(
            err,
            SafeError::NamespaceNotFound {
                name: "app".into()
            }
        );
        assert!(safe.list().await.expect("list").is_empty());
        assert!(matches!(
            safe.purge("app").await,
            Err(SafeError::NamespaceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn empty_name_is_invalid_everywhere() {
        let safe = InMemorySafe::new();
        assert!(matches!(safe.get("").await, Err(SafeError::InvalidName { .. })));
        assert!(matches!(safe.purge("").await, Err(SafeError::InvalidName { .. })));
        assert!(matches!(
            safe.delete("", &BTreeSet::new()).await,
            Err(SafeError::InvalidName { .. })
        ));
    }
}
