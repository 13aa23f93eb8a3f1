//! Storage engine backed by a single redb file.
//!
//! ## Layout
//!
//! One table per namespace. The table name is the namespace name verbatim,
//! keys are secret names and values are the raw `Encrypted` bytes. There is no
//! header or schema record.
//!
//! ## Sessions
//!
//! Every public operation opens the database, runs exactly one transaction
//! and closes it again before returning. The open handle lives in a
//! [`Session`] that owns the engine's mutex guard, so in-process callers are
//! serialized and the file is released on every exit path. File I/O runs on
//! the blocking pool.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use redb::{
    Database, DatabaseError, ReadableDatabase, ReadableTable, TableDefinition, TableError,
    TableHandle,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, warn, Span};
use vaultenv_core::{
    namespace::{validate_key, validate_name},
    Encrypted, Namespace, Safe, SafeError,
};

/// Default bounded wait for a file lock held by another process.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Callers validate `name` first; redb rejects empty table names with a panic.
fn bucket(name: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(name)
}

/// redb-backed [`Safe`]. Holds no open handle between calls.
pub struct RedbSafe {
    path: PathBuf,
    lock_timeout: Duration,
    lock: Arc<Mutex<()>>,
}

/// One open-use-close cycle against the database file.
///
/// Field order matters: the database is closed before the mutex is released.
struct Session {
    db: Database,
    _guard: OwnedMutexGuard<()>,
}

impl Session {
    /// Blocking. Retries a lock held by another process until `lock_timeout`.
    fn open(
        path: &Path,
        lock_timeout: Duration,
        guard: OwnedMutexGuard<()>,
    ) -> Result<Self, SafeError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(storage_err)?;
        }

        let started = Instant::now();
        loop {
            match Database::create(path) {
                Ok(db) => return Ok(Session { db, _guard: guard }),
                Err(DatabaseError::DatabaseAlreadyOpen) => {
                    let waited = started.elapsed();
                    if waited >= lock_timeout {
                        warn!(path = %path.display(), ?waited, "persistent storage is locked");
                        return Err(SafeError::Busy { waited });
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(err) => {
                    return Err(SafeError::Storage {
                        reason: format!("unable to open persistent storage: {err}"),
                    })
                }
            }
        }
    }
}

impl RedbSafe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_lock_timeout(path, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            lock_timeout,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` against a freshly opened database on the blocking pool.
    ///
    /// `op` is synchronous and only sees the database, so it cannot open a
    /// second session on this engine while the first one is alive.
    async fn with_session<T, F>(&self, op: F) -> Result<T, SafeError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, SafeError> + Send + 'static,
    {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        let path = self.path.clone();
        let lock_timeout = self.lock_timeout;
        let span = Span::current();

        let outcome = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let session = Session::open(&path, lock_timeout, guard)?;
            op(&session.db)
        })
        .await
        .map_err(|err| storage_err(format!("storage task failed: {err}")))?;
        outcome
    }
}

#[async_trait]
impl Safe for RedbSafe {
    #[instrument(skip_all, fields(namespace = %ns.name, keys = ns.len()))]
    async fn set(&self, ns: &Namespace) -> Result<(), SafeError> {
        validate_name(&ns.name)?;
        let ns = ns.clone();

        self.with_session(move |db| {
            // Returning early drops the write transaction uncommitted, which
            // aborts it.
            let txn = db.begin_write().map_err(storage_err)?;
            {
                let mut table = txn.open_table(bucket(&ns.name)).map_err(storage_err)?;
                for (key, value) in &ns.content {
                    validate_key(key)?;
                    table
                        .insert(key.as_str(), value.as_bytes())
                        .map_err(storage_err)?;
                }
            }
            txn.commit().map_err(storage_err)
        })
        .await?;
        debug!("namespace updated");
        Ok(())
    }

    #[instrument(skip_all, fields(namespace = %name, keys = keys.len()))]
    async fn delete(&self, name: &str, keys: &BTreeSet<String>) -> Result<(), SafeError> {
        validate_name(name)?;
        let name = name.to_string();
        let keys = keys.clone();

        self.with_session(move |db| {
            let txn = db.begin_write().map_err(storage_err)?;
            {
                let mut table = txn.open_table(bucket(&name)).map_err(storage_err)?;
                for key in &keys {
                    table.remove(key.as_str()).map_err(storage_err)?;
                }
            }
            txn.commit().map_err(storage_err)
        })
        .await?;
        debug!("keys removed");
        Ok(())
    }

    #[instrument(skip_all, fields(namespace = %name))]
    async fn purge(&self, name: &str) -> Result<(), SafeError> {
        validate_name(name)?;
        let name = name.to_string();

        self.with_session(move |db| {
            let txn = db.begin_write().map_err(storage_err)?;
            let existed = txn.delete_table(bucket(&name)).map_err(storage_err)?;
            if !existed {
                return Err(not_found(&name));
            }
            txn.commit().map_err(storage_err)
        })
        .await?;
        debug!("namespace purged");
        Ok(())
    }

    #[instrument(skip_all, fields(namespace = %name))]
    async fn get(&self, name: &str) -> Result<Namespace, SafeError> {
        validate_name(name)?;
        let name = name.to_string();

        let ns = self
            .with_session(move |db| {
                let txn = db.begin_read().map_err(storage_err)?;
                let table = match txn.open_table(bucket(&name)) {
                    Ok(table) => table,
                    Err(TableError::TableDoesNotExist(_)) => return Err(not_found(&name)),
                    Err(err) => return Err(storage_err(err)),
                };

                let mut ns = Namespace {
                    name: name.clone(),
                    ..Namespace::default()
                };
                for entry in table.iter().map_err(storage_err)? {
                    let (key, value) = entry.map_err(storage_err)?;
                    ns.insert(key.value(), Encrypted::from(value.value()));
                }
                Ok(ns)
            })
            .await?;
        debug!(keys = ns.len(), "namespace loaded");
        Ok(ns)
    }

    #[instrument(skip_all)]
    async fn list(&self) -> Result<Vec<String>, SafeError> {
        self.with_session(|db| {
            let txn = db.begin_read().map_err(storage_err)?;
            let mut names: Vec<String> = txn
                .list_tables()
                .map_err(storage_err)?
                .map(|handle| handle.name().to_string())
                .collect();
            names.sort();
            Ok(names)
        })
        .await
    }
}

fn not_found(name: &str) -> SafeError {
    SafeError::NamespaceNotFound {
        name: name.to_string(),
    }
}

fn storage_err<E: ToString>(err: E) -> SafeError {
    SafeError::Storage {
        reason: err.to_string(),
    }
}
