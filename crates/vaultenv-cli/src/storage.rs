use std::{fs, path::PathBuf};

use crate::config::{Config, APP_DIR};
use color_eyre::Result;
use dirs::config_dir;
use tracing::debug;
#[cfg(test)]
use vaultenv_storage::key_provider::InMemoryKeyProvider;
use vaultenv_storage::{
    cipher_ring::AesGcmRing, key_provider::KeyringProvider, redb_safe::RedbSafe,
};

const DB_FILENAME: &str = "vaultenv.safe";

/// Resolve the vault database path: CLI flag, then config, then the
/// platform config directory.
pub fn db_path(flag: Option<PathBuf>, config: &Config) -> Result<PathBuf> {
    if let Some(path) = flag.or_else(|| config.db_file.clone()) {
        return Ok(path);
    }

    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    let dir = base.join(APP_DIR);
    fs::create_dir_all(&dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(dir.join(DB_FILENAME))
}

/// Build the storage engine for the resolved database path.
pub fn safe_from_config(flag: Option<PathBuf>, config: &Config) -> Result<RedbSafe> {
    let path = db_path(flag, config)?;
    debug!(?path, "using vault database");
    Ok(RedbSafe::with_lock_timeout(path, config.lock_timeout()))
}

/// Build the production ring using the OS keychain.
pub fn ring_from_config(config: &Config) -> AesGcmRing<KeyringProvider> {
    let (service, account) = config.keyring_entry();
    debug!(%service, %account, "using OS keyring entry");
    AesGcmRing::new(KeyringProvider::new(service, account))
}

/// Helper for tests to construct a database rooted at a temp dir.
#[cfg(test)]
pub fn test_safe(root: &std::path::Path) -> RedbSafe {
    RedbSafe::new(root.join(DB_FILENAME))
}

/// Helper for tests: a ring with an in-memory key.
#[cfg(test)]
pub fn test_ring() -> AesGcmRing<InMemoryKeyProvider> {
    AesGcmRing::new(InMemoryKeyProvider::default())
}
