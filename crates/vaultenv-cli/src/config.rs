use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use color_eyre::{eyre::eyre, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use vaultenv_storage::redb_safe::DEFAULT_LOCK_TIMEOUT;

pub const APP_DIR: &str = "vaultenv";
const DEFAULT_SERVICE: &str = "vaultenv";
const DEFAULT_ACCOUNT: &str = "master-key";

/// User-level configuration loaded from `<config dir>/vaultenv/config.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the vault database file.
    pub db_file: Option<PathBuf>,
    /// Bounded wait for a database locked by another process.
    pub lock_timeout_secs: Option<u64>,
    /// OS keyring entry holding the vault key.
    pub keyring: Option<KeyringConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct KeyringConfig {
    pub service: Option<String>,
    pub account: Option<String>,
}

impl Config {
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LOCK_TIMEOUT)
    }

    /// Keyring `(service, account)`, falling back to defaults.
    pub fn keyring_entry(&self) -> (String, String) {
        let keyring = self.keyring.clone().unwrap_or_default();
        (
            keyring.service.unwrap_or_else(|| DEFAULT_SERVICE.to_string()),
            keyring.account.unwrap_or_else(|| DEFAULT_ACCOUNT.to_string()),
        )
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)
        .map_err(|err| {
            let reason = err.message().trim().replace('\n', " ");
            eyre!("invalid config {}: {reason}", path.display())
        })?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| eyre!("no config dir available"))?;
    Ok(base.join(APP_DIR).join("config.toml"))
}

/// Write the default config to disk unless a file already exists there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_to_path_if_missing(config, &default_path()?)
}

fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_default_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_from_path(dir.path().join("config.toml")).expect("load");
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.lock_timeout(), Duration::from_secs(3));
        assert_eq!(
            cfg.keyring_entry(),
            ("vaultenv".to_string(), "master-key".to_string())
        );
    }

    #[test]
    fn parses_custom_config() {
        let contents = r#"
            db_file = "/tmp/vaultenv/test.safe"
            lock_timeout_secs = 10
            [keyring]
            service = "work-vault"
        "#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("write temp config");

        let cfg = load_from_path(&path).expect("load");
        assert_eq!(
            cfg,
            Config {
                db_file: Some(PathBuf::from("/tmp/vaultenv/test.safe")),
                lock_timeout_secs: Some(10),
                keyring: Some(KeyringConfig {
                    service: Some("work-vault".into()),
                    account: None,
                }),
            }
        );
        assert_eq!(cfg.lock_timeout(), Duration::from_secs(10));
        assert_eq!(
            cfg.keyring_entry(),
            ("work-vault".to_string(), "master-key".to_string())
        );
    }

    #[test]
    fn write_default_creates_file_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            db_file: Some(PathBuf::from("/tmp/vaultenv/test.safe")),
            ..Config::default()
        };

        write_to_path_if_missing(&cfg, &path).expect("write should succeed");
        let second =
            write_to_path_if_missing(&Config::default(), &path).expect("second write ok");
        assert_eq!(second, path);

        let loaded = load_from_path(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn malformed_config_is_a_one_line_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "db_file = [").expect("write temp config");

        let err = load_from_path(&path).expect_err("malformed");
        let message = err.to_string();
        assert!(message.starts_with("invalid config "));
        assert_eq!(message.lines().count(), 1);
    }
}
