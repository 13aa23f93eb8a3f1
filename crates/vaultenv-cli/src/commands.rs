use std::{collections::BTreeSet, io::Write};

use color_eyre::{eyre::eyre, Result};
use tracing::info;
use vaultenv_core::{namespace::validate_key, Concealed, Namespace, Ring, Safe};

/// Print every namespace name, one per line.
pub async fn list<S: Safe>(safe: &S, out: &mut impl Write) -> Result<()> {
    for name in safe.list().await? {
        writeln!(out, "{name}")?;
    }
    Ok(())
}

/// Encrypt `key=value` pairs and store them in one transaction. Every pair is
/// validated before anything is encrypted or written.
pub async fn set<S: Safe, R: Ring>(
    safe: &S,
    ring: &R,
    namespace: &str,
    pairs: &[String],
) -> Result<()> {
    let parsed = pairs
        .iter()
        .map(|pair| parse_pair(pair))
        .collect::<Result<Vec<_>>>()?;

    let mut ns = Namespace::new(namespace)?;
    for (key, plain) in parsed {
        let sealed = ring.encrypt(&plain).await?;
        ns.insert(key, sealed);
    }
    safe.set(&ns).await?;
    info!(namespace = %ns, "secrets stored");
    Ok(())
}

/// Print the keys of a namespace, or `key=value` lines when `decrypt` is set.
pub async fn show<S: Safe, R: Ring>(
    safe: &S,
    ring: &R,
    namespace: &str,
    decrypt: bool,
    out: &mut impl Write,
) -> Result<()> {
    let ns = safe.get(namespace).await?;
    for (key, value) in &ns.content {
        if decrypt {
            let plain = ring.decrypt(value).await?;
            writeln!(out, "{key}={}", plain.expose())?;
        } else {
            writeln!(out, "{key}")?;
        }
    }
    Ok(())
}

/// Remove keys from a namespace.
pub async fn unset<S: Safe>(safe: &S, namespace: &str, keys: &[String]) -> Result<()> {
    let keys: BTreeSet<String> = keys.iter().cloned().collect();
    safe.delete(namespace, &keys).await?;
    info!(%namespace, removed = keys.len(), "keys removed");
    Ok(())
}

/// Delete a namespace and everything in it.
pub async fn purge<S: Safe>(safe: &S, namespace: &str) -> Result<()> {
    safe.purge(namespace).await?;
    info!(%namespace, "namespace purged");
    Ok(())
}

fn parse_pair(pair: &str) -> Result<(String, Concealed)> {
    let (key, value) = pair
        .split_once('=')
        .ok_or_else(|| eyre!("expected KEY=VALUE, got a value without '='"))?;
    validate_key(key)?;
    Ok((key.to_string(), Concealed::new(value)))
}
