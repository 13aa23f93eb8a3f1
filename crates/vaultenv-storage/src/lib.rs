//! Concrete vaultenv backends: the redb storage engine and the AES-GCM ring
//! with keys sourced from the OS keyring (or test doubles).

pub mod cipher_ring;
pub mod key_provider;
pub mod redb_safe;
