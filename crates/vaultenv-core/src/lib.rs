//! Core data model and contracts for vaultenv: encrypted namespaces, the
//! storage (`Safe`) and keyring (`Ring`) boundaries.
//! Concrete backends live in `vaultenv-storage`.

pub mod keyring;
pub mod namespace;
pub mod storage;

pub use keyring::{Concealed, Ring, RingError};
pub use namespace::{Encrypted, Namespace};
pub use storage::{InMemorySafe, Safe, SafeError};
