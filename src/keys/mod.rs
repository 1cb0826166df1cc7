//! Key manager: peer identity lifecycle, session key derivation/rotation,
//! and an encrypted at-rest key store.
//!
//! Grounded on `original_source/core/security/include/KeyManager.h`: the
//! `KeyType`/`KeyInfo`/`SessionKey`/`IdentityKeyPair` types and the
//! `IKeyStore` port are carried over near-verbatim in shape, reimplemented in
//! idiomatic Rust (no raw pointers, `Result` instead of bool-return +
//! out-param, `chrono`-free `u64` unix timestamps to match the rest of this
//! crate's types).

pub mod manager;
pub mod store;
pub mod types;

pub use manager::{KeyManager, PeerKey, PeerTrust};
pub use store::{FileKeyStore, IKeyStore};
pub use types::{IdentityKeyPair, KeyInfo, KeyType, SessionKey};
