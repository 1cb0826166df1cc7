//! Cryptographic primitives: record encryption, key derivation, signing and
//! key agreement. Pure functions over byte buffers; no I/O, no state beyond
//! the key material a caller hands in. The transport and key-manager layers
//! are built on top of this module, never the other way around.

pub mod aead;
pub mod dh;
pub mod kdf;
pub mod signing;

pub use aead::{open_aes_gcm, open_chacha20poly1305, seal_aes_gcm, seal_chacha20poly1305};
pub use dh::{derive_shared_secret, generate_ephemeral};
pub use kdf::{derive_session_key, pbkdf2_derive, Argon2Params};
pub use signing::{generate_identity_keypair, sign, verify};

use serde::{Deserialize, Serialize};

/// AEAD cipher selection. AES-256-GCM is the wire default (spec.md §4.4);
/// ChaCha20-Poly1305 is carried as an alternate for platforms without AES-NI,
/// mirroring the two-cipher choice in the original implementation's crypto
/// header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AeadAlgorithm {
	#[default]
	Aes256Gcm,
	ChaCha20Poly1305,
}

/// Password/passphrase-based key derivation function selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum KdfAlgorithm {
	#[default]
	Pbkdf2Sha256,
	Argon2id,
}

pub const KEY_SIZE: usize = 32;
pub const GCM_NONCE_SIZE: usize = 12;
pub const GCM_TAG_SIZE: usize = 16;
pub const CBC_IV_SIZE: usize = 16;
pub const HMAC_SIZE: usize = 32;
