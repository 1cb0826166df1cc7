//! Key metadata types, grounded on `original_source/core/security/include/KeyManager.h`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

fn now_unix() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// What a stored key is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
	Identity,
	Session,
	PeerTrust,
	Backup,
}

/// Metadata about a stored key (not the key material itself, which lives in
/// `SessionKey`/`IdentityKeyPair`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInfo {
	pub key_id: String,
	pub key_type: KeyType,
	pub created: u64,
	pub expires: Option<u64>,
	pub algorithm: String,
	pub peer_id: Option<String>,
	pub compromised: bool,
	pub usage_count: u64,
}

impl KeyInfo {
	pub fn is_expired(&self) -> bool {
		match self.expires {
			Some(expires) => now_unix() >= expires,
			None => false,
		}
	}

	pub fn is_valid(&self) -> bool {
		!self.compromised && !self.is_expired()
	}
}

/// A derived session key bound to a peer, with rotation thresholds matching
/// `original_source`'s `SessionKey::MAX_BYTES`/`MAX_MESSAGES` exactly.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionKey {
	pub key_id: String,
	pub key: [u8; 32],
	pub peer_id: String,
	pub created: u64,
	pub expires: Option<u64>,
	pub last_used: u64,
	pub bytes_encrypted: u64,
	pub messages_encrypted: u64,
}

impl std::fmt::Debug for SessionKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionKey")
			.field("key_id", &self.key_id)
			.field("peer_id", &self.peer_id)
			.field("key", &"<redacted>")
			.field("bytes_encrypted", &self.bytes_encrypted)
			.field("messages_encrypted", &self.messages_encrypted)
			.finish()
	}
}

impl SessionKey {
	pub const MAX_BYTES: u64 = 1 << 30;
	pub const MAX_MESSAGES: u64 = 1_000_000;

	pub fn new(key_id: String, key: [u8; 32], peer_id: String) -> Self {
		let now = now_unix();
		SessionKey {
			key_id,
			key,
			peer_id,
			created: now,
			expires: None,
			last_used: now,
			bytes_encrypted: 0,
			messages_encrypted: 0,
		}
	}

	/// Record that `bytes` were encrypted/decrypted under this key.
	pub fn record_usage(&mut self, bytes: u64) {
		self.bytes_encrypted += bytes;
		self.messages_encrypted += 1;
		self.last_used = now_unix();
	}

	/// Whether this key has crossed a rotation threshold and must be
	/// renegotiated via a fresh handshake before further use.
	pub fn needs_rotation(&self) -> bool {
		self.bytes_encrypted >= Self::MAX_BYTES || self.messages_encrypted >= Self::MAX_MESSAGES
	}
}

/// A node's long-lived Ed25519 identity.
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityKeyPair {
	pub key_id: String,
	pub public_key: [u8; 32],
	pub private_key: [u8; 32],
	pub created: u64,
	pub device_name: String,
}

impl std::fmt::Debug for IdentityKeyPair {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("IdentityKeyPair")
			.field("key_id", &self.key_id)
			.field("device_name", &self.device_name)
			.field("fingerprint", &self.fingerprint())
			.finish()
	}
}

impl IdentityKeyPair {
	pub fn new(key_id: String, public_key: [u8; 32], private_key: [u8; 32], device_name: String) -> Self {
		IdentityKeyPair { key_id, public_key, private_key, created: now_unix(), device_name }
	}

	/// Colon-separated hex octets, e.g. `"a1:b2:c3:..."`, for human-readable
	/// display — matches the node-label conventions used elsewhere in this
	/// crate for identifying peers.
	pub fn fingerprint(&self) -> String {
		fingerprint_of(&self.public_key)
	}
}

pub fn fingerprint_of(public_key: &[u8; 32]) -> String {
	public_key.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(":")
}
