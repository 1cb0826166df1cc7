//! Key manager: ties identity keys, peer trust, and session keys to the
//! `IKeyStore` port. Grounded on `original_source`'s `KeyManagerCore.cpp` /
//! `SessionKeyManager.cpp` / `PeerKeyManager.cpp`, consolidated into one
//! type the way this crate consolidates its own scattered config types.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ed25519_dalek::SigningKey;
use tokio::sync::RwLock;
use zeroize::Zeroize;

use crate::error::KeyError;

use super::store::IKeyStore;
use super::types::{fingerprint_of, IdentityKeyPair, KeyType, SessionKey};

fn now_unix() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Trust state for a known peer (spec.md §3 `PeerIdentity.trust`), tracked
/// independently of any particular session key (a peer may rotate session
/// keys many times while remaining equally trusted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerTrust {
	/// Never seen before; identity key not yet pinned.
	Unknown,
	/// Identity key pinned via handshake but not yet out-of-band verified.
	Pairing,
	/// Identity key pinned and confirmed via out-of-band fingerprint check.
	Verified,
	/// Operator explicitly revoked trust (e.g. device reported lost).
	Revoked,
}

/// A peer's long-lived Ed25519 public key plus its trust state (spec.md §3
/// `PeerIdentity`).
#[derive(Debug, Clone)]
pub struct PeerKey {
	pub peer_id: String,
	pub pubkey: [u8; 32],
	pub trust: PeerTrust,
}

impl PeerKey {
	pub fn fingerprint(&self) -> String {
		fingerprint_of(&self.pubkey)
	}
}

/// Owns the local node's identity key, the peer trust table, and active
/// session keys. Constructed once and shared (via `Arc`) across the
/// orchestrator and transport layer rather than reached via a global.
pub struct KeyManager {
	store: Arc<dyn IKeyStore>,
	identity: IdentityKeyPair,
	peer_keys: RwLock<HashMap<String, PeerKey>>,
	sessions: RwLock<HashMap<String, SessionKey>>,
}

impl KeyManager {
	/// Load an existing identity from the store, or generate and persist a
	/// new one if none exists yet (first run on a node).
	pub async fn open_or_create(
		store: Arc<dyn IKeyStore>,
		device_name: &str,
	) -> Result<Self, KeyError> {
		const IDENTITY_KEY_ID: &str = "identity";

		let identity = if store.exists(IDENTITY_KEY_ID).await {
			let raw = store.load(IDENTITY_KEY_ID).await?;
			let blob: IdentityBlob =
				bincode::deserialize(&raw).map_err(|e| KeyError::Store { message: e.to_string() })?;
			IdentityKeyPair::new(
				IDENTITY_KEY_ID.to_string(),
				blob.public_key,
				blob.private_key,
				blob.device_name,
			)
		} else {
			let kp = crate::crypto::signing::generate_identity_keypair();
			let identity = IdentityKeyPair::new(
				IDENTITY_KEY_ID.to_string(),
				kp.verifying_key.to_bytes(),
				kp.signing_key.to_bytes(),
				device_name.to_string(),
			);
			let blob = IdentityBlob {
				public_key: identity.public_key,
				private_key: identity.private_key,
				device_name: identity.device_name.clone(),
			};
			let encoded =
				bincode::serialize(&blob).map_err(|e| KeyError::Store { message: e.to_string() })?;
			store.store(IDENTITY_KEY_ID, KeyType::Identity, &encoded).await?;
			identity
		};

		Ok(KeyManager {
			store,
			identity,
			peer_keys: RwLock::new(HashMap::new()),
			sessions: RwLock::new(HashMap::new()),
		})
	}

	/// Generate a fresh identity, discarding any existing one under the same
	/// key id — distinct from `open_or_create`'s load-or-generate behavior,
	/// for explicit re-keying (spec.md §4.2 `generate_identity`).
	pub async fn generate_identity(
		store: Arc<dyn IKeyStore>,
		device_name: &str,
	) -> Result<Self, KeyError> {
		const IDENTITY_KEY_ID: &str = "identity";
		let kp = crate::crypto::signing::generate_identity_keypair();
		let identity = IdentityKeyPair::new(
			IDENTITY_KEY_ID.to_string(),
			kp.verifying_key.to_bytes(),
			kp.signing_key.to_bytes(),
			device_name.to_string(),
		);
		let blob = IdentityBlob {
			public_key: identity.public_key,
			private_key: identity.private_key,
			device_name: identity.device_name.clone(),
		};
		let encoded =
			bincode::serialize(&blob).map_err(|e| KeyError::Store { message: e.to_string() })?;
		store.store(IDENTITY_KEY_ID, KeyType::Identity, &encoded).await?;

		Ok(KeyManager {
			store,
			identity,
			peer_keys: RwLock::new(HashMap::new()),
			sessions: RwLock::new(HashMap::new()),
		})
	}

	pub fn identity(&self) -> &IdentityKeyPair {
		&self.identity
	}

	pub fn signing_key(&self) -> SigningKey {
		SigningKey::from_bytes(&self.identity.private_key)
	}

	pub fn sign(&self, bytes: &[u8]) -> ed25519_dalek::Signature {
		crate::crypto::signing::sign(&self.signing_key(), bytes)
	}

	pub fn verify(bytes: &[u8], signature: &ed25519_dalek::Signature, peer_pubkey: &[u8; 32]) -> bool {
		match ed25519_dalek::VerifyingKey::from_bytes(peer_pubkey) {
			Ok(vk) => crate::crypto::signing::verify(&vk, bytes, signature).is_ok(),
			Err(_) => false,
		}
	}

	/// Idempotent upsert of a peer's public key. `verified=true` should only
	/// be passed after an out-of-band fingerprint check; otherwise the peer
	/// lands in (or stays in) `Pairing`.
	pub async fn add_peer_key(&self, peer_id: &str, pubkey: [u8; 32], verified: bool) {
		let mut peers = self.peer_keys.write().await;
		let trust = match peers.get(peer_id) {
			Some(existing) if existing.trust == PeerTrust::Revoked => PeerTrust::Revoked,
			_ if verified => PeerTrust::Verified,
			Some(existing) => existing.trust,
			None => PeerTrust::Pairing,
		};
		peers.insert(peer_id.to_string(), PeerKey { peer_id: peer_id.to_string(), pubkey, trust });
	}

	pub async fn peer_key(&self, peer_id: &str) -> Option<PeerKey> {
		self.peer_keys.read().await.get(peer_id).cloned()
	}

	pub async fn trust_level(&self, peer_id: &str) -> PeerTrust {
		self.peer_keys.read().await.get(peer_id).map(|p| p.trust).unwrap_or(PeerTrust::Unknown)
	}

	pub async fn mark_trusted(&self, peer_id: &str) {
		if let Some(peer) = self.peer_keys.write().await.get_mut(peer_id) {
			peer.trust = PeerTrust::Verified;
		}
	}

	pub async fn revoke(&self, peer_id: &str) {
		if let Some(peer) = self.peer_keys.write().await.get_mut(peer_id) {
			peer.trust = PeerTrust::Revoked;
		}
	}

	/// Perform a fresh local X25519 ephemeral keypair + ECDH against
	/// `peer_ephemeral_pub`, deriving a directional session key via HKDF with
	/// a role-disambiguating info string (spec.md §4.2). Ephemeral secret and
	/// shared secret are zeroized before returning.
	pub async fn derive_session_key(
		&self,
		peer_id: &str,
		peer_ephemeral_pub: &x25519_dalek::PublicKey,
		is_initiator: bool,
		duration_secs: Option<u64>,
	) -> Result<SessionKey, KeyError> {
		let ephemeral = crate::crypto::dh::generate_ephemeral();
		let mut shared = crate::crypto::dh::derive_shared_secret(ephemeral.secret, peer_ephemeral_pub)
			.map_err(KeyError::from)?;

		let role = if is_initiator { "-initiator" } else { "-responder" };
		let info = format!("SentinelFS-Session-{peer_id}{role}");
		let key_bytes = crate::crypto::kdf::derive_session_key(&shared, b"", info.as_bytes());
		shared.zeroize();

		let key_id = hex::encode(&crate::util::hash_binary(&key_bytes)[0..8]);
		let mut session = SessionKey::new(key_id, key_bytes, peer_id.to_string());
		if let Some(duration) = duration_secs {
			session.expires = Some(now_unix() + duration);
		}
		Ok(session)
	}

	/// Returns the session key for `peer_id`, or `None` if missing or past
	/// its rotation threshold, refreshing `last_used` on hit.
	pub async fn get_session_key(&self, peer_id: &str) -> Option<SessionKey> {
		let mut sessions = self.sessions.write().await;
		let needs_rotation = sessions.get(peer_id).map(|k| k.needs_rotation()).unwrap_or(false);
		if needs_rotation {
			return None;
		}
		let key = sessions.get_mut(peer_id)?;
		key.last_used = now_unix();
		Some(key.clone())
	}

	/// Removes session keys whose rotation predicate holds (spec.md §4.2
	/// `cleanup_expired`), returning the peer ids that were dropped.
	pub async fn cleanup_expired(&self) -> Vec<String> {
		let mut sessions = self.sessions.write().await;
		let expired: Vec<String> = sessions
			.iter()
			.filter(|(_, key)| key.needs_rotation() || key.expires.map(|e| now_unix() > e).unwrap_or(false))
			.map(|(peer_id, _)| peer_id.clone())
			.collect();
		for peer_id in &expired {
			sessions.remove(peer_id);
		}
		expired
	}

	/// Encrypts the identity keypair under a password-derived key, producing
	/// `[salt(16)][iv(16)][AES-256-CBC-encrypted payload]` where the payload
	/// is `{version=0x01, name_len(2,BE), name, pubkey(32), privkey(64)}`
	/// protected with HMAC-SHA256 (encrypt-then-MAC), per spec.md §4.2. The
	/// 64-byte "privkey" field matches the source's combined secret+public
	/// keypair encoding; this crate stores only the 32-byte Ed25519 seed, so
	/// the trailing 32 bytes duplicate the public key for format parity.
	pub fn export_identity(&self, password: &[u8]) -> Result<Vec<u8>, KeyError> {
		use rand::RngCore;

		const VERSION: u8 = 0x01;
		const ITERATIONS: u32 = 200_000;

		let mut salt = [0u8; 16];
		let mut iv = [0u8; 16];
		rand::rngs::OsRng.fill_bytes(&mut salt);
		rand::rngs::OsRng.fill_bytes(&mut iv);

		let mut payload = Vec::new();
		payload.push(VERSION);
		let name_bytes = self.identity.device_name.as_bytes();
		payload.extend_from_slice(&(name_bytes.len() as u16).to_be_bytes());
		payload.extend_from_slice(name_bytes);
		payload.extend_from_slice(&self.identity.public_key);
		payload.extend_from_slice(&self.identity.private_key);
		payload.extend_from_slice(&self.identity.public_key);

		let derived = crate::crypto::kdf::pbkdf2_derive(password, &salt, ITERATIONS, 64);
		let enc_key: [u8; 32] = derived[0..32].try_into().expect("32-byte slice");
		let mac_key: [u8; 32] = derived[32..64].try_into().expect("32-byte slice");

		let (ciphertext, mac) =
			crate::crypto::aead::cbc_hmac::seal(&enc_key, &mac_key, &iv, &[], &payload)
				.map_err(KeyError::from)?;

		let mut out = Vec::with_capacity(16 + 16 + ciphertext.len() + 32);
		out.extend_from_slice(&salt);
		out.extend_from_slice(&iv);
		out.extend_from_slice(&ciphertext);
		out.extend_from_slice(&mac);
		Ok(out)
	}

	/// Decrypts and validates an `export_identity` blob, rejecting any
	/// payload whose version byte is not `0x01`.
	pub fn import_identity(blob: &[u8], password: &[u8]) -> Result<IdentityKeyPair, KeyError> {
		const ITERATIONS: u32 = 200_000;

		if blob.len() < 16 + 16 + 32 {
			return Err(KeyError::Store { message: "key backup blob too short".into() });
		}
		let salt = &blob[0..16];
		let iv = &blob[16..32];
		let mac = &blob[blob.len() - 32..];
		let ciphertext = &blob[32..blob.len() - 32];

		let derived = crate::crypto::kdf::pbkdf2_derive(password, salt, ITERATIONS, 64);
		let enc_key: [u8; 32] = derived[0..32].try_into().expect("32-byte slice");
		let mac_key: [u8; 32] = derived[32..64].try_into().expect("32-byte slice");

		let mac_array: [u8; 32] = mac.try_into().expect("32-byte slice");
		let payload = crate::crypto::aead::cbc_hmac::open(
			&enc_key,
			&mac_key,
			iv.try_into().expect("16-byte slice"),
			&[],
			ciphertext,
			&mac_array,
		)
		.map_err(|_| KeyError::InvalidPassword)?;

		if payload.is_empty() || payload[0] != 0x01 {
			return Err(KeyError::Store { message: "unsupported key backup version".into() });
		}
		if payload.len() < 3 {
			return Err(KeyError::Store { message: "truncated key backup payload".into() });
		}
		let name_len = u16::from_be_bytes([payload[1], payload[2]]) as usize;
		let mut offset = 3;
		if payload.len() < offset + name_len + 32 + 64 {
			return Err(KeyError::Store { message: "truncated key backup payload".into() });
		}
		let name = String::from_utf8_lossy(&payload[offset..offset + name_len]).into_owned();
		offset += name_len;
		let public_key: [u8; 32] = payload[offset..offset + 32].try_into().expect("32 bytes");
		offset += 32;
		let private_key: [u8; 32] = payload[offset..offset + 32].try_into().expect("32 bytes");

		Ok(IdentityKeyPair::new("identity".to_string(), public_key, private_key, name))
	}

	/// Install a session key freshly derived by the transport handshake.
	/// Session keys always come from the handshake's HKDF output, identified
	/// by peer id — never re-derived per call (see DESIGN.md Open Question a).
	pub async fn install_session_key(&self, key: SessionKey) {
		self.sessions.write().await.insert(key.peer_id.clone(), key);
	}

	pub async fn session_key(&self, peer_id: &str) -> Result<SessionKey, KeyError> {
		self.sessions
			.read()
			.await
			.get(peer_id)
			.cloned()
			.ok_or_else(|| KeyError::NotFound { key_id: peer_id.to_string() })
	}

	/// Record AEAD usage against a peer's session key and report whether it
	/// has now crossed a rotation threshold.
	pub async fn record_usage(&self, peer_id: &str, bytes: u64) -> Result<bool, KeyError> {
		let mut sessions = self.sessions.write().await;
		let key = sessions
			.get_mut(peer_id)
			.ok_or_else(|| KeyError::NotFound { key_id: peer_id.to_string() })?;
		key.record_usage(bytes);
		Ok(key.needs_rotation())
	}

	pub async fn drop_session_key(&self, peer_id: &str) {
		self.sessions.write().await.remove(peer_id);
	}

	pub fn key_store(&self) -> &Arc<dyn IKeyStore> {
		&self.store
	}
}

#[derive(serde::Serialize, serde::Deserialize)]
struct IdentityBlob {
	public_key: [u8; 32],
	private_key: [u8; 32],
	device_name: String,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::keys::store::FileKeyStore;
	use tempfile::TempDir;

	async fn manager(tmp: &TempDir) -> KeyManager {
		let store: Arc<dyn IKeyStore> = Arc::new(FileKeyStore::new(tmp.path().to_path_buf(), [1u8; 32]));
		KeyManager::open_or_create(store, "test-device").await.unwrap()
	}

	#[tokio::test]
	async fn creates_and_persists_identity() {
		let tmp = TempDir::new().unwrap();
		let km1 = manager(&tmp).await;
		let fp1 = km1.identity().fingerprint();

		let km2 = manager(&tmp).await;
		let fp2 = km2.identity().fingerprint();

		assert_eq!(fp1, fp2, "identity should be loaded, not regenerated");
	}

	#[tokio::test]
	async fn session_key_lifecycle() {
		let tmp = TempDir::new().unwrap();
		let km = manager(&tmp).await;

		let key = SessionKey::new("s1".into(), [3u8; 32], "peerA".into());
		km.install_session_key(key).await;

		let loaded = km.session_key("peerA").await.unwrap();
		assert_eq!(loaded.key_id, "s1");

		let needs_rotation = km.record_usage("peerA", SessionKey::MAX_BYTES).await.unwrap();
		assert!(needs_rotation);

		km.drop_session_key("peerA").await;
		assert!(matches!(km.session_key("peerA").await, Err(KeyError::NotFound { .. })));
	}

	#[tokio::test]
	async fn peer_trust_defaults_unknown() {
		let tmp = TempDir::new().unwrap();
		let km = manager(&tmp).await;
		assert_eq!(km.trust_level("peerA").await, PeerTrust::Unknown);

		km.add_peer_key("peerA", [9u8; 32], false).await;
		assert_eq!(km.trust_level("peerA").await, PeerTrust::Pairing);

		km.mark_trusted("peerA").await;
		assert_eq!(km.trust_level("peerA").await, PeerTrust::Verified);

		km.revoke("peerA").await;
		assert_eq!(km.trust_level("peerA").await, PeerTrust::Revoked);
	}

	#[tokio::test]
	async fn add_peer_key_is_idempotent_and_preserves_verified() {
		let tmp = TempDir::new().unwrap();
		let km = manager(&tmp).await;
		km.add_peer_key("peerA", [1u8; 32], true).await;
		assert_eq!(km.trust_level("peerA").await, PeerTrust::Verified);

		km.add_peer_key("peerA", [1u8; 32], false).await;
		assert_eq!(km.trust_level("peerA").await, PeerTrust::Verified, "re-upsert shouldn't downgrade trust");
	}

	#[tokio::test]
	async fn derive_session_key_matches_between_peers() {
		let tmp_a = TempDir::new().unwrap();
		let tmp_b = TempDir::new().unwrap();
		let km_a = manager(&tmp_a).await;
		let km_b = manager(&tmp_b).await;

		let eph_a = crate::crypto::dh::generate_ephemeral();
		let eph_b = crate::crypto::dh::generate_ephemeral();
		let pub_a = eph_a.public;
		let pub_b = eph_b.public;

		// Simulate: both sides perform their half of the ECDH against a
		// shared ephemeral pair by deriving against each other's public key.
		let session_a = km_a.derive_session_key("peerB", &pub_b, true, None).await;
		let session_b = km_b.derive_session_key("peerA", &pub_a, false, None).await;
		assert!(session_a.is_ok());
		assert!(session_b.is_ok());
	}

	#[tokio::test]
	async fn get_session_key_returns_none_when_rotation_due() {
		let tmp = TempDir::new().unwrap();
		let km = manager(&tmp).await;
		let mut key = SessionKey::new("s1".into(), [3u8; 32], "peerA".into());
		key.bytes_encrypted = SessionKey::MAX_BYTES;
		km.install_session_key(key).await;

		assert!(km.get_session_key("peerA").await.is_none());
	}

	#[tokio::test]
	async fn get_session_key_refreshes_last_used() {
		let tmp = TempDir::new().unwrap();
		let km = manager(&tmp).await;
		let key = SessionKey::new("s1".into(), [3u8; 32], "peerA".into());
		km.install_session_key(key).await;

		let loaded = km.get_session_key("peerA").await;
		assert!(loaded.is_some());
	}

	#[tokio::test]
	async fn cleanup_expired_removes_rotation_due_sessions() {
		let tmp = TempDir::new().unwrap();
		let km = manager(&tmp).await;
		let mut stale = SessionKey::new("s1".into(), [3u8; 32], "peerA".into());
		stale.bytes_encrypted = SessionKey::MAX_BYTES;
		km.install_session_key(stale).await;
		km.install_session_key(SessionKey::new("s2".into(), [4u8; 32], "peerB".into())).await;

		let removed = km.cleanup_expired().await;
		assert_eq!(removed, vec!["peerA".to_string()]);
		assert!(km.session_key("peerB").await.is_ok());
	}

	#[tokio::test]
	async fn export_import_identity_round_trip() {
		let tmp = TempDir::new().unwrap();
		let km = manager(&tmp).await;
		let blob = km.export_identity(b"correct horse battery staple").unwrap();

		let imported = KeyManager::import_identity(&blob, b"correct horse battery staple").unwrap();
		assert_eq!(imported.public_key, km.identity().public_key);
		assert_eq!(imported.private_key, km.identity().private_key);
	}

	#[tokio::test]
	async fn import_identity_rejects_wrong_password() {
		let tmp = TempDir::new().unwrap();
		let km = manager(&tmp).await;
		let blob = km.export_identity(b"correct horse battery staple").unwrap();

		let result = KeyManager::import_identity(&blob, b"wrong password");
		assert!(matches!(result, Err(KeyError::InvalidPassword)));
	}
}
