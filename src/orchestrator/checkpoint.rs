//! Resumable-transfer checkpoints (spec.md §4.7 "Checkpoints").
//!
//! One append-safe file per transfer under `<state_dir>/checkpoints/`,
//! rewritten wholesale after every chunk (small, bounded records — the
//! teacher's own state files follow the same write-whole-file-each-time
//! idiom rather than a WAL).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::CheckpointError;
use crate::util::hash_binary;

fn now_unix() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Per-transfer resumable-upload/download state (spec.md §4.7 exact field
/// list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
	pub transfer_id: String,
	pub path: String,
	pub peer_id: String,
	pub total_size: u64,
	pub completed_chunks: Vec<u32>,
	pub chunk_size: u32,
	pub checksum: [u8; 32],
	pub retries: u32,
	pub created_at: u64,
	pub failed: bool,
}

impl Checkpoint {
	pub fn new(
		transfer_id: impl Into<String>,
		path: impl Into<String>,
		peer_id: impl Into<String>,
		total_size: u64,
		chunk_size: u32,
		checksum: [u8; 32],
	) -> Self {
		Checkpoint {
			transfer_id: transfer_id.into(),
			path: path.into(),
			peer_id: peer_id.into(),
			total_size,
			completed_chunks: Vec::new(),
			chunk_size,
			checksum,
			retries: 0,
			created_at: now_unix(),
			failed: false,
		}
	}

	/// First chunk index not yet recorded as completed — where recovery
	/// resumes from (spec.md §4.7: "resumes from `min(missing_chunks)`").
	pub fn resume_from(&self) -> u32 {
		let total_chunks = self.total_size.div_ceil(self.chunk_size.max(1) as u64) as u32;
		(0..total_chunks).find(|i| !self.completed_chunks.contains(i)).unwrap_or(total_chunks)
	}

	pub fn is_complete(&self) -> bool {
		let total_chunks = self.total_size.div_ceil(self.chunk_size.max(1) as u64) as u32;
		self.completed_chunks.len() as u32 >= total_chunks
	}
}

/// Persists checkpoints to `<state_dir>/checkpoints/<transfer_id>.ckpt` and
/// runs the periodic recovery sweep (spec.md §4.7).
pub struct CheckpointStore {
	dir: PathBuf,
	max_retries: u32,
	max_age_secs: u64,
	cache: RwLock<HashMap<String, Checkpoint>>,
}

impl CheckpointStore {
	pub async fn open(dir: PathBuf, max_retries: u32, max_age_secs: u64) -> Result<Self, CheckpointError> {
		tokio::fs::create_dir_all(&dir).await?;
		let mut cache = HashMap::new();
		let mut entries = tokio::fs::read_dir(&dir).await?;
		while let Some(entry) = entries.next_entry().await? {
			let path = entry.path();
			if path.extension().and_then(|e| e.to_str()) != Some("ckpt") {
				continue;
			}
			let raw = tokio::fs::read(&path).await?;
			let checkpoint: Checkpoint = bincode::deserialize(&raw)
				.map_err(|e| CheckpointError::Corrupted { message: e.to_string() })?;
			cache.insert(checkpoint.transfer_id.clone(), checkpoint);
		}
		Ok(CheckpointStore { dir, max_retries, max_age_secs, cache: RwLock::new(cache) })
	}

	fn path_for(&self, transfer_id: &str) -> PathBuf {
		self.dir.join(format!("{transfer_id}.ckpt"))
	}

	async fn persist(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
		let encoded = bincode::serialize(checkpoint)
			.map_err(|e| CheckpointError::Corrupted { message: e.to_string() })?;
		tokio::fs::write(self.path_for(&checkpoint.transfer_id), encoded).await?;
		Ok(())
	}

	/// Record one completed chunk, rewriting the checkpoint file.
	pub async fn record_chunk(
		&self,
		transfer_id: &str,
		chunk_index: u32,
	) -> Result<(), CheckpointError> {
		let mut cache = self.cache.write().await;
		let checkpoint = cache
			.get_mut(transfer_id)
			.ok_or_else(|| CheckpointError::NotFound { transfer_id: transfer_id.to_string() })?;
		if !checkpoint.completed_chunks.contains(&chunk_index) {
			checkpoint.completed_chunks.push(chunk_index);
		}
		let snapshot = checkpoint.clone();
		drop(cache);
		self.persist(&snapshot).await
	}

	pub async fn start(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
		self.persist(&checkpoint).await?;
		self.cache.write().await.insert(checkpoint.transfer_id.clone(), checkpoint);
		Ok(())
	}

	pub async fn get(&self, transfer_id: &str) -> Option<Checkpoint> {
		self.cache.read().await.get(transfer_id).cloned()
	}

	pub async fn complete(&self, transfer_id: &str) -> Result<(), CheckpointError> {
		self.cache.write().await.remove(transfer_id);
		let path = self.path_for(transfer_id);
		if path.exists() {
			tokio::fs::remove_file(path).await?;
		}
		Ok(())
	}

	/// Recovery sweep (spec.md §4.7): for each pending checkpoint, verify the
	/// partial file's checksum still matches and resume; bump retries on
	/// checksum mismatch, moving to "failed" past `max_retries`; purge
	/// checkpoints older than `max_age_secs` regardless of state.
	pub async fn recover(&self, partial_bytes: impl Fn(&str) -> Option<Vec<u8>>) -> Vec<String> {
		let mut resumed = Vec::new();
		let now = now_unix();
		let mut to_purge = Vec::new();
		let mut to_persist = Vec::new();

		{
			let mut cache = self.cache.write().await;
			for (transfer_id, checkpoint) in cache.iter_mut() {
				if checkpoint.failed {
					continue;
				}
				if now.saturating_sub(checkpoint.created_at) > self.max_age_secs {
					to_purge.push(transfer_id.clone());
					continue;
				}
				if checkpoint.is_complete() {
					continue;
				}
				let Some(bytes) = partial_bytes(&checkpoint.path) else { continue };
				if hash_binary(&bytes) == checkpoint.checksum {
					resumed.push(transfer_id.clone());
				} else {
					checkpoint.retries += 1;
					if checkpoint.retries > self.max_retries {
						checkpoint.failed = true;
					}
					to_persist.push(checkpoint.clone());
				}
			}
			for transfer_id in &to_purge {
				cache.remove(transfer_id);
			}
		}

		for checkpoint in &to_persist {
			let _ = self.persist(checkpoint).await;
		}
		for transfer_id in &to_purge {
			let _ = tokio::fs::remove_file(self.path_for(transfer_id)).await;
		}

		resumed
	}

	pub fn checkpoint_dir(&self) -> &Path {
		&self.dir
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn resume_from_skips_completed_prefix() {
		let mut checkpoint = Checkpoint::new("t1", "a.bin", "peerA", 10 * 1024 * 1024, 1024 * 1024, [0u8; 32]);
		checkpoint.completed_chunks = vec![0, 1, 2, 3];
		assert_eq!(checkpoint.resume_from(), 4);
	}

	#[tokio::test]
	async fn start_and_record_chunk_persists() {
		let tmp = TempDir::new().unwrap();
		let store = CheckpointStore::open(tmp.path().to_path_buf(), 3, 7 * 24 * 3600).await.unwrap();
		let checkpoint = Checkpoint::new("t1", "a.bin", "peerA", 10, 5, [1u8; 32]);
		store.start(checkpoint).await.unwrap();
		store.record_chunk("t1", 0).await.unwrap();

		let reopened = CheckpointStore::open(tmp.path().to_path_buf(), 3, 7 * 24 * 3600).await.unwrap();
		let loaded = reopened.get("t1").await.unwrap();
		assert_eq!(loaded.completed_chunks, vec![0]);
	}

	#[tokio::test]
	async fn complete_removes_checkpoint_file() {
		let tmp = TempDir::new().unwrap();
		let store = CheckpointStore::open(tmp.path().to_path_buf(), 3, 7 * 24 * 3600).await.unwrap();
		store.start(Checkpoint::new("t1", "a.bin", "peerA", 10, 5, [1u8; 32])).await.unwrap();
		store.complete("t1").await.unwrap();
		assert!(store.get("t1").await.is_none());
		assert!(!store.checkpoint_dir().join("t1.ckpt").exists());
	}

	#[tokio::test]
	async fn recover_resumes_when_checksum_matches() {
		let tmp = TempDir::new().unwrap();
		let store = CheckpointStore::open(tmp.path().to_path_buf(), 3, 7 * 24 * 3600).await.unwrap();
		let checksum = hash_binary(b"partial");
		store.start(Checkpoint::new("t1", "a.bin", "peerA", 100, 5, checksum)).await.unwrap();

		let resumed = store.recover(|_path| Some(b"partial".to_vec())).await;
		assert_eq!(resumed, vec!["t1".to_string()]);
	}

	#[tokio::test]
	async fn recover_fails_transfer_past_max_retries() {
		let tmp = TempDir::new().unwrap();
		let store = CheckpointStore::open(tmp.path().to_path_buf(), 0, 7 * 24 * 3600).await.unwrap();
		store.start(Checkpoint::new("t1", "a.bin", "peerA", 100, 5, [9u8; 32])).await.unwrap();

		store.recover(|_path| Some(b"mismatched content".to_vec())).await;
		let checkpoint = store.get("t1").await.unwrap();
		assert!(checkpoint.failed);
	}
}
