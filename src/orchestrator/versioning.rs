//! File version snapshots (spec.md §4.7 "Versioning").
//!
//! On every committed change the orchestrator writes the *prior* bytes to
//! `<state_dir>/versions/<version_id>`, so `restore` always recovers what a
//! path looked like before the change that obsoleted it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use globset::Glob;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::CheckpointError;
use crate::util::hash_binary;

fn now_unix() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Tags that exempt a version from auto-pruning regardless of retention
/// limits or `important_patterns` (spec.md §4.7).
const PROTECTED_TAGS: [&str; 2] = ["important", "critical"];

/// A recorded snapshot of a path's bytes at some point in its history
/// (spec.md §3 `FileVersion`, §4.7 retention fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileVersionRecord {
	pub version_id: String,
	pub path: String,
	pub checksum: [u8; 32],
	pub size: u64,
	pub author: String,
	pub commit_message: String,
	pub created_at: u64,
	pub compressed: bool,
	pub important: bool,
	pub tags: HashSet<String>,
}

impl FileVersionRecord {
	/// Whether this version is protected from auto-pruning by tag, separate
	/// from the path-glob `important_patterns` mechanism (`important` field).
	fn tagged_protected(&self) -> bool {
		self.tags.iter().any(|t| PROTECTED_TAGS.contains(&t.as_str()))
	}
}

/// Append-only version store under `<state_dir>/versions/`. Metadata lives
/// in a single `index.json`-equivalent bincode file; payload bytes live one
/// file per version, optionally gzip-compressed once old enough.
pub struct VersionStore {
	dir: PathBuf,
	max_versions_per_path: usize,
	max_age_secs: u64,
	important_patterns: Vec<globset::GlobMatcher>,
	compress_after_secs: u64,
}

impl VersionStore {
	pub async fn open(
		dir: PathBuf,
		max_versions_per_path: usize,
		max_age_secs: u64,
		important_patterns: &[String],
		compress_after_secs: u64,
	) -> Result<Self, CheckpointError> {
		tokio::fs::create_dir_all(&dir).await?;
		let patterns = important_patterns
			.iter()
			.filter_map(|p| Glob::new(p).ok())
			.map(|g| g.compile_matcher())
			.collect();
		Ok(VersionStore {
			dir,
			max_versions_per_path,
			max_age_secs,
			important_patterns: patterns,
			compress_after_secs,
		})
	}

	fn index_path(&self) -> PathBuf {
		self.dir.join("index.bin")
	}

	async fn load_index(&self) -> Vec<FileVersionRecord> {
		match tokio::fs::read(self.index_path()).await {
			Ok(raw) => bincode::deserialize(&raw).unwrap_or_default(),
			Err(_) => Vec::new(),
		}
	}

	async fn save_index(&self, records: &[FileVersionRecord]) -> Result<(), CheckpointError> {
		let encoded = bincode::serialize(records)
			.map_err(|e| CheckpointError::Corrupted { message: e.to_string() })?;
		tokio::fs::write(self.index_path(), encoded).await?;
		Ok(())
	}

	fn is_important(&self, path: &str) -> bool {
		self.important_patterns.iter().any(|m| m.is_match(path))
	}

	fn blob_path(&self, version_id: &str, compressed: bool) -> PathBuf {
		if compressed {
			self.dir.join(format!("{version_id}.gz"))
		} else {
			self.dir.join(version_id)
		}
	}

	/// Snapshot `prior_bytes` under a fresh version id, then prune per the
	/// retention policy (spec.md §4.7). `tags` is additional to path-glob
	/// `important_patterns`; either `important`/`critical` tag exempts this
	/// version from auto-pruning.
	pub async fn create(
		&self,
		path: &str,
		prior_bytes: &[u8],
		commit_message: &str,
		author: &str,
		tags: HashSet<String>,
	) -> Result<FileVersionRecord, CheckpointError> {
		let version_id = format!("{}-{}", now_unix(), uuid::Uuid::new_v4());
		tokio::fs::write(self.blob_path(&version_id, false), prior_bytes).await?;

		let record = FileVersionRecord {
			version_id,
			path: path.to_string(),
			checksum: hash_binary(prior_bytes),
			size: prior_bytes.len() as u64,
			author: author.to_string(),
			commit_message: commit_message.to_string(),
			created_at: now_unix(),
			compressed: false,
			important: self.is_important(path),
			tags,
		};

		let mut records = self.load_index().await;
		records.push(record.clone());
		self.save_index(&records).await?;
		self.prune(path).await?;
		Ok(record)
	}

	/// Compress versions older than `compress_after_secs`, in place.
	pub async fn compress_aged(&self) -> Result<(), CheckpointError> {
		let now = now_unix();
		let mut records = self.load_index().await;
		let mut changed = false;
		for record in &mut records {
			if record.compressed || now.saturating_sub(record.created_at) < self.compress_after_secs {
				continue;
			}
			let raw = tokio::fs::read(self.blob_path(&record.version_id, false)).await?;
			let compressed = gzip_compress(&raw)?;
			tokio::fs::write(self.blob_path(&record.version_id, true), compressed).await?;
			tokio::fs::remove_file(self.blob_path(&record.version_id, false)).await?;
			record.compressed = true;
			changed = true;
		}
		if changed {
			self.save_index(&records).await?;
		}
		Ok(())
	}

	/// Enforce `max_versions_per_path`/`max_age_secs`, never deleting
	/// `important`-tagged versions or ones matching `important_patterns`.
	async fn prune(&self, path: &str) -> Result<(), CheckpointError> {
		let now = now_unix();
		let mut records = self.load_index().await;

		let mut for_path: Vec<usize> = records
			.iter()
			.enumerate()
			.filter(|(_, r)| r.path == path && !r.important && !r.tagged_protected())
			.map(|(i, _)| i)
			.collect();
		for_path.sort_by_key(|&i| records[i].created_at);

		let mut to_remove = std::collections::HashSet::new();
		if for_path.len() > self.max_versions_per_path {
			for &i in &for_path[..for_path.len() - self.max_versions_per_path] {
				to_remove.insert(i);
			}
		}
		for &i in &for_path {
			if now.saturating_sub(records[i].created_at) > self.max_age_secs {
				to_remove.insert(i);
			}
		}

		if to_remove.is_empty() {
			return Ok(());
		}

		for &i in &to_remove {
			let record = &records[i];
			let blob = self.blob_path(&record.version_id, record.compressed);
			let _ = tokio::fs::remove_file(blob).await;
		}
		let mut index = 0;
		records.retain(|_| {
			let keep = !to_remove.contains(&index);
			index += 1;
			keep
		});
		self.save_index(&records).await
	}

	pub async fn list(&self, path: &str) -> Vec<FileVersionRecord> {
		self.load_index().await.into_iter().filter(|r| r.path == path).collect()
	}

	/// Stream a version's bytes back, decompressing on the fly if needed
	/// (spec.md §4.7 `restore`).
	pub async fn restore(&self, version_id: &str) -> Result<Vec<u8>, CheckpointError> {
		let records = self.load_index().await;
		let record = records
			.iter()
			.find(|r| r.version_id == version_id)
			.ok_or_else(|| CheckpointError::NotFound { transfer_id: version_id.to_string() })?;

		let raw = tokio::fs::read(self.blob_path(version_id, record.compressed)).await?;
		if record.compressed {
			gzip_decompress(&raw)
		} else {
			Ok(raw)
		}
	}
}

fn gzip_compress(data: &[u8]) -> Result<Vec<u8>, CheckpointError> {
	use flate2::write::GzEncoder;
	use flate2::Compression;
	use std::io::Write;
	let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
	encoder.write_all(data).map_err(CheckpointError::Io)?;
	encoder.finish().map_err(CheckpointError::Io)
}

fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>, CheckpointError> {
	use flate2::read::GzDecoder;
	use std::io::Read;
	let mut decoder = GzDecoder::new(data);
	let mut out = Vec::new();
	decoder.read_to_end(&mut out).map_err(CheckpointError::Io)?;
	Ok(out)
}

#[allow(dead_code)]
async fn read_all(path: &Path) -> Result<Vec<u8>, CheckpointError> {
	let mut file = tokio::fs::File::open(path).await?;
	let mut buf = Vec::new();
	file.read_to_end(&mut buf).await?;
	Ok(buf)
}

#[allow(dead_code)]
async fn write_all(path: &Path, data: &[u8]) -> Result<(), CheckpointError> {
	let mut file = tokio::fs::File::create(path).await?;
	file.write_all(data).await?;
	Ok(())
}
