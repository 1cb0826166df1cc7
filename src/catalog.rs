//! The Catalog port: the abstract metadata store the orchestrator consumes
//! (spec.md §2.J — "relational metadata store... specified only as the
//! interface the orchestrator consumes: upsert/get/list for files and
//! peers"). Grounded on the teacher's `cache::ChildCache` for the `redb`
//! table layout and transaction shape; generalized from a single
//! mtime-keyed table to the full `FileRecord`/`PeerLink` schema of spec.md §3.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

const FILES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("files");
const PEERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("peers");

/// A normalized, POSIX-style relative path rooted at the sync root.
/// Construction is the path-traversal guard itself (spec.md §3, §7
/// `PathTraversal`): an absolute path or one containing `..` simply cannot
/// become a `FilePath` value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FilePath(String);

impl FilePath {
	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn as_path(&self) -> &Path {
		Path::new(&self.0)
	}
}

impl std::fmt::Display for FilePath {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl TryFrom<&str> for FilePath {
	type Error = CatalogError;

	fn try_from(value: &str) -> Result<Self, Self::Error> {
		let path = Path::new(value);
		if path.is_absolute() {
			return Err(CatalogError::Backend {
				message: format!("path traversal rejected: absolute path {:?}", value),
			});
		}
		if path.components().any(|c| matches!(c, Component::ParentDir)) {
			return Err(CatalogError::Backend {
				message: format!("path traversal rejected: '..' component in {:?}", value),
			});
		}
		let normalized = path
			.components()
			.map(|c| c.as_os_str().to_string_lossy().into_owned())
			.collect::<Vec<_>>()
			.join("/");
		Ok(FilePath(normalized))
	}
}

impl TryFrom<String> for FilePath {
	type Error = CatalogError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		FilePath::try_from(value.as_str())
	}
}

/// Conflict lifecycle state for a `FileRecord` (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictState {
	None,
	Conflicted,
	Resolved,
}

/// Catalog row for a single synchronized file (spec.md §3 `FileRecord`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
	pub path: FilePath,
	pub content_hash: [u8; 32],
	pub size: u64,
	pub mtime: u64,
	pub device_id: String,
	pub version: u32,
	pub conflict_state: ConflictState,
}

impl FileRecord {
	pub fn new_local(path: FilePath, content_hash: [u8; 32], size: u64, mtime: u64, device_id: &str) -> Self {
		FileRecord {
			path,
			content_hash,
			size,
			mtime,
			device_id: device_id.to_string(),
			version: 1,
			conflict_state: ConflictState::None,
		}
	}

	/// Advance to the next version after a local or applied-remote change.
	/// `version` is strictly monotonic per path and never reused (invariant,
	/// spec.md §3).
	pub fn bump(&mut self, content_hash: [u8; 32], size: u64, mtime: u64, device_id: &str) {
		self.content_hash = content_hash;
		self.size = size;
		self.mtime = mtime;
		self.device_id = device_id.to_string();
		self.version = self.version.checked_add(1).expect("version counter overflow");
	}
}

/// A peer overlay link, input to the mesh optimizer (spec.md §3 `PeerLink`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerLink {
	pub peer_id: String,
	pub address: String,
	pub port: u16,
	pub latency_ms: f64,
	pub bandwidth_mbps: f64,
	pub active: bool,
	pub last_seen: u64,
}

/// Abstract port consumed by the orchestrator: upsert/get/list for files and
/// peers. The source's relational metadata DB sits behind this trait; this
/// crate's default adapter is `redb` (the teacher already depends on it for
/// `cache::ChildCache`), not a relational engine — spec.md §6 frames the
/// catalog as "an abstract interface... implementation detail."
#[async_trait]
pub trait Catalog: Send + Sync {
	async fn upsert_file(&self, record: FileRecord) -> Result<(), CatalogError>;
	async fn get_file(&self, path: &FilePath) -> Result<Option<FileRecord>, CatalogError>;
	async fn list_files(&self) -> Result<Vec<FileRecord>, CatalogError>;
	async fn remove_file(&self, path: &FilePath) -> Result<(), CatalogError>;

	async fn upsert_peer(&self, link: PeerLink) -> Result<(), CatalogError>;
	async fn get_peer(&self, peer_id: &str) -> Result<Option<PeerLink>, CatalogError>;
	async fn list_peers(&self) -> Result<Vec<PeerLink>, CatalogError>;
}

/// In-memory `Catalog`, used by tests and by `AppContext` mocks (spec.md §9
/// Design Notes: "Tests inject a mock context").
#[derive(Default)]
pub struct InMemoryCatalog {
	files: RwLock<HashMap<String, FileRecord>>,
	peers: RwLock<HashMap<String, PeerLink>>,
}

impl InMemoryCatalog {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl Catalog for InMemoryCatalog {
	async fn upsert_file(&self, record: FileRecord) -> Result<(), CatalogError> {
		self.files.write().unwrap().insert(record.path.as_str().to_string(), record);
		Ok(())
	}

	async fn get_file(&self, path: &FilePath) -> Result<Option<FileRecord>, CatalogError> {
		Ok(self.files.read().unwrap().get(path.as_str()).cloned())
	}

	async fn list_files(&self) -> Result<Vec<FileRecord>, CatalogError> {
		Ok(self.files.read().unwrap().values().cloned().collect())
	}

	async fn remove_file(&self, path: &FilePath) -> Result<(), CatalogError> {
		self.files.write().unwrap().remove(path.as_str());
		Ok(())
	}

	async fn upsert_peer(&self, link: PeerLink) -> Result<(), CatalogError> {
		self.peers.write().unwrap().insert(link.peer_id.clone(), link);
		Ok(())
	}

	async fn get_peer(&self, peer_id: &str) -> Result<Option<PeerLink>, CatalogError> {
		Ok(self.peers.read().unwrap().get(peer_id).cloned())
	}

	async fn list_peers(&self) -> Result<Vec<PeerLink>, CatalogError> {
		Ok(self.peers.read().unwrap().values().cloned().collect())
	}
}

/// Default `Catalog` adapter: one `redb` database under `<state_dir>/catalog.db`,
/// mirroring `cache::ChildCache`'s table-per-entity layout.
pub struct RedbCatalog {
	db: redb::Database,
}

impl RedbCatalog {
	pub fn open(db_path: &Path) -> Result<Self, CatalogError> {
		let db = redb::Database::create(db_path)
			.map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		{
			let write_txn =
				db.begin_write().map_err(|e| CatalogError::Backend { message: e.to_string() })?;
			let _ = write_txn
				.open_table(FILES_TABLE)
				.map_err(|e| CatalogError::Backend { message: e.to_string() })?;
			let _ = write_txn
				.open_table(PEERS_TABLE)
				.map_err(|e| CatalogError::Backend { message: e.to_string() })?;
			write_txn.commit().map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		}
		Ok(RedbCatalog { db })
	}

	pub fn path_hint(db_path: &Path) -> PathBuf {
		db_path.to_path_buf()
	}
}

#[async_trait]
impl Catalog for RedbCatalog {
	async fn upsert_file(&self, record: FileRecord) -> Result<(), CatalogError> {
		let encoded = bincode::serialize(&record)
			.map_err(|e| CatalogError::Serialization { message: e.to_string() })?;
		let write_txn =
			self.db.begin_write().map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		{
			let mut table = write_txn
				.open_table(FILES_TABLE)
				.map_err(|e| CatalogError::Backend { message: e.to_string() })?;
			table
				.insert(record.path.as_str(), encoded.as_slice())
				.map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		}
		write_txn.commit().map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		Ok(())
	}

	async fn get_file(&self, path: &FilePath) -> Result<Option<FileRecord>, CatalogError> {
		let read_txn =
			self.db.begin_read().map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		let table = read_txn
			.open_table(FILES_TABLE)
			.map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		match table.get(path.as_str()).map_err(|e| CatalogError::Backend { message: e.to_string() })? {
			Some(entry) => {
				let record: FileRecord = bincode::deserialize(&entry.value().to_vec())
					.map_err(|e| CatalogError::Serialization { message: e.to_string() })?;
				Ok(Some(record))
			}
			None => Ok(None),
		}
	}

	async fn list_files(&self) -> Result<Vec<FileRecord>, CatalogError> {
		let read_txn =
			self.db.begin_read().map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		let table = read_txn
			.open_table(FILES_TABLE)
			.map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		let mut out = Vec::new();
		for entry in table.iter().map_err(|e| CatalogError::Backend { message: e.to_string() })? {
			let (_, value) = entry.map_err(|e| CatalogError::Backend { message: e.to_string() })?;
			let record: FileRecord = bincode::deserialize(&value.value().to_vec())
				.map_err(|e| CatalogError::Serialization { message: e.to_string() })?;
			out.push(record);
		}
		Ok(out)
	}

	async fn remove_file(&self, path: &FilePath) -> Result<(), CatalogError> {
		let write_txn =
			self.db.begin_write().map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		{
			let mut table = write_txn
				.open_table(FILES_TABLE)
				.map_err(|e| CatalogError::Backend { message: e.to_string() })?;
			table
				.remove(path.as_str())
				.map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		}
		write_txn.commit().map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		Ok(())
	}

	async fn upsert_peer(&self, link: PeerLink) -> Result<(), CatalogError> {
		let encoded = bincode::serialize(&link)
			.map_err(|e| CatalogError::Serialization { message: e.to_string() })?;
		let write_txn =
			self.db.begin_write().map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		{
			let mut table = write_txn
				.open_table(PEERS_TABLE)
				.map_err(|e| CatalogError::Backend { message: e.to_string() })?;
			table
				.insert(link.peer_id.as_str(), encoded.as_slice())
				.map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		}
		write_txn.commit().map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		Ok(())
	}

	async fn get_peer(&self, peer_id: &str) -> Result<Option<PeerLink>, CatalogError> {
		let read_txn =
			self.db.begin_read().map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		let table = read_txn
			.open_table(PEERS_TABLE)
			.map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		match table.get(peer_id).map_err(|e| CatalogError::Backend { message: e.to_string() })? {
			Some(entry) => {
				let link: PeerLink = bincode::deserialize(&entry.value().to_vec())
					.map_err(|e| CatalogError::Serialization { message: e.to_string() })?;
				Ok(Some(link))
			}
			None => Ok(None),
		}
	}

	async fn list_peers(&self) -> Result<Vec<PeerLink>, CatalogError> {
		let read_txn =
			self.db.begin_read().map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		let table = read_txn
			.open_table(PEERS_TABLE)
			.map_err(|e| CatalogError::Backend { message: e.to_string() })?;
		let mut out = Vec::new();
		for entry in table.iter().map_err(|e| CatalogError::Backend { message: e.to_string() })? {
			let (_, value) = entry.map_err(|e| CatalogError::Backend { message: e.to_string() })?;
			let link: PeerLink = bincode::deserialize(&value.value().to_vec())
				.map_err(|e| CatalogError::Serialization { message: e.to_string() })?;
			out.push(link);
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn file_path_rejects_absolute() {
		assert!(FilePath::try_from("/etc/passwd").is_err());
	}

	#[test]
	fn file_path_rejects_parent_dir_escape() {
		assert!(FilePath::try_from("../../etc/passwd").is_err());
		assert!(FilePath::try_from("docs/../../escape.txt").is_err());
	}

	#[test]
	fn file_path_accepts_normal_relative_path() {
		let p = FilePath::try_from("notes/today.txt").unwrap();
		assert_eq!(p.as_str(), "notes/today.txt");
	}

	#[tokio::test]
	async fn in_memory_catalog_roundtrip() {
		let catalog = InMemoryCatalog::new();
		let path = FilePath::try_from("a.txt").unwrap();
		let record = FileRecord::new_local(path.clone(), [1u8; 32], 5, 100, "device-a");
		catalog.upsert_file(record.clone()).await.unwrap();

		let loaded = catalog.get_file(&path).await.unwrap().unwrap();
		assert_eq!(loaded.version, 1);
		assert_eq!(loaded.content_hash, [1u8; 32]);

		let files = catalog.list_files().await.unwrap();
		assert_eq!(files.len(), 1);

		catalog.remove_file(&path).await.unwrap();
		assert!(catalog.get_file(&path).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn in_memory_catalog_peer_roundtrip() {
		let catalog = InMemoryCatalog::new();
		let link = PeerLink {
			peer_id: "peerA".into(),
			address: "127.0.0.1".into(),
			port: 9000,
			latency_ms: 12.5,
			bandwidth_mbps: 100.0,
			active: true,
			last_seen: 1000,
		};
		catalog.upsert_peer(link).await.unwrap();
		let loaded = catalog.get_peer("peerA").await.unwrap().unwrap();
		assert_eq!(loaded.port, 9000);
		assert_eq!(catalog.list_peers().await.unwrap().len(), 1);
	}

	#[test]
	fn file_record_version_is_monotonic() {
		let path = FilePath::try_from("a.txt").unwrap();
		let mut record = FileRecord::new_local(path, [0u8; 32], 0, 0, "device-a");
		assert_eq!(record.version, 1);
		record.bump([1u8; 32], 10, 200, "device-b");
		assert_eq!(record.version, 2);
		assert_eq!(record.device_id, "device-b");
	}
}
