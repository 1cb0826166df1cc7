//! Exercises the `redb`-backed `Catalog` adapter against a real on-disk
//! database rather than the in-memory mock the orchestrator's unit tests
//! use for speed.

use sentinelfs_core::catalog::{Catalog, FilePath, FileRecord, PeerLink, RedbCatalog};
use tempfile::TempDir;

fn sample_record(path: &str, version: u32) -> FileRecord {
	let mut record =
		FileRecord::new_local(FilePath::try_from(path).unwrap(), [1u8; 32], 42, 1_700_000_000, "node-a");
	record.version = version;
	record
}

#[tokio::test]
async fn upsert_then_get_round_trips_a_file_record() {
	let tmp = TempDir::new().unwrap();
	let catalog = RedbCatalog::open(&tmp.path().join("catalog.db")).unwrap();

	let path = FilePath::try_from("a/b/c.txt").unwrap();
	catalog.upsert_file(sample_record("a/b/c.txt", 1)).await.unwrap();

	let fetched = catalog.get_file(&path).await.unwrap().expect("record should be present");
	assert_eq!(fetched.size, 42);
	assert_eq!(fetched.version, 1);
	assert_eq!(fetched.device_id, "node-a");
}

#[tokio::test]
async fn list_files_reflects_every_upsert() {
	let tmp = TempDir::new().unwrap();
	let catalog = RedbCatalog::open(&tmp.path().join("catalog.db")).unwrap();

	catalog.upsert_file(sample_record("one.txt", 1)).await.unwrap();
	catalog.upsert_file(sample_record("two.txt", 1)).await.unwrap();
	catalog.upsert_file(sample_record("three.txt", 1)).await.unwrap();

	let mut paths: Vec<String> =
		catalog.list_files().await.unwrap().into_iter().map(|r| r.path.as_str().to_string()).collect();
	paths.sort();
	assert_eq!(paths, vec!["one.txt".to_string(), "three.txt".to_string(), "two.txt".to_string()]);
}

#[tokio::test]
async fn remove_file_deletes_the_row() {
	let tmp = TempDir::new().unwrap();
	let catalog = RedbCatalog::open(&tmp.path().join("catalog.db")).unwrap();
	let path = FilePath::try_from("gone.txt").unwrap();

	catalog.upsert_file(sample_record("gone.txt", 1)).await.unwrap();
	assert!(catalog.get_file(&path).await.unwrap().is_some());

	catalog.remove_file(&path).await.unwrap();
	assert!(catalog.get_file(&path).await.unwrap().is_none());
}

#[tokio::test]
async fn peer_links_persist_independently_of_files() {
	let tmp = TempDir::new().unwrap();
	let catalog = RedbCatalog::open(&tmp.path().join("catalog.db")).unwrap();

	let link = PeerLink {
		peer_id: "peer-1".to_string(),
		address: "10.0.0.5".to_string(),
		port: 8080,
		latency_ms: 12.5,
		bandwidth_mbps: 100.0,
		active: true,
		last_seen: 1_700_000_000,
	};
	catalog.upsert_peer(link.clone()).await.unwrap();

	let fetched = catalog.get_peer("peer-1").await.unwrap().expect("peer should be present");
	assert_eq!(fetched.address, "10.0.0.5");
	assert_eq!(catalog.list_peers().await.unwrap().len(), 1);
	assert!(catalog.get_file(&FilePath::try_from("peer-1").unwrap()).await.unwrap().is_none());
}

#[test]
fn file_path_rejects_absolute_and_parent_traversal() {
	assert!(FilePath::try_from("/etc/shadow").is_err());
	assert!(FilePath::try_from("../escape.txt").is_err());
	assert!(FilePath::try_from("nested/../../escape.txt").is_err());
	assert!(FilePath::try_from("nested/ok.txt").is_ok());
}
