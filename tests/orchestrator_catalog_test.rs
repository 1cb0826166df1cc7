//! End-to-end coverage of the local-change pipeline against real on-disk
//! backends (redb catalog, file-backed key store, checkpoint/version
//! stores) rather than the in-memory mocks the orchestrator's own unit
//! tests use.

use std::sync::Arc;

use async_trait::async_trait;
use sentinelfs_core::catalog::{Catalog, FilePath, RedbCatalog};
use sentinelfs_core::config::Config;
use sentinelfs_core::conflict::ConflictStrategy;
use sentinelfs_core::keys::{FileKeyStore, IKeyStore, KeyManager};
use sentinelfs_core::mesh::MeshOptimizer;
use sentinelfs_core::orchestrator::bandwidth::BandwidthLimiter;
use sentinelfs_core::orchestrator::checkpoint::CheckpointStore;
use sentinelfs_core::orchestrator::locker::PathLocker;
use sentinelfs_core::orchestrator::selective_sync::SelectiveSyncPolicy;
use sentinelfs_core::orchestrator::versioning::VersionStore;
use sentinelfs_core::orchestrator::{AppContext, SyncOrchestrator};
use sentinelfs_core::ports::{AllowAll, PeerSender};
use sentinelfs_core::error::TransportError;
use tempfile::TempDir;
use tokio::sync::Mutex;

struct NoopPeerSender;

#[async_trait]
impl PeerSender for NoopPeerSender {
	async fn send(&self, _peer_id: &str, _payload: Vec<u8>) -> Result<(), TransportError> {
		panic!("no peers are registered in this test; fan-out should never call send");
	}
}

async fn build_context(state_dir: &std::path::Path) -> Arc<AppContext> {
	let catalog: Arc<dyn Catalog> = Arc::new(RedbCatalog::open(&state_dir.join("catalog.db")).unwrap());
	let key_store: Arc<dyn IKeyStore> = Arc::new(FileKeyStore::new(state_dir.join("keys"), [7u8; 32]));
	let keys = Arc::new(KeyManager::open_or_create(key_store, "node-a").await.unwrap());
	let checkpoints = Arc::new(CheckpointStore::open(state_dir.join("checkpoints"), 3, 7 * 24 * 3600).await.unwrap());
	let versions =
		Arc::new(VersionStore::open(state_dir.join("versions"), 10, 30 * 24 * 3600, &[], 24 * 3600).await.unwrap());
	let locker = Arc::new(PathLocker::new());
	let bandwidth = Arc::new(BandwidthLimiter::new(None, None, 1 << 20, false, Vec::new()));
	let selective_sync = Arc::new(SelectiveSyncPolicy::new(Vec::new()));
	let mesh = Arc::new(Mutex::new(MeshOptimizer::new()));

	Arc::new(AppContext::new(
		catalog,
		keys,
		checkpoints,
		versions,
		locker,
		bandwidth,
		selective_sync,
		mesh,
		Arc::new(AllowAll),
		Arc::new(NoopPeerSender),
		Config::default(),
		"node-a".to_string(),
	))
}

#[tokio::test]
async fn local_change_persists_a_file_record() {
	let tmp = TempDir::new().unwrap();
	let ctx = build_context(tmp.path()).await;
	let orchestrator = SyncOrchestrator::new(Arc::clone(&ctx), ConflictStrategy::Timestamp);

	let path = FilePath::try_from("docs/notes.txt").unwrap();
	orchestrator.handle_local_change(path.clone(), b"hello sentinel", 1_700_000_000).await.unwrap();

	let record = ctx.catalog.get_file(&path).await.unwrap().expect("record should exist after local change");
	assert_eq!(record.size, b"hello sentinel".len() as u64);
	assert_eq!(record.version, 1);
	assert_eq!(record.device_id, "node-a");
}

#[tokio::test]
async fn second_local_change_bumps_the_version_monotonically() {
	let tmp = TempDir::new().unwrap();
	let ctx = build_context(tmp.path()).await;
	let orchestrator = SyncOrchestrator::new(Arc::clone(&ctx), ConflictStrategy::Timestamp);

	let path = FilePath::try_from("docs/notes.txt").unwrap();
	orchestrator.handle_local_change(path.clone(), b"v1", 1).await.unwrap();
	orchestrator.handle_local_change(path.clone(), b"v2 longer content", 2).await.unwrap();

	let record = ctx.catalog.get_file(&path).await.unwrap().unwrap();
	assert_eq!(record.version, 2);
	assert_eq!(record.size, b"v2 longer content".len() as u64);
}

#[tokio::test]
async fn local_delete_removes_the_catalog_entry() {
	let tmp = TempDir::new().unwrap();
	let ctx = build_context(tmp.path()).await;
	let orchestrator = SyncOrchestrator::new(Arc::clone(&ctx), ConflictStrategy::Timestamp);

	let path = FilePath::try_from("gone.txt").unwrap();
	orchestrator.handle_local_change(path.clone(), b"temporary", 1).await.unwrap();
	assert!(ctx.catalog.get_file(&path).await.unwrap().is_some());

	orchestrator.handle_local_delete(path.clone()).await.unwrap();
	assert!(ctx.catalog.get_file(&path).await.unwrap().is_none());
}

#[tokio::test]
async fn path_traversal_is_rejected_before_it_reaches_the_catalog() {
	assert!(FilePath::try_from("../../etc/passwd").is_err());
	assert!(FilePath::try_from("/etc/passwd").is_err());

	let tmp = TempDir::new().unwrap();
	let ctx = build_context(tmp.path()).await;
	assert_eq!(ctx.catalog.list_files().await.unwrap().len(), 0);
}
