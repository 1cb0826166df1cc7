//! Sync orchestrator: owns the local-event and inbound-delta pipelines, the
//! periodic maintenance loop, and the `AppContext` that wires every other
//! module together (spec.md §4.5, §9 "Design Notes").
//!
//! `AppContext` is a plain struct, not a singleton or a thread-local: it is
//! built once in the binary's `main` and handed to the orchestrator and to
//! whatever adapters implement `ports::PeerSender`/`ports::AccessPolicy`.
//! Cross-module calls go through trait objects (`Catalog`, `PeerSender`,
//! `AccessPolicy`) rather than back-references, so nothing here needs a
//! cyclic `Arc`.

pub mod bandwidth;
pub mod checkpoint;
pub mod locker;
pub mod selective_sync;
pub mod versioning;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::catalog::{Catalog, ConflictState, FilePath, FileRecord};
use crate::config::Config;
use crate::conflict::strategy::{self, ConflictSide, ConflictStrategy};
use crate::delta::{self, BlockIndex, Delta, DEFAULT_BLOCK_SIZE};
use crate::error::SyncError;
use crate::keys::{KeyManager, PeerTrust};
use crate::logging::*;
use crate::mesh::MeshOptimizer;
use crate::ports::{AccessPolicy, PeerSender};
use crate::util::hash_binary;

use bandwidth::{BandwidthLimiter, Direction};
use checkpoint::CheckpointStore;
use locker::{LockMode, PathLocker};
use selective_sync::SelectiveSyncPolicy;
use versioning::VersionStore;

fn now_unix() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn current_local_hour() -> u8 {
	((now_unix() / 3600) % 24) as u8
}

/// Crude text/binary classifier for `conflict::strategy::resolve`'s `is_text`
/// parameter: valid UTF-8 with no embedded NUL is treated as mergeable text.
fn looks_like_text(bytes: &[u8]) -> bool {
	!bytes.contains(&0) && std::str::from_utf8(bytes).is_ok()
}

/// Wire body of a propagated change (spec.md §6 delta serialization: the
/// `Delta` type alone only carries the *new*-content hash, so the
/// orchestrator's wire format wraps it with the path and the pre-change hash
/// the receiver needs for conflict detection).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeltaMessageBody {
	path: String,
	/// SHA-256 of the content this delta was computed against.
	old_hash: [u8; 32],
	/// Catalog version the sender believed this path was at before the change.
	base_version: u32,
	delta: Delta,
	author: String,
	/// `true` when this message announces a deletion rather than a content
	/// change; `delta`/`old_hash` are then ignored by the receiver.
	deleted: bool,
}

/// A signed, wire-ready change notification (spec.md §4.5 step "Peer
/// fan-out" / "Authenticate record"). Signed with the sender's Ed25519
/// identity key so a receiver can authenticate it against a pinned peer key
/// before trusting anything in `body`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaMessage {
	body: DeltaMessageBody,
	signature: Vec<u8>,
}

impl DeltaMessage {
	fn sign(body: DeltaMessageBody, keys: &KeyManager) -> Result<Self, SyncError> {
		let encoded = bincode::serialize(&body)
			.map_err(|e| SyncError::Other { message: format!("delta message encode failed: {e}") })?;
		let signature = keys.sign(&encoded).to_bytes().to_vec();
		Ok(DeltaMessage { body, signature })
	}

	/// Verify the signature against `sender_pubkey` and, on success, hand
	/// back the authenticated body.
	fn open(self, sender_pubkey: &[u8; 32]) -> Result<DeltaMessageBody, SyncError> {
		let encoded = bincode::serialize(&self.body)
			.map_err(|e| SyncError::Other { message: format!("delta message encode failed: {e}") })?;
		let sig_bytes: [u8; 64] = self
			.signature
			.as_slice()
			.try_into()
			.map_err(|_| SyncError::Other { message: "malformed delta message signature".to_string() })?;
		let signature = Signature::from_bytes(&sig_bytes);
		if !KeyManager::verify(&encoded, &signature, sender_pubkey) {
			return Err(SyncError::Other { message: "delta message signature verification failed".to_string() });
		}
		Ok(self.body)
	}
}

/// Every subsystem the orchestrator depends on, aggregated in one place
/// (spec.md §9: "a plain struct built once, not a singleton").
pub struct AppContext {
	pub catalog: Arc<dyn Catalog>,
	pub keys: Arc<KeyManager>,
	pub checkpoints: Arc<CheckpointStore>,
	pub versions: Arc<VersionStore>,
	pub locker: Arc<PathLocker>,
	pub bandwidth: Arc<BandwidthLimiter>,
	pub selective_sync: Arc<SelectiveSyncPolicy>,
	pub mesh: Arc<Mutex<MeshOptimizer>>,
	pub access_policy: Arc<dyn AccessPolicy>,
	pub peer_sender: Arc<dyn PeerSender>,
	pub config: Config,
	pub local_peer_id: String,
}

impl AppContext {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		catalog: Arc<dyn Catalog>,
		keys: Arc<KeyManager>,
		checkpoints: Arc<CheckpointStore>,
		versions: Arc<VersionStore>,
		locker: Arc<PathLocker>,
		bandwidth: Arc<BandwidthLimiter>,
		selective_sync: Arc<SelectiveSyncPolicy>,
		mesh: Arc<Mutex<MeshOptimizer>>,
		access_policy: Arc<dyn AccessPolicy>,
		peer_sender: Arc<dyn PeerSender>,
		config: Config,
		local_peer_id: String,
	) -> Self {
		AppContext {
			catalog,
			keys,
			checkpoints,
			versions,
			locker,
			bandwidth,
			selective_sync,
			mesh,
			access_policy,
			peer_sender,
			config,
			local_peer_id,
		}
	}
}

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Drives both halves of spec.md §4.5's pipeline plus the periodic
/// maintenance loop. Holds no mutable state of its own beyond the
/// conflict strategy choice; everything else lives in `AppContext`.
pub struct SyncOrchestrator {
	ctx: Arc<AppContext>,
	conflict_strategy: ConflictStrategy,
}

impl SyncOrchestrator {
	pub fn new(ctx: Arc<AppContext>, conflict_strategy: ConflictStrategy) -> Self {
		SyncOrchestrator { ctx, conflict_strategy }
	}

	async fn latest_snapshot_bytes(&self, path: &str) -> Vec<u8> {
		let mut versions = self.ctx.versions.list(path).await;
		versions.sort_by_key(|v| v.created_at);
		match versions.last() {
			Some(latest) => self.ctx.versions.restore(&latest.version_id).await.unwrap_or_default(),
			None => Vec::new(),
		}
	}

	/// Local-change pipeline (spec.md §4.5, 8 numbered steps). `new_content`
	/// is the file's full bytes after the change that triggered this call;
	/// `mtime` is its modification time.
	pub async fn handle_local_change(
		&self,
		path: FilePath,
		new_content: &[u8],
		mtime: u64,
	) -> Result<(), SyncError> {
		let size = new_content.len() as u64;
		let hour = current_local_hour();

		// 1. Selective gate.
		if !self.ctx.selective_sync.should_sync(path.as_str(), size, hour).await {
			return Ok(());
		}

		// 2. Lock.
		let _guard = self.ctx.locker.acquire(path.as_path(), LockMode::Write, LOCK_TIMEOUT).await?;

		// 3. Access check (a peer with no access to its own path shouldn't
		// propagate it either — the same gate applies to the local node).
		if !self.ctx.access_policy.has_file_access(&self.ctx.local_peer_id, path.as_str()).await {
			return Ok(());
		}

		let previous = self.ctx.catalog.get_file(&path).await?;
		let prior_bytes = self.latest_snapshot_bytes(path.as_str()).await;
		let old_hash = hash_binary(&prior_bytes);
		let base_version = previous.as_ref().map(|r| r.version).unwrap_or(0);
		let new_hash = hash_binary(new_content);

		// 4. Catalog upsert.
		let record = match previous {
			Some(mut r) => {
				r.bump(new_hash, size, mtime, &self.ctx.local_peer_id);
				r
			}
			None => FileRecord::new_local(path.clone(), new_hash, size, mtime, &self.ctx.local_peer_id),
		};
		self.ctx.catalog.upsert_file(record).await?;

		// 5. Hash + delta, diffed against the blocks this node already had.
		let peer_known = BlockIndex::from_blocks(&delta::split_blocks(&prior_bytes, DEFAULT_BLOCK_SIZE));
		let computed = delta::compute_compressed(
			new_content,
			&peer_known,
			DEFAULT_BLOCK_SIZE,
			self.ctx.config.compress_algorithm.to_delta_algo(),
		)?;

		// 6. Version snapshot of what the path looked like before this change.
		self.ctx
			.versions
			.create(path.as_str(), &prior_bytes, "local edit", &self.ctx.local_peer_id, HashSet::new())
			.await?;

		// 7. Peer fan-out.
		let body = DeltaMessageBody {
			path: path.as_str().to_string(),
			old_hash,
			base_version,
			delta: computed,
			author: self.ctx.local_peer_id.clone(),
			deleted: false,
		};
		let message = DeltaMessage::sign(body, &self.ctx.keys)?;
		let payload = bincode::serialize(&message)
			.map_err(|e| SyncError::Other { message: format!("delta message encode failed: {e}") })?;
		self.fan_out(path.as_str(), &payload).await;

		// 8. Release lock: `_guard` drops at end of scope.
		Ok(())
	}

	/// Local-deletion pipeline: announces the deletion to peers instead of a
	/// content delta, keeping the last version snapshot for recovery.
	pub async fn handle_local_delete(&self, path: FilePath) -> Result<(), SyncError> {
		let _guard = self.ctx.locker.acquire(path.as_path(), LockMode::Write, LOCK_TIMEOUT).await?;

		let Some(existing) = self.ctx.catalog.get_file(&path).await? else {
			return Ok(());
		};
		let last_bytes = self.latest_snapshot_bytes(path.as_str()).await;
		self.ctx
			.versions
			.create(path.as_str(), &last_bytes, "deleted", &self.ctx.local_peer_id, HashSet::new())
			.await?;
		self.ctx.catalog.remove_file(&path).await?;

		let body = DeltaMessageBody {
			path: path.as_str().to_string(),
			old_hash: hash_binary(&last_bytes),
			base_version: existing.version,
			delta: delta::diff(&[], &BlockIndex::new(), DEFAULT_BLOCK_SIZE),
			author: self.ctx.local_peer_id.clone(),
			deleted: true,
		};
		let message = DeltaMessage::sign(body, &self.ctx.keys)?;
		let payload = bincode::serialize(&message)
			.map_err(|e| SyncError::Other { message: format!("delta message encode failed: {e}") })?;
		self.fan_out(path.as_str(), &payload).await;
		Ok(())
	}

	/// Send `payload` to every peer currently active in the mesh, skipping
	/// peers that aren't verified or that access policy excludes from `path`.
	/// Deliberately the full peer set, not `ranked_best_peers`/
	/// `load_balanced_peers` — those are top-N shortlists for topology/MST
	/// bookkeeping, not a cap on who receives a delta.
	async fn fan_out(&self, path: &str, payload: &[u8]) {
		let peers = self.ctx.mesh.lock().await.active_peers();
		for peer_id in peers {
			if self.ctx.keys.trust_level(&peer_id).await != PeerTrust::Verified {
				continue;
			}
			if !self.ctx.access_policy.has_file_access(&peer_id, path).await {
				continue;
			}
			self.ctx.bandwidth.throttle(payload.len() as u64, Direction::Upload).await;
			match self.ctx.peer_sender.send(&peer_id, payload.to_vec()).await {
				Ok(()) => {
					if let Err(e) = self.ctx.keys.record_usage(&peer_id, payload.len() as u64).await {
						warn!(peer = %peer_id, error = %e, "recording session usage failed");
					}
				}
				Err(e) => warn!(peer = %peer_id, error = %e, "peer fan-out send failed"),
			}
		}
	}

	/// Inbound-delta pipeline (spec.md §4.5, 6 numbered steps).
	pub async fn handle_inbound_delta(
		&self,
		sender_peer_id: &str,
		message: DeltaMessage,
	) -> Result<(), SyncError> {
		// 1. Authenticate record.
		let sender_key = self
			.ctx
			.keys
			.peer_key(sender_peer_id)
			.await
			.ok_or_else(|| SyncError::Other { message: format!("unknown peer {sender_peer_id}") })?;
		if matches!(sender_key.trust, PeerTrust::Unknown | PeerTrust::Revoked) {
			return Err(SyncError::Other {
				message: format!("peer {sender_peer_id} is not authorized to send changes"),
			});
		}
		let body = message.open(&sender_key.pubkey)?;

		// 2. Sanitize remote path.
		let path = FilePath::try_from(body.path.as_str())?;

		// 3. Lock target path.
		let _guard = self.ctx.locker.acquire(path.as_path(), LockMode::Write, LOCK_TIMEOUT).await?;

		if body.deleted {
			self.ctx.catalog.remove_file(&path).await?;
			return Ok(());
		}

		let existing = self.ctx.catalog.get_file(&path).await?;
		let local_bytes = self.latest_snapshot_bytes(path.as_str()).await;
		let local_content_hash = existing.as_ref().map(|r| r.content_hash).unwrap_or_else(|| hash_binary(&[]));
		let local_version = existing.as_ref().map(|r| r.version).unwrap_or(0);
		let local_mtime = existing.as_ref().map(|r| r.mtime).unwrap_or(0);

		let local_blocks: HashMap<[u8; 32], Vec<u8>> =
			delta::split_blocks(&local_bytes, body.delta.block_size as usize)
				.into_iter()
				.zip(local_bytes.chunks(body.delta.block_size.max(1) as usize))
				.map(|(block, raw)| (block.hash, raw.to_vec()))
				.collect();
		let reconstructed = delta::apply_compressed(&body.delta, &local_blocks)?;

		// 4. Check for conflict, resolving it with the configured strategy.
		let conflicted = strategy::detect_conflict(local_content_hash, body.old_hash, local_version, body.base_version);

		let (final_bytes, conflict_state) = if conflicted {
			let local_side = ConflictSide { content: local_bytes.clone(), mtime: local_mtime, peer_id: self.ctx.local_peer_id.clone() };
			let incoming_side =
				ConflictSide { content: reconstructed.clone(), mtime: now_unix(), peer_id: sender_peer_id.to_string() };
			let is_text = looks_like_text(&local_bytes) && looks_like_text(&reconstructed);
			let outcome = strategy::resolve(self.conflict_strategy, &local_side, &incoming_side, is_text, &[], &|_| None)?;
			if let Some(backup) = &outcome.backup {
				self.ctx
					.versions
					.create(
						path.as_str(),
						backup,
						"conflict backup",
						&outcome.record.winner_peer_id,
						HashSet::new(),
					)
					.await?;
			}
			(outcome.winner, ConflictState::Resolved)
		} else {
			(reconstructed, ConflictState::None)
		};

		// 5. Apply delta; `apply_compressed` already verified the
		// reconstructed bytes hash to `body.delta.content_hash` when no
		// conflict intervened. Snapshot what the path held before this write.
		self.ctx
			.versions
			.create(path.as_str(), &local_bytes, "inbound change", sender_peer_id, HashSet::new())
			.await?;

		// 6. Catalog update, version bump, release lock (`_guard` drop).
		let final_hash = hash_binary(&final_bytes);
		let mut record = match existing {
			Some(mut r) => {
				r.bump(final_hash, final_bytes.len() as u64, now_unix(), sender_peer_id);
				r
			}
			None => FileRecord::new_local(path.clone(), final_hash, final_bytes.len() as u64, now_unix(), sender_peer_id),
		};
		record.conflict_state = conflict_state;
		self.ctx.catalog.upsert_file(record).await?;

		Ok(())
	}

	/// One tick of the periodic maintenance loop (spec.md §9's explicit
	/// `(state, step(&mut self, now) -> Next)` task model). The caller drives
	/// the cadence; `MaintenanceState` just tracks when each concern is due.
	pub async fn run_maintenance_tick(&self, state: &mut MaintenanceState, now: u64) {
		if now.saturating_sub(state.last_mesh_eval) >= MESH_EVAL_INTERVAL_SECS {
			let mut mesh = self.ctx.mesh.lock().await;
			if mesh.needs_remesh() {
				if let Err(e) = mesh.minimum_spanning_tree() {
					debug!(error = %e, "mesh recompute skipped");
				}
			}
			state.last_mesh_eval = now;
		}

		if now.saturating_sub(state.last_session_cleanup) >= SESSION_CLEANUP_INTERVAL_SECS {
			let dropped = self.ctx.keys.cleanup_expired().await;
			if !dropped.is_empty() {
				info!(count = dropped.len(), "dropped expired session keys");
			}
			state.last_session_cleanup = now;
		}

		let checkpoint_interval = self.ctx.config.checkpoint_recovery_interval_secs.max(1);
		if now.saturating_sub(state.last_checkpoint_sweep) >= checkpoint_interval {
			let resumed = self.ctx.checkpoints.recover(|_path| None).await;
			if !resumed.is_empty() {
				info!(count = resumed.len(), "resumed transfers after checkpoint sweep");
			}
			state.last_checkpoint_sweep = now;
		}

		if now.saturating_sub(state.last_version_compress) >= VERSION_COMPRESS_INTERVAL_SECS {
			if let Err(e) = self.ctx.versions.compress_aged().await {
				warn!(error = %e, "version compression sweep failed");
			}
			state.last_version_compress = now;
		}
	}
}

const MESH_EVAL_INTERVAL_SECS: u64 = 10;
const SESSION_CLEANUP_INTERVAL_SECS: u64 = 60;
const VERSION_COMPRESS_INTERVAL_SECS: u64 = 3600;

/// Tracks when each maintenance concern last ran, so `run_maintenance_tick`
/// can be driven by a plain interval timer without its own async state.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceState {
	last_mesh_eval: u64,
	last_session_cleanup: u64,
	last_checkpoint_sweep: u64,
	last_version_compress: u64,
}

impl MaintenanceState {
	pub fn new() -> Self {
		Self::default()
	}
}
