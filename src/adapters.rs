//! Binary-only adapters wiring the abstract `ports` traits to concrete
//! OS/network machinery: a polling filesystem watcher and a TCP-backed
//! peer sender. Neither belongs in the library crate — they are one
//! specific way to satisfy `ports::Watcher`/`ports::PeerSender`, not the
//! only way, matching the port-and-adapter split `ports.rs` documents.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sentinelfs_core::error::{SyncError, TransportError};
use sentinelfs_core::exclusion::IgnoreFileMatcher;
use sentinelfs_core::keys::KeyManager;
use sentinelfs_core::ports::{FsEvent, FsEventKind, PeerSender, Watcher};
use sentinelfs_core::transport::{perform_handshake, ConnectionPool, HandshakeRole, RecordWriter};
use tokio::sync::RwLock;
use tracing::debug;

/// Polling directory-tree watcher, grounded on the original implementation's
/// own fallback for platforms without inotify (`watcher.cpp`'s documented
/// "simplified version that just periodically checks for file changes").
/// Walks `root` every `interval`, diffing `(size, mtime)` against the
/// previous sweep to synthesize `Created`/`Modified`/`Deleted` events.
pub struct PollingWatcher {
	root: PathBuf,
	interval: Duration,
	ignore: IgnoreFileMatcher,
	seen: HashMap<PathBuf, (u64, u64)>,
	pending: Vec<FsEvent>,
	primed: bool,
}

impl PollingWatcher {
	pub fn new(root: PathBuf, interval: Duration, ignore: IgnoreFileMatcher) -> Self {
		PollingWatcher { root, interval, ignore, seen: HashMap::new(), pending: Vec::new(), primed: false }
	}

	async fn sweep(&mut self) -> std::io::Result<()> {
		let mut current: HashMap<PathBuf, (u64, u64)> = HashMap::new();
		let mut stack = vec![self.root.clone()];

		while let Some(dir) = stack.pop() {
			let mut entries = match tokio::fs::read_dir(&dir).await {
				Ok(entries) => entries,
				Err(_) => continue,
			};
			while let Some(entry) = entries.next_entry().await? {
				let path = entry.path();
				let file_type = match entry.file_type().await {
					Ok(ft) => ft,
					Err(_) => continue,
				};
				if file_type.is_dir() {
					if !self.ignore.is_ignored_dir(&path) {
						stack.push(path);
					}
					continue;
				}
				if !file_type.is_file() || self.ignore.is_ignored(&path) {
					continue;
				}
				let metadata = match entry.metadata().await {
					Ok(m) => m,
					Err(_) => continue,
				};
				let mtime = metadata
					.modified()
					.ok()
					.and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
					.map(|d| d.as_secs())
					.unwrap_or(0);
				current.insert(path, (metadata.len(), mtime));
			}
		}

		if !self.primed {
			// First sweep only establishes the baseline; an already-present
			// tree is not a flood of synthetic "created" events.
			self.seen = current;
			self.primed = true;
			return Ok(());
		}

		for (path, stat) in &current {
			match self.seen.get(path) {
				None => self.pending.push(FsEvent { path: path.clone(), kind: FsEventKind::Created, size: stat.0 }),
				Some(prev) if prev != stat => {
					self.pending.push(FsEvent { path: path.clone(), kind: FsEventKind::Modified, size: stat.0 })
				}
				_ => {}
			}
		}
		for path in self.seen.keys() {
			if !current.contains_key(path) {
				self.pending.push(FsEvent { path: path.clone(), kind: FsEventKind::Deleted, size: 0 });
			}
		}
		self.seen = current;
		Ok(())
	}
}

#[async_trait]
impl Watcher for PollingWatcher {
	async fn next_event(&mut self) -> Result<Option<FsEvent>, SyncError> {
		loop {
			if let Some(event) = self.pending.pop() {
				return Ok(Some(event));
			}
			tokio::time::sleep(self.interval).await;
			self.sweep().await.map_err(SyncError::Io)?;
		}
	}
}

/// Delivers a delta payload over a fresh, handshaken TCP connection per
/// call. `ConnectionPool::acquire` still supplies the exponential-backoff
/// connect and, because this adapter never calls `release`, every acquire
/// dials a brand new socket — deliberately: a session key is only valid for
/// the one connection it was negotiated on, so pooled reuse across sends
/// would require caching the session key per pooled stream instead of per
/// peer, which the teacher's `RecordWriter` has no accessor to support.
pub struct TcpPeerSender {
	pool: Arc<ConnectionPool>,
	keys: Arc<KeyManager>,
	local_peer_id: String,
	peer_addrs: Arc<RwLock<HashMap<String, SocketAddr>>>,
}

impl TcpPeerSender {
	pub fn new(
		pool: Arc<ConnectionPool>,
		keys: Arc<KeyManager>,
		local_peer_id: String,
		peer_addrs: Arc<RwLock<HashMap<String, SocketAddr>>>,
	) -> Self {
		TcpPeerSender { pool, keys, local_peer_id, peer_addrs }
	}
}

#[async_trait]
impl PeerSender for TcpPeerSender {
	async fn send(&self, peer_id: &str, payload: Vec<u8>) -> Result<(), TransportError> {
		let addr = self
			.peer_addrs
			.read()
			.await
			.get(peer_id)
			.copied()
			.ok_or_else(|| TransportError::PoolExhausted { peer: peer_id.to_string() })?;

		let mut stream = self.pool.acquire(&addr.ip().to_string(), addr.port()).await?;
		let signing_key = self.keys.signing_key();
		let secrets =
			perform_handshake(&mut stream, HandshakeRole::Initiator, &self.local_peer_id, &signing_key).await?;
		if secrets.remote_peer_id != peer_id {
			return Err(TransportError::HandshakeFailed {
				message: format!("handshake answered by {} instead of expected {peer_id}", secrets.remote_peer_id),
			});
		}

		let mut writer = RecordWriter::new_gcm(stream, secrets.session_key);
		writer.write_record(&payload).await?;
		debug!(peer = peer_id, bytes = payload.len(), "delivered delta to peer");
		Ok(())
	}
}
