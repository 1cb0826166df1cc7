//! Consumed ports the orchestrator depends on but does not implement
//! itself: the raw filesystem watcher, NAT traversal, and ML-style anomaly
//! scoring (spec.md §2, "ambient additions"). Grounded on the same
//! port-and-adapter shape as `catalog::Catalog` — an abstract trait the
//! orchestrator calls through, with the real OS/network machinery living in
//! the binary that wires `main.rs` together.

use async_trait::async_trait;

use crate::error::{SyncError, TransportError};

/// What changed, mirroring spec.md's `{path, kind, size}` FS event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
	Created,
	Modified,
	Deleted,
}

/// One raw filesystem notification, as yielded by a `Watcher` (spec.md §2:
/// "the orchestrator consumes events, it does not implement
/// inotify/FSEvents/kqueue").
#[derive(Debug, Clone)]
pub struct FsEvent {
	pub path: std::path::PathBuf,
	pub kind: FsEventKind,
	pub size: u64,
}

/// Source of filesystem change notifications. Implementations wrap
/// inotify/FSEvents/kqueue or poll a directory tree; this crate only
/// consumes whatever they yield.
#[async_trait]
pub trait Watcher: Send + Sync {
	async fn next_event(&mut self) -> Result<Option<FsEvent>, SyncError>;
}

/// NAT traversal port (STUN-style address discovery and hole punching).
/// Not implemented by this crate; an adapter binds it to a concrete STUN
/// client or UPnP library.
#[async_trait]
pub trait NatTraversal: Send + Sync {
	async fn external_address(&self) -> Result<std::net::SocketAddr, SyncError>;
	async fn punch(&self, peer: &str) -> Result<(), SyncError>;
}

/// ML-style anomaly scoring over a peer id, consumed as a plain predicate
/// (spec.md §2: "consumed as `AnomalyPredicate: Fn(&PeerId) -> bool`").
/// `true` means the peer looks anomalous and should be treated with
/// suspicion by the access-policy layer.
pub trait AnomalyPredicate: Fn(&str) -> bool + Send + Sync {}

impl<F> AnomalyPredicate for F where F: Fn(&str) -> bool + Send + Sync {}

/// Default predicate that never flags a peer, for contexts with no anomaly
/// detector wired in.
pub fn no_anomaly_detection(_peer_id: &str) -> bool {
	false
}

/// Delivers an already-serialized, already-encrypted payload to a peer.
/// Decouples the orchestrator's fan-out logic from `transport::ConnectionPool`
/// and the handshake/record-framing machinery; a concrete adapter wires this
/// to a real `ConnectionPool` + `RecordWriter` pair, tests wire it to an
/// in-memory channel.
#[async_trait]
pub trait PeerSender: Send + Sync {
	async fn send(&self, peer_id: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Consulted before a file's bytes are handed to a given peer (spec.md §4.5
/// step 3: "consult policy engine"). An adapter backs this with whatever
/// authorization model the deployment uses; the default just allows
/// everything, matching `no_anomaly_detection`'s permissive-by-default shape.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
	async fn has_file_access(&self, peer_id: &str, path: &str) -> bool;
}

/// `AccessPolicy` that allows every peer access to every path.
pub struct AllowAll;

#[async_trait]
impl AccessPolicy for AllowAll {
	async fn has_file_access(&self, _peer_id: &str, _path: &str) -> bool {
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_anomaly_predicate_never_flags() {
		assert!(!no_anomaly_detection("peer-a"));
	}

	#[tokio::test]
	async fn allow_all_grants_every_peer() {
		assert!(AllowAll.has_file_access("peer-a", "any/path.txt").await);
	}
}
