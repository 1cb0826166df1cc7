//! # SentinelFS core
//!
//! A peer-to-peer filesystem synchronizer: a set of cooperating nodes keep a
//! shared directory coherent across a mesh, detecting local changes,
//! reconciling conflicts with peers, and transferring only what differs over
//! authenticated, encrypted channels.
//!
//! This crate implements the core engine (delta diffing, conflict
//! resolution, secure transport, key management, mesh optimization); the
//! `sentinelfs` binary wires it to a polling filesystem watcher and TCP
//! transport (see `src/adapters.rs`, `src/main.rs`).

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod catalog;
pub mod config;
pub mod conflict;
pub mod crypto;
pub mod delta;
pub mod discovery;
pub mod error;
pub mod exclusion;
pub mod keys;
pub mod logging;
pub mod mesh;
pub mod orchestrator;
pub mod ports;
pub mod transport;
pub mod util;

// Re-export commonly used types and functions
pub use catalog::{Catalog, FileRecord, InMemoryCatalog, PeerLink};
pub use conflict::{ConflictOutcome, ConflictRecord, ConflictSide, ConflictStrategy};
pub use delta::{Block, BlockIndex, CompressionAlgo, Delta, DeltaOp};
pub use error::{StateError, SyncError};
pub use exclusion::{ExclusionError, IgnoreFileMatcher};
pub use keys::KeyManager;
pub use mesh::{MeshOptimizer, NetworkEdge, NetworkNode};
pub use orchestrator::{AppContext, SyncOrchestrator};
pub use transport::ConnectionPool;

// vim: ts=4
