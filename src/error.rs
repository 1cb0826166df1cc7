//! Error types for SyncR operations

use std::error::Error;
use std::fmt;
use std::io;

use crate::exclusion::ExclusionError;

/// Helper function to reduce Box::new() boilerplate when wrapping errors
///
/// This function is useful for reducing verbosity when manually wrapping error types
/// into `Box<dyn Error + Send + Sync>` for error variant fields.
///
/// # Examples
///
/// ```ignore
/// // Before
/// SyncError::Metadata(Box::new(err) as Box<dyn Error + Send + Sync>)
///
/// // After
/// SyncError::Metadata(boxed_error(err))
/// ```
#[inline]
pub fn boxed_error<E: Error + Send + Sync + 'static>(e: E) -> Box<dyn Error + Send + Sync> {
	Box::new(e)
}

/// Main error type for sync operations
///
/// This is the unified error type that encompasses all sync-related errors.
/// It contains both direct variants for common errors and nested variants
/// for domain-specific errors.
#[derive(Debug)]
pub enum SyncError {
	/// Failed to connect to a location
	ConnectionFailed { location: String, source: Box<dyn Error + Send + Sync> },

	/// Permission denied on a path
	PermissionDenied { path: String },

	/// Sync state is corrupted
	StateCorrupted { message: String },

	/// Protocol version mismatch
	ProtocolMismatch { local: u8, remote: u8 },

	/// Hash verification failed
	HashMismatch { expected: String, actual: String },

	/// I/O error
	Io(io::Error),

	/// Invalid configuration
	InvalidConfig { message: String },

	/// Lock acquisition failed
	LockFailed { message: String },

	/// Operation aborted by user
	Aborted,

	/// State error (nested)
	State(StateError),

	/// Conflict error (nested)
	Conflict(ConflictError),

	/// Protocol error (nested) - domain-specific protocol communication errors
	Protocol(Box<dyn Error + Send + Sync>),

	/// Metadata error (nested) - capability detection and metadata operations
	Metadata(Box<dyn Error + Send + Sync>),

	/// Exclusion error (nested) - file pattern and filter errors
	Exclusion(Box<dyn Error + Send + Sync>),

	/// Configuration parsing error (nested)
	ConfigParse(Box<dyn Error + Send + Sync>),

	/// Configuration discovery error (nested)
	ConfigDiscovery(Box<dyn Error + Send + Sync>),

	/// Generic error message
	Other { message: String },
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::ConnectionFailed { location, source } => {
				write!(f, "Failed to connect to {}: {}", location, source)
			}
			SyncError::PermissionDenied { path } => {
				write!(f, "Permission denied: {}", path)
			}
			SyncError::StateCorrupted { message } => {
				write!(f, "Sync state corrupted: {}", message)
			}
			SyncError::ProtocolMismatch { local, remote } => {
				write!(f, "Protocol version mismatch: local={}, remote={}", local, remote)
			}
			SyncError::HashMismatch { expected, actual } => {
				write!(f, "Hash mismatch: expected {}, got {}", expected, actual)
			}
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::InvalidConfig { message } => {
				write!(f, "Invalid configuration: {}", message)
			}
			SyncError::LockFailed { message } => {
				write!(f, "Lock acquisition failed: {}", message)
			}
			SyncError::Aborted => write!(f, "Operation aborted by user"),
			SyncError::State(e) => write!(f, "State error: {}", e),
			SyncError::Conflict(e) => write!(f, "Conflict error: {}", e),
			SyncError::Protocol(e) => write!(f, "Protocol error: {}", e),
			SyncError::Metadata(e) => write!(f, "Metadata error: {}", e),
			SyncError::Exclusion(e) => write!(f, "Exclusion error: {}", e),
			SyncError::ConfigParse(e) => write!(f, "Configuration parse error: {}", e),
			SyncError::ConfigDiscovery(e) => write!(f, "Configuration discovery error: {}", e),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<Box<dyn Error>> for SyncError {
	fn from(e: Box<dyn Error>) -> Self {
		SyncError::Other { message: e.to_string() }
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

impl From<StateError> for SyncError {
	fn from(e: StateError) -> Self {
		SyncError::State(e)
	}
}

impl From<ConflictError> for SyncError {
	fn from(e: ConflictError) -> Self {
		SyncError::Conflict(e)
	}
}

impl From<ExclusionError> for SyncError {
	fn from(e: ExclusionError) -> Self {
		SyncError::Exclusion(boxed_error(e))
	}
}

/// State management errors
#[derive(Debug)]
pub enum StateError {
	/// Failed to load state
	LoadFailed { source: Box<dyn Error + Send + Sync> },

	/// Failed to save state
	SaveFailed { source: Box<dyn Error + Send + Sync> },

	/// Lock acquisition failed
	LockFailed { message: String },

	/// State file is corrupted
	Corrupted { message: String },

	/// Invalid state directory
	InvalidDirectory { path: String },
}

impl fmt::Display for StateError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StateError::LoadFailed { source } => write!(f, "Failed to load state: {}", source),
			StateError::SaveFailed { source } => write!(f, "Failed to save state: {}", source),
			StateError::LockFailed { message } => write!(f, "Lock failed: {}", message),
			StateError::Corrupted { message } => write!(f, "State corrupted: {}", message),
			StateError::InvalidDirectory { path } => {
				write!(f, "Invalid state directory: {}", path)
			}
		}
	}
}

impl Error for StateError {}

/// Conflict resolution errors
#[derive(Debug)]
pub enum ConflictError {
	/// Invalid winner choice (index out of range)
	InvalidChoice { choice: usize, max: usize },

	/// User cancelled operation
	UserCancelled,

	/// Conflict resolution strategy failed
	StrategyFailed { message: String },

	/// Conflict is unresolvable
	Unresolvable { message: String },
}

impl fmt::Display for ConflictError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConflictError::InvalidChoice { choice, max } => {
				write!(f, "Invalid choice {}: must be between 0 and {}", choice, max - 1)
			}
			ConflictError::UserCancelled => write!(f, "Operation cancelled by user"),
			ConflictError::StrategyFailed { message } => {
				write!(f, "Failed to resolve conflict: {}", message)
			}
			ConflictError::Unresolvable { message } => {
				write!(f, "Cannot resolve conflict: {}", message)
			}
		}
	}
}

impl Error for ConflictError {}

// ============================================================================
// UNIFIED ERROR SYSTEM - From implementations for orphaned error types
// ============================================================================
// These implementations enable seamless conversion of specialized error types
// to the unified SyncError type, supporting the error consolidation refactoring.

impl From<Box<dyn Error + Send + Sync>> for SyncError {
	fn from(e: Box<dyn Error + Send + Sync>) -> Self {
		SyncError::Other { message: e.to_string() }
	}
}

// Note: ProtocolError, MetadataError, ExclusionError, ConfigParseError,
// and DiscoveryError are handled via generic Box conversions.
// To properly integrate orphaned error types, implement From<T> for SyncError
// where T is each orphaned error type once they're imported.
//
// Example (uncomment when ready to fully consolidate):
// impl From<ProtocolError> for SyncError {
//     fn from(e: ProtocolError) -> Self {
//         SyncError::Protocol(Box::new(e))
//     }
// }

// Convenience conversion from Box<dyn Error> for original error handling
pub fn box_error_to_sync_error(e: Box<dyn Error>) -> SyncError {
	SyncError::Other { message: e.to_string() }
}

// ============================================================================
// SENTINELFS ERROR TAXONOMY
// ============================================================================
// The domains below were not part of the original sync engine (cryptography,
// transport, key management, mesh topology); they follow the same
// nested-enum-plus-From-impl shape as the errors above rather than
// introducing a different error-handling style for new code.

/// Delta engine errors: block reconstruction and verification failures.
#[derive(Debug)]
pub enum DeltaError {
	/// Delta referenced a block hash the receiver doesn't have locally.
	MissingBlock { hash: String },
	/// Reconstructed content hash didn't match the expected hash.
	ContentHashMismatch { expected: String, actual: String },
	/// Block size in a delta is zero or otherwise invalid.
	InvalidBlockSize { size: usize },
	/// Block compression or decompression failed.
	CompressionFailure { message: String },
}

impl fmt::Display for DeltaError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DeltaError::MissingBlock { hash } => write!(f, "missing local block {}", hash),
			DeltaError::ContentHashMismatch { expected, actual } => {
				write!(f, "content hash mismatch: expected {}, got {}", expected, actual)
			}
			DeltaError::InvalidBlockSize { size } => write!(f, "invalid block size: {}", size),
			DeltaError::CompressionFailure { message } => write!(f, "compression failure: {}", message),
		}
	}
}

impl Error for DeltaError {}

impl From<DeltaError> for SyncError {
	fn from(e: DeltaError) -> Self {
		SyncError::Other { message: format!("delta error: {}", e) }
	}
}

/// Cryptographic primitive errors: AEAD, KDF, signing, and key-agreement
/// failures. Never carries secret material in its `Display` output.
#[derive(Debug)]
pub enum CryptoError {
	/// AEAD seal/open failed (wrong key, tampered ciphertext, or bad tag).
	AeadFailure,
	/// A cryptographic signature failed to verify.
	InvalidSignature,
	/// Derived shared secret was all-zero (low-order point / degenerate DH).
	DegenerateSharedSecret,
	/// KDF expansion failed (e.g. requested more output than the hash allows).
	KdfFailure { message: String },
	/// Password-based key derivation parameters were rejected.
	InvalidKdfParams { message: String },
	/// A key, nonce, or tag had the wrong length for the requested algorithm.
	InvalidLength { expected: usize, actual: usize },
	/// Replay protection rejected a sequence number we've already seen.
	ReplayDetected { sequence: u64 },
}

impl fmt::Display for CryptoError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CryptoError::AeadFailure => write!(f, "AEAD operation failed"),
			CryptoError::InvalidSignature => write!(f, "signature verification failed"),
			CryptoError::DegenerateSharedSecret => {
				write!(f, "derived shared secret is degenerate")
			}
			CryptoError::KdfFailure { message } => write!(f, "key derivation failed: {}", message),
			CryptoError::InvalidKdfParams { message } => {
				write!(f, "invalid key derivation parameters: {}", message)
			}
			CryptoError::InvalidLength { expected, actual } => {
				write!(f, "invalid length: expected {}, got {}", expected, actual)
			}
			CryptoError::ReplayDetected { sequence } => {
				write!(f, "replay detected at sequence {}", sequence)
			}
		}
	}
}

impl Error for CryptoError {}

impl From<CryptoError> for SyncError {
	fn from(e: CryptoError) -> Self {
		SyncError::Other { message: format!("crypto error: {}", e) }
	}
}

/// Key manager errors: identity, session, and key-store lifecycle failures.
#[derive(Debug)]
pub enum KeyError {
	/// No key found under the requested id/peer/type.
	NotFound { key_id: String },
	/// Key exists but has expired or was marked compromised.
	KeyExpired { key_id: String },
	Compromised { key_id: String },
	/// Session key has crossed its rotation threshold and must be renegotiated.
	RotationRequired { key_id: String },
	/// Key store I/O or (de)serialization failure.
	Store { message: String },
	/// Master password was wrong, or rewrap-on-change-password failed midway
	/// (in which case no file was mutated; see KeyManager::change_master_password).
	InvalidPassword,
	Crypto(CryptoError),
}

impl fmt::Display for KeyError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			KeyError::NotFound { key_id } => write!(f, "key not found: {}", key_id),
			KeyError::KeyExpired { key_id } => write!(f, "key expired: {}", key_id),
			KeyError::Compromised { key_id } => write!(f, "key marked compromised: {}", key_id),
			KeyError::RotationRequired { key_id } => {
				write!(f, "session key {} requires rotation", key_id)
			}
			KeyError::Store { message } => write!(f, "key store error: {}", message),
			KeyError::InvalidPassword => write!(f, "invalid master password"),
			KeyError::Crypto(e) => write!(f, "{}", e),
		}
	}
}

impl Error for KeyError {}

impl From<CryptoError> for KeyError {
	fn from(e: CryptoError) -> Self {
		KeyError::Crypto(e)
	}
}

impl From<KeyError> for SyncError {
	fn from(e: KeyError) -> Self {
		SyncError::Other { message: format!("key manager error: {}", e) }
	}
}

/// Secure transport errors: framing, handshake, and session errors.
#[derive(Debug)]
pub enum TransportError {
	/// Record framing was malformed (bad length, unknown version byte).
	FramingError { message: String },
	/// Peer failed handshake authentication.
	HandshakeFailed { message: String },
	/// Underlying connection I/O error.
	Io(io::Error),
	/// Connection pool has no usable connection and couldn't establish one.
	PoolExhausted { peer: String },
	/// Operation exceeded its deadline.
	Timeout,
	Crypto(CryptoError),
}

impl fmt::Display for TransportError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransportError::FramingError { message } => write!(f, "framing error: {}", message),
			TransportError::HandshakeFailed { message } => {
				write!(f, "handshake failed: {}", message)
			}
			TransportError::Io(e) => write!(f, "transport I/O error: {}", e),
			TransportError::PoolExhausted { peer } => {
				write!(f, "connection pool exhausted for peer {}", peer)
			}
			TransportError::Timeout => write!(f, "transport operation timed out"),
			TransportError::Crypto(e) => write!(f, "{}", e),
		}
	}
}

impl Error for TransportError {}

impl From<io::Error> for TransportError {
	fn from(e: io::Error) -> Self {
		TransportError::Io(e)
	}
}

impl From<CryptoError> for TransportError {
	fn from(e: CryptoError) -> Self {
		TransportError::Crypto(e)
	}
}

impl From<TransportError> for SyncError {
	fn from(e: TransportError) -> Self {
		SyncError::Other { message: format!("transport error: {}", e) }
	}
}

/// Mesh optimizer errors.
#[derive(Debug)]
pub enum MeshError {
	/// Referenced a peer that isn't a known mesh node.
	UnknownPeer { peer: String },
	/// Topology computation was asked to run on an empty node set.
	EmptyTopology,
}

impl fmt::Display for MeshError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			MeshError::UnknownPeer { peer } => write!(f, "unknown mesh peer: {}", peer),
			MeshError::EmptyTopology => write!(f, "cannot compute topology with no nodes"),
		}
	}
}

impl Error for MeshError {}

impl From<MeshError> for SyncError {
	fn from(e: MeshError) -> Self {
		SyncError::Other { message: format!("mesh error: {}", e) }
	}
}

/// Abstract Catalog-port errors (metadata store backend failures).
#[derive(Debug)]
pub enum CatalogError {
	Backend { message: String },
	NotFound { key: String },
	Serialization { message: String },
}

impl fmt::Display for CatalogError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CatalogError::Backend { message } => write!(f, "catalog backend error: {}", message),
			CatalogError::NotFound { key } => write!(f, "catalog entry not found: {}", key),
			CatalogError::Serialization { message } => {
				write!(f, "catalog serialization error: {}", message)
			}
		}
	}
}

impl Error for CatalogError {}

impl From<CatalogError> for SyncError {
	fn from(e: CatalogError) -> Self {
		SyncError::Other { message: format!("catalog error: {}", e) }
	}
}

/// Selective-sync policy evaluation errors.
#[derive(Debug)]
pub enum PolicyError {
	InvalidPattern { pattern: String, message: String },
}

impl fmt::Display for PolicyError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PolicyError::InvalidPattern { pattern, message } => {
				write!(f, "invalid selective-sync pattern '{}': {}", pattern, message)
			}
		}
	}
}

impl Error for PolicyError {}

impl From<PolicyError> for SyncError {
	fn from(e: PolicyError) -> Self {
		SyncError::Other { message: format!("policy error: {}", e) }
	}
}

/// Resumable-transfer checkpoint errors.
#[derive(Debug)]
pub enum CheckpointError {
	NotFound { transfer_id: String },
	Corrupted { message: String },
	Io(io::Error),
}

impl fmt::Display for CheckpointError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CheckpointError::NotFound { transfer_id } => {
				write!(f, "no checkpoint for transfer {}", transfer_id)
			}
			CheckpointError::Corrupted { message } => {
				write!(f, "checkpoint corrupted: {}", message)
			}
			CheckpointError::Io(e) => write!(f, "checkpoint I/O error: {}", e),
		}
	}
}

impl Error for CheckpointError {}

impl From<io::Error> for CheckpointError {
	fn from(e: io::Error) -> Self {
		CheckpointError::Io(e)
	}
}

impl From<CheckpointError> for SyncError {
	fn from(e: CheckpointError) -> Self {
		SyncError::Other { message: format!("checkpoint error: {}", e) }
	}
}

// vim: ts=4
