#![allow(dead_code)]

//! Unified configuration for SentinelFS.
//!
//! Consolidates every subsystem's tunables (exclusion, compression,
//! bandwidth shaping, checkpoints, versioning) into one `Config` struct,
//! following the teacher's pattern of collapsing many scattered config
//! types into a single source of truth.
//!
//! Layered priority chain:
//! 1. Built-in defaults (`Config::default()`)
//! 2. Config file (`--config`, TOML)
//! 3. Environment variables (`SENTINELFS_*`, applied by `apply_env_overrides`)
//! 4. CLI flags (highest priority, applied by the binary after loading)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// MAIN CONFIGURATION STRUCT
// ============================================================================

/// Unified configuration for SentinelFS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	// ========================================================================
	// EXCLUSION
	// ========================================================================
	/// Glob patterns to exclude from sync (e.g., "*.tmp", "node_modules/")
	pub exclude_patterns: Vec<String>,

	/// Honor .gitignore, .syncignore and similar files
	pub respect_ignore_files: bool,

	// ========================================================================
	// COMPRESSION
	// ========================================================================
	/// Compression algorithm used for delta-chunk compression.
	pub compress_algorithm: CompressionAlgorithm,

	// ========================================================================
	// SESSION & STATE
	// ========================================================================
	/// Directory holding synchronized user files (spec.md §6 `<sync_root>/`).
	pub sync_root: PathBuf,

	/// Directory holding key store, catalog, checkpoints, versions
	/// (spec.md §6 `<state_dir>/`).
	pub state_dir: PathBuf,

	/// Shared secret identifying this mesh session; discovery only
	/// records peers whose broadcast carries a matching code.
	pub session_code: String,

	/// This node's identifier, advertised in discovery packets and used
	/// as `device_id` on locally authored `FileRecord`s.
	pub node_id: String,

	/// TCP port the secure transport listens on.
	pub tcp_port: u16,

	// ========================================================================
	// BANDWIDTH SHAPING (spec.md §4.7)
	// ========================================================================
	/// Token-bucket ceiling, bytes/s, per direction. `None` disables
	/// throttling for that direction.
	pub max_upload_bytes_per_s: Option<u64>,
	pub max_download_bytes_per_s: Option<u64>,

	/// Extra tokens the bucket may accumulate above the steady-state rate.
	pub bandwidth_burst_allowance: u64,

	/// Adapt the limit to a rolling 10s utilization window.
	pub bandwidth_adaptive: bool,

	/// Only enforce throttling during these hours (0-23, local time);
	/// empty means "always enforce".
	pub bandwidth_allowed_hours: Vec<u8>,

	// ========================================================================
	// CHECKPOINTS (spec.md §4.7)
	// ========================================================================
	/// Seconds between checkpoint-recovery sweeps.
	pub checkpoint_recovery_interval_secs: u64,

	/// Retry attempts before a transfer moves to the "failed" set.
	pub checkpoint_max_retries: u32,

	/// Checkpoints older than this are purged regardless of state.
	pub checkpoint_max_age_secs: u64,

	// ========================================================================
	// VERSIONING (spec.md §4.7)
	// ========================================================================
	/// Maximum versions retained per path (beyond `important`-tagged ones).
	pub max_versions_per_path: usize,

	/// Maximum age a version is retained, in seconds.
	pub max_version_age_secs: u64,

	/// Paths matching these glob patterns are never auto-pruned.
	pub important_version_patterns: Vec<String>,

	/// Versions are gzip-compressed once older than this, in seconds.
	pub version_compress_after_secs: u64,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			exclude_patterns: vec![],
			respect_ignore_files: true,

			compress_algorithm: CompressionAlgorithm::Zstd,

			sync_root: PathBuf::from("."),
			state_dir: std::env::var("HOME")
				.ok()
				.map(|h| PathBuf::from(h).join(".sentinelfs"))
				.unwrap_or_else(|| PathBuf::from(".sentinelfs")),
			session_code: String::new(),
			node_id: String::new(),
			tcp_port: 8080,

			max_upload_bytes_per_s: None,
			max_download_bytes_per_s: None,
			bandwidth_burst_allowance: 1 << 20,
			bandwidth_adaptive: false,
			bandwidth_allowed_hours: Vec::new(),

			checkpoint_recovery_interval_secs: 30,
			checkpoint_max_retries: 3,
			checkpoint_max_age_secs: 7 * 24 * 3600,

			max_versions_per_path: 10,
			max_version_age_secs: 30 * 24 * 3600,
			important_version_patterns: Vec::new(),
			version_compress_after_secs: 24 * 3600,
		}
	}
}

impl Config {
	/// Apply `SENTINELFS_*` environment overrides on top of defaults/file,
	/// before CLI flags get the final say. Malformed numeric/bool values are
	/// ignored (the existing value is kept) rather than treated as fatal.
	pub fn apply_env_overrides(&mut self) {
		if let Ok(v) = std::env::var("SENTINELFS_SESSION_CODE") {
			self.session_code = v;
		}
		if let Ok(v) = std::env::var("SENTINELFS_NODE_ID") {
			self.node_id = v;
		}
		if let Ok(v) = std::env::var("SENTINELFS_SYNC_ROOT") {
			self.sync_root = PathBuf::from(v);
		}
		if let Ok(v) = std::env::var("SENTINELFS_STATE_DIR") {
			self.state_dir = PathBuf::from(v);
		}
		if let Ok(v) = std::env::var("SENTINELFS_PORT") {
			if let Ok(port) = v.parse() {
				self.tcp_port = port;
			}
		}
		if let Ok(v) = std::env::var("SENTINELFS_MAX_UPLOAD_BYTES_PER_S") {
			self.max_upload_bytes_per_s = v.parse().ok();
		}
		if let Ok(v) = std::env::var("SENTINELFS_MAX_DOWNLOAD_BYTES_PER_S") {
			self.max_download_bytes_per_s = v.parse().ok();
		}
		if let Ok(v) = std::env::var("SENTINELFS_COMPRESS_ALGORITHM") {
			match v.to_lowercase().as_str() {
				"zstd" => self.compress_algorithm = CompressionAlgorithm::Zstd,
				"gzip" => self.compress_algorithm = CompressionAlgorithm::Gzip,
				"lz4" => self.compress_algorithm = CompressionAlgorithm::Lz4,
				_ => {}
			}
		}
	}
}

// ============================================================================
// ENUMERATIONS
// ============================================================================

/// Compression algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionAlgorithm {
	#[default]
	Zstd,
	Gzip,
	Lz4,
}

impl CompressionAlgorithm {
	/// Translate to the delta engine's own compression enum (spec.md
	/// supplemental: `compress_algorithm` reused for delta-chunk compression).
	pub fn to_delta_algo(self) -> crate::delta::CompressionAlgo {
		match self {
			CompressionAlgorithm::Zstd => crate::delta::CompressionAlgo::Zstd,
			CompressionAlgorithm::Gzip => crate::delta::CompressionAlgo::Gzip,
			CompressionAlgorithm::Lz4 => crate::delta::CompressionAlgo::Lz4,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_config_default() {
		let config = Config::default();
		assert_eq!(config.tcp_port, 8080);
		assert!(config.respect_ignore_files);
		assert_eq!(config.checkpoint_max_retries, 3);
	}

	#[test]
	fn test_config_serialization() {
		let config = Config::default();
		let json = serde_json::to_string(&config).expect("Failed to serialize");
		let deserialized: Config = serde_json::from_str(&json).expect("Failed to deserialize");
		assert_eq!(config.session_code, deserialized.session_code);
		assert_eq!(config.tcp_port, deserialized.tcp_port);
	}

	#[test]
	fn env_overrides_apply_on_top_of_defaults() {
		std::env::set_var("SENTINELFS_SESSION_CODE", "env-session");
		std::env::set_var("SENTINELFS_PORT", "9999");
		let mut config = Config::default();
		config.apply_env_overrides();
		assert_eq!(config.session_code, "env-session");
		assert_eq!(config.tcp_port, 9999);
		std::env::remove_var("SENTINELFS_SESSION_CODE");
		std::env::remove_var("SENTINELFS_PORT");
	}

	#[test]
	fn malformed_env_override_is_ignored() {
		std::env::set_var("SENTINELFS_PORT", "not-a-port");
		let mut config = Config::default();
		config.apply_env_overrides();
		assert_eq!(config.tcp_port, 8080, "malformed value should not clobber the existing one");
		std::env::remove_var("SENTINELFS_PORT");
	}
}

// vim: ts=4
