//! Utility functions for SentinelFS.
#![allow(dead_code)]

use base64::engine::Engine;

/// Hash a buffer using SHA-256 and return base64-encoded result
pub fn hash(buf: &[u8]) -> String {
	hash_to_base64(&hash_binary(buf))
}

/// Hash a buffer using SHA-256 and return binary result
pub fn hash_binary(buf: &[u8]) -> [u8; 32] {
	use sha2::Digest;
	let mut hasher = sha2::Sha256::new();
	hasher.update(buf);
	hasher.finalize().into()
}

/// Convert binary hash to base64 string (for protocol transmission)
pub fn hash_to_base64(hash: &[u8; 32]) -> String {
	base64::engine::general_purpose::URL_SAFE.encode(hash)
}

/// Convert base64 string to binary hash
pub fn base64_to_hash(b64: &str) -> Result<[u8; 32], Box<dyn std::error::Error>> {
	let bytes = base64::engine::general_purpose::URL_SAFE.decode(b64)?;
	if bytes.len() != 32 {
		return Err(format!("Hash must be 32 bytes, got {}", bytes.len()).into());
	}
	let mut hash = [0u8; 32];
	hash.copy_from_slice(&bytes);
	Ok(hash)
}


// vim: ts=4
