//! X25519 ephemeral Diffie-Hellman, grounded on the
//! `EphemeralSecret`/`PublicKey` usage in the tendermint-rs secret connection
//! handshake in the retrieval pack, including its rejection of a degenerate
//! (all-zero) shared secret as a defense against low-order-point attacks.

use subtle::ConstantTimeEq;
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::error::CryptoError;

pub struct EphemeralKeypair {
	pub secret: EphemeralSecret,
	pub public: PublicKey,
}

pub fn generate_ephemeral() -> EphemeralKeypair {
	let secret = EphemeralSecret::random_from_rng(rand_core::OsRng);
	let public = PublicKey::from(&secret);
	EphemeralKeypair { secret, public }
}

/// Compute the X25519 shared secret and reject the all-zero output that
/// results from a malicious peer sending a low-order point.
pub fn derive_shared_secret(
	local_secret: EphemeralSecret,
	remote_public: &PublicKey,
) -> Result<[u8; 32], CryptoError> {
	let shared = local_secret.diffie_hellman(remote_public);
	let bytes = shared.to_bytes();

	if bytes.ct_eq(&[0u8; 32]).unwrap_u8() == 1 {
		return Err(CryptoError::DegenerateSharedSecret);
	}

	Ok(bytes)
}
