//! Ed25519 peer identity signing, grounded on the `ed25519_dalek`
//! `Signer`/`Verifier` usage in the tendermint-rs secret connection handshake
//! in the retrieval pack.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;

use crate::error::CryptoError;

/// A freshly generated Ed25519 identity keypair (raw bytes, not yet wrapped
/// in the `keys` module's `IdentityKeyPair` metadata).
pub struct GeneratedKeypair {
	pub signing_key: SigningKey,
	pub verifying_key: VerifyingKey,
}

pub fn generate_identity_keypair() -> GeneratedKeypair {
	let signing_key = SigningKey::generate(&mut OsRng);
	let verifying_key = signing_key.verifying_key();
	GeneratedKeypair { signing_key, verifying_key }
}

pub fn sign(signing_key: &SigningKey, message: &[u8]) -> Signature {
	signing_key.sign(message)
}

pub fn verify(
	verifying_key: &VerifyingKey,
	message: &[u8],
	signature: &Signature,
) -> Result<(), CryptoError> {
	verifying_key.verify(message, signature).map_err(|_| CryptoError::InvalidSignature)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sign_and_verify_round_trip() {
		let kp = generate_identity_keypair();
		let message = b"HELLO transcript bytes";
		let sig = sign(&kp.signing_key, message);
		assert!(verify(&kp.verifying_key, message, &sig).is_ok());
	}

	#[test]
	fn verify_rejects_tampered_message() {
		let kp = generate_identity_keypair();
		let sig = sign(&kp.signing_key, b"original message");
		assert!(verify(&kp.verifying_key, b"tampered message", &sig).is_err());
	}

	#[test]
	fn verify_rejects_wrong_key() {
		let kp_a = generate_identity_keypair();
		let kp_b = generate_identity_keypair();
		let sig = sign(&kp_a.signing_key, b"message");
		assert!(verify(&kp_b.verifying_key, b"message", &sig).is_err());
	}
}
