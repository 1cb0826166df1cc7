//! AEAD record sealing/opening.
//!
//! Grounded on the `chacha20poly1305`/`AeadInPlace` usage pattern from the
//! tendermint-rs secret connection in the retrieval pack, adapted to
//! AES-256-GCM as the wire default per the external record format.

use aes_gcm::aead::{generic_array::GenericArray, Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce as GcmNonce};
use chacha20poly1305::ChaCha20Poly1305;

use crate::error::CryptoError;

/// Seal `plaintext` under AES-256-GCM with the given 32-byte key, 12-byte
/// nonce, and additional authenticated data. Returns ciphertext with the
/// 16-byte tag appended, matching the external wire format.
pub fn seal_aes_gcm(
	key: &[u8; 32],
	nonce: &[u8; 12],
	aad: &[u8],
	plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
	let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
	let nonce = GcmNonce::from_slice(nonce);
	cipher
		.encrypt(nonce, aes_gcm::aead::Payload { msg: plaintext, aad })
		.map_err(|_| CryptoError::AeadFailure)
}

/// Open an AES-256-GCM sealed record (ciphertext with trailing 16-byte tag).
pub fn open_aes_gcm(
	key: &[u8; 32],
	nonce: &[u8; 12],
	aad: &[u8],
	ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
	let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
	let nonce = GcmNonce::from_slice(nonce);
	cipher
		.decrypt(nonce, aes_gcm::aead::Payload { msg: ciphertext, aad })
		.map_err(|_| CryptoError::AeadFailure)
}

/// Seal under ChaCha20-Poly1305, the alternate AEAD carried for platforms
/// without AES-NI.
pub fn seal_chacha20poly1305(
	key: &[u8; 32],
	nonce: &[u8; 12],
	aad: &[u8],
	plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
	use chacha20poly1305::aead::{Aead as ChaAead, KeyInit as ChaKeyInit};
	let cipher = ChaCha20Poly1305::new(GenericArray::from_slice(key));
	let nonce = chacha20poly1305::Nonce::from_slice(nonce);
	cipher
		.encrypt(nonce, chacha20poly1305::aead::Payload { msg: plaintext, aad })
		.map_err(|_| CryptoError::AeadFailure)
}

pub fn open_chacha20poly1305(
	key: &[u8; 32],
	nonce: &[u8; 12],
	aad: &[u8],
	ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
	use chacha20poly1305::aead::{Aead as ChaAead, KeyInit as ChaKeyInit};
	let cipher = ChaCha20Poly1305::new(GenericArray::from_slice(key));
	let nonce = chacha20poly1305::Nonce::from_slice(nonce);
	cipher
		.decrypt(nonce, chacha20poly1305::aead::Payload { msg: ciphertext, aad })
		.map_err(|_| CryptoError::AeadFailure)
}

/// Legacy AES-256-CBC + HMAC-SHA256 encrypt-then-MAC path, carried for the
/// 0x02 wire version. The MAC covers `version‖sequence‖iv‖ciphertext`, not
/// just the ciphertext — closing the gap left open in the source
/// implementation (see DESIGN.md Open Question b).
pub mod cbc_hmac {
	use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
	use hmac::{Hmac, Mac};
	use sha2::Sha256;

	use crate::error::CryptoError;

	type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
	type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
	type HmacSha256 = Hmac<Sha256>;

	/// Encrypt `plaintext` with AES-256-CBC then compute an HMAC-SHA256 over
	/// `aad_prefix ‖ iv ‖ ciphertext`. Returns (ciphertext, mac).
	pub fn seal(
		enc_key: &[u8; 32],
		mac_key: &[u8; 32],
		iv: &[u8; 16],
		aad_prefix: &[u8],
		plaintext: &[u8],
	) -> Result<(Vec<u8>, [u8; 32]), CryptoError> {
		let ciphertext =
			Aes256CbcEnc::new(enc_key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

		let mut mac = HmacSha256::new_from_slice(mac_key)
			.map_err(|e| CryptoError::KdfFailure { message: e.to_string() })?;
		mac.update(aad_prefix);
		mac.update(iv);
		mac.update(&ciphertext);
		let tag = mac.finalize().into_bytes();
		let mut out = [0u8; 32];
		out.copy_from_slice(&tag);

		Ok((ciphertext, out))
	}

	/// Verify the HMAC in constant time, then decrypt.
	pub fn open(
		enc_key: &[u8; 32],
		mac_key: &[u8; 32],
		iv: &[u8; 16],
		aad_prefix: &[u8],
		ciphertext: &[u8],
		tag: &[u8; 32],
	) -> Result<Vec<u8>, CryptoError> {
		use subtle::ConstantTimeEq;

		let mut mac = HmacSha256::new_from_slice(mac_key)
			.map_err(|e| CryptoError::KdfFailure { message: e.to_string() })?;
		mac.update(aad_prefix);
		mac.update(iv);
		mac.update(ciphertext);
		let expected = mac.finalize().into_bytes();

		if expected.as_slice().ct_eq(tag).unwrap_u8() != 1 {
			return Err(CryptoError::AeadFailure);
		}

		Aes256CbcDec::new(enc_key.into(), iv.into())
			.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
			.map_err(|_| CryptoError::AeadFailure)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn aes_gcm_round_trip() {
		let key = [1u8; 32];
		let nonce = [2u8; 12];
		let aad = b"header";
		let plaintext = b"the quick brown fox";

		let ciphertext = seal_aes_gcm(&key, &nonce, aad, plaintext).unwrap();
		let decrypted = open_aes_gcm(&key, &nonce, aad, &ciphertext).unwrap();
		assert_eq!(decrypted, plaintext);
	}

	#[test]
	fn aes_gcm_tamper_detected() {
		let key = [1u8; 32];
		let nonce = [2u8; 12];
		let aad = b"header";
		let plaintext = b"the quick brown fox";

		let mut ciphertext = seal_aes_gcm(&key, &nonce, aad, plaintext).unwrap();
		let last = ciphertext.len() - 1;
		ciphertext[last] ^= 0xFF;

		assert!(open_aes_gcm(&key, &nonce, aad, &ciphertext).is_err());
	}

	#[test]
	fn aes_gcm_wrong_aad_rejected() {
		let key = [1u8; 32];
		let nonce = [2u8; 12];
		let plaintext = b"payload";

		let ciphertext = seal_aes_gcm(&key, &nonce, b"aad-a", plaintext).unwrap();
		assert!(open_aes_gcm(&key, &nonce, b"aad-b", &ciphertext).is_err());
	}

	#[test]
	fn chacha20poly1305_round_trip() {
		let key = [9u8; 32];
		let nonce = [3u8; 12];
		let plaintext = b"alternate cipher path";

		let ciphertext = seal_chacha20poly1305(&key, &nonce, b"", plaintext).unwrap();
		let decrypted = open_chacha20poly1305(&key, &nonce, b"", &ciphertext).unwrap();
		assert_eq!(decrypted, plaintext);
	}

	#[test]
	fn cbc_hmac_round_trip() {
		let enc_key = [4u8; 32];
		let mac_key = [5u8; 32];
		let iv = [6u8; 16];
		let aad_prefix = b"\x02\x00\x00\x00\x00\x00\x00\x00\x01";
		let plaintext = b"legacy path message";

		let (ciphertext, tag) =
			cbc_hmac::seal(&enc_key, &mac_key, &iv, aad_prefix, plaintext).unwrap();
		let decrypted =
			cbc_hmac::open(&enc_key, &mac_key, &iv, aad_prefix, &ciphertext, &tag).unwrap();
		assert_eq!(decrypted, plaintext);
	}

	#[test]
	fn cbc_hmac_rejects_bad_tag() {
		let enc_key = [4u8; 32];
		let mac_key = [5u8; 32];
		let iv = [6u8; 16];
		let aad_prefix = b"prefix";
		let plaintext = b"legacy path message";

		let (ciphertext, mut tag) =
			cbc_hmac::seal(&enc_key, &mac_key, &iv, aad_prefix, plaintext).unwrap();
		tag[0] ^= 0xFF;

		assert!(cbc_hmac::open(&enc_key, &mac_key, &iv, aad_prefix, &ciphertext, &tag).is_err());
	}
}
