//! Wire record framing.
//!
//! Layout: `version(1) ‖ sequence(8, big-endian) ‖ nonce ‖ ciphertext ‖ [hmac]`
//!
//! - version `0x02`: legacy AES-256-CBC + HMAC-SHA256 path. `nonce` is a
//!   16-byte IV; `hmac` (32 bytes) covers `version‖sequence‖iv‖ciphertext`.
//! - version `0x03`: current AES-256-GCM path. `nonce` is 12 bytes;
//!   `ciphertext` includes the 16-byte GCM tag appended; no trailing `hmac`
//!   field. AAD is `version‖sequence‖nonce`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::crypto::aead::{cbc_hmac, open_aes_gcm, seal_aes_gcm};
use crate::error::{CryptoError, TransportError};

use super::replay::ReplayGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordVersion {
	CbcHmac = 0x02,
	Gcm = 0x03,
}

impl RecordVersion {
	fn from_byte(b: u8) -> Result<Self, TransportError> {
		match b {
			0x02 => Ok(RecordVersion::CbcHmac),
			0x03 => Ok(RecordVersion::Gcm),
			other => Err(TransportError::FramingError {
				message: format!("unknown record version byte: {:#04x}", other),
			}),
		}
	}
}

/// Writes sealed records to an async byte sink, maintaining a monotonic
/// sequence counter (the replay guard on the read side rejects a sequence
/// seen before).
pub struct RecordWriter<W> {
	sink: W,
	version: RecordVersion,
	enc_key: [u8; 32],
	mac_key: Option<[u8; 32]>,
	sequence: u64,
}

impl<W: AsyncWrite + Unpin> RecordWriter<W> {
	pub fn new_gcm(sink: W, key: [u8; 32]) -> Self {
		RecordWriter { sink, version: RecordVersion::Gcm, enc_key: key, mac_key: None, sequence: 0 }
	}

	pub fn new_cbc_hmac(sink: W, enc_key: [u8; 32], mac_key: [u8; 32]) -> Self {
		RecordWriter {
			sink,
			version: RecordVersion::CbcHmac,
			enc_key,
			mac_key: Some(mac_key),
			sequence: 0,
		}
	}

	pub async fn write_record(&mut self, plaintext: &[u8]) -> Result<(), TransportError> {
		let sequence = self.sequence;
		self.sequence = self.sequence.checked_add(1).expect("sequence counter overflow");

		let mut frame = vec![self.version as u8];
		frame.extend_from_slice(&sequence.to_be_bytes());

		match self.version {
			RecordVersion::Gcm => {
				let nonce = gcm_nonce_for(sequence);
				let mut aad = Vec::with_capacity(1 + 8 + 12);
				aad.push(self.version as u8);
				aad.extend_from_slice(&sequence.to_be_bytes());
				aad.extend_from_slice(&nonce);

				let ciphertext = seal_aes_gcm(&self.enc_key, &nonce, &aad, plaintext)?;
				frame.extend_from_slice(&nonce);
				frame.extend_from_slice(&ciphertext);
			}
			RecordVersion::CbcHmac => {
				let iv = cbc_iv_for(sequence);
				let mac_key = self.mac_key.expect("cbc writer always has a mac key");
				let mut aad_prefix = Vec::with_capacity(9);
				aad_prefix.push(self.version as u8);
				aad_prefix.extend_from_slice(&sequence.to_be_bytes());

				let (ciphertext, tag) =
					cbc_hmac::seal(&self.enc_key, &mac_key, &iv, &aad_prefix, plaintext)?;
				frame.extend_from_slice(&iv);
				frame.extend_from_slice(&ciphertext);
				frame.extend_from_slice(&tag);
			}
		}

		let len = frame.len() as u32;
		self.sink.write_all(&len.to_be_bytes()).await?;
		self.sink.write_all(&frame).await?;
		self.sink.flush().await?;
		Ok(())
	}
}

/// Reads and opens records from an async byte source, rejecting replayed
/// sequence numbers via a `ReplayGuard`.
pub struct RecordReader<R> {
	source: R,
	enc_key: [u8; 32],
	mac_key: Option<[u8; 32]>,
	replay_guard: ReplayGuard,
}

impl<R: AsyncRead + Unpin> RecordReader<R> {
	pub fn new_gcm(source: R, key: [u8; 32]) -> Self {
		RecordReader { source, enc_key: key, mac_key: None, replay_guard: ReplayGuard::new() }
	}

	pub fn new_cbc_hmac(source: R, enc_key: [u8; 32], mac_key: [u8; 32]) -> Self {
		RecordReader { source, enc_key, mac_key: Some(mac_key), replay_guard: ReplayGuard::new() }
	}

	pub async fn read_record(&mut self) -> Result<Vec<u8>, TransportError> {
		let mut len_buf = [0u8; 4];
		self.source.read_exact(&mut len_buf).await?;
		let len = u32::from_be_bytes(len_buf) as usize;

		let mut frame = vec![0u8; len];
		self.source.read_exact(&mut frame).await?;

		if frame.is_empty() {
			return Err(TransportError::FramingError { message: "empty record".into() });
		}

		let version = RecordVersion::from_byte(frame[0])?;
		if frame.len() < 9 {
			return Err(TransportError::FramingError { message: "record shorter than header".into() });
		}
		let sequence = u64::from_be_bytes(frame[1..9].try_into().unwrap());

		if !self.replay_guard.accept(sequence) {
			return Err(TransportError::Crypto(CryptoError::ReplayDetected { sequence }));
		}

		let plaintext = match version {
			RecordVersion::Gcm => {
				if frame.len() < 9 + 12 {
					return Err(TransportError::FramingError { message: "gcm record too short".into() });
				}
				let nonce: [u8; 12] = frame[9..21].try_into().unwrap();
				let ciphertext = &frame[21..];
				let mut aad = Vec::with_capacity(21);
				aad.push(frame[0]);
				aad.extend_from_slice(&frame[1..9]);
				aad.extend_from_slice(&nonce);
				open_aes_gcm(&self.enc_key, &nonce, &aad, ciphertext)?
			}
			RecordVersion::CbcHmac => {
				if frame.len() < 9 + 16 + 32 {
					return Err(TransportError::FramingError { message: "cbc record too short".into() });
				}
				let iv: [u8; 16] = frame[9..25].try_into().unwrap();
				let tag: [u8; 32] = frame[frame.len() - 32..].try_into().unwrap();
				let ciphertext = &frame[25..frame.len() - 32];
				let mac_key = self
					.mac_key
					.ok_or_else(|| TransportError::FramingError { message: "missing mac key".into() })?;
				cbc_hmac::open(&self.enc_key, &mac_key, &iv, &frame[0..9], ciphertext, &tag)?
			}
		};

		Ok(plaintext)
	}
}

fn gcm_nonce_for(sequence: u64) -> [u8; 12] {
	let mut nonce = [0u8; 12];
	nonce[4..].copy_from_slice(&sequence.to_be_bytes());
	nonce
}

fn cbc_iv_for(sequence: u64) -> [u8; 16] {
	let mut iv = [0u8; 16];
	iv[8..].copy_from_slice(&sequence.to_be_bytes());
	iv
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn gcm_round_trip() {
		let key = [1u8; 32];
		let (client, server) = tokio::io::duplex(4096);
		let (read_half, write_half) = tokio::io::split(client);
		let (server_read, server_write) = tokio::io::split(server);
		drop(read_half);
		drop(server_write);

		let mut writer = RecordWriter::new_gcm(write_half, key);
		let mut reader = RecordReader::new_gcm(server_read, key);

		writer.write_record(b"first message").await.unwrap();
		writer.write_record(b"second message").await.unwrap();

		assert_eq!(reader.read_record().await.unwrap(), b"first message");
		assert_eq!(reader.read_record().await.unwrap(), b"second message");
	}

	#[tokio::test]
	async fn gcm_replay_rejected() {
		let key = [1u8; 32];
		let (client, server) = tokio::io::duplex(4096);
		let (_read_half, write_half) = tokio::io::split(client);
		let (server_read, _server_write) = tokio::io::split(server);

		let mut writer = RecordWriter::new_gcm(write_half, key);
		writer.write_record(b"hello").await.unwrap();

		let mut reader = RecordReader::new_gcm(server_read, key);
		reader.replay_guard.accept(0);

		let result = reader.read_record().await;
		assert!(matches!(
			result,
			Err(TransportError::Crypto(CryptoError::ReplayDetected { sequence: 0 }))
		));
	}

	#[tokio::test]
	async fn cbc_hmac_round_trip() {
		let enc_key = [2u8; 32];
		let mac_key = [3u8; 32];
		let (client, server) = tokio::io::duplex(4096);
		let (_rh, wh) = tokio::io::split(client);
		let (sr, _sw) = tokio::io::split(server);

		let mut writer = RecordWriter::new_cbc_hmac(wh, enc_key, mac_key);
		let mut reader = RecordReader::new_cbc_hmac(sr, enc_key, mac_key);

		writer.write_record(b"legacy path payload").await.unwrap();
		assert_eq!(reader.read_record().await.unwrap(), b"legacy path payload");
	}

	#[tokio::test]
	async fn unknown_version_byte_rejected() {
		assert!(RecordVersion::from_byte(0x99).is_err());
	}
}
