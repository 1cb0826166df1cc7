//! Delta engine: content-addressed, fixed-size block diffing and reconstruction.
//!
//! Unlike the rolling-hash content-defined chunking used elsewhere in this
//! crate, the delta engine slices files into fixed-stride blocks (rsync
//! style). A shift of a single byte near the start of a file means every
//! following block hash changes, which is the accepted trade-off for the
//! simplicity of a fixed stride: callers that need shift-resistant dedup
//! should use the `chunking`/`chunk_tracker` machinery instead.

use std::collections::HashMap;
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::DeltaError;
use crate::util::hash_binary;

/// Default block size: 1 MiB, matching the external wire format.
pub const DEFAULT_BLOCK_SIZE: usize = 1 << 20;

/// Compressor applied to each `DeltaOp::Literal`'s bytes (spec.md §4.3:
/// "default gzip; zstd/lz4 are pluggable").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionAlgo {
	Gzip,
	Zstd,
	Lz4,
}

impl Default for CompressionAlgo {
	fn default() -> Self {
		CompressionAlgo::Gzip
	}
}

impl CompressionAlgo {
	fn compress(self, data: &[u8]) -> Result<Vec<u8>, DeltaError> {
		match self {
			CompressionAlgo::Gzip => {
				let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
				encoder
					.write_all(data)
					.map_err(|e| DeltaError::CompressionFailure { message: e.to_string() })?;
				encoder.finish().map_err(|e| DeltaError::CompressionFailure { message: e.to_string() })
			}
			CompressionAlgo::Zstd => zstd::stream::encode_all(data, 0)
				.map_err(|e| DeltaError::CompressionFailure { message: e.to_string() }),
			CompressionAlgo::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
		}
	}

	fn decompress(self, data: &[u8]) -> Result<Vec<u8>, DeltaError> {
		match self {
			CompressionAlgo::Gzip => {
				let mut decoder = GzDecoder::new(data);
				let mut out = Vec::new();
				decoder
					.read_to_end(&mut out)
					.map_err(|e| DeltaError::CompressionFailure { message: e.to_string() })?;
				Ok(out)
			}
			CompressionAlgo::Zstd => zstd::stream::decode_all(data)
				.map_err(|e| DeltaError::CompressionFailure { message: e.to_string() }),
			CompressionAlgo::Lz4 => lz4_flex::decompress_size_prepended(data)
				.map_err(|e| DeltaError::CompressionFailure { message: e.to_string() }),
		}
	}
}

/// A single fixed-size block of file content, identified by its SHA-256 hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
	pub index: u32,
	pub offset: u64,
	pub size: u32,
	pub hash: [u8; 32],
}

/// One instruction in a delta: either reuse a block the peer already has, or
/// ship fresh literal bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaOp {
	/// Peer already holds a block with this hash; copy it verbatim.
	Copy { hash: [u8; 32] },
	/// Peer has no matching block; ship the bytes.
	Literal { data: Vec<u8> },
}

/// A full delta: the target file's block layout plus the ops needed to
/// reconstruct it from a set of known blocks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
	pub block_size: u32,
	pub total_size: u64,
	pub ops: Vec<DeltaOp>,
	/// SHA-256 over the full reconstructed content, checked after apply.
	pub content_hash: [u8; 32],
	/// Set by `compute_compressed`; signals the receiver to decompress each
	/// `Literal` op's bytes with `compression_algo` before applying.
	pub compressed: bool,
	pub compression_algo: Option<CompressionAlgo>,
}

/// Split `data` into fixed-size blocks of `block_size` bytes (last block may
/// be shorter). This is the basic unit both `diff` and `BlockIndex` operate on.
pub fn split_blocks(data: &[u8], block_size: usize) -> Vec<Block> {
	let mut blocks = Vec::new();
	let mut offset = 0u64;
	let mut index = 0u32;
	for chunk in data.chunks(block_size.max(1)) {
		blocks.push(Block {
			index,
			offset,
			size: chunk.len() as u32,
			hash: hash_binary(chunk),
		});
		offset += chunk.len() as u64;
		index += 1;
	}
	blocks
}

/// An index of blocks a peer is known to already hold, keyed by content hash.
/// Built from the receiver's previous-version block list before a diff is
/// requested, so the sender can avoid re-transmitting unchanged blocks.
#[derive(Default, Clone, Debug)]
pub struct BlockIndex {
	known: HashMap<[u8; 32], ()>,
}

impl BlockIndex {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_blocks(blocks: &[Block]) -> Self {
		let mut known = HashMap::with_capacity(blocks.len());
		for b in blocks {
			known.insert(b.hash, ());
		}
		BlockIndex { known }
	}

	pub fn contains(&self, hash: &[u8; 32]) -> bool {
		self.known.contains_key(hash)
	}

	pub fn insert(&mut self, hash: [u8; 32]) {
		self.known.insert(hash, ());
    }
}

/// Compute a delta transforming whatever the peer already has (described by
/// `peer_known`) into `new_content`.
pub fn diff(new_content: &[u8], peer_known: &BlockIndex, block_size: usize) -> Delta {
	let block_size = if block_size == 0 { DEFAULT_BLOCK_SIZE } else { block_size };
	let blocks = split_blocks(new_content, block_size);

	let mut ops = Vec::with_capacity(blocks.len());
	for (block, raw) in blocks.iter().zip(new_content.chunks(block_size)) {
		if peer_known.contains(&block.hash) {
			ops.push(DeltaOp::Copy { hash: block.hash });
		} else {
			ops.push(DeltaOp::Literal { data: raw.to_vec() });
		}
	}

	Delta {
		block_size: block_size as u32,
		total_size: new_content.len() as u64,
		ops,
		content_hash: hash_binary(new_content),
		compressed: false,
		compression_algo: None,
	}
}

/// Like `diff`, but compresses each `Literal` op's bytes with `algo` (spec.md
/// §4.3 `compute_compressed`). Blocks are compressed independently, so a
/// receiver can decompress them one at a time.
pub fn compute_compressed(
	new_content: &[u8],
	peer_known: &BlockIndex,
	block_size: usize,
	algo: CompressionAlgo,
) -> Result<Delta, DeltaError> {
	let mut delta = diff(new_content, peer_known, block_size);
	for op in &mut delta.ops {
		if let DeltaOp::Literal { data } = op {
			*data = algo.compress(data)?;
		}
	}
	delta.compressed = true;
	delta.compression_algo = Some(algo);
	Ok(delta)
}

/// Reconstructs content from a delta produced by `compute_compressed`,
/// decompressing each `Literal` op's bytes before reassembly.
pub fn apply_compressed(
	delta: &Delta,
	local_blocks: &HashMap<[u8; 32], Vec<u8>>,
) -> Result<Vec<u8>, DeltaError> {
	if !delta.compressed {
		return apply(delta, local_blocks);
	}
	let algo = delta.compression_algo.unwrap_or_default();
	let mut out = Vec::with_capacity(delta.total_size as usize);
	for op in &delta.ops {
		match op {
			DeltaOp::Copy { hash } => {
				let block = local_blocks
					.get(hash)
					.ok_or(DeltaError::MissingBlock { hash: hex::encode(hash) })?;
				out.extend_from_slice(block);
			}
			DeltaOp::Literal { data } => {
				out.extend_from_slice(&algo.decompress(data)?);
			}
		}
	}

	let actual = hash_binary(&out);
	if actual != delta.content_hash {
		return Err(DeltaError::ContentHashMismatch {
			expected: hex::encode(delta.content_hash),
			actual: hex::encode(actual),
		});
	}

	Ok(out)
}

/// Reconstruct file content by applying `delta`, resolving `DeltaOp::Copy`
/// entries against `local_blocks` (hash -> bytes, the receiver's existing
/// block store). Returns an error if a referenced hash isn't available
/// locally, or if the reconstructed content's hash doesn't match.
pub fn apply(
	delta: &Delta,
	local_blocks: &HashMap<[u8; 32], Vec<u8>>,
) -> Result<Vec<u8>, DeltaError> {
	let mut out = Vec::with_capacity(delta.total_size as usize);
	for op in &delta.ops {
		match op {
			DeltaOp::Copy { hash } => {
				let block = local_blocks
					.get(hash)
					.ok_or(DeltaError::MissingBlock { hash: hex::encode(hash) })?;
				out.extend_from_slice(block);
			}
			DeltaOp::Literal { data } => out.extend_from_slice(data),
		}
	}

	let actual = hash_binary(&out);
	if actual != delta.content_hash {
		return Err(DeltaError::ContentHashMismatch {
			expected: hex::encode(delta.content_hash),
			actual: hex::encode(actual),
		});
	}

	Ok(out)
}

/// Fraction of `delta`'s blocks that are literal (i.e. actually transferred),
/// used by the orchestrator to decide whether a delta is worth sending versus
/// a full-file transfer.
pub fn literal_ratio(delta: &Delta) -> f64 {
	if delta.ops.is_empty() {
		return 0.0;
	}
	let literal = delta.ops.iter().filter(|op| matches!(op, DeltaOp::Literal { .. })).count();
	literal as f64 / delta.ops.len() as f64
}
