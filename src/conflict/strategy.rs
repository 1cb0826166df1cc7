//! Pairwise local-vs-incoming conflict resolution.
//!
//! Distinct from `resolver::ConflictResolver`, which resolves an n-way
//! conflict across named sync locations by picking one winning location.
//! Here the orchestrator always resolves exactly two sides — the file as it
//! stands locally, and an inbound delta from a single peer — so the strategy
//! set and the winner shape are different. The dispatch-over-a-sum-type idiom
//! is carried over unchanged from `resolver::ConflictResolver::resolve`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::ConflictError;

fn now_unix() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// One of the five named strategies from spec.md §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
	Timestamp,
	Latest,
	Merge,
	Backup,
	PeerVote,
}

/// One side of a pairwise conflict: either the file as currently held
/// locally, or the incoming peer's version.
#[derive(Debug, Clone)]
pub struct ConflictSide {
	pub content: Vec<u8>,
	pub mtime: u64,
	pub peer_id: String,
}

/// Outcome of resolving a conflict: the bytes that become the new `path`
/// content, and — for `merge`/`backup`/any strategy that keeps a loser
/// around — the bytes to write to a `path.backup_<unix_ts>` sidecar.
#[derive(Debug, Clone)]
pub struct ConflictOutcome {
	pub winner: Vec<u8>,
	pub backup: Option<Vec<u8>>,
	pub record: ConflictRecord,
}

/// Event-log entry describing how a conflict was resolved (spec.md §4.6
/// "the resolver returns ... a `ConflictRecord` for the event log").
#[derive(Debug, Clone)]
pub struct ConflictRecord {
	pub strategy: ConflictStrategy,
	pub resolved_at: u64,
	pub winner_peer_id: String,
	pub backup_written: bool,
}

/// Detection predicate (spec.md §4.5 step 4 / §4.6): a conflict exists when
/// the local copy has moved on from the ancestor the incoming delta was
/// computed against, and the local side's version has kept pace with (or
/// outrun) what the peer last knew about it — i.e. both sides independently
/// advanced from a common point.
pub fn detect_conflict(
	local_content_hash: [u8; 32],
	incoming_old_hash: [u8; 32],
	local_version: u32,
	incoming_known_peer_version: u32,
) -> bool {
	local_content_hash != incoming_old_hash && local_version >= incoming_known_peer_version
}

/// Resolve a two-sided conflict per `strategy`. `is_text` tells `merge`
/// whether concatenation is meaningful; `voters` and `query_peer` back
/// `peer_vote`'s authorized-peer poll (kept as an injected closure so this
/// function stays synchronous and unit-testable rather than needing an
/// async transport handle — spec.md §4.6 supplement).
pub fn resolve(
	strategy: ConflictStrategy,
	local: &ConflictSide,
	incoming: &ConflictSide,
	is_text: bool,
	voters: &[String],
	query_peer: &dyn Fn(&str) -> Option<[u8; 32]>,
) -> Result<ConflictOutcome, ConflictError> {
	let resolved_at = now_unix();

	match strategy {
		ConflictStrategy::Timestamp => {
			// Ties go to incoming (spec.md §4.6: "ties -> incoming").
			if incoming.mtime >= local.mtime {
				Ok(backup_outcome(ConflictStrategy::Timestamp, resolved_at, incoming, local, true))
			} else {
				Ok(backup_outcome(ConflictStrategy::Timestamp, resolved_at, local, incoming, true))
			}
		}

		ConflictStrategy::Latest => {
			Ok(ConflictOutcome {
				winner: incoming.content.clone(),
				backup: None,
				record: ConflictRecord {
					strategy: ConflictStrategy::Latest,
					resolved_at,
					winner_peer_id: incoming.peer_id.clone(),
					backup_written: false,
				},
			})
		}

		ConflictStrategy::Merge => {
			if !is_text {
				return resolve(ConflictStrategy::Backup, local, incoming, is_text, voters, query_peer);
			}
			let mut merged = Vec::with_capacity(local.content.len() + incoming.content.len() + 64);
			merged.extend_from_slice(&local.content);
			merged.extend_from_slice(b"\n<<<<<<< merged from peer ");
			merged.extend_from_slice(incoming.peer_id.as_bytes());
			merged.extend_from_slice(b" >>>>>>>\n");
			merged.extend_from_slice(&incoming.content);
			Ok(ConflictOutcome {
				winner: merged,
				backup: None,
				record: ConflictRecord {
					strategy: ConflictStrategy::Merge,
					resolved_at,
					winner_peer_id: incoming.peer_id.clone(),
					backup_written: false,
				},
			})
		}

		ConflictStrategy::Backup => {
			Ok(backup_outcome(ConflictStrategy::Backup, resolved_at, incoming, local, true))
		}

		ConflictStrategy::PeerVote => {
			let incoming_hash = crate::util::hash_binary(&incoming.content);
			let local_hash = crate::util::hash_binary(&local.content);

			let mut tally: std::collections::HashMap<[u8; 32], Vec<&str>> = std::collections::HashMap::new();
			for voter in voters {
				if let Some(hash) = query_peer(voter) {
					tally.entry(hash).or_default().push(voter.as_str());
				}
			}

			let best = tally
				.iter()
				.max_by(|a, b| {
					a.1.len().cmp(&b.1.len()).then_with(|| {
						// Deterministic tie-break: lowest lexicographic peer_id among
						// each side's voters wins the comparison.
						let a_min = a.1.iter().min().copied().unwrap_or("");
						let b_min = b.1.iter().min().copied().unwrap_or("");
						b_min.cmp(a_min)
					})
				})
				.map(|(hash, v)| (*hash, v.len()));

			let tie = match &best {
				Some((_, count)) => tally.values().filter(|v| v.len() == *count).count() > 1,
				None => true,
			};

			if tie || best.is_none() {
				return resolve(ConflictStrategy::Backup, local, incoming, is_text, voters, query_peer);
			}

			let (winning_hash, _) = best.unwrap();
			if winning_hash == incoming_hash {
				Ok(ConflictOutcome {
					winner: incoming.content.clone(),
					backup: None,
					record: ConflictRecord {
						strategy: ConflictStrategy::PeerVote,
						resolved_at,
						winner_peer_id: incoming.peer_id.clone(),
						backup_written: false,
					},
				})
			} else if winning_hash == local_hash {
				Ok(ConflictOutcome {
					winner: local.content.clone(),
					backup: None,
					record: ConflictRecord {
						strategy: ConflictStrategy::PeerVote,
						resolved_at,
						winner_peer_id: local.peer_id.clone(),
						backup_written: false,
					},
				})
			} else {
				// Majority favors neither side's bytes outright (a third variant won
				// the vote) — fall back to backup rather than invent content.
				resolve(ConflictStrategy::Backup, local, incoming, is_text, voters, query_peer)
			}
		}
	}
}

fn backup_outcome(
	strategy: ConflictStrategy,
	resolved_at: u64,
	winner: &ConflictSide,
	loser: &ConflictSide,
	keep_backup: bool,
) -> ConflictOutcome {
	ConflictOutcome {
		winner: winner.content.clone(),
		backup: if keep_backup { Some(loser.content.clone()) } else { None },
		record: ConflictRecord {
			strategy,
			resolved_at,
			winner_peer_id: winner.peer_id.clone(),
			backup_written: keep_backup,
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn side(content: &[u8], mtime: u64, peer_id: &str) -> ConflictSide {
		ConflictSide { content: content.to_vec(), mtime, peer_id: peer_id.to_string() }
	}

	#[test]
	fn detect_conflict_true_when_diverged_and_caught_up() {
		assert!(detect_conflict([1u8; 32], [2u8; 32], 3, 2));
	}

	#[test]
	fn detect_conflict_false_when_hashes_match() {
		assert!(!detect_conflict([1u8; 32], [1u8; 32], 3, 2));
	}

	#[test]
	fn detect_conflict_false_when_local_behind_peer_known_version() {
		assert!(!detect_conflict([1u8; 32], [2u8; 32], 1, 5));
	}

	#[test]
	fn timestamp_strategy_picks_newer_mtime() {
		let local = side(b"local", 100, "local-peer");
		let incoming = side(b"incoming", 200, "peerA");
		let outcome =
			resolve(ConflictStrategy::Timestamp, &local, &incoming, false, &[], &|_| None).unwrap();
		assert_eq!(outcome.winner, b"incoming");
		assert_eq!(outcome.backup.as_deref(), Some(b"local".as_slice()));
	}

	#[test]
	fn timestamp_strategy_ties_go_to_incoming() {
		let local = side(b"local", 100, "local-peer");
		let incoming = side(b"incoming", 100, "peerA");
		let outcome =
			resolve(ConflictStrategy::Timestamp, &local, &incoming, false, &[], &|_| None).unwrap();
		assert_eq!(outcome.winner, b"incoming");
	}

	#[test]
	fn latest_strategy_always_takes_incoming() {
		let local = side(b"local", 900, "local-peer");
		let incoming = side(b"incoming", 1, "peerA");
		let outcome = resolve(ConflictStrategy::Latest, &local, &incoming, false, &[], &|_| None).unwrap();
		assert_eq!(outcome.winner, b"incoming");
		assert!(outcome.backup.is_none());
	}

	#[test]
	fn merge_concatenates_text_files() {
		let local = side(b"line-a", 1, "local-peer");
		let incoming = side(b"line-b", 2, "peerA");
		let outcome = resolve(ConflictStrategy::Merge, &local, &incoming, true, &[], &|_| None).unwrap();
		assert!(outcome.winner.starts_with(b"line-a"));
		assert!(outcome.winner.ends_with(b"line-b"));
	}

	#[test]
	fn merge_falls_back_to_backup_for_binary_files() {
		let local = side(&[0xde, 0xad], 1, "local-peer");
		let incoming = side(&[0xbe, 0xef], 2, "peerA");
		let outcome = resolve(ConflictStrategy::Merge, &local, &incoming, false, &[], &|_| None).unwrap();
		assert_eq!(outcome.record.strategy, ConflictStrategy::Backup);
		assert!(outcome.backup.is_some());
	}

	#[test]
	fn backup_strategy_keeps_both_incoming_as_primary() {
		let local = side(b"local", 1, "local-peer");
		let incoming = side(b"incoming", 2, "peerA");
		let outcome = resolve(ConflictStrategy::Backup, &local, &incoming, false, &[], &|_| None).unwrap();
		assert_eq!(outcome.winner, b"incoming");
		assert_eq!(outcome.backup.as_deref(), Some(b"local".as_slice()));
		assert!(outcome.record.backup_written);
	}

	#[test]
	fn peer_vote_majority_picks_incoming() {
		let local = side(b"local", 1, "local-peer");
		let incoming = side(b"incoming", 2, "peerA");
		let incoming_hash = crate::util::hash_binary(b"incoming");
		let voters = vec!["p1".to_string(), "p2".to_string(), "p3".to_string()];
		let query = |peer: &str| -> Option<[u8; 32]> {
			match peer {
				"p1" | "p2" => Some(incoming_hash),
				_ => Some([9u8; 32]),
			}
		};
		let outcome =
			resolve(ConflictStrategy::PeerVote, &local, &incoming, false, &voters, &query).unwrap();
		assert_eq!(outcome.winner, b"incoming");
	}

	#[test]
	fn peer_vote_tie_falls_back_to_backup() {
		let local = side(b"local", 1, "local-peer");
		let incoming = side(b"incoming", 2, "peerA");
		let local_hash = crate::util::hash_binary(b"local");
		let incoming_hash = crate::util::hash_binary(b"incoming");
		let voters = vec!["p1".to_string(), "p2".to_string()];
        let query = |peer: &str| -> Option<[u8; 32]> {
            match peer {
                "p1" => Some(local_hash),
                _ => Some(incoming_hash),
            }
        };
		let outcome =
			resolve(ConflictStrategy::PeerVote, &local, &incoming, false, &voters, &query).unwrap();
		assert_eq!(outcome.record.strategy, ConflictStrategy::Backup);
	}

	#[test]
	fn peer_vote_no_responses_falls_back_to_backup() {
		let local = side(b"local", 1, "local-peer");
		let incoming = side(b"incoming", 2, "peerA");
		let outcome =
			resolve(ConflictStrategy::PeerVote, &local, &incoming, false, &[], &|_| None).unwrap();
		assert_eq!(outcome.record.strategy, ConflictStrategy::Backup);
	}
}
