//! Latency/bandwidth-weighted mesh topology: minimum spanning tree, ranked
//! best-peers list, and load-balanced peer ordering.
//!
//! Grounded on `original_source/src/net/remesh.hpp`/`remesh.cpp`
//! (`NetworkNode`, `NetworkEdge`, `Remesh::calculateMinimumSpanningTree`,
//! `calculateOptimalTopology`, `calculateLoadBalancedConnections`,
//! `needsRemesh`). The source's synthetic `measureLatencies`/`measureBandwidth`
//! (random jitter standing in for real measurement) is not carried over —
//! this crate feeds real samples in via `update_peer`, sourced from
//! `transport::pool`/catalog `PeerLink` rows.

use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::error::MeshError;

/// Default combined-metric weights (spec.md §4.8): `w_latency = 0.6`,
/// `w_bandwidth = 0.4`.
pub const DEFAULT_LATENCY_WEIGHT: f64 = 0.6;
pub const DEFAULT_BANDWIDTH_WEIGHT: f64 = 0.4;

const MAX_RANKED_PEERS: usize = 5;
const MIN_BANDWIDTH_FLOOR: f64 = 0.001;

/// A mesh participant and its last-observed link quality.
#[derive(Debug, Clone)]
pub struct NetworkNode {
	pub id: String,
	pub latency_ms: f64,
	pub bandwidth_mbps: f64,
	pub active: bool,
}

impl NetworkNode {
	pub fn new(id: impl Into<String>) -> Self {
		NetworkNode { id: id.into(), latency_ms: 0.0, bandwidth_mbps: 0.0, active: true }
	}
}

/// An undirected candidate link between two mesh nodes and its combined cost.
#[derive(Debug, Clone)]
pub struct NetworkEdge {
	pub node1: String,
	pub node2: String,
	pub weight: f64,
}

/// Min-heap entry: `Ord` is reversed so `BinaryHeap` pops the smallest weight
/// first (Rust's `BinaryHeap` is a max-heap by default).
#[derive(Debug, Clone, PartialEq)]
struct HeapEntry {
	weight: f64,
	node1: String,
	node2: String,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		other
			.weight
			.partial_cmp(&self.weight)
			.unwrap_or(std::cmp::Ordering::Equal)
	}
}

impl PartialOrd for HeapEntry {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

/// Tracks mesh nodes and computes overlay topology: MST (global
/// connectivity), a ranked best-peers shortlist, and load-balanced ordering.
pub struct MeshOptimizer {
	nodes: HashMap<String, NetworkNode>,
	remesh_threshold_ms: f64,
	min_bandwidth_mbps: f64,
	latency_weight: f64,
	bandwidth_weight: f64,
}

impl Default for MeshOptimizer {
	fn default() -> Self {
		MeshOptimizer {
			nodes: HashMap::new(),
			remesh_threshold_ms: 100.0,
			min_bandwidth_mbps: 0.1,
			latency_weight: DEFAULT_LATENCY_WEIGHT,
			bandwidth_weight: DEFAULT_BANDWIDTH_WEIGHT,
		}
	}
}

impl MeshOptimizer {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_weights(latency_weight: f64, bandwidth_weight: f64) -> Self {
		MeshOptimizer { latency_weight, bandwidth_weight, ..Self::default() }
	}

	pub fn set_remesh_threshold(&mut self, threshold_ms: f64) {
		self.remesh_threshold_ms = threshold_ms;
	}

	pub fn add_peer(&mut self, peer_id: &str) {
		self.nodes
			.entry(peer_id.to_string())
			.and_modify(|n| n.active = true)
			.or_insert_with(|| NetworkNode::new(peer_id));
	}

	pub fn remove_peer(&mut self, peer_id: &str) {
		if let Some(node) = self.nodes.get_mut(peer_id) {
			node.active = false;
		}
	}

	/// Record a fresh latency/bandwidth sample for a peer (from real
	/// measurement, e.g. handshake RTT and observed transfer throughput).
	pub fn update_peer(&mut self, peer_id: &str, latency_ms: f64, bandwidth_mbps: f64) {
		let node = self
			.nodes
			.entry(peer_id.to_string())
			.or_insert_with(|| NetworkNode::new(peer_id));
		node.latency_ms = latency_ms;
		node.bandwidth_mbps = bandwidth_mbps;
		node.active = true;
	}

	/// Whether the mesh should be recomputed: an inactive peer, or any
	/// active peer above the latency threshold or below the bandwidth floor.
	pub fn needs_remesh(&self) -> bool {
		if self.nodes.is_empty() {
			return false;
		}
		self.nodes.values().any(|n| {
			!n.active || n.latency_ms > self.remesh_threshold_ms || n.bandwidth_mbps < self.min_bandwidth_mbps
		})
	}

	fn combined_weight(&self, a: &NetworkNode, b: &NetworkNode) -> f64 {
		let avg_latency = (a.latency_ms + b.latency_ms) / 2.0;
		let avg_bandwidth = (a.bandwidth_mbps + b.bandwidth_mbps) / 2.0;
		self.latency_weight * avg_latency
			+ (1.0 - self.bandwidth_weight) * (1.0 / avg_bandwidth.max(MIN_BANDWIDTH_FLOOR))
	}

	/// Every currently active peer, unranked and uncapped. This is the set
	/// fan-out delivers to; `ranked_best_peers`/`load_balanced_peers` are
	/// top-`MAX_RANKED_PEERS` shortlists for topology/MST purposes only and
	/// must not be used to decide who receives a delta.
	pub fn active_peers(&self) -> Vec<String> {
		self.nodes.values().filter(|n| n.active).map(|n| n.id.clone()).collect()
	}

	/// Top `MAX_RANKED_PEERS` active peers ranked by combined latency/bandwidth
	/// score, lowest (best) first.
	pub fn ranked_best_peers(&self) -> Vec<String> {
		let mut scored: Vec<(f64, &str)> = self
			.nodes
			.values()
			.filter(|n| n.active && n.latency_ms > 0.0)
			.map(|n| {
				let score =
					self.latency_weight * n.latency_ms + (1.0 - self.bandwidth_weight) * (1.0 / n.bandwidth_mbps.max(MIN_BANDWIDTH_FLOOR));
				(score, n.id.as_str())
			})
			.collect();
		scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
		scored.into_iter().take(MAX_RANKED_PEERS).map(|(_, id)| id.to_string()).collect()
	}

	/// Active peers ordered by descending bandwidth, for spreading transfer
	/// load across the highest-capacity links, capped at `MAX_RANKED_PEERS`.
	pub fn load_balanced_peers(&self) -> Vec<String> {
		let mut capacity: Vec<(f64, &str)> = self
			.nodes
			.values()
			.filter(|n| n.active && n.bandwidth_mbps > 0.0)
			.map(|n| (1.0 / n.bandwidth_mbps, n.id.as_str()))
			.collect();
		capacity.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
		capacity.into_iter().take(MAX_RANKED_PEERS).map(|(_, id)| id.to_string()).collect()
	}

	/// Minimum spanning tree over active nodes via Prim's algorithm, edges
	/// weighted by `combined_weight`. Returns `MeshError::EmptyTopology` if
	/// there are fewer than two active nodes.
	pub fn minimum_spanning_tree(&self) -> Result<Vec<NetworkEdge>, MeshError> {
		let active: Vec<&NetworkNode> = self.nodes.values().filter(|n| n.active).collect();
		if active.len() <= 1 {
			return Err(MeshError::EmptyTopology);
		}

		let mut mst = Vec::new();
		let mut visited: HashSet<String> = HashSet::new();
		let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();

		let start = active[0];
		visited.insert(start.id.clone());
		for neighbor in &active {
			if neighbor.id != start.id {
				heap.push(HeapEntry {
					weight: self.combined_weight(start, neighbor),
					node1: start.id.clone(),
					node2: neighbor.id.clone(),
				});
			}
		}

		while let Some(entry) = heap.pop() {
			if visited.len() == active.len() {
				break;
			}
			let (in_tree, new_node) = if visited.contains(&entry.node1) && !visited.contains(&entry.node2) {
				(true, entry.node2.clone())
			} else if visited.contains(&entry.node2) && !visited.contains(&entry.node1) {
				(true, entry.node1.clone())
			} else {
				(false, String::new())
			};
			if !in_tree {
				continue;
			}

			mst.push(NetworkEdge { node1: entry.node1.clone(), node2: entry.node2.clone(), weight: entry.weight });
			visited.insert(new_node.clone());

			let new_node_ref = self.nodes.get(&new_node).expect("node just inserted into visited set");
			for neighbor in &active {
				if !visited.contains(&neighbor.id) {
					heap.push(HeapEntry {
						weight: self.combined_weight(new_node_ref, neighbor),
						node1: new_node.clone(),
						node2: neighbor.id.clone(),
					});
				}
			}
		}

		Ok(mst)
	}

	/// Mean of `bandwidth / latency` across active, latency-measured peers —
	/// a coarse, unitless figure-of-merit for the current mesh (spec.md §8
	/// exposes this as a diagnostic, not a control input).
	pub fn network_efficiency(&self) -> f64 {
		let mut total = 0.0;
		let mut count = 0usize;
		for node in self.nodes.values() {
			if node.active && node.latency_ms > 0.0 {
				total += node.bandwidth_mbps / node.latency_ms.max(MIN_BANDWIDTH_FLOOR);
				count += 1;
			}
		}
		if count == 0 {
			0.0
		} else {
			total / count as f64
		}
	}

	pub fn node_count(&self) -> usize {
		self.nodes.len()
	}

	pub fn active_node_count(&self) -> usize {
		self.nodes.values().filter(|n| n.active).count()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_optimizer() -> MeshOptimizer {
		let mut m = MeshOptimizer::new();
		m.update_peer("a", 10.0, 100.0);
		m.update_peer("b", 20.0, 50.0);
		m.update_peer("c", 5.0, 200.0);
		m
	}

	#[test]
	fn needs_remesh_false_when_all_healthy() {
		let m = sample_optimizer();
		assert!(!m.needs_remesh());
	}

	#[test]
	fn needs_remesh_true_on_high_latency() {
		let mut m = sample_optimizer();
		m.update_peer("d", 500.0, 100.0);
		assert!(m.needs_remesh());
	}

	#[test]
	fn needs_remesh_true_on_low_bandwidth() {
		let mut m = sample_optimizer();
		m.update_peer("d", 10.0, 0.01);
		assert!(m.needs_remesh());
	}

	#[test]
	fn needs_remesh_true_on_inactive_peer() {
		let mut m = sample_optimizer();
		m.remove_peer("a");
		assert!(m.needs_remesh());
	}

	#[test]
	fn needs_remesh_false_on_empty_mesh() {
		let m = MeshOptimizer::new();
		assert!(!m.needs_remesh());
	}

	#[test]
	fn ranked_best_peers_orders_lowest_score_first() {
		let m = sample_optimizer();
		let ranked = m.ranked_best_peers();
		assert_eq!(ranked.first().map(String::as_str), Some("c"));
	}

	#[test]
	fn load_balanced_peers_orders_highest_bandwidth_first() {
		let m = sample_optimizer();
		let balanced = m.load_balanced_peers();
		assert_eq!(balanced.first().map(String::as_str), Some("c"));
	}

	#[test]
	fn mst_spans_all_active_nodes() {
		let m = sample_optimizer();
		let mst = m.minimum_spanning_tree().unwrap();
		assert_eq!(mst.len(), 2);
		let mut touched = HashSet::new();
		for edge in &mst {
			touched.insert(edge.node1.clone());
			touched.insert(edge.node2.clone());
		}
		assert_eq!(touched.len(), 3);
	}

	#[test]
	fn mst_excludes_inactive_nodes() {
		let mut m = sample_optimizer();
		m.remove_peer("b");
		let mst = m.minimum_spanning_tree().unwrap();
		let mut touched = HashSet::new();
		for edge in &mst {
			touched.insert(edge.node1.clone());
			touched.insert(edge.node2.clone());
		}
		assert!(!touched.contains("b"));
	}

	#[test]
	fn mst_errors_on_empty_topology() {
		let m = MeshOptimizer::new();
		assert!(matches!(m.minimum_spanning_tree(), Err(MeshError::EmptyTopology)));

		let mut single = MeshOptimizer::new();
		single.update_peer("only", 10.0, 50.0);
		assert!(matches!(single.minimum_spanning_tree(), Err(MeshError::EmptyTopology)));
	}

	#[test]
	fn ranked_peers_capped_at_five() {
		let mut m = MeshOptimizer::new();
		for i in 0..10 {
			m.update_peer(&format!("peer-{i}"), 10.0 + i as f64, 100.0);
		}
		assert_eq!(m.ranked_best_peers().len(), 5);
	}

	#[test]
	fn active_peers_is_uncapped_unlike_ranked_best_peers() {
		let mut m = MeshOptimizer::new();
		for i in 0..10 {
			m.update_peer(&format!("peer-{i}"), 10.0 + i as f64, 100.0);
		}
		assert_eq!(m.active_peers().len(), 10, "fan-out must reach every active peer, not a top-5 shortlist");
	}

	#[test]
	fn active_peers_excludes_removed_peers() {
		let mut m = sample_optimizer();
		m.remove_peer("a");
		let active = m.active_peers();
		assert!(!active.contains(&"a".to_string()));
		assert_eq!(active.len(), 2);
	}
}
