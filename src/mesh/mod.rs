//! Mesh optimizer: latency/bandwidth-weighted overlay topology maintenance.
//!
//! Grounded on `original_source/src/net/remesh.hpp`/`remesh.cpp`
//! (`NetworkNode`, `NetworkEdge`, `Remesh::calculateMinimumSpanningTree`,
//! `calculateLoadBalancedConnections`), reimplemented without the mutex +
//! dedicated background thread the source uses — this crate ticks mesh
//! evaluation from the orchestrator's single maintenance loop instead of
//! spinning up a thread per subsystem.

pub mod topology;

pub use topology::{MeshOptimizer, NetworkEdge, NetworkNode};
