use crate::error::RuntimeError;
use graph_store::graph::Graph;
use graph_store::id::NodeId;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Per-graph evaluation bookkeeping: which nodes cannot trust their cache, the memoized
/// per-socket outputs of the ones that can, accumulated runtime errors, and compute timings
/// kept for the debugging panel.
///
/// Created empty alongside an empty graph, cleared wholesale on a full graph load, and
/// mutated only by the executor and by dirty propagation when commands land.
#[derive(Clone, Debug, Default)]
pub struct DirtyState {
	dirty: HashSet<NodeId>,
	output_cache: HashMap<NodeId, HashMap<String, Value>>,
	node_errors: HashMap<NodeId, Vec<RuntimeError>>,
	timings: HashMap<NodeId, Duration>,
}

impl DirtyState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_dirty(&self, node: &NodeId) -> bool {
		self.dirty.contains(node)
	}

	pub fn dirty_nodes(&self) -> &HashSet<NodeId> {
		&self.dirty
	}

	pub fn cached_outputs(&self, node: &NodeId) -> Option<&HashMap<String, Value>> {
		self.output_cache.get(node)
	}

	pub fn errors(&self, node: &NodeId) -> &[RuntimeError] {
		self.node_errors.get(node).map(Vec::as_slice).unwrap_or_default()
	}

	pub fn node_errors(&self) -> &HashMap<NodeId, Vec<RuntimeError>> {
		&self.node_errors
	}

	pub fn timing(&self, node: &NodeId) -> Option<Duration> {
		self.timings.get(node).copied()
	}

	/// Invalidate the seeds and everything transitively downstream of them. Cache entries,
	/// errors and timings for the invalidated set are discarded.
	pub fn mark_affected(&mut self, graph: &Graph, seeds: &[NodeId]) {
		for node_id in graph.downstream_nodes(seeds) {
			self.output_cache.remove(&node_id);
			self.node_errors.remove(&node_id);
			self.timings.remove(&node_id);
			self.dirty.insert(node_id);
		}
	}

	/// Mark every node of the graph dirty. Used after a full load, when no cache entry can be
	/// trusted.
	pub fn mark_all(&mut self, graph: &Graph) {
		self.clear();
		self.dirty = graph.nodes().map(|node| node.id.clone()).collect();
	}

	pub fn clear(&mut self) {
		self.dirty.clear();
		self.output_cache.clear();
		self.node_errors.clear();
		self.timings.clear();
	}

	pub(crate) fn store_result(&mut self, node: NodeId, outputs: HashMap<String, Value>, elapsed: Duration) {
		self.output_cache.insert(node.clone(), outputs);
		self.timings.insert(node.clone(), elapsed);
		self.dirty.remove(&node);
	}

	pub(crate) fn record_error(&mut self, node: NodeId, error: RuntimeError) {
		self.node_errors.entry(node).or_default().push(error);
	}

	/// Drop nodes that no longer exist, so the state cannot leak entries across deletions.
	pub fn retain_existing(&mut self, graph: &Graph) {
		self.dirty.retain(|node| graph.node(node).is_some());
		self.output_cache.retain(|node, _| graph.node(node).is_some());
		self.node_errors.retain(|node, _| graph.node(node).is_some());
		self.timings.retain(|node, _| graph.node(node).is_some());
	}
}
