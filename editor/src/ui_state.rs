use crate::consts::MAX_RECENT_GRAPHS;
use glam::DVec2;
use graph_store::graph::Graph;
use graph_store::id::{FrameId, GraphId, NodeId, WireId};
use std::collections::HashSet;

/// Session state the graph document does not own: selections, per-node bypass/collapse
/// flags, the canvas viewpoint, and the recently opened graphs. Persisted independently of
/// the document; entity references are weak and get filtered after a load.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UiState {
	selected_nodes: HashSet<NodeId>,
	selected_frames: HashSet<FrameId>,
	selected_wires: HashSet<WireId>,
	bypassed_nodes: HashSet<NodeId>,
	collapsed_nodes: HashSet<NodeId>,
	canvas_center: DVec2,
	last_graph_id: Option<GraphId>,
	recent_graph_ids: Vec<GraphId>,
}

impl UiState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn selected_nodes(&self) -> &HashSet<NodeId> {
		&self.selected_nodes
	}

	pub fn selected_frames(&self) -> &HashSet<FrameId> {
		&self.selected_frames
	}

	pub fn selected_wires(&self) -> &HashSet<WireId> {
		&self.selected_wires
	}

	pub fn bypassed_nodes(&self) -> &HashSet<NodeId> {
		&self.bypassed_nodes
	}

	pub fn collapsed_nodes(&self) -> &HashSet<NodeId> {
		&self.collapsed_nodes
	}

	pub fn canvas_center(&self) -> DVec2 {
		self.canvas_center
	}

	pub fn last_graph_id(&self) -> Option<&GraphId> {
		self.last_graph_id.as_ref()
	}

	pub fn recent_graph_ids(&self) -> &[GraphId] {
		&self.recent_graph_ids
	}

	// The three selection kinds are mutually exclusive at commit time: setting one clears the
	// other two.

	pub fn set_node_selection(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
		self.selected_nodes = nodes.into_iter().collect();
		self.selected_frames.clear();
		self.selected_wires.clear();
	}

	pub fn set_frame_selection(&mut self, frames: impl IntoIterator<Item = FrameId>) {
		self.selected_frames = frames.into_iter().collect();
		self.selected_nodes.clear();
		self.selected_wires.clear();
	}

	pub fn set_wire_selection(&mut self, wires: impl IntoIterator<Item = WireId>) {
		self.selected_wires = wires.into_iter().collect();
		self.selected_nodes.clear();
		self.selected_frames.clear();
	}

	pub fn clear_selection(&mut self) {
		self.selected_nodes.clear();
		self.selected_frames.clear();
		self.selected_wires.clear();
	}

	/// Returns the new membership state.
	pub fn toggle_bypassed(&mut self, node: &NodeId) -> bool {
		if !self.bypassed_nodes.remove(node) {
			self.bypassed_nodes.insert(node.clone());
			return true;
		}
		false
	}

	pub fn toggle_collapsed(&mut self, node: &NodeId) -> bool {
		if !self.collapsed_nodes.remove(node) {
			self.collapsed_nodes.insert(node.clone());
			return true;
		}
		false
	}

	pub fn set_canvas_center(&mut self, center: DVec2) {
		self.canvas_center = center;
	}

	/// Record a graph as most recently opened, keeping the list bounded and duplicate-free.
	pub fn note_recent_graph(&mut self, graph_id: GraphId) {
		self.recent_graph_ids.retain(|recent| recent != &graph_id);
		self.recent_graph_ids.insert(0, graph_id.clone());
		self.recent_graph_ids.truncate(MAX_RECENT_GRAPHS);
		self.last_graph_id = Some(graph_id);
	}

	/// Silently drop references to entities the graph no longer contains.
	pub fn retain_existing(&mut self, graph: &Graph) {
		self.selected_nodes.retain(|node| graph.node(node).is_some());
		self.selected_frames.retain(|frame| graph.frame(frame).is_some());
		self.selected_wires.retain(|wire| graph.wire(wire).is_some());
		self.bypassed_nodes.retain(|node| graph.node(node).is_some());
		self.collapsed_nodes.retain(|node| graph.node(node).is_some());
	}
}
