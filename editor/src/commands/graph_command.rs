use graph_store::error::ValidationError;
use graph_store::graph::{Frame, Graph, Node, Socket, SocketMetadata, Wire};
use graph_store::id::{FrameId, NodeId, SocketId, WireId};
use serde_json::Value;

/// A node record together with its full socket set, in io-list order. The unit that
/// `UpdateNodeIo`/`ReplaceNodeIo` swap atomically.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NodeIo {
	pub node: Node,
	pub sockets: Vec<Socket>,
}

impl NodeIo {
	/// Snapshot a node and its sockets as they currently exist in the store.
	pub fn capture(graph: &Graph, node_id: &NodeId) -> Result<Self, ValidationError> {
		let node = graph.node(node_id).ok_or_else(|| ValidationError::UnknownNode(node_id.clone()))?.clone();
		let mut sockets = Vec::with_capacity(node.inputs.len() + node.outputs.len());
		for socket_id in node.inputs.iter().chain(&node.outputs) {
			let socket = graph.socket(socket_id).ok_or_else(|| ValidationError::UnknownSocket(socket_id.clone()))?;
			sockets.push(socket.clone());
		}
		Ok(Self { node, sockets })
	}

	fn socket(&self, id: &SocketId) -> Option<&Socket> {
		self.sockets.iter().find(|socket| &socket.id == id)
	}

	fn socket_ids_match(&self, other: &Self) -> bool {
		self.node.inputs == other.node.inputs && self.node.outputs == other.node.outputs
	}

	/// True when the two states differ only in socket presentation metadata.
	fn metadata_only_change(&self, other: &Self) -> bool {
		if self.node != other.node || !self.socket_ids_match(other) {
			return false;
		}
		self.sockets.iter().zip(&other.sockets).all(|(before, after)| {
			let mut stripped = after.clone();
			stripped.label = before.label.clone();
			stripped.label_placement = before.label_placement;
			stripped.number_format = before.number_format.clone();
			stripped == *before
		})
	}
}

/// Every mutation of the graph store, expressed as an invertible value. `apply` succeeds on a
/// store in the expected pre-state and rejects (leaving the store untouched) otherwise;
/// `invert` restores the exact pre-apply state. Removal commands carry the cascaded state
/// their inverses must restore.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum GraphCommand {
	InsertNode {
		node: Node,
		sockets: Vec<Socket>,
	},
	RemoveNode {
		node: Node,
		sockets: Vec<Socket>,
		removed_wires: Vec<Wire>,
	},
	InsertWire {
		wire: Wire,
	},
	RemoveWire {
		wire: Wire,
	},
	/// Socket ids are preserved; restricted to changes that cannot drop wires.
	UpdateNodeIo {
		before: NodeIo,
		after: NodeIo,
	},
	/// Socket ids may change; dropped wires are carried for the inverse.
	ReplaceNodeIo {
		before: NodeIo,
		after: NodeIo,
		removed_wires: Vec<Wire>,
	},
	InsertFrame {
		frame: Frame,
	},
	RemoveFrame {
		frame: Frame,
	},
	UpdateFrame {
		before: Frame,
		after: Frame,
	},
	UpdateNodeParam {
		node_id: NodeId,
		key: String,
		before: Option<Value>,
		after: Option<Value>,
	},
}

impl GraphCommand {
	/// Capture a node removal, snapshotting the cascade the inverse must restore.
	pub fn remove_node(graph: &Graph, node_id: &NodeId) -> Result<Self, ValidationError> {
		let NodeIo { node, sockets } = NodeIo::capture(graph, node_id)?;
		let removed_wires = graph.wires_touching(node_id).into_iter().cloned().collect();
		Ok(GraphCommand::RemoveNode { node, sockets, removed_wires })
	}

	pub fn remove_wire(graph: &Graph, wire_id: &WireId) -> Result<Self, ValidationError> {
		let wire = graph.wire(wire_id).ok_or_else(|| ValidationError::UnknownWire(wire_id.clone()))?.clone();
		Ok(GraphCommand::RemoveWire { wire })
	}

	pub fn remove_frame(graph: &Graph, frame_id: &FrameId) -> Result<Self, ValidationError> {
		let frame = graph.frame(frame_id).ok_or_else(|| ValidationError::UnknownFrame(frame_id.clone()))?.clone();
		Ok(GraphCommand::RemoveFrame { frame })
	}

	pub fn update_frame(graph: &Graph, after: Frame) -> Result<Self, ValidationError> {
		let before = graph.frame(&after.id).ok_or_else(|| ValidationError::UnknownFrame(after.id.clone()))?.clone();
		Ok(GraphCommand::UpdateFrame { before, after })
	}

	pub fn update_node_param(graph: &Graph, node_id: &NodeId, key: impl Into<String>, after: Option<Value>) -> Result<Self, ValidationError> {
		let key = key.into();
		let node = graph.node(node_id).ok_or_else(|| ValidationError::UnknownNode(node_id.clone()))?;
		Ok(GraphCommand::UpdateNodeParam {
			node_id: node_id.clone(),
			key: key.clone(),
			before: node.params.get(&key).cloned(),
			after,
		})
	}

	/// Capture an id-preserving io update. Rejected if the change would drop any wire; those
	/// edits must go through [`GraphCommand::replace_node_io`], which records the cascade.
	pub fn update_node_io(graph: &Graph, after: NodeIo) -> Result<Self, ValidationError> {
		let before = NodeIo::capture(graph, &after.node.id)?;
		if !before.socket_ids_match(&after) {
			return Err(ValidationError::PreconditionFailed {
				reason: format!("update_node_io on `{}` must preserve socket ids", after.node.id),
			});
		}
		let mut scratch = graph.clone();
		let replaced = scratch.replace_node_io(after.node.clone(), after.sockets.clone())?;
		if !replaced.removed_wires.is_empty() {
			return Err(ValidationError::PreconditionFailed {
				reason: format!("update_node_io on `{}` would drop wires; use replace_node_io", after.node.id),
			});
		}
		Ok(GraphCommand::UpdateNodeIo { before, after })
	}

	/// Capture an arbitrary io replacement, precomputing the wires it will drop.
	pub fn replace_node_io(graph: &Graph, after: NodeIo) -> Result<Self, ValidationError> {
		let before = NodeIo::capture(graph, &after.node.id)?;
		let mut scratch = graph.clone();
		let replaced = scratch.replace_node_io(after.node.clone(), after.sockets.clone())?;
		Ok(GraphCommand::ReplaceNodeIo {
			before,
			after,
			removed_wires: replaced.removed_wires,
		})
	}

	pub fn apply(&self, graph: &mut Graph) -> Result<(), ValidationError> {
		match self {
			GraphCommand::InsertNode { node, sockets } => graph.insert_node(node.clone(), sockets.clone()),
			GraphCommand::RemoveNode { node, .. } => graph.remove_node(&node.id).map(|_| ()),
			GraphCommand::InsertWire { wire } => graph.insert_wire(wire.clone()),
			GraphCommand::RemoveWire { wire } => graph.remove_wire(&wire.id).map(|_| ()),
			GraphCommand::UpdateNodeIo { before, after } => apply_node_io(graph, before, after),
			GraphCommand::ReplaceNodeIo { after, .. } => graph.replace_node_io(after.node.clone(), after.sockets.clone()).map(|_| ()),
			GraphCommand::InsertFrame { frame } => graph.insert_frame(frame.clone()),
			GraphCommand::RemoveFrame { frame } => graph.remove_frame(&frame.id).map(|_| ()),
			GraphCommand::UpdateFrame { before, after } => update_frame_checked(graph, before, after),
			GraphCommand::UpdateNodeParam { node_id, key, before, after } => update_param_checked(graph, node_id, key, before, after),
		}
	}

	/// Undo this command, restoring the exact pre-apply state.
	pub fn invert(&self, graph: &mut Graph) -> Result<(), ValidationError> {
		match self {
			GraphCommand::InsertNode { node, .. } => graph.remove_node(&node.id).map(|_| ()),
			GraphCommand::RemoveNode { node, sockets, removed_wires } => {
				graph.insert_node(node.clone(), sockets.clone())?;
				for wire in removed_wires {
					graph.insert_wire(wire.clone())?;
				}
				Ok(())
			}
			GraphCommand::InsertWire { wire } => graph.remove_wire(&wire.id).map(|_| ()),
			GraphCommand::RemoveWire { wire } => graph.insert_wire(wire.clone()),
			GraphCommand::UpdateNodeIo { before, after } => apply_node_io(graph, after, before),
			GraphCommand::ReplaceNodeIo { before, removed_wires, .. } => {
				graph.replace_node_io(before.node.clone(), before.sockets.clone())?;
				for wire in removed_wires {
					graph.insert_wire(wire.clone())?;
				}
				Ok(())
			}
			GraphCommand::InsertFrame { frame } => graph.remove_frame(&frame.id).map(|_| ()),
			GraphCommand::RemoveFrame { frame } => graph.insert_frame(frame.clone()),
			GraphCommand::UpdateFrame { before, after } => update_frame_checked(graph, after, before),
			GraphCommand::UpdateNodeParam { node_id, key, before, after } => update_param_checked(graph, node_id, key, after, before),
		}
	}

	/// Seeds for dirty propagation, resolved against the post-apply graph: the directly
	/// mutated node plus the destinations of any wire this command added or removed.
	pub fn affected_nodes(&self, graph: &Graph) -> Vec<NodeId> {
		let wire_destination = |wire: &Wire| graph.socket(&wire.to).map(|socket| socket.node.clone());
		match self {
			GraphCommand::InsertNode { node, .. } => vec![node.id.clone()],
			GraphCommand::RemoveNode { node, removed_wires, .. } => {
				let mut nodes = vec![node.id.clone()];
				nodes.extend(removed_wires.iter().filter_map(wire_destination));
				nodes
			}
			GraphCommand::InsertWire { wire } | GraphCommand::RemoveWire { wire } => wire_destination(wire).into_iter().collect(),
			GraphCommand::UpdateNodeIo { after, .. } => vec![after.node.id.clone()],
			GraphCommand::ReplaceNodeIo { after, removed_wires, .. } => {
				let mut nodes = vec![after.node.id.clone()];
				nodes.extend(removed_wires.iter().filter_map(wire_destination));
				nodes
			}
			GraphCommand::InsertFrame { .. } | GraphCommand::RemoveFrame { .. } | GraphCommand::UpdateFrame { .. } => Vec::new(),
			GraphCommand::UpdateNodeParam { node_id, .. } => vec![node_id.clone()],
		}
	}
}

/// Apply an id-preserving io state. Metadata-only changes update sockets in place; anything
/// more goes through the atomic replacement (which cannot drop wires here, by capture-time
/// construction).
fn apply_node_io(graph: &mut Graph, from: &NodeIo, to: &NodeIo) -> Result<(), ValidationError> {
	let current = NodeIo::capture(graph, &to.node.id)?;
	if current == *to {
		// Already in the target state (e.g. a drag whose transients ended where the recorded
		// command lands); applying is a no-op.
		return Ok(());
	}
	if current != *from {
		return Err(ValidationError::PreconditionFailed {
			reason: format!("node `{}` is not in the expected state", to.node.id),
		});
	}
	if from.metadata_only_change(to) {
		for socket in &to.sockets {
			if from.socket(&socket.id).map(|previous| previous != socket).unwrap_or(false) {
				graph.update_socket_metadata(
					&socket.id,
					SocketMetadata {
						label: socket.label.clone(),
						label_placement: socket.label_placement,
						number_format: socket.number_format.clone(),
					},
				)?;
			}
		}
		return Ok(());
	}
	graph.replace_node_io(to.node.clone(), to.sockets.clone()).map(|_| ())
}

fn update_frame_checked(graph: &mut Graph, expected: &Frame, target: &Frame) -> Result<(), ValidationError> {
	let current = graph.frame(&target.id).ok_or_else(|| ValidationError::UnknownFrame(target.id.clone()))?;
	if current == target {
		return Ok(());
	}
	if current != expected {
		return Err(ValidationError::PreconditionFailed {
			reason: format!("frame `{}` is not in the expected state", target.id),
		});
	}
	graph.update_frame(target.clone()).map(|_| ())
}

fn update_param_checked(graph: &mut Graph, node_id: &NodeId, key: &str, expected: &Option<Value>, target: &Option<Value>) -> Result<(), ValidationError> {
	let node = graph.node(node_id).ok_or_else(|| ValidationError::UnknownNode(node_id.clone()))?;
	if node.params.get(key) == target.as_ref() {
		return Ok(());
	}
	if node.params.get(key) != expected.as_ref() {
		return Err(ValidationError::PreconditionFailed {
			reason: format!("param `{key}` on node `{node_id}` is not in the expected state"),
		});
	}
	graph.update_node_param(node_id, key, target.clone()).map(|_| ())
}

#[cfg(test)]
mod test {
	use super::*;
	use glam::DVec2;
	use graph_store::data_type::DataType;
	use graph_store::id::GraphId;
	use serde_json::json;

	fn graph_with_chain() -> (Graph, NodeId, NodeId, WireId) {
		let mut graph = Graph::new(GraphId::new("graph-test"), "Test");

		let a = NodeId::new("node-a");
		let a_out = SocketId::new("socket-a-out");
		graph
			.insert_node(
				Node::new(a.clone(), "const-float", DVec2::ZERO).with_param("value", json!(3.)).with_io(vec![], vec![a_out.clone()]),
				vec![Socket::output(a_out.clone(), a.clone(), "out", DataType::Float)],
			)
			.unwrap();

		let b = NodeId::new("node-b");
		let b_a = SocketId::new("socket-b-a");
		let b_out = SocketId::new("socket-b-out");
		graph
			.insert_node(
				Node::new(b.clone(), "add", DVec2::new(100., 0.)).with_io(vec![b_a.clone()], vec![b_out.clone()]),
				vec![
					Socket::input(b_a.clone(), b.clone(), "a", DataType::Float),
					Socket::output(b_out, b.clone(), "out", DataType::Float),
				],
			)
			.unwrap();

		let wire = WireId::new("wire-1");
		graph.insert_wire(Wire::new(wire.clone(), a_out, b_a)).unwrap();
		(graph, a, b, wire)
	}

	#[test]
	fn remove_node_inverse_restores_cascaded_wires() {
		let (mut graph, a, _, _) = graph_with_chain();
		let pristine = graph.clone();

		let command = GraphCommand::remove_node(&graph, &a).unwrap();
		command.apply(&mut graph).unwrap();
		assert!(graph.node(&a).is_none());
		assert_eq!(graph.wire_count(), 0);

		command.invert(&mut graph).unwrap();
		assert_eq!(graph, pristine);
	}

	#[test]
	fn rejected_apply_leaves_the_store_untouched() {
		let (mut graph, a, b, _) = graph_with_chain();
		let pristine = graph.clone();

		// Occupied input: the insert is rejected and nothing changes.
		let duplicate = Wire::new(WireId::new("wire-2"), graph.node(&a).unwrap().outputs[0].clone(), graph.node(&b).unwrap().inputs[0].clone());
		let command = GraphCommand::InsertWire { wire: duplicate };
		assert!(command.apply(&mut graph).is_err());
		assert_eq!(graph, pristine);
	}

	#[test]
	fn param_update_checks_its_pre_state() {
		let (mut graph, a, _, _) = graph_with_chain();

		let command = GraphCommand::update_node_param(&graph, &a, "value", Some(json!(10.))).unwrap();
		command.apply(&mut graph).unwrap();
		assert_eq!(graph.node(&a).unwrap().params.get("value"), Some(&json!(10.)));

		// Re-applying on the post-state is an idempotent no-op.
		command.apply(&mut graph).unwrap();
		assert_eq!(graph.node(&a).unwrap().params.get("value"), Some(&json!(10.)));

		// Applying against an unrelated state is rejected.
		graph.update_node_param(&a, "value", Some(json!(99.))).unwrap();
		assert!(matches!(command.apply(&mut graph), Err(ValidationError::PreconditionFailed { .. })));
		graph.update_node_param(&a, "value", Some(json!(10.))).unwrap();

		command.invert(&mut graph).unwrap();
		assert_eq!(graph.node(&a).unwrap().params.get("value"), Some(&json!(3.)));
	}

	#[test]
	fn update_node_io_refuses_wire_dropping_changes() {
		let (graph, _, b, _) = graph_with_chain();

		// Retyping the wired input would drop the wire, so the capture is rejected.
		let mut after = NodeIo::capture(&graph, &b).unwrap();
		after.sockets[0].data_type = DataType::String;
		assert!(matches!(GraphCommand::update_node_io(&graph, after), Err(ValidationError::PreconditionFailed { .. })));

		// A position move is fine.
		let mut after = NodeIo::capture(&graph, &b).unwrap();
		after.node.position = DVec2::new(300., 50.);
		let command = GraphCommand::update_node_io(&graph, after).unwrap();
		assert!(matches!(command, GraphCommand::UpdateNodeIo { .. }));
	}

	#[test]
	fn replace_node_io_round_trips_through_invert() {
		let (mut graph, _, b, wire) = graph_with_chain();
		let pristine = graph.clone();

		// Replace b's io with a single, differently-typed input; the wire is dropped.
		let mut after = NodeIo::capture(&graph, &b).unwrap();
		let new_input = SocketId::new("socket-b-tex");
		after.node.inputs = vec![new_input.clone()];
		after.sockets = vec![
			Socket::input(new_input, b.clone(), "texture", DataType::Texture),
			after.sockets.last().expect("output socket").clone(),
		];
		let command = GraphCommand::replace_node_io(&graph, after).unwrap();
		match &command {
			GraphCommand::ReplaceNodeIo { removed_wires, .. } => assert_eq!(removed_wires.len(), 1),
			_ => panic!("expected a ReplaceNodeIo command"),
		}

		command.apply(&mut graph).unwrap();
		assert!(graph.wire(&wire).is_none());

		command.invert(&mut graph).unwrap();
		assert_eq!(graph, pristine);
	}

	#[test]
	fn metadata_only_io_update_uses_in_place_edits() {
		let (mut graph, a, _, _) = graph_with_chain();

		let before = NodeIo::capture(&graph, &a).unwrap();
		let mut after = before.clone();
		after.sockets[0].label = Some("Value".to_string());
		let command = GraphCommand::update_node_io(&graph, after).unwrap();
		command.apply(&mut graph).unwrap();
		assert_eq!(graph.socket(&before.sockets[0].id).unwrap().label.as_deref(), Some("Value"));

		command.invert(&mut graph).unwrap();
		assert_eq!(graph.socket(&before.sockets[0].id).unwrap().label, None);
	}

	#[test]
	fn affected_nodes_cover_wire_destinations() {
		let (mut graph, a, b, wire) = graph_with_chain();

		let command = GraphCommand::remove_wire(&graph, &wire).unwrap();
		command.apply(&mut graph).unwrap();
		assert_eq!(command.affected_nodes(&graph), vec![b.clone()]);

		let command = GraphCommand::remove_node(&graph, &a).unwrap();
		command.apply(&mut graph).unwrap();
		assert_eq!(command.affected_nodes(&graph), vec![a]);
	}
}
