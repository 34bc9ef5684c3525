use crate::data_type::DataType;
use crate::error::ValidationError;
use crate::id::{FrameId, GraphId, NodeId, SocketId, WireId};
use crate::value::JsonObject;
use glam::DVec2;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
	Input,
	Output,
}

/// Where a socket's label is drawn. Presentation-only, but part of the document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelPlacement {
	#[default]
	Auto,
	Left,
	Right,
	Hidden,
}

/// How a numeric socket value is formatted in the properties panel. Presentation-only.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NumberFormat {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub decimals: Option<u8>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub unit: Option<String>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Socket {
	pub id: SocketId,
	pub node: NodeId,
	pub name: String,
	pub label: Option<String>,
	pub direction: Direction,
	pub data_type: DataType,
	pub required: bool,
	pub default_value: Option<Value>,
	pub min_connections: Option<u32>,
	pub max_connections: Option<u32>,
	pub label_placement: Option<LabelPlacement>,
	pub number_format: Option<NumberFormat>,
}

impl Socket {
	pub fn input(id: SocketId, node: NodeId, name: impl Into<String>, data_type: DataType) -> Self {
		Self::new(id, node, name, Direction::Input, data_type)
	}

	pub fn output(id: SocketId, node: NodeId, name: impl Into<String>, data_type: DataType) -> Self {
		Self::new(id, node, name, Direction::Output, data_type)
	}

	pub fn new(id: SocketId, node: NodeId, name: impl Into<String>, direction: Direction, data_type: DataType) -> Self {
		Self {
			id,
			node,
			name: name.into(),
			label: None,
			direction,
			data_type,
			required: false,
			default_value: None,
			min_connections: None,
			max_connections: None,
			label_placement: None,
			number_format: None,
		}
	}

	pub fn required(mut self) -> Self {
		self.required = true;
		self
	}

	pub fn with_default(mut self, value: Value) -> Self {
		self.default_value = Some(value);
		self
	}

	pub fn with_label(mut self, label: impl Into<String>) -> Self {
		self.label = Some(label.into());
		self
	}
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Wire {
	pub id: WireId,
	pub from: SocketId,
	pub to: SocketId,
}

impl Wire {
	pub fn new(id: WireId, from: SocketId, to: SocketId) -> Self {
		Self { id, from, to }
	}
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Node {
	pub id: NodeId,
	pub node_type: String,
	pub position: DVec2,
	/// Input socket ids in display order. Every entry resolves to an `Input` socket owned by this node.
	pub inputs: Vec<SocketId>,
	/// Output socket ids in display order.
	pub outputs: Vec<SocketId>,
	pub params: JsonObject,
}

impl Node {
	pub fn new(id: NodeId, node_type: impl Into<String>, position: DVec2) -> Self {
		Self {
			id,
			node_type: node_type.into(),
			position,
			inputs: Vec::new(),
			outputs: Vec::new(),
			params: JsonObject::new(),
		}
	}

	pub fn with_io(mut self, inputs: Vec<SocketId>, outputs: Vec<SocketId>) -> Self {
		self.inputs = inputs;
		self.outputs = outputs;
		self
	}

	pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
		self.params.insert(key.into(), value);
		self
	}
}

/// A visual grouping. Frames do not own nodes; containment is geometric and belongs to the
/// renderer, so the exposed socket lists are weak references, filtered at encode time.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Frame {
	pub id: FrameId,
	pub title: String,
	pub description: Option<String>,
	pub color: Option<String>,
	pub collapsed: bool,
	pub exposed_inputs: Vec<SocketId>,
	pub exposed_outputs: Vec<SocketId>,
}

impl Frame {
	pub fn new(id: FrameId, title: impl Into<String>) -> Self {
		Self {
			id,
			title: title.into(),
			description: None,
			color: None,
			collapsed: false,
			exposed_inputs: Vec::new(),
			exposed_outputs: Vec::new(),
		}
	}
}

/// Everything removed by a cascading node removal, in the order it must be restored.
#[derive(Clone, Debug, PartialEq)]
pub struct RemovedNode {
	pub node: Node,
	pub sockets: Vec<Socket>,
	pub wires: Vec<Wire>,
}

/// The previous state captured by an atomic io replacement.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplacedIo {
	pub node: Node,
	pub sockets: Vec<Socket>,
	pub removed_wires: Vec<Wire>,
}

/// The mutable presentation fields of a socket, updated without touching its identity.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SocketMetadata {
	pub label: Option<String>,
	pub label_placement: Option<LabelPlacement>,
	pub number_format: Option<NumberFormat>,
}

/// The entity store. All mutation goes through the validated operations below so that the
/// wire invariants (§ single inbound wire, direction agreement, type compatibility,
/// acyclicity) hold for every reachable state. Fields are private for that reason.
#[derive(Clone, Debug, PartialEq)]
pub struct Graph {
	graph_id: GraphId,
	name: String,
	schema_version: u32,
	nodes: HashMap<NodeId, Node>,
	sockets: HashMap<SocketId, Socket>,
	wires: HashMap<WireId, Wire>,
	frames: HashMap<FrameId, Frame>,
	/// Index from input socket to its single inbound wire.
	incoming: HashMap<SocketId, WireId>,
}

impl Graph {
	pub fn new(graph_id: GraphId, name: impl Into<String>) -> Self {
		Self {
			graph_id,
			name: name.into(),
			schema_version: crate::document::DOCUMENT_VERSION,
			nodes: HashMap::new(),
			sockets: HashMap::new(),
			wires: HashMap::new(),
			frames: HashMap::new(),
			incoming: HashMap::new(),
		}
	}

	pub fn graph_id(&self) -> &GraphId {
		&self.graph_id
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn schema_version(&self) -> u32 {
		self.schema_version
	}

	pub fn node(&self, id: &NodeId) -> Option<&Node> {
		self.nodes.get(id)
	}

	pub fn socket(&self, id: &SocketId) -> Option<&Socket> {
		self.sockets.get(id)
	}

	pub fn wire(&self, id: &WireId) -> Option<&Wire> {
		self.wires.get(id)
	}

	pub fn frame(&self, id: &FrameId) -> Option<&Frame> {
		self.frames.get(id)
	}

	pub fn nodes(&self) -> impl Iterator<Item = &Node> {
		self.nodes.values()
	}

	pub fn sockets(&self) -> impl Iterator<Item = &Socket> {
		self.sockets.values()
	}

	pub fn wires(&self) -> impl Iterator<Item = &Wire> {
		self.wires.values()
	}

	pub fn frames(&self) -> impl Iterator<Item = &Frame> {
		self.frames.values()
	}

	pub fn node_count(&self) -> usize {
		self.nodes.len()
	}

	pub fn wire_count(&self) -> usize {
		self.wires.len()
	}

	/// Ids are unique across every entity kind in a document, not merely within their own table.
	pub fn id_in_use(&self, id: &str) -> bool {
		self.graph_id.as_str() == id
			|| self.nodes.contains_key(&NodeId::new(id))
			|| self.sockets.contains_key(&SocketId::new(id))
			|| self.wires.contains_key(&WireId::new(id))
			|| self.frames.contains_key(&FrameId::new(id))
	}

	/// The single wire feeding an input socket, if any.
	pub fn wire_into(&self, socket: &SocketId) -> Option<&Wire> {
		self.incoming.get(socket).and_then(|wire_id| self.wires.get(wire_id))
	}

	pub fn socket_node(&self, socket: &SocketId) -> Option<&Node> {
		self.sockets.get(socket).and_then(|socket| self.nodes.get(&socket.node))
	}

	/// All wires with an endpoint on any socket of `node`, ordered by wire id for determinism.
	pub fn wires_touching(&self, node: &NodeId) -> Vec<&Wire> {
		let Some(node) = self.nodes.get(node) else { return Vec::new() };
		let socket_ids: HashSet<&SocketId> = node.inputs.iter().chain(&node.outputs).collect();
		let mut touching: Vec<&Wire> = self.wires.values().filter(|wire| socket_ids.contains(&wire.from) || socket_ids.contains(&wire.to)).collect();
		touching.sort_by(|a, b| a.id.cmp(&b.id));
		touching
	}

	/// The seeds plus every node transitively reachable on the output side. This is the
	/// invalidation set for dirty propagation.
	pub fn downstream_nodes(&self, seeds: &[NodeId]) -> HashSet<NodeId> {
		let mut reached: HashSet<NodeId> = seeds.iter().cloned().collect();
		let mut frontier: Vec<NodeId> = seeds.to_vec();
		while let Some(node_id) = frontier.pop() {
			let Some(node) = self.nodes.get(&node_id) else { continue };
			for output in &node.outputs {
				for wire in self.wires.values().filter(|wire| &wire.from == output) {
					if let Some(destination) = self.sockets.get(&wire.to) {
						if reached.insert(destination.node.clone()) {
							frontier.push(destination.node.clone());
						}
					}
				}
			}
		}
		reached
	}

	/// Walk upstream from `start` through existing wires (input → producing node) and report
	/// whether `target` is reachable. Used to reject wires that would close a cycle.
	fn reaches_upstream(&self, start: &NodeId, target: &NodeId) -> bool {
		let mut visited = HashSet::new();
		let mut frontier = vec![start.clone()];
		while let Some(node_id) = frontier.pop() {
			if &node_id == target {
				return true;
			}
			if !visited.insert(node_id.clone()) {
				continue;
			}
			let Some(node) = self.nodes.get(&node_id) else { continue };
			for input in &node.inputs {
				if let Some(wire) = self.wire_into(input) {
					if let Some(producer) = self.sockets.get(&wire.from) {
						frontier.push(producer.node.clone());
					}
				}
			}
		}
		false
	}

	fn validate_node_io(&self, node: &Node, sockets: &[Socket], replacing: Option<&NodeId>) -> Result<(), ValidationError> {
		let mut seen_ids = HashSet::new();
		let mut seen_names = HashSet::new();
		let own_sockets: HashSet<&SocketId> = replacing
			.and_then(|id| self.nodes.get(id))
			.map(|existing| existing.inputs.iter().chain(&existing.outputs).collect())
			.unwrap_or_default();

		for socket in sockets {
			if socket.node != node.id {
				return Err(ValidationError::ForeignSocket { node: node.id.clone(), socket: socket.id.clone() });
			}
			if socket.name.is_empty() {
				return Err(ValidationError::EmptySocketName { node: node.id.clone() });
			}
			if !seen_names.insert((socket.direction, socket.name.clone())) {
				return Err(ValidationError::DuplicateSocketName { node: node.id.clone(), name: socket.name.clone() });
			}
			let reused = own_sockets.contains(&socket.id);
			if !seen_ids.insert(socket.id.clone()) || (!reused && self.id_in_use(socket.id.as_str())) {
				return Err(ValidationError::IdCollision { id: socket.id.to_string() });
			}
		}

		// The node's ordered io lists must reference exactly the provided sockets.
		let declared = node.inputs.iter().map(|id| (id, Direction::Input)).chain(node.outputs.iter().map(|id| (id, Direction::Output)));
		let mut matched = 0;
		for (socket_id, direction) in declared {
			matched += 1;
			let Some(socket) = sockets.iter().find(|socket| &socket.id == socket_id) else {
				return Err(ValidationError::PreconditionFailed {
					reason: format!("node `{}` references socket `{socket_id}` that was not provided", node.id),
				});
			};
			if socket.direction != direction {
				return Err(ValidationError::PreconditionFailed {
					reason: format!("socket `{}` is listed under the wrong direction on node `{}`", socket.id, node.id),
				});
			}
		}
		if matched != sockets.len() {
			return Err(ValidationError::PreconditionFailed {
				reason: format!("node `{}` does not reference every provided socket", node.id),
			});
		}
		Ok(())
	}

	pub fn insert_node(&mut self, node: Node, sockets: Vec<Socket>) -> Result<(), ValidationError> {
		if self.id_in_use(node.id.as_str()) {
			return Err(ValidationError::IdCollision { id: node.id.to_string() });
		}
		self.validate_node_io(&node, &sockets, None)?;

		for socket in sockets {
			self.sockets.insert(socket.id.clone(), socket);
		}
		self.nodes.insert(node.id.clone(), node);
		Ok(())
	}

	/// Removing a node removes every wire touching any of its sockets. The full cascade is
	/// returned so the command layer can restore it on undo.
	pub fn remove_node(&mut self, id: &NodeId) -> Result<RemovedNode, ValidationError> {
		let node = self.nodes.remove(id).ok_or_else(|| ValidationError::UnknownNode(id.clone()))?;

		let wire_ids: Vec<WireId> = {
			let socket_ids: HashSet<&SocketId> = node.inputs.iter().chain(&node.outputs).collect();
			let mut ids: Vec<WireId> = self
				.wires
				.values()
				.filter(|wire| socket_ids.contains(&wire.from) || socket_ids.contains(&wire.to))
				.map(|wire| wire.id.clone())
				.collect();
			ids.sort();
			ids
		};
		let mut wires = Vec::with_capacity(wire_ids.len());
		for wire_id in wire_ids {
			if let Some(wire) = self.wires.remove(&wire_id) {
				self.incoming.remove(&wire.to);
				wires.push(wire);
			}
		}

		let mut sockets = Vec::with_capacity(node.inputs.len() + node.outputs.len());
		for socket_id in node.inputs.iter().chain(&node.outputs) {
			if let Some(socket) = self.sockets.remove(socket_id) {
				sockets.push(socket);
			}
		}

		Ok(RemovedNode { node, sockets, wires })
	}

	/// Validate a candidate connection without inserting it. Checked in output → input order.
	pub fn validate_wire(&self, from: &SocketId, to: &SocketId) -> Result<(), ValidationError> {
		let from_socket = self.sockets.get(from).ok_or_else(|| ValidationError::UnknownSocket(from.clone()))?;
		let to_socket = self.sockets.get(to).ok_or_else(|| ValidationError::UnknownSocket(to.clone()))?;
		if from_socket.direction != Direction::Output || to_socket.direction != Direction::Input {
			return Err(ValidationError::WireDirection { from: from.clone(), to: to.clone() });
		}
		if from_socket.node == to_socket.node {
			return Err(ValidationError::SelfConnection(from_socket.node.clone()));
		}
		if self.incoming.contains_key(to) {
			return Err(ValidationError::InputOccupied(to.clone()));
		}
		if !DataType::compatible(from_socket.data_type, to_socket.data_type) {
			return Err(ValidationError::TypeMismatch {
				from: from_socket.data_type,
				to: to_socket.data_type,
			});
		}
		if self.reaches_upstream(&from_socket.node, &to_socket.node) {
			return Err(ValidationError::CyclicDependency {
				from: from_socket.node.clone(),
				to: to_socket.node.clone(),
			});
		}
		Ok(())
	}

	pub fn insert_wire(&mut self, wire: Wire) -> Result<(), ValidationError> {
		if self.id_in_use(wire.id.as_str()) {
			return Err(ValidationError::IdCollision { id: wire.id.to_string() });
		}
		self.validate_wire(&wire.from, &wire.to)?;
		self.incoming.insert(wire.to.clone(), wire.id.clone());
		self.wires.insert(wire.id.clone(), wire);
		Ok(())
	}

	pub fn remove_wire(&mut self, id: &WireId) -> Result<Wire, ValidationError> {
		let wire = self.wires.remove(id).ok_or_else(|| ValidationError::UnknownWire(id.clone()))?;
		self.incoming.remove(&wire.to);
		Ok(wire)
	}

	pub fn insert_frame(&mut self, frame: Frame) -> Result<(), ValidationError> {
		if self.id_in_use(frame.id.as_str()) {
			return Err(ValidationError::IdCollision { id: frame.id.to_string() });
		}
		self.frames.insert(frame.id.clone(), frame);
		Ok(())
	}

	pub fn update_frame(&mut self, frame: Frame) -> Result<Frame, ValidationError> {
		if !self.frames.contains_key(&frame.id) {
			return Err(ValidationError::UnknownFrame(frame.id.clone()));
		}
		Ok(self.frames.insert(frame.id.clone(), frame).expect("presence checked above"))
	}

	pub fn remove_frame(&mut self, id: &FrameId) -> Result<Frame, ValidationError> {
		self.frames.remove(id).ok_or_else(|| ValidationError::UnknownFrame(id.clone()))
	}

	/// Update a socket's presentation fields in place, returning the previous values.
	pub fn update_socket_metadata(&mut self, id: &SocketId, metadata: SocketMetadata) -> Result<SocketMetadata, ValidationError> {
		let socket = self.sockets.get_mut(id).ok_or_else(|| ValidationError::UnknownSocket(id.clone()))?;
		let previous = SocketMetadata {
			label: std::mem::replace(&mut socket.label, metadata.label),
			label_placement: std::mem::replace(&mut socket.label_placement, metadata.label_placement),
			number_format: std::mem::replace(&mut socket.number_format, metadata.number_format),
		};
		Ok(previous)
	}

	/// Atomically replace a node's socket sets (and the node record itself, which carries
	/// position and params). Wires keep flowing through sockets that survive by id and remain
	/// valid under the new directions and types; every other touching wire is removed and
	/// returned for the command inverse.
	pub fn replace_node_io(&mut self, node: Node, sockets: Vec<Socket>) -> Result<ReplacedIo, ValidationError> {
		if !self.nodes.contains_key(&node.id) {
			return Err(ValidationError::UnknownNode(node.id.clone()));
		}
		self.validate_node_io(&node, &sockets, Some(&node.id))?;

		let touching: Vec<Wire> = self.wires_touching(&node.id).into_iter().cloned().collect();

		let old_node = self.nodes.remove(&node.id).expect("presence checked above");
		let mut old_sockets = Vec::with_capacity(old_node.inputs.len() + old_node.outputs.len());
		for socket_id in old_node.inputs.iter().chain(&old_node.outputs) {
			if let Some(socket) = self.sockets.remove(socket_id) {
				old_sockets.push(socket);
			}
		}

		for socket in sockets {
			self.sockets.insert(socket.id.clone(), socket);
		}
		self.nodes.insert(node.id.clone(), node);

		let mut removed_wires = Vec::new();
		for wire in touching {
			let survives = match (self.sockets.get(&wire.from), self.sockets.get(&wire.to)) {
				(Some(from), Some(to)) => from.direction == Direction::Output && to.direction == Direction::Input && DataType::compatible(from.data_type, to.data_type),
				_ => false,
			};
			if !survives {
				self.incoming.remove(&wire.to);
				if let Some(removed) = self.wires.remove(&wire.id) {
					removed_wires.push(removed);
				}
			}
		}

		Ok(ReplacedIo {
			node: old_node,
			sockets: old_sockets,
			removed_wires,
		})
	}

	/// Write (or with `None`, clear) one entry of a node's params object. The value replaces
	/// whatever was stored under the key; notably the reserved `overrides` object of a
	/// subgraph node is swapped wholesale, never merged.
	pub fn update_node_param(&mut self, id: &NodeId, key: &str, value: Option<Value>) -> Result<Option<Value>, ValidationError> {
		let node = self.nodes.get_mut(id).ok_or_else(|| ValidationError::UnknownNode(id.clone()))?;
		let previous = match value {
			Some(value) => node.params.insert(key.to_string(), value),
			None => node.params.remove(key),
		};
		Ok(previous)
	}
}
