//! The versioned wire format. `Graph → GraphDocument → Graph` is the identity for any graph
//! reachable through the store api; loading runs the migration table first (see
//! [`crate::migration`]).

use crate::data_type::DataType;
use crate::error::DocumentError;
use crate::graph::{Direction, Frame, Graph, LabelPlacement, Node, NumberFormat, Socket, Wire};
use crate::id::{FrameId, GraphId, NodeId, SocketId, WireId};
use crate::value::JsonObject;
use glam::DVec2;
use serde_json::Value;

/// The newest schema version this build reads and the only one it writes.
pub const DOCUMENT_VERSION: u32 = 3;

fn is_false(value: &bool) -> bool {
	!*value
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDocument {
	pub version: u32,
	pub graph_id: GraphId,
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub nodes: Vec<DocumentNode>,
	#[serde(default)]
	pub wires: Vec<DocumentWire>,
	#[serde(default)]
	pub frames: Vec<DocumentFrame>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DocumentPosition {
	pub x: f64,
	pub y: f64,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentNode {
	pub id: NodeId,
	#[serde(rename = "type")]
	pub node_type: String,
	#[serde(default)]
	pub position: DocumentPosition,
	#[serde(default)]
	pub inputs: Vec<DocumentSocket>,
	#[serde(default)]
	pub outputs: Vec<DocumentSocket>,
	#[serde(default, skip_serializing_if = "JsonObject::is_empty")]
	pub params: JsonObject,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSocket {
	pub id: SocketId,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub label: Option<String>,
	pub data_type: DataType,
	#[serde(default, skip_serializing_if = "is_false")]
	pub required: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub default_value: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub min_connections: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_connections: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub label_placement: Option<LabelPlacement>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub number_format: Option<NumberFormat>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentWire {
	pub id: WireId,
	pub from_socket_id: SocketId,
	pub to_socket_id: SocketId,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFrame {
	pub id: FrameId,
	pub title: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub color: Option<String>,
	#[serde(default, skip_serializing_if = "is_false")]
	pub collapsed: bool,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub exposed_inputs: Vec<SocketId>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub exposed_outputs: Vec<SocketId>,
}

fn document_socket(socket: &Socket) -> DocumentSocket {
	DocumentSocket {
		id: socket.id.clone(),
		name: socket.name.clone(),
		label: socket.label.clone(),
		data_type: socket.data_type,
		required: socket.required,
		default_value: socket.default_value.clone(),
		min_connections: socket.min_connections,
		max_connections: socket.max_connections,
		label_placement: socket.label_placement,
		number_format: socket.number_format.clone(),
	}
}

fn socket_entity(document: DocumentSocket, node: NodeId, direction: Direction) -> Socket {
	Socket {
		id: document.id,
		node,
		name: document.name,
		label: document.label,
		direction,
		data_type: document.data_type,
		required: document.required,
		default_value: document.default_value,
		min_connections: document.min_connections,
		max_connections: document.max_connections,
		label_placement: document.label_placement,
		number_format: document.number_format,
	}
}

impl Graph {
	/// Encode to the persisted schema. Entities are ordered by id so equal graphs produce
	/// byte-equal documents regardless of hash-map iteration order.
	pub fn to_document(&self) -> GraphDocument {
		let mut nodes: Vec<&Node> = self.nodes().collect();
		nodes.sort_by(|a, b| a.id.cmp(&b.id));
		let nodes = nodes
			.into_iter()
			.map(|node| DocumentNode {
				id: node.id.clone(),
				node_type: node.node_type.clone(),
				position: DocumentPosition { x: node.position.x, y: node.position.y },
				inputs: node.inputs.iter().filter_map(|id| self.socket(id)).map(document_socket).collect(),
				outputs: node.outputs.iter().filter_map(|id| self.socket(id)).map(document_socket).collect(),
				params: node.params.clone(),
			})
			.collect();

		let mut wires: Vec<&Wire> = self.wires().collect();
		wires.sort_by(|a, b| a.id.cmp(&b.id));
		let wires = wires
			.into_iter()
			.map(|wire| DocumentWire {
				id: wire.id.clone(),
				from_socket_id: wire.from.clone(),
				to_socket_id: wire.to.clone(),
			})
			.collect();

		let mut frames: Vec<&Frame> = self.frames().collect();
		frames.sort_by(|a, b| a.id.cmp(&b.id));
		let frames = frames
			.into_iter()
			.map(|frame| DocumentFrame {
				id: frame.id.clone(),
				title: frame.title.clone(),
				description: frame.description.clone(),
				color: frame.color.clone(),
				collapsed: frame.collapsed,
				// Exposed socket references are weak; drop the ones that no longer resolve.
				exposed_inputs: frame.exposed_inputs.iter().filter(|id| self.socket(id).is_some()).cloned().collect(),
				exposed_outputs: frame.exposed_outputs.iter().filter(|id| self.socket(id).is_some()).cloned().collect(),
			})
			.collect();

		GraphDocument {
			version: DOCUMENT_VERSION,
			graph_id: self.graph_id().clone(),
			name: self.name().to_string(),
			nodes,
			wires,
			frames,
		}
	}
}

impl GraphDocument {
	pub fn new(graph_id: GraphId, name: impl Into<String>) -> Self {
		Self {
			version: DOCUMENT_VERSION,
			graph_id,
			name: name.into(),
			nodes: Vec::new(),
			wires: Vec::new(),
			frames: Vec::new(),
		}
	}

	/// Parse and migrate a serialized document.
	pub fn from_json(json: &str) -> Result<Self, DocumentError> {
		let mut value: Value = serde_json::from_str(json)?;
		crate::migration::migrate_document(&mut value)?;
		Ok(serde_json::from_value(value)?)
	}

	pub fn to_json(&self) -> Result<String, DocumentError> {
		Ok(serde_json::to_string_pretty(self)?)
	}

	/// Rebuild the live graph. Structural violations (colliding ids, dangling io lists) abort
	/// the load; wires that no longer validate are dropped with a warning, since documents
	/// written by older builds may carry them.
	pub fn into_graph(self) -> Result<Graph, DocumentError> {
		if self.version > DOCUMENT_VERSION {
			return Err(DocumentError::UnsupportedVersion {
				found: self.version,
				newest: DOCUMENT_VERSION,
			});
		}

		let mut graph = Graph::new(self.graph_id, self.name);
		for document_node in self.nodes {
			let node_id = document_node.id.clone();
			let mut sockets = Vec::with_capacity(document_node.inputs.len() + document_node.outputs.len());
			let mut inputs = Vec::with_capacity(document_node.inputs.len());
			let mut outputs = Vec::with_capacity(document_node.outputs.len());
			for socket in document_node.inputs {
				inputs.push(socket.id.clone());
				sockets.push(socket_entity(socket, node_id.clone(), Direction::Input));
			}
			for socket in document_node.outputs {
				outputs.push(socket.id.clone());
				sockets.push(socket_entity(socket, node_id.clone(), Direction::Output));
			}
			let node = Node {
				id: node_id,
				node_type: document_node.node_type,
				position: DVec2::new(document_node.position.x, document_node.position.y),
				inputs,
				outputs,
				params: document_node.params,
			};
			graph.insert_node(node, sockets).map_err(|error| DocumentError::SchemaViolation { reason: error.to_string() })?;
		}

		for wire in self.wires {
			if let Err(error) = graph.insert_wire(Wire::new(wire.id.clone(), wire.from_socket_id, wire.to_socket_id)) {
				log::warn!("Dropping wire `{}` while loading: {error}", wire.id);
			}
		}

		for frame in self.frames {
			let frame = Frame {
				id: frame.id,
				title: frame.title,
				description: frame.description,
				color: frame.color,
				collapsed: frame.collapsed,
				exposed_inputs: frame.exposed_inputs,
				exposed_outputs: frame.exposed_outputs,
			};
			graph.insert_frame(frame).map_err(|error| DocumentError::SchemaViolation { reason: error.to_string() })?;
		}

		Ok(graph)
	}
}
