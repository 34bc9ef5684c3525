//! Utilities that make editor tests declarative: a seeded editor, lookups by socket name,
//! and prebuilt subgraph definitions.

use crate::editor::Editor;
use glam::DVec2;
use graph_store::document::GraphDocument;
use graph_store::graph::{Direction, Graph};
use graph_store::id::{NodeId, SocketId, WireId};
use pull_executor::engine::EvaluationStatus;
use serde_json::json;

pub struct EditorTestUtils {
	pub editor: Editor,
}

pub fn socket_by_name(graph: &Graph, node_id: &NodeId, name: &str, direction: Direction) -> SocketId {
	let node = graph.node(node_id).unwrap_or_else(|| panic!("node `{node_id}` should exist"));
	let ids = if direction == Direction::Input { &node.inputs } else { &node.outputs };
	ids.iter()
		.find(|id| graph.socket(id).map(|socket| socket.name == name).unwrap_or(false))
		.unwrap_or_else(|| panic!("node `{node_id}` should have a socket named `{name}`"))
		.clone()
}

impl EditorTestUtils {
	pub fn create() -> Self {
		Self::with_seed(0)
	}

	pub fn with_seed(seed: u64) -> Self {
		let _ = env_logger::builder().is_test(true).try_init();
		Self { editor: Editor::with_seed(seed) }
	}

	pub fn add_node(&mut self, node_type: &str) -> NodeId {
		self.editor.add_node(node_type, DVec2::ZERO).expect("node type should instantiate")
	}

	pub fn add_const_float(&mut self, value: f64) -> NodeId {
		let node_id = self.add_node("const-float");
		self.editor.set_node_param(&node_id, "value", json!(value)).expect("const-float should accept a value");
		node_id
	}

	pub fn input_socket(&self, node_id: &NodeId, name: &str) -> SocketId {
		socket_by_name(self.editor.graph(), node_id, name, Direction::Input)
	}

	pub fn output_socket(&self, node_id: &NodeId, name: &str) -> SocketId {
		socket_by_name(self.editor.graph(), node_id, name, Direction::Output)
	}

	pub fn connect_named(&mut self, from_node: &NodeId, from_name: &str, to_node: &NodeId, to_name: &str) -> WireId {
		let from = self.output_socket(from_node, from_name);
		let to = self.input_socket(to_node, to_name);
		self.editor.connect(from, to).expect("sockets should connect")
	}

	/// Request the named output and drive the evaluation until it settles.
	pub fn evaluate(&mut self, node_id: &NodeId, output_name: &str) -> EvaluationStatus {
		let socket = self.output_socket(node_id, output_name);
		self.editor.request_output(socket).expect("output socket should be requestable");
		self.editor.evaluate_to_completion()
	}

	/// A definition holding one `add` node with `params.b = 1`, plus the handles needed to
	/// expose its `a` input and `out` output on instances.
	pub fn build_add_one_definition(&self) -> (GraphDocument, NodeId, SocketId, SocketId) {
		let mut builder = Editor::with_seed(1000);
		let add = builder.add_node("add", DVec2::ZERO).expect("add should instantiate");
		builder.set_node_param(&add, "b", json!(1.)).expect("add should accept b");
		let a = socket_by_name(builder.graph(), &add, "a", Direction::Input);
		let out = socket_by_name(builder.graph(), &add, "out", Direction::Output);
		(builder.graph().to_document(), add, a, out)
	}
}
