//! The node catalog: the set of node types the editor can place, each contributing a socket
//! blueprint, a parameter schema for the properties panel, and a compute function invoked by
//! the executor.

use crate::data_type::DataType;
use crate::error::ValidationError;
use crate::graph::{Graph, Node, Socket};
use crate::id::{IdGenerator, NodeId, SocketId};
use crate::value::{self, JsonObject};
use glam::DVec2;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A node compute rejected its inputs or params.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ComputeError(pub String);

impl ComputeError {
	pub fn new(message: impl Into<String>) -> Self {
		Self(message.into())
	}
}

impl From<value::CoerceError> for ComputeError {
	fn from(error: value::CoerceError) -> Self {
		Self(error.to_string())
	}
}

/// Pure function from `(params, inputs by socket name)` to outputs by socket name.
/// The executor resolves every declared input before calling, so computes never consult wires.
pub type ComputeFn = Arc<dyn Fn(&JsonObject, &HashMap<String, Value>) -> Result<HashMap<String, Value>, ComputeError> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
	Float,
	Int,
	Bool,
	Vec2,
	Vec3,
	Vec4,
	String,
	Enum,
	Color,
}

impl ParamKind {
	/// The socket type a parameter of this kind surfaces as when promoted.
	/// The text-like and color kinds are not promotable.
	pub fn promoted_data_type(self) -> Option<DataType> {
		match self {
			ParamKind::Float => Some(DataType::Float),
			ParamKind::Int => Some(DataType::Int),
			ParamKind::Bool => Some(DataType::Bool),
			ParamKind::Vec2 => Some(DataType::Vec2),
			ParamKind::Vec3 => Some(DataType::Vec3),
			ParamKind::Vec4 => Some(DataType::Vec4),
			ParamKind::String | ParamKind::Enum | ParamKind::Color => None,
		}
	}
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParamField {
	pub id: String,
	pub label: String,
	pub kind: ParamKind,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub min: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub step: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub default: Option<Value>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub options: Vec<String>,
}

impl ParamField {
	pub fn new(id: impl Into<String>, label: impl Into<String>, kind: ParamKind) -> Self {
		Self {
			id: id.into(),
			label: label.into(),
			kind,
			min: None,
			max: None,
			step: None,
			default: None,
			options: Vec::new(),
		}
	}

	pub fn with_default(mut self, default: Value) -> Self {
		self.default = Some(default);
		self
	}

	pub fn with_range(mut self, min: f64, max: f64) -> Self {
		self.min = Some(min);
		self.max = Some(max);
		self
	}

	pub fn with_options(mut self, options: &[&str]) -> Self {
		self.options = options.iter().map(|option| option.to_string()).collect();
		self
	}
}

/// One socket of a definition's default io shape.
#[derive(Clone, Debug, PartialEq)]
pub struct BlueprintSocket {
	pub name: String,
	pub data_type: DataType,
	pub required: bool,
	pub default_value: Option<Value>,
}

impl BlueprintSocket {
	pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
		Self {
			name: name.into(),
			data_type,
			required: false,
			default_value: None,
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
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SocketBlueprint {
	pub inputs: Vec<BlueprintSocket>,
	pub outputs: Vec<BlueprintSocket>,
}

impl SocketBlueprint {
	pub fn new(inputs: Vec<BlueprintSocket>, outputs: Vec<BlueprintSocket>) -> Self {
		Self { inputs, outputs }
	}
}

#[derive(Clone)]
pub struct NodeDefinition {
	pub node_type: String,
	pub label: String,
	pub description: String,
	pub compute: ComputeFn,
	pub param_schema: Vec<ParamField>,
	pub blueprint: SocketBlueprint,
}

impl fmt::Debug for NodeDefinition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("NodeDefinition")
			.field("node_type", &self.node_type)
			.field("label", &self.label)
			.field("param_schema", &self.param_schema)
			.field("blueprint", &self.blueprint)
			.finish()
	}
}

impl NodeDefinition {
	pub fn param_field(&self, field_id: &str) -> Option<&ParamField> {
		self.param_schema.iter().find(|field| field.id == field_id)
	}
}

/// Lookup table from node type key to definition. Hosts extend it with [`NodeCatalog::register`].
#[derive(Clone, Debug)]
pub struct NodeCatalog {
	definitions: HashMap<String, NodeDefinition>,
}

impl NodeCatalog {
	pub fn empty() -> Self {
		Self { definitions: HashMap::new() }
	}

	pub fn with_builtins() -> Self {
		let mut catalog = Self::empty();
		for definition in BUILTIN_DEFINITIONS.iter() {
			catalog.register(definition.clone());
		}
		catalog
	}

	/// Registering a definition under an existing key replaces it.
	pub fn register(&mut self, definition: NodeDefinition) {
		self.definitions.insert(definition.node_type.clone(), definition);
	}

	pub fn get(&self, node_type: &str) -> Option<&NodeDefinition> {
		self.definitions.get(node_type)
	}

	pub fn definitions(&self) -> impl Iterator<Item = &NodeDefinition> {
		self.definitions.values()
	}

	/// Build a fresh node (and its sockets) from a definition's blueprint, with generated ids
	/// that do not collide with anything in `graph`. Schema defaults are prefilled into params.
	pub fn instantiate(&self, node_type: &str, graph: &Graph, ids: &mut IdGenerator, position: DVec2) -> Result<(Node, Vec<Socket>), ValidationError> {
		let definition = self.get(node_type).ok_or_else(|| ValidationError::UnknownNodeType(node_type.to_string()))?;

		let mut claimed = HashSet::new();
		let node_id = NodeId::new(ids.unique("node", |id| graph.id_in_use(id))?);
		claimed.insert(node_id.to_string());

		let mut sockets = Vec::new();
		let mut inputs = Vec::new();
		let mut outputs = Vec::new();
		for (blueprint, is_input) in definition.blueprint.inputs.iter().map(|socket| (socket, true)).chain(definition.blueprint.outputs.iter().map(|socket| (socket, false))) {
			let socket_id = SocketId::new(ids.unique("socket", |id| graph.id_in_use(id) || claimed.contains(id))?);
			claimed.insert(socket_id.to_string());
			let mut socket = if is_input {
				inputs.push(socket_id.clone());
				Socket::input(socket_id, node_id.clone(), blueprint.name.clone(), blueprint.data_type)
			} else {
				outputs.push(socket_id.clone());
				Socket::output(socket_id, node_id.clone(), blueprint.name.clone(), blueprint.data_type)
			};
			socket.required = blueprint.required;
			socket.default_value = blueprint.default_value.clone();
			sockets.push(socket);
		}

		let mut node = Node::new(node_id, node_type, position).with_io(inputs, outputs);
		for field in &definition.param_schema {
			if let Some(default) = &field.default {
				node.params.insert(field.id.clone(), default.clone());
			}
		}
		Ok((node, sockets))
	}
}

fn input_float(inputs: &HashMap<String, Value>, name: &str) -> Result<f64, ComputeError> {
	inputs.get(name).map(value::coerce_float).transpose().map(|float| float.unwrap_or(0.)).map_err(ComputeError::from)
}

fn input_vec3(inputs: &HashMap<String, Value>, name: &str) -> Result<[f64; 3], ComputeError> {
	inputs.get(name).map(value::coerce_vec3).transpose().map(|vec| vec.unwrap_or([0.; 3])).map_err(ComputeError::from)
}

fn single_output(name: &str, value: Value) -> HashMap<String, Value> {
	HashMap::from([(name.to_string(), value)])
}

fn constant_compute(params: &JsonObject, _inputs: &HashMap<String, Value>) -> Result<HashMap<String, Value>, ComputeError> {
	Ok(single_output("out", params.get("value").cloned().unwrap_or(Value::Null)))
}

fn binary_float(compute: fn(f64, f64) -> Result<f64, ComputeError>) -> ComputeFn {
	Arc::new(move |_params, inputs| {
		let a = input_float(inputs, "a")?;
		let b = input_float(inputs, "b")?;
		Ok(single_output("out", value::float_value(compute(a, b)?)))
	})
}

fn float_params(names: &[&str]) -> Vec<ParamField> {
	names.iter().map(|name| ParamField::new(*name, name.to_uppercase(), ParamKind::Float).with_default(serde_json::json!(0.))).collect()
}

fn float_inputs(names: &[&str]) -> Vec<BlueprintSocket> {
	names.iter().map(|name| BlueprintSocket::new(*name, DataType::Float)).collect()
}

fn float_out() -> Vec<BlueprintSocket> {
	vec![BlueprintSocket::new("out", DataType::Float)]
}

fn constant_definition(node_type: &str, label: &str, kind: ParamKind, data_type: DataType, default: Value) -> NodeDefinition {
	NodeDefinition {
		node_type: node_type.to_string(),
		label: label.to_string(),
		description: format!("A constant {data_type} value."),
		compute: Arc::new(constant_compute),
		param_schema: vec![ParamField::new("value", "Value", kind).with_default(default)],
		blueprint: SocketBlueprint::new(vec![], vec![BlueprintSocket::new("out", data_type)]),
	}
}

/// The type key whose nodes embed a whole sub-document; expanded by the executor rather than
/// computed through the catalog.
pub const SUBGRAPH_NODE_TYPE: &str = "subgraph";
/// Interface proxy placed inside a definition to expose an input.
pub const GRAPH_INPUT_NODE_TYPE: &str = "graph-input";
/// Interface proxy placed inside a definition to expose an output.
pub const GRAPH_OUTPUT_NODE_TYPE: &str = "graph-output";

static BUILTIN_DEFINITIONS: Lazy<Vec<NodeDefinition>> = Lazy::new(|| {
	use serde_json::json;

	vec![
		constant_definition("const-float", "Float", ParamKind::Float, DataType::Float, json!(0.)),
		constant_definition("const-int", "Integer", ParamKind::Int, DataType::Int, json!(0)),
		constant_definition("const-bool", "Boolean", ParamKind::Bool, DataType::Bool, json!(false)),
		constant_definition("const-vec2", "Vector 2", ParamKind::Vec2, DataType::Vec2, json!([0., 0.])),
		constant_definition("const-vec3", "Vector 3", ParamKind::Vec3, DataType::Vec3, json!([0., 0., 0.])),
		constant_definition("const-vec4", "Vector 4", ParamKind::Vec4, DataType::Vec4, json!([0., 0., 0., 0.])),
		constant_definition("const-color", "Color", ParamKind::Color, DataType::Color, json!([0., 0., 0., 1.])),
		constant_definition("const-string", "String", ParamKind::String, DataType::String, json!("")),
		NodeDefinition {
			node_type: "add".to_string(),
			label: "Add".to_string(),
			description: "Sum of the two inputs.".to_string(),
			compute: binary_float(|a, b| Ok(a + b)),
			param_schema: float_params(&["a", "b"]),
			blueprint: SocketBlueprint::new(float_inputs(&["a", "b"]), float_out()),
		},
		NodeDefinition {
			node_type: "subtract".to_string(),
			label: "Subtract".to_string(),
			description: "Difference of the two inputs.".to_string(),
			compute: binary_float(|a, b| Ok(a - b)),
			param_schema: float_params(&["a", "b"]),
			blueprint: SocketBlueprint::new(float_inputs(&["a", "b"]), float_out()),
		},
		NodeDefinition {
			node_type: "multiply".to_string(),
			label: "Multiply".to_string(),
			description: "Product of the two inputs.".to_string(),
			compute: binary_float(|a, b| Ok(a * b)),
			param_schema: float_params(&["a", "b"]),
			blueprint: SocketBlueprint::new(float_inputs(&["a", "b"]), float_out()),
		},
		NodeDefinition {
			node_type: "divide".to_string(),
			label: "Divide".to_string(),
			description: "Quotient of the two inputs.".to_string(),
			compute: binary_float(|a, b| if b == 0. { Err(ComputeError::new("division by zero")) } else { Ok(a / b) }),
			param_schema: float_params(&["a", "b"]),
			blueprint: SocketBlueprint::new(float_inputs(&["a", "b"]), float_out()),
		},
		NodeDefinition {
			node_type: "mix".to_string(),
			label: "Mix".to_string(),
			description: "Linear blend between the inputs by `t`.".to_string(),
			compute: Arc::new(|_params, inputs| {
				let a = input_float(inputs, "a")?;
				let b = input_float(inputs, "b")?;
				let t = input_float(inputs, "t")?;
				Ok(single_output("out", value::float_value(a + (b - a) * t)))
			}),
			param_schema: float_params(&["a", "b", "t"]),
			blueprint: SocketBlueprint::new(float_inputs(&["a", "b", "t"]), float_out()),
		},
		NodeDefinition {
			node_type: "clamp".to_string(),
			label: "Clamp".to_string(),
			description: "Restrict the input to the closed range [min, max].".to_string(),
			compute: Arc::new(|_params, inputs| {
				let input = input_float(inputs, "value")?;
				let min = input_float(inputs, "min")?;
				let max = input_float(inputs, "max")?;
				Ok(single_output("out", value::float_value(input.clamp(min, max.max(min)))))
			}),
			param_schema: vec![
				ParamField::new("value", "Value", ParamKind::Float).with_default(json!(0.)),
				ParamField::new("min", "Min", ParamKind::Float).with_default(json!(0.)),
				ParamField::new("max", "Max", ParamKind::Float).with_default(json!(1.)),
			],
			blueprint: SocketBlueprint::new(
				vec![
					BlueprintSocket::new("value", DataType::Float),
					BlueprintSocket::new("min", DataType::Float),
					BlueprintSocket::new("max", DataType::Float).with_default(json!(1.)),
				],
				float_out(),
			),
		},
		NodeDefinition {
			node_type: "dot".to_string(),
			label: "Dot Product".to_string(),
			description: "Dot product of two vectors.".to_string(),
			compute: Arc::new(|_params, inputs| {
				let a = input_vec3(inputs, "a")?;
				let b = input_vec3(inputs, "b")?;
				Ok(single_output("out", value::float_value(a[0] * b[0] + a[1] * b[1] + a[2] * b[2])))
			}),
			param_schema: vec![],
			blueprint: SocketBlueprint::new(vec![BlueprintSocket::new("a", DataType::Vec3), BlueprintSocket::new("b", DataType::Vec3)], float_out()),
		},
		NodeDefinition {
			node_type: "length".to_string(),
			label: "Length".to_string(),
			description: "Euclidean length of a vector.".to_string(),
			compute: Arc::new(|_params, inputs| {
				let v = input_vec3(inputs, "v")?;
				Ok(single_output("out", value::float_value((v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt())))
			}),
			param_schema: vec![],
			blueprint: SocketBlueprint::new(vec![BlueprintSocket::new("v", DataType::Vec3)], float_out()),
		},
		NodeDefinition {
			node_type: "combine-xyz".to_string(),
			label: "Combine XYZ".to_string(),
			description: "Assemble a vector from scalar components.".to_string(),
			compute: Arc::new(|_params, inputs| {
				let x = input_float(inputs, "x")?;
				let y = input_float(inputs, "y")?;
				let z = input_float(inputs, "z")?;
				Ok(single_output("v", value::vector_value(&[x, y, z])))
			}),
			param_schema: float_params(&["x", "y", "z"]),
			blueprint: SocketBlueprint::new(float_inputs(&["x", "y", "z"]), vec![BlueprintSocket::new("v", DataType::Vec3)]),
		},
		NodeDefinition {
			node_type: "separate-xyz".to_string(),
			label: "Separate XYZ".to_string(),
			description: "Split a vector into scalar components.".to_string(),
			compute: Arc::new(|_params, inputs| {
				let v = input_vec3(inputs, "v")?;
				Ok(HashMap::from([
					("x".to_string(), value::float_value(v[0])),
					("y".to_string(), value::float_value(v[1])),
					("z".to_string(), value::float_value(v[2])),
				]))
			}),
			param_schema: vec![],
			blueprint: SocketBlueprint::new(
				vec![BlueprintSocket::new("v", DataType::Vec3)],
				vec![
					BlueprintSocket::new("x", DataType::Float),
					BlueprintSocket::new("y", DataType::Float),
					BlueprintSocket::new("z", DataType::Float),
				],
			),
		},
		NodeDefinition {
			node_type: GRAPH_INPUT_NODE_TYPE.to_string(),
			label: "Graph Input".to_string(),
			description: "Exposes a value as an input of the enclosing subgraph.".to_string(),
			compute: Arc::new(|params, _inputs| Ok(single_output("value", params.get("value").cloned().unwrap_or(Value::Null)))),
			param_schema: vec![
				ParamField::new("name", "Name", ParamKind::String).with_default(json!("input")),
				ParamField::new("dataType", "Data Type", ParamKind::Enum)
					.with_default(json!("float"))
					.with_options(&["float", "int", "bool", "vec2", "vec3", "vec4", "color", "texture", "string", "any"]),
			],
			blueprint: SocketBlueprint::new(vec![], vec![BlueprintSocket::new("value", DataType::Any)]),
		},
		NodeDefinition {
			node_type: GRAPH_OUTPUT_NODE_TYPE.to_string(),
			label: "Graph Output".to_string(),
			description: "Exposes the value wired into it as an output of the enclosing subgraph.".to_string(),
			compute: Arc::new(|_params, _inputs| Ok(HashMap::new())),
			param_schema: vec![ParamField::new("name", "Name", ParamKind::String).with_default(json!("output"))],
			blueprint: SocketBlueprint::new(vec![BlueprintSocket::new("value", DataType::Any)], vec![]),
		},
		NodeDefinition {
			node_type: SUBGRAPH_NODE_TYPE.to_string(),
			label: "Subgraph".to_string(),
			description: "An embedded graph; its io shape comes from the embedded definition.".to_string(),
			compute: Arc::new(|_params, _inputs| Err(ComputeError::new("subgraph nodes are evaluated by expansion"))),
			param_schema: vec![],
			blueprint: SocketBlueprint::default(),
		},
	]
});

#[cfg(test)]
mod test {
	use super::*;
	use crate::id::GraphId;
	use serde_json::json;

	#[test]
	fn instantiate_builds_node_from_blueprint() {
		let catalog = NodeCatalog::with_builtins();
		let graph = Graph::new(GraphId::new("graph-test"), "Test");
		let mut ids = IdGenerator::from_seed(1);

		let (node, sockets) = catalog.instantiate("add", &graph, &mut ids, DVec2::new(10., 20.)).unwrap();
		assert_eq!(node.node_type, "add");
		assert_eq!(node.inputs.len(), 2);
		assert_eq!(node.outputs.len(), 1);
		assert_eq!(sockets.len(), 3);
		assert_eq!(node.params.get("a"), Some(&json!(0.)));
		assert!(sockets.iter().all(|socket| socket.node == node.id));

		let error = catalog.instantiate("no-such-node", &graph, &mut ids, DVec2::ZERO).unwrap_err();
		assert_eq!(error, ValidationError::UnknownNodeType("no-such-node".to_string()));
	}

	#[test]
	fn builtin_computes() {
		let catalog = NodeCatalog::with_builtins();
		let inputs = HashMap::from([("a".to_string(), json!(3.)), ("b".to_string(), json!(4.))]);
		let outputs = (catalog.get("add").unwrap().compute)(&JsonObject::new(), &inputs).unwrap();
		assert_eq!(outputs.get("out"), Some(&json!(7.)));

		let divide = catalog.get("divide").unwrap();
		let inputs = HashMap::from([("a".to_string(), json!(3.)), ("b".to_string(), json!(0.))]);
		assert_eq!((divide.compute)(&JsonObject::new(), &inputs).unwrap_err(), ComputeError::new("division by zero"));

		let mut params = JsonObject::new();
		params.insert("value".to_string(), json!(2.5));
		let outputs = (catalog.get("const-float").unwrap().compute)(&params, &HashMap::new()).unwrap();
		assert_eq!(outputs.get("out"), Some(&json!(2.5)));
	}

	#[test]
	fn promotable_param_kinds() {
		assert_eq!(ParamKind::Float.promoted_data_type(), Some(DataType::Float));
		assert_eq!(ParamKind::Vec4.promoted_data_type(), Some(DataType::Vec4));
		assert_eq!(ParamKind::String.promoted_data_type(), None);
		assert_eq!(ParamKind::Enum.promoted_data_type(), None);
		assert_eq!(ParamKind::Color.promoted_data_type(), None);
	}
}
