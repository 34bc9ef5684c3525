//! Keeping subgraph instances in step with their definitions: deriving a definition's
//! interface from its `graph-input`/`graph-output` proxies, building fresh instances, and
//! rebuilding every instance's outer sockets and mapping tables when the definition's shape
//! changes. Wires survive a rebuild through sockets whose names survive, because those
//! sockets keep their ids.

use crate::commands::{GraphCommand, NodeIo};
use graph_store::catalog::{GRAPH_INPUT_NODE_TYPE, GRAPH_OUTPUT_NODE_TYPE, NodeCatalog, SUBGRAPH_NODE_TYPE};
use graph_store::data_type::DataType;
use graph_store::document::GraphDocument;
use graph_store::error::ValidationError;
use graph_store::graph::{Graph, Node, Socket};
use graph_store::id::{GraphId, IdGenerator, NodeId, SocketId};
use graph_store::subgraph::{self, IoBinding, MAX_SUBGRAPH_DEPTH, PromotedParam, SubgraphParams};
use glam::DVec2;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// One exposed socket of a definition, derived from an interface proxy node.
#[derive(Clone, Debug, PartialEq)]
pub struct InterfaceEntry {
	pub name: String,
	pub data_type: DataType,
	pub node_id: NodeId,
	pub socket_id: SocketId,
}

fn invalid_subgraph(reason: impl Into<String>) -> ValidationError {
	ValidationError::PreconditionFailed { reason: reason.into() }
}

/// The definition's `graphId`, read without decoding the whole embedded document.
pub fn instance_definition_id(node: &Node) -> Option<GraphId> {
	if node.node_type != SUBGRAPH_NODE_TYPE {
		return None;
	}
	let graph_id = node.params.get(subgraph::GRAPH_KEY)?.get("graphId")?.as_str()?;
	Some(GraphId::new(graph_id))
}

/// The declared data type of an interface proxy, falling back to the proxy socket's own type.
fn proxy_data_type(node: &Node, socket: &Socket) -> DataType {
	node.params
		.get("dataType")
		.cloned()
		.and_then(|value| serde_json::from_value::<DataType>(value).ok())
		.unwrap_or(socket.data_type)
}

fn proxy_name(node: &Node, fallback: &str) -> String {
	node.params.get("name").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| fallback.to_string())
}

/// Derive the exposed interface of a definition from its proxy nodes, ordered by canvas
/// position (top to bottom, then left to right) for a stable socket order.
pub fn derive_interface(definition: &Graph) -> (Vec<InterfaceEntry>, Vec<InterfaceEntry>) {
	let mut proxies: Vec<&Node> = definition
		.nodes()
		.filter(|node| node.node_type == GRAPH_INPUT_NODE_TYPE || node.node_type == GRAPH_OUTPUT_NODE_TYPE)
		.collect();
	proxies.sort_by(|a, b| {
		(a.position.y, a.position.x)
			.partial_cmp(&(b.position.y, b.position.x))
			.unwrap_or(std::cmp::Ordering::Equal)
			.then_with(|| a.id.cmp(&b.id))
	});

	let mut inputs = Vec::new();
	let mut outputs = Vec::new();
	for proxy in proxies {
		if proxy.node_type == GRAPH_INPUT_NODE_TYPE {
			let Some(socket) = proxy.outputs.first().and_then(|id| definition.socket(id)) else { continue };
			inputs.push(InterfaceEntry {
				name: proxy_name(proxy, "input"),
				data_type: proxy_data_type(proxy, socket),
				node_id: proxy.id.clone(),
				socket_id: socket.id.clone(),
			});
		} else {
			let Some(socket) = proxy.inputs.first().and_then(|id| definition.socket(id)) else { continue };
			outputs.push(InterfaceEntry {
				name: proxy_name(proxy, "output"),
				data_type: proxy_data_type(proxy, socket),
				node_id: proxy.id.clone(),
				socket_id: socket.id.clone(),
			});
		}
	}
	(inputs, outputs)
}

/// How many levels of subgraph nesting a definition document contains, itself included.
/// Saturates just past [`MAX_SUBGRAPH_DEPTH`] so damaged documents cannot recurse forever.
pub fn definition_depth(document: &GraphDocument) -> usize {
	fn depth_inner(document: &GraphDocument, level: usize) -> usize {
		if level > MAX_SUBGRAPH_DEPTH {
			return level;
		}
		let mut deepest = level;
		for node in &document.nodes {
			if node.node_type != SUBGRAPH_NODE_TYPE {
				continue;
			}
			let Some(embedded) = node.params.get(subgraph::GRAPH_KEY) else { continue };
			let Ok(embedded) = serde_json::from_value::<GraphDocument>(embedded.clone()) else { continue };
			deepest = deepest.max(depth_inner(&embedded, level + 1));
		}
		deepest
	}
	depth_inner(document, 1)
}

/// The data type an outer socket bound to `socket_id` should carry: for proxy endpoints the
/// declared type, otherwise the inner socket's own type.
fn binding_data_type(definition: &Graph, socket_id: &SocketId) -> Option<DataType> {
	let socket = definition.socket(socket_id)?;
	let node = definition.node(&socket.node)?;
	if node.node_type == GRAPH_INPUT_NODE_TYPE || node.node_type == GRAPH_OUTPUT_NODE_TYPE {
		return Some(proxy_data_type(node, socket));
	}
	Some(socket.data_type)
}

/// Build a fresh instance node for `definition` with explicit io bindings. The caller chooses
/// what to expose; [`build_instance`] derives the bindings from proxies instead.
pub fn build_instance_with(
	definition: &GraphDocument,
	inputs: Vec<IoBinding>,
	outputs: Vec<IoBinding>,
	graph: &Graph,
	ids: &mut IdGenerator,
	position: DVec2,
) -> Result<(Node, Vec<Socket>), ValidationError> {
	let def_graph = definition.clone().into_graph().map_err(|error| invalid_subgraph(format!("unreadable subgraph definition: {error}")))?;

	let mut claimed = HashSet::new();
	let node_id = NodeId::new(ids.unique("node", |id| graph.id_in_use(id))?);
	claimed.insert(node_id.to_string());

	let mut sockets = Vec::new();
	let mut input_ids = Vec::new();
	let mut output_ids = Vec::new();
	for (binding, is_input) in inputs.iter().map(|binding| (binding, true)).chain(outputs.iter().map(|binding| (binding, false))) {
		let data_type = binding_data_type(&def_graph, &binding.socket_id)
			.ok_or_else(|| invalid_subgraph(format!("io binding `{}` points at a missing socket in the definition", binding.name)))?;
		let socket_id = SocketId::new(ids.unique("socket", |id| graph.id_in_use(id) || claimed.contains(id))?);
		claimed.insert(socket_id.to_string());
		if is_input {
			input_ids.push(socket_id.clone());
			sockets.push(Socket::input(socket_id, node_id.clone(), binding.name.clone(), data_type));
		} else {
			output_ids.push(socket_id.clone());
			sockets.push(Socket::output(socket_id, node_id.clone(), binding.name.clone(), data_type));
		}
	}

	let mut params = SubgraphParams::new(definition.clone());
	params.inputs = inputs;
	params.outputs = outputs;
	let params = params.to_params().map_err(|error| invalid_subgraph(format!("unencodable subgraph params: {error}")))?;

	let mut node = Node::new(node_id, SUBGRAPH_NODE_TYPE, position).with_io(input_ids, output_ids);
	node.params = params;
	Ok((node, sockets))
}

/// Build a fresh instance exposing whatever the definition's interface proxies declare.
pub fn build_instance(definition: &GraphDocument, graph: &Graph, ids: &mut IdGenerator, position: DVec2) -> Result<(Node, Vec<Socket>), ValidationError> {
	let def_graph = definition.clone().into_graph().map_err(|error| invalid_subgraph(format!("unreadable subgraph definition: {error}")))?;
	let (inputs, outputs) = derive_interface(&def_graph);
	let to_bindings = |entries: Vec<InterfaceEntry>| entries.into_iter().map(|entry| IoBinding::new(entry.name, entry.node_id, entry.socket_id)).collect();
	build_instance_with(definition, to_bindings(inputs), to_bindings(outputs), graph, ids, position)
}

/// Rebuild one instance against a changed definition, producing the single atomic command
/// that swaps its outer sockets, mapping tables and embedded document.
///
/// Bindings whose inner endpoints survive keep their outer socket names; those sockets keep
/// their ids, which is what preserves their wires. Bindings to removed endpoints drop (the
/// replacement records the dropped wires), new proxy-declared io is appended, and promoted
/// params that no longer resolve are pruned along with stale overrides.
pub fn rebuild_instance_command(
	graph: &Graph,
	instance_id: &NodeId,
	new_definition: &GraphDocument,
	catalog: &NodeCatalog,
	ids: &mut IdGenerator,
) -> Result<GraphCommand, ValidationError> {
	let instance = graph.node(instance_id).ok_or_else(|| ValidationError::UnknownNode(instance_id.clone()))?;
	if instance.node_type != SUBGRAPH_NODE_TYPE {
		return Err(ValidationError::NotASubgraph(instance_id.clone()));
	}
	let old_params = SubgraphParams::from_params(&instance.params).map_err(|error| invalid_subgraph(format!("unreadable subgraph params: {error}")))?;
	let def_graph = new_definition.clone().into_graph().map_err(|error| invalid_subgraph(format!("unreadable subgraph definition: {error}")))?;
	let (interface_inputs, interface_outputs) = derive_interface(&def_graph);

	let merge_bindings = |old: &[IoBinding], interface: Vec<InterfaceEntry>| -> Vec<IoBinding> {
		let mut bindings: Vec<IoBinding> = old.iter().filter(|binding| def_graph.socket(&binding.socket_id).is_some()).cloned().collect();
		for entry in interface {
			let already_bound = bindings.iter().any(|binding| binding.socket_id == entry.socket_id);
			let name_taken = bindings.iter().any(|binding| binding.name == entry.name);
			if already_bound {
				continue;
			}
			if name_taken {
				log::warn!("Skipping interface socket `{}`: the name is already bound on instance `{instance_id}`", entry.name);
				continue;
			}
			bindings.push(IoBinding::new(entry.name, entry.node_id, entry.socket_id));
		}
		bindings
	};
	let new_inputs = merge_bindings(&old_params.inputs, interface_inputs);
	let new_outputs = merge_bindings(&old_params.outputs, interface_outputs);

	// Promoted params survive while their inner field still exists and stays promotable.
	let mut promoted_types = Vec::new();
	let new_promoted: Vec<PromotedParam> = old_params
		.promoted_params
		.iter()
		.filter(|promoted| {
			let Some(inner_node) = def_graph.node(&promoted.node_id) else { return false };
			let data_type = catalog
				.get(&inner_node.node_type)
				.and_then(|definition| definition.param_field(&promoted.field_id))
				.and_then(|field| field.kind.promoted_data_type());
			match data_type {
				Some(data_type) => {
					promoted_types.push((promoted.key.clone(), data_type));
					true
				}
				None => false,
			}
		})
		.cloned()
		.collect();

	let overrides = old_params.overrides.iter().filter(|(node_id, _)| def_graph.node(node_id).is_some()).map(|(node_id, patch)| (node_id.clone(), patch.clone())).collect();

	// Outer sockets: reuse the id of any same-named, same-direction socket so its wires ride
	// through the replacement.
	let old_input_ids: HashMap<String, SocketId> = instance
		.inputs
		.iter()
		.filter_map(|id| graph.socket(id).map(|socket| (socket.name.clone(), socket.id.clone())))
		.collect();
	let old_output_ids: HashMap<String, SocketId> = instance
		.outputs
		.iter()
		.filter_map(|id| graph.socket(id).map(|socket| (socket.name.clone(), socket.id.clone())))
		.collect();

	let mut claimed = HashSet::new();
	let mut sockets = Vec::new();
	let mut input_ids = Vec::new();
	let mut output_ids = Vec::new();

	{
		let mut push_socket = |name: &str, data_type: DataType, is_input: bool, ids: &mut IdGenerator, claimed: &mut HashSet<String>, sockets: &mut Vec<Socket>| -> Result<SocketId, ValidationError> {
			let reused = if is_input { old_input_ids.get(name) } else { old_output_ids.get(name) };
			let socket_id = match reused {
				Some(id) => id.clone(),
				None => SocketId::new(ids.unique("socket", |id| graph.id_in_use(id) || claimed.contains(id))?),
			};
			claimed.insert(socket_id.to_string());
			sockets.push(if is_input {
				Socket::input(socket_id.clone(), instance_id.clone(), name, data_type)
			} else {
				Socket::output(socket_id.clone(), instance_id.clone(), name, data_type)
			});
			Ok(socket_id)
		};

		for binding in &new_inputs {
			let data_type = binding_data_type(&def_graph, &binding.socket_id).unwrap_or(DataType::Any);
			input_ids.push(push_socket(&binding.name, data_type, true, ids, &mut claimed, &mut sockets)?);
		}
		for (key, data_type) in &promoted_types {
			input_ids.push(push_socket(key, *data_type, true, ids, &mut claimed, &mut sockets)?);
		}
		for binding in &new_outputs {
			let data_type = binding_data_type(&def_graph, &binding.socket_id).unwrap_or(DataType::Any);
			output_ids.push(push_socket(&binding.name, data_type, false, ids, &mut claimed, &mut sockets)?);
		}
	}

	// Params: the reserved tables are replaced; user values survive for surviving socket
	// names and are dropped with their sockets.
	let surviving_names: HashSet<&str> = sockets.iter().map(|socket| socket.name.as_str()).collect();
	let reserved = SubgraphParams {
		graph: new_definition.clone(),
		inputs: new_inputs,
		outputs: new_outputs,
		promoted_params: new_promoted,
		overrides,
	};
	let mut params = reserved.to_params().map_err(|error| invalid_subgraph(format!("unencodable subgraph params: {error}")))?;
	let reserved_keys = [subgraph::GRAPH_KEY, subgraph::INPUTS_KEY, subgraph::OUTPUTS_KEY, subgraph::PROMOTED_PARAMS_KEY, subgraph::OVERRIDES_KEY];
	for (key, value) in &instance.params {
		if reserved_keys.contains(&key.as_str()) {
			continue;
		}
		let was_socket_value = old_input_ids.contains_key(key) || old_output_ids.contains_key(key);
		if was_socket_value && !surviving_names.contains(key.as_str()) {
			continue;
		}
		params.insert(key.clone(), value.clone());
	}

	let mut node = instance.clone();
	node.inputs = input_ids;
	node.outputs = output_ids;
	node.params = params;

	GraphCommand::replace_node_io(graph, NodeIo { node, sockets })
}
