//! Subgraph instance evaluation. An instance flattens into its embedded definition at
//! evaluation time: instance overrides are merged into inner params, the outer input values
//! and promoted parameters are routed to the bound inner sockets, and the mapped inner
//! outputs are pulled recursively with a per-run scratch cache.

use crate::error::RuntimeError;
use graph_store::catalog::{ComputeError, NodeCatalog, SUBGRAPH_NODE_TYPE};
use graph_store::data_type::DataType;
use graph_store::graph::{Direction, Graph, Node, Socket};
use graph_store::id::{NodeId, SocketId};
use graph_store::subgraph::{IoBinding, MAX_SUBGRAPH_DEPTH, SubgraphParams};
use graph_store::value;
use serde_json::Value;
use std::collections::HashMap;

/// Evaluate one subgraph instance. `outer_inputs` holds the instance's resolved input values
/// by outer socket name, restricted to sockets that actually carry a value (a wire, a user
/// param, or a default) so that unfed instance inputs fall back to the definition's own values.
pub fn evaluate_subgraph(instance: &Node, outer_inputs: &HashMap<String, Value>, catalog: &NodeCatalog) -> Result<HashMap<String, Value>, RuntimeError> {
	evaluate_instance(instance, outer_inputs, catalog, 1)
}

fn instance_failure(instance: &Node, cause: impl Into<String>) -> RuntimeError {
	RuntimeError::NodeComputeFailed {
		node_id: instance.id.clone(),
		node_type: instance.node_type.clone(),
		cause: ComputeError::new(cause.into()),
	}
}

fn evaluate_instance(instance: &Node, outer_inputs: &HashMap<String, Value>, catalog: &NodeCatalog, depth: usize) -> Result<HashMap<String, Value>, RuntimeError> {
	if depth > MAX_SUBGRAPH_DEPTH {
		return Err(instance_failure(instance, format!("subgraph nesting exceeds {MAX_SUBGRAPH_DEPTH} levels")));
	}

	let params = SubgraphParams::from_params(&instance.params).map_err(|error| instance_failure(instance, format!("unreadable subgraph params: {error}")))?;
	let mut inner = params
		.graph
		.clone()
		.into_graph()
		.map_err(|error| instance_failure(instance, format!("unreadable subgraph definition: {error}")))?;

	// Instance overrides replace inner parameter values by shallow merge, scoped to this
	// instance; the definition document itself is never written to.
	for (inner_id, patch) in &params.overrides {
		if inner.node(inner_id).is_none() {
			log::warn!("Override for missing inner node `{inner_id}` ignored");
			continue;
		}
		for (key, value) in patch {
			let _ = inner.update_node_param(inner_id, key, Some(value.clone()));
		}
	}

	// A promoted parameter's outer value (wire or edited value) lands in the inner field;
	// with nothing fed from outside, the inner field keeps its own value.
	for promoted in &params.promoted_params {
		let Some(value) = outer_inputs.get(&promoted.key) else { continue };
		if inner.node(&promoted.node_id).is_none() {
			log::warn!("Promoted parameter `{}` points at missing inner node `{}`", promoted.key, promoted.node_id);
			continue;
		}
		let _ = inner.update_node_param(&promoted.node_id, &promoted.field_id, Some(value.clone()));
	}

	let mut injected: HashMap<SocketId, Value> = HashMap::new();
	for binding in &params.inputs {
		if let Some(value) = outer_inputs.get(&binding.name) {
			injected.insert(binding.socket_id.clone(), value.clone());
		}
	}

	let mut cache: HashMap<NodeId, HashMap<String, Value>> = HashMap::new();
	let mut outputs = HashMap::new();
	for binding in &params.outputs {
		let value = resolve_binding(&inner, binding, &injected, &mut cache, catalog, depth).map_err(|error| match error {
			// Keep instance-level failures intact; wrap inner ones so the outer graph sees
			// this instance as the failing node.
			RuntimeError::NodeComputeFailed { ref node_id, .. } if node_id == &instance.id => error,
			error => instance_failure(instance, format!("inner evaluation failed: {error}")),
		})?;
		outputs.insert(binding.name.clone(), value);
	}
	Ok(outputs)
}

/// Output bindings may point at an inner output socket (the produced value) or, for
/// `graph-output` interface proxies, at an inner input socket (the value wired into it).
fn resolve_binding(
	inner: &Graph,
	binding: &IoBinding,
	injected: &HashMap<SocketId, Value>,
	cache: &mut HashMap<NodeId, HashMap<String, Value>>,
	catalog: &NodeCatalog,
	depth: usize,
) -> Result<Value, RuntimeError> {
	let socket = inner
		.socket(&binding.socket_id)
		.ok_or_else(|| RuntimeError::NodeComputeFailed {
			node_id: binding.node_id.clone(),
			node_type: SUBGRAPH_NODE_TYPE.to_string(),
			cause: ComputeError::new(format!("output binding `{}` points at a missing inner socket", binding.name)),
		})?;

	match socket.direction {
		Direction::Output => {
			let outputs = evaluate_inner_node(inner, &socket.node, injected, cache, &mut Vec::new(), catalog, depth)?;
			outputs.get(&socket.name).cloned().ok_or_else(|| RuntimeError::NodeComputeFailed {
				node_id: socket.node.clone(),
				node_type: SUBGRAPH_NODE_TYPE.to_string(),
				cause: ComputeError::new(format!("inner node produced no output named `{}`", socket.name)),
			})
		}
		Direction::Input => resolve_inner_input(inner, socket, injected, cache, &mut Vec::new(), catalog, depth),
	}
}

fn evaluate_inner_node(
	inner: &Graph,
	node_id: &NodeId,
	injected: &HashMap<SocketId, Value>,
	cache: &mut HashMap<NodeId, HashMap<String, Value>>,
	visiting: &mut Vec<NodeId>,
	catalog: &NodeCatalog,
	depth: usize,
) -> Result<HashMap<String, Value>, RuntimeError> {
	if let Some(outputs) = cache.get(node_id) {
		return Ok(outputs.clone());
	}
	if visiting.contains(node_id) {
		let position = visiting.iter().position(|id| id == node_id).unwrap_or(0);
		return Err(RuntimeError::CyclicDependency {
			node_id: node_id.clone(),
			cycle: visiting[position..].to_vec(),
		});
	}
	let Some(node) = inner.node(node_id) else {
		return Err(RuntimeError::NodeComputeFailed {
			node_id: node_id.clone(),
			node_type: SUBGRAPH_NODE_TYPE.to_string(),
			cause: ComputeError::new("inner node is missing"),
		});
	};

	visiting.push(node_id.clone());
	let mut inputs = HashMap::new();
	let mut explicit = HashMap::new();
	for socket_id in &node.inputs {
		let Some(socket) = inner.socket(socket_id) else { continue };
		let resolved = resolve_inner_input(inner, socket, injected, cache, visiting, catalog, depth);
		match resolved {
			Ok(value) => {
				if injected.contains_key(socket_id) || inner.wire_into(socket_id).is_some() || node.params.contains_key(&socket.name) || socket.default_value.is_some() {
					explicit.insert(socket.name.clone(), value.clone());
				}
				inputs.insert(socket.name.clone(), value);
			}
			Err(error) => {
				visiting.pop();
				return Err(error);
			}
		}
	}
	visiting.pop();

	// Interface proxies short-circuit: an injected value replaces whatever the node would
	// have produced on that output.
	let injected_outputs: HashMap<String, Value> = node
		.outputs
		.iter()
		.filter_map(|id| injected.get(id).and_then(|value| inner.socket(id).map(|socket| (socket.name.clone(), value.clone()))))
		.collect();

	let mut outputs = if !node.outputs.is_empty() && injected_outputs.len() == node.outputs.len() {
		HashMap::new()
	} else if node.node_type == SUBGRAPH_NODE_TYPE {
		evaluate_instance(node, &explicit, catalog, depth + 1)?
	} else {
		let Some(definition) = catalog.get(&node.node_type) else {
			return Err(RuntimeError::NodeComputeFailed {
				node_id: node_id.clone(),
				node_type: node.node_type.clone(),
				cause: ComputeError::new("node type is not in the catalog"),
			});
		};
		(definition.compute)(&node.params, &inputs).map_err(|cause| RuntimeError::NodeComputeFailed {
			node_id: node_id.clone(),
			node_type: node.node_type.clone(),
			cause,
		})?
	};
	outputs.extend(injected_outputs);

	cache.insert(node_id.clone(), outputs.clone());
	Ok(outputs)
}

fn resolve_inner_input(
	inner: &Graph,
	socket: &Socket,
	injected: &HashMap<SocketId, Value>,
	cache: &mut HashMap<NodeId, HashMap<String, Value>>,
	visiting: &mut Vec<NodeId>,
	catalog: &NodeCatalog,
	depth: usize,
) -> Result<Value, RuntimeError> {
	if let Some(value) = injected.get(&socket.id) {
		return Ok(value::convert(value, socket.data_type).unwrap_or_else(|_| value.clone()));
	}

	if let Some(wire) = inner.wire_into(&socket.id) {
		if let Some(from_socket) = inner.socket(&wire.from) {
			let producer_outputs = evaluate_inner_node(inner, &from_socket.node, injected, cache, visiting, catalog, depth)?;
			if let Some(value) = producer_outputs.get(&from_socket.name) {
				let carried = DataType::carried(from_socket.data_type, socket.data_type);
				return value::convert(value, carried).map_err(|error| RuntimeError::NodeComputeFailed {
					node_id: socket.node.clone(),
					node_type: SUBGRAPH_NODE_TYPE.to_string(),
					cause: error.into(),
				});
			}
		}
	}

	let node_params = inner.node(&socket.node).map(|node| &node.params);
	if let Some(value) = node_params.and_then(|params| params.get(&socket.name)).or(socket.default_value.as_ref()) {
		return value::convert(value, socket.data_type).map_err(|error| RuntimeError::NodeComputeFailed {
			node_id: socket.node.clone(),
			node_type: SUBGRAPH_NODE_TYPE.to_string(),
			cause: error.into(),
		});
	}

	if socket.required {
		log::warn!("Required inner input `{}` on node `{}` is unfed; substituting zero", socket.name, socket.node);
	}
	Ok(value::zero_value(socket.data_type))
}

#[cfg(test)]
mod test {
	use super::*;
	use glam::DVec2;
	use graph_store::document::GraphDocument;
	use graph_store::graph::Wire;
	use graph_store::id::{GraphId, IdGenerator, WireId};
	use graph_store::subgraph::PromotedParam;
	use graph_store::value::JsonObject;
	use serde_json::json;

	fn catalog() -> NodeCatalog {
		NodeCatalog::with_builtins()
	}

	/// A definition holding one `add` node with `params.b = 1`, exposing `a` and `out`
	/// directly (no interface proxies).
	fn add_definition(catalog: &NodeCatalog, ids: &mut IdGenerator) -> (GraphDocument, NodeId, SocketId, SocketId) {
		let mut graph = Graph::new(GraphId::new(ids.unique("graph", |_| false).unwrap()), "Add One");
		let (mut node, sockets) = catalog.instantiate("add", &graph, ids, DVec2::ZERO).unwrap();
		node.params.insert("b".to_string(), json!(1.));
		let node_id = node.id.clone();
		let input = node.inputs[0].clone();
		let output = node.outputs[0].clone();
		graph.insert_node(node, sockets).unwrap();
		(graph.to_document(), node_id, input, output)
	}

	fn instance_node(params: &SubgraphParams, ids: &mut IdGenerator) -> Node {
		let mut node = Node::new(NodeId::new(ids.unique("node", |_| false).unwrap()), SUBGRAPH_NODE_TYPE, DVec2::ZERO);
		node.params = params.to_params().unwrap();
		node
	}

	#[test]
	fn expansion_with_override_replaces_inner_params() {
		let catalog = catalog();
		let mut ids = IdGenerator::from_seed(7);
		let (definition, add_id, add_a, add_out) = add_definition(&catalog, &mut ids);

		let mut params = SubgraphParams::new(definition);
		params.inputs.push(IoBinding::new("a", add_id.clone(), add_a));
		params.outputs.push(IoBinding::new("out", add_id.clone(), add_out));
		params.overrides.insert(add_id, JsonObject::from_iter([("b".to_string(), json!(100.))]));
		let instance = instance_node(&params, &mut ids);

		let outer_inputs = HashMap::from([("a".to_string(), json!(5.))]);
		let outputs = evaluate_subgraph(&instance, &outer_inputs, &catalog).unwrap();
		assert_eq!(outputs.get("out"), Some(&json!(105.)));
	}

	#[test]
	fn unfed_exposed_input_falls_back_to_inner_value() {
		let catalog = catalog();
		let mut ids = IdGenerator::from_seed(8);
		let (definition, add_id, add_a, add_out) = add_definition(&catalog, &mut ids);

		let mut params = SubgraphParams::new(definition);
		params.inputs.push(IoBinding::new("a", add_id.clone(), add_a));
		params.outputs.push(IoBinding::new("out", add_id, add_out));
		let instance = instance_node(&params, &mut ids);

		// Inner `a` keeps its schema default (0) and `b` its edited value (1).
		let outputs = evaluate_subgraph(&instance, &HashMap::new(), &catalog).unwrap();
		assert_eq!(outputs.get("out"), Some(&json!(1.)));
	}

	#[test]
	fn promoted_parameter_overrides_inner_field() {
		let catalog = catalog();
		let mut ids = IdGenerator::from_seed(9);
		let (definition, add_id, add_a, add_out) = add_definition(&catalog, &mut ids);

		let mut params = SubgraphParams::new(definition);
		params.inputs.push(IoBinding::new("a", add_id.clone(), add_a));
		params.outputs.push(IoBinding::new("out", add_id.clone(), add_out));
		params.promoted_params.push(PromotedParam {
			key: "b".to_string(),
			node_id: add_id,
			field_id: "b".to_string(),
		});
		let instance = instance_node(&params, &mut ids);

		let outer_inputs = HashMap::from([("a".to_string(), json!(5.)), ("b".to_string(), json!(30.))]);
		let outputs = evaluate_subgraph(&instance, &outer_inputs, &catalog).unwrap();
		assert_eq!(outputs.get("out"), Some(&json!(35.)));

		// Without an outer value the inner field's own value applies.
		let outer_inputs = HashMap::from([("a".to_string(), json!(5.))]);
		let outputs = evaluate_subgraph(&instance, &outer_inputs, &catalog).unwrap();
		assert_eq!(outputs.get("out"), Some(&json!(6.)));
	}

	#[test]
	fn interface_proxies_route_values() {
		let catalog = catalog();
		let mut ids = IdGenerator::from_seed(10);
		let mut graph = Graph::new(GraphId::new("graph-proxied"), "Proxied");

		let (mut gin, gin_sockets) = catalog.instantiate("graph-input", &graph, &mut ids, DVec2::ZERO).unwrap();
		gin.params.insert("value".to_string(), json!(4.));
		let gin_id = gin.id.clone();
		let gin_out = gin.outputs[0].clone();
		graph.insert_node(gin, gin_sockets).unwrap();

		let (mut add, add_sockets) = catalog.instantiate("add", &graph, &mut ids, DVec2::ZERO).unwrap();
		add.params.insert("b".to_string(), json!(2.));
		let add_a = add.inputs[0].clone();
		let add_out = add.outputs[0].clone();
		graph.insert_node(add, add_sockets).unwrap();

		let (gout, gout_sockets) = catalog.instantiate("graph-output", &graph, &mut ids, DVec2::ZERO).unwrap();
		let gout_id = gout.id.clone();
		let gout_value = gout.inputs[0].clone();
		graph.insert_node(gout, gout_sockets).unwrap();

		graph.insert_wire(Wire::new(WireId::new("wire-in"), gin_out.clone(), add_a)).unwrap();
		graph.insert_wire(Wire::new(WireId::new("wire-out"), add_out, gout_value.clone())).unwrap();

		let mut params = SubgraphParams::new(graph.to_document());
		params.inputs.push(IoBinding::new("in", gin_id, gin_out));
		params.outputs.push(IoBinding::new("result", gout_id, gout_value));
		let instance = instance_node(&params, &mut ids);

		// Injected: overrides the proxy's own value.
		let outputs = evaluate_subgraph(&instance, &HashMap::from([("in".to_string(), json!(7.))]), &catalog).unwrap();
		assert_eq!(outputs.get("result"), Some(&json!(9.)));

		// Unfed: the proxy's stored value flows instead.
		let outputs = evaluate_subgraph(&instance, &HashMap::new(), &catalog).unwrap();
		assert_eq!(outputs.get("result"), Some(&json!(6.)));
	}

	#[test]
	fn nesting_depth_is_bounded() {
		let catalog = catalog();
		let mut ids = IdGenerator::from_seed(11);

		// Innermost definition: a constant.
		let mut graph = Graph::new(GraphId::new(ids.unique("graph", |_| false).unwrap()), "Leaf");
		let (mut constant, sockets) = catalog.instantiate("const-float", &graph, &mut ids, DVec2::ZERO).unwrap();
		constant.params.insert("value".to_string(), json!(42.));
		let const_id = constant.id.clone();
		let const_out = constant.outputs[0].clone();
		graph.insert_node(constant, sockets).unwrap();
		let mut params = SubgraphParams::new(graph.to_document());
		params.outputs.push(IoBinding::new("out", const_id, const_out));

		// Wrap repeatedly: each layer embeds the previous instance.
		let wrap = |params: &SubgraphParams, ids: &mut IdGenerator| -> SubgraphParams {
			let mut graph = Graph::new(GraphId::new(ids.unique("graph", |_| false).unwrap()), "Wrapper");
			let mut instance = instance_node(params, ids);
			let out_socket = SocketId::new(ids.unique("socket", |_| false).unwrap());
			instance.outputs = vec![out_socket.clone()];
			let socket = Socket::output(out_socket.clone(), instance.id.clone(), "out", DataType::Float);
			let instance_id = instance.id.clone();
			graph.insert_node(instance, vec![socket]).unwrap();
			let mut wrapped = SubgraphParams::new(graph.to_document());
			wrapped.outputs.push(IoBinding::new("out", instance_id, out_socket));
			wrapped
		};

		// Depth MAX_SUBGRAPH_DEPTH evaluates fine.
		let mut nested = params.clone();
		for _ in 0..MAX_SUBGRAPH_DEPTH - 1 {
			nested = wrap(&nested, &mut ids);
		}
		let instance = instance_node(&nested, &mut ids);
		let outputs = evaluate_subgraph(&instance, &HashMap::new(), &catalog).unwrap();
		assert_eq!(outputs.get("out"), Some(&json!(42.)));

		// One more level breaches the limit.
		let too_deep = wrap(&nested, &mut ids);
		let instance = instance_node(&too_deep, &mut ids);
		let error = evaluate_subgraph(&instance, &HashMap::new(), &catalog).unwrap_err();
		assert!(matches!(error, RuntimeError::NodeComputeFailed { .. }));
		assert!(error.to_string().contains("nesting"));
	}
}
