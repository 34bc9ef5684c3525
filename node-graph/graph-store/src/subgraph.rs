//! The recognized shape of a `subgraph` node's params object: the embedded definition
//! document, the ordered io binding tables, promoted parameter fields, and per-instance
//! overrides. Any other key in the params object is an ordinary user value (for example the
//! edited value of an unwired instance input) and is left untouched.

use crate::document::GraphDocument;
use crate::error::DocumentError;
use crate::id::{NodeId, SocketId};
use crate::value::JsonObject;
use serde_json::Value;
use std::collections::HashMap;

/// Maximum nesting depth of subgraph definitions. Navigation, collapse and evaluation all
/// refuse to go deeper.
pub const MAX_SUBGRAPH_DEPTH: usize = 8;

pub const GRAPH_KEY: &str = "graph";
pub const INPUTS_KEY: &str = "inputs";
pub const OUTPUTS_KEY: &str = "outputs";
pub const PROMOTED_PARAMS_KEY: &str = "promotedParams";
pub const OVERRIDES_KEY: &str = "overrides";

/// One entry of an instance's ordered io mapping: the outer socket name and the socket inside
/// the definition it binds to.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IoBinding {
	pub name: String,
	pub node_id: NodeId,
	pub socket_id: SocketId,
}

impl IoBinding {
	pub fn new(name: impl Into<String>, node_id: NodeId, socket_id: SocketId) -> Self {
		Self { name: name.into(), node_id, socket_id }
	}
}

/// An inner node's parameter field surfaced as an extra input socket on the instance.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotedParam {
	pub key: String,
	pub node_id: NodeId,
	pub field_id: String,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphParams {
	pub graph: GraphDocument,
	#[serde(default)]
	pub inputs: Vec<IoBinding>,
	#[serde(default)]
	pub outputs: Vec<IoBinding>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub promoted_params: Vec<PromotedParam>,
	#[serde(default, skip_serializing_if = "HashMap::is_empty")]
	pub overrides: HashMap<NodeId, JsonObject>,
}

impl SubgraphParams {
	pub fn new(graph: GraphDocument) -> Self {
		Self {
			graph,
			inputs: Vec::new(),
			outputs: Vec::new(),
			promoted_params: Vec::new(),
			overrides: HashMap::new(),
		}
	}

	/// Read the recognized fields out of a node's params object, ignoring user keys.
	pub fn from_params(params: &JsonObject) -> Result<Self, DocumentError> {
		Ok(serde_json::from_value(Value::Object(params.clone()))?)
	}

	/// Encode back into a params object holding exactly the recognized fields.
	pub fn to_params(&self) -> Result<JsonObject, DocumentError> {
		match serde_json::to_value(self)? {
			Value::Object(object) => Ok(object),
			_ => Err(DocumentError::SchemaViolation {
				reason: "subgraph params did not encode to an object".to_string(),
			}),
		}
	}

	pub fn promoted(&self, key: &str) -> Option<&PromotedParam> {
		self.promoted_params.iter().find(|promoted| promoted.key == key)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::id::GraphId;
	use serde_json::json;

	#[test]
	fn params_round_trip() {
		let mut params = SubgraphParams::new(GraphDocument::new(GraphId::new("graph-inner"), "Inner"));
		params.inputs.push(IoBinding::new("a", NodeId::new("node-add"), SocketId::new("socket-add-a")));
		params.outputs.push(IoBinding::new("out", NodeId::new("node-add"), SocketId::new("socket-add-out")));
		params.promoted_params.push(PromotedParam {
			key: "b".to_string(),
			node_id: NodeId::new("node-add"),
			field_id: "b".to_string(),
		});
		params.overrides.insert(NodeId::new("node-add"), JsonObject::from_iter([("b".to_string(), json!(100.))]));

		let encoded = params.to_params().unwrap();
		assert!(encoded.contains_key(GRAPH_KEY) && encoded.contains_key(PROMOTED_PARAMS_KEY) && encoded.contains_key(OVERRIDES_KEY));
		assert_eq!(SubgraphParams::from_params(&encoded).unwrap(), params);
	}

	#[test]
	fn user_keys_are_ignored_by_the_parser() {
		let mut params = SubgraphParams::new(GraphDocument::new(GraphId::new("graph-inner"), "Inner")).to_params().unwrap();
		params.insert("a".to_string(), json!(5.));
		let parsed = SubgraphParams::from_params(&params).unwrap();
		assert!(parsed.inputs.is_empty());
	}
}
