use crate::catalog::ParamKind;
use crate::data_type::DataType;
use crate::id::{FrameId, NodeId, SocketId, WireId};

/// Rejection of a command or store mutation. The store is left untouched whenever one of
/// these is returned.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ValidationError {
	#[error("id `{id}` is already in use")]
	IdCollision { id: String },
	#[error("unknown node `{0}`")]
	UnknownNode(NodeId),
	#[error("unknown socket `{0}`")]
	UnknownSocket(SocketId),
	#[error("unknown wire `{0}`")]
	UnknownWire(WireId),
	#[error("unknown frame `{0}`")]
	UnknownFrame(FrameId),
	#[error("unknown node type `{0}`")]
	UnknownNodeType(String),
	#[error("socket `{socket}` does not belong to node `{node}`")]
	ForeignSocket { node: NodeId, socket: SocketId },
	#[error("socket on node `{node}` has an empty name")]
	EmptySocketName { node: NodeId },
	#[error("node `{node}` already has a socket named `{name}` in that direction")]
	DuplicateSocketName { node: NodeId, name: String },
	#[error("a wire must run from an output socket to an input socket")]
	WireDirection { from: SocketId, to: SocketId },
	#[error("node `{0}` cannot be wired to itself")]
	SelfConnection(NodeId),
	#[error("input socket `{0}` already has an incoming wire")]
	InputOccupied(SocketId),
	#[error("an output of type `{from}` cannot feed an input of type `{to}`")]
	TypeMismatch { from: DataType, to: DataType },
	#[error("a wire from node `{from}` to node `{to}` would create a cycle")]
	CyclicDependency { from: NodeId, to: NodeId },
	#[error("node `{0}` is not a subgraph")]
	NotASubgraph(NodeId),
	#[error("node `{node}` has no parameter field `{field}`")]
	UnknownParamField { node: NodeId, field: String },
	#[error("parameter `{key}` of kind `{kind:?}` cannot be promoted to a socket")]
	UnpromotableParameter { key: String, kind: ParamKind },
	#[error("subgraph nesting is limited to {limit} levels")]
	SubgraphDepthExceeded { limit: usize },
	#[error("command precondition failed: {reason}")]
	PreconditionFailed { reason: String },
	#[error("a command batch is already in progress")]
	BatchInProgress,
	#[error("no command batch is in progress")]
	NoBatchInProgress,
	#[error(transparent)]
	Internal(#[from] InternalError),
}

/// Failure to read or migrate a persisted document. Loading aborts and the previous graph
/// is retained by the caller.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
	#[error("failed to parse document: {0}")]
	Parse(#[from] serde_json::Error),
	#[error("document version {found} is newer than the supported version {newest}")]
	UnsupportedVersion { found: u32, newest: u32 },
	#[error("document violates the schema: {reason}")]
	SchemaViolation { reason: String },
}

/// Conditions after which the editor store must be treated as poisoned and reloaded.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InternalError {
	#[error("gave up generating a unique id after {retries} attempts")]
	IdGenerationExhausted { retries: u32 },
}
