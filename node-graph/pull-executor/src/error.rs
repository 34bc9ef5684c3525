use graph_store::catalog::ComputeError;
use graph_store::id::{NodeId, SocketId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
	Warning,
	Error,
}

/// Errors produced while evaluating, accumulated per node in the dirty state. Warnings leave
/// the run producing values; errors stop everything downstream of the failing node.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RuntimeError {
	#[error("node `{node_id}` is missing its required input `{socket_name}`")]
	MissingRequiredInput { node_id: NodeId, socket_id: SocketId, socket_name: String },
	#[error("node `{node_id}` ({node_type}) failed to compute: {cause}")]
	NodeComputeFailed { node_id: NodeId, node_type: String, cause: ComputeError },
	#[error("cyclic dependency while evaluating node `{node_id}`")]
	CyclicDependency { node_id: NodeId, cycle: Vec<NodeId> },
	#[error("canceled")]
	ExecutionCanceled,
}

impl RuntimeError {
	pub fn severity(&self) -> Severity {
		match self {
			RuntimeError::MissingRequiredInput { .. } => Severity::Warning,
			RuntimeError::NodeComputeFailed { .. } => Severity::Error,
			RuntimeError::CyclicDependency { .. } => Severity::Error,
			// Cancellation is a first-class outcome, not a failure.
			RuntimeError::ExecutionCanceled => Severity::Warning,
		}
	}
}
