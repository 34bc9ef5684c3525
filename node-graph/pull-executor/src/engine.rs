use crate::dirty::DirtyState;
use crate::error::RuntimeError;
use crate::expansion;
use graph_store::catalog::{ComputeError, NodeCatalog, SUBGRAPH_NODE_TYPE};
use graph_store::data_type::DataType;
use graph_store::error::ValidationError;
use graph_store::graph::{Direction, Graph, Node, Socket};
use graph_store::id::{NodeId, SocketId};
use graph_store::value;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EvaluationProgress {
	pub completed: usize,
	pub total: usize,
}

/// The outcome of driving the evaluation state machine one step. The host keeps calling
/// [`GraphExecutor::step`] while it receives `InProgress`, which yields between node computes
/// so cancellation and queued commands are observed promptly.
#[derive(Clone, Debug, PartialEq)]
pub enum EvaluationStatus {
	InProgress { completed: usize, total: usize },
	Done(Value),
	Failed(RuntimeError),
	Canceled,
}

/// One planned evaluation: the transitive dependencies of the active output in topological
/// order, plus the bookkeeping accumulated while stepping through them.
#[derive(Debug)]
struct EvaluationRun {
	target_node: NodeId,
	target_socket_name: String,
	schedule: Vec<NodeId>,
	cursor: usize,
	completed: usize,
	total: usize,
	/// Nodes that failed (or sit downstream of a failure) in this run; they produce no values.
	failed: HashSet<NodeId>,
	/// The first error-severity failure, reported if the active output never gets a value.
	root_failure: Option<RuntimeError>,
}

/// Pull-based, memoized, cooperatively-cancellable evaluation of a single active output.
#[derive(Debug, Default)]
pub struct GraphExecutor {
	dirty: DirtyState,
	run: Option<EvaluationRun>,
	active_output: Option<SocketId>,
	output_value: Option<Value>,
	output_error: Option<RuntimeError>,
	progress: Option<EvaluationProgress>,
}

/// How one node's inputs resolved.
enum InputResolution {
	Ready(ResolvedInputs),
	/// A wired producer did not deliver a value; the node joins the failed set silently.
	UpstreamFailed,
	Failed(RuntimeError),
}

#[derive(Default)]
struct ResolvedInputs {
	/// Every declared input, with defaults and type zeros substituted.
	all: HashMap<String, Value>,
	/// Only the inputs that carry a real value: a wire, a user param, or a socket default.
	/// Subgraph expansion uses this so zero substitution cannot stomp inner defaults.
	explicit: HashMap<String, Value>,
	warnings: Vec<RuntimeError>,
}

impl GraphExecutor {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn dirty_state(&self) -> &DirtyState {
		&self.dirty
	}

	pub fn is_dirty(&self, node: &NodeId) -> bool {
		self.dirty.is_dirty(node)
	}

	pub fn active_output(&self) -> Option<&SocketId> {
		self.active_output.as_ref()
	}

	/// Whether a planned run is still in flight.
	pub fn is_evaluating(&self) -> bool {
		self.run.is_some()
	}

	pub fn output_value(&self) -> Option<&Value> {
		self.output_value.as_ref()
	}

	pub fn output_error(&self) -> Option<&RuntimeError> {
		self.output_error.as_ref()
	}

	pub fn output_progress(&self) -> Option<EvaluationProgress> {
		self.progress
	}

	/// Invalidate `seeds` and everything downstream, dropping bookkeeping for deleted nodes.
	pub fn mark_affected(&mut self, graph: &Graph, seeds: &[NodeId]) {
		self.dirty.mark_affected(graph, seeds);
		self.dirty.retain_existing(graph);
	}

	/// Reset for a freshly loaded graph: nothing cached, everything dirty, no active output.
	pub fn on_graph_loaded(&mut self, graph: &Graph) {
		self.dirty.mark_all(graph);
		self.run = None;
		self.active_output = None;
		self.output_value = None;
		self.output_error = None;
		self.progress = None;
	}

	/// Designate `socket` as the active output and plan a fresh run for it. A run already in
	/// flight is abandoned; the new plan starts from the current dirty set.
	pub fn request_output(&mut self, graph: &Graph, socket: SocketId) -> Result<(), ValidationError> {
		let target = graph.socket(&socket).ok_or_else(|| ValidationError::UnknownSocket(socket.clone()))?;
		if target.direction != Direction::Output {
			return Err(ValidationError::PreconditionFailed {
				reason: format!("socket `{socket}` is not an output"),
			});
		}
		let target_node = target.node.clone();
		let target_socket_name = target.name.clone();

		self.run = None;
		self.output_value = None;
		self.output_error = None;
		self.active_output = Some(socket);

		match plan_schedule(graph, &target_node) {
			Ok(schedule) => {
				let total = schedule.len();
				self.progress = Some(EvaluationProgress { completed: 0, total });
				self.run = Some(EvaluationRun {
					target_node,
					target_socket_name,
					schedule,
					cursor: 0,
					completed: 0,
					total,
					failed: HashSet::new(),
					root_failure: None,
				});
			}
			Err(error) => {
				self.dirty.record_error(target_node, error.clone());
				self.output_error = Some(error);
				self.progress = None;
			}
		}
		Ok(())
	}

	/// Abandon the active output entirely.
	pub fn clear_output(&mut self) {
		self.run = None;
		self.active_output = None;
		self.output_value = None;
		self.output_error = None;
		self.progress = None;
	}

	/// Cooperatively cancel the run in flight. Values cached by already-completed steps are
	/// kept; nothing is written for the node that would have run next.
	pub fn cancel_evaluation(&mut self) {
		if self.run.take().is_some() {
			self.output_error = Some(RuntimeError::ExecutionCanceled);
			self.output_value = None;
			self.progress = None;
		}
	}

	/// Re-plan the currently active output, typically after undo/redo or a document load.
	pub fn refresh_active_output(&mut self, graph: &Graph) -> Result<(), ValidationError> {
		match self.active_output.clone() {
			Some(socket) => self.request_output(graph, socket),
			None => Ok(()),
		}
	}

	/// Drive the state machine: evaluate at most one node, then yield. Memoized nodes are
	/// skipped without recompute. With no run in flight, the last terminal state is reported
	/// (an idle engine reads as `Canceled`).
	pub fn step(&mut self, graph: &Graph, catalog: &NodeCatalog, bypassed: &HashSet<NodeId>) -> EvaluationStatus {
		let Some(mut run) = self.run.take() else {
			if let Some(error) = &self.output_error {
				return match error {
					RuntimeError::ExecutionCanceled => EvaluationStatus::Canceled,
					error => EvaluationStatus::Failed(error.clone()),
				};
			}
			if let Some(value) = &self.output_value {
				return EvaluationStatus::Done(value.clone());
			}
			return EvaluationStatus::Canceled;
		};

		let status = self.step_run(&mut run, graph, catalog, bypassed);
		if matches!(status, EvaluationStatus::InProgress { .. }) {
			self.run = Some(run);
		}
		status
	}

	fn step_run(&mut self, run: &mut EvaluationRun, graph: &Graph, catalog: &NodeCatalog, bypassed: &HashSet<NodeId>) -> EvaluationStatus {
		loop {
			if run.cursor >= run.schedule.len() {
				return self.finish_run(run);
			}
			let node_id = run.schedule[run.cursor].clone();
			run.cursor += 1;

			// Memoized: clean and cached means the value is exactly what a fresh evaluation
			// would produce, so it is counted as completed without recompute.
			if !self.dirty.is_dirty(&node_id) && self.dirty.cached_outputs(&node_id).is_some() {
				run.completed += 1;
				self.update_progress(run);
				continue;
			}

			let Some(node) = graph.node(&node_id) else {
				// The graph changed under a stale schedule; the host re-requests after edits,
				// so just treat the vanished node as failed for this run.
				run.failed.insert(node_id);
				run.completed += 1;
				self.update_progress(run);
				continue;
			};

			let resolution = self.resolve_inputs(graph, node, run);
			let inputs = match resolution {
				InputResolution::Ready(inputs) => inputs,
				InputResolution::UpstreamFailed => {
					run.failed.insert(node_id);
					run.completed += 1;
					self.update_progress(run);
					continue;
				}
				InputResolution::Failed(error) => {
					self.dirty.record_error(node_id.clone(), error.clone());
					run.failed.insert(node_id);
					run.root_failure.get_or_insert(error);
					run.completed += 1;
					self.update_progress(run);
					return EvaluationStatus::InProgress { completed: run.completed, total: run.total };
				}
			};

			for warning in &inputs.warnings {
				self.dirty.record_error(node_id.clone(), warning.clone());
			}

			let started = Instant::now();
			let result = if bypassed.contains(&node_id) {
				Ok(bypass_outputs(graph, node, &inputs.all))
			} else if node.node_type == SUBGRAPH_NODE_TYPE {
				expansion::evaluate_subgraph(node, &inputs.explicit, catalog)
			} else {
				match catalog.get(&node.node_type) {
					Some(definition) => (definition.compute)(&node.params, &inputs.all).map_err(|cause| RuntimeError::NodeComputeFailed {
						node_id: node_id.clone(),
						node_type: node.node_type.clone(),
						cause,
					}),
					None => Err(RuntimeError::NodeComputeFailed {
						node_id: node_id.clone(),
						node_type: node.node_type.clone(),
						cause: ComputeError::new("node type is not in the catalog"),
					}),
				}
			};

			match result {
				Ok(outputs) => {
					self.dirty.store_result(node_id, outputs, started.elapsed());
					run.completed += 1;
					self.update_progress(run);
					return EvaluationStatus::InProgress { completed: run.completed, total: run.total };
				}
				Err(error) => {
					self.dirty.record_error(node_id.clone(), error.clone());
					run.failed.insert(node_id);
					run.root_failure.get_or_insert(error);
					run.completed += 1;
					self.update_progress(run);
					return EvaluationStatus::InProgress { completed: run.completed, total: run.total };
				}
			}
		}
	}

	fn update_progress(&mut self, run: &EvaluationRun) {
		self.progress = Some(EvaluationProgress { completed: run.completed, total: run.total });
	}

	fn finish_run(&mut self, run: &EvaluationRun) -> EvaluationStatus {
		self.progress = Some(EvaluationProgress { completed: run.total, total: run.total });

		let value = self.dirty.cached_outputs(&run.target_node).and_then(|outputs| outputs.get(&run.target_socket_name));
		if let Some(value) = value {
			self.output_value = Some(value.clone());
			self.output_error = None;
			return EvaluationStatus::Done(value.clone());
		}

		let error = run.root_failure.clone().unwrap_or_else(|| RuntimeError::NodeComputeFailed {
			node_id: run.target_node.clone(),
			node_type: "unknown".to_string(),
			cause: ComputeError::new(format!("no value was produced for output `{}`", run.target_socket_name)),
		});
		self.output_error = Some(error.clone());
		self.output_value = None;
		EvaluationStatus::Failed(error)
	}

	fn resolve_inputs(&self, graph: &Graph, node: &Node, run: &EvaluationRun) -> InputResolution {
		let mut resolved = ResolvedInputs::default();
		for socket_id in &node.inputs {
			let Some(socket) = graph.socket(socket_id) else { continue };

			if let Some(wire) = graph.wire_into(socket_id) {
				let Some(from_socket) = graph.socket(&wire.from) else {
					return InputResolution::UpstreamFailed;
				};
				if run.failed.contains(&from_socket.node) {
					return InputResolution::UpstreamFailed;
				}
				let Some(value) = self.dirty.cached_outputs(&from_socket.node).and_then(|outputs| outputs.get(&from_socket.name)) else {
					return InputResolution::UpstreamFailed;
				};
				let carried = DataType::carried(from_socket.data_type, socket.data_type);
				match value::convert(value, carried) {
					Ok(value) => {
						resolved.all.insert(socket.name.clone(), value.clone());
						resolved.explicit.insert(socket.name.clone(), value);
					}
					Err(error) => {
						return InputResolution::Failed(RuntimeError::NodeComputeFailed {
							node_id: node.id.clone(),
							node_type: node.node_type.clone(),
							cause: error.into(),
						});
					}
				}
				continue;
			}

			// Unwired: the user-edited param value wins, then the socket default, then the
			// socket type's zero (with a warning when the socket is required).
			let source = node.params.get(&socket.name).or(socket.default_value.as_ref());
			match source {
				Some(value) => match value::convert(value, socket.data_type) {
					Ok(value) => {
						resolved.all.insert(socket.name.clone(), value.clone());
						resolved.explicit.insert(socket.name.clone(), value);
					}
					Err(error) => {
						return InputResolution::Failed(RuntimeError::NodeComputeFailed {
							node_id: node.id.clone(),
							node_type: node.node_type.clone(),
							cause: error.into(),
						});
					}
				},
				None => {
					if socket.required {
						resolved.warnings.push(RuntimeError::MissingRequiredInput {
							node_id: node.id.clone(),
							socket_id: socket.id.clone(),
							socket_name: socket.name.clone(),
						});
					}
					resolved.all.insert(socket.name.clone(), value::zero_value(socket.data_type));
				}
			}
		}
		InputResolution::Ready(resolved)
	}
}

/// A bypassed node forwards inputs instead of computing: each output takes the same-named
/// compatible input if there is one, otherwise the first compatible input in declaration
/// order, otherwise its type's zero value.
fn bypass_outputs(graph: &Graph, node: &Node, inputs: &HashMap<String, Value>) -> HashMap<String, Value> {
	let input_sockets: Vec<&Socket> = node.inputs.iter().filter_map(|id| graph.socket(id)).collect();
	let mut outputs = HashMap::new();
	for output_id in &node.outputs {
		let Some(output) = graph.socket(output_id) else { continue };
		let chosen = input_sockets
			.iter()
			.find(|input| input.name == output.name && DataType::compatible(input.data_type, output.data_type))
			.or_else(|| input_sockets.iter().find(|input| DataType::compatible(input.data_type, output.data_type)));
		let value = chosen
			.and_then(|input| inputs.get(&input.name).map(|value| (input, value)))
			.and_then(|(input, value)| value::convert(value, DataType::carried(input.data_type, output.data_type)).ok())
			.unwrap_or_else(|| value::zero_value(output.data_type));
		outputs.insert(output.name.clone(), value);
	}
	outputs
}

/// Walk upstream from the target node and return its transitive dependencies in topological
/// order (dependencies first, target last). A visiting stack catches cycles, which are fatal
/// to the run.
fn plan_schedule(graph: &Graph, target: &NodeId) -> Result<Vec<NodeId>, RuntimeError> {
	fn visit(graph: &Graph, node_id: &NodeId, visiting: &mut Vec<NodeId>, visited: &mut HashSet<NodeId>, order: &mut Vec<NodeId>) -> Result<(), RuntimeError> {
		if visited.contains(node_id) {
			return Ok(());
		}
		if let Some(position) = visiting.iter().position(|visiting_id| visiting_id == node_id) {
			return Err(RuntimeError::CyclicDependency {
				node_id: node_id.clone(),
				cycle: visiting[position..].to_vec(),
			});
		}
		visiting.push(node_id.clone());
		if let Some(node) = graph.node(node_id) {
			for input in &node.inputs {
				if let Some(wire) = graph.wire_into(input) {
					if let Some(producer) = graph.socket(&wire.from) {
						visit(graph, &producer.node, visiting, visited, order)?;
					}
				}
			}
		}
		visiting.pop();
		visited.insert(node_id.clone());
		order.push(node_id.clone());
		Ok(())
	}

	let mut order = Vec::new();
	visit(graph, target, &mut Vec::new(), &mut HashSet::new(), &mut order)?;
	Ok(order)
}
