use crate::commands::{CommandHistory, GraphCommand, NodeIo};
use crate::consts::DEFAULT_GRAPH_NAME;
use crate::events::{EditorEvent, EmitEvents};
use crate::subgraph::navigation::{Breadcrumb, NavigationStack};
use crate::subgraph::sync;
use crate::ui_state::UiState;
use glam::DVec2;
use graph_store::catalog::{NodeCatalog, SUBGRAPH_NODE_TYPE};
use graph_store::document::GraphDocument;
use graph_store::error::{DocumentError, ValidationError};
use graph_store::graph::{Frame, Graph, Socket, SocketMetadata, Wire};
use graph_store::id::{FrameId, GraphId, IdGenerator, NodeId, SocketId, WireId};
use graph_store::subgraph::{self as subgraph_keys, IoBinding, MAX_SUBGRAPH_DEPTH, PromotedParam, SubgraphParams};
use graph_store::value::JsonObject;
use pull_executor::dirty::DirtyState;
use pull_executor::engine::{EvaluationProgress, EvaluationStatus, GraphExecutor};
use pull_executor::error::RuntimeError;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};

/// The editor store: the single owner of the graph, the command history, the execution
/// engine and the UI state. All mutation flows through it; the shell reads snapshots through
/// the observer methods and reacts to [`EditorEvent`]s drained from the queue.
///
/// An `Editor` is an ordinary value. Hosts that want several independent documents open (or
/// tests that want isolation) simply construct several.
#[derive(Debug)]
pub struct Editor {
	graph: Graph,
	catalog: NodeCatalog,
	history: CommandHistory,
	executor: GraphExecutor,
	ui_state: UiState,
	navigation: NavigationStack,
	id_generator: IdGenerator,
	events: VecDeque<EditorEvent>,
}

impl Editor {
	/// Construct an editor with a clock-derived id seed. Prefer [`Editor::with_seed`] anywhere
	/// reproducible documents matter.
	pub fn new() -> Self {
		Self::build(IdGenerator::new())
	}

	pub fn with_seed(seed: u64) -> Self {
		Self::build(IdGenerator::from_seed(seed))
	}

	fn build(mut id_generator: IdGenerator) -> Self {
		let graph_id = id_generator.unique("graph", |_| false).map(GraphId::new).unwrap_or_else(|_| GraphId::new("graph-root"));
		Self {
			graph: Graph::new(graph_id, DEFAULT_GRAPH_NAME),
			catalog: NodeCatalog::with_builtins(),
			history: CommandHistory::new(),
			executor: GraphExecutor::new(),
			ui_state: UiState::new(),
			navigation: NavigationStack::new(),
			id_generator,
			events: VecDeque::new(),
		}
	}

	// Observers. Each returns the current snapshot; the shell re-reads after draining events.

	pub fn graph(&self) -> &Graph {
		&self.graph
	}

	pub fn catalog(&self) -> &NodeCatalog {
		&self.catalog
	}

	/// Hosts register their node types here before building documents with them.
	pub fn catalog_mut(&mut self) -> &mut NodeCatalog {
		&mut self.catalog
	}

	pub fn dirty_state(&self) -> &DirtyState {
		self.executor.dirty_state()
	}

	pub fn is_dirty(&self, node: &NodeId) -> bool {
		self.executor.is_dirty(node)
	}

	pub fn output_value(&self) -> Option<&Value> {
		self.executor.output_value()
	}

	pub fn output_error(&self) -> Option<&RuntimeError> {
		self.executor.output_error()
	}

	pub fn output_progress(&self) -> Option<EvaluationProgress> {
		self.executor.output_progress()
	}

	pub fn active_output(&self) -> Option<&SocketId> {
		self.executor.active_output()
	}

	pub fn is_evaluating(&self) -> bool {
		self.executor.is_evaluating()
	}

	pub fn can_undo(&self) -> bool {
		self.history.can_undo()
	}

	pub fn can_redo(&self) -> bool {
		self.history.can_redo()
	}

	pub fn undo_label(&self) -> Option<&str> {
		self.history.undo_label()
	}

	pub fn redo_label(&self) -> Option<&str> {
		self.history.redo_label()
	}

	pub fn selected_nodes(&self) -> &HashSet<NodeId> {
		self.ui_state.selected_nodes()
	}

	pub fn selected_frames(&self) -> &HashSet<FrameId> {
		self.ui_state.selected_frames()
	}

	pub fn selected_wires(&self) -> &HashSet<WireId> {
		self.ui_state.selected_wires()
	}

	pub fn bypassed_nodes(&self) -> &HashSet<NodeId> {
		self.ui_state.bypassed_nodes()
	}

	pub fn collapsed_nodes(&self) -> &HashSet<NodeId> {
		self.ui_state.collapsed_nodes()
	}

	pub fn canvas_center(&self) -> DVec2 {
		self.ui_state.canvas_center()
	}

	pub fn graph_path(&self) -> Vec<Breadcrumb> {
		self.navigation.breadcrumbs()
	}

	pub fn ui_state(&self) -> &UiState {
		&self.ui_state
	}

	pub fn drain_events(&mut self) -> Vec<EditorEvent> {
		self.events.drain(..).collect()
	}

	fn history_event(&self) -> EditorEvent {
		EditorEvent::HistoryChanged {
			can_undo: self.history.can_undo(),
			can_redo: self.history.can_redo(),
		}
	}

	// The command/batch lifecycle. Dirty propagation runs inside every application, before
	// control returns to the caller.

	pub fn begin_batch(&mut self, label: impl Into<String>) -> Result<(), ValidationError> {
		self.history.begin_batch(label)
	}

	fn apply_to_graph(&mut self, command: &GraphCommand) -> Result<(), ValidationError> {
		command.apply(&mut self.graph)?;
		let seeds = command.affected_nodes(&self.graph);
		self.executor.mark_affected(&self.graph, &seeds);
		Ok(())
	}

	/// Apply a command and record it in the in-progress batch.
	pub fn record_command(&mut self, command: GraphCommand) -> Result<(), ValidationError> {
		if !self.history.batch_in_progress() {
			return Err(ValidationError::NoBatchInProgress);
		}
		self.apply_to_graph(&command)?;
		self.history.note_recorded(command)
	}

	/// Apply a command without recording it: the intermediate state of a drag or another
	/// multi-step interaction. Rolled back if the batch aborts; replaced by the recorded final
	/// command otherwise.
	pub fn apply_transient(&mut self, command: GraphCommand) -> Result<(), ValidationError> {
		if !self.history.batch_in_progress() {
			return Err(ValidationError::NoBatchInProgress);
		}
		self.apply_to_graph(&command)?;
		self.history.note_transient(command)
	}

	pub fn commit_batch(&mut self) -> Result<(), ValidationError> {
		let committed = self.history.commit_batch()?;
		if committed {
			self.events.add(EditorEvent::GraphChanged);
			let event = self.history_event();
			self.events.add(event);
		}
		Ok(())
	}

	/// Discard the in-progress batch, rolling back everything it applied (recorded and
	/// transient alike) in reverse order.
	pub fn abort_batch(&mut self) -> Result<(), ValidationError> {
		let applied = self.history.abort_batch()?;
		for command in applied.iter().rev() {
			if let Err(error) = command.invert(&mut self.graph) {
				log::error!("Failed to roll back a command while aborting a batch: {error}");
			}
			let seeds = command.affected_nodes(&self.graph);
			self.executor.mark_affected(&self.graph, &seeds);
		}
		self.events.add(EditorEvent::GraphChanged);
		Ok(())
	}

	/// Apply a list of commands as one atomic batch: all land, or none do.
	pub fn apply_batch(&mut self, label: impl Into<String>, commands: Vec<GraphCommand>) -> Result<(), ValidationError> {
		self.begin_batch(label)?;
		for command in commands {
			if let Err(error) = self.record_command(command) {
				self.abort_batch()?;
				return Err(error);
			}
		}
		self.commit_batch()
	}

	pub fn undo(&mut self) -> Result<bool, ValidationError> {
		if self.history.batch_in_progress() {
			return Err(ValidationError::BatchInProgress);
		}
		let Some(batch) = self.history.pop_undo() else { return Ok(false) };
		for command in batch.commands.iter().rev() {
			command.invert(&mut self.graph)?;
			let seeds = command.affected_nodes(&self.graph);
			self.executor.mark_affected(&self.graph, &seeds);
		}
		self.history.push_redo(batch);
		self.after_history_jump()?;
		Ok(true)
	}

	pub fn redo(&mut self) -> Result<bool, ValidationError> {
		if self.history.batch_in_progress() {
			return Err(ValidationError::BatchInProgress);
		}
		let Some(batch) = self.history.pop_redo() else { return Ok(false) };
		for command in &batch.commands {
			command.apply(&mut self.graph)?;
			let seeds = command.affected_nodes(&self.graph);
			self.executor.mark_affected(&self.graph, &seeds);
		}
		self.history.push_undo(batch);
		self.after_history_jump()?;
		Ok(true)
	}

	fn after_history_jump(&mut self) -> Result<(), ValidationError> {
		self.ui_state.retain_existing(&self.graph);
		self.executor.refresh_active_output(&self.graph)?;
		self.events.add(EditorEvent::GraphChanged);
		let event = self.history_event();
		self.events.add(event);
		self.events.add(EditorEvent::RefreshActiveOutput);
		Ok(())
	}

	// Evaluation: the engine is a state machine the host drives with `poll_evaluation`.

	pub fn request_output(&mut self, socket: SocketId) -> Result<(), ValidationError> {
		self.executor.request_output(&self.graph, socket)
	}

	pub fn clear_output(&mut self) {
		self.executor.clear_output();
		self.events.add(EditorEvent::OutputChanged);
	}

	pub fn cancel_evaluation(&mut self) {
		self.executor.cancel_evaluation();
		self.events.add(EditorEvent::OutputChanged);
	}

	pub fn refresh_active_output(&mut self) -> Result<(), ValidationError> {
		self.executor.refresh_active_output(&self.graph)
	}

	/// Drive the evaluation one step. The host loops this on its own timer or task.
	pub fn poll_evaluation(&mut self) -> EvaluationStatus {
		let was_evaluating = self.executor.is_evaluating();
		let status = self.executor.step(&self.graph, &self.catalog, self.ui_state.bypassed_nodes());
		if was_evaluating && !self.executor.is_evaluating() {
			self.events.add(EditorEvent::OutputChanged);
		}
		status
	}

	/// Loop [`Editor::poll_evaluation`] until the run settles. Handy for hosts without their
	/// own scheduler and for tests.
	pub fn evaluate_to_completion(&mut self) -> EvaluationStatus {
		loop {
			match self.poll_evaluation() {
				EvaluationStatus::InProgress { .. } => continue,
				terminal => return terminal,
			}
		}
	}

	// Documents.

	/// Replace the whole session with a loaded document. On failure the current graph is
	/// retained untouched.
	pub fn load_document(&mut self, json: &str) -> Result<(), DocumentError> {
		let graph = GraphDocument::from_json(json)?.into_graph()?;
		self.graph = graph;
		self.history.clear();
		self.navigation.clear();
		self.executor.on_graph_loaded(&self.graph);
		self.ui_state.retain_existing(&self.graph);
		self.ui_state.note_recent_graph(self.graph.graph_id().clone());
		self.events.add(EditorEvent::GraphChanged);
		let event = self.history_event();
		self.events.add(event);
		self.events.add(EditorEvent::NavigationChanged);
		Ok(())
	}

	/// Serialize the active graph. Ascend to the root first to save the whole document tree.
	pub fn save_document(&self) -> Result<String, DocumentError> {
		self.graph.to_document().to_json()
	}

	/// Adopt independently persisted UI state, silently dropping references to entities the
	/// current graph does not contain.
	pub fn load_ui_state(&mut self, mut state: UiState) {
		state.retain_existing(&self.graph);
		self.ui_state = state;
		self.events.add(EditorEvent::SelectionChanged);
	}

	// Graph editing conveniences. Each wraps the corresponding command in a one-step batch.

	pub fn add_node(&mut self, node_type: &str, position: DVec2) -> Result<NodeId, ValidationError> {
		let (node, sockets) = self.catalog.instantiate(node_type, &self.graph, &mut self.id_generator, position)?;
		let node_id = node.id.clone();
		self.apply_batch("Add Node", vec![GraphCommand::InsertNode { node, sockets }])?;
		Ok(node_id)
	}

	pub fn delete_node(&mut self, node_id: &NodeId) -> Result<(), ValidationError> {
		let command = GraphCommand::remove_node(&self.graph, node_id)?;
		self.apply_batch("Delete Node", vec![command])
	}

	pub fn connect(&mut self, from: SocketId, to: SocketId) -> Result<WireId, ValidationError> {
		let wire_id = WireId::new(self.id_generator.unique("wire", |id| self.graph.id_in_use(id))?);
		let command = GraphCommand::InsertWire {
			wire: Wire::new(wire_id.clone(), from, to),
		};
		self.apply_batch("Connect", vec![command])?;
		Ok(wire_id)
	}

	pub fn disconnect(&mut self, wire_id: &WireId) -> Result<(), ValidationError> {
		let command = GraphCommand::remove_wire(&self.graph, wire_id)?;
		self.apply_batch("Disconnect", vec![command])
	}

	pub fn set_node_param(&mut self, node_id: &NodeId, key: &str, value: Value) -> Result<(), ValidationError> {
		let command = GraphCommand::update_node_param(&self.graph, node_id, key, Some(value))?;
		self.apply_batch("Change Parameter", vec![command])
	}

	pub fn clear_node_param(&mut self, node_id: &NodeId, key: &str) -> Result<(), ValidationError> {
		let command = GraphCommand::update_node_param(&self.graph, node_id, key, None)?;
		self.apply_batch("Clear Parameter", vec![command])
	}

	pub fn set_node_position(&mut self, node_id: &NodeId, position: DVec2) -> Result<(), ValidationError> {
		let mut after = NodeIo::capture(&self.graph, node_id)?;
		after.node.position = position;
		let command = GraphCommand::update_node_io(&self.graph, after)?;
		self.apply_batch("Move Node", vec![command])
	}

	pub fn set_socket_metadata(&mut self, socket_id: &SocketId, metadata: SocketMetadata) -> Result<(), ValidationError> {
		let node_id = self.graph.socket(socket_id).ok_or_else(|| ValidationError::UnknownSocket(socket_id.clone()))?.node.clone();
		let mut after = NodeIo::capture(&self.graph, &node_id)?;
		for socket in &mut after.sockets {
			if &socket.id == socket_id {
				socket.label = metadata.label.clone();
				socket.label_placement = metadata.label_placement;
				socket.number_format = metadata.number_format.clone();
			}
		}
		let command = GraphCommand::update_node_io(&self.graph, after)?;
		self.apply_batch("Edit Socket", vec![command])
	}

	pub fn add_frame(&mut self, title: &str) -> Result<FrameId, ValidationError> {
		let frame_id = FrameId::new(self.id_generator.unique("frame", |id| self.graph.id_in_use(id))?);
		let command = GraphCommand::InsertFrame {
			frame: Frame::new(frame_id.clone(), title),
		};
		self.apply_batch("Add Frame", vec![command])?;
		Ok(frame_id)
	}

	pub fn update_frame(&mut self, after: Frame) -> Result<(), ValidationError> {
		let command = GraphCommand::update_frame(&self.graph, after)?;
		self.apply_batch("Edit Frame", vec![command])
	}

	pub fn delete_frame(&mut self, frame_id: &FrameId) -> Result<(), ValidationError> {
		let command = GraphCommand::remove_frame(&self.graph, frame_id)?;
		self.apply_batch("Delete Frame", vec![command])
	}

	// Selection and per-node view state.

	pub fn set_node_selection(&mut self, nodes: Vec<NodeId>) {
		self.ui_state.set_node_selection(nodes.into_iter().filter(|node| self.graph.node(node).is_some()));
		self.events.add(EditorEvent::SelectionChanged);
	}

	pub fn set_frame_selection(&mut self, frames: Vec<FrameId>) {
		self.ui_state.set_frame_selection(frames.into_iter().filter(|frame| self.graph.frame(frame).is_some()));
		self.events.add(EditorEvent::SelectionChanged);
	}

	pub fn set_wire_selection(&mut self, wires: Vec<WireId>) {
		self.ui_state.set_wire_selection(wires.into_iter().filter(|wire| self.graph.wire(wire).is_some()));
		self.events.add(EditorEvent::SelectionChanged);
	}

	pub fn clear_selection(&mut self) {
		self.ui_state.clear_selection();
		self.events.add(EditorEvent::SelectionChanged);
	}

	/// Bypassing swaps a node's compute for a pass-through, so it invalidates the node like
	/// an edit would, without being one (it is view state, not history).
	pub fn toggle_bypassed(&mut self, node_id: &NodeId) -> Result<(), ValidationError> {
		if self.graph.node(node_id).is_none() {
			return Err(ValidationError::UnknownNode(node_id.clone()));
		}
		self.ui_state.toggle_bypassed(node_id);
		self.executor.mark_affected(&self.graph, std::slice::from_ref(node_id));
		self.events.add(EditorEvent::RefreshActiveOutput);
		Ok(())
	}

	/// Collapsing a subgraph node is refused past the nesting limit.
	pub fn toggle_collapsed(&mut self, node_id: &NodeId) -> Result<(), ValidationError> {
		let node = self.graph.node(node_id).ok_or_else(|| ValidationError::UnknownNode(node_id.clone()))?;
		let collapsing = !self.ui_state.collapsed_nodes().contains(node_id);
		if collapsing && node.node_type == SUBGRAPH_NODE_TYPE {
			let embedded = node.params.get(subgraph_keys::GRAPH_KEY).cloned().and_then(|value| serde_json::from_value::<GraphDocument>(value).ok());
			if let Some(embedded) = embedded {
				if self.navigation.depth() + sync::definition_depth(&embedded) > MAX_SUBGRAPH_DEPTH {
					let error = ValidationError::SubgraphDepthExceeded { limit: MAX_SUBGRAPH_DEPTH };
					self.events.add(EditorEvent::Notification { error: error.clone() });
					return Err(error);
				}
			}
		}
		self.ui_state.toggle_collapsed(node_id);
		Ok(())
	}

	pub fn set_canvas_center(&mut self, center: DVec2) {
		self.ui_state.set_canvas_center(center);
	}

	// Subgraphs: instantiation, promotion, overrides, synchronization, navigation.

	/// Place an instance of `definition`, exposing whatever its interface proxies declare.
	pub fn insert_subgraph_instance(&mut self, definition: &GraphDocument, position: DVec2) -> Result<NodeId, ValidationError> {
		let (node, sockets) = sync::build_instance(definition, &self.graph, &mut self.id_generator, position)?;
		let node_id = node.id.clone();
		self.apply_batch("Add Subgraph", vec![GraphCommand::InsertNode { node, sockets }])?;
		Ok(node_id)
	}

	/// Place an instance with explicit io bindings into the definition.
	pub fn insert_subgraph_instance_with(&mut self, definition: &GraphDocument, inputs: Vec<IoBinding>, outputs: Vec<IoBinding>, position: DVec2) -> Result<NodeId, ValidationError> {
		let (node, sockets) = sync::build_instance_with(definition, inputs, outputs, &self.graph, &mut self.id_generator, position)?;
		let node_id = node.id.clone();
		self.apply_batch("Add Subgraph", vec![GraphCommand::InsertNode { node, sockets }])?;
		Ok(node_id)
	}

	/// Surface an inner node's parameter field as a new outer input socket on the instance.
	/// Only numeric, boolean and vector fields are promotable; anything else is rejected with
	/// a notification.
	pub fn promote_parameter(&mut self, instance_id: &NodeId, inner_node_id: &NodeId, field_id: &str) -> Result<(), ValidationError> {
		let instance = self.graph.node(instance_id).ok_or_else(|| ValidationError::UnknownNode(instance_id.clone()))?;
		if instance.node_type != SUBGRAPH_NODE_TYPE {
			return Err(ValidationError::NotASubgraph(instance_id.clone()));
		}
		let params = SubgraphParams::from_params(&instance.params).map_err(|error| ValidationError::PreconditionFailed {
			reason: format!("unreadable subgraph params: {error}"),
		})?;
		let def_graph = params.graph.clone().into_graph().map_err(|error| ValidationError::PreconditionFailed {
			reason: format!("unreadable subgraph definition: {error}"),
		})?;
		let inner_node = def_graph.node(inner_node_id).ok_or_else(|| ValidationError::UnknownNode(inner_node_id.clone()))?;
		let field = self
			.catalog
			.get(&inner_node.node_type)
			.and_then(|definition| definition.param_field(field_id))
			.ok_or_else(|| ValidationError::UnknownParamField {
				node: inner_node_id.clone(),
				field: field_id.to_string(),
			})?;
		let Some(data_type) = field.kind.promoted_data_type() else {
			let error = ValidationError::UnpromotableParameter {
				key: field_id.to_string(),
				kind: field.kind,
			};
			self.events.add(EditorEvent::Notification { error: error.clone() });
			return Err(error);
		};

		// The new outer socket takes the field's name, disambiguated against existing inputs.
		let taken: HashSet<String> = instance.inputs.iter().filter_map(|id| self.graph.socket(id)).map(|socket| socket.name.clone()).collect();
		let mut key = field_id.to_string();
		let mut counter = 2;
		while taken.contains(&key) {
			key = format!("{field_id}-{counter}");
			counter += 1;
		}

		let mut promoted = params.promoted_params.clone();
		promoted.push(PromotedParam {
			key: key.clone(),
			node_id: inner_node_id.clone(),
			field_id: field_id.to_string(),
		});
		let promoted_value = serde_json::to_value(&promoted).map_err(|error| ValidationError::PreconditionFailed {
			reason: format!("unencodable promoted params: {error}"),
		})?;

		let mut after = NodeIo::capture(&self.graph, instance_id)?;
		let socket_id = SocketId::new(self.id_generator.unique("socket", |id| self.graph.id_in_use(id))?);
		let insert_at = after.node.inputs.len();
		after.node.inputs.push(socket_id.clone());
		after.sockets.insert(insert_at, Socket::input(socket_id, instance_id.clone(), key, data_type));
		after.node.params.insert(subgraph_keys::PROMOTED_PARAMS_KEY.to_string(), promoted_value);

		let command = GraphCommand::replace_node_io(&self.graph, after)?;
		self.apply_batch("Promote Parameter", vec![command])
	}

	/// Remove a promoted parameter's outer socket (dropping any wire into it) and its entry.
	pub fn demote_parameter(&mut self, instance_id: &NodeId, key: &str) -> Result<(), ValidationError> {
		let instance = self.graph.node(instance_id).ok_or_else(|| ValidationError::UnknownNode(instance_id.clone()))?;
		let params = SubgraphParams::from_params(&instance.params).map_err(|error| ValidationError::PreconditionFailed {
			reason: format!("unreadable subgraph params: {error}"),
		})?;
		if params.promoted(key).is_none() {
			return Err(ValidationError::UnknownParamField {
				node: instance_id.clone(),
				field: key.to_string(),
			});
		}

		let promoted: Vec<PromotedParam> = params.promoted_params.iter().filter(|promoted| promoted.key != key).cloned().collect();
		let mut after = NodeIo::capture(&self.graph, instance_id)?;
		let removed_socket: Vec<SocketId> = after.sockets.iter().filter(|socket| socket.name == key).map(|socket| socket.id.clone()).collect();
		after.node.inputs.retain(|id| !removed_socket.contains(id));
		after.sockets.retain(|socket| !removed_socket.contains(&socket.id));
		if promoted.is_empty() {
			after.node.params.remove(subgraph_keys::PROMOTED_PARAMS_KEY);
		} else {
			let promoted_value = serde_json::to_value(&promoted).map_err(|error| ValidationError::PreconditionFailed {
				reason: format!("unencodable promoted params: {error}"),
			})?;
			after.node.params.insert(subgraph_keys::PROMOTED_PARAMS_KEY.to_string(), promoted_value);
		}
		after.node.params.remove(key);

		let command = GraphCommand::replace_node_io(&self.graph, after)?;
		self.apply_batch("Demote Parameter", vec![command])
	}

	/// Set (or with `None`, clear) the whole override object one instance applies to one
	/// inner node. Overrides are instance-scoped and never written into the definition.
	pub fn set_subgraph_override(&mut self, instance_id: &NodeId, inner_node_id: &NodeId, patch: Option<JsonObject>) -> Result<(), ValidationError> {
		let instance = self.graph.node(instance_id).ok_or_else(|| ValidationError::UnknownNode(instance_id.clone()))?;
		if instance.node_type != SUBGRAPH_NODE_TYPE {
			return Err(ValidationError::NotASubgraph(instance_id.clone()));
		}
		let params = SubgraphParams::from_params(&instance.params).map_err(|error| ValidationError::PreconditionFailed {
			reason: format!("unreadable subgraph params: {error}"),
		})?;
		let mut overrides = params.overrides;
		match patch {
			Some(patch) => {
				overrides.insert(inner_node_id.clone(), patch);
			}
			None => {
				overrides.remove(inner_node_id);
			}
		}
		let after = if overrides.is_empty() {
			None
		} else {
			Some(serde_json::to_value(&overrides).map_err(|error| ValidationError::PreconditionFailed {
				reason: format!("unencodable overrides: {error}"),
			})?)
		};
		let command = GraphCommand::update_node_param(&self.graph, instance_id, subgraph_keys::OVERRIDES_KEY, after)?;
		self.apply_batch("Edit Subgraph Overrides", vec![command])
	}

	/// Rebuild every instance of `definition` in the active graph as one atomic batch:
	/// socket sets, mapping tables and embedded documents are replaced; wires survive through
	/// sockets whose names survive.
	pub fn sync_subgraph_instances(&mut self, definition: &GraphDocument) -> Result<(), ValidationError> {
		let mut instance_ids: Vec<NodeId> = self
			.graph
			.nodes()
			.filter(|node| sync::instance_definition_id(node).as_ref() == Some(&definition.graph_id))
			.map(|node| node.id.clone())
			.collect();
		instance_ids.sort();
		if instance_ids.is_empty() {
			return Ok(());
		}

		let mut commands = Vec::with_capacity(instance_ids.len());
		for instance_id in &instance_ids {
			commands.push(sync::rebuild_instance_command(&self.graph, instance_id, definition, &self.catalog, &mut self.id_generator)?);
		}
		self.apply_batch("Update Subgraph Instances", commands)
	}

	/// Enter a subgraph instance's definition for editing. The parent graph is parked on the
	/// navigation stack. Refused past the nesting limit, with a notification.
	pub fn dive_into_subgraph(&mut self, instance_id: &NodeId) -> Result<(), ValidationError> {
		if self.history.batch_in_progress() {
			return Err(ValidationError::BatchInProgress);
		}
		let instance = self.graph.node(instance_id).ok_or_else(|| ValidationError::UnknownNode(instance_id.clone()))?;
		if instance.node_type != SUBGRAPH_NODE_TYPE {
			return Err(ValidationError::NotASubgraph(instance_id.clone()));
		}
		if self.navigation.depth() >= MAX_SUBGRAPH_DEPTH {
			let error = ValidationError::SubgraphDepthExceeded { limit: MAX_SUBGRAPH_DEPTH };
			self.events.add(EditorEvent::Notification { error: error.clone() });
			return Err(error);
		}
		let params = SubgraphParams::from_params(&instance.params).map_err(|error| ValidationError::PreconditionFailed {
			reason: format!("unreadable subgraph params: {error}"),
		})?;
		let child = params.graph.into_graph().map_err(|error| ValidationError::PreconditionFailed {
			reason: format!("unreadable subgraph definition: {error}"),
		})?;

		let breadcrumb = Breadcrumb {
			graph_id: child.graph_id().clone(),
			label: child.name().to_string(),
			parent_node_id: instance_id.clone(),
		};
		let parent = std::mem::replace(&mut self.graph, child);
		self.navigation.push(parent, breadcrumb);

		self.history.clear();
		self.executor.on_graph_loaded(&self.graph);
		self.ui_state.retain_existing(&self.graph);
		self.events.add(EditorEvent::NavigationChanged);
		self.events.add(EditorEvent::GraphChanged);
		let event = self.history_event();
		self.events.add(event);
		Ok(())
	}

	/// Leave the active subgraph: write the edited child document back into the parent's
	/// instance node, re-link every ancestor from the root down, and synchronize all sibling
	/// instances of the same definition.
	pub fn ascend_from_subgraph(&mut self) -> Result<(), ValidationError> {
		if self.history.batch_in_progress() {
			return Err(ValidationError::BatchInProgress);
		}
		let Some((mut parent, breadcrumb)) = self.navigation.pop() else {
			return Err(ValidationError::PreconditionFailed {
				reason: "already at the root graph".to_string(),
			});
		};

		let child_document = self.graph.to_document();
		let embedded = serde_json::to_value(&child_document).map_err(|error| ValidationError::PreconditionFailed {
			reason: format!("unencodable subgraph definition: {error}"),
		})?;
		parent.update_node_param(&breadcrumb.parent_node_id, subgraph_keys::GRAPH_KEY, Some(embedded))?;

		self.graph = parent;
		self.navigation.relink(&self.graph);
		self.history.clear();
		self.executor.on_graph_loaded(&self.graph);
		self.ui_state.retain_existing(&self.graph);
		self.events.add(EditorEvent::NavigationChanged);
		self.events.add(EditorEvent::GraphChanged);
		let event = self.history_event();
		self.events.add(event);

		// The definition's shape may have changed; bring every instance in step (the one we
		// just wrote back included).
		self.sync_subgraph_instances(&child_document)
	}

	/// Ascend until the active graph sits at `depth` breadcrumbs from the root (breadcrumb
	/// click).
	pub fn jump_to_depth(&mut self, depth: usize) -> Result<(), ValidationError> {
		while self.navigation.depth() > depth {
			self.ascend_from_subgraph()?;
		}
		Ok(())
	}
}

impl Default for Editor {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::test_utils::EditorTestUtils;
	use graph_store::data_type::DataType;
	use pretty_assertions::assert_eq;
	use serde_json::json;

	/// - insert a float constant and an add node
	/// - wire them and evaluate the add output
	/// - the cache and dirty set settle exactly
	#[test]
	fn add_wire_evaluate() {
		let mut utils = EditorTestUtils::create();
		let constant = utils.add_const_float(3.);
		let add = utils.add_node("add");
		utils.editor.set_node_param(&add, "b", json!(4.)).unwrap();
		utils.connect_named(&constant, "out", &add, "a");

		let status = utils.evaluate(&add, "out");
		assert_eq!(status, EvaluationStatus::Done(json!(7.)));
		assert_eq!(utils.editor.output_value(), Some(&json!(7.)));
		assert_eq!(utils.editor.output_error(), None);
		assert!(utils.editor.dirty_state().dirty_nodes().is_empty());
		assert_eq!(utils.editor.dirty_state().cached_outputs(&add).unwrap().get("out"), Some(&json!(7.)));
	}

	/// - attempt to wire a vec2 output into a float input
	/// - the command is rejected with both sides of the mismatch, the store and history are untouched
	#[test]
	fn type_incompatible_wire_is_rejected() {
		let mut utils = EditorTestUtils::create();
		let vector = utils.add_node("const-vec2");
		let add = utils.add_node("add");
		let document_before = utils.editor.save_document().unwrap();
		let can_undo_before = utils.editor.can_undo();

		let from = utils.output_socket(&vector, "out");
		let to = utils.input_socket(&add, "a");
		let error = utils.editor.connect(from, to).unwrap_err();

		assert_eq!(error, ValidationError::TypeMismatch { from: DataType::Vec2, to: DataType::Float });
		assert_eq!(utils.editor.save_document().unwrap(), document_before);
		assert_eq!(utils.editor.can_undo(), can_undo_before);
	}

	/// - wire a → b, then attempt b → a
	/// - the second wire is rejected as a cycle and never inserted
	#[test]
	fn cyclic_wire_is_rejected() {
		let mut utils = EditorTestUtils::create();
		let first = utils.add_node("add");
		let second = utils.add_node("add");
		utils.connect_named(&first, "out", &second, "a");

		let from = utils.output_socket(&second, "out");
		let to = utils.input_socket(&first, "a");
		let error = utils.editor.connect(from, to).unwrap_err();
		assert!(matches!(error, ValidationError::CyclicDependency { .. }));
		assert_eq!(utils.editor.graph().wire_count(), 1);
	}

	/// - evaluate, then change the upstream constant
	/// - both nodes are dirty, and re-evaluation reflects the new value
	#[test]
	fn dirty_propagation_after_param_change() {
		let mut utils = EditorTestUtils::create();
		let constant = utils.add_const_float(3.);
		let add = utils.add_node("add");
		utils.editor.set_node_param(&add, "b", json!(4.)).unwrap();
		utils.connect_named(&constant, "out", &add, "a");
		assert_eq!(utils.evaluate(&add, "out"), EvaluationStatus::Done(json!(7.)));

		utils.editor.set_node_param(&constant, "value", json!(10.)).unwrap();
		assert!(utils.editor.is_dirty(&constant));
		assert!(utils.editor.is_dirty(&add));

		assert_eq!(utils.evaluate(&add, "out"), EvaluationStatus::Done(json!(14.)));
	}

	/// - delete the upstream node (cascading its wire), then undo
	/// - the node and the wire come back and evaluation produces the original value
	#[test]
	fn undo_restores_wires_removed_by_node_deletion() {
		let mut utils = EditorTestUtils::create();
		let constant = utils.add_const_float(3.);
		let add = utils.add_node("add");
		utils.editor.set_node_param(&add, "b", json!(4.)).unwrap();
		utils.connect_named(&constant, "out", &add, "a");
		assert_eq!(utils.evaluate(&add, "out"), EvaluationStatus::Done(json!(7.)));
		let document_before = utils.editor.save_document().unwrap();

		utils.editor.delete_node(&constant).unwrap();
		assert!(utils.editor.graph().node(&constant).is_none());
		assert_eq!(utils.editor.graph().wire_count(), 0);
		assert!(utils.editor.dirty_state().cached_outputs(&add).is_none());

		assert!(utils.editor.undo().unwrap());
		assert_eq!(utils.editor.save_document().unwrap(), document_before);
		assert_eq!(utils.evaluate(&add, "out"), EvaluationStatus::Done(json!(7.)));
	}

	/// Undo followed by redo (no interleaved edits) restores a byte-equal document.
	#[test]
	fn undo_redo_round_trips_byte_equal() {
		let mut utils = EditorTestUtils::create();
		let constant = utils.add_const_float(3.);
		let add = utils.add_node("add");
		utils.connect_named(&constant, "out", &add, "a");

		let document_before = utils.editor.save_document().unwrap();
		assert!(utils.editor.undo().unwrap());
		assert_ne!(utils.editor.save_document().unwrap(), document_before);
		assert!(utils.editor.redo().unwrap());
		assert_eq!(utils.editor.save_document().unwrap(), document_before);
	}

	/// - build a definition holding one add with b = 1, expose a and out
	/// - instance with an override b = 100, fed by a constant 5
	/// - the override replaces the definition's value: 105
	#[test]
	fn subgraph_expansion_with_override() {
		let mut utils = EditorTestUtils::create();
		let (definition, inner_add, inner_a, inner_out) = utils.build_add_one_definition();

		let instance = utils
			.editor
			.insert_subgraph_instance_with(
				&definition,
				vec![IoBinding::new("a", inner_add.clone(), inner_a)],
				vec![IoBinding::new("out", inner_add.clone(), inner_out)],
				DVec2::ZERO,
			)
			.unwrap();
		utils
			.editor
			.set_subgraph_override(&instance, &inner_add, Some(JsonObject::from_iter([("b".to_string(), json!(100.))])))
			.unwrap();

		let constant = utils.add_const_float(5.);
		utils.connect_named(&constant, "out", &instance, "a");

		assert_eq!(utils.evaluate(&instance, "out"), EvaluationStatus::Done(json!(105.)));
	}

	/// Transient applications roll back on abort and leave no history.
	#[test]
	fn aborted_batch_rolls_back_transients() {
		let mut utils = EditorTestUtils::create();
		let constant = utils.add_const_float(1.);
		let document_before = utils.editor.save_document().unwrap();
		let position_before = utils.editor.graph().node(&constant).unwrap().position;

		utils.editor.begin_batch("Drag Node").unwrap();
		for step in 1..=3 {
			let mut after = NodeIo::capture(utils.editor.graph(), &constant).unwrap();
			after.node.position = DVec2::new(step as f64 * 10., 0.);
			let command = GraphCommand::update_node_io(utils.editor.graph(), after).unwrap();
			utils.editor.apply_transient(command).unwrap();
		}
		assert_eq!(utils.editor.graph().node(&constant).unwrap().position, DVec2::new(30., 0.));

		utils.editor.abort_batch().unwrap();
		assert_eq!(utils.editor.graph().node(&constant).unwrap().position, position_before);
		assert_eq!(utils.editor.save_document().unwrap(), document_before);
		assert!(!utils.editor.can_undo());
	}

	/// A drag produces exactly one undo step: the recorded final position.
	#[test]
	fn committed_drag_is_one_undo_step() {
		let mut utils = EditorTestUtils::create();
		let constant = utils.add_const_float(1.);

		utils.editor.begin_batch("Drag Node").unwrap();
		for step in 1..=3 {
			let mut after = NodeIo::capture(utils.editor.graph(), &constant).unwrap();
			after.node.position = DVec2::new(step as f64 * 10., 0.);
			let command = GraphCommand::update_node_io(utils.editor.graph(), after).unwrap();
			utils.editor.apply_transient(command).unwrap();
		}
		// The batch records one command covering the whole drag.
		let mut after = NodeIo::capture(utils.editor.graph(), &constant).unwrap();
		after.node.position = DVec2::new(30., 0.);
		let before_drag = {
			let mut before = after.clone();
			before.node.position = DVec2::ZERO;
			before
		};
		utils.editor.record_command(GraphCommand::UpdateNodeIo { before: before_drag, after }).unwrap();
		utils.editor.commit_batch().unwrap();

		utils.editor.undo().unwrap();
		assert_eq!(utils.editor.graph().node(&constant).unwrap().position, DVec2::ZERO);
	}

	/// String parameters are not promotable; the rejection carries a notification.
	#[test]
	fn string_promotion_is_rejected_with_notification() {
		let mut utils = EditorTestUtils::create();
		let (definition, inner_add, inner_a, inner_out) = utils.build_add_one_definition();
		let instance = utils
			.editor
			.insert_subgraph_instance_with(
				&definition,
				vec![IoBinding::new("a", inner_add.clone(), inner_a)],
				vec![IoBinding::new("out", inner_add.clone(), inner_out)],
				DVec2::ZERO,
			)
			.unwrap();

		// Build a definition with a string constant to try promoting its value field.
		let mut inner_editor = Editor::with_seed(99);
		let text = inner_editor.add_node("const-string", DVec2::ZERO).unwrap();
		let text_definition = inner_editor.graph().to_document();
		let text_instance = utils
			.editor
			.insert_subgraph_instance_with(&text_definition, vec![], vec![], DVec2::new(0., 200.))
			.unwrap();

		utils.editor.drain_events();
		let error = utils.editor.promote_parameter(&text_instance, &text, "value").unwrap_err();
		assert!(matches!(error, ValidationError::UnpromotableParameter { .. }));
		assert!(utils.editor.drain_events().iter().any(|event| matches!(event, EditorEvent::Notification { .. })));

		// A float field on the other instance promotes fine and is wireable.
		utils.editor.promote_parameter(&instance, &inner_add, "b").unwrap();
		let promoted_socket = utils.input_socket(&instance, "b");
		assert_eq!(utils.editor.graph().socket(&promoted_socket).unwrap().data_type, DataType::Float);

		let constant = utils.add_const_float(30.);
		utils.connect_named(&constant, "out", &instance, "b");
		let five = utils.add_const_float(5.);
		utils.connect_named(&five, "out", &instance, "a");
		assert_eq!(utils.evaluate(&instance, "out"), EvaluationStatus::Done(json!(35.)));

		// Demoting removes the socket (and its wire); the inner field's own value returns.
		utils.editor.demote_parameter(&instance, "b").unwrap();
		assert!(utils.editor.graph().socket(&promoted_socket).is_none());
		assert_eq!(utils.evaluate(&instance, "out"), EvaluationStatus::Done(json!(6.)));
	}

	/// A definition exposing io through interface proxies instantiates with derived sockets
	/// and evaluates through them.
	#[test]
	fn proxy_interface_instantiation() {
		use crate::test_utils::socket_by_name;
		use graph_store::graph::Direction;

		let mut builder = Editor::with_seed(50);
		let gin = builder.add_node("graph-input", DVec2::ZERO).unwrap();
		builder.set_node_param(&gin, "name", json!("level")).unwrap();
		let add = builder.add_node("add", DVec2::new(120., 0.)).unwrap();
		builder.set_node_param(&add, "b", json!(2.)).unwrap();
		let gout = builder.add_node("graph-output", DVec2::new(240., 0.)).unwrap();
		builder.set_node_param(&gout, "name", json!("result")).unwrap();
		let gin_value = socket_by_name(builder.graph(), &gin, "value", Direction::Output);
		let add_a = socket_by_name(builder.graph(), &add, "a", Direction::Input);
		builder.connect(gin_value, add_a).unwrap();
		let add_out = socket_by_name(builder.graph(), &add, "out", Direction::Output);
		let gout_value = socket_by_name(builder.graph(), &gout, "value", Direction::Input);
		builder.connect(add_out, gout_value).unwrap();
		let definition = builder.graph().to_document();

		let mut utils = EditorTestUtils::create();
		let instance = utils.editor.insert_subgraph_instance(&definition, DVec2::ZERO).unwrap();
		let constant = utils.add_const_float(7.);
		utils.connect_named(&constant, "out", &instance, "level");
		assert_eq!(utils.evaluate(&instance, "result"), EvaluationStatus::Done(json!(9.)));
	}

	/// Dive, edit the definition, ascend: the parent instance picks up the edits and sibling
	/// wires survive through same-named sockets.
	#[test]
	fn dive_edit_ascend_writes_back() {
		let mut utils = EditorTestUtils::create();
		let (definition, inner_add, inner_a, inner_out) = utils.build_add_one_definition();
		let instance = utils
			.editor
			.insert_subgraph_instance_with(
				&definition,
				vec![IoBinding::new("a", inner_add.clone(), inner_a)],
				vec![IoBinding::new("out", inner_add.clone(), inner_out)],
				DVec2::ZERO,
			)
			.unwrap();
		let constant = utils.add_const_float(5.);
		utils.connect_named(&constant, "out", &instance, "a");
		assert_eq!(utils.evaluate(&instance, "out"), EvaluationStatus::Done(json!(6.)));

		utils.editor.dive_into_subgraph(&instance).unwrap();
		assert_eq!(utils.editor.graph_path().len(), 1);
		// Inside the definition: retune the add's b parameter.
		utils.editor.set_node_param(&inner_add, "b", json!(10.)).unwrap();
		utils.editor.ascend_from_subgraph().unwrap();
		assert!(utils.editor.graph_path().is_empty());

		// The wire survived the instance rebuild and the new inner value applies.
		assert_eq!(utils.evaluate(&instance, "out"), EvaluationStatus::Done(json!(15.)));
	}

	/// Navigation past the nesting limit is refused with a notification.
	#[test]
	fn navigation_depth_is_bounded() {
		let mut utils = EditorTestUtils::create();

		// A self-similar chain: each level's definition contains the next instance.
		let mut definition = {
			let mut leaf = Editor::with_seed(7);
			leaf.add_node("const-float", DVec2::ZERO).unwrap();
			leaf.graph().to_document()
		};
		for seed in 0..MAX_SUBGRAPH_DEPTH + 1 {
			let mut wrapper = Editor::with_seed(200 + seed as u64);
			wrapper.insert_subgraph_instance_with(&definition, vec![], vec![], DVec2::ZERO).unwrap();
			definition = wrapper.graph().to_document();
		}
		let top = utils.editor.insert_subgraph_instance_with(&definition, vec![], vec![], DVec2::ZERO).unwrap();

		let mut current = top.clone();
		for _ in 0..MAX_SUBGRAPH_DEPTH {
			utils.editor.dive_into_subgraph(&current).unwrap();
			current = utils
				.editor
				.graph()
				.nodes()
				.find(|node| node.node_type == SUBGRAPH_NODE_TYPE)
				.map(|node| node.id.clone())
				.expect("each level embeds another instance");
		}
		assert_eq!(utils.editor.graph_path().len(), MAX_SUBGRAPH_DEPTH);

		utils.editor.drain_events();
		let error = utils.editor.dive_into_subgraph(&current).unwrap_err();
		assert_eq!(error, ValidationError::SubgraphDepthExceeded { limit: MAX_SUBGRAPH_DEPTH });
		assert!(utils.editor.drain_events().iter().any(|event| matches!(event, EditorEvent::Notification { .. })));

		// Breadcrumb click back to the root.
		utils.editor.jump_to_depth(0).unwrap();
		assert!(utils.editor.graph_path().is_empty());

		// Collapsing the over-deep instance is refused too; ordinary nodes collapse fine.
		let error = utils.editor.toggle_collapsed(&top).unwrap_err();
		assert_eq!(error, ValidationError::SubgraphDepthExceeded { limit: MAX_SUBGRAPH_DEPTH });
		let constant = utils.add_const_float(1.);
		utils.editor.toggle_collapsed(&constant).unwrap();
		assert!(utils.editor.collapsed_nodes().contains(&constant));
	}

	/// Bypassing swaps the compute for a pass-through and invalidates like an edit.
	#[test]
	fn bypass_toggles_invalidate_and_pass_through() {
		let mut utils = EditorTestUtils::create();
		let constant = utils.add_const_float(3.);
		let add = utils.add_node("add");
		utils.editor.set_node_param(&add, "b", json!(4.)).unwrap();
		utils.connect_named(&constant, "out", &add, "a");
		assert_eq!(utils.evaluate(&add, "out"), EvaluationStatus::Done(json!(7.)));

		utils.editor.toggle_bypassed(&add).unwrap();
		assert!(utils.editor.is_dirty(&add));
		assert_eq!(utils.evaluate(&add, "out"), EvaluationStatus::Done(json!(3.)));

		utils.editor.toggle_bypassed(&add).unwrap();
		assert_eq!(utils.evaluate(&add, "out"), EvaluationStatus::Done(json!(7.)));
	}

	/// Loading a document resets history, dirty state and stale UI references.
	#[test]
	fn load_document_resets_session_state() {
		let mut utils = EditorTestUtils::create();
		let constant = utils.add_const_float(3.);
		utils.editor.set_node_selection(vec![constant.clone()]);
		let saved = utils.editor.save_document().unwrap();

		let mut other = EditorTestUtils::with_seed(1);
		let other_node = other.add_const_float(9.);
		other.editor.set_node_selection(vec![other_node.clone()]);
		other.editor.load_document(&saved).unwrap();

		assert!(!other.editor.can_undo());
		assert!(other.editor.selected_nodes().is_empty());
		assert_eq!(other.editor.graph().node_count(), 1);
		assert!(other.editor.is_dirty(&constant));
		assert_eq!(other.editor.ui_state().last_graph_id(), Some(utils.editor.graph().graph_id()));

		// A broken document leaves the loaded graph untouched.
		assert!(other.editor.load_document("{ not json").is_err());
		assert_eq!(other.editor.graph().node_count(), 1);
	}

	/// Frames carry metadata through commands and undo like everything else.
	#[test]
	fn frame_commands_are_invertible() {
		let mut utils = EditorTestUtils::create();
		let frame_id = utils.editor.add_frame("Shading").unwrap();

		let mut after = utils.editor.graph().frame(&frame_id).unwrap().clone();
		after.color = Some("#2b5580".to_string());
		after.collapsed = true;
		utils.editor.update_frame(after.clone()).unwrap();
		assert_eq!(utils.editor.graph().frame(&frame_id).unwrap(), &after);

		utils.editor.undo().unwrap();
		assert_eq!(utils.editor.graph().frame(&frame_id).unwrap().color, None);
		utils.editor.undo().unwrap();
		assert!(utils.editor.graph().frame(&frame_id).is_none());
		utils.editor.redo().unwrap();
		assert!(utils.editor.graph().frame(&frame_id).is_some());
	}

	/// Selections referring to deleted entities disappear after undo jumps too.
	#[test]
	fn selection_filters_across_history_jumps() {
		let mut utils = EditorTestUtils::create();
		let constant = utils.add_const_float(1.);
		utils.editor.set_node_selection(vec![constant.clone()]);
		assert_eq!(utils.editor.selected_nodes().len(), 1);

		// Undo the parameter change, then the insertion itself.
		utils.editor.undo().unwrap();
		assert_eq!(utils.editor.selected_nodes().len(), 1);
		utils.editor.undo().unwrap();
		assert!(utils.editor.selected_nodes().is_empty());
	}
}
