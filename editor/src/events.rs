use graph_store::error::ValidationError;
use std::collections::VecDeque;

/// Notifications pushed to the shell after state transitions. The shell drains these with
/// [`crate::Editor::drain_events`] and re-reads whichever observers the events point at;
/// user-facing message text is the shell's job.
#[derive(Clone, Debug, PartialEq)]
pub enum EditorEvent {
	/// The graph changed: a batch committed, an undo/redo applied, or a document loaded.
	GraphChanged,
	HistoryChanged { can_undo: bool, can_redo: bool },
	SelectionChanged,
	/// The breadcrumb stack changed (dive, ascend, load).
	NavigationChanged,
	/// The active output request should be re-driven (after undo/redo or load).
	RefreshActiveOutput,
	/// The evaluation reached a terminal state; `output_value`/`output_error` are current.
	OutputChanged,
	/// A rejected operation the user should hear about (depth limit, unpromotable parameter).
	Notification { error: ValidationError },
}

pub trait EmitEvents {
	fn add(&mut self, event: EditorEvent);
}

impl EmitEvents for VecDeque<EditorEvent> {
	#[inline(always)]
	fn add(&mut self, event: EditorEvent) {
		self.push_back(event);
	}
}
