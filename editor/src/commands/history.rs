use super::graph_command::GraphCommand;
use crate::consts::MAX_UNDO_HISTORY_LEN;
use graph_store::error::ValidationError;
use std::collections::VecDeque;

/// An ordered list of commands committed atomically as one undo step.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CommandBatch {
	pub label: String,
	pub commands: Vec<GraphCommand>,
}

/// The batch being assembled between `begin_batch` and `commit_batch`/`abort_batch`.
///
/// `recorded` is what commits; `applied` additionally tracks transient applications (drag
/// previews and the like) in application order, so an abort can roll every mutation back.
#[derive(Debug, Default)]
struct PendingBatch {
	label: String,
	recorded: Vec<GraphCommand>,
	applied: Vec<GraphCommand>,
}

/// Undo/redo stacks of committed batches plus the optional in-progress batch. Selection and
/// transient drags never land here; only recorded commands do.
#[derive(Debug, Default)]
pub struct CommandHistory {
	undo: VecDeque<CommandBatch>,
	redo: VecDeque<CommandBatch>,
	pending: Option<PendingBatch>,
}

impl CommandHistory {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn batch_in_progress(&self) -> bool {
		self.pending.is_some()
	}

	pub fn can_undo(&self) -> bool {
		!self.undo.is_empty()
	}

	pub fn can_redo(&self) -> bool {
		!self.redo.is_empty()
	}

	pub fn undo_label(&self) -> Option<&str> {
		self.undo.back().map(|batch| batch.label.as_str())
	}

	pub fn redo_label(&self) -> Option<&str> {
		self.redo.back().map(|batch| batch.label.as_str())
	}

	pub fn begin_batch(&mut self, label: impl Into<String>) -> Result<(), ValidationError> {
		if self.pending.is_some() {
			return Err(ValidationError::BatchInProgress);
		}
		self.pending = Some(PendingBatch {
			label: label.into(),
			recorded: Vec::new(),
			applied: Vec::new(),
		});
		Ok(())
	}

	/// Note a command that was applied and belongs in the committed batch.
	pub fn note_recorded(&mut self, command: GraphCommand) -> Result<(), ValidationError> {
		let pending = self.pending.as_mut().ok_or(ValidationError::NoBatchInProgress)?;
		pending.applied.push(command.clone());
		pending.recorded.push(command);
		Ok(())
	}

	/// Note a command that was applied transiently: visible now, rolled back on abort, absent
	/// from the committed batch.
	pub fn note_transient(&mut self, command: GraphCommand) -> Result<(), ValidationError> {
		let pending = self.pending.as_mut().ok_or(ValidationError::NoBatchInProgress)?;
		pending.applied.push(command);
		Ok(())
	}

	/// Commit the pending batch. An empty batch (nothing recorded) is silently dropped.
	/// Returns whether a batch actually landed on the undo stack.
	pub fn commit_batch(&mut self) -> Result<bool, ValidationError> {
		let pending = self.pending.take().ok_or(ValidationError::NoBatchInProgress)?;
		if pending.recorded.is_empty() {
			return Ok(false);
		}
		self.push_undo(CommandBatch {
			label: pending.label,
			commands: pending.recorded,
		});
		self.redo.clear();
		Ok(true)
	}

	/// Discard the pending batch, returning every applied command (in application order) so
	/// the caller can invert them in reverse.
	pub fn abort_batch(&mut self) -> Result<Vec<GraphCommand>, ValidationError> {
		let pending = self.pending.take().ok_or(ValidationError::NoBatchInProgress)?;
		Ok(pending.applied)
	}

	pub fn pop_undo(&mut self) -> Option<CommandBatch> {
		self.undo.pop_back()
	}

	pub fn pop_redo(&mut self) -> Option<CommandBatch> {
		self.redo.pop_back()
	}

	pub fn push_undo(&mut self, batch: CommandBatch) {
		self.undo.push_back(batch);
		if self.undo.len() > MAX_UNDO_HISTORY_LEN {
			self.undo.pop_front();
		}
	}

	pub fn push_redo(&mut self, batch: CommandBatch) {
		self.redo.push_back(batch);
		if self.redo.len() > MAX_UNDO_HISTORY_LEN {
			self.redo.pop_front();
		}
	}

	pub fn clear(&mut self) {
		self.undo.clear();
		self.redo.clear();
		self.pending = None;
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use graph_store::graph::Frame;
	use graph_store::id::FrameId;

	fn frame_command(id: &str) -> GraphCommand {
		GraphCommand::InsertFrame {
			frame: Frame::new(FrameId::new(id), "Frame"),
		}
	}

	#[test]
	fn commit_pushes_and_clears_redo() {
		let mut history = CommandHistory::new();
		history.push_redo(CommandBatch { label: "stale".into(), commands: vec![] });

		history.begin_batch("Add Frame").unwrap();
		history.note_recorded(frame_command("frame-1")).unwrap();
		assert!(history.commit_batch().unwrap());

		assert!(history.can_undo());
		assert!(!history.can_redo());
		assert_eq!(history.undo_label(), Some("Add Frame"));
	}

	#[test]
	fn empty_batches_are_dropped() {
		let mut history = CommandHistory::new();
		history.begin_batch("Nothing").unwrap();
		history.note_transient(frame_command("frame-1")).unwrap();
		assert!(!history.commit_batch().unwrap());
		assert!(!history.can_undo());
	}

	#[test]
	fn nested_batches_are_rejected() {
		let mut history = CommandHistory::new();
		history.begin_batch("One").unwrap();
		assert_eq!(history.begin_batch("Two").unwrap_err(), ValidationError::BatchInProgress);
		assert_eq!(history.note_recorded(frame_command("frame-1")).map_err(|_| ()), Ok(()));
		history.abort_batch().unwrap();
		assert_eq!(history.note_recorded(frame_command("frame-2")).unwrap_err(), ValidationError::NoBatchInProgress);
	}

	#[test]
	fn abort_returns_applied_in_order() {
		let mut history = CommandHistory::new();
		history.begin_batch("Drag").unwrap();
		history.note_transient(frame_command("frame-1")).unwrap();
		history.note_recorded(frame_command("frame-2")).unwrap();
		let applied = history.abort_batch().unwrap();
		assert_eq!(applied.len(), 2);
		assert!(matches!(&applied[0], GraphCommand::InsertFrame { frame } if frame.id == FrameId::new("frame-1")));
	}

	#[test]
	fn undo_stack_is_bounded() {
		let mut history = CommandHistory::new();
		for index in 0..MAX_UNDO_HISTORY_LEN + 10 {
			history.push_undo(CommandBatch {
				label: format!("batch {index}"),
				commands: vec![],
			});
		}
		assert_eq!(history.pop_undo().unwrap().label, format!("batch {}", MAX_UNDO_HISTORY_LEN + 9));
		let mut count = 1;
		while history.pop_undo().is_some() {
			count += 1;
		}
		assert_eq!(count, MAX_UNDO_HISTORY_LEN);
	}
}
