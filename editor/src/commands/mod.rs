pub mod graph_command;
pub mod history;

pub use graph_command::{GraphCommand, NodeIo};
pub use history::{CommandBatch, CommandHistory};
