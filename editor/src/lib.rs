//! The editor store: invertible commands and batched history over the graph store, subgraph
//! synchronization and navigation, selection and UI state, and the observer surface the
//! shell polls.

pub mod commands;
pub mod consts;
pub mod editor;
pub mod events;
pub mod subgraph;
pub mod ui_state;

#[cfg(test)]
pub mod test_utils;

pub use editor::Editor;
pub use events::EditorEvent;
