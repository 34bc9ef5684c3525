// HISTORY
pub const MAX_UNDO_HISTORY_LEN: usize = 100;

// DOCUMENTS
pub const DEFAULT_GRAPH_NAME: &str = "Untitled Graph";
pub const MAX_RECENT_GRAPHS: usize = 10;
