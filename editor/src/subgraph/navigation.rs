//! The breadcrumb stack for nested-graph editing. Diving into a subgraph swaps the instance's
//! embedded definition in as the active graph and parks the parent here; ascending writes the
//! edited child back into the parent's instance node and re-links every ancestor so all
//! intermediate documents reflect the edits.
//!
//! Navigation is not a history step, and neither is the ascend write-back: the undo stacks
//! are scoped to the graph that is active, so they reset on every dive or ascend.

use graph_store::graph::Graph;
use graph_store::id::{GraphId, NodeId};
use graph_store::subgraph;

/// One level of the navigation trail, describing the graph *below* the parked parent graph.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breadcrumb {
	pub graph_id: GraphId,
	pub label: String,
	pub parent_node_id: NodeId,
}

#[derive(Debug, Default)]
pub struct NavigationStack {
	/// Root first. Each entry holds a parked ancestor graph and the breadcrumb describing the
	/// instance (within that ancestor) the trail descended through.
	ancestors: Vec<(Graph, Breadcrumb)>,
}

impl NavigationStack {
	pub fn new() -> Self {
		Self::default()
	}

	/// Nesting level of the active graph; zero at the root.
	pub fn depth(&self) -> usize {
		self.ancestors.len()
	}

	pub fn is_at_root(&self) -> bool {
		self.ancestors.is_empty()
	}

	pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
		self.ancestors.iter().map(|(_, breadcrumb)| breadcrumb.clone()).collect()
	}

	pub fn push(&mut self, parent: Graph, breadcrumb: Breadcrumb) {
		self.ancestors.push((parent, breadcrumb));
	}

	pub fn pop(&mut self) -> Option<(Graph, Breadcrumb)> {
		self.ancestors.pop()
	}

	pub fn clear(&mut self) {
		self.ancestors.clear();
	}

	/// Write the active graph's document into its parked parent, the parent's into the
	/// grandparent, and so on up to the root, so every intermediate document reflects the
	/// current edits.
	pub fn relink(&mut self, active: &Graph) {
		let mut below = active.to_document();
		for (ancestor, breadcrumb) in self.ancestors.iter_mut().rev() {
			let embedded = match serde_json::to_value(&below) {
				Ok(embedded) => embedded,
				Err(error) => {
					log::error!("Could not encode graph `{}` while re-linking the navigation stack: {error}", below.graph_id);
					return;
				}
			};
			if let Err(error) = ancestor.update_node_param(&breadcrumb.parent_node_id, subgraph::GRAPH_KEY, Some(embedded)) {
				log::error!("Could not write graph `{}` back into its parent: {error}", below.graph_id);
				return;
			}
			below = ancestor.to_document();
		}
	}
}
