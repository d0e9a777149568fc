//! Flat chronological projection of a project's nodes.

use serde::Serialize;

use crate::node::{Node, NodeStatus, OutputKind};
use crate::store::NodeStore;
use crate::types::NodeId;

/// Label shown for nodes generated from an empty prompt.
pub const EMPTY_PROMPT_LABEL: &str = "Empty prompt";

/// One row of the timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub node_id: NodeId,
    pub label: String,
    pub seed: i64,
    pub steps: u32,
    pub status: NodeStatus,
    pub progress: f64,
    pub output: Option<String>,
    pub output_kind: Option<OutputKind>,
    pub is_selected: bool,
}

/// Nodes ordered by creation time, ties broken by id.
///
/// `parent_id` plays no part in the ordering.
pub fn chronological(store: &NodeStore) -> Vec<&Node> {
    let mut nodes: Vec<&Node> = store.nodes().collect();
    nodes.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    nodes
}

/// The most recently created node.
pub fn latest(store: &NodeStore) -> Option<&Node> {
    store
        .nodes()
        .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)))
}

/// Build the display rows for `store`, marking `selected`.
pub fn project(store: &NodeStore, selected: Option<&str>) -> Vec<TimelineEntry> {
    chronological(store)
        .into_iter()
        .map(|node| TimelineEntry {
            node_id: node.id.clone(),
            label: label_for(node),
            seed: node.params.seed,
            steps: node.params.steps,
            status: node.status,
            progress: node.progress,
            output: node.image_filename.clone(),
            output_kind: node.output_kind,
            is_selected: selected == Some(node.id.as_str()),
        })
        .collect()
}

fn label_for(node: &Node) -> String {
    let prompt = node.params.prompt.trim();
    if prompt.is_empty() {
        EMPTY_PROMPT_LABEL.to_string()
    } else {
        prompt.to_string()
    }
}
