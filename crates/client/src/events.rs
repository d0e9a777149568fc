//! Events emitted while reconciling generation nodes.
//!
//! Produced by the [`ReconciliationPoller`](crate::poller::ReconciliationPoller)
//! and delivered over a [`tokio::sync::broadcast`] channel to whatever
//! renders the session.

use comfystudio_core::node::{NodeStatus, OutputKind};
use comfystudio_core::types::{NodeId, ProjectId};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StudioEvent {
    /// A tracked node changed in the store.
    NodeUpdated {
        project_id: ProjectId,
        node_id: NodeId,
        status: NodeStatus,
        progress: f64,
    },

    /// Progress of the currently selected node. Only emitted for the node
    /// that is selected when the update is applied.
    SelectedNodeProgress {
        project_id: ProjectId,
        node_id: NodeId,
        status: NodeStatus,
        /// Fraction in `[0, 1]`.
        progress: f64,
    },

    /// A node finished with an output file.
    NodeCompleted {
        project_id: ProjectId,
        node_id: NodeId,
        filename: String,
        output_kind: OutputKind,
    },

    /// The backend reported a generation failure.
    NodeFailed {
        project_id: ProjectId,
        node_id: NodeId,
        error: String,
    },

    /// A poll request failed; it is retried on the next tick.
    PollFailed {
        project_id: ProjectId,
        node_id: NodeId,
        error: String,
    },
}

impl StudioEvent {
    pub fn node_id(&self) -> &str {
        match self {
            StudioEvent::NodeUpdated { node_id, .. }
            | StudioEvent::SelectedNodeProgress { node_id, .. }
            | StudioEvent::NodeCompleted { node_id, .. }
            | StudioEvent::NodeFailed { node_id, .. }
            | StudioEvent::PollFailed { node_id, .. } => node_id,
        }
    }
}
