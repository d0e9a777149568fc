//! Session state shared between the session and its poll streams.

use std::collections::HashMap;
use std::sync::Arc;

use comfystudio_core::catalog::{ModelCatalog, TemplateLibrary};
use comfystudio_core::editor::EditorState;
use comfystudio_core::node::Node;
use comfystudio_core::store::NodeStore;
use comfystudio_core::types::{NodeId, ProjectId};
use comfystudio_core::workflow::{default_field_map, WorkflowCapabilities, WorkflowDefinition};
use tokio::sync::RwLock;

/// Handle to the session state.
pub type SharedState = Arc<RwLock<StudioState>>;

/// Everything the front end renders, owned in one place.
#[derive(Debug, Default)]
pub struct StudioState {
    pub models: ModelCatalog,
    pub library: TemplateLibrary,
    pub workflows: HashMap<String, WorkflowDefinition>,
    /// The project being worked on, if any.
    pub project: Option<OpenProject>,
}

/// A project opened in the workspace.
#[derive(Debug)]
pub struct OpenProject {
    pub name: String,
    pub store: NodeStore,
    pub selected: Option<NodeId>,
    pub editor: EditorState,
}

impl OpenProject {
    pub fn id(&self) -> &str {
        self.store.project_id()
    }

    pub fn selected_node(&self) -> Option<&Node> {
        self.selected.as_deref().and_then(|id| self.store.get(id))
    }

    pub fn is_selected(&self, node_id: &str) -> bool {
        self.selected.as_deref() == Some(node_id)
    }
}

impl StudioState {
    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::default()))
    }

    /// The open project, if its id is `project_id`.
    pub fn project_mut(&mut self, project_id: &str) -> Option<&mut OpenProject> {
        self.project.as_mut().filter(|p| p.id() == project_id)
    }

    pub fn open_project_id(&self) -> Option<ProjectId> {
        self.project.as_ref().map(|p| p.id().to_string())
    }

    /// Capabilities of a workflow, using its stored map or the built-in
    /// one when the workflow is unknown.
    pub fn capabilities(&self, workflow_id: &str) -> WorkflowCapabilities {
        match self.workflows.get(workflow_id) {
            Some(definition) => WorkflowCapabilities::resolve(workflow_id, &definition.map),
            None => WorkflowCapabilities::resolve(workflow_id, &default_field_map(workflow_id)),
        }
    }
}
