//! The studio session: opening projects, selecting nodes and submitting
//! generations.
//!
//! [`Studio`] owns the shared [`StudioState`] and the
//! [`ReconciliationPoller`]. Submitting a generation inserts the node the
//! backend returned into the open project's store, selects it and starts a
//! poll stream for it; reconciliation then drives the node to a terminal
//! state.

use std::sync::Arc;

use comfystudio_core::catalog::TemplateLibrary;
use comfystudio_core::editor::{random_seed, EditorState};
use comfystudio_core::error::CoreError;
use comfystudio_core::node::Node;
use comfystudio_core::project::{summarize_projects, Project, ProjectSummary};
use comfystudio_core::store::{InsertOutcome, NodeStore};
use comfystudio_core::template::Placeholder;
use comfystudio_core::timeline::{self, TimelineEntry};
use comfystudio_core::types::{NodeId, ProjectId};
use comfystudio_core::workflow::WorkflowDefinition;
use tokio::sync::broadcast;

use crate::api::{GenerateRequest, StudioApi, StudioApiError};
use crate::config::ClientConfig;
use crate::events::StudioEvent;
use crate::poller::ReconciliationPoller;
use crate::state::{OpenProject, SharedState, StudioState};

/// Errors from session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No project is open")]
    NoProject,

    #[error("Node {0} not found in the open project")]
    NodeNotFound(NodeId),

    /// The open project changed while a request was in flight.
    #[error("Project {0} was closed before the request completed")]
    ProjectChanged(ProjectId),

    #[error(transparent)]
    Api(#[from] StudioApiError),

    #[error(transparent)]
    Validation(#[from] CoreError),
}

/// A user's working session against one store.
pub struct Studio {
    api: Arc<StudioApi>,
    state: SharedState,
    poller: Arc<ReconciliationPoller>,
}

impl Studio {
    pub fn new(api: Arc<StudioApi>, config: &ClientConfig) -> Self {
        let state = StudioState::shared();
        let poller = Arc::new(ReconciliationPoller::new(
            api.clone(),
            Arc::clone(&state),
            config.poll_interval,
        ));
        Self { api, state, poller }
    }

    /// Build the API client and session from `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, SessionError> {
        let api = Arc::new(StudioApi::from_config(config)?);
        Ok(Self::new(api, config))
    }

    pub fn api(&self) -> &StudioApi {
        &self.api
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn poller(&self) -> &ReconciliationPoller {
        &self.poller
    }

    /// Subscribe to node updates from the poller.
    pub fn subscribe(&self) -> broadcast::Receiver<StudioEvent> {
        self.poller.subscribe()
    }

    // ---- catalogues ----

    /// Reload the model catalogue, template library and workflows.
    pub async fn refresh_catalogs(&self) -> Result<(), SessionError> {
        let models = self.api.get_models().await?;
        let library = self.api.get_templates().await?;
        let workflows = self.api.get_workflows().await?;

        tracing::info!(
            checkpoints = models.checkpoints.len(),
            unets = models.unets.len(),
            loras = models.loras.len(),
            workflows = workflows.len(),
            "Catalogues loaded",
        );

        let mut state = self.state.write().await;
        state.models = models;
        state.library = library;
        state.workflows = workflows;
        Ok(())
    }

    /// Add a candidate to the template library and persist it.
    ///
    /// Returns `false` if the candidate was already present.
    pub async fn add_template_candidate(
        &self,
        placeholder: Placeholder,
        value: &str,
    ) -> Result<bool, SessionError> {
        let mut library: TemplateLibrary = self.state.read().await.library.clone();
        if !library.add_candidate(placeholder, value) {
            return Ok(false);
        }

        let saved = self.api.save_templates(&library).await?;
        self.state.write().await.library = saved;
        Ok(true)
    }

    /// Validate and upsert a workflow definition.
    pub async fn save_workflow(
        &self,
        workflow_id: &str,
        definition: WorkflowDefinition,
    ) -> Result<(), SessionError> {
        self.api.save_workflow(workflow_id, &definition).await?;
        self.state
            .write()
            .await
            .workflows
            .insert(workflow_id.to_string(), definition);
        Ok(())
    }

    // ---- projects ----

    /// Dashboard listing, most recently updated first.
    pub async fn list_projects(&self) -> Result<Vec<ProjectSummary>, SessionError> {
        let projects = self.api.list_projects().await?;
        Ok(summarize_projects(&projects))
    }

    pub async fn create_project(&self, name: &str) -> Result<Project, SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation("Project name must not be empty".into()).into());
        }
        let project = self.api.create_project(name).await?;
        tracing::info!(project_id = %project.id, name = %project.name, "Project created");
        Ok(project)
    }

    /// Open a project, replacing any open one.
    ///
    /// The most recent node is selected and the editor populated from it;
    /// an empty project gets the default editor state. Polling resumes for
    /// every node that is not terminal yet. If the project cannot be
    /// fetched, the previously open project stays open and keeps polling.
    pub async fn open_project(&self, project_id: &str) -> Result<(), SessionError> {
        let snapshot = self.api.get_project(project_id).await?;

        let previous = self.state.read().await.open_project_id();
        if let Some(previous) = previous.filter(|p| p != project_id) {
            self.poller.cancel_project(&previous).await;
        }

        let name = snapshot.name.clone();
        let store = NodeStore::from_project(snapshot);

        for (node_id, parent_id) in store.dangling_parents() {
            tracing::warn!(node_id = %node_id, parent_id = %parent_id, "Node references a missing parent");
        }

        let (selected, editor) = match timeline::latest(&store) {
            Some(node) => (Some(node.id.clone()), EditorState::from_params(&node.params)),
            None => (None, EditorState::default()),
        };
        let pending = store.pending_ids();

        tracing::info!(
            project_id,
            nodes = store.len(),
            pending = pending.len(),
            "Project opened",
        );

        self.state.write().await.project = Some(OpenProject {
            name,
            store,
            selected,
            editor,
        });

        for node_id in pending {
            self.poller.start(project_id, &node_id).await;
        }
        Ok(())
    }

    /// Close the open project and stop its poll streams.
    pub async fn close_project(&self) {
        let closed = self.state.write().await.project.take();
        if let Some(project) = closed {
            self.poller.cancel_project(project.id()).await;
            tracing::info!(project_id = %project.id(), "Project closed");
        }
    }

    // ---- selection & editing ----

    /// Select a node and repopulate the editor from its parameters.
    ///
    /// Selection never affects polling.
    pub async fn select_node(&self, node_id: &str) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        let project = state.project.as_mut().ok_or(SessionError::NoProject)?;
        let node = project
            .store
            .get(node_id)
            .ok_or_else(|| SessionError::NodeNotFound(node_id.to_string()))?;

        project.editor = EditorState::from_params(&node.params);
        project.selected = Some(node_id.to_string());
        Ok(())
    }

    /// Change the editor state of the open project.
    pub async fn edit<F>(&self, f: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut EditorState),
    {
        let mut state = self.state.write().await;
        let project = state.project.as_mut().ok_or(SessionError::NoProject)?;
        f(&mut project.editor);
        Ok(())
    }

    /// Draw a fresh seed into the editor and return it.
    pub async fn randomize_seed(&self) -> Result<i64, SessionError> {
        let seed = random_seed(&mut rand::rng());
        self.edit(|editor| editor.seed = seed).await?;
        Ok(seed)
    }

    // ---- generation ----

    /// Submit a generation built from the current editor state.
    ///
    /// The returned node is inserted into the store, selected, and polled
    /// until terminal. The editor keeps its state so that randomized
    /// placeholders are drawn again on the next submission.
    pub async fn generate(&self) -> Result<Node, SessionError> {
        let request = {
            let state = self.state.read().await;
            let project = state.project.as_ref().ok_or(SessionError::NoProject)?;
            let capabilities = state.capabilities(&project.editor.workflow);
            let params =
                project
                    .editor
                    .build_params(&state.library, &capabilities, &mut rand::rng());

            GenerateRequest {
                project_id: project.id().to_string(),
                parent_node_id: project.selected.clone(),
                params,
            }
        };

        let node = self.api.generate(&request).await?;

        {
            let mut state = self.state.write().await;
            let project = state
                .project_mut(&request.project_id)
                .ok_or_else(|| SessionError::ProjectChanged(request.project_id.clone()))?;

            if project.store.insert_optimistic(node.clone()) == InsertOutcome::AlreadyPresent {
                tracing::warn!(node_id = %node.id, "Backend returned a node that is already tracked");
            }
            project.selected = Some(node.id.clone());
        }

        if !node.is_terminal() {
            self.poller.start(&request.project_id, &node.id).await;
        }
        Ok(node)
    }

    // ---- projections ----

    /// Timeline rows of the open project.
    pub async fn timeline(&self) -> Result<Vec<TimelineEntry>, SessionError> {
        let state = self.state.read().await;
        let project = state.project.as_ref().ok_or(SessionError::NoProject)?;
        Ok(timeline::project(&project.store, project.selected.as_deref()))
    }

    pub async fn selected_node(&self) -> Option<Node> {
        let state = self.state.read().await;
        state.project.as_ref()?.selected_node().cloned()
    }

    pub async fn node(&self, node_id: &str) -> Option<Node> {
        let state = self.state.read().await;
        state.project.as_ref()?.store.get(node_id).cloned()
    }

    /// Output URL of a completed node in the open project.
    pub async fn output_url(&self, node_id: &str) -> Option<String> {
        let state = self.state.read().await;
        let project = state.project.as_ref()?;
        let filename = project.store.get(node_id)?.image_filename.as_deref()?;
        Some(self.api.output_url(project.id(), filename))
    }

    /// Stop polling and close the open project.
    pub async fn shutdown(&self) {
        self.poller.shutdown().await;
        self.state.write().await.project = None;
    }
}
