//! REST client for the project store and generation backend.
//!
//! Wraps the store's JSON endpoints (catalogues, workflows, projects,
//! generation submission, outputs) using [`reqwest`].

use std::collections::HashMap;

use async_trait::async_trait;
use comfystudio_core::catalog::{ModelCatalog, TemplateLibrary};
use comfystudio_core::error::CoreError;
use comfystudio_core::node::{GenerationParams, Node};
use comfystudio_core::project::Project;
use comfystudio_core::types::NodeId;
use comfystudio_core::workflow::WorkflowDefinition;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;

/// HTTP client for one store instance.
#[derive(Clone)]
pub struct StudioApi {
    client: reqwest::Client,
    api_url: String,
}

/// Body of `POST /generate`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub project_id: String,
    /// Node selected when generation was triggered.
    pub parent_node_id: Option<NodeId>,
    pub params: GenerationParams,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

/// Errors from the store REST layer.
#[derive(Debug, thiserror::Error)]
pub enum StudioApiError {
    /// The HTTP request failed (network, DNS, timeout) or the body could
    /// not be decoded.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The store returned a non-2xx status code.
    #[error("Store API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// Structured input was rejected before it was sent.
    #[error(transparent)]
    Validation(#[from] CoreError),
}

/// Source of authoritative project snapshots.
///
/// The reconciliation poller depends on this seam rather than on
/// [`StudioApi`] directly.
#[async_trait]
pub trait ProjectSource: Send + Sync {
    async fn fetch_project(&self, project_id: &str) -> Result<Project, StudioApiError>;
}

impl StudioApi {
    /// Create a client for the store at `api_url`,
    /// e.g. `http://127.0.0.1:8000/api`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url: String = api_url.into();
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a client with the configured request timeout.
    pub fn from_config(config: &ClientConfig) -> Result<Self, StudioApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, config.api_url.clone()))
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// `GET /health`.
    pub async fn health(&self) -> Result<HealthStatus, StudioApiError> {
        let response = self.client.get(self.url("/health")).send().await?;
        Self::parse_response(response).await
    }

    // ---- catalogues ----

    /// `GET /models`: installed checkpoints, diffusion backbones and
    /// adapters.
    pub async fn get_models(&self) -> Result<ModelCatalog, StudioApiError> {
        let response = self.client.get(self.url("/models")).send().await?;
        Self::parse_response(response).await
    }

    /// `GET /templates`: candidate lists for placeholder randomization.
    pub async fn get_templates(&self) -> Result<TemplateLibrary, StudioApiError> {
        let response = self.client.get(self.url("/templates")).send().await?;
        Self::parse_response(response).await
    }

    /// `POST /templates`: replace the template library.
    pub async fn save_templates(
        &self,
        library: &TemplateLibrary,
    ) -> Result<TemplateLibrary, StudioApiError> {
        let response = self
            .client
            .post(self.url("/templates"))
            .json(library)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    // ---- workflows ----

    /// `GET /workflows`.
    ///
    /// Bare graphs are wrapped with their built-in field map. Entries that
    /// cannot be interpreted are skipped with a warning.
    pub async fn get_workflows(
        &self,
    ) -> Result<HashMap<String, WorkflowDefinition>, StudioApiError> {
        let response = self.client.get(self.url("/workflows")).send().await?;
        let raw: HashMap<String, serde_json::Value> = Self::parse_response(response).await?;

        let mut workflows = HashMap::with_capacity(raw.len());
        for (id, document) in raw {
            match WorkflowDefinition::from_stored(&id, document) {
                Ok(definition) => {
                    workflows.insert(id, definition);
                }
                Err(e) => tracing::warn!(workflow_id = %id, error = %e, "Skipping workflow"),
            }
        }
        Ok(workflows)
    }

    /// `POST /workflows/{id}`. The definition is validated first and never
    /// sent when invalid.
    pub async fn save_workflow(
        &self,
        workflow_id: &str,
        definition: &WorkflowDefinition,
    ) -> Result<(), StudioApiError> {
        definition.validate()?;

        let response = self
            .client
            .post(self.url(&format!("/workflows/{workflow_id}")))
            .json(definition)
            .send()
            .await?;
        Self::check_status(response).await
    }

    // ---- projects ----

    /// `GET /projects`.
    pub async fn list_projects(&self) -> Result<Vec<Project>, StudioApiError> {
        let response = self.client.get(self.url("/projects")).send().await?;
        let mut projects: Vec<Project> = Self::parse_response(response).await?;
        projects.iter_mut().for_each(Project::normalize);
        Ok(projects)
    }

    /// `POST /projects`.
    pub async fn create_project(&self, name: &str) -> Result<Project, StudioApiError> {
        let body = serde_json::json!({ "name": name });
        let response = self
            .client
            .post(self.url("/projects"))
            .json(&body)
            .send()
            .await?;
        let mut project: Project = Self::parse_response(response).await?;
        project.normalize();
        Ok(project)
    }

    /// `GET /projects/{id}`: full project snapshot.
    pub async fn get_project(&self, project_id: &str) -> Result<Project, StudioApiError> {
        let response = self
            .client
            .get(self.url(&format!("/projects/{project_id}")))
            .send()
            .await?;
        let mut project: Project = Self::parse_response(response).await?;
        project.normalize();
        Ok(project)
    }

    // ---- generation ----

    /// `POST /generate`. Returns the node the store created for the
    /// request.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<Node, StudioApiError> {
        let response = self
            .client
            .post(self.url("/generate"))
            .json(request)
            .send()
            .await?;
        let mut node: Node = Self::parse_response(response).await?;
        node.normalize();

        tracing::info!(
            project_id = %request.project_id,
            node_id = %node.id,
            workflow = %request.params.workflow,
            "Generation submitted",
        );
        Ok(node)
    }

    /// URL of a node's output file.
    pub fn output_url(&self, project_id: &str, filename: &str) -> String {
        self.url(&format!("/projects/{project_id}/images/{filename}"))
    }

    /// Download a node's output file, untransformed.
    pub async fn download_output(
        &self,
        project_id: &str,
        filename: &str,
    ) -> Result<Vec<u8>, StudioApiError> {
        let response = self
            .client
            .get(self.output_url(project_id, filename))
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`StudioApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, StudioApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StudioApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, StudioApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), StudioApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectSource for StudioApi {
    async fn fetch_project(&self, project_id: &str) -> Result<Project, StudioApiError> {
        self.get_project(project_id).await
    }
}
