#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use comfystudio_client::api::{ProjectSource, StudioApiError};
use comfystudio_client::events::StudioEvent;
use comfystudio_client::state::{OpenProject, SharedState, StudioState};
use comfystudio_core::catalog::{ModelCatalog, TemplateLibrary};
use comfystudio_core::dimensions::Orientation;
use comfystudio_core::editor::EditorState;
use comfystudio_core::node::{GenerationParams, Node, NodeStatus};
use comfystudio_core::project::Project;
use comfystudio_core::store::NodeStore;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn params(prompt: &str) -> GenerationParams {
    GenerationParams {
        workflow: "t2i_ZIT".into(),
        prompt: prompt.into(),
        prompt_template: prompt.into(),
        template_values: Default::default(),
        negative_prompt: String::new(),
        model: "z_image_turbo.safetensors".into(),
        lora: None,
        bypass_lora: false,
        seed: 42,
        steps: 8,
        cfg: 1.0,
        width: 1024,
        height: 576,
        aspect_ratio: "16:9".into(),
        orientation: Orientation::Landscape,
    }
}

/// A queued node created `secs` after a fixed epoch.
pub fn node_at(id: &str, secs: i64) -> Node {
    Node::queued(
        id,
        None,
        params("a lighthouse"),
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
    )
}

/// Copy of `node` in the given server-side state.
pub fn with_status(node: &Node, status: NodeStatus, progress: f64) -> Node {
    let mut node = node.clone();
    node.status = status;
    node.progress = progress;
    match status {
        NodeStatus::Completed => node.image_filename = Some(format!("{}.png", node.id)),
        NodeStatus::Error => node.error = Some("CUDA out of memory".into()),
        _ => {}
    }
    node
}

pub fn project_of(id: &str, nodes: Vec<Node>) -> Project {
    Project {
        id: id.into(),
        name: format!("Project {id}"),
        nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        created_at: None,
        updated_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
    }
}

/// Session state with `project` open and `selected` selected.
pub fn state_with(project: Project, selected: Option<&str>) -> SharedState {
    let state = StudioState::shared();
    {
        let mut guard = state.try_write().expect("fresh state is unlocked");
        guard.project = Some(OpenProject {
            name: project.name.clone(),
            store: NodeStore::from_project(project),
            selected: selected.map(str::to_string),
            editor: EditorState::default(),
        });
    }
    state
}

/// Receive events until one matches, failing after `within`.
pub async fn wait_for<F>(
    rx: &mut tokio::sync::broadcast::Receiver<StudioEvent>,
    within: Duration,
    mut pred: F,
) -> Vec<StudioEvent>
where
    F: FnMut(&StudioEvent) -> bool,
{
    let mut seen = Vec::new();
    let result = tokio::time::timeout(within, async {
        loop {
            let event = rx.recv().await.expect("event channel open");
            let done = pred(&event);
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for event, saw {seen:?}");
    seen
}

// ---------------------------------------------------------------------------
// Scripted project source
// ---------------------------------------------------------------------------

/// Returns scripted snapshots in order, repeating the last one.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<Project, u16>>>,
    last: Mutex<Option<Result<Project, u16>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    /// `Err(status)` entries are served as store errors.
    pub fn new(script: Vec<Result<Project, u16>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProjectSource for ScriptedSource {
    async fn fetch_project(&self, _project_id: &str) -> Result<Project, StudioApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let entry = match next {
            Some(entry) => {
                *self.last.lock().unwrap() = Some(entry.clone());
                entry
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .expect("script must not be empty"),
        };
        entry.map_err(|status| StudioApiError::ApiError {
            status,
            body: "scripted failure".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Fake store over HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct StoreData {
    pub projects: HashMap<String, Project>,
    pub models: ModelCatalog,
    pub templates: TemplateLibrary,
    pub workflows: HashMap<String, Value>,
    /// Bodies received by `POST /generate`, in order.
    pub generate_requests: Vec<Value>,
    /// Ids passed to `POST /workflows/{id}`.
    pub saved_workflows: Vec<String>,
}

/// An in-memory store served on an ephemeral port.
#[derive(Clone)]
pub struct FakeStore {
    pub api_url: String,
    pub data: Arc<Mutex<StoreData>>,
}

impl FakeStore {
    pub async fn spawn() -> Self {
        let data = Arc::new(Mutex::new(StoreData {
            models: ModelCatalog {
                checkpoints: vec!["sd_xl_base_1.0.safetensors".into()],
                unets: vec!["z_image_turbo.safetensors".into()],
                loras: vec!["film_grain.safetensors".into()],
            },
            templates: TemplateLibrary {
                characters: vec!["knight".into(), "wizard".into()],
                locations: vec!["castle".into()],
                ..Default::default()
            },
            ..Default::default()
        }));

        let app = Router::new()
            .route("/api/health", get(|| async { Json(json!({"status": "ok"})) }))
            .route("/api/models", get(get_models))
            .route("/api/templates", get(get_templates).post(save_templates))
            .route("/api/workflows", get(get_workflows))
            .route("/api/workflows/{id}", post(save_workflow))
            .route("/api/projects", get(list_projects).post(create_project))
            .route("/api/projects/{id}", get(get_project))
            .route("/api/projects/{id}/images/{filename}", get(get_output))
            .route("/api/generate", post(generate))
            .with_state(Arc::clone(&data));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            api_url: format!("http://{addr}/api"),
            data,
        }
    }

    pub fn insert_project(&self, project: Project) {
        self.data
            .lock()
            .unwrap()
            .projects
            .insert(project.id.clone(), project);
    }

    /// Move a stored node to a new server-side state.
    pub fn set_status(&self, project_id: &str, node_id: &str, status: NodeStatus, progress: f64) {
        let mut data = self.data.lock().unwrap();
        let project = data.projects.get_mut(project_id).expect("project exists");
        let node = project.nodes.get(node_id).expect("node exists");
        let updated = with_status(node, status, progress);
        project.nodes.insert(node_id.to_string(), updated);
    }

    pub fn generate_requests(&self) -> Vec<Value> {
        self.data.lock().unwrap().generate_requests.clone()
    }
}

type Shared = Arc<Mutex<StoreData>>;

async fn get_models(State(data): State<Shared>) -> Json<ModelCatalog> {
    Json(data.lock().unwrap().models.clone())
}

async fn get_templates(State(data): State<Shared>) -> Json<TemplateLibrary> {
    Json(data.lock().unwrap().templates.clone())
}

async fn save_templates(
    State(data): State<Shared>,
    Json(library): Json<TemplateLibrary>,
) -> Json<TemplateLibrary> {
    data.lock().unwrap().templates = library.clone();
    Json(library)
}

async fn get_workflows(State(data): State<Shared>) -> Json<HashMap<String, Value>> {
    Json(data.lock().unwrap().workflows.clone())
}

async fn save_workflow(
    State(data): State<Shared>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut data = data.lock().unwrap();
    data.workflows.insert(id.clone(), body);
    data.saved_workflows.push(id);
    Json(json!({"status": "saved"}))
}

async fn list_projects(State(data): State<Shared>) -> Json<Vec<Project>> {
    Json(data.lock().unwrap().projects.values().cloned().collect())
}

#[derive(Deserialize)]
struct CreateProject {
    name: String,
}

async fn create_project(
    State(data): State<Shared>,
    Json(body): Json<CreateProject>,
) -> Json<Project> {
    let now = Utc::now();
    let project = Project {
        id: uuid::Uuid::new_v4().to_string(),
        name: body.name,
        nodes: HashMap::new(),
        created_at: Some(now),
        updated_at: now,
    };
    data.lock()
        .unwrap()
        .projects
        .insert(project.id.clone(), project.clone());
    Json(project)
}

async fn get_project(State(data): State<Shared>, Path(id): Path<String>) -> Response {
    match data.lock().unwrap().projects.get(&id) {
        Some(project) => Json(project.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "Project not found").into_response(),
    }
}

async fn get_output(Path((_id, filename)): Path<(String, String)>) -> Response {
    (StatusCode::OK, format!("bytes of {filename}")).into_response()
}

#[derive(Deserialize)]
struct GenerateBody {
    project_id: String,
    parent_node_id: Option<String>,
    params: GenerationParams,
}

async fn generate(State(data): State<Shared>, Json(body): Json<Value>) -> Response {
    let parsed: GenerateBody = match serde_json::from_value(body.clone()) {
        Ok(parsed) => parsed,
        Err(e) => return (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response(),
    };

    let mut data = data.lock().unwrap();
    data.generate_requests.push(body);

    let Some(project) = data.projects.get_mut(&parsed.project_id) else {
        return (StatusCode::NOT_FOUND, "Project not found").into_response();
    };

    let node = Node::queued(
        uuid::Uuid::new_v4().to_string(),
        parsed.parent_node_id,
        parsed.params,
        Utc::now(),
    );
    project.nodes.insert(node.id.clone(), node.clone());
    project.updated_at = Utc::now();
    Json(node).into_response()
}
