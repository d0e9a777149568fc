//! Generation nodes and their lifecycle.
//!
//! A [`Node`] is one generation attempt. Its status only ever moves
//! forward:
//!
//! ```text
//! Queued -> Generating -> Completed
//!                      \-> Error
//! ```
//!
//! `Queued` may jump directly to a terminal state when the first snapshot
//! observed is already finished. Terminal nodes are immutable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dimensions::{Orientation, DEFAULT_ASPECT_RATIO};
use crate::types::{NodeId, Timestamp};

// ---------------------------------------------------------------------------
// Legacy defaults (records written before these fields existed)
// ---------------------------------------------------------------------------

/// Workflow assumed for records that predate per-node workflows.
pub const LEGACY_WORKFLOW: &str = "t2i_sdxl";
/// Model assumed for records that predate model selection.
pub const LEGACY_MODEL: &str = "v1-5-pruned-emaonly.safetensors";
pub const LEGACY_STEPS: u32 = 20;
pub const LEGACY_CFG: f64 = 8.0;
pub const LEGACY_DIMENSION: u32 = 512;

/// Message recorded for a failed node the store reported without one.
pub const UNREPORTED_FAILURE: &str = "Generation failed";

/// File suffixes treated as video containers.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "mkv", "avi"];

fn default_workflow() -> String {
    LEGACY_WORKFLOW.to_string()
}

fn default_model() -> String {
    LEGACY_MODEL.to_string()
}

fn default_steps() -> u32 {
    LEGACY_STEPS
}

fn default_cfg() -> f64 {
    LEGACY_CFG
}

fn default_dimension() -> u32 {
    LEGACY_DIMENSION
}

fn default_aspect_ratio() -> String {
    DEFAULT_ASPECT_RATIO.to_string()
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Concrete parameters of one generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default = "default_workflow")]
    pub workflow: String,
    /// Fully substituted prompt actually sent for generation.
    pub prompt: String,
    /// Raw, placeholder-bearing template the user authored.
    #[serde(default)]
    pub prompt_template: String,
    /// Placeholder key -> resolved value. Only non-empty values are kept.
    #[serde(default)]
    pub template_values: BTreeMap<String, String>,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lora: Option<String>,
    #[serde(default)]
    pub bypass_lora: bool,
    pub seed: i64,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_cfg")]
    pub cfg: f64,
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default)]
    pub orientation: Orientation,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeStatus {
    #[default]
    #[serde(rename = "queued", alias = "Queued")]
    Queued,
    #[serde(rename = "generating", alias = "Generating")]
    Generating,
    #[serde(rename = "completed", alias = "Completed")]
    Completed,
    #[serde(rename = "error", alias = "Error")]
    Error,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Completed | NodeStatus::Error)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeStatus::Queued => "queued",
            NodeStatus::Generating => "generating",
            NodeStatus::Completed => "completed",
            NodeStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Kind of output a completed node produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Image,
    Video,
}

impl OutputKind {
    /// Classify an output file by its suffix.
    pub fn from_filename(filename: &str) -> Self {
        let is_video = filename
            .rsplit_once('.')
            .map(|(_, ext)| {
                VIDEO_EXTENSIONS
                    .iter()
                    .any(|v| v.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false);
        if is_video {
            OutputKind::Video
        } else {
            OutputKind::Image
        }
    }
}

// ---------------------------------------------------------------------------
// Observations and transitions
// ---------------------------------------------------------------------------

/// State of a node as reported by one authoritative snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Queued,
    Generating { progress: f64 },
    Completed { filename: String },
    Failed { message: String },
}

/// Change applied by [`Node::apply`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// The observation matched the current state.
    Unchanged,
    /// Queued -> Generating.
    Started { progress: f64 },
    /// Generating with a new progress value.
    Progressed { progress: f64 },
    Completed,
    Failed,
}

impl Transition {
    pub fn is_change(&self) -> bool {
        !matches!(self, Transition::Unchanged)
    }
}

/// Reasons an observation was refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("node is already {0} and cannot change")]
    Terminal(NodeStatus),

    #[error("node cannot move from generating back to queued")]
    Regression,

    #[error("completed node must have an output filename")]
    MissingOutput,

    #[error("failed node must have an error message")]
    MissingErrorMessage,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// One generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Node that was selected when this one was triggered. Back-reference
    /// only.
    #[serde(default)]
    pub parent_id: Option<NodeId>,
    pub params: GenerationParams,
    #[serde(default)]
    pub status: NodeStatus,
    /// Fraction in `[0, 1]`, meaningful while generating.
    #[serde(default)]
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "crate::timestamp")]
    pub timestamp: Timestamp,
    /// Resolved once on completion.
    #[serde(skip)]
    pub output_kind: Option<OutputKind>,
}

impl Node {
    /// A freshly submitted node.
    pub fn queued(
        id: impl Into<NodeId>,
        parent_id: Option<NodeId>,
        params: GenerationParams,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id,
            params,
            status: NodeStatus::Queued,
            progress: 0.0,
            image_filename: None,
            error: None,
            timestamp,
            output_kind: None,
        }
    }

    /// Bring a node received from the store into a consistent shape.
    ///
    /// Records written without a status but carrying an output are treated
    /// as completed, progress is clamped, and the output kind of completed
    /// nodes is resolved. A node marked completed without an output goes
    /// back to pending so it keeps being polled; a failure without a
    /// message gets [`UNREPORTED_FAILURE`].
    pub fn normalize(&mut self) {
        let has_output = self
            .image_filename
            .as_deref()
            .is_some_and(|f| !f.trim().is_empty());

        self.progress = clamp_progress(self.progress);

        match self.status {
            NodeStatus::Completed if !has_output => {
                tracing::warn!(node_id = %self.id, "Completed node has no output, polling again");
                self.image_filename = None;
                self.status = if self.progress > 0.0 {
                    NodeStatus::Generating
                } else {
                    NodeStatus::Queued
                };
            }
            NodeStatus::Error => self.error = Some(self.failure_message()),
            _ if has_output => self.status = NodeStatus::Completed,
            _ => {}
        }

        match self.status {
            NodeStatus::Queued => self.progress = 0.0,
            NodeStatus::Completed => {
                self.progress = 1.0;
                self.output_kind = self.image_filename.as_deref().map(OutputKind::from_filename);
            }
            NodeStatus::Generating | NodeStatus::Error => {}
        }
    }

    /// Interpret this node (as found in a server snapshot) as an
    /// observation for the local copy.
    pub fn observation(&self) -> Observation {
        let has_output = self
            .image_filename
            .as_deref()
            .is_some_and(|f| !f.is_empty());

        match self.status {
            NodeStatus::Completed => Observation::Completed {
                filename: self.image_filename.clone().unwrap_or_default(),
            },
            NodeStatus::Error => Observation::Failed {
                message: self.failure_message(),
            },
            _ if has_output => Observation::Completed {
                filename: self.image_filename.clone().unwrap_or_default(),
            },
            NodeStatus::Generating => Observation::Generating {
                progress: self.progress,
            },
            NodeStatus::Queued => Observation::Queued,
        }
    }

    /// Apply an observation, enforcing the lifecycle rules.
    ///
    /// On error the node is left untouched.
    pub fn apply(&mut self, observation: Observation) -> Result<Transition, TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }

        match observation {
            Observation::Queued => match self.status {
                NodeStatus::Queued => Ok(Transition::Unchanged),
                _ => Err(TransitionError::Regression),
            },
            Observation::Generating { progress } => {
                let progress = clamp_progress(progress);
                let previous = self.status;
                let changed = previous != NodeStatus::Generating || self.progress != progress;
                self.status = NodeStatus::Generating;
                self.progress = progress;

                Ok(match (previous, changed) {
                    (NodeStatus::Queued, _) => Transition::Started { progress },
                    (_, true) => Transition::Progressed { progress },
                    (_, false) => Transition::Unchanged,
                })
            }
            Observation::Completed { filename } => {
                if filename.trim().is_empty() {
                    return Err(TransitionError::MissingOutput);
                }
                self.output_kind = Some(OutputKind::from_filename(&filename));
                self.image_filename = Some(filename);
                self.status = NodeStatus::Completed;
                self.progress = 1.0;
                self.error = None;
                Ok(Transition::Completed)
            }
            Observation::Failed { message } => {
                if message.trim().is_empty() {
                    return Err(TransitionError::MissingErrorMessage);
                }
                self.error = Some(message);
                self.status = NodeStatus::Error;
                self.image_filename = None;
                Ok(Transition::Failed)
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn failure_message(&self) -> String {
        match self.error.as_deref().map(str::trim) {
            Some(message) if !message.is_empty() => message.to_string(),
            _ => UNREPORTED_FAILURE.to_string(),
        }
    }
}

fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};

    use super::*;

    pub(crate) fn params(prompt: &str) -> GenerationParams {
        GenerationParams {
            workflow: "t2i_ZIT".into(),
            prompt: prompt.into(),
            prompt_template: prompt.into(),
            template_values: BTreeMap::new(),
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

    pub(crate) fn node_at(id: &str, secs: i64) -> Node {
        Node::queued(
            id,
            None,
            params("a lighthouse"),
            Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        )
    }

    fn completed(filename: &str) -> Observation {
        Observation::Completed {
            filename: filename.into(),
        }
    }

    fn failed(message: &str) -> Observation {
        Observation::Failed {
            message: message.into(),
        }
    }

    // -- Forward transitions --

    #[test]
    fn queued_to_generating_to_completed() {
        let mut node = node_at("n1", 0);

        assert_matches!(
            node.apply(Observation::Generating { progress: 0.25 }),
            Ok(Transition::Started { .. })
        );
        assert_eq!(node.status, NodeStatus::Generating);

        assert_matches!(
            node.apply(Observation::Generating { progress: 0.5 }),
            Ok(Transition::Progressed { .. })
        );
        assert_eq!(node.progress, 0.5);

        assert_matches!(node.apply(completed("n1.png")), Ok(Transition::Completed));
        assert_eq!(node.status, NodeStatus::Completed);
        assert_eq!(node.image_filename.as_deref(), Some("n1.png"));
        assert_eq!(node.output_kind, Some(OutputKind::Image));
    }

    #[test]
    fn queued_can_jump_straight_to_completed() {
        let mut node = node_at("n1", 0);
        assert_matches!(node.apply(completed("n1.mp4")), Ok(Transition::Completed));
        assert_eq!(node.output_kind, Some(OutputKind::Video));
    }

    #[test]
    fn generating_to_error() {
        let mut node = node_at("n1", 0);
        node.apply(Observation::Generating { progress: 0.1 }).unwrap();
        assert_matches!(node.apply(failed("out of memory")), Ok(Transition::Failed));
        assert_eq!(node.status, NodeStatus::Error);
        assert_eq!(node.error.as_deref(), Some("out of memory"));
    }

    #[test]
    fn identical_progress_is_unchanged() {
        let mut node = node_at("n1", 0);
        node.apply(Observation::Generating { progress: 0.4 }).unwrap();
        assert_matches!(
            node.apply(Observation::Generating { progress: 0.4 }),
            Ok(Transition::Unchanged)
        );
    }

    #[test]
    fn progress_is_clamped() {
        let mut node = node_at("n1", 0);
        node.apply(Observation::Generating { progress: 3.0 }).unwrap();
        assert_eq!(node.progress, 1.0);
        node.apply(Observation::Generating { progress: f64::NAN }).unwrap();
        assert_eq!(node.progress, 0.0);
    }

    // -- Rejected transitions --

    #[test]
    fn terminal_states_absorb_every_observation() {
        let observations = [
            Observation::Queued,
            Observation::Generating { progress: 0.3 },
            completed("other.png"),
            failed("late failure"),
        ];

        let mut done = node_at("n1", 0);
        done.apply(completed("n1.png")).unwrap();
        let mut broken = node_at("n2", 0);
        broken.apply(failed("boom")).unwrap();

        for obs in observations {
            let before_done = done.clone();
            assert_matches!(
                done.apply(obs.clone()),
                Err(TransitionError::Terminal(NodeStatus::Completed))
            );
            assert_eq!(done, before_done);

            let before_broken = broken.clone();
            assert_matches!(
                broken.apply(obs),
                Err(TransitionError::Terminal(NodeStatus::Error))
            );
            assert_eq!(broken, before_broken);
        }
    }

    #[test]
    fn completion_requires_filename() {
        let mut node = node_at("n1", 0);
        assert_matches!(node.apply(completed("")), Err(TransitionError::MissingOutput));
        assert_matches!(node.apply(completed("  ")), Err(TransitionError::MissingOutput));
        assert_eq!(node.status, NodeStatus::Queued);
        assert!(node.image_filename.is_none());
    }

    #[test]
    fn failure_requires_message() {
        let mut node = node_at("n1", 0);
        assert_matches!(node.apply(failed("")), Err(TransitionError::MissingErrorMessage));
        assert_eq!(node.status, NodeStatus::Queued);
    }

    #[test]
    fn generating_never_regresses_to_queued() {
        let mut node = node_at("n1", 0);
        node.apply(Observation::Generating { progress: 0.2 }).unwrap();
        assert_matches!(node.apply(Observation::Queued), Err(TransitionError::Regression));
        assert_eq!(node.status, NodeStatus::Generating);
    }

    // -- Wire format --

    #[test]
    fn legacy_record_without_status_is_normalized() {
        let json = r#"{
            "id": "abc",
            "parent_id": null,
            "params": {"prompt": "a cat", "seed": 7},
            "image_filename": "abc.png",
            "timestamp": "2024-03-01T10:00:00.000001"
        }"#;
        let mut node: Node = serde_json::from_str(json).unwrap();
        node.normalize();

        assert_eq!(node.status, NodeStatus::Completed);
        assert_eq!(node.output_kind, Some(OutputKind::Image));
        assert_eq!(node.params.workflow, LEGACY_WORKFLOW);
        assert_eq!(node.params.model, LEGACY_MODEL);
        assert_eq!(node.params.steps, LEGACY_STEPS);
        assert_eq!(node.params.width, LEGACY_DIMENSION);
        assert_eq!(node.params.aspect_ratio, "1:1");
    }

    #[test]
    fn terminal_status_without_payload_is_repaired() {
        let mut unfinished = node_at("n1", 0);
        unfinished.status = NodeStatus::Completed;
        unfinished.progress = 0.6;
        unfinished.normalize();
        assert_eq!(unfinished.status, NodeStatus::Generating);
        assert_eq!(unfinished.progress, 0.6);
        assert!(unfinished.output_kind.is_none());

        let mut never_started = node_at("n2", 0);
        never_started.status = NodeStatus::Completed;
        never_started.image_filename = Some(" ".into());
        never_started.normalize();
        assert_eq!(never_started.status, NodeStatus::Queued);
        assert!(never_started.image_filename.is_none());

        let mut silent = node_at("n3", 0);
        silent.status = NodeStatus::Error;
        silent.normalize();
        assert_eq!(silent.status, NodeStatus::Error);
        assert_eq!(silent.error.as_deref(), Some(UNREPORTED_FAILURE));
    }

    #[test]
    fn status_accepts_capitalized_names() {
        let status: NodeStatus = serde_json::from_str(r#""Generating""#).unwrap();
        assert_eq!(status, NodeStatus::Generating);
        assert_eq!(serde_json::to_string(&status).unwrap(), r#""generating""#);
    }

    #[test]
    fn observation_of_snapshot_with_output_is_completed() {
        let mut snapshot = node_at("n1", 0);
        snapshot.status = NodeStatus::Generating;
        snapshot.image_filename = Some("n1.png".into());
        assert_eq!(snapshot.observation(), completed("n1.png"));
    }

    #[test]
    fn output_kind_from_suffix() {
        assert_eq!(OutputKind::from_filename("clip.MP4"), OutputKind::Video);
        assert_eq!(OutputKind::from_filename("clip.webm"), OutputKind::Video);
        assert_eq!(OutputKind::from_filename("frame.png"), OutputKind::Image);
        assert_eq!(OutputKind::from_filename("noext"), OutputKind::Image);
    }
}
