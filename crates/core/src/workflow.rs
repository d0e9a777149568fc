//! Workflow definitions, capabilities, and validation.
//!
//! A workflow is an opaque ComfyUI graph (`data`) plus a field map (`map`)
//! naming which graph nodes play which role. The core only cares about the
//! shape: which model pool a workflow draws from, whether it accepts a
//! style adapter, whether its map is consistent with its graph, and how
//! generation parameters are written into it.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::node::GenerationParams;

// ---------------------------------------------------------------------------
// Known workflows
// ---------------------------------------------------------------------------

/// SDXL text-to-image workflow (full checkpoints).
pub const WORKFLOW_T2I_SDXL: &str = "t2i_sdxl";
/// Z-Image Turbo text-to-image workflow (diffusion backbone + adapter).
pub const WORKFLOW_T2I_ZIT: &str = "t2i_ZIT";
/// Wan 2.2 image-to-video workflow (diffusion backbone).
pub const WORKFLOW_I2V_WAN22: &str = "i2v_wan22";

/// Workflows that load full checkpoints. Every other workflow draws from
/// the diffusion-backbone pool.
const CHECKPOINT_WORKFLOWS: &[&str] = &[WORKFLOW_T2I_SDXL];

// ---------------------------------------------------------------------------
// Field map
// ---------------------------------------------------------------------------

/// Role -> graph node id mapping for a workflow. Empty strings mean the
/// role is not mapped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMap {
    #[serde(default)]
    pub sampler: String,
    #[serde(default)]
    pub positive_prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default)]
    pub model: String,
    /// Input name on the model node that holds the model filename.
    #[serde(default)]
    pub model_field: String,
    #[serde(default)]
    pub lora: String,
    /// Input name on the lora node that holds the adapter filename.
    #[serde(default)]
    pub lora_field: String,
    #[serde(default)]
    pub latent: String,
    #[serde(default)]
    pub save: String,
}

impl FieldMap {
    /// Roles that reference graph nodes, paired with their names.
    fn node_roles(&self) -> [(&'static str, &str); 7] {
        [
            ("sampler", self.sampler.as_str()),
            ("positive_prompt", self.positive_prompt.as_str()),
            ("negative_prompt", self.negative_prompt.as_str()),
            ("model", self.model.as_str()),
            ("lora", self.lora.as_str()),
            ("latent", self.latent.as_str()),
            ("save", self.save.as_str()),
        ]
    }

    pub fn has_lora(&self) -> bool {
        !self.lora.trim().is_empty()
    }
}

/// Built-in map for a workflow stored as a bare graph.
///
/// Known workflow ids get the node ids of their reference graphs; anything
/// else gets an empty map.
pub fn default_field_map(workflow_id: &str) -> FieldMap {
    let map = |sampler: &str,
               positive: &str,
               negative: &str,
               model: &str,
               model_field: &str,
               latent: &str,
               save: &str| FieldMap {
        sampler: sampler.into(),
        positive_prompt: positive.into(),
        negative_prompt: negative.into(),
        model: model.into(),
        model_field: model_field.into(),
        latent: latent.into(),
        save: save.into(),
        ..Default::default()
    };

    match workflow_id {
        WORKFLOW_T2I_SDXL => map("24", "6", "7", "4", "ckpt_name", "5", "27"),
        WORKFLOW_T2I_ZIT => FieldMap {
            lora: "28".into(),
            lora_field: "lora_name".into(),
            ..map("3", "6", "7", "16", "unet_name", "13", "9")
        },
        WORKFLOW_I2V_WAN22 => map("85", "93", "89", "95", "unet_name", "98", "108"),
        _ => FieldMap::default(),
    }
}

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// A workflow as served by `GET /workflows` and upserted by
/// `POST /workflows/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Opaque ComfyUI API-format graph.
    pub data: serde_json::Value,
    #[serde(default)]
    pub map: FieldMap,
}

impl WorkflowDefinition {
    /// Interpret a stored workflow document.
    ///
    /// Wrapped documents (`{"data": .., "map": ..}`) are used as-is; a bare
    /// graph is wrapped with [`default_field_map`] for `workflow_id`.
    pub fn from_stored(workflow_id: &str, document: serde_json::Value) -> Result<Self, CoreError> {
        let is_wrapped = document
            .as_object()
            .is_some_and(|o| o.contains_key("data") && o.contains_key("map"));

        if is_wrapped {
            serde_json::from_value(document).map_err(|e| {
                CoreError::Validation(format!("Workflow '{workflow_id}' is malformed: {e}"))
            })
        } else {
            Ok(Self {
                data: document,
                map: default_field_map(workflow_id),
            })
        }
    }

    /// Check the graph and map for consistency.
    ///
    /// The graph must be a JSON object of nodes, every mapped node role
    /// must reference an existing node, and mapped model/lora nodes need
    /// their field names.
    pub fn validate(&self) -> Result<(), CoreError> {
        let Some(nodes) = self.data.as_object() else {
            return Err(CoreError::Validation(
                "Workflow data must be a JSON object of nodes".to_string(),
            ));
        };

        if nodes.is_empty() {
            return Err(CoreError::Validation(
                "Workflow data must contain at least one node".to_string(),
            ));
        }

        for (role, node_id) in self.map.node_roles() {
            let node_id = node_id.trim();
            if !node_id.is_empty() && !nodes.contains_key(node_id) {
                return Err(CoreError::Validation(format!(
                    "Field map role '{role}' references missing node '{node_id}'"
                )));
            }
        }

        if !self.map.model.trim().is_empty() && self.map.model_field.trim().is_empty() {
            return Err(CoreError::Validation(
                "Field map sets 'model' but not 'model_field'".to_string(),
            ));
        }

        if self.map.has_lora() && self.map.lora_field.trim().is_empty() {
            return Err(CoreError::Validation(
                "Field map sets 'lora' but not 'lora_field'".to_string(),
            ));
        }

        Ok(())
    }

    /// Write `params` into a copy of the graph through the field map.
    ///
    /// Unmapped roles are skipped. A bypassed adapter has its strengths set
    /// to zero instead of a filename.
    pub fn apply_params(&self, params: &GenerationParams) -> Result<serde_json::Value, CoreError> {
        self.validate()?;

        let mut graph = self.data.clone();
        let map = &self.map;

        set_input(&mut graph, &map.sampler, "seed", params.seed.into())?;
        set_input(&mut graph, &map.sampler, "steps", params.steps.into())?;
        set_input(&mut graph, &map.sampler, "cfg", params.cfg.into())?;
        set_input(&mut graph, &map.positive_prompt, "text", params.prompt.clone().into())?;
        set_input(
            &mut graph,
            &map.negative_prompt,
            "text",
            params.negative_prompt.clone().into(),
        )?;
        set_input(&mut graph, &map.model, &map.model_field, params.model.clone().into())?;
        set_input(&mut graph, &map.latent, "width", params.width.into())?;
        set_input(&mut graph, &map.latent, "height", params.height.into())?;

        if map.has_lora() {
            if params.bypass_lora {
                set_input(&mut graph, &map.lora, "strength_model", serde_json::json!(0.0))?;
                set_input(&mut graph, &map.lora, "strength_clip", serde_json::json!(0.0))?;
            } else if let Some(lora) = params.lora.as_deref().filter(|l| !l.is_empty()) {
                set_input(&mut graph, &map.lora, &map.lora_field, lora.into())?;
            }
        }

        Ok(graph)
    }
}

/// Set `nodes[node_id].inputs[field] = value`, creating `inputs` if needed.
fn set_input(
    graph: &mut serde_json::Value,
    node_id: &str,
    field: &str,
    value: serde_json::Value,
) -> Result<(), CoreError> {
    let node_id = node_id.trim();
    if node_id.is_empty() || field.trim().is_empty() {
        return Ok(());
    }

    let node = graph
        .get_mut(node_id)
        .and_then(|n| n.as_object_mut())
        .ok_or_else(|| {
            CoreError::Validation(format!("Workflow node '{node_id}' is not an object"))
        })?;

    let inputs = node
        .entry("inputs")
        .or_insert_with(|| serde_json::Value::Object(Default::default()));

    let inputs = inputs.as_object_mut().ok_or_else(|| {
        CoreError::Validation(format!("Workflow node '{node_id}' has non-object inputs"))
    })?;

    inputs.insert(field.to_string(), value);
    Ok(())
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Model pool a workflow selects its base model from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelPool {
    Checkpoints,
    Unets,
}

/// Which model pool a workflow uses. Closed table, not inferred.
pub fn model_pool_for(workflow_id: &str) -> ModelPool {
    if CHECKPOINT_WORKFLOWS.contains(&workflow_id) {
        ModelPool::Checkpoints
    } else {
        ModelPool::Unets
    }
}

/// What the editor may offer for a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkflowCapabilities {
    pub model_pool: ModelPool,
    /// Whether the style-adapter selector applies.
    pub lora_enabled: bool,
}

impl WorkflowCapabilities {
    pub fn resolve(workflow_id: &str, map: &FieldMap) -> Self {
        Self {
            model_pool: model_pool_for(workflow_id),
            lora_enabled: map.has_lora(),
        }
    }

    /// Clear parameters the workflow cannot honour.
    ///
    /// With the adapter disabled, any chosen adapter and its bypass flag are
    /// removed so they are never submitted.
    pub fn scrub(&self, params: &mut GenerationParams) {
        if !self.lora_enabled {
            params.lora = None;
            params.bypass_lora = false;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
