//! Editable generation parameters and request composition.
//!
//! [`EditorState`] holds what the user has typed or chosen. Selecting a
//! node repopulates it from that node's parameters; submitting turns it into
//! concrete [`GenerationParams`] through template resolution, dimension
//! derivation and the workflow capability scrub.

use rand::Rng;

use crate::catalog::TemplateLibrary;
use crate::dimensions::{derive_dimensions, Orientation, DEFAULT_ASPECT_RATIO, DEFAULT_WIDTH};
use crate::node::{GenerationParams, LEGACY_CFG, LEGACY_STEPS};
use crate::template::{resolve_template, Placeholder, PlaceholderChoice, PlaceholderSelections};
use crate::workflow::{WorkflowCapabilities, WORKFLOW_T2I_SDXL};

/// Upper bound (exclusive) for randomly drawn seeds.
pub const SEED_RANGE_END: i64 = 1_000_000_000;

/// Draw a fresh generation seed.
pub fn random_seed<R: Rng + ?Sized>(rng: &mut R) -> i64 {
    rng.random_range(0..SEED_RANGE_END)
}

/// Parameters as held by the editor, before resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorState {
    pub workflow: String,
    pub prompt_template: String,
    pub placeholders: PlaceholderSelections,
    pub negative_prompt: String,
    pub model: String,
    pub lora: Option<String>,
    pub bypass_lora: bool,
    pub seed: i64,
    pub steps: u32,
    pub cfg: f64,
    /// Raw width input; absent or non-positive falls back to the default.
    pub width: Option<i64>,
    pub aspect_ratio: String,
    pub orientation: Orientation,
}

impl Default for EditorState {
    fn default() -> Self {
        Self {
            workflow: WORKFLOW_T2I_SDXL.to_string(),
            prompt_template: String::new(),
            placeholders: PlaceholderSelections::new(),
            negative_prompt: String::new(),
            model: String::new(),
            lora: None,
            bypass_lora: false,
            seed: 0,
            steps: LEGACY_STEPS,
            cfg: LEGACY_CFG,
            width: Some(i64::from(DEFAULT_WIDTH)),
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
            orientation: Orientation::Landscape,
        }
    }
}

impl EditorState {
    /// Repopulate the editor from a node's parameters.
    ///
    /// A placeholder is restored as an explicit choice iff `template_values`
    /// holds a value for it. Nodes without a stored template fall back to
    /// their substituted prompt.
    pub fn from_params(params: &GenerationParams) -> Self {
        let placeholders = Placeholder::ALL
            .into_iter()
            .filter_map(|p| {
                let value = params.template_values.get(p.key())?;
                (!value.is_empty()).then(|| (p, PlaceholderChoice::explicit(value.clone())))
            })
            .collect();

        let prompt_template = if params.prompt_template.is_empty() {
            params.prompt.clone()
        } else {
            params.prompt_template.clone()
        };

        Self {
            workflow: params.workflow.clone(),
            prompt_template,
            placeholders,
            negative_prompt: params.negative_prompt.clone(),
            model: params.model.clone(),
            lora: params.lora.clone(),
            bypass_lora: params.bypass_lora,
            seed: params.seed,
            steps: params.steps,
            cfg: params.cfg,
            width: Some(i64::from(params.width)),
            aspect_ratio: params.aspect_ratio.clone(),
            orientation: params.orientation,
        }
    }

    /// Set the choice for one placeholder. Inactive choices are removed.
    pub fn set_placeholder(&mut self, placeholder: Placeholder, choice: PlaceholderChoice) {
        if choice.is_active() {
            self.placeholders.insert(placeholder, choice);
        } else {
            self.placeholders.remove(&placeholder);
        }
    }

    /// Compose the concrete parameters for a generation request.
    pub fn build_params<R: Rng + ?Sized>(
        &self,
        library: &TemplateLibrary,
        capabilities: &WorkflowCapabilities,
        rng: &mut R,
    ) -> GenerationParams {
        let resolved = resolve_template(&self.prompt_template, &self.placeholders, library, rng);
        let (width, height) = derive_dimensions(self.width, &self.aspect_ratio, self.orientation);

        let mut params = GenerationParams {
            workflow: self.workflow.clone(),
            prompt: resolved.prompt,
            prompt_template: self.prompt_template.clone(),
            template_values: resolved.template_values,
            negative_prompt: self.negative_prompt.clone(),
            model: self.model.clone(),
            lora: self.lora.clone().filter(|l| !l.is_empty()),
            bypass_lora: self.bypass_lora,
            seed: self.seed,
            steps: self.steps,
            cfg: self.cfg,
            width,
            height,
            aspect_ratio: self.aspect_ratio.clone(),
            orientation: self.orientation,
        };
        capabilities.scrub(&mut params);
        params
    }
}
