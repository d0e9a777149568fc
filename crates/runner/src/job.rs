//! Generation job description read from environment variables.

use anyhow::{bail, Context};
use comfystudio_core::catalog::ModelCatalog;
use comfystudio_core::dimensions::Orientation;
use comfystudio_core::editor::EditorState;
use comfystudio_core::template::{Placeholder, PlaceholderChoice};
use comfystudio_core::workflow::model_pool_for;

/// Placeholder value that requests a random draw from the library.
pub const RANDOM_MARKER: &str = "random";

/// Which project the job runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectTarget {
    /// Open an existing project.
    Id(String),
    /// Open the project with this name, creating it if absent.
    Name(String),
}

/// One generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub project: ProjectTarget,
    pub prompt_template: String,
    pub placeholders: Vec<(Placeholder, PlaceholderChoice)>,
    pub negative_prompt: Option<String>,
    pub workflow: Option<String>,
    pub model: Option<String>,
    pub lora: Option<String>,
    pub bypass_lora: bool,
    pub aspect_ratio: Option<String>,
    pub orientation: Option<Orientation>,
    pub width: Option<i64>,
    pub steps: Option<u32>,
    pub cfg: Option<f64>,
    pub seed: Option<i64>,
}

impl JobSpec {
    /// Read the job from the process environment.
    ///
    /// | Variable          | Required | Description                                 |
    /// |-------------------|----------|---------------------------------------------|
    /// | `PROJECT_ID`      | one of   | Existing project to open                    |
    /// | `PROJECT_NAME`    | one of   | Project to open or create by name           |
    /// | `PROMPT_TEMPLATE` | yes      | Template, may contain `{character}` etc.    |
    /// | `CHARACTER`       | no       | Value, or `random` to draw from the library |
    /// | `LOCATION`        | no       | As above                                    |
    /// | `ENVIRONMENT`     | no       | As above                                    |
    /// | `STYLE`           | no       | As above                                    |
    /// | `NEGATIVE_PROMPT` | no       |                                             |
    /// | `WORKFLOW`        | no       | Workflow id                                 |
    /// | `MODEL`           | no       | Defaults to the first model of the pool     |
    /// | `LORA`            | no       | Style adapter                               |
    /// | `BYPASS_LORA`     | no       | `true` to bypass the adapter                |
    /// | `ASPECT_RATIO`    | no       | `W:H`                                       |
    /// | `ORIENTATION`     | no       | `portrait` or `landscape`                   |
    /// | `WIDTH`           | no       | Output width                                |
    /// | `STEPS`           | no       | Sampler steps                               |
    /// | `CFG`             | no       | Guidance scale                              |
    /// | `SEED`            | no       | Random when unset                           |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the job through `lookup`. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let project = match (get("PROJECT_ID"), get("PROJECT_NAME")) {
            (Some(id), _) => ProjectTarget::Id(id),
            (None, Some(name)) => ProjectTarget::Name(name),
            (None, None) => bail!("PROJECT_ID or PROJECT_NAME must be set"),
        };

        let Some(prompt_template) = get("PROMPT_TEMPLATE") else {
            bail!("PROMPT_TEMPLATE must be set");
        };

        let placeholders = Placeholder::ALL
            .into_iter()
            .filter_map(|p| {
                let value = get(&p.key().to_ascii_uppercase())?;
                let choice = if value.eq_ignore_ascii_case(RANDOM_MARKER) {
                    PlaceholderChoice::random()
                } else {
                    PlaceholderChoice::explicit(value)
                };
                Some((p, choice))
            })
            .collect();

        Ok(Self {
            project,
            prompt_template,
            placeholders,
            negative_prompt: get("NEGATIVE_PROMPT"),
            workflow: get("WORKFLOW"),
            model: get("MODEL"),
            lora: get("LORA"),
            bypass_lora: get("BYPASS_LORA").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            aspect_ratio: get("ASPECT_RATIO"),
            orientation: get("ORIENTATION").map(|v| Orientation::parse_or_default(&v)),
            width: parse_opt(get("WIDTH"), "WIDTH")?,
            steps: parse_opt(get("STEPS"), "STEPS")?,
            cfg: parse_opt(get("CFG"), "CFG")?,
            seed: parse_opt(get("SEED"), "SEED")?,
        })
    }

    /// Write the job into `editor`.
    ///
    /// Without an explicit model the first model of the workflow's pool is
    /// used; a catalogue with no such model is an error.
    pub fn apply(&self, editor: &mut EditorState, models: &ModelCatalog) -> anyhow::Result<()> {
        if let Some(workflow) = &self.workflow {
            editor.workflow = workflow.clone();
        }

        editor.model = match &self.model {
            Some(model) => model.clone(),
            None => models
                .models_for(model_pool_for(&editor.workflow))
                .first()
                .cloned()
                .with_context(|| {
                    format!("No model available for workflow '{}'", editor.workflow)
                })?,
        };

        editor.prompt_template = self.prompt_template.clone();
        editor.placeholders.clear();
        for (placeholder, choice) in &self.placeholders {
            editor.set_placeholder(*placeholder, choice.clone());
        }

        if let Some(negative) = &self.negative_prompt {
            editor.negative_prompt = negative.clone();
        }
        editor.lora = self.lora.clone();
        editor.bypass_lora = self.bypass_lora;
        if let Some(ratio) = &self.aspect_ratio {
            editor.aspect_ratio = ratio.clone();
        }
        if let Some(orientation) = self.orientation {
            editor.orientation = orientation;
        }
        if self.width.is_some() {
            editor.width = self.width;
        }
        if let Some(steps) = self.steps {
            editor.steps = steps;
        }
        if let Some(cfg) = self.cfg {
            editor.cfg = cfg;
        }
        if let Some(seed) = self.seed {
            editor.seed = seed;
        }
        Ok(())
    }
}

fn parse_opt<T>(value: Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|v| v.parse::<T>().with_context(|| format!("{key} is not valid: {v}")))
        .transpose()
}
