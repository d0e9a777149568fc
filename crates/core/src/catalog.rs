//! Externally supplied catalogues: the model inventory and the template
//! library that placeholder randomization draws from.

use serde::{Deserialize, Serialize};

use crate::template::Placeholder;
use crate::workflow::ModelPool;

/// Model inventory reported by `GET /models`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalog {
    /// Full checkpoints (model + CLIP + VAE in one file).
    #[serde(default)]
    pub checkpoints: Vec<String>,
    /// Diffusion backbones loaded without bundled text encoders.
    #[serde(default)]
    pub unets: Vec<String>,
    /// Style adapters.
    #[serde(default)]
    pub loras: Vec<String>,
}

impl ModelCatalog {
    /// Models selectable for a workflow drawing from `pool`.
    pub fn models_for(&self, pool: ModelPool) -> &[String] {
        match pool {
            ModelPool::Checkpoints => &self.checkpoints,
            ModelPool::Unets => &self.unets,
        }
    }
}

/// Candidate lists per placeholder, as served by `GET /templates`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateLibrary {
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub environments: Vec<String>,
    #[serde(default)]
    pub styles: Vec<String>,
}

impl TemplateLibrary {
    /// Candidates for a single placeholder.
    pub fn candidates(&self, placeholder: Placeholder) -> &[String] {
        match placeholder {
            Placeholder::Character => &self.characters,
            Placeholder::Location => &self.locations,
            Placeholder::Environment => &self.environments,
            Placeholder::Style => &self.styles,
        }
    }

    /// Add a candidate unless an identical entry already exists.
    ///
    /// Returns `true` if the library changed. Blank values are ignored.
    pub fn add_candidate(&mut self, placeholder: Placeholder, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() {
            return false;
        }
        let list = match placeholder {
            Placeholder::Character => &mut self.characters,
            Placeholder::Location => &mut self.locations,
            Placeholder::Environment => &mut self.environments,
            Placeholder::Style => &mut self.styles,
        };
        if list.iter().any(|existing| existing == value) {
            return false;
        }
        list.push(value.to_string());
        true
    }
}
