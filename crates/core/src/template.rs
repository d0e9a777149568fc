//! Prompt template resolution.
//!
//! A prompt template may contain the placeholders `{character}`,
//! `{location}`, `{environment}` and `{style}` (matched case-insensitively).
//! Each placeholder is resolved either from an explicit value or by a
//! uniform random draw over its candidate list in the
//! [`TemplateLibrary`]. The random source is injected, so resolution is
//! deterministic under a seeded generator.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use rand::seq::IndexedRandom;
use rand::Rng;
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};

use crate::catalog::TemplateLibrary;

// ---------------------------------------------------------------------------
// Placeholders
// ---------------------------------------------------------------------------

/// A known template placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placeholder {
    Character,
    Location,
    Environment,
    Style,
}

impl Placeholder {
    /// Every placeholder, in editor order.
    pub const ALL: [Placeholder; 4] = [
        Placeholder::Character,
        Placeholder::Location,
        Placeholder::Environment,
        Placeholder::Style,
    ];

    /// Key used in `template_values` and inside the braces.
    pub fn key(self) -> &'static str {
        match self {
            Placeholder::Character => "character",
            Placeholder::Location => "location",
            Placeholder::Environment => "environment",
            Placeholder::Style => "style",
        }
    }

    /// Look a placeholder up by its key, case-insensitively.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.key().eq_ignore_ascii_case(key.trim()))
    }

    fn pattern(self) -> &'static Regex {
        match self {
            Placeholder::Character => &CHARACTER_RE,
            Placeholder::Location => &LOCATION_RE,
            Placeholder::Environment => &ENVIRONMENT_RE,
            Placeholder::Style => &STYLE_RE,
        }
    }
}

static CHARACTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\{character\}").expect("valid regex"));
static LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\{location\}").expect("valid regex"));
static ENVIRONMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\{environment\}").expect("valid regex"));
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\{style\}").expect("valid regex"));

// ---------------------------------------------------------------------------
// Selections
// ---------------------------------------------------------------------------

/// The user's choice for one placeholder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderChoice {
    /// Explicit value; may be empty.
    pub value: String,
    /// Draw a random candidate instead of using `value`.
    pub randomize: bool,
}

impl PlaceholderChoice {
    pub fn explicit(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            randomize: false,
        }
    }

    pub fn random() -> Self {
        Self {
            value: String::new(),
            randomize: true,
        }
    }

    /// Whether this choice contributes anything to the prompt.
    pub fn is_active(&self) -> bool {
        self.randomize || !self.value.is_empty()
    }
}

/// Choices for every placeholder. Missing entries resolve to empty.
pub type PlaceholderSelections = HashMap<Placeholder, PlaceholderChoice>;

/// Output of [`resolve_template`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPrompt {
    /// Fully substituted prompt sent for generation.
    pub prompt: String,
    /// Values actually used, keyed by placeholder key. Never holds an empty
    /// value.
    pub template_values: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve `template` against `selections`, drawing randomized values from
/// `library` with `rng`.
///
/// Every case-insensitive occurrence of each placeholder is replaced by its
/// resolved value; an empty value removes the token. Randomize with an
/// empty candidate list falls back to the explicit value.
pub fn resolve_template<R: Rng + ?Sized>(
    template: &str,
    selections: &PlaceholderSelections,
    library: &TemplateLibrary,
    rng: &mut R,
) -> ResolvedPrompt {
    let mut prompt = template.to_string();
    let mut template_values = BTreeMap::new();

    for placeholder in Placeholder::ALL {
        let value = resolve_value(placeholder, selections.get(&placeholder), library, rng);

        let pattern = placeholder.pattern();
        if pattern.is_match(&prompt) {
            prompt = pattern.replace_all(&prompt, NoExpand(&value)).into_owned();
        }

        if !value.is_empty() {
            template_values.insert(placeholder.key().to_string(), value);
        }
    }

    ResolvedPrompt {
        prompt,
        template_values,
    }
}

fn resolve_value<R: Rng + ?Sized>(
    placeholder: Placeholder,
    choice: Option<&PlaceholderChoice>,
    library: &TemplateLibrary,
    rng: &mut R,
) -> String {
    let Some(choice) = choice else {
        return String::new();
    };

    if choice.randomize {
        if let Some(picked) = library.candidates(placeholder).choose(rng) {
            return picked.clone();
        }
    }

    choice.value.clone()
}

/// List the known placeholders a template references, in editor order.
pub fn extract_placeholders(template: &str) -> Vec<Placeholder> {
    Placeholder::ALL
        .into_iter()
        .filter(|p| p.pattern().is_match(template))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn library() -> TemplateLibrary {
        TemplateLibrary {
            characters: vec!["knight".into(), "wizard".into(), "rogue".into()],
            locations: vec!["castle".into(), "forest".into()],
            environments: vec!["at dusk".into()],
            styles: vec!["oil painting".into(), "watercolor".into()],
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn template_without_placeholders_is_unchanged() {
        let template = "a quiet harbour, volumetric light";
        let resolved = resolve_template(template, &HashMap::new(), &library(), &mut rng());
        assert_eq!(resolved.prompt, template);
        assert!(resolved.template_values.is_empty());
    }

    #[test]
    fn explicit_values_substitute() {
        let selections = HashMap::from([
            (Placeholder::Character, PlaceholderChoice::explicit("knight")),
            (Placeholder::Location, PlaceholderChoice::explicit("castle")),
        ]);
        let resolved =
            resolve_template("{character} in {location}", &selections, &library(), &mut rng());

        assert_eq!(resolved.prompt, "knight in castle");
        assert_eq!(
            resolved.template_values,
            BTreeMap::from([
                ("character".to_string(), "knight".to_string()),
                ("location".to_string(), "castle".to_string()),
            ])
        );
    }

    #[test]
    fn all_placeholders_replaced_case_insensitively() {
        let selections = HashMap::from([
            (Placeholder::Character, PlaceholderChoice::explicit("A")),
            (Placeholder::Location, PlaceholderChoice::explicit("B")),
            (Placeholder::Environment, PlaceholderChoice::explicit("C")),
            (Placeholder::Style, PlaceholderChoice::explicit("D")),
        ]);
        let resolved = resolve_template(
            "{CHARACTER} {Location} {environment} {sTyLe} {character}",
            &selections,
            &library(),
            &mut rng(),
        );
        assert_eq!(resolved.prompt, "A B C D A");
    }

    #[test]
    fn empty_values_remove_token_and_are_not_recorded() {
        let selections = HashMap::from([
            (Placeholder::Character, PlaceholderChoice::explicit("knight")),
            (Placeholder::Style, PlaceholderChoice::explicit("")),
        ]);
        let resolved = resolve_template("{character}, {style}", &selections, &library(), &mut rng());

        assert_eq!(resolved.prompt, "knight, ");
        assert!(!resolved.template_values.contains_key("style"));
        assert!(resolved.template_values.values().all(|v| !v.is_empty()));
    }

    #[test]
    fn randomized_value_comes_from_candidates() {
        let selections = HashMap::from([(Placeholder::Character, PlaceholderChoice::random())]);
        let lib = library();
        let resolved = resolve_template("{character}", &selections, &lib, &mut rng());

        assert!(lib.characters.contains(&resolved.prompt));
        assert_eq!(resolved.template_values["character"], resolved.prompt);
    }

    #[test]
    fn randomized_resolution_is_repeatable_with_fixed_source() {
        let selections = HashMap::from([
            (Placeholder::Character, PlaceholderChoice::random()),
            (Placeholder::Style, PlaceholderChoice::random()),
        ]);
        let lib = library();
        let first = resolve_template("{character} / {style}", &selections, &lib, &mut rng());
        let second = resolve_template("{character} / {style}", &selections, &lib, &mut rng());
        assert_eq!(first, second);
    }

    #[test]
    fn randomize_with_empty_candidates_uses_explicit_value() {
        let selections = HashMap::from([(
            Placeholder::Location,
            PlaceholderChoice {
                value: "harbour".into(),
                randomize: true,
            },
        )]);
        let resolved = resolve_template(
            "{location}",
            &selections,
            &TemplateLibrary::default(),
            &mut rng(),
        );
        assert_eq!(resolved.prompt, "harbour");
    }

    #[test]
    fn replacement_is_literal() {
        let selections = HashMap::from([(Placeholder::Character, PlaceholderChoice::explicit("$1 ${x}"))]);
        let resolved = resolve_template("{character}", &selections, &library(), &mut rng());
        assert_eq!(resolved.prompt, "$1 ${x}");
    }

    #[test]
    fn extract_lists_used_placeholders_in_order() {
        assert_eq!(
            extract_placeholders("{STYLE} portrait of {character}"),
            vec![Placeholder::Character, Placeholder::Style]
        );
        assert!(extract_placeholders("{unknown}").is_empty());
    }

    #[test]
    fn from_key_is_case_insensitive() {
        assert_eq!(Placeholder::from_key("Environment"), Some(Placeholder::Environment));
        assert_eq!(Placeholder::from_key("weather"), None);
    }

    #[test]
    fn choice_activity() {
        assert!(!PlaceholderChoice::default().is_active());
        assert!(PlaceholderChoice::random().is_active());
        assert!(PlaceholderChoice::explicit("knight").is_active());
    }
}
