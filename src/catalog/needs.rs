//! Modules, steps and the per-step need rules.
//!
//! A [`NeedCatalog`] is loaded once (from `catalog.json`) and shared
//! read-only across sessions behind an `Arc`.  It doubles as the
//! [`ModuleSource`] the coach uses to fetch remedial modules when branching.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::matcher::ItemMatcher;

// ---------------------------------------------------------------------------
// CatalogError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CatalogError {
    /// No module with this id exists in the catalog.
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    /// The module exists but has no steps to teach.
    #[error("module {0} has no steps")]
    EmptyModule(String),

    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// StepNeeds
// ---------------------------------------------------------------------------

/// A forbidden item that diverts the trainee into a remedial module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRule {
    pub item: String,
    #[serde(rename = "module")]
    pub remedial_module_id: String,
}

/// Items the camera must (or must not) see while a step is active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepNeeds {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub forbidden: Vec<String>,
    #[serde(default)]
    pub branch_on: Vec<BranchRule>,
}

impl StepNeeds {
    /// Branch rule whose item matches `forbidden_item`, if any.
    pub fn branch_for(&self, forbidden_item: &str) -> Option<&BranchRule> {
        self.branch_on
            .iter()
            .find(|rule| rule.item.eq_ignore_ascii_case(forbidden_item))
    }
}

// ---------------------------------------------------------------------------
// CoachModule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub title: String,
    pub instruction: String,
    #[serde(default)]
    pub needs: StepNeeds,
}

/// A teachable module: the primary lesson or a short remedial branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachModule {
    /// Slug used as the catalog key, the session-store key and in prompts.
    pub id: String,
    pub title: String,
    pub steps: Vec<Step>,
}

static NO_NEEDS: StepNeeds = StepNeeds {
    required: Vec::new(),
    forbidden: Vec::new(),
    branch_on: Vec::new(),
};

impl CoachModule {
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// Needs of step `index`; steps without rules (or out of range) need nothing.
    pub fn needs(&self, index: usize) -> &StepNeeds {
        self.steps.get(index).map(|s| &s.needs).unwrap_or(&NO_NEEDS)
    }

    pub fn is_last_step(&self, index: usize) -> bool {
        index + 1 >= self.steps.len()
    }
}

// ---------------------------------------------------------------------------
// ModuleSource
// ---------------------------------------------------------------------------

/// Where module content comes from.  Loading may hit storage, hence async.
#[async_trait]
pub trait ModuleSource: Send + Sync {
    async fn load_module(&self, id: &str) -> Result<CoachModule, CatalogError>;
}

// ---------------------------------------------------------------------------
// NeedCatalog
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CatalogFile {
    modules: Vec<CoachModule>,
    #[serde(default)]
    synonyms: HashMap<String, Vec<String>>,
}

/// Static per-module, per-step need rules plus the label synonym table.
#[derive(Debug, Clone)]
pub struct NeedCatalog {
    modules: HashMap<String, CoachModule>,
    matcher: ItemMatcher,
}

impl NeedCatalog {
    pub fn new(modules: Vec<CoachModule>, matcher: ItemMatcher) -> Self {
        Self {
            modules: modules.into_iter().map(|m| (m.id.clone(), m)).collect(),
            matcher,
        }
    }

    /// Parse a catalog from JSON text.  Synonyms in the file extend the
    /// built-in table.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        let mut matcher = ItemMatcher::with_defaults();
        for (item, variants) in file.synonyms {
            matcher.add_synonyms(&item, variants);
        }
        Ok(Self::new(file.modules, matcher))
    }

    pub fn load_from(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn module(&self, id: &str) -> Option<&CoachModule> {
        self.modules.get(id)
    }

    /// Needs keyed by `(module, step)`; unknown keys need nothing.
    pub fn needs(&self, module_id: &str, step_index: usize) -> &StepNeeds {
        self.modules
            .get(module_id)
            .map(|m| m.needs(step_index))
            .unwrap_or(&NO_NEEDS)
    }

    pub fn matcher(&self) -> &ItemMatcher {
        &self.matcher
    }
}

#[async_trait]
impl ModuleSource for NeedCatalog {
    async fn load_module(&self, id: &str) -> Result<CoachModule, CatalogError> {
        let module = self
            .modules
            .get(id)
            .ok_or_else(|| CatalogError::ModuleNotFound(id.to_string()))?;
        if module.steps.is_empty() {
            return Err(CatalogError::EmptyModule(id.to_string()));
        }
        Ok(module.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "modules": [
            {
                "id": "food-prep",
                "title": "Food preparation",
                "steps": [
                    {
                        "title": "Check in",
                        "instruction": "Scan your badge on the reader.",
                        "needs": { "required": ["reader"] }
                    },
                    {
                        "title": "Prepare salad",
                        "instruction": "Wash and cut the lettuce.",
                        "needs": {
                            "required": ["lettuce", "knife"],
                            "forbidden": ["raw chicken"],
                            "branch_on": [{ "item": "raw chicken", "module": "handwashing" }]
                        }
                    }
                ]
            },
            {
                "id": "handwashing",
                "title": "Handwashing",
                "steps": [
                    { "title": "Soap", "instruction": "Lather for 20 seconds." },
                    { "title": "Rinse", "instruction": "Rinse under warm water." }
                ]
            },
            { "id": "empty", "title": "Nothing here", "steps": [] }
        ],
        "synonyms": { "reader": ["badge scanner"] }
    }"#;

    #[test]
    fn parses_modules_and_needs() {
        let catalog = NeedCatalog::from_json(CATALOG).unwrap();
        let needs = catalog.needs("food-prep", 1);
        assert_eq!(needs.required, vec!["lettuce", "knife"]);
        assert_eq!(needs.forbidden, vec!["raw chicken"]);
        assert_eq!(
            needs.branch_for("Raw Chicken").map(|r| r.remedial_module_id.as_str()),
            Some("handwashing")
        );
    }

    #[test]
    fn unknown_step_has_no_needs() {
        let catalog = NeedCatalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.needs("food-prep", 9), &StepNeeds::default());
        assert_eq!(catalog.needs("missing", 0), &StepNeeds::default());
        assert_eq!(catalog.needs("handwashing", 0), &StepNeeds::default());
    }

    #[test]
    fn file_synonyms_extend_matcher() {
        let catalog = NeedCatalog::from_json(CATALOG).unwrap();
        assert!(catalog.matcher().matches("reader", "Badge Scanner"));
    }

    #[test]
    fn last_step_detection() {
        let catalog = NeedCatalog::from_json(CATALOG).unwrap();
        let module = catalog.module("handwashing").unwrap();
        assert!(!module.is_last_step(0));
        assert!(module.is_last_step(1));
    }

    #[tokio::test]
    async fn load_module_reports_missing_and_empty() {
        let catalog = NeedCatalog::from_json(CATALOG).unwrap();
        assert!(catalog.load_module("handwashing").await.is_ok());
        assert!(matches!(
            catalog.load_module("nope").await,
            Err(CatalogError::ModuleNotFound(_))
        ));
        assert!(matches!(
            catalog.load_module("empty").await,
            Err(CatalogError::EmptyModule(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            NeedCatalog::from_json("{ not json"),
            Err(CatalogError::Parse(_))
        ));
    }
}
