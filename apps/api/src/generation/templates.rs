//! Instruction templates ("skills"): administrator-defined prompt bodies with
//! `{title}`, `{description}`, `{tags}` and `{priority}` placeholders.
//!
//! The catalog is owned elsewhere; this service only reads it. `AppState` holds an
//! `Arc<dyn TemplateCatalog>`; the default backend is a JSON file loaded at start-up.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Who may use a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TemplateScope {
    Global,
    Project(String),
}

impl TemplateScope {
    pub fn visible_to(&self, project_id: &str) -> bool {
        match self {
            TemplateScope::Global => true,
            TemplateScope::Project(id) => id == project_id,
        }
    }
}

impl TryFrom<String> for TemplateScope {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "global" {
            return Ok(TemplateScope::Global);
        }
        match value.strip_prefix("project:") {
            Some(id) if !id.is_empty() => Ok(TemplateScope::Project(id.to_string())),
            _ => Err(format!(
                "scope must be 'global' or 'project:<id>', got '{value}'"
            )),
        }
    }
}

impl From<TemplateScope> for String {
    fn from(scope: TemplateScope) -> Self {
        scope.to_string()
    }
}

impl fmt::Display for TemplateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateScope::Global => f.write_str("global"),
            TemplateScope::Project(id) => write!(f, "project:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionTemplate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub body: String,
    #[serde(default = "default_scope")]
    pub scope: TemplateScope,
}

fn default_scope() -> TemplateScope {
    TemplateScope::Global
}

/// Read-only view of the template catalog.
#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    async fn lookup(&self, id: &str) -> Option<InstructionTemplate>;

    /// Every template, in catalog order.
    async fn list(&self) -> Vec<InstructionTemplate>;
}

/// Catalog held in memory, optionally loaded from a JSON array on disk.
#[derive(Debug, Default)]
pub struct InMemoryTemplateCatalog {
    templates: Vec<InstructionTemplate>,
    by_id: HashMap<String, usize>,
}

impl InMemoryTemplateCatalog {
    pub fn new(templates: Vec<InstructionTemplate>) -> Self {
        let by_id = templates
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        Self { templates, by_id }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read skills file {}", path.display()))?;
        let templates: Vec<InstructionTemplate> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse skills file {}", path.display()))?;
        Ok(Self::new(templates))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[async_trait]
impl TemplateCatalog for InMemoryTemplateCatalog {
    async fn lookup(&self, id: &str) -> Option<InstructionTemplate> {
        self.by_id.get(id).map(|&i| self.templates[i].clone())
    }

    async fn list(&self) -> Vec<InstructionTemplate> {
        self.templates.clone()
    }
}
