//! Project context: the per-project briefing handed to the prompt builder.
//!
//! Resolution of the owning project (and authorization) happens upstream; this
//! module only answers "what briefing does project X have". Briefings are written
//! by project members and are treated as untrusted text.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;

#[async_trait]
pub trait ProjectContextResolver: Send + Sync {
    /// The project's briefing, or `None` when it has none or is unknown.
    async fn briefing(&self, project_id: &str) -> Option<String>;
}

/// Briefings held in memory, optionally loaded from a JSON object
/// (`{"<project id>": "<briefing>"}`).
#[derive(Debug, Default)]
pub struct StaticProjectContext {
    briefings: HashMap<String, String>,
}

impl StaticProjectContext {
    pub fn new(briefings: HashMap<String, String>) -> Self {
        Self { briefings }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read projects file {}", path.display()))?;
        let briefings = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse projects file {}", path.display()))?;
        Ok(Self::new(briefings))
    }

    pub fn len(&self) -> usize {
        self.briefings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.briefings.is_empty()
    }
}

#[async_trait]
impl ProjectContextResolver for StaticProjectContext {
    async fn briefing(&self, project_id: &str) -> Option<String> {
        self.briefings
            .get(project_id)
            .filter(|b| !b.trim().is_empty())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blank_and_unknown_briefings_are_absent() {
        let context = StaticProjectContext::new(HashMap::from([
            ("p1".to_string(), "A payments platform.".to_string()),
            ("p2".to_string(), "   ".to_string()),
        ]));
        assert_eq!(
            context.briefing("p1").await.as_deref(),
            Some("A payments platform.")
        );
        assert_eq!(context.briefing("p2").await, None);
        assert_eq!(context.briefing("p3").await, None);
    }

    #[tokio::test]
    async fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.json");
        std::fs::write(&path, r#"{"web": "Customer-facing storefront."}"#).unwrap();

        let context = StaticProjectContext::from_file(&path).unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(
            context.briefing("web").await.as_deref(),
            Some("Customer-facing storefront.")
        );
    }
}
