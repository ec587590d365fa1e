use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::audit::{AuditLog, FileAuditLog, NoopAuditLog};
use crate::config::Config;
use crate::generation::context::{ProjectContextResolver, StaticProjectContext};
use crate::generation::templates::{InMemoryTemplateCatalog, TemplateCatalog};
use crate::llm_client::{CompletionProvider, Provider};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// `None` when no provider is configured; generation answers 501.
    pub provider: Option<Arc<dyn CompletionProvider>>,
    pub templates: Arc<dyn TemplateCatalog>,
    pub projects: Arc<dyn ProjectContextResolver>,
    /// Refusal entries go here. `NoopAuditLog` unless `AI_DEBUG` is on.
    pub audit: Arc<dyn AuditLog>,
}

impl AppState {
    /// Wires the default collaborators from configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let audit: Arc<dyn AuditLog> = if config.ai_debug {
            info!("AI debug logging enabled ({})", config.ai_log_path.display());
            Arc::new(FileAuditLog::new(config.ai_log_path.clone()))
        } else {
            Arc::new(NoopAuditLog)
        };

        let provider = match config.provider.clone() {
            Some(provider_config) => {
                let exchange_log = config.ai_debug.then(|| audit.clone());
                let provider = Provider::from_config(provider_config, exchange_log)?;
                info!(
                    "AI provider initialized ({}, model: {})",
                    provider.name(),
                    provider.model()
                );
                Some(Arc::new(provider) as Arc<dyn CompletionProvider>)
            }
            None => {
                info!("No AI provider configured; description generation is disabled");
                None
            }
        };

        let templates = match &config.skills_path {
            Some(path) => InMemoryTemplateCatalog::from_file(path)?,
            None => InMemoryTemplateCatalog::default(),
        };
        info!("Instruction templates loaded: {}", templates.len());

        let projects = match &config.projects_path {
            Some(path) => StaticProjectContext::from_file(path)?,
            None => StaticProjectContext::default(),
        };
        info!("Project briefings loaded: {}", projects.len());

        Ok(AppState {
            config,
            provider,
            templates: Arc::new(templates),
            projects: Arc::new(projects),
            audit,
        })
    }
}
