//! In-process fakes shared by the handler and client tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use async_stream::stream;

use crate::audit::NoopAuditLog;
use crate::config::Config;
use crate::generation::context::StaticProjectContext;
use crate::generation::templates::InMemoryTemplateCatalog;
use crate::llm_client::{CompletionProvider, CompletionRequest, DeltaStream, LlmError, TextDelta};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub enum Step {
    Text(&'static str),
    /// Ends the sequence with a transport-style error.
    Fail,
    /// Never yields again.
    Hang,
}

/// A provider that replays a fixed script and records every request it gets.
pub struct ScriptedProvider {
    steps: Vec<Step>,
    handshake_error: Option<(u16, &'static str)>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps,
            handshake_error: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing_handshake(status: u16, message: &'static str) -> Arc<Self> {
        Arc::new(Self {
            steps: Vec::new(),
            handshake_error: Some((status, message)),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn stream(&self, request: CompletionRequest) -> Result<DeltaStream, LlmError> {
        self.requests.lock().unwrap().push(request);
        if let Some((status, message)) = self.handshake_error {
            return Err(LlmError::Api {
                status,
                message: message.to_string(),
            });
        }

        let steps = self.steps.clone();
        let deltas = stream! {
            for step in steps {
                match step {
                    Step::Text(text) => {
                        yield Ok(TextDelta(text.to_string()));
                    }
                    Step::Fail => {
                        yield Err(LlmError::Api {
                            status: 500,
                            message: "overloaded".to_string(),
                        });
                        return;
                    }
                    Step::Hang => std::future::pending::<()>().await,
                }
            }
        };
        Ok(Box::pin(deltas))
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }
}

/// State with an empty catalog, no briefings, no audit and `provider` as the
/// only provider.
pub fn test_state(provider: Option<Arc<ScriptedProvider>>) -> AppState {
    AppState {
        config: Config::default(),
        provider: provider.map(|p| p as Arc<dyn CompletionProvider>),
        templates: Arc::new(InMemoryTemplateCatalog::default()),
        projects: Arc::new(StaticProjectContext::default()),
        audit: Arc::new(NoopAuditLog),
    }
}
