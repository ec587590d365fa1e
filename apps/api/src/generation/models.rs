//! Request types for description generation.
//!
//! `DescribeBody` is the JSON wire shape shared by the handler and the client
//! consumer. `GenerationRequest` is the validated form the prompt builder reads.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Body of `POST /api/v1/projects/:project_id/describe`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeBody {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// Instruction-template id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_id: Option<String>,
    /// Free-text instruction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
    /// `"generate"` or `"improve"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyMode {
    Generate,
    Improve,
}

impl LegacyMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "generate" => Some(LegacyMode::Generate),
            "improve" => Some(LegacyMode::Improve),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LegacyMode::Generate => "generate",
            LegacyMode::Improve => "improve",
        }
    }
}

/// Where the user instruction comes from, in precedence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptMode {
    Template(String),
    Instruction(String),
    Legacy(LegacyMode),
}

impl PromptMode {
    /// Like `Display` but without the free-instruction text, for `info` logs.
    pub fn log_label(&self) -> String {
        match self {
            PromptMode::Instruction(_) => "prompt".to_string(),
            other => other.to_string(),
        }
    }
}

/// Short label recorded in the audit log instead of the full prompt.
impl fmt::Display for PromptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptMode::Template(id) => write!(f, "skill:{id}"),
            PromptMode::Instruction(text) => write!(f, "prompt:{text}"),
            PromptMode::Legacy(mode) => write!(f, "mode:{}", mode.as_str()),
        }
    }
}

/// A validated generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub title: String,
    /// `None` when absent or blank.
    pub current_text: Option<String>,
    pub tags: Vec<String>,
    pub priority: Option<String>,
    /// Resolved by the project context collaborator; untrusted.
    pub project_briefing: Option<String>,
    pub mode: PromptMode,
}

impl GenerationRequest {
    /// Validates the wire body.
    ///
    /// Template id beats free instruction beats legacy mode. Without any of them
    /// the mode is `improve` when there is current text, `generate` otherwise.
    pub fn from_body(body: DescribeBody, project_briefing: Option<String>) -> Result<Self, AppError> {
        let title = body.title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("title cannot be empty".to_string()));
        }

        let legacy = match body.mode.as_deref() {
            Some(value) => Some(LegacyMode::parse(value).ok_or_else(|| {
                AppError::Validation(format!(
                    "mode must be 'generate' or 'improve', got '{value}'"
                ))
            })?),
            None => None,
        };

        let current_text = non_blank(body.description);

        let mode = if let Some(id) = non_blank(body.skill_id) {
            PromptMode::Template(id.trim().to_string())
        } else if let Some(instruction) = non_blank(body.user_prompt) {
            PromptMode::Instruction(instruction)
        } else {
            PromptMode::Legacy(legacy.unwrap_or(if current_text.is_some() {
                LegacyMode::Improve
            } else {
                LegacyMode::Generate
            }))
        };

        Ok(Self {
            title: title.to_string(),
            current_text,
            tags: body
                .tags
                .unwrap_or_default()
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            priority: non_blank(body.priority),
            project_briefing: non_blank(project_briefing),
            mode,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(title: &str) -> DescribeBody {
        DescribeBody {
            title: title.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_wire_body_uses_camel_case() {
        let parsed: DescribeBody = serde_json::from_str(
            r#"{"title":"Ship v2","skillId":"s1","userPrompt":"shorter","tags":["a"],"mode":"improve"}"#,
        )
        .unwrap();
        assert_eq!(parsed.skill_id.as_deref(), Some("s1"));
        assert_eq!(parsed.user_prompt.as_deref(), Some("shorter"));
        assert_eq!(parsed.tags, Some(vec!["a".to_string()]));

        let json = serde_json::to_value(body("x")).unwrap();
        assert_eq!(json, serde_json::json!({"title": "x"}));
    }

    #[test]
    fn test_missing_or_blank_title_is_rejected() {
        let missing: DescribeBody = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            GenerationRequest::from_body(missing, None),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            GenerationRequest::from_body(body("   "), None),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_log_label_omits_instruction_text() {
        assert_eq!(
            PromptMode::Instruction("rewrite with my phone number".into()).log_label(),
            "prompt"
        );
        assert_eq!(PromptMode::Template("bug".into()).log_label(), "skill:bug");
        assert_eq!(
            PromptMode::Legacy(LegacyMode::Improve).log_label(),
            "mode:improve"
        );
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let mut b = body("Fix login bug");
        b.mode = Some("rewrite".to_string());
        assert!(matches!(
            GenerationRequest::from_body(b, None),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_mode_derived_from_current_text() {
        let generate = GenerationRequest::from_body(body("Fix login bug"), None).unwrap();
        assert_eq!(generate.mode, PromptMode::Legacy(LegacyMode::Generate));

        let mut b = body("Fix login bug");
        b.description = Some("it's broken".to_string());
        let improve = GenerationRequest::from_body(b, None).unwrap();
        assert_eq!(improve.mode, PromptMode::Legacy(LegacyMode::Improve));

        let mut blank = body("Fix login bug");
        blank.description = Some("  \n".to_string());
        let derived = GenerationRequest::from_body(blank, None).unwrap();
        assert_eq!(derived.current_text, None);
        assert_eq!(derived.mode, PromptMode::Legacy(LegacyMode::Generate));
    }

    #[test]
    fn test_precedence_template_then_instruction_then_mode() {
        let mut b = body("Ship v2");
        b.skill_id = Some("summary".to_string());
        b.user_prompt = Some("make it shorter".to_string());
        b.mode = Some("generate".to_string());
        let request = GenerationRequest::from_body(b.clone(), None).unwrap();
        assert_eq!(request.mode, PromptMode::Template("summary".to_string()));

        b.skill_id = Some(" ".to_string());
        let request = GenerationRequest::from_body(b.clone(), None).unwrap();
        assert_eq!(
            request.mode,
            PromptMode::Instruction("make it shorter".to_string())
        );

        b.user_prompt = None;
        b.description = Some("existing".to_string());
        let request = GenerationRequest::from_body(b, None).unwrap();
        assert_eq!(request.mode, PromptMode::Legacy(LegacyMode::Generate));
    }

    #[test]
    fn test_tags_priority_and_briefing_are_normalised() {
        let mut b = body("  Ship v2 ");
        b.tags = Some(vec![" backend ".to_string(), "".to_string()]);
        b.priority = Some(" ".to_string());
        let request = GenerationRequest::from_body(b, Some("\n".to_string())).unwrap();
        assert_eq!(request.title, "Ship v2");
        assert_eq!(request.tags, vec!["backend".to_string()]);
        assert_eq!(request.priority, None);
        assert_eq!(request.project_briefing, None);
    }

    #[test]
    fn test_prompt_mode_audit_labels() {
        assert_eq!(PromptMode::Template("s1".into()).to_string(), "skill:s1");
        assert_eq!(
            PromptMode::Instruction("what is rust".into()).to_string(),
            "prompt:what is rust"
        );
        assert_eq!(
            PromptMode::Legacy(LegacyMode::Improve).to_string(),
            "mode:improve"
        );
    }
}
