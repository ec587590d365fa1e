//! Prompt builder: turns a validated [`GenerationRequest`] into the system and
//! user instructions. Pure: no I/O, never fails.

use crate::generation::models::{GenerationRequest, LegacyMode, PromptMode};
use crate::generation::prompts::{
    BRIEFING_TEMPLATE, FREE_INSTRUCTION_PREAMBLE, GENERATE_PREAMBLE, HOUSE_RULES,
    IMPROVE_PREAMBLE, INJECTION_DEFENSE_TEMPLATE, REFUSAL_SENTENCE,
};
use crate::generation::templates::InstructionTemplate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Builds both instructions. `template` is the resolved instruction template when
/// the request is in template mode; if it is missing the user instruction
/// degrades to an empty string.
pub fn build_prompt(request: &GenerationRequest, template: Option<&InstructionTemplate>) -> Prompt {
    let user = match &request.mode {
        PromptMode::Template(_) => template
            .map(|t| interpolate(&t.body, request))
            .unwrap_or_default(),
        PromptMode::Instruction(instruction) => format!(
            "{FREE_INSTRUCTION_PREAMBLE}\n\nInstruction:\n{}\n\nWork item:\n{}",
            instruction.trim(),
            render_context(request, true)
        ),
        PromptMode::Legacy(LegacyMode::Generate) => {
            format!("{GENERATE_PREAMBLE}\n\n{}", render_context(request, false))
        }
        PromptMode::Legacy(LegacyMode::Improve) => {
            format!("{IMPROVE_PREAMBLE}\n\n{}", render_context(request, true))
        }
    };

    Prompt {
        system: build_system(request.project_briefing.as_deref()),
        user,
    }
}

fn build_system(briefing: Option<&str>) -> String {
    let mut system = format!(
        "{HOUSE_RULES}\n\n{}",
        INJECTION_DEFENSE_TEMPLATE.replace("{refusal}", REFUSAL_SENTENCE)
    );
    if let Some(briefing) = briefing {
        system.push_str("\n\n");
        system.push_str(&BRIEFING_TEMPLATE.replace("{briefing}", briefing.trim()));
    }
    system
}

/// Title, then priority, tags and current text when present.
fn render_context(request: &GenerationRequest, include_current: bool) -> String {
    let mut lines = vec![format!("Title: {}", request.title)];
    if let Some(priority) = &request.priority {
        lines.push(format!("Priority: {priority}"));
    }
    if !request.tags.is_empty() {
        lines.push(format!("Tags: {}", request.tags.join(", ")));
    }
    if include_current {
        if let Some(current) = &request.current_text {
            lines.push(String::new());
            lines.push("Current description:".to_string());
            lines.push(current.trim_end().to_string());
        }
    }
    lines.join("\n")
}

/// Single left-to-right pass over `body`.
///
/// `{title}`, `{description}`, `{tags}` (comma-joined) and `{priority}` are
/// replaced; any other `{identifier}` becomes empty. Substituted text is never
/// rescanned, and braces that do not enclose an identifier are kept verbatim.
pub fn interpolate(body: &str, request: &GenerationRequest) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let placeholder = after
            .find('}')
            .map(|close| (&after[..close], close))
            .filter(|(name, _)| is_identifier(name));

        match placeholder {
            Some((name, close)) => {
                push_variable(&mut out, name, request);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn push_variable(out: &mut String, name: &str, request: &GenerationRequest) {
    match name {
        "title" => out.push_str(&request.title),
        "description" => out.push_str(request.current_text.as_deref().unwrap_or_default()),
        "tags" => out.push_str(&request.tags.join(", ")),
        "priority" => out.push_str(request.priority.as_deref().unwrap_or_default()),
        _ => {}
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
