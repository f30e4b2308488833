//! Prompt rendering with per-phase templates and a byte budget.
//!
//! Templates mark sections with `<!-- section:KEY required|droppable -->`.
//! When a rendered prompt exceeds the budget, droppable sections are removed
//! in the template's drop order, then the last section is truncated.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, UndefinedBehavior};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::WorkflowError;

const VARIABLES_TEMPLATE: &str = include_str!("prompts/variables.md");
const DRAFT_TEMPLATE: &str = include_str!("prompts/draft.md");
const BREAKDOWN_TEMPLATE: &str = include_str!("prompts/breakdown.md");
const EXECUTE_TEMPLATE: &str = include_str!("prompts/execute.md");
const VALIDATE_TEMPLATE: &str = include_str!("prompts/validate.md");

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section regex")
});

const TRUNCATION_MARK: &str = "\n[truncated]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Variables,
    Draft,
    Breakdown,
    Execute,
    Validate,
}

impl PromptKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Variables => "variables",
            Self::Draft => "draft",
            Self::Breakdown => "breakdown",
            Self::Execute => "execute",
            Self::Validate => "validate",
        }
    }

    fn source(self) -> &'static str {
        match self {
            Self::Variables => VARIABLES_TEMPLATE,
            Self::Draft => DRAFT_TEMPLATE,
            Self::Breakdown => BREAKDOWN_TEMPLATE,
            Self::Execute => EXECUTE_TEMPLATE,
            Self::Validate => VALIDATE_TEMPLATE,
        }
    }

    /// Droppable sections, least valuable first.
    fn drop_order(self) -> &'static [&'static str] {
        match self {
            Self::Variables => &[],
            Self::Draft => &["previous", "feedback"],
            Self::Breakdown => &["siblings"],
            Self::Execute => &["guidance", "patterns"],
            Self::Validate => &["guidance", "trace"],
        }
    }
}

#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

/// Renders one prompt per call within a byte budget.
#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    /// Render `kind` with `context`. Any template failure is a
    /// [`WorkflowError::TemplateRenderError`] and yields no prompt.
    pub fn build<C: Serialize>(&self, kind: PromptKind, context: &C) -> Result<String> {
        let rendered = render(kind, context)?;
        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, kind.drop_order(), self.budget_bytes);
        Ok(join_sections(&sections))
    }
}

fn render<C: Serialize>(kind: PromptKind, context: &C) -> Result<String> {
    let to_error = |err: minijinja::Error| WorkflowError::TemplateRenderError {
        template: kind.name().to_string(),
        message: err.to_string(),
    };
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template(kind.name(), kind.source())
        .map_err(to_error)?;
    let rendered = env
        .get_template(kind.name())
        .and_then(|template| template.render(context))
        .map_err(to_error)?;
    Ok(rendered)
}

fn parse_sections(rendered: &str) -> Vec<Section> {
    let markers: Vec<_> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                whole.start(),
                whole.end(),
                caps.get(1)?.as_str().to_string(),
                caps.get(2)?.as_str() == "required",
            ))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, end, key, required)) in markers.iter().enumerate() {
        let next = markers.get(i + 1).map_or(rendered.len(), |m| m.0);
        let content = rendered[*end..next].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(Section {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[Section]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

fn apply_budget(sections: &mut Vec<Section>, drop_order: &[&str], budget: usize) {
    for key in drop_order {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    let Some(last) = sections.last_mut() else {
        return;
    };
    if total <= budget {
        return;
    }
    let allowed = budget.saturating_sub(total - last.content.len());
    let before_len = last.content.len();
    let mut cut = allowed.saturating_sub(TRUNCATION_MARK.len());
    while !last.content.is_char_boundary(cut) {
        cut -= 1;
    }
    last.content.truncate(cut);
    last.content.push_str(TRUNCATION_MARK);
    debug!(
        section = %last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn join_sections(sections: &[Section]) -> String {
    let mut out = sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    out.push('\n');
    out
}
