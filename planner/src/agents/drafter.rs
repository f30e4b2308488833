//! Narrative plan drafting.
//!
//! The drafter only writes prose. Whether the draft is complete is decided
//! later by the plan formatter.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde::Serialize;

use crate::core::types::Variable;
use crate::core::variables::placeholder;
use crate::io::llm::{LanguageModel, invoke_text};
use crate::io::prompt::{PromptBuilder, PromptKind};
use crate::io::schema::strip_code_fence;

use super::{AgentSettings, request};

/// Everything the drafter sees. Variable values are withheld so they cannot
/// leak into the plan.
#[derive(Debug, Clone)]
pub struct DraftInput<'a> {
    pub objective: &'a str,
    pub variables: &'a [Variable],
    pub revision: u32,
    pub feedback: Option<&'a str>,
    pub previous_plan: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct VariableView<'a> {
    placeholder: String,
    description: &'a str,
}

#[derive(Debug, Serialize)]
struct DraftPrompt<'a> {
    objective: &'a str,
    variables: Vec<VariableView<'a>>,
    revision: u32,
    feedback: Option<&'a str>,
    previous_plan: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct DrafterAgent {
    agents_dir: PathBuf,
    settings: AgentSettings,
}

impl DrafterAgent {
    pub fn new(agents_dir: &Path, settings: AgentSettings) -> Self {
        Self {
            agents_dir: agents_dir.to_path_buf(),
            settings,
        }
    }

    pub fn run<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        root: &Path,
        input: &DraftInput<'_>,
    ) -> Result<String> {
        let context = DraftPrompt {
            objective: input.objective,
            variables: input
                .variables
                .iter()
                .map(|v| VariableView {
                    placeholder: placeholder(&v.name),
                    description: &v.description,
                })
                .collect(),
            revision: input.revision,
            feedback: input.feedback.map(str::trim).filter(|s| !s.is_empty()),
            previous_plan: input.previous_plan.map(str::trim).filter(|s| !s.is_empty()),
        };
        let prompt = PromptBuilder::new(self.settings.prompt_budget_bytes)
            .build(PromptKind::Draft, &context)?;
        let request = request(&self.agents_dir, "draft", root, prompt, None, self.settings);
        let answer = invoke_text(model, &request)?;
        let plan = strip_code_fence(&answer);
        if plan.is_empty() {
            bail!("drafter returned an empty plan");
        }
        let mut plan = plan.to_string();
        plan.push('\n');
        Ok(plan)
    }
}
