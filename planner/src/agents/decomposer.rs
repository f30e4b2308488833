//! Step breakdown agent.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use crate::core::types::{BreakdownResponse, Plan, Step};
use crate::io::llm::{LanguageModel, invoke_structured};
use crate::io::prompt::{PromptBuilder, PromptKind};
use crate::io::schema::Schema;

use super::{AgentSettings, request, write_output_schema};

#[derive(Debug, Serialize)]
struct Sibling<'a> {
    index: usize,
    title: &'a str,
}

#[derive(Debug, Serialize)]
struct BreakdownPrompt<'a> {
    objective: &'a str,
    index: usize,
    step: &'a Step,
    siblings: Vec<Sibling<'a>>,
}

#[derive(Debug, Clone)]
pub struct DecomposerAgent {
    agents_dir: PathBuf,
    settings: AgentSettings,
}

impl DecomposerAgent {
    pub fn new(agents_dir: &Path, settings: AgentSettings) -> Self {
        Self {
            agents_dir: agents_dir.to_path_buf(),
            settings,
        }
    }

    /// Ask whether step `index` (1-based) of `plan` needs splitting.
    pub fn run<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        root: &Path,
        plan: &Plan,
        index: usize,
    ) -> Result<BreakdownResponse> {
        let step = plan
            .step(index)
            .ok_or_else(|| anyhow::anyhow!("plan has no step {index}"))?;
        let context = BreakdownPrompt {
            objective: &plan.objective_analysis,
            index,
            step,
            siblings: plan
                .steps
                .iter()
                .enumerate()
                .filter(|(i, _)| i + 1 != index)
                .map(|(i, s)| Sibling {
                    index: i + 1,
                    title: &s.title,
                })
                .collect(),
        };
        let schema_path = write_output_schema(&self.agents_dir, Schema::BreakdownResponse)?;
        let prompt = PromptBuilder::new(self.settings.prompt_budget_bytes)
            .build(PromptKind::Breakdown, &context)?;
        let request = request(
            &self.agents_dir,
            &format!("breakdown_step_{index}"),
            root,
            prompt,
            Some(schema_path),
            self.settings,
        );
        invoke_structured(model, &request, Schema::BreakdownResponse)
    }
}
