//! Step execution capability.
//!
//! [`StepExecutor`] performs the real-world work of one step and reports
//! evidence. [`AgentStepExecutor`] delegates the work to the language model
//! running in the workspace.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument};

use crate::core::types::{ExecutionEvidence, Step};
use crate::io::llm::{LanguageModel, invoke_structured};
use crate::io::prompt::{PromptBuilder, PromptKind};
use crate::io::schema::Schema;

use super::{AgentSettings, request, write_output_schema};

/// One step handed to the execution capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRequest {
    /// 1-based position in the decomposed plan.
    pub index: usize,
    pub total: usize,
    /// The step with every placeholder resolved to its value.
    pub step: Step,
    /// Lessons from earlier steps and earlier attempts.
    pub guidance: Vec<String>,
    pub workspace_root: PathBuf,
}

pub trait StepExecutor {
    fn execute(&self, request: &StepRequest) -> Result<ExecutionEvidence>;
}

#[derive(Debug, Serialize)]
struct ExecutePrompt<'a> {
    index: usize,
    total: usize,
    step: &'a Step,
    guidance: &'a [String],
    workspace_root: String,
}

/// Runs each step through the language model.
pub struct AgentStepExecutor<'m> {
    model: &'m dyn LanguageModel,
    agents_dir: PathBuf,
    settings: AgentSettings,
}

impl<'m> AgentStepExecutor<'m> {
    pub fn new(model: &'m dyn LanguageModel, agents_dir: &Path, settings: AgentSettings) -> Self {
        Self {
            model,
            agents_dir: agents_dir.to_path_buf(),
            settings,
        }
    }
}

impl StepExecutor for AgentStepExecutor<'_> {
    #[instrument(skip_all, fields(step = step_request.index))]
    fn execute(&self, step_request: &StepRequest) -> Result<ExecutionEvidence> {
        info!(title = %step_request.step.title, "executing step");
        let schema_path = write_output_schema(&self.agents_dir, Schema::ExecutionEvidence)?;
        let context = ExecutePrompt {
            index: step_request.index,
            total: step_request.total,
            step: &step_request.step,
            guidance: &step_request.guidance,
            workspace_root: step_request.workspace_root.display().to_string(),
        };
        let prompt = PromptBuilder::new(self.settings.prompt_budget_bytes)
            .build(PromptKind::Execute, &context)?;
        let llm_request = request(
            &self.agents_dir,
            &format!("execute_step_{}", step_request.index),
            &step_request.workspace_root,
            prompt,
            Some(schema_path),
            self.settings,
        );
        invoke_structured(self.model, &llm_request, Schema::ExecutionEvidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedModel, sample_plan};
    use std::time::Duration;

    #[test]
    fn agent_executor_sends_resolved_step_and_guidance() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::new().respond(
            "execute",
            r#"{"summary":"saved","claimed_files":[{"path":"endpoints.json","expected_content":["svc-a"]}],"trace":[{"kind":"file_operation","operation":"write","path":"endpoints.json"}],"success_notes":[],"failure_notes":[]}"#,
        );
        let executor = AgentStepExecutor::new(
            &model,
            &temp.path().join("agents"),
            AgentSettings {
                prompt_budget_bytes: 10_000,
                timeout: Duration::from_secs(5),
                output_limit_bytes: 1_000,
            },
        );
        let mut step = sample_plan().steps[0].clone();
        step.description = "Query the registry of account 123456789.".to_string();

        let evidence = executor
            .execute(&StepRequest {
                index: 1,
                total: 2,
                step,
                guidance: vec!["Step 0 worked: paginate".to_string()],
                workspace_root: temp.path().to_path_buf(),
            })
            .expect("execute");
        assert_eq!(evidence.claimed_files[0].path, "endpoints.json");

        let prompt = &model.prompts_for("execute_step_1")[0];
        assert!(prompt.contains("step 1 of 2"));
        assert!(prompt.contains("account 123456789"));
        assert!(prompt.contains("- Step 0 worked: paginate"));
        assert!(prompt.contains("- Do: Use the registry API instead of scraping"));
    }
}
