//! Agent-mode criteria validation.
//!
//! The model only proposes a judgement; the verdict itself comes from
//! [`verdict_from_response`](crate::core::verdict::verdict_from_response),
//! which refuses unsupported PASS claims.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{ExecutionEvidence, Step};
use crate::core::verdict::ValidationResponse;
use crate::io::llm::{LanguageModel, invoke_structured};
use crate::io::prompt::{PromptBuilder, PromptKind};
use crate::io::schema::Schema;

use super::{AgentSettings, request, write_output_schema};

#[derive(Debug, Serialize)]
struct ValidatePrompt<'a> {
    index: usize,
    title: &'a str,
    success_criteria: &'a str,
    summary: &'a str,
    trace: String,
    guidance: &'a [String],
}

#[derive(Debug, Clone)]
pub struct ValidatorAgent {
    agents_dir: PathBuf,
    settings: AgentSettings,
}

impl ValidatorAgent {
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
        index: usize,
        step: &Step,
        evidence: &ExecutionEvidence,
        guidance: &[String],
    ) -> Result<ValidationResponse> {
        let trace = serde_json::to_string_pretty(&evidence.trace).context("serialize trace")?;
        let context = ValidatePrompt {
            index,
            title: &step.title,
            success_criteria: &step.success_criteria,
            summary: &evidence.summary,
            trace,
            guidance,
        };
        let schema_path = write_output_schema(&self.agents_dir, Schema::ValidationResponse)?;
        let prompt = PromptBuilder::new(self.settings.prompt_budget_bytes)
            .build(PromptKind::Validate, &context)?;
        let request = request(
            &self.agents_dir,
            &format!("validate_step_{index}"),
            root,
            prompt,
            Some(schema_path),
            self.settings,
        );
        invoke_structured(model, &request, Schema::ValidationResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TraceEvent;
    use crate::core::verdict::EvidenceQuality;
    use crate::test_support::{ScriptedModel, sample_plan};
    use std::time::Duration;

    #[test]
    fn validator_sees_criteria_and_trace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::new().respond(
            "validate",
            r#"{"is_success_criteria_met":true,"evidence_quality":"MODERATE","verified_items":["endpoints.json written"],"partially_verified_items":[],"failed_items":[],"reasoning":"write recorded"}"#,
        );
        let agent = ValidatorAgent::new(
            &temp.path().join("agents"),
            AgentSettings {
                prompt_budget_bytes: 10_000,
                timeout: Duration::from_secs(5),
                output_limit_bytes: 1_000,
            },
        );
        let evidence = ExecutionEvidence {
            summary: "saved endpoints".to_string(),
            trace: vec![TraceEvent::Message {
                text: "all good".to_string(),
            }],
            ..ExecutionEvidence::default()
        };

        let response = agent
            .run(&model, temp.path(), 1, &sample_plan().steps[0], &evidence, &[])
            .expect("validate");
        assert!(response.is_success_criteria_met);
        assert_eq!(response.evidence_quality, EvidenceQuality::Moderate);

        let prompt = &model.prompts_for("validate_step_1")[0];
        assert!(prompt.contains("endpoints.json lists every registered service"));
        assert!(prompt.contains("\"text\": \"all good\""));
        assert!(!prompt.contains("### Earlier Findings"));
    }
}
