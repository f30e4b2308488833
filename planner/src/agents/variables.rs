//! Agent-mode variable extraction.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use crate::core::types::VariableManifest;
use crate::io::llm::{LanguageModel, invoke_structured};
use crate::io::prompt::{PromptBuilder, PromptKind};
use crate::io::schema::Schema;

use super::{AgentSettings, request, write_output_schema};

#[derive(Debug, Serialize)]
struct VariablesPrompt<'a> {
    objective: &'a str,
    today: &'a str,
}

#[derive(Debug, Clone)]
pub struct VariablesAgent {
    agents_dir: PathBuf,
    settings: AgentSettings,
}

impl VariablesAgent {
    pub fn new(agents_dir: &Path, settings: AgentSettings) -> Self {
        Self {
            agents_dir: agents_dir.to_path_buf(),
            settings,
        }
    }

    /// Ask the model for a manifest. The caller validates it against the
    /// objective.
    pub fn run<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        root: &Path,
        objective: &str,
        today: &str,
    ) -> Result<VariableManifest> {
        let schema_path = write_output_schema(&self.agents_dir, Schema::VariablesManifest)?;
        let prompt = PromptBuilder::new(self.settings.prompt_budget_bytes).build(
            PromptKind::Variables,
            &VariablesPrompt { objective, today },
        )?;
        let request = request(
            &self.agents_dir,
            "variables",
            root,
            prompt,
            Some(schema_path),
            self.settings,
        );
        invoke_structured(model, &request, Schema::VariablesManifest)
    }
}
