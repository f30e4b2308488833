//! Language-model roles.
//!
//! Each agent owns its prompt template, output schema and per-phase
//! settings, and turns one typed input into one typed answer. Agents never
//! write workspace artifacts; the calling phase does.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::io::config::PlannerConfig;
use crate::io::llm::LlmRequest;
use crate::io::schema::Schema;
use crate::io::workspace::{AGENTS_DIR, Area};

pub mod decomposer;
pub mod drafter;
pub mod executor;
pub mod validator;
pub mod variables;

/// Limits for one agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSettings {
    pub prompt_budget_bytes: usize,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl AgentSettings {
    /// Settings for planning-side calls (extraction, drafting, breakdown,
    /// validation).
    pub fn planning(config: &PlannerConfig) -> Self {
        Self {
            prompt_budget_bytes: config.prompt_budget_bytes,
            timeout: Duration::from_secs(config.llm_timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    /// Settings for executing a step.
    pub fn execution(config: &PlannerConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.step_timeout_secs),
            ..Self::planning(config)
        }
    }
}

/// Scratch directory for model inputs and outputs
/// (`todo_creation_human/state/agents`).
pub fn agents_dir(root: &Path) -> PathBuf {
    root.join(Area::Control.path(AGENTS_DIR))
}

pub(crate) fn write_output_schema(agents_dir: &Path, schema: Schema) -> Result<PathBuf> {
    let path = agents_dir.join(schema.file_name());
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create schema dir {}", parent.display()))?;
    }
    fs::write(&path, schema.source())
        .with_context(|| format!("write schema {}", path.display()))?;
    Ok(path)
}

/// Build the request for `role`, with its files under `agents_dir/role/`.
pub(crate) fn request(
    agents_dir: &Path,
    role: &str,
    root: &Path,
    prompt: String,
    schema_path: Option<PathBuf>,
    settings: AgentSettings,
) -> LlmRequest {
    let dir = agents_dir.join(role);
    let output_name = if schema_path.is_some() {
        "output.json"
    } else {
        "output.md"
    };
    LlmRequest {
        role: role.to_string(),
        workdir: root.to_path_buf(),
        prompt,
        output_schema_path: schema_path,
        output_path: dir.join(output_name),
        log_path: dir.join("model.log"),
        timeout: settings.timeout,
        output_limit_bytes: settings.output_limit_bytes,
    }
}
