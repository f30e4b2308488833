//! Planner configuration stored under `todo_creation_human/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::learning::DetailLevel;

use super::workspace::write_atomic;

/// Planner configuration (TOML).
///
/// Edited by humans, never rewritten by the planner once it exists. Missing
/// fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlannerConfig {
    /// Prompts longer than this drop droppable sections.
    pub prompt_budget_bytes: usize,

    /// Wall-clock limit for one language-model call.
    pub llm_timeout_secs: u64,

    /// Wall-clock limit for executing one step.
    pub step_timeout_secs: u64,

    /// Truncate captured child output beyond this many bytes.
    pub output_limit_bytes: usize,

    pub llm: LlmConfig,
    pub extraction: ExtractionConfig,
    pub decomposition: DecompositionConfig,
    pub validation: ValidationConfig,
    pub learning: LearningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlmConfig {
    /// Program spawned for every model call.
    pub program: String,
    /// Leading arguments, before the planner's own flags.
    pub args: Vec<String>,
    pub reasoning_effort: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            program: "codex".to_string(),
            args: vec![
                "exec".to_string(),
                "--sandbox".to_string(),
                "workspace-write".to_string(),
                "--skip-git-repo-check".to_string(),
            ],
            reasoning_effort: "medium".to_string(),
        }
    }
}

/// Who performs a phase: deterministic rules or the language model.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PhaseMode {
    #[default]
    Rules,
    Agent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExtractionConfig {
    pub mode: PhaseMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DecompositionConfig {
    /// When false every step is taken as atomic.
    pub enabled: bool,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidationConfig {
    pub mode: PhaseMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LearningConfig {
    pub detail: DetailLevel,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            prompt_budget_bytes: 48_000,
            llm_timeout_secs: 10 * 60,
            step_timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
            llm: LlmConfig::default(),
            extraction: ExtractionConfig::default(),
            decomposition: DecompositionConfig::default(),
            validation: ValidationConfig::default(),
            learning: LearningConfig::default(),
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.llm_timeout_secs == 0 {
            return Err(anyhow!("llm_timeout_secs must be > 0"));
        }
        if self.step_timeout_secs == 0 {
            return Err(anyhow!("step_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.llm.program.trim().is_empty() {
            return Err(anyhow!("llm.program must be non-empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PlannerConfig::default()`.
pub fn load_config(path: &Path) -> Result<PlannerConfig> {
    if !path.exists() {
        let cfg = PlannerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PlannerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PlannerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
