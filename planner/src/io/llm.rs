//! Language-model capability.
//!
//! [`LanguageModel`] decouples the agents from the backend that actually
//! answers a prompt (by default `codex exec`). Tests use scripted models that
//! write canned answers without spawning anything.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::io::config::LlmConfig;
use crate::io::process::run_command;
use crate::io::schema::{Schema, parse_validated};

/// One model invocation.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Agent role, used for logging and scripted test routing.
    pub role: String,
    pub workdir: PathBuf,
    pub prompt: String,
    /// JSON Schema file constraining the answer, when structured.
    pub output_schema_path: Option<PathBuf>,
    /// Where the model must leave its final answer.
    pub output_path: PathBuf,
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

pub trait LanguageModel {
    /// Answer `request.prompt`, writing the answer to `request.output_path`.
    fn invoke(&self, request: &LlmRequest) -> Result<()>;
}

/// Spawns the configured CLI (default `codex exec`) per request.
#[derive(Debug, Clone)]
pub struct CodexModel {
    program: String,
    args: Vec<String>,
    reasoning_effort: String,
}

impl CodexModel {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            reasoning_effort: config.reasoning_effort.clone(),
        }
    }

    fn command(&self, request: &LlmRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("-c")
            .arg(format!("model_reasoning_effort={}", self.reasoning_effort));
        if let Some(schema) = &request.output_schema_path {
            cmd.arg("--output-schema").arg(schema);
        }
        cmd.arg("--output-last-message")
            .arg(&request.output_path)
            .arg("-")
            .current_dir(&request.workdir);
        cmd
    }
}

impl LanguageModel for CodexModel {
    #[instrument(skip_all, fields(role = %request.role, timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &LlmRequest) -> Result<()> {
        info!(program = %self.program, "invoking language model");
        if let Some(schema) = &request.output_schema_path {
            if !schema.exists() {
                return Err(anyhow!("missing output schema {}", schema.display()));
            }
        }
        ensure_parent(&request.output_path)?;

        let output = run_command(
            self.command(request),
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        )
        .with_context(|| format!("run {}", self.program))?;

        ensure_parent(&request.log_path)?;
        fs::write(
            &request.log_path,
            output.transcript("model", request.output_limit_bytes),
        )
        .with_context(|| format!("write model log {}", request.log_path.display()))?;

        if output.timed_out {
            warn!("language model timed out");
            return Err(anyhow!(
                "{} timed out after {:?}",
                self.program,
                request.timeout
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "language model failed");
            return Err(anyhow!(
                "{} failed with status {:?} (see {})",
                self.program,
                output.status.code(),
                request.log_path.display()
            ));
        }
        debug!("language model completed");
        Ok(())
    }
}

/// Invoke the model and return its free-text answer.
#[instrument(skip_all, fields(role = %request.role))]
pub fn invoke_text<M: LanguageModel + ?Sized>(model: &M, request: &LlmRequest) -> Result<String> {
    model.invoke(request)?;
    read_answer(&request.output_path)
}

/// Invoke the model and parse its answer as `T`, after checking it against
/// `schema`.
#[instrument(skip_all, fields(role = %request.role, schema = schema.file_name()))]
pub fn invoke_structured<M: LanguageModel + ?Sized, T: DeserializeOwned>(
    model: &M,
    request: &LlmRequest,
    schema: Schema,
) -> Result<T> {
    let answer = invoke_text(model, request)?;
    parse_validated(schema, &answer, &format!("{} answer", request.role))
}

fn read_answer(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(anyhow!("missing model output {}", path.display()));
    }
    fs::read_to_string(path).with_context(|| format!("read model output {}", path.display()))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    Ok(())
}
