//! Per-step loop: Executing(i), Validating(i), Learning(i).
//!
//! A failed verdict is data, not an error. Only missing inputs and I/O
//! failures stop the loop.

use std::path::{Component, Path};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::agents::executor::{StepExecutor, StepRequest};
use crate::agents::validator::ValidatorAgent;
use crate::agents::{AgentSettings, agents_dir};
use crate::core::learning::{
    LearningRecord, derive_learning, render_failure_analysis, render_step_learning,
    render_success_patterns,
};
use crate::core::types::{ExecutionEvidence, Plan, Step, VariableManifest};
use crate::core::variables::resolve_step;
use crate::core::verdict::{
    FileObservation, ValidationVerdict, assess_criteria, assess_file_evidence, render_report,
    verdict_from_response,
};
use crate::io::config::{PhaseMode, PlannerConfig};
use crate::io::llm::LanguageModel;
use crate::io::workspace::{
    Area, AreaWriter, Entry, FAILURE_ANALYSIS, LEARNING_RECORD, SUCCESS_PATTERNS, WorkspaceReader,
    evidence_name, learning_name, report_name, verdict_name,
};

fn step_of<'p>(plan: &'p Plan, index: usize) -> Result<&'p Step> {
    plan.step(index)
        .with_context(|| format!("plan has no step {index}"))
}

/// Run step `index` through the execution capability and persist its
/// evidence. An executor error becomes evidence of the failure.
pub fn execute(
    index: usize,
    plan: &Plan,
    manifest: &VariableManifest,
    record: &LearningRecord,
    reader: &WorkspaceReader<'_>,
    out: &AreaWriter<'_>,
    executor: &dyn StepExecutor,
) -> Result<ExecutionEvidence> {
    let name = evidence_name(index);
    if let Some(existing) = reader.read_json::<ExecutionEvidence>(Area::Execution, &name)? {
        debug!(step = index, "reusing execution evidence");
        return Ok(existing);
    }

    let step = step_of(plan, index)?;
    let request = StepRequest {
        index,
        total: plan.step_count(),
        step: resolve_step(step, &manifest.variables),
        guidance: record.guidance_for(index),
        workspace_root: reader.root().to_path_buf(),
    };
    let evidence = match executor.execute(&request) {
        Ok(evidence) => evidence,
        Err(err) => {
            warn!(step = index, err = %format!("{err:#}"), "step execution failed");
            ExecutionEvidence::execution_failed(format!("{err:#}"))
        }
    };
    out.write_json(&name, &evidence)?;
    info!(step = index, claimed_files = evidence.claimed_files.len(), "step executed");
    Ok(evidence)
}

/// Produce the verdict and report for step `index`, once.
pub fn validate(
    index: usize,
    plan: &Plan,
    record: &LearningRecord,
    reader: &WorkspaceReader<'_>,
    out: &AreaWriter<'_>,
    config: &PlannerConfig,
    model: &dyn LanguageModel,
) -> Result<ValidationVerdict> {
    let name = verdict_name(index);
    if let Some(existing) = reader.read_json::<ValidationVerdict>(Area::Validation, &name)? {
        // A stop between the verdict and its report leaves the report to redo.
        if !reader.exists(Area::Validation, &report_name(index))? {
            out.write(&report_name(index), &render_report(&existing, step_of(plan, index)?))?;
            debug!(step = index, "report restored from verdict");
        }
        debug!(step = index, "reusing verdict");
        return Ok(existing);
    }

    let step = step_of(plan, index)?;
    let evidence: ExecutionEvidence =
        reader.require_json(Area::Execution, &evidence_name(index), "validating")?;

    let mut verdict = if !evidence.claimed_files.is_empty() {
        let observations = evidence
            .claimed_files
            .iter()
            .map(|claim| observe(reader, &claim.path))
            .collect::<Result<Vec<_>>>()?;
        assess_file_evidence(index, &evidence.claimed_files, &observations)
    } else {
        match config.validation.mode {
            PhaseMode::Rules => assess_criteria(index, &step.success_criteria, &evidence.trace),
            PhaseMode::Agent => {
                let response = ValidatorAgent::new(
                    &agents_dir(reader.root()),
                    AgentSettings::planning(config),
                )
                .run(
                    model,
                    reader.root(),
                    index,
                    step,
                    &evidence,
                    &record.guidance_for(index),
                )?;
                verdict_from_response(index, &response)
            }
        }
    };
    if verdict.summary.is_empty() {
        verdict.summary = evidence.summary.clone();
    }

    let mut json = serde_json::to_string_pretty(&verdict).context("serialize verdict")?;
    json.push('\n');
    out.create_new(&name, &json)?;
    out.write(&report_name(index), &render_report(&verdict, step))?;
    if verdict.has_verification_mismatch() {
        warn!(step = index, status = %verdict.status, "claimed files do not match the workspace");
    }
    info!(step = index, status = %verdict.status, quality = %verdict.evidence_quality, "step validated");
    Ok(verdict)
}

/// Record what step `index` taught and feed it forward into `plan`.
pub fn learn(
    index: usize,
    plan: &mut Plan,
    record: &mut LearningRecord,
    reader: &WorkspaceReader<'_>,
    out: &AreaWriter<'_>,
    config: &PlannerConfig,
) -> Result<()> {
    let step_file = learning_name(index);
    if !reader.exists(Area::Learnings, &step_file)? {
        let step = step_of(plan, index)?;
        let verdict: ValidationVerdict =
            reader.require_json(Area::Validation, &verdict_name(index), "learning")?;
        let evidence: ExecutionEvidence =
            reader.require_json(Area::Execution, &evidence_name(index), "learning")?;
        let learning = derive_learning(step, &verdict, &evidence, config.learning.detail);

        // A stop between the record and the step file must not record twice.
        if record.latest().get(&index) != Some(&&learning) {
            record.record(learning.clone());
        }
        out.write_json(LEARNING_RECORD, record)?;
        out.write(SUCCESS_PATTERNS, &render_success_patterns(record))?;
        out.write(FAILURE_ANALYSIS, &render_failure_analysis(record))?;
        out.write(&step_file, &render_step_learning(&learning))?;
        info!(
            step = index,
            success_patterns = learning.success_patterns.len(),
            failure_patterns = learning.failure_patterns.len(),
            "learning recorded"
        );
    } else {
        debug!(step = index, "reusing learning");
    }
    record.annotate(plan);
    Ok(())
}

/// Read a claimed path relative to the workspace root. Paths that leave the
/// workspace count as missing. Binary contents are compared lossily.
fn observe(reader: &WorkspaceReader<'_>, claimed: &str) -> Result<FileObservation> {
    let path = Path::new(claimed);
    let escapes = path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes || claimed.trim().is_empty() {
        warn!(path = claimed, "claimed file is outside the workspace");
        return Ok(FileObservation::Missing);
    }
    Ok(match reader.inspect_relative(claimed)? {
        Entry::Absent => FileObservation::Missing,
        Entry::Special => FileObservation::NotAFile,
        Entry::File(bytes) => FileObservation::Present(String::from_utf8_lossy(&bytes).into_owned()),
    })
}
