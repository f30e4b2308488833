//! Learning capture and feed-forward.
//!
//! Each validated step contributes one [`StepLearning`] to the run's
//! [`LearningRecord`]. Entries are appended, never edited, and only inform
//! steps that have not run yet.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::invariants::outputs;
use crate::core::types::{ExecutionEvidence, Plan, Step, TraceEvent};
use crate::core::verdict::ValidationVerdict;

/// How much of a tool invocation a pattern keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    /// Tool names only.
    #[default]
    General,
    /// Tool names with their arguments.
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLearning {
    pub step_index: usize,
    pub title: String,
    pub succeeded: bool,
    pub status: String,
    pub success_patterns: Vec<String>,
    pub failure_patterns: Vec<String>,
}

/// Append-only learning accumulator for one workflow run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningRecord {
    pub entries: Vec<StepLearning>,
}

impl LearningRecord {
    pub fn record(&mut self, learning: StepLearning) {
        self.entries.push(learning);
    }

    /// Most recent entry per step, ordered by step index.
    pub fn latest(&self) -> BTreeMap<usize, &StepLearning> {
        let mut latest = BTreeMap::new();
        for entry in &self.entries {
            latest.insert(entry.step_index, entry);
        }
        latest
    }

    /// Guidance offered to the execution of `step_index`.
    ///
    /// Earlier steps contribute their latest patterns; a previous attempt of
    /// the same step contributes what went wrong.
    pub fn guidance_for(&self, step_index: usize) -> Vec<String> {
        let mut guidance = Vec::new();
        for (&index, entry) in &self.latest() {
            if index < step_index {
                for pattern in &entry.success_patterns {
                    guidance.push(format!("Step {index} worked: {pattern}"));
                }
                for pattern in &entry.failure_patterns {
                    guidance.push(format!("Step {index} avoid: {pattern}"));
                }
            } else if index == step_index {
                for pattern in &entry.failure_patterns {
                    guidance.push(format!("Previous attempt of this step failed: {pattern}"));
                }
            }
        }
        guidance
    }

    /// Append learned patterns to the producing step and to later steps that
    /// consume its output. Earlier steps are never touched.
    pub fn annotate(&self, plan: &mut Plan) {
        for (&index, entry) in &self.latest() {
            let Some(producer) = plan.step(index) else {
                continue;
            };
            let produced = outputs(producer);
            for (i, step) in plan.steps.iter_mut().enumerate() {
                let target = i + 1;
                let consumes = target > index
                    && step
                        .context_dependencies
                        .iter()
                        .any(|dep| produced.iter().any(|out| out == dep.trim()));
                if target == index || consumes {
                    extend_unique(&mut step.success_patterns, &entry.success_patterns);
                    extend_unique(&mut step.failure_patterns, &entry.failure_patterns);
                }
            }
        }
    }
}

/// Derive the learning entry for one validated step.
pub fn derive_learning(
    step: &Step,
    verdict: &ValidationVerdict,
    evidence: &ExecutionEvidence,
    detail: DetailLevel,
) -> StepLearning {
    let succeeded = verdict.is_success();
    let mut success_patterns = Vec::new();
    let mut failure_patterns = Vec::new();

    extend_unique(&mut success_patterns, &evidence.success_notes);
    extend_unique(&mut failure_patterns, &evidence.failure_notes);

    for event in &evidence.trace {
        let TraceEvent::ToolCall {
            tool,
            arguments,
            success,
            output,
        } = event
        else {
            continue;
        };
        let invocation = match detail {
            DetailLevel::General => format!("`{}`", tool.trim()),
            DetailLevel::Exact if arguments.trim().is_empty() => format!("`{}`", tool.trim()),
            DetailLevel::Exact => format!("`{}` with `{}`", tool.trim(), arguments.trim()),
        };
        if *success && succeeded {
            push_unique(&mut success_patterns, format!("Used {invocation}"));
        } else if !*success {
            let reason = output.lines().map(str::trim).find(|l| !l.is_empty());
            let pattern = match (detail, reason) {
                (DetailLevel::Exact, Some(reason)) => format!("{invocation} failed: {reason}"),
                _ => format!("{invocation} failed"),
            };
            push_unique(&mut failure_patterns, pattern);
        }
    }
    extend_unique(&mut failure_patterns, &verdict.failed_items);

    StepLearning {
        step_index: verdict.step_index,
        title: step.title.clone(),
        succeeded,
        status: verdict.status.label().to_string(),
        success_patterns,
        failure_patterns,
    }
}

pub fn render_step_learning(learning: &StepLearning) -> String {
    let mut out = format!(
        "# Step {} Learning: {}\n\n**Outcome**: {}\n\n",
        learning.step_index, learning.title, learning.status
    );
    push_list(&mut out, "Success Patterns", &learning.success_patterns);
    push_list(&mut out, "Failure Patterns", &learning.failure_patterns);
    out.truncate(out.trim_end().len());
    out.push('\n');
    out
}

/// `success_patterns.md`, regenerated from the whole record.
pub fn render_success_patterns(record: &LearningRecord) -> String {
    render_rollup(record, "Success Patterns", |entry| &entry.success_patterns)
}

/// `failure_analysis.md`, regenerated from the whole record.
pub fn render_failure_analysis(record: &LearningRecord) -> String {
    render_rollup(record, "Failure Analysis", |entry| &entry.failure_patterns)
}

fn render_rollup(
    record: &LearningRecord,
    title: &str,
    patterns: impl Fn(&StepLearning) -> &Vec<String>,
) -> String {
    let mut out = format!("# {title}\n\n");
    let mut any = false;
    for (attempt, entry) in record.entries.iter().enumerate() {
        let items = patterns(entry);
        if items.is_empty() {
            continue;
        }
        any = true;
        out.push_str(&format!(
            "## Step {}: {} ({}, entry {})\n\n",
            entry.step_index,
            entry.title,
            entry.status,
            attempt + 1
        ));
        for item in items {
            out.push_str(&format!("- {item}\n"));
        }
        out.push('\n');
    }
    if !any {
        out.push_str("No patterns recorded yet.\n");
    }
    out.truncate(out.trim_end().len());
    out.push('\n');
    out
}

fn push_list(out: &mut String, title: &str, items: &[String]) {
    out.push_str(&format!("## {title}\n\n"));
    if items.is_empty() {
        out.push_str("- None\n\n");
    } else {
        for item in items {
            out.push_str(&format!("- {item}\n"));
        }
        out.push('\n');
    }
}

fn push_unique(target: &mut Vec<String>, item: String) {
    let item = item.trim().to_string();
    if !item.is_empty() && !target.contains(&item) {
        target.push(item);
    }
}

fn extend_unique(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        push_unique(target, item.clone());
    }
}
