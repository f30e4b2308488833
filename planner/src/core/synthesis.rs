//! Final deliverable assembly (`todo_final.md`).

use std::collections::BTreeMap;

use crate::core::types::{Plan, Step, VariableManifest};
use crate::core::verdict::ValidationVerdict;
use crate::error::{Result, WorkflowError};

/// Pass/fail rollup across all steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisSummary {
    pub total: usize,
    pub passed: usize,
    /// 1-based indices of steps whose verdict is not a success.
    pub failed: Vec<usize>,
}

impl SynthesisSummary {
    pub fn all_passed(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deliverable {
    pub markdown: String,
    pub summary: SynthesisSummary,
}

/// Check that every step `1..=N` has a verdict.
pub fn ensure_complete(
    step_count: usize,
    verdicts: &BTreeMap<usize, ValidationVerdict>,
) -> Result<()> {
    let missing: Vec<usize> = (1..=step_count)
        .filter(|index| !verdicts.contains_key(index))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(WorkflowError::IncompleteVerdictSet { missing })
    }
}

/// Merge the plan and its verdicts into the ordered deliverable.
///
/// Placeholders stay verbatim; the variable table lists names only.
pub fn synthesize(
    manifest: &VariableManifest,
    plan: &Plan,
    verdicts: &BTreeMap<usize, ValidationVerdict>,
) -> Result<Deliverable> {
    ensure_complete(plan.steps.len(), verdicts)?;

    let mut failed = Vec::new();
    let mut steps_md = String::new();
    for (i, step) in plan.steps.iter().enumerate() {
        let index = i + 1;
        let Some(verdict) = verdicts.get(&index) else {
            continue;
        };
        if !verdict.is_success() {
            failed.push(index);
        }
        steps_md.push_str(&render_step(index, step, verdict));
    }
    let summary = SynthesisSummary {
        total: plan.steps.len(),
        passed: plan.steps.len() - failed.len(),
        failed,
    };

    let mut out = String::from("# Todo List\n\n");
    out.push_str(&format!(
        "## Objective\n\n{}\n\n",
        manifest.templated_objective.trim()
    ));
    if !manifest.variables.is_empty() {
        out.push_str("## Variables\n\n| Name | Description |\n| --- | --- |\n");
        for variable in &manifest.variables {
            out.push_str(&format!(
                "| `{{{{{}}}}}` | {} |\n",
                variable.name,
                variable.description.replace('|', "\\|")
            ));
        }
        out.push('\n');
    }
    out.push_str(&format!(
        "## Status\n\n{} of {} steps passed validation.",
        summary.passed, summary.total
    ));
    if !summary.failed.is_empty() {
        let failed: Vec<String> = summary.failed.iter().map(usize::to_string).collect();
        out.push_str(&format!(" Needs attention: step {}.", failed.join(", step ")));
    }
    out.push_str("\n\n");
    out.push_str(&format!(
        "## Objective Analysis\n\n{}\n\n## Approach\n\n{}\n\n## Steps\n\n",
        plan.objective_analysis.trim(),
        plan.approach.trim()
    ));
    out.push_str(&steps_md);
    out.push_str(&format!(
        "## Expected Outcome\n\n{}\n",
        plan.expected_outcome.trim()
    ));

    Ok(Deliverable {
        markdown: out,
        summary,
    })
}

fn render_step(index: usize, step: &Step, verdict: &ValidationVerdict) -> String {
    let check = if verdict.is_success() { "x" } else { " " };
    let mut out = format!(
        "### {index}. [{check}] {} ({}, evidence {})\n\n",
        step.title, verdict.status, verdict.evidence_quality
    );
    out.push_str(&format!("{}\n\n", step.description.trim()));
    out.push_str(&format!(
        "- **Success Criteria**: {}\n",
        step.success_criteria.trim()
    ));
    if !step.context_dependencies.is_empty() {
        out.push_str(&format!(
            "- **Context Dependencies**: {}\n",
            step.context_dependencies.join(", ")
        ));
    }
    if step.has_output() {
        out.push_str(&format!(
            "- **Context Output**: {}\n",
            step.context_output.trim()
        ));
    }
    push_items(&mut out, "Success Patterns", &step.success_patterns);
    push_items(&mut out, "Failure Patterns", &step.failure_patterns);
    push_items(&mut out, "Verified", &verdict.verified_items);
    push_items(&mut out, "Partially Verified", &verdict.partially_verified_items);
    push_items(&mut out, "Failed", &verdict.failed_items);
    out.push('\n');
    out
}

fn push_items(out: &mut String, label: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("- **{label}**:\n"));
    for item in items {
        out.push_str(&format!("  - {item}\n"));
    }
}
