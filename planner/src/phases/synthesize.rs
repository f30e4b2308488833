//! Synthesizing: merge the plan and its verdicts into `todo_final.md`.

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::info;

use crate::core::synthesis::{Deliverable, synthesize};
use crate::core::types::{Plan, VariableManifest};
use crate::core::verdict::ValidationVerdict;
use crate::io::workspace::{Area, AreaWriter, FINAL_FILE, WorkspaceReader, verdict_name};

/// Always rewrites the deliverable so a re-driven step shows up.
pub fn run(
    manifest: &VariableManifest,
    plan: &Plan,
    reader: &WorkspaceReader<'_>,
    out: &AreaWriter<'_>,
) -> Result<Deliverable> {
    let verdicts = load_verdicts(plan.step_count(), reader)?;
    let deliverable = synthesize(manifest, plan, &verdicts)?;
    out.write(FINAL_FILE, &deliverable.markdown)?;
    info!(
        total = deliverable.summary.total,
        passed = deliverable.summary.passed,
        failed = deliverable.summary.failed.len(),
        "deliverable written"
    );
    Ok(deliverable)
}

/// Verdicts present for steps `1..=step_count`, keyed by step index.
pub fn load_verdicts(
    step_count: usize,
    reader: &WorkspaceReader<'_>,
) -> Result<BTreeMap<usize, ValidationVerdict>> {
    let mut verdicts = BTreeMap::new();
    for index in 1..=step_count {
        if let Some(verdict) =
            reader.read_json::<ValidationVerdict>(Area::Validation, &verdict_name(index))?
        {
            verdicts.insert(index, verdict);
        }
    }
    Ok(verdicts)
}
