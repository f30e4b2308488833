//! Formatting: approved narrative plan to structured `plan.json`.

use anyhow::{Context, Result};
use tracing::info;

use crate::core::invariants::ensure_valid_plan;
use crate::core::plan_format::format_plan;
use crate::core::types::Plan;
use crate::error::WorkflowError;
use crate::io::approval::plan_digest;
use crate::io::schema::{Schema, validate_value};
use crate::io::workspace::{Area, AreaWriter, PLAN_JSON, PLAN_MARKDOWN, WorkspaceReader};

/// Parse `plan.md` into `plan.json`.
///
/// Refuses to run when `plan.md` is no longer the document that was
/// approved. Formatting is deterministic, so a re-run rewrites the same file.
pub fn run(
    approved_digest: &str,
    reader: &WorkspaceReader<'_>,
    out: &AreaWriter<'_>,
) -> Result<Plan> {
    let markdown = reader.require(Area::Planning, PLAN_MARKDOWN, "formatting")?;
    let found = plan_digest(&markdown);
    if found != approved_digest {
        return Err(WorkflowError::StaleApproval {
            approved: approved_digest.to_string(),
            found,
        }
        .into());
    }

    let plan = format_plan(&markdown)?;
    ensure_valid_plan(&plan)?;
    let value = serde_json::to_value(&plan).context("serialize plan")?;
    validate_value(Schema::PlanningResponse, &value).context("structured plan")?;
    out.write_json(PLAN_JSON, &plan)?;
    info!(steps = plan.step_count(), "plan formatted");
    Ok(plan)
}
