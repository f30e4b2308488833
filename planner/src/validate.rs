//! Validation of the artifacts present in a workspace.
//!
//! Every artifact that exists is checked against its schema and the
//! invariants its producing phase guarantees. Absent artifacts are fine; a
//! run only produces what its phase has reached.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use crate::core::decompose::Decomposition;
use crate::core::invariants::ensure_valid_plan;
use crate::core::learning::LearningRecord;
use crate::core::phase::Phase;
use crate::core::plan_format::format_plan;
use crate::core::types::{ExecutionEvidence, Plan, VariableManifest};
use crate::core::variables::validate_manifest;
use crate::core::verdict::ValidationVerdict;
use crate::error::WorkflowError;
use crate::io::approval::{Decision, plan_digest};
use crate::io::config::load_config;
use crate::io::schema::{Schema, parse_validated, validate_value};
use crate::io::state::load_state;
use crate::io::workspace::{
    Area, DECOMPOSITION_FILE, FsWorkspace, LEARNING_RECORD, PLAN_JSON, PLAN_MARKDOWN,
    STATE_FILE, VARIABLES_FILE, WorkspaceReader, config_path, evidence_name, verdict_name,
};

/// High-level validation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    /// `None` when no run has been started.
    pub workflow_id: Option<String>,
    pub phase: Option<Phase>,
    /// Root-relative paths of the artifacts that were checked.
    pub checked: Vec<String>,
}

pub fn validate_workspace(root: &Path) -> Result<ValidateOutcome> {
    load_config(&config_path(root)).context("load config.toml")?;

    let store = FsWorkspace::new(root);
    let reader = WorkspaceReader::new(&store);
    let mut checked = Vec::new();

    let Some(state) = load_state(&reader)? else {
        return Ok(ValidateOutcome {
            workflow_id: None,
            phase: None,
            checked,
        });
    };
    checked.push(display(Area::Control, STATE_FILE));

    if let Some(text) = reader.read(Area::Variables, VARIABLES_FILE)? {
        let manifest: VariableManifest =
            parse_validated(Schema::VariablesManifest, &text, VARIABLES_FILE)?;
        validate_manifest(&state.objective, &manifest).context("variables.json")?;
        checked.push(display(Area::Variables, VARIABLES_FILE));
    }

    if let Some(markdown) = reader.read(Area::Planning, PLAN_MARKDOWN)? {
        format_plan(&markdown).context("plan.md")?;
        if let Some(approval) = &state.approval {
            let found = plan_digest(&markdown);
            if approval.decision == Decision::Approved && approval.plan_digest != found {
                return Err(WorkflowError::StaleApproval {
                    approved: approval.plan_digest.clone(),
                    found,
                }
                .into());
            }
        }
        checked.push(display(Area::Planning, PLAN_MARKDOWN));
    }

    let mut step_count = state.step_count;
    if let Some(plan) = reader.read_json::<Value>(Area::Planning, PLAN_JSON)? {
        validate_value(Schema::PlanningResponse, &plan).context("plan.json")?;
        let plan: Plan = serde_json::from_value(plan).context("deserialize plan.json")?;
        ensure_valid_plan(&plan).context("plan.json")?;
        checked.push(display(Area::Planning, PLAN_JSON));

        if let Some(decomposition) =
            reader.read_json::<Decomposition>(Area::Planning, DECOMPOSITION_FILE)?
        {
            ensure_valid_plan(&decomposition.plan).context("decomposition.json")?;
            if decomposition.plan != plan {
                return Err(anyhow!(
                    "plan.json does not match the plan recorded in decomposition.json"
                ));
            }
            step_count = Some(decomposition.plan.step_count());
            checked.push(display(Area::Planning, DECOMPOSITION_FILE));
        }
    }

    for index in 1..=step_count.unwrap_or_default() {
        let name = evidence_name(index);
        if let Some(text) = reader.read(Area::Execution, &name)? {
            parse_validated::<ExecutionEvidence>(Schema::ExecutionEvidence, &text, &name)?;
            checked.push(display(Area::Execution, &name));
        }
        let name = verdict_name(index);
        if let Some(verdict) = reader.read_json::<ValidationVerdict>(Area::Validation, &name)? {
            if verdict.step_index != index {
                return Err(anyhow!(
                    "{name} records step {} instead of {index}",
                    verdict.step_index
                ));
            }
            checked.push(display(Area::Validation, &name));
        }
    }

    if reader
        .read_json::<LearningRecord>(Area::Learnings, LEARNING_RECORD)?
        .is_some()
    {
        checked.push(display(Area::Learnings, LEARNING_RECORD));
    }

    Ok(ValidateOutcome {
        workflow_id: Some(state.workflow_id),
        phase: Some(state.phase),
        checked,
    })
}

fn display(area: Area, name: &str) -> String {
    area.path(name).display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::workspace::AreaWriter;
    use crate::start::{StartOptions, start_workflow};
    use crate::test_support::{sample_plan, temp_workspace};

    fn start(root: &Path) {
        start_workflow(
            root,
            &StartOptions {
                objective: "Deploy app to account 123456789".to_string(),
                force: false,
            },
        )
        .expect("start");
    }

    #[test]
    fn empty_workspace_is_not_started() {
        let temp = temp_workspace();
        let outcome = validate_workspace(temp.path()).expect("validate");
        assert_eq!(outcome.workflow_id, None);
        assert!(outcome.checked.is_empty());
    }

    #[test]
    fn present_artifacts_are_checked() {
        let temp = temp_workspace();
        start(temp.path());
        let store = FsWorkspace::new(temp.path());
        AreaWriter::new(&store, Area::Planning)
            .write_json(PLAN_JSON, &sample_plan())
            .expect("seed");

        let outcome = validate_workspace(temp.path()).expect("validate");
        assert_eq!(outcome.phase, Some(Phase::Extracting));
        assert_eq!(
            outcome.checked,
            vec![
                "todo_creation_human/state/state.json".to_string(),
                "todo_creation_human/planning/plan.json".to_string(),
            ]
        );
    }

    /// Verifies a plan whose step consumes an output nobody produced before
    /// it is reported.
    #[test]
    fn broken_dependency_order_is_reported() {
        let temp = temp_workspace();
        start(temp.path());
        let mut plan = sample_plan();
        plan.steps.swap(0, 1);
        let store = FsWorkspace::new(temp.path());
        AreaWriter::new(&store, Area::Planning)
            .write_json(PLAN_JSON, &plan)
            .expect("seed");

        let err = validate_workspace(temp.path()).unwrap_err();
        assert!(format!("{err:#}").contains("plan.json"), "{err:#}");
    }

    #[test]
    fn manifest_that_breaks_the_objective_is_reported() {
        let temp = temp_workspace();
        start(temp.path());
        let store = FsWorkspace::new(temp.path());
        AreaWriter::new(&store, Area::Variables)
            .write(
                VARIABLES_FILE,
                r#"{"objective":"Deploy app to account {{ACCOUNT}}","variables":[],"extraction_date":""}"#,
            )
            .expect("seed");

        assert!(validate_workspace(temp.path()).is_err());
    }
}
