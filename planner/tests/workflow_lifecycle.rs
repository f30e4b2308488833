//! End-to-end workflow runs against a temporary workspace.
//!
//! These tests drive `Workflow::run` with scripted capabilities through
//! every phase: extraction, drafting, approval, formatting, decomposition,
//! the per-step loop and synthesis, including a run that stops midway and
//! resumes.

use std::fs;
use std::path::Path;

use todo_planner::WorkflowError;
use todo_planner::core::phase::Phase;
use todo_planner::core::types::{Plan, VariableManifest};
use todo_planner::io::approval::DeferredApproval;
use todo_planner::io::events::PhaseEvent;
use todo_planner::start::{StartOptions, start_workflow};
use todo_planner::test_support::{
    AutoApprove, ScriptedExecutor, ScriptedModel, file_evidence, sample_plan_markdown,
    temp_workspace,
};
use todo_planner::validate::validate_workspace;
use todo_planner::workflow::{Capabilities, RunOutcome, Workflow};

const OBJECTIVE: &str = "Inventory the services in account 123456789";
const SPLIT_FIRST: &str = r#"{"steps":[
    {"title":"List services","description":"Call the registry for account {{AWS_ACCOUNT_ID}}",
     "success_criteria":"services.txt lists every service"},
    {"title":"Save endpoints","description":"Write the endpoint list to endpoints.json"}
]}"#;
const KEEP_SECOND: &str = r#"{"steps":[{"title":"Write report","description":"Summarize"}]}"#;

fn start(root: &Path) {
    start_workflow(
        root,
        &StartOptions {
            objective: OBJECTIVE.to_string(),
            force: false,
        },
    )
    .expect("start");
}

fn artifact(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join("todo_creation_human").join(rel))
        .unwrap_or_else(|err| panic!("read {rel}: {err}"))
}

fn executor() -> ScriptedExecutor {
    let mut endpoints = file_evidence("endpoints.json", &["svc-a"]);
    endpoints.success_notes = vec!["Page through the registry 100 entries at a time".to_string()];
    ScriptedExecutor::new()
        .then(
            file_evidence("services.txt", &["svc-a"]),
            &[("services.txt", "svc-a\n")],
        )
        .then(endpoints, &[("endpoints.json", "[\"svc-a\"]")])
        .then(
            file_evidence("report.txt", &["svc-a"]),
            &[("report.txt", "svc-a: https://svc-a.internal\n")],
        )
}

/// Full lifecycle with a stop during decomposition.
///
/// 1. First run: extract, draft, auto-approve, format, then the model has no
///    answer for the second breakdown and decomposition fails.
/// 2. The phase stays `decomposing`; nothing after it exists.
/// 3. Second run resumes at decomposition and finishes all three steps.
#[test]
fn lifecycle_resumes_after_failed_decomposition() {
    let temp = temp_workspace();
    let root = temp.path();
    start(root);

    let first_model = ScriptedModel::new()
        .respond("draft", sample_plan_markdown())
        .respond("breakdown", SPLIT_FIRST);
    let exec = executor();
    let mut workflow = Workflow::open(root).expect("open");
    let err = workflow
        .run(&Capabilities {
            model: &first_model,
            executor: &exec,
            approval: &AutoApprove,
        })
        .unwrap_err();
    assert!(format!("{err:#}").contains("no scripted answer"), "{err:#}");
    assert_eq!(workflow.state().phase, Phase::Decomposing);
    assert!(!root.join("todo_creation_human/planning/decomposition.json").exists());
    assert!(exec.requests().is_empty());

    let second_model = ScriptedModel::new()
        .respond("breakdown", SPLIT_FIRST)
        .respond("breakdown", KEEP_SECOND);
    let mut workflow = Workflow::open(root).expect("reopen");
    let outcome = workflow
        .run(&Capabilities {
            model: &second_model,
            executor: &exec,
            approval: &AutoApprove,
        })
        .expect("resume");

    let RunOutcome::Done { summary } = &outcome else {
        panic!("expected done, got {outcome:?}");
    };
    assert_eq!(summary.total, 3);
    assert!(summary.all_passed());
    assert_eq!(outcome.exit_code(), todo_planner::exit_codes::OK);
    assert_eq!(workflow.state().phase, Phase::Done);
    assert_eq!(workflow.state().step_count, Some(3));

    // Sub-step 1 ran with the variable resolved.
    let requests = exec.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(
        requests[0].step.description,
        "Call the registry for account 123456789"
    );
    // Step 3 consumes endpoints.json, so step 2's learning flows into it.
    assert!(
        requests[2]
            .step
            .success_patterns
            .contains(&"Page through the registry 100 entries at a time".to_string())
    );
    assert!(
        requests[2]
            .guidance
            .iter()
            .any(|g| g.starts_with("Step 2 worked:"))
    );

    let manifest: VariableManifest =
        serde_json::from_str(&artifact(root, "variables/variables.json")).expect("manifest");
    assert_eq!(
        manifest.templated_objective,
        "Inventory the services in account {{AWS_ACCOUNT_ID}}"
    );
    let plan: Plan = serde_json::from_str(&artifact(root, "planning/plan.json")).expect("plan");
    let titles: Vec<&str> = plan.steps.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["List services", "Save endpoints", "Write report"]);

    for index in 1..=3 {
        assert!(artifact(root, &format!("validation/step_{index}_validation_report.md"))
            .contains("**Status**: COMPLETED"));
        artifact(root, &format!("learnings/step_{index}_learning.md"));
    }
    assert!(artifact(root, "learnings/success_patterns.md").contains("Page through the registry"));

    let deliverable = fs::read_to_string(root.join("todo_final.md")).expect("deliverable");
    assert!(deliverable.contains("3 of 3 steps passed validation."));
    assert!(deliverable.contains("{{AWS_ACCOUNT_ID}}"));
    assert!(!deliverable.contains("123456789"));
    let list = deliverable.find("### 1. [x] List services").expect("step 1");
    let report = deliverable.find("### 3. [x] Write report").expect("step 3");
    assert!(list < report);

    validate_workspace(root).expect("workspace validates");
}

/// Verifies every phase start and finish lands in `state/events.jsonl`, and
/// the approval wait is recorded as a suspension.
#[test]
fn events_are_logged_to_the_workspace() {
    let temp = temp_workspace();
    let root = temp.path();
    start(root);
    let model = ScriptedModel::new().respond("draft", sample_plan_markdown());
    let exec = ScriptedExecutor::new();

    let mut workflow = Workflow::open(root).expect("open");
    workflow
        .run(&Capabilities {
            model: &model,
            executor: &exec,
            approval: &DeferredApproval,
        })
        .expect("run");

    let events: Vec<PhaseEvent> = artifact(root, "state/events.jsonl")
        .lines()
        .map(|line| serde_json::from_str(line).expect("event"))
        .collect();
    let labels: Vec<String> = events
        .iter()
        .map(|e| format!("{}:{:?}", e.phase, e.kind))
        .collect();
    assert_eq!(
        labels,
        vec![
            "extracting:Started",
            "extracting:Finished",
            "drafting:Started",
            "drafting:Finished",
            "awaiting_approval:Suspended",
        ]
    );
    assert!(
        events
            .iter()
            .all(|e| e.workflow_id == workflow.state().workflow_id)
    );
}

/// A draft stored as `plan.md` before the run is reused instead of drafted.
#[test]
fn existing_plan_is_not_redrafted() {
    let temp = temp_workspace();
    let root = temp.path();
    start(root);
    fs::write(
        root.join("todo_creation_human/planning/plan.md"),
        sample_plan_markdown(),
    )
    .expect("seed plan");
    let model = ScriptedModel::new();
    let exec = ScriptedExecutor::new();

    let mut workflow = Workflow::open(root).expect("open");
    let outcome = workflow
        .run(&Capabilities {
            model: &model,
            executor: &exec,
            approval: &DeferredApproval,
        })
        .expect("run");
    assert!(matches!(outcome, RunOutcome::AwaitingApproval { .. }));
    assert!(model.requests().is_empty());
    assert_eq!(workflow.state().draft_revision, 1);
}

#[test]
fn malformed_plan_halts_formatting() {
    let temp = temp_workspace();
    let root = temp.path();
    start(root);
    let broken = sample_plan_markdown().replace(
        "- **Success Criteria**: report.txt lists every endpoint\n",
        "",
    );
    let model = ScriptedModel::new().respond("draft", broken);
    let exec = ScriptedExecutor::new();

    let mut workflow = Workflow::open(root).expect("open");
    let err = workflow
        .run(&Capabilities {
            model: &model,
            executor: &exec,
            approval: &AutoApprove,
        })
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<WorkflowError>(),
        Some(&WorkflowError::ParseError {
            missing_fields: vec!["steps[1].success_criteria".to_string()]
        })
    );
    assert_eq!(workflow.state().phase, Phase::Formatting);
    assert!(!root.join("todo_creation_human/planning/plan.json").exists());
}
