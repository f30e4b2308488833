//! Phase driver for one workflow run.
//!
//! [`Workflow::run`] advances the persisted phase until the run suspends
//! (awaiting approval, rejected) or finishes. `state.json` is rewritten after
//! every transition, so a stopped process resumes at the phase it was in and
//! each phase reuses whatever its predecessor already left in the workspace.
//!
//! Approval, rejection, redraft and re-drive are separate entry points; they
//! are the only ways to move a suspended or finished run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info};

use crate::agents::executor::StepExecutor;
use crate::core::learning::LearningRecord;
use crate::core::phase::{Phase, Transition};
use crate::core::synthesis::{SynthesisSummary, synthesize};
use crate::core::types::{Plan, VariableManifest};
use crate::exit_codes;
use crate::io::approval::{ApprovalChannel, ApprovalDecision, ApprovalRecord, Decision, plan_digest};
use crate::io::config::{PlannerConfig, load_config};
use crate::io::events::{EventKind, EventSink, FanOut, JsonlEventLog, PhaseEvent, TracingSink, publish};
use crate::io::llm::LanguageModel;
use crate::io::state::{WorkflowState, load_state, save_state, timestamp};
use crate::io::workspace::{
    Area, AreaWriter, EVENTS_FILE, FsWorkspace, LEARNING_RECORD, PLAN_JSON, PLAN_MARKDOWN,
    VARIABLES_FILE, WorkspaceReader, config_path, evidence_name, learning_name, report_name,
    verdict_name,
};
use crate::phases::draft::Revision;
use crate::phases::{decompose, draft, extract, format, steps, synthesize as synthesis};

/// External capabilities a run is driven with.
#[derive(Clone, Copy)]
pub struct Capabilities<'a> {
    pub model: &'a dyn LanguageModel,
    pub executor: &'a dyn StepExecutor,
    pub approval: &'a dyn ApprovalChannel,
}

/// Where [`Workflow::run`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Suspended until a decision on the plan with this digest is recorded.
    AwaitingApproval { plan_digest: String },
    Rejected { feedback: Option<String> },
    Done { summary: SynthesisSummary },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::AwaitingApproval { .. } => exit_codes::AWAITING_APPROVAL,
            Self::Rejected { .. } => exit_codes::REJECTED,
            Self::Done { summary } if summary.all_passed() => exit_codes::OK,
            Self::Done { .. } => exit_codes::STEPS_FAILED,
        }
    }
}

/// Manifest, plan and learning record shared by the per-step phases.
struct StepContext {
    manifest: VariableManifest,
    plan: Plan,
    record: LearningRecord,
}

/// Phase events to tracing and to `state/events.jsonl`.
pub fn workspace_events(root: &Path) -> FanOut {
    FanOut::new(vec![
        Box::new(TracingSink),
        Box::new(JsonlEventLog::new(root.join(Area::Control.path(EVENTS_FILE)))),
    ])
}

pub struct Workflow {
    root: PathBuf,
    config: PlannerConfig,
    state: WorkflowState,
    events: Box<dyn EventSink>,
}

impl Workflow {
    /// Open the run started in `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let config = load_config(&config_path(root)).context("load config.toml")?;
        let store = FsWorkspace::new(root);
        let state = load_state(&WorkspaceReader::new(&store))?.ok_or_else(|| {
            anyhow!(
                "no workflow in {} (run `todo-planner start` first)",
                root.display()
            )
        })?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
            state,
            events: Box::new(workspace_events(root)),
        })
    }

    pub fn with_events(mut self, events: Box<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Advance until the run suspends or finishes.
    ///
    /// A failing phase is reported and leaves the persisted phase unchanged.
    /// A failed step verdict is not a failure here; it shows up in the
    /// [`RunOutcome::Done`] summary.
    pub fn run(&mut self, caps: &Capabilities<'_>) -> Result<RunOutcome> {
        let store = FsWorkspace::new(&self.root);
        let reader = WorkspaceReader::new(&store);
        let mut context: Option<StepContext> = None;

        loop {
            let phase = self.state.phase;
            match phase {
                Phase::AwaitingApproval => {
                    let markdown =
                        reader.require(Area::Planning, PLAN_MARKDOWN, "awaiting_approval")?;
                    match caps.approval.decide(&markdown)? {
                        Some(decision) => {
                            self.record_decision(&store, decision)?;
                            continue;
                        }
                        None => {
                            self.emit(
                                PhaseEvent::new(&self.state.workflow_id, phase, EventKind::Suspended)
                                    .with_detail("waiting for approve or reject"),
                            );
                            return Ok(RunOutcome::AwaitingApproval {
                                plan_digest: plan_digest(&markdown),
                            });
                        }
                    }
                }
                Phase::Rejected => {
                    return Ok(RunOutcome::Rejected {
                        feedback: self.state.feedback.clone(),
                    });
                }
                Phase::Done => {
                    let ctx = load_context(&reader, &mut context, "done")?;
                    let verdicts = synthesis::load_verdicts(ctx.plan.step_count(), &reader)?;
                    let summary = synthesize(&ctx.manifest, &ctx.plan, &verdicts)?.summary;
                    return Ok(RunOutcome::Done { summary });
                }
                _ => {}
            }

            self.emit(PhaseEvent::new(
                &self.state.workflow_id,
                phase,
                EventKind::Started,
            ));
            if let Err(err) = self.run_phase(phase, &store, &reader, caps, &mut context) {
                self.emit(
                    PhaseEvent::new(&self.state.workflow_id, phase, EventKind::Failed)
                        .with_detail(format!("{err:#}")),
                );
                return Err(err);
            }
            self.emit(PhaseEvent::new(
                &self.state.workflow_id,
                phase,
                EventKind::Finished,
            ));

            let step_count = self.state.step_count.unwrap_or_default();
            self.state.advance(Transition::Completed { step_count })?;
            self.save(&store)?;
        }
    }

    fn run_phase(
        &mut self,
        phase: Phase,
        store: &FsWorkspace,
        reader: &WorkspaceReader<'_>,
        caps: &Capabilities<'_>,
        context: &mut Option<StepContext>,
    ) -> Result<()> {
        match phase {
            Phase::Extracting => {
                extract::run(
                    &self.state.objective,
                    reader,
                    &AreaWriter::new(store, Area::Variables),
                    &self.config,
                    caps.model,
                )?;
            }
            Phase::Drafting => {
                let manifest: VariableManifest =
                    reader.require_json(Area::Variables, VARIABLES_FILE, "drafting")?;
                let markdown = draft::run(
                    &manifest,
                    Revision {
                        previous: self.state.draft_revision,
                        feedback: self.state.feedback.as_deref(),
                    },
                    reader,
                    &AreaWriter::new(store, Area::Planning),
                    &self.config,
                    caps.model,
                )?;
                let digest = plan_digest(&markdown);
                if self.state.plan_digest.as_deref() != Some(digest.as_str()) {
                    self.state.draft_revision += 1;
                }
                self.state.plan_digest = Some(digest);
                self.state.feedback = None;
            }
            Phase::Formatting => {
                let approved = match &self.state.approval {
                    Some(record) if record.decision == Decision::Approved => {
                        record.plan_digest.clone()
                    }
                    _ => bail!("formatting requires an approved plan"),
                };
                format::run(&approved, reader, &AreaWriter::new(store, Area::Planning))?;
            }
            Phase::Decomposing => {
                let decomposition = decompose::run(
                    reader,
                    &AreaWriter::new(store, Area::Planning),
                    &self.config,
                    caps.model,
                )?;
                self.state.step_count = Some(decomposition.plan.step_count());
                *context = None;
            }
            Phase::Executing(index) => {
                let ctx = load_context(reader, context, "executing")?;
                steps::execute(
                    index,
                    &ctx.plan,
                    &ctx.manifest,
                    &ctx.record,
                    reader,
                    &AreaWriter::new(store, Area::Execution),
                    caps.executor,
                )?;
            }
            Phase::Validating(index) => {
                let ctx = load_context(reader, context, "validating")?;
                steps::validate(
                    index,
                    &ctx.plan,
                    &ctx.record,
                    reader,
                    &AreaWriter::new(store, Area::Validation),
                    &self.config,
                    caps.model,
                )?;
            }
            Phase::Learning(index) => {
                let ctx = load_context(reader, context, "learning")?;
                steps::learn(
                    index,
                    &mut ctx.plan,
                    &mut ctx.record,
                    reader,
                    &AreaWriter::new(store, Area::Learnings),
                    &self.config,
                )?;
            }
            Phase::Synthesizing => {
                let ctx = load_context(reader, context, "synthesizing")?;
                synthesis::run(
                    &ctx.manifest,
                    &ctx.plan,
                    reader,
                    &AreaWriter::new(store, Area::Deliverable),
                )?;
            }
            Phase::AwaitingApproval | Phase::Rejected | Phase::Done => {
                bail!("phase {phase} does not run")
            }
        }
        Ok(())
    }

    /// Approve the current `plan.md`.
    pub fn approve(&mut self, feedback: Option<String>) -> Result<()> {
        let store = FsWorkspace::new(&self.root);
        self.record_decision(
            &store,
            ApprovalDecision {
                decision: Decision::Approved,
                feedback,
            },
        )
    }

    /// Reject the current `plan.md`. The feedback feeds the next redraft.
    pub fn reject(&mut self, feedback: String) -> Result<()> {
        let store = FsWorkspace::new(&self.root);
        self.record_decision(&store, ApprovalDecision::reject(feedback))
    }

    fn record_decision(&mut self, store: &FsWorkspace, decision: ApprovalDecision) -> Result<()> {
        let transition = match decision.decision {
            Decision::Approved => Transition::Approved,
            Decision::Rejected => Transition::Rejected,
        };
        self.state.phase.next(transition)?;

        let markdown =
            WorkspaceReader::new(store).require(Area::Planning, PLAN_MARKDOWN, "awaiting_approval")?;
        let digest = plan_digest(&markdown);
        let phase = self.state.phase;
        self.state.advance(transition)?;
        if decision.decision == Decision::Rejected {
            self.state.feedback = decision.feedback.clone();
        }
        self.state.plan_digest = Some(digest.clone());
        self.state.approval = Some(ApprovalRecord {
            decision: decision.decision,
            plan_digest: digest,
            feedback: decision.feedback,
            decided_at: timestamp(),
        });
        self.save(store)?;

        let label = match decision.decision {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        };
        info!(workflow_id = %self.state.workflow_id, decision = label, "plan decision recorded");
        self.emit(
            PhaseEvent::new(&self.state.workflow_id, phase, EventKind::Finished).with_detail(label),
        );
        Ok(())
    }

    /// Archive the current draft and return to drafting.
    ///
    /// `feedback` replaces any feedback recorded by a rejection.
    pub fn redraft(&mut self, feedback: Option<String>) -> Result<()> {
        self.state.phase.next(Transition::Redraft)?;
        let store = FsWorkspace::new(&self.root);
        draft::archive(
            self.state.draft_revision,
            &WorkspaceReader::new(&store),
            &AreaWriter::new(&store, Area::Planning),
        )?;
        if feedback.is_some() {
            self.state.feedback = feedback;
        }
        self.state.approval = None;
        self.state.advance(Transition::Redraft)?;
        self.save(&store)?;
        info!(
            workflow_id = %self.state.workflow_id,
            revision = self.state.draft_revision,
            "redraft requested"
        );
        Ok(())
    }

    /// Re-drive step `step` of a finished loop.
    ///
    /// The step's evidence, verdict, report and learning are moved aside as
    /// `*.superseded-<k>`; later steps keep theirs.
    pub fn redrive(&mut self, step: usize) -> Result<()> {
        let transition = Transition::Redrive {
            step,
            step_count: self.state.step_count.unwrap_or_default(),
        };
        self.state.phase.next(transition)?;

        let store = FsWorkspace::new(&self.root);
        let superseded = [
            (Area::Execution, evidence_name(step)),
            (Area::Validation, verdict_name(step)),
            (Area::Validation, report_name(step)),
            (Area::Learnings, learning_name(step)),
        ];
        for (area, name) in superseded {
            if let Some(moved) = AreaWriter::new(&store, area).supersede(&name)? {
                debug!(area = %area, from = %name, to = %moved, "superseded step artifact");
            }
        }
        self.state.advance(transition)?;
        self.save(&store)?;
        info!(workflow_id = %self.state.workflow_id, step, "step re-driven");
        Ok(())
    }

    fn save(&self, store: &FsWorkspace) -> Result<()> {
        save_state(&AreaWriter::new(store, Area::Control), &self.state)
    }

    fn emit(&self, event: PhaseEvent) {
        publish(self.events.as_ref(), &event);
    }
}

/// Load the step context once per [`Workflow::run`], re-applying recorded
/// learnings to the plan read from disk.
fn load_context<'c>(
    reader: &WorkspaceReader<'_>,
    slot: &'c mut Option<StepContext>,
    phase: &str,
) -> Result<&'c mut StepContext> {
    let context = match slot.take() {
        Some(context) => context,
        None => {
            let manifest = reader.require_json(Area::Variables, VARIABLES_FILE, phase)?;
            let mut plan: Plan = reader.require_json(Area::Planning, PLAN_JSON, phase)?;
            let record: LearningRecord = reader
                .read_json(Area::Learnings, LEARNING_RECORD)?
                .unwrap_or_default();
            record.annotate(&mut plan);
            StepContext {
                manifest,
                plan,
                record,
            }
        }
    };
    Ok(slot.insert(context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkflowError;
    use crate::io::events::NullSink;
    use crate::start::{StartOptions, start_workflow};
    use crate::test_support::{
        AutoApprove, AutoReject, ScriptedExecutor, ScriptedModel, file_evidence,
        sample_plan_markdown, temp_workspace,
    };

    const OBJECTIVE: &str = "Inventory the services in account 123456789";

    fn started(root: &Path) -> Workflow {
        start_workflow(
            root,
            &StartOptions {
                objective: OBJECTIVE.to_string(),
                force: false,
            },
        )
        .expect("start");
        Workflow::open(root)
            .expect("open")
            .with_events(Box::new(NullSink))
    }

    #[test]
    fn suspends_after_drafting_without_a_decision() {
        let temp = temp_workspace();
        let mut workflow = started(temp.path());
        let model = ScriptedModel::new().respond("draft", sample_plan_markdown());
        let executor = ScriptedExecutor::new();

        let outcome = workflow
            .run(&Capabilities {
                model: &model,
                executor: &executor,
                approval: &crate::io::approval::DeferredApproval,
            })
            .expect("run");

        assert_eq!(
            outcome,
            RunOutcome::AwaitingApproval {
                plan_digest: plan_digest(&sample_plan_markdown())
            }
        );
        assert_eq!(outcome.exit_code(), exit_codes::AWAITING_APPROVAL);
        assert_eq!(workflow.state().phase, Phase::AwaitingApproval);
        assert_eq!(workflow.state().draft_revision, 1);
        assert!(executor.requests().is_empty());

        let reopened = Workflow::open(temp.path()).expect("reopen");
        assert_eq!(reopened.state().phase, Phase::AwaitingApproval);
    }

    #[test]
    fn rejection_is_terminal_until_redraft() {
        let temp = temp_workspace();
        let mut workflow = started(temp.path());
        let model = ScriptedModel::new()
            .respond("draft", sample_plan_markdown())
            .respond("draft", sample_plan_markdown().replace("write the report", "write it"));
        let executor = ScriptedExecutor::new();

        let outcome = workflow
            .run(&Capabilities {
                model: &model,
                executor: &executor,
                approval: &AutoReject("split the report step"),
            })
            .expect("run");
        assert_eq!(
            outcome,
            RunOutcome::Rejected {
                feedback: Some("split the report step".to_string())
            }
        );

        let err = workflow.approve(None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkflowError>(),
            Some(WorkflowError::InvalidTransition { .. })
        ));

        workflow.redraft(None).expect("redraft");
        assert_eq!(workflow.state().phase, Phase::Drafting);
        assert!(
            temp.path()
                .join("todo_creation_human/planning/plan.rev1.md")
                .exists()
        );

        workflow
            .run(&Capabilities {
                model: &model,
                executor: &executor,
                approval: &crate::io::approval::DeferredApproval,
            })
            .expect("rerun");
        assert_eq!(workflow.state().draft_revision, 2);
        let prompts = model.prompts_for("draft");
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("split the report step"));
    }

    /// Verifies a plan edited after approval is refused before formatting.
    #[test]
    fn edited_plan_after_approval_is_stale() {
        let temp = temp_workspace();
        let mut workflow = started(temp.path());
        let model = ScriptedModel::new().respond("draft", sample_plan_markdown());
        let executor = ScriptedExecutor::new();
        let caps = Capabilities {
            model: &model,
            executor: &executor,
            approval: &crate::io::approval::DeferredApproval,
        };
        workflow.run(&caps).expect("draft");
        workflow.approve(None).expect("approve");

        std::fs::write(
            temp.path().join("todo_creation_human/planning/plan.md"),
            sample_plan_markdown() + "\nEdited.\n",
        )
        .expect("edit");

        let err = workflow.run(&caps).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkflowError>(),
            Some(WorkflowError::StaleApproval { .. })
        ));
        assert_eq!(workflow.state().phase, Phase::Formatting);
    }

    #[test]
    fn runs_to_done_and_redrives_a_failed_step() {
        let temp = temp_workspace();
        let mut workflow = started(temp.path());
        let mut config = workflow.config().clone();
        config.decomposition.enabled = false;
        workflow.config = config;

        let model = ScriptedModel::new().respond("draft", sample_plan_markdown());
        let executor = ScriptedExecutor::new()
            .then(
                file_evidence("endpoints.json", &["svc-a"]),
                &[("endpoints.json", "[\"svc-a\"]")],
            )
            .then(file_evidence("report.txt", &["svc-a"]), &[])
            .then(
                file_evidence("report.txt", &["svc-a"]),
                &[("report.txt", "svc-a: https://svc-a")],
            );
        let caps = Capabilities {
            model: &model,
            executor: &executor,
            approval: &AutoApprove,
        };

        let outcome = workflow.run(&caps).expect("run");
        let RunOutcome::Done { summary } = &outcome else {
            panic!("expected done, got {outcome:?}");
        };
        assert_eq!(summary.failed, vec![2]);
        assert_eq!(outcome.exit_code(), exit_codes::STEPS_FAILED);
        assert!(temp.path().join("todo_final.md").exists());

        workflow.redrive(2).expect("redrive");
        assert_eq!(workflow.state().phase, Phase::Executing(2));
        let outcome = workflow.run(&caps).expect("rerun");
        assert_eq!(outcome.exit_code(), exit_codes::OK);

        let requests = executor.requests();
        assert_eq!(requests.len(), 3);
        assert!(
            requests[2]
                .guidance
                .iter()
                .any(|g| g.contains("Previous attempt of this step failed"))
        );
        assert!(
            temp.path()
                .join("todo_creation_human/validation/step_2_verdict.json.superseded-1")
                .exists()
        );
    }

    #[test]
    fn redrive_requires_a_finished_loop() {
        let temp = temp_workspace();
        let mut workflow = started(temp.path());
        let err = workflow.redrive(1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkflowError>(),
            Some(WorkflowError::InvalidTransition { .. })
        ));
    }
}
