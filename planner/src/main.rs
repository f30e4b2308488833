//! Human-gated planning workflow CLI.
//!
//! Drives one workflow run per workspace (`todo_creation_human/`): extract
//! variables, draft a plan, wait for approval, then execute, validate and
//! learn from each step before writing `todo_final.md`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

use todo_planner::agents::executor::AgentStepExecutor;
use todo_planner::agents::{AgentSettings, agents_dir};
use todo_planner::exit_codes;
use todo_planner::io::approval::DeferredApproval;
use todo_planner::io::llm::CodexModel;
use todo_planner::io::lock::WorkspaceLock;
use todo_planner::logging;
use todo_planner::start::{StartOptions, start_workflow};
use todo_planner::validate::validate_workspace;
use todo_planner::workflow::{Capabilities, RunOutcome, Workflow};

#[derive(Parser)]
#[command(
    name = "todo-planner",
    version,
    about = "Human-gated plan-and-execute workflow over a file-backed workspace"
)]
struct Cli {
    /// Workspace root holding `todo_creation_human/`.
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new workflow for an objective.
    Start {
        #[command(flatten)]
        objective: ObjectiveArgs,
        /// Discard an existing workflow in this workspace.
        #[arg(long)]
        force: bool,
    },
    /// Advance the workflow until it needs approval or finishes.
    Run,
    /// Approve the drafted plan.
    Approve {
        #[arg(long)]
        feedback: Option<String>,
    },
    /// Reject the drafted plan.
    Reject {
        #[arg(long)]
        feedback: String,
    },
    /// Archive the current draft and draft again.
    Redraft {
        #[arg(long)]
        feedback: Option<String>,
    },
    /// Execute, validate and learn from one step again.
    Redrive {
        #[arg(long)]
        step: usize,
    },
    /// Print the workflow phase.
    Status,
    /// Check every present artifact against its schema and invariants.
    Validate,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ObjectiveArgs {
    #[arg(long)]
    objective: Option<String>,
    /// Read the objective from a file.
    #[arg(long)]
    objective_file: Option<PathBuf>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = cli.workspace.as_path();
    debug!(root = %root.display(), "workspace");
    match cli.command {
        Command::Start { objective, force } => cmd_start(root, &objective, force),
        Command::Run => cmd_run(root),
        Command::Approve { feedback } => mutate(root, |workflow| workflow.approve(feedback)),
        Command::Reject { feedback } => mutate(root, |workflow| workflow.reject(feedback)),
        Command::Redraft { feedback } => mutate(root, |workflow| workflow.redraft(feedback)),
        Command::Redrive { step } => mutate(root, |workflow| workflow.redrive(step)),
        Command::Status => cmd_status(root),
        Command::Validate => cmd_validate(root),
    }
}

fn cmd_start(root: &Path, objective: &ObjectiveArgs, force: bool) -> Result<i32> {
    let objective = match (&objective.objective, &objective.objective_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
        }
        (None, None) => bail!("one of --objective or --objective-file is required"),
    };
    let _lock = WorkspaceLock::acquire(root)?;
    let outcome = start_workflow(root, &StartOptions { objective, force })?;
    println!("{}", outcome.workflow_id);
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path) -> Result<i32> {
    let _lock = WorkspaceLock::acquire(root)?;
    let mut workflow = Workflow::open(root)?;
    let config = workflow.config().clone();
    let model = CodexModel::new(&config.llm);
    let executor = AgentStepExecutor::new(
        &model,
        &agents_dir(root),
        AgentSettings::execution(&config),
    );
    let outcome = workflow.run(&Capabilities {
        model: &model,
        executor: &executor,
        approval: &DeferredApproval,
    })?;
    match &outcome {
        RunOutcome::AwaitingApproval { plan_digest } => {
            println!("awaiting approval of todo_creation_human/planning/plan.md ({plan_digest})");
        }
        RunOutcome::Rejected { feedback } => {
            println!(
                "plan rejected: {}",
                feedback.as_deref().unwrap_or("no feedback")
            );
        }
        RunOutcome::Done { summary } => {
            println!(
                "done: {} of {} steps passed",
                summary.passed, summary.total
            );
            for step in &summary.failed {
                println!("step {step} failed validation");
            }
        }
    }
    Ok(outcome.exit_code())
}

/// Apply one state-changing command under the workspace lock.
fn mutate(root: &Path, apply: impl FnOnce(&mut Workflow) -> Result<()>) -> Result<i32> {
    let _lock = WorkspaceLock::acquire(root)?;
    let mut workflow = Workflow::open(root)?;
    apply(&mut workflow)?;
    println!("{}", workflow.state().phase);
    Ok(exit_codes::OK)
}

fn cmd_status(root: &Path) -> Result<i32> {
    let workflow = Workflow::open(root)?;
    let state = workflow.state();
    println!("workflow: {}", state.workflow_id);
    println!("phase: {}", state.phase);
    println!("draft revision: {}", state.draft_revision);
    if let Some(steps) = state.step_count {
        println!("steps: {steps}");
    }
    if let Some(approval) = &state.approval {
        println!(
            "approval: {:?} at {} ({})",
            approval.decision, approval.decided_at, approval.plan_digest
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path) -> Result<i32> {
    let outcome = validate_workspace(root)?;
    match (&outcome.workflow_id, outcome.phase) {
        (Some(id), Some(phase)) => println!("workflow {id} at {phase}"),
        _ => println!("no workflow started"),
    }
    for path in &outcome.checked {
        println!("ok {path}");
    }
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_start_with_objective() {
        let cli = Cli::parse_from(["todo-planner", "start", "--objective", "Ship it"]);
        let Command::Start { objective, force } = cli.command else {
            panic!("expected start");
        };
        assert_eq!(objective.objective.as_deref(), Some("Ship it"));
        assert!(!force);
        assert_eq!(cli.workspace, PathBuf::from("."));
    }

    #[test]
    fn start_requires_exactly_one_objective_source() {
        assert!(Cli::try_parse_from(["todo-planner", "start"]).is_err());
        assert!(
            Cli::try_parse_from([
                "todo-planner",
                "start",
                "--objective",
                "a",
                "--objective-file",
                "b.txt",
            ])
            .is_err()
        );
    }

    #[test]
    fn parse_global_workspace_after_subcommand() {
        let cli = Cli::parse_from(["todo-planner", "redrive", "--step", "3", "--workspace", "/tmp/w"]);
        assert!(matches!(cli.command, Command::Redrive { step: 3 }));
        assert_eq!(cli.workspace, PathBuf::from("/tmp/w"));
    }

    #[test]
    fn reject_requires_feedback() {
        assert!(Cli::try_parse_from(["todo-planner", "reject"]).is_err());
    }
}
