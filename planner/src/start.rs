//! Starting a new workflow run.
//!
//! Starting lays out `todo_creation_human/`, writes a default `config.toml`
//! when none exists and records the objective in `state/state.json` at
//! `extracting`. Nothing runs until `todo-planner run`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::io::config::{PlannerConfig, write_config};
use crate::io::state::{WorkflowState, load_state, save_state};
use crate::io::workspace::{
    AGENTS_DIR, Area, AreaWriter, EVENTS_FILE, FINAL_FILE, FsWorkspace, STATE_FILE,
    WorkspaceReader, config_path,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
    pub objective: String,
    /// Discard an existing run (its artifacts, not `config.toml`).
    pub force: bool,
}

/// Outcome of `todo-planner start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub workflow_id: String,
    pub config_written: bool,
}

const ARTIFACT_AREAS: [Area; 5] = [
    Area::Variables,
    Area::Planning,
    Area::Execution,
    Area::Validation,
    Area::Learnings,
];

pub fn start_workflow(root: &Path, options: &StartOptions) -> Result<StartOutcome> {
    let objective = options.objective.trim();
    if objective.is_empty() {
        bail!("objective must be non-empty");
    }
    debug!(root = %root.display(), force = options.force, "starting workflow");

    let store = FsWorkspace::new(root);
    if let Some(existing) = load_state(&WorkspaceReader::new(&store))? {
        if !options.force {
            bail!(
                "workflow {} already exists in {} (phase {}); use --force to start over",
                existing.workflow_id,
                root.display(),
                existing.phase
            );
        }
        info!(workflow_id = %existing.workflow_id, "discarding existing workflow");
        reset(root)?;
    }

    for area in ARTIFACT_AREAS.into_iter().chain([Area::Control]) {
        let dir = root.join(area.dir());
        fs::create_dir_all(&dir).with_context(|| format!("create directory {}", dir.display()))?;
    }

    let config_path = config_path(root);
    let config_written = !config_path.exists();
    if config_written {
        write_config(&config_path, &PlannerConfig::default())?;
    }

    let state = WorkflowState::new(objective);
    save_state(&AreaWriter::new(&store, Area::Control), &state)?;
    info!(workflow_id = %state.workflow_id, "workflow started");
    Ok(StartOutcome {
        workflow_id: state.workflow_id,
        config_written,
    })
}

/// Remove run artifacts. The lock file under `state/` is left alone since
/// the caller holds it.
fn reset(root: &Path) -> Result<()> {
    for area in ARTIFACT_AREAS {
        remove_path(&root.join(area.dir()))?;
    }
    for name in [STATE_FILE, EVENTS_FILE, AGENTS_DIR] {
        remove_path(&root.join(Area::Control.path(name)))?;
    }
    remove_path(&root.join(FINAL_FILE))
}

fn remove_path(path: &Path) -> Result<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        return Ok(());
    };
    result.with_context(|| format!("remove {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::phase::Phase;
    use crate::io::config::load_config;
    use crate::test_support::temp_workspace;

    fn options(force: bool) -> StartOptions {
        StartOptions {
            objective: "Deploy app to account 123456789".to_string(),
            force,
        }
    }

    #[test]
    fn start_writes_config_and_state() {
        let temp = temp_workspace();
        let outcome = start_workflow(temp.path(), &options(false)).expect("start");
        assert!(outcome.config_written);
        assert!(outcome.workflow_id.starts_with("wf-"));

        let cfg = load_config(&config_path(temp.path())).expect("config");
        assert_eq!(cfg, PlannerConfig::default());
        let store = FsWorkspace::new(temp.path());
        let state = load_state(&WorkspaceReader::new(&store))
            .expect("load")
            .expect("state");
        assert_eq!(state.phase, Phase::Extracting);
        assert_eq!(state.objective, "Deploy app to account 123456789");
    }

    #[test]
    fn second_start_requires_force() {
        let temp = temp_workspace();
        let first = start_workflow(temp.path(), &options(false)).expect("start");
        let err = start_workflow(temp.path(), &options(false)).unwrap_err();
        assert!(err.to_string().contains("--force"), "{err}");

        fs::write(temp.path().join(FINAL_FILE), "old").expect("seed deliverable");
        fs::write(
            temp.path().join("todo_creation_human/planning/plan.md"),
            "old plan",
        )
        .expect("seed plan");
        let second = start_workflow(temp.path(), &options(true)).expect("restart");
        assert_ne!(first.workflow_id, second.workflow_id);
        assert!(!second.config_written);
        assert!(!temp.path().join(FINAL_FILE).exists());
        assert!(
            !temp
                .path()
                .join("todo_creation_human/planning/plan.md")
                .exists()
        );
    }

    #[test]
    fn empty_objective_is_refused() {
        let temp = temp_workspace();
        let err = start_workflow(
            temp.path(),
            &StartOptions {
                objective: "   ".to_string(),
                force: false,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("non-empty"));
    }
}
