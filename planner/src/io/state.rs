//! Orchestrator bookkeeping (`todo_creation_human/state/state.json`).

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::phase::{Phase, Transition};
use crate::io::approval::ApprovalRecord;
use crate::io::workspace::{Area, AreaWriter, STATE_FILE, WorkspaceReader};

/// Persisted position and history of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub objective: String,
    pub phase: Phase,
    /// sha256 of `planning/plan.md` as last drafted.
    pub plan_digest: Option<String>,
    pub approval: Option<ApprovalRecord>,
    /// Number of drafts produced so far (1 after the first draft).
    pub draft_revision: u32,
    /// Reviewer feedback for the next draft.
    pub feedback: Option<String>,
    pub step_count: Option<usize>,
    pub created_at: String,
    pub updated_at: String,
}

impl WorkflowState {
    pub fn new(objective: impl Into<String>) -> Self {
        let now = timestamp();
        Self {
            workflow_id: new_workflow_id(),
            objective: objective.into(),
            phase: Phase::Extracting,
            plan_digest: None,
            approval: None,
            draft_revision: 0,
            feedback: None,
            step_count: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Apply `transition`, stamping `updated_at`.
    pub fn advance(&mut self, transition: Transition) -> Result<Phase> {
        let next = self.phase.next(transition)?;
        debug!(from = %self.phase, to = %next, "phase transition");
        self.phase = next;
        self.updated_at = timestamp();
        Ok(next)
    }
}

/// `wf-<utc timestamp>-<random hex>`.
pub fn new_workflow_id() -> String {
    let suffix: u32 = rand::thread_rng().r#gen();
    format!("wf-{}-{suffix:08x}", Utc::now().format("%Y%m%dT%H%M%SZ"))
}

/// RFC 3339 UTC timestamp with second precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn load_state(reader: &WorkspaceReader<'_>) -> Result<Option<WorkflowState>> {
    let state: Option<WorkflowState> = reader
        .read_json(Area::Control, STATE_FILE)
        .context("load workflow state")?;
    if let Some(state) = &state {
        debug!(workflow_id = %state.workflow_id, phase = %state.phase, "workflow state loaded");
    }
    Ok(state)
}

/// Atomically replace `state.json`.
pub fn save_state(control: &AreaWriter<'_>, state: &WorkflowState) -> Result<()> {
    debug!(workflow_id = %state.workflow_id, phase = %state.phase, "writing workflow state");
    control
        .write_json(STATE_FILE, state)
        .context("write workflow state")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkflowError;
    use crate::io::workspace::FsWorkspace;

    #[test]
    fn workflow_ids_have_expected_shape() {
        let id = new_workflow_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "wf");
        assert!(parts[1].ends_with('Z'));
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    /// Verifies the phase serializes as `{"name": ..., "step": ...}` and the
    /// state survives a save/load cycle.
    #[test]
    fn state_round_trips_through_control_area() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsWorkspace::new(temp.path());
        let control = AreaWriter::new(&store, Area::Control);
        let reader = WorkspaceReader::new(&store);

        let mut state = WorkflowState::new("Deploy app");
        state.phase = Phase::Executing(2);
        state.step_count = Some(3);
        save_state(&control, &state).expect("save");

        let raw = std::fs::read_to_string(
            temp.path().join("todo_creation_human/state/state.json"),
        )
        .expect("read");
        assert!(raw.contains("\"phase\": {\n    \"name\": \"executing\",\n    \"step\": 2\n  }"));
        assert_eq!(load_state(&reader).expect("load"), Some(state));
    }

    #[test]
    fn illegal_transition_leaves_phase_unchanged() {
        let mut state = WorkflowState::new("x");
        let err = state.advance(Transition::Approved).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkflowError>(),
            Some(WorkflowError::InvalidTransition { .. })
        ));
        assert_eq!(state.phase, Phase::Extracting);
    }
}
