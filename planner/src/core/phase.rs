//! Workflow phase state machine.
//!
//! Transitions are pure; the orchestrator persists the resulting phase after
//! every step so a stopped run resumes where it left off.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};

/// Position of a workflow run. Step indices are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "step", rename_all = "snake_case")]
pub enum Phase {
    Extracting,
    Drafting,
    AwaitingApproval,
    /// The drafted plan was rejected; only a redraft leaves this state.
    Rejected,
    Formatting,
    Decomposing,
    Executing(usize),
    Validating(usize),
    Learning(usize),
    Synthesizing,
    Done,
}

/// Inputs that move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The current phase finished its work. `step_count` is the number of
    /// plan steps once known (needed after decomposition and learning).
    Completed { step_count: usize },
    Approved,
    Rejected,
    Redraft,
    /// Re-drive a step from outside after the loop has finished.
    Redrive { step: usize, step_count: usize },
}

impl Transition {
    fn action(self) -> &'static str {
        match self {
            Self::Completed { .. } => "complete the phase",
            Self::Approved => "approve",
            Self::Rejected => "reject",
            Self::Redraft => "redraft",
            Self::Redrive { .. } => "re-drive a step",
        }
    }
}

impl Phase {
    pub fn next(self, transition: Transition) -> Result<Phase> {
        use Transition::{Approved, Completed, Redraft, Redrive, Rejected};

        let next = match (self, transition) {
            (Self::Extracting, Completed { .. }) => Some(Self::Drafting),
            (Self::Drafting, Completed { .. }) => Some(Self::AwaitingApproval),
            (Self::AwaitingApproval, Approved) => Some(Self::Formatting),
            (Self::AwaitingApproval, Rejected) => Some(Self::Rejected),
            (Self::AwaitingApproval | Self::Rejected, Redraft) => Some(Self::Drafting),
            (Self::Formatting, Completed { .. }) => Some(Self::Decomposing),
            (Self::Decomposing, Completed { step_count }) if step_count > 0 => {
                Some(Self::Executing(1))
            }
            (Self::Executing(i), Completed { .. }) => Some(Self::Validating(i)),
            (Self::Validating(i), Completed { .. }) => Some(Self::Learning(i)),
            (Self::Learning(i), Completed { step_count }) if i < step_count => {
                Some(Self::Executing(i + 1))
            }
            (Self::Learning(_), Completed { .. }) => Some(Self::Synthesizing),
            (Self::Synthesizing, Completed { .. }) => Some(Self::Done),
            (Self::Synthesizing | Self::Done, Redrive { step, step_count })
                if (1..=step_count).contains(&step) =>
            {
                Some(Self::Executing(step))
            }
            _ => None,
        };
        next.ok_or_else(|| WorkflowError::InvalidTransition {
            phase: self.to_string(),
            action: transition.action().to_string(),
        })
    }

    /// Step index for per-step phases.
    pub fn step(self) -> Option<usize> {
        match self {
            Self::Executing(i) | Self::Validating(i) | Self::Learning(i) => Some(i),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Extracting => "extracting",
            Self::Drafting => "drafting",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Rejected => "rejected",
            Self::Formatting => "formatting",
            Self::Decomposing => "decomposing",
            Self::Executing(_) => "executing",
            Self::Validating(_) => "validating",
            Self::Learning(_) => "learning",
            Self::Synthesizing => "synthesizing",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step() {
            Some(step) => write!(f, "{}({step})", self.name()),
            None => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done(step_count: usize) -> Transition {
        Transition::Completed { step_count }
    }

    /// Verifies the happy path visits every phase in order.
    #[test]
    fn walks_full_pipeline() {
        let mut phase = Phase::Extracting;
        let mut seen = vec![phase.to_string()];
        while phase != Phase::Done {
            phase = match phase {
                Phase::AwaitingApproval => phase.next(Transition::Approved),
                _ => phase.next(done(2)),
            }
            .expect("transition");
            seen.push(phase.to_string());
        }
        assert_eq!(
            seen,
            vec![
                "extracting",
                "drafting",
                "awaiting_approval",
                "formatting",
                "decomposing",
                "executing(1)",
                "validating(1)",
                "learning(1)",
                "executing(2)",
                "validating(2)",
                "learning(2)",
                "synthesizing",
                "done",
            ]
        );
    }

    #[test]
    fn approval_cannot_be_skipped() {
        let err = Phase::AwaitingApproval.next(done(1)).unwrap_err();
        assert_eq!(
            err,
            WorkflowError::InvalidTransition {
                phase: "awaiting_approval".to_string(),
                action: "complete the phase".to_string(),
            }
        );
    }

    #[test]
    fn rejection_is_terminal_until_redraft() {
        let rejected = Phase::AwaitingApproval
            .next(Transition::Rejected)
            .expect("reject");
        assert_eq!(rejected, Phase::Rejected);
        assert!(rejected.next(done(1)).is_err());
        assert!(rejected.next(Transition::Approved).is_err());
        assert_eq!(rejected.next(Transition::Redraft), Ok(Phase::Drafting));
    }

    #[test]
    fn redrive_only_after_the_loop() {
        let redrive = Transition::Redrive {
            step: 2,
            step_count: 3,
        };
        assert_eq!(Phase::Done.next(redrive), Ok(Phase::Executing(2)));
        assert!(Phase::Executing(3).next(redrive).is_err());
        assert!(
            Phase::Done
                .next(Transition::Redrive {
                    step: 4,
                    step_count: 3
                })
                .is_err()
        );
    }

    #[test]
    fn phase_serializes_with_step() {
        let json = serde_json::to_value(Phase::Validating(2)).expect("serialize");
        assert_eq!(json, serde_json::json!({"name": "validating", "step": 2}));
        let json = serde_json::to_value(Phase::Done).expect("serialize");
        assert_eq!(json, serde_json::json!({"name": "done"}));
    }
}
