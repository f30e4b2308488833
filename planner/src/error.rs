//! Typed workflow errors.
//!
//! Pure `core` functions return these directly. Orchestration code wraps them
//! in `anyhow::Error`; callers recover the variant with
//! `err.downcast_ref::<WorkflowError>()`.

use thiserror::Error;

/// Result type for pure workflow logic.
pub type Result<T> = std::result::Result<T, WorkflowError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    /// One literal value was proposed under more than one variable name.
    #[error("value '{value}' maps to conflicting variable names: {}", names.join(", "))]
    ExtractionAmbiguous { value: String, names: Vec<String> },

    #[error("invalid variable manifest: {}", problems.join("; "))]
    InvalidManifest { problems: Vec<String> },

    #[error("failed to render prompt template '{template}': {message}")]
    TemplateRenderError { template: String, message: String },

    /// The narrative plan lacks required fields. Paths are 0-based
    /// (`steps[1].success_criteria`).
    #[error("plan is missing required fields: {}", missing_fields.join(", "))]
    ParseError { missing_fields: Vec<String> },

    #[error("plan is malformed: {}", problems.join("; "))]
    MalformedPlan { problems: Vec<String> },

    #[error("breakdown of step {step} is invalid: {}", problems.join("; "))]
    InvalidBreakdown { step: usize, problems: Vec<String> },

    #[error("{phase} requires missing artifact {path}")]
    MissingArtifact { phase: String, path: String },

    #[error("cannot synthesize: no verdict for step(s) {}", format_indices(missing))]
    IncompleteVerdictSet { missing: Vec<usize> },

    #[error("cannot {action} while workflow is {phase}")]
    InvalidTransition { phase: String, action: String },

    #[error("plan.md changed after approval (approved {approved}, found {found})")]
    StaleApproval { approved: String, found: String },

    #[error("write to '{path}' is outside the {area} area")]
    OutsideArea { area: String, path: String },
}

fn format_indices(indices: &[usize]) -> String {
    indices
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_list_every_item() {
        let err = WorkflowError::ParseError {
            missing_fields: vec!["approach".to_string(), "steps[1].title".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "plan is missing required fields: approach, steps[1].title"
        );

        let err = WorkflowError::IncompleteVerdictSet {
            missing: vec![2, 4],
        };
        assert_eq!(err.to_string(), "cannot synthesize: no verdict for step(s) 2, 4");
    }

    #[test]
    fn survives_anyhow_round_trip() {
        let err: anyhow::Error = WorkflowError::MissingArtifact {
            phase: "drafting".to_string(),
            path: "todo_creation_human/variables/variables.json".to_string(),
        }
        .into();
        let err = err.context("advance workflow");
        assert!(matches!(
            err.downcast_ref::<WorkflowError>(),
            Some(WorkflowError::MissingArtifact { .. })
        ));
    }
}
