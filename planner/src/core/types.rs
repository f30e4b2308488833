//! Shared data contracts exchanged between phases.
//!
//! These types are persisted as workspace artifacts and exchanged with the
//! language-model capability, so their serialized shape is a stable contract.

use serde::{Deserialize, Deserializer, Serialize};

/// One named literal lifted out of the objective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// UPPER_SNAKE_CASE placeholder name, referenced as `{{NAME}}`.
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub description: String,
}

/// Output of variable extraction (`variables/variables.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableManifest {
    /// Objective with every extracted literal replaced by its placeholder.
    #[serde(rename = "objective", alias = "templated_objective")]
    pub templated_objective: String,
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub extraction_date: String,
}

impl VariableManifest {
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }
}

/// One unit of planned work.
///
/// Field names match the `PlanningResponse` contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub title: String,
    pub description: String,
    pub success_criteria: String,
    pub why_this_step: String,
    #[serde(default)]
    pub context_dependencies: Vec<String>,
    /// Artifact reference produced by this step, empty when none.
    #[serde(default, deserialize_with = "string_or_list")]
    pub context_output: String,
    #[serde(default)]
    pub success_patterns: Vec<String>,
    #[serde(default)]
    pub failure_patterns: Vec<String>,
}

impl Step {
    pub fn has_output(&self) -> bool {
        !self.context_output.trim().is_empty()
    }
}

/// Structured plan (`planning/plan.json`), also the `PlanningResponse` shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub objective_analysis: String,
    pub approach: String,
    pub steps: Vec<Step>,
    pub expected_outcome: String,
}

impl Plan {
    /// Step by 1-based index.
    pub fn step(&self, index: usize) -> Option<&Step> {
        index.checked_sub(1).and_then(|i| self.steps.get(i))
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

pub type PlanningResponse = Plan;

/// Sub-step proposed when splitting a non-atomic step.
///
/// Only `title` and `description` are required. Missing fields are inherited
/// from the parent step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownStep {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why_this_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_dependencies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_output: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownResponse {
    pub steps: Vec<BreakdownStep>,
}

/// A file the execution capability claims to have created or updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileClaim {
    /// Path relative to the workspace root.
    pub path: String,
    /// Fragments the file is expected to contain.
    #[serde(default)]
    pub expected_content: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperationKind {
    Read,
    Create,
    Write,
    Delete,
}

impl FileOperationKind {
    pub fn produces_content(self) -> bool {
        matches!(self, Self::Create | Self::Write)
    }
}

/// One entry of an execution trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEvent {
    ToolCall {
        tool: String,
        #[serde(default)]
        arguments: String,
        success: bool,
        #[serde(default)]
        output: String,
    },
    FileOperation {
        operation: FileOperationKind,
        path: String,
    },
    /// Free text from the executing agent. Treated as a claim, never as proof.
    Message { text: String },
}

/// Evidence record returned by the execution capability for one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEvidence {
    pub summary: String,
    #[serde(default)]
    pub claimed_files: Vec<FileClaim>,
    #[serde(default)]
    pub trace: Vec<TraceEvent>,
    #[serde(default)]
    pub success_notes: Vec<String>,
    #[serde(default)]
    pub failure_notes: Vec<String>,
}

impl ExecutionEvidence {
    /// Evidence recorded when the execution capability itself failed.
    pub fn execution_failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            summary: format!("execution failed: {message}"),
            failure_notes: vec![message],
            ..Self::default()
        }
    }
}

/// Accepts `"a"`, `["a", "b"]` (joined with ", ") or `null`.
fn string_or_list<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<Flexible>::deserialize(deserializer)? {
        Some(Flexible::One(value)) => value,
        Some(Flexible::Many(values)) => values.join(", "),
        None => String::new(),
    })
}
