//! Test-only fixtures and scripted capabilities.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;

use anyhow::{Result, anyhow};

use crate::agents::executor::{StepExecutor, StepRequest};
use crate::core::types::{ExecutionEvidence, Plan, Step, Variable, VariableManifest};
use crate::io::approval::{ApprovalChannel, ApprovalDecision};
use crate::io::llm::{LanguageModel, LlmRequest};

/// Two-step plan: collect endpoints, then write a report from them.
pub fn sample_plan() -> Plan {
    Plan {
        objective_analysis:
            "Inventory the services running in account {{AWS_ACCOUNT_ID}} and report their endpoints."
                .to_string(),
        approach: "Collect endpoints first, then write the report.".to_string(),
        steps: vec![
            Step {
                title: "Collect endpoints".to_string(),
                description: "Query the service registry and save the endpoint list.".to_string(),
                success_criteria: "endpoints.json lists every registered service".to_string(),
                why_this_step: "The report needs a complete endpoint list.".to_string(),
                context_dependencies: Vec::new(),
                context_output: "endpoints.json".to_string(),
                success_patterns: vec!["Use the registry API instead of scraping".to_string()],
                failure_patterns: Vec::new(),
            },
            Step {
                title: "Write report".to_string(),
                description: "Summarize the endpoints into report.txt.".to_string(),
                success_criteria: "report.txt lists every endpoint".to_string(),
                why_this_step: "The report is the deliverable.".to_string(),
                context_dependencies: vec!["endpoints.json".to_string()],
                context_output: "report.txt".to_string(),
                success_patterns: Vec::new(),
                failure_patterns: Vec::new(),
            },
        ],
        expected_outcome: "report.txt summarizes every endpoint.".to_string(),
    }
}

/// Narrative form of [`sample_plan`], as a drafter would write it.
pub fn sample_plan_markdown() -> String {
    "# Plan

## Objective Analysis

Inventory the services running in account {{AWS_ACCOUNT_ID}} and report their endpoints.

## Approach

Collect endpoints first, then write the report.

## Steps

### Step 1: Collect endpoints

- **Description**: Query the service registry and save the endpoint list.
- **Success Criteria**: endpoints.json lists every registered service
- **Why This Step**: The report needs a complete endpoint list.
- **Context Dependencies**: None
- **Context Output**: endpoints.json
- **Success Patterns**:
  - Use the registry API instead of scraping
- **Failure Patterns**: None

### Step 2: Write report

- **Description**: Summarize the endpoints into report.txt.
- **Success Criteria**: report.txt lists every endpoint
- **Why This Step**: The report is the deliverable.
- **Context Dependencies**: endpoints.json
- **Context Output**: report.txt

## Expected Outcome

report.txt summarizes every endpoint.
"
    .to_string()
}

pub fn sample_manifest() -> VariableManifest {
    VariableManifest {
        templated_objective: "Inventory the services in account {{AWS_ACCOUNT_ID}}".to_string(),
        variables: vec![Variable {
            name: "AWS_ACCOUNT_ID".to_string(),
            value: "123456789".to_string(),
            description: "AWS account ID".to_string(),
        }],
        extraction_date: "2026-01-01T00:00:00Z".to_string(),
    }
}

/// Language model that answers from per-role queues.
///
/// A queue keyed `"validate"` answers any role starting with `validate`
/// (`validate_step_1`, ...). Every request is captured.
#[derive(Default)]
pub struct ScriptedModel {
    answers: RefCell<Vec<(String, VecDeque<String>)>>,
    requests: RefCell<Vec<LlmRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, role: &str, answer: impl Into<String>) -> Self {
        {
            let mut answers = self.answers.borrow_mut();
            match answers.iter_mut().find(|(key, _)| key == role) {
                Some((_, queue)) => queue.push_back(answer.into()),
                None => answers.push((role.to_string(), VecDeque::from([answer.into()]))),
            }
        }
        self
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.borrow().clone()
    }

    /// Prompts sent for roles starting with `role`.
    pub fn prompts_for(&self, role: &str) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .filter(|r| r.role.starts_with(role))
            .map(|r| r.prompt.clone())
            .collect()
    }
}

impl LanguageModel for ScriptedModel {
    fn invoke(&self, request: &LlmRequest) -> Result<()> {
        self.requests.borrow_mut().push(request.clone());
        let answer = self
            .answers
            .borrow_mut()
            .iter_mut()
            .filter(|(key, _)| request.role.starts_with(key.as_str()))
            .find_map(|(_, queue)| queue.pop_front())
            .ok_or_else(|| anyhow!("no scripted answer for role {}", request.role))?;
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&request.output_path, answer)?;
        Ok(())
    }
}

enum Scripted {
    Evidence {
        evidence: ExecutionEvidence,
        files: Vec<(String, String)>,
    },
    Failure(String),
}

/// Step executor that replays queued outcomes in order, writing the listed
/// files into the workspace first.
#[derive(Default)]
pub struct ScriptedExecutor {
    outcomes: RefCell<VecDeque<Scripted>>,
    requests: RefCell<Vec<StepRequest>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, evidence: ExecutionEvidence, files: &[(&str, &str)]) -> Self {
        self.outcomes.borrow_mut().push_back(Scripted::Evidence {
            evidence,
            files: files
                .iter()
                .map(|(path, contents)| (path.to_string(), contents.to_string()))
                .collect(),
        });
        self
    }

    pub fn then_fail(self, message: &str) -> Self {
        self.outcomes
            .borrow_mut()
            .push_back(Scripted::Failure(message.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<StepRequest> {
        self.requests.borrow().clone()
    }
}

impl StepExecutor for ScriptedExecutor {
    fn execute(&self, request: &StepRequest) -> Result<ExecutionEvidence> {
        self.requests.borrow_mut().push(request.clone());
        match self.outcomes.borrow_mut().pop_front() {
            Some(Scripted::Evidence { evidence, files }) => {
                for (path, contents) in files {
                    let path = request.workspace_root.join(path);
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(path, contents)?;
                }
                Ok(evidence)
            }
            Some(Scripted::Failure(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted outcome for step {}", request.index)),
        }
    }
}

/// Evidence claiming `path` with `fragments`.
pub fn file_evidence(path: &str, fragments: &[&str]) -> ExecutionEvidence {
    ExecutionEvidence {
        summary: format!("wrote {path}"),
        claimed_files: vec![crate::core::types::FileClaim {
            path: path.to_string(),
            expected_content: fragments.iter().map(|f| f.to_string()).collect(),
        }],
        ..ExecutionEvidence::default()
    }
}

pub struct AutoApprove;

impl ApprovalChannel for AutoApprove {
    fn decide(&self, _plan_markdown: &str) -> Result<Option<ApprovalDecision>> {
        Ok(Some(ApprovalDecision::approve()))
    }
}

pub struct AutoReject(pub &'static str);

impl ApprovalChannel for AutoReject {
    fn decide(&self, _plan_markdown: &str) -> Result<Option<ApprovalDecision>> {
        Ok(Some(ApprovalDecision::reject(self.0)))
    }
}

/// Fresh temporary workspace root.
pub fn temp_workspace() -> tempfile::TempDir {
    tempfile::tempdir().expect("tempdir")
}
