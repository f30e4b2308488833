//! Structural invariants for plans.

use std::collections::BTreeMap;

use crate::core::types::{Plan, Step};
use crate::error::{Result, WorkflowError};

/// Check the plan and return human-readable violations (empty if valid).
pub fn validate_plan(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();
    if plan.steps.is_empty() {
        errors.push("plan has no steps".to_string());
        return errors;
    }

    let mut producers: BTreeMap<String, usize> = BTreeMap::new();
    for (i, step) in plan.steps.iter().enumerate() {
        for (field, value) in [
            ("title", &step.title),
            ("description", &step.description),
            ("success_criteria", &step.success_criteria),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("steps[{i}].{field} is empty"));
            }
        }
        for output in outputs(step) {
            if let Some(first) = producers.get(&output) {
                errors.push(format!(
                    "steps[{first}] and steps[{i}] both produce '{output}'"
                ));
            } else {
                producers.insert(output, i);
            }
        }
    }

    for (i, step) in plan.steps.iter().enumerate() {
        for dependency in &step.context_dependencies {
            match producers.get(dependency.trim()) {
                Some(&producer) if producer >= i => errors.push(format!(
                    "steps[{i}] depends on '{}' which is produced by steps[{producer}]",
                    dependency.trim()
                )),
                _ => {}
            }
        }
    }
    errors
}

pub fn ensure_valid_plan(plan: &Plan) -> Result<()> {
    let problems = validate_plan(plan);
    if problems.is_empty() {
        Ok(())
    } else {
        Err(WorkflowError::MalformedPlan { problems })
    }
}

/// Artifact references a step produces. `context_output` may list several.
pub fn outputs(step: &Step) -> Vec<String> {
    step.context_output
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_plan;

    #[test]
    fn sample_plan_is_valid() {
        assert!(validate_plan(&sample_plan()).is_empty());
    }

    #[test]
    fn empty_plan_is_invalid() {
        assert_eq!(validate_plan(&Plan::default()), vec!["plan has no steps"]);
    }

    #[test]
    fn forward_dependency_is_rejected() {
        let mut plan = sample_plan();
        plan.steps[0].context_dependencies = vec!["report.txt".to_string()];
        assert_eq!(
            validate_plan(&plan),
            vec!["steps[0] depends on 'report.txt' which is produced by steps[1]"]
        );
    }

    #[test]
    fn duplicate_outputs_are_rejected() {
        let mut plan = sample_plan();
        plan.steps[1].context_output = "report.txt, endpoints.json".to_string();
        let errors = validate_plan(&plan);
        assert_eq!(
            errors,
            vec!["steps[0] and steps[1] both produce 'endpoints.json'"]
        );
    }

    #[test]
    fn external_dependencies_are_allowed() {
        let mut plan = sample_plan();
        plan.steps[0].context_dependencies = vec!["registry credentials".to_string()];
        assert!(ensure_valid_plan(&plan).is_ok());
    }
}
