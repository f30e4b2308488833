//! Replacing non-atomic steps with their sub-steps.
//!
//! Decomposition never reorders: every original step is either kept or
//! replaced in place by an ordered run of sub-steps, and `origin` records
//! which original step each resulting step came from.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::types::{BreakdownResponse, BreakdownStep, Plan, Step};
use crate::error::{Result, WorkflowError};

/// Decomposed plan plus the 1-based original index of each step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decomposition {
    pub plan: Plan,
    pub origin: Vec<usize>,
}

impl Decomposition {
    /// Identity decomposition: every step is already atomic.
    pub fn identity(plan: Plan) -> Self {
        let origin = (1..=plan.steps.len()).collect();
        Self { plan, origin }
    }
}

/// Apply breakdowns keyed by 1-based step index.
///
/// Steps without a breakdown, or whose breakdown has fewer than two
/// sub-steps, are atomic and kept unchanged.
pub fn apply_breakdowns(
    plan: &Plan,
    breakdowns: &BTreeMap<usize, BreakdownResponse>,
) -> Result<Decomposition> {
    if let Some(&unknown) = breakdowns
        .keys()
        .find(|&&k| k == 0 || k > plan.steps.len())
    {
        return Err(WorkflowError::InvalidBreakdown {
            step: unknown,
            problems: vec![format!("plan has {} steps", plan.steps.len())],
        });
    }

    let mut steps = Vec::new();
    let mut origin = Vec::new();
    for (i, step) in plan.steps.iter().enumerate() {
        let index = i + 1;
        match breakdowns.get(&index) {
            Some(breakdown) if breakdown.steps.len() >= 2 => {
                check_breakdown(index, breakdown)?;
                for sub in expand(step, breakdown) {
                    steps.push(sub);
                    origin.push(index);
                }
            }
            _ => {
                steps.push(step.clone());
                origin.push(index);
            }
        }
    }

    Ok(Decomposition {
        plan: Plan {
            steps,
            ..plan.clone()
        },
        origin,
    })
}

/// Sub-steps for `parent`, inheriting whatever the breakdown leaves out.
///
/// Dependencies flow to every sub-step; the parent's output and success
/// criteria belong to the last sub-step, which completes the parent's work.
/// Earlier sub-steps bring their own criteria (see `check_breakdown`).
fn expand(parent: &Step, breakdown: &BreakdownResponse) -> Vec<Step> {
    let last = breakdown.steps.len().saturating_sub(1);
    breakdown
        .steps
        .iter()
        .enumerate()
        .map(|(i, sub)| {
            let is_last = i == last;
            Step {
                title: sub.title.trim().to_string(),
                description: sub.description.trim().to_string(),
                success_criteria: criteria_of(sub)
                    .unwrap_or(&parent.success_criteria)
                    .to_string(),
                why_this_step: sub
                    .why_this_step
                    .clone()
                    .unwrap_or_else(|| format!("Part of: {}", parent.title)),
                context_dependencies: sub
                    .context_dependencies
                    .clone()
                    .unwrap_or_else(|| parent.context_dependencies.clone()),
                context_output: sub.context_output.clone().unwrap_or_else(|| {
                    if is_last {
                        parent.context_output.clone()
                    } else {
                        String::new()
                    }
                }),
                success_patterns: parent.success_patterns.clone(),
                failure_patterns: parent.failure_patterns.clone(),
            }
        })
        .collect()
}

fn criteria_of(sub: &BreakdownStep) -> Option<&str> {
    sub.success_criteria
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
}

fn check_breakdown(index: usize, breakdown: &BreakdownResponse) -> Result<()> {
    let mut problems = Vec::new();
    let mut titles = BTreeSet::new();
    let last = breakdown.steps.len().saturating_sub(1);
    for (i, sub) in breakdown.steps.iter().enumerate() {
        if sub.title.trim().is_empty() {
            problems.push(format!("sub-step {} has no title", i + 1));
        } else if !titles.insert(sub.title.trim().to_lowercase()) {
            problems.push(format!("sub-step title '{}' is repeated", sub.title.trim()));
        }
        if sub.description.trim().is_empty() {
            problems.push(format!("sub-step {} has no description", i + 1));
        }
        if i != last && criteria_of(sub).is_none() {
            problems.push(format!("sub-step {} has no success criteria", i + 1));
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(WorkflowError::InvalidBreakdown {
            step: index,
            problems,
        })
    }
}
