//! Deterministic conversion between the narrative plan document and [`Plan`].
//!
//! Top-level `##` sections map to plan fields through a fixed header table.
//! Steps are `### Step N: Title` headings followed by bold field labels.
//! Parsing never invents a value: every absent required field is reported.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{Plan, Step};
use crate::error::{Result, WorkflowError};

static STEP_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^###\s+step\s+(\d+)\s*[:.)\-–—]?\s*(.*?)\s*$").expect("step heading regex")
});
static FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+]\s+)?\*\*([^*]+?)\*\*\s*:?\s*(.*?)\s*$").expect("field regex")
});
static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+(.*?)\s*$").expect("bullet regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    ObjectiveAnalysis,
    Approach,
    Steps,
    ExpectedOutcome,
}

const SECTIONS: [(&str, Section, &str); 4] = [
    ("objective analysis", Section::ObjectiveAnalysis, "objective_analysis"),
    ("approach", Section::Approach, "approach"),
    ("steps", Section::Steps, "steps"),
    ("expected outcome", Section::ExpectedOutcome, "expected_outcome"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Description,
    SuccessCriteria,
    WhyThisStep,
    ContextDependencies,
    ContextOutput,
    SuccessPatterns,
    FailurePatterns,
}

const FIELDS: [(&str, Field); 8] = [
    ("description", Field::Description),
    ("success criteria", Field::SuccessCriteria),
    ("why this step", Field::WhyThisStep),
    ("rationale", Field::WhyThisStep),
    ("context dependencies", Field::ContextDependencies),
    ("context output", Field::ContextOutput),
    ("success patterns", Field::SuccessPatterns),
    ("failure patterns", Field::FailurePatterns),
];

impl Field {
    fn key(self) -> &'static str {
        match self {
            Self::Description => "description",
            Self::SuccessCriteria => "success_criteria",
            Self::WhyThisStep => "why_this_step",
            Self::ContextDependencies => "context_dependencies",
            Self::ContextOutput => "context_output",
            Self::SuccessPatterns => "success_patterns",
            Self::FailurePatterns => "failure_patterns",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Description => "Description",
            Self::SuccessCriteria => "Success Criteria",
            Self::WhyThisStep => "Why This Step",
            Self::ContextDependencies => "Context Dependencies",
            Self::ContextOutput => "Context Output",
            Self::SuccessPatterns => "Success Patterns",
            Self::FailurePatterns => "Failure Patterns",
        }
    }

    /// Text fields must carry content; list fields may say "None".
    fn requires_text(self) -> bool {
        matches!(
            self,
            Self::Description | Self::SuccessCriteria | Self::WhyThisStep
        )
    }
}

const REQUIRED_ORDER: [Field; 5] = [
    Field::Description,
    Field::SuccessCriteria,
    Field::WhyThisStep,
    Field::ContextDependencies,
    Field::ContextOutput,
];

/// Parse a narrative plan into a [`Plan`].
///
/// A single `# title` line may precede the first section; any other text
/// there is a structural problem.
///
/// Fails with [`WorkflowError::MalformedPlan`] on structural problems
/// (preamble text, duplicate or unknown sections, duplicate fields) and with
/// [`WorkflowError::ParseError`] listing every missing required field.
pub fn format_plan(markdown: &str) -> Result<Plan> {
    let mut problems = Vec::new();
    let mut bodies: Vec<(Section, Vec<&str>)> = Vec::new();
    let mut current: Option<usize> = None;
    let mut in_fence = false;
    let mut in_preamble = true;
    let mut title_seen = false;
    let mut preamble: Vec<&str> = Vec::new();

    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        let heading = if in_fence { None } else { h2_text(line) };
        match heading {
            Some(text) => {
                in_preamble = false;
                let normalized = normalize_label(text);
                match SECTIONS.iter().find(|(name, _, _)| *name == normalized) {
                    Some((_, section, _)) => {
                        if bodies.iter().any(|(s, _)| s == section) {
                            problems.push(format!("section '## {text}' appears more than once"));
                            current = None;
                        } else {
                            bodies.push((*section, Vec::new()));
                            current = Some(bodies.len() - 1);
                        }
                    }
                    None => {
                        problems.push(format!("unexpected section '## {text}'"));
                        current = None;
                    }
                }
            }
            None => {
                if let Some(idx) = current {
                    bodies[idx].1.push(line);
                } else if in_preamble {
                    let trimmed = line.trim();
                    if !title_seen && !in_fence && trimmed.starts_with("# ") {
                        title_seen = true;
                    } else if !trimmed.is_empty() {
                        preamble.push(trimmed);
                    }
                }
            }
        }
    }
    if let Some(first) = preamble.first() {
        problems.insert(0, format!("text before the first section: '{first}'"));
    }

    let body = |section: Section| {
        bodies
            .iter()
            .find(|(s, _)| *s == section)
            .map(|(_, lines)| lines.as_slice())
    };

    let mut missing = Vec::new();
    let mut plan = Plan::default();
    for (_, section, key) in SECTIONS {
        let Some(lines) = body(section) else {
            missing.push(key.to_string());
            continue;
        };
        if section == Section::Steps {
            plan.steps = parse_steps(lines, &mut missing, &mut problems);
            if plan.steps.is_empty() && !missing.iter().any(|m| m.starts_with("steps")) {
                missing.push(key.to_string());
            }
            continue;
        }
        let text = join_text(lines);
        if text.is_empty() {
            missing.push(key.to_string());
        }
        match section {
            Section::ObjectiveAnalysis => plan.objective_analysis = text,
            Section::Approach => plan.approach = text,
            Section::ExpectedOutcome => plan.expected_outcome = text,
            Section::Steps => {}
        }
    }

    if !problems.is_empty() {
        return Err(WorkflowError::MalformedPlan { problems });
    }
    if !missing.is_empty() {
        return Err(WorkflowError::ParseError {
            missing_fields: missing,
        });
    }
    Ok(plan)
}

/// Render a plan in the canonical narrative form accepted by [`format_plan`].
pub fn render_plan_markdown(plan: &Plan) -> String {
    let mut out = String::new();
    push_section(&mut out, "Objective Analysis", &plan.objective_analysis);
    push_section(&mut out, "Approach", &plan.approach);
    out.push_str("## Steps\n\n");
    for (i, step) in plan.steps.iter().enumerate() {
        out.push_str(&format!("### Step {}: {}\n\n", i + 1, step.title));
        push_text_field(&mut out, Field::Description, &step.description);
        push_text_field(&mut out, Field::SuccessCriteria, &step.success_criteria);
        push_text_field(&mut out, Field::WhyThisStep, &step.why_this_step);
        push_list_field(
            &mut out,
            Field::ContextDependencies,
            &step.context_dependencies,
        );
        if step.has_output() {
            push_text_field(&mut out, Field::ContextOutput, &step.context_output);
        } else {
            out.push_str(&format!("- **{}**: None\n", Field::ContextOutput.label()));
        }
        push_list_field(&mut out, Field::SuccessPatterns, &step.success_patterns);
        push_list_field(&mut out, Field::FailurePatterns, &step.failure_patterns);
        out.push('\n');
    }
    push_section(&mut out, "Expected Outcome", &plan.expected_outcome);
    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}

struct StepDraft<'a> {
    title: String,
    preamble: Vec<&'a str>,
    fields: Vec<(Field, Vec<&'a str>)>,
}

fn parse_steps<'a>(
    lines: &[&'a str],
    missing: &mut Vec<String>,
    problems: &mut Vec<String>,
) -> Vec<Step> {
    let mut drafts: Vec<StepDraft<'a>> = Vec::new();
    let mut in_fence = false;

    for &line in lines {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        let heading = if in_fence {
            None
        } else {
            STEP_HEADING_RE.captures(line)
        };
        if let Some(caps) = heading {
            drafts.push(StepDraft {
                title: caps.get(2).map_or("", |m| m.as_str()).trim().to_string(),
                preamble: Vec::new(),
                fields: Vec::new(),
            });
            continue;
        }
        let index = drafts.len().saturating_sub(1);
        let Some(draft) = drafts.last_mut() else {
            if !line.trim().is_empty() {
                problems.push("text before the first step heading in '## Steps'".to_string());
            }
            continue;
        };
        let label = if in_fence {
            None
        } else {
            FIELD_RE.captures(line).and_then(|caps| {
                let name = normalize_label(caps.get(1)?.as_str());
                let field = FIELDS.iter().find(|(label, _)| *label == name)?.1;
                Some((field, caps.get(2).map_or("", |m| m.as_str())))
            })
        };
        match label {
            Some((field, inline)) => {
                if draft.fields.iter().any(|(f, _)| *f == field) {
                    problems.push(format!(
                        "steps[{index}].{} appears more than once",
                        field.key()
                    ));
                }
                draft.fields.push((field, vec![inline]));
            }
            None => match draft.fields.last_mut() {
                Some((_, body)) => body.push(line),
                None => draft.preamble.push(line),
            },
        }
    }

    let mut steps = Vec::with_capacity(drafts.len());
    for (index, draft) in drafts.into_iter().enumerate() {
        if draft.preamble.iter().any(|line| !line.trim().is_empty()) {
            problems.push(format!("steps[{index}] has text before its first field"));
        }
        if draft.title.is_empty() {
            missing.push(format!("steps[{index}].title"));
        }
        let value = |field: Field| {
            draft
                .fields
                .iter()
                .find(|(f, _)| *f == field)
                .map(|(_, lines)| lines.as_slice())
        };
        for field in REQUIRED_ORDER {
            match value(field) {
                None => missing.push(format!("steps[{index}].{}", field.key())),
                Some(lines) if field.requires_text() && join_text(lines).is_empty() => {
                    missing.push(format!("steps[{index}].{}", field.key()));
                }
                Some(_) => {}
            }
        }

        let text = |field: Field| value(field).map(join_text).unwrap_or_default();
        let list = |field: Field, split_inline: bool| {
            value(field)
                .map(|lines| parse_list(lines, split_inline))
                .unwrap_or_default()
        };
        let context_output = text(Field::ContextOutput);
        steps.push(Step {
            title: draft.title.clone(),
            description: text(Field::Description),
            success_criteria: text(Field::SuccessCriteria),
            why_this_step: text(Field::WhyThisStep),
            context_dependencies: list(Field::ContextDependencies, true),
            context_output: if is_none_marker(&context_output) {
                String::new()
            } else {
                context_output
            },
            success_patterns: list(Field::SuccessPatterns, false),
            failure_patterns: list(Field::FailurePatterns, false),
        });
    }
    steps
}

fn h2_text(line: &str) -> Option<&str> {
    let rest = line.trim_end().strip_prefix("##")?;
    if rest.starts_with('#') || !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim().trim_end_matches('#').trim())
}

fn normalize_label(text: &str) -> String {
    let text = text.trim().trim_end_matches(':').trim();
    let text = text
        .split_once(". ")
        .filter(|(prefix, _)| prefix.chars().all(|c| c.is_ascii_digit()))
        .map_or(text, |(_, rest)| rest);
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Join field lines, trimming each line and the surrounding blank lines.
fn join_text(lines: &[&str]) -> String {
    let trimmed: Vec<&str> = lines.iter().map(|line| line.trim()).collect();
    let start = trimmed.iter().position(|l| !l.is_empty());
    let end = trimmed.iter().rposition(|l| !l.is_empty());
    match (start, end) {
        (Some(start), Some(end)) => trimmed[start..=end].join("\n"),
        _ => String::new(),
    }
}

fn parse_list(lines: &[&str], split_inline: bool) -> Vec<String> {
    let mut items = Vec::new();
    if let Some((inline, rest)) = lines.split_first() {
        let inline = inline.trim();
        if !inline.is_empty() {
            if split_inline {
                items.extend(inline.split(',').map(str::trim).map(str::to_string));
            } else {
                items.push(inline.to_string());
            }
        }
        for line in rest {
            let item = BULLET_RE
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map_or_else(|| line.trim(), |m| m.as_str());
            if !item.is_empty() {
                items.push(item.to_string());
            }
        }
    }
    items.retain(|item| !item.is_empty());
    if items.len() == 1 && is_none_marker(&items[0]) {
        items.clear();
    }
    items
}

fn is_none_marker(text: &str) -> bool {
    matches!(
        text.trim().trim_end_matches('.').to_ascii_lowercase().as_str(),
        "" | "none" | "n/a" | "na" | "-" | "nothing"
    )
}

fn push_section(out: &mut String, title: &str, text: &str) {
    out.push_str(&format!("## {title}\n\n{}\n\n", text.trim()));
}

fn push_text_field(out: &mut String, field: Field, text: &str) {
    let mut lines = text.trim().lines();
    out.push_str(&format!(
        "- **{}**: {}\n",
        field.label(),
        lines.next().unwrap_or_default()
    ));
    for line in lines {
        if line.trim().is_empty() {
            out.push('\n');
        } else {
            out.push_str(&format!("  {line}\n"));
        }
    }
}

fn push_list_field(out: &mut String, field: Field, items: &[String]) {
    if items.is_empty() {
        out.push_str(&format!("- **{}**: None\n", field.label()));
        return;
    }
    out.push_str(&format!("- **{}**:\n", field.label()));
    for item in items {
        out.push_str(&format!("  - {item}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_plan, sample_plan_markdown};

    /// Verifies the canonical document parses into the expected plan.
    #[test]
    fn parses_well_formed_plan() {
        let plan = format_plan(&sample_plan_markdown()).expect("format");
        assert_eq!(plan, sample_plan());
    }

    /// Verifies a step without success criteria is reported by 0-based path.
    #[test]
    fn missing_success_criteria_is_reported() {
        let markdown = sample_plan_markdown().replacen(
            "- **Success Criteria**: report.txt lists every endpoint\n",
            "",
            1,
        );
        let err = format_plan(&markdown).unwrap_err();
        assert_eq!(
            err,
            WorkflowError::ParseError {
                missing_fields: vec!["steps[1].success_criteria".to_string()],
            }
        );
    }

    /// Verifies every missing field is listed, not just the first.
    #[test]
    fn lists_all_missing_fields() {
        let markdown = "## Approach\n\nDo it.\n\n## Steps\n\n### Step 1:\n- **Description**: x\n";
        let err = format_plan(markdown).unwrap_err();
        assert_eq!(
            err,
            WorkflowError::ParseError {
                missing_fields: vec![
                    "objective_analysis".to_string(),
                    "steps[0].title".to_string(),
                    "steps[0].success_criteria".to_string(),
                    "steps[0].why_this_step".to_string(),
                    "steps[0].context_dependencies".to_string(),
                    "steps[0].context_output".to_string(),
                    "expected_outcome".to_string(),
                ],
            }
        );
    }

    /// Verifies formatting is byte-for-byte deterministic.
    #[test]
    fn formatting_is_deterministic() {
        let markdown = sample_plan_markdown();
        let first = serde_json::to_string(&format_plan(&markdown).expect("first")).expect("json");
        let second = serde_json::to_string(&format_plan(&markdown).expect("second")).expect("json");
        assert_eq!(first, second);
    }

    /// Verifies the canonical rendering parses back to the same plan.
    #[test]
    fn rendered_plan_parses_back() {
        let mut plan = sample_plan();
        plan.steps[0].description = "First line.\n\nSecond paragraph.".to_string();
        plan.steps[1].failure_patterns = vec!["Timeouts, retries and backoff".to_string()];
        let markdown = render_plan_markdown(&plan);
        assert_eq!(format_plan(&markdown).expect("format"), plan);
    }

    #[test]
    fn inline_dependencies_split_on_commas() {
        let markdown = sample_plan_markdown().replace(
            "- **Context Dependencies**: endpoints.json\n",
            "- **Context Dependencies**: endpoints.json, notes.md\n",
        );
        let plan = format_plan(&markdown).expect("format");
        assert_eq!(
            plan.steps[1].context_dependencies,
            vec!["endpoints.json", "notes.md"]
        );
    }

    #[test]
    fn duplicate_and_unknown_sections_are_malformed() {
        let markdown = format!("{}\n\n## Approach\n\nAgain\n\n## Risks\n\nNone", sample_plan_markdown());
        let err = format_plan(&markdown).unwrap_err();
        let WorkflowError::MalformedPlan { problems } = err else {
            panic!("expected MalformedPlan, got {err:?}");
        };
        assert_eq!(
            problems,
            vec![
                "section '## Approach' appears more than once".to_string(),
                "unexpected section '## Risks'".to_string(),
            ]
        );
    }

    /// Verifies only a title may precede the first section.
    #[test]
    fn preamble_text_is_malformed() {
        let markdown = sample_plan_markdown().replacen(
            "## Objective Analysis",
            "Here is the plan you asked for.\n\n## Objective Analysis",
            1,
        );
        let err = format_plan(&markdown).unwrap_err();
        assert_eq!(
            err,
            WorkflowError::MalformedPlan {
                problems: vec![
                    "text before the first section: 'Here is the plan you asked for.'".to_string()
                ],
            }
        );

        let titled = format_plan(&sample_plan_markdown()).expect("title only");
        let untitled =
            format_plan(sample_plan_markdown().trim_start_matches("# Plan\n")).expect("untitled");
        assert_eq!(titled, untitled);
    }

    /// Verifies headings inside fenced code do not split sections.
    #[test]
    fn fenced_headings_stay_in_field_text() {
        let markdown = sample_plan_markdown().replace(
            "- **Description**: Query the service registry and save the endpoint list.\n",
            "- **Description**: Query the service registry.\n  ```\n  ## not a section\n  ```\n",
        );
        let plan = format_plan(&markdown).expect("format");
        assert!(plan.steps[0].description.contains("## not a section"));
    }
}
