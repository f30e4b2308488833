//! Rule-based variable extraction and placeholder handling.
//!
//! Extraction lifts identifiers, credentials, endpoints and resource names out
//! of an objective into `{{NAME}}` placeholders. Explicit `NAME=value`
//! assignments win over detected literals. Only the execution phase ever
//! substitutes values back in.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{Step, Variable, VariableManifest};
use crate::error::{Result, WorkflowError};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("placeholder regex"));
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9]*(_[A-Z0-9]+)*$").expect("name regex"));
static ASSIGNMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\b(?:([A-Z][A-Z0-9]*(?:_[A-Z0-9]+)+)\s*[=:]|([A-Z][A-Z0-9]+)\s*=)\s*(?:"([^"]*)"|'([^']*)'|([^\s,;]+))"#,
    )
    .expect("assignment regex")
});
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'`]+"#).expect("url regex"));
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("email regex")
});
static ARN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\barn:aws[a-z-]*:([a-z0-9-]+):[^\s,;]*").expect("arn regex"));
static IPV4_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})(?::\d{1,5})?\b").expect("ip regex")
});
static AWS_REGION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:us|eu|ap|sa|ca|me|af|il|mx)-(?:gov-)?(?:north|south|east|west|central|northeast|northwest|southeast|southwest)-\d\b",
    )
    .expect("aws region regex")
});
static GCP_REGION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:us|europe|asia|northamerica|southamerica|australia|me|africa)-(?:north|south|east|west|central|northeast|northwest|southeast|southwest)\d\b",
    )
    .expect("gcp region regex")
});
static CREDENTIAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(password|passwd|secret|token|api[ _-]?key|access[ _-]?key)\s*(?:is|=|:)\s*(?:"([^"]*)"|'([^']*)'|(\S+))"#,
    )
    .expect("credential regex")
});
static PORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bport\s+(\d{2,5})\b").expect("port regex"));
static NUMERIC_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{6,}\b").expect("numeric id regex"));
static RESOURCE_AFTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b({RESOURCE_KEYWORDS})\s+(?:named\s+|called\s+)?`?([A-Za-z0-9][A-Za-z0-9._-]*[A-Za-z0-9])`?"
    ))
    .expect("resource regex")
});
static RESOURCE_BEFORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)`?\b([a-z0-9][a-z0-9._-]*[-_][a-z0-9._-]*[a-z0-9])`?\s+({RESOURCE_KEYWORDS})\b"
    ))
    .expect("resource regex")
});
static PRECEDING_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z][A-Za-z]*)[^A-Za-z0-9]*$").expect("word regex"));

const RESOURCE_KEYWORDS: &str = "bucket|cluster|database|db|table|queue|topic|namespace|service|function|lambda|stack|repository|repo|branch|instance|vpc|subnet|role|host|server|domain|image|container|deployment";

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "to", "from", "in", "on", "at", "of", "for", "with", "by", "and", "or",
    "is", "as", "into", "using", "use", "via", "id", "number", "no", "my", "our", "your", "new",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Priority {
    Explicit,
    Detected,
}

#[derive(Debug, Clone)]
struct Candidate {
    start: usize,
    end: usize,
    value: String,
    name: String,
    description: String,
    priority: Priority,
}

/// Extract variables from `objective` into a validated manifest.
///
/// Fails with [`WorkflowError::ExtractionAmbiguous`] when one literal is
/// proposed under two different names at the same priority.
pub fn extract_variables(objective: &str, extraction_date: &str) -> Result<VariableManifest> {
    let candidates = collect_candidates(objective);
    let named = assign_names(candidates, &verbatim_placeholders(objective))?;

    let mut templated = String::with_capacity(objective.len());
    let mut cursor = 0;
    let mut variables: Vec<Variable> = Vec::new();
    for candidate in &named {
        templated.push_str(&objective[cursor..candidate.start]);
        templated.push_str(&placeholder(&candidate.name));
        cursor = candidate.end;
        if !variables.iter().any(|v| v.name == candidate.name) {
            variables.push(Variable {
                name: candidate.name.clone(),
                value: candidate.value.clone(),
                description: candidate.description.clone(),
            });
        }
    }
    templated.push_str(&objective[cursor..]);

    let manifest = VariableManifest {
        templated_objective: templated,
        variables,
        extraction_date: extraction_date.to_string(),
    };
    validate_manifest(objective, &manifest)?;
    Ok(manifest)
}

/// Check naming, bijection and round-trip laws for a manifest.
pub fn validate_manifest(objective: &str, manifest: &VariableManifest) -> Result<()> {
    let mut problems = Vec::new();
    let mut names = BTreeSet::new();
    let mut by_value: BTreeMap<&str, Vec<String>> = BTreeMap::new();

    for variable in &manifest.variables {
        if !NAME_RE.is_match(&variable.name) {
            problems.push(format!("'{}' is not UPPER_SNAKE_CASE", variable.name));
        }
        if !names.insert(variable.name.as_str()) {
            problems.push(format!("variable {} is declared twice", variable.name));
        }
        if variable.value.is_empty() {
            problems.push(format!("variable {} has an empty value", variable.name));
        }
        by_value
            .entry(variable.value.as_str())
            .or_default()
            .push(variable.name.clone());
    }

    if let Some((value, names)) = by_value.into_iter().find(|(_, names)| names.len() > 1) {
        return Err(WorkflowError::ExtractionAmbiguous {
            value: value.to_string(),
            names,
        });
    }

    // Brace tokens already in the objective are text, not placeholders.
    let verbatim = verbatim_placeholders(objective);
    let referenced: BTreeSet<String> = placeholders(&manifest.templated_objective)
        .into_iter()
        .filter(|name| NAME_RE.is_match(name) && !verbatim.contains(name))
        .collect();
    for name in &referenced {
        if !names.contains(name.as_str()) {
            problems.push(format!("placeholder {} has no variable", placeholder(name)));
        }
    }
    for name in &names {
        if !referenced.contains(*name) {
            problems.push(format!("variable {name} is not referenced by the objective"));
        }
    }

    if problems.is_empty() {
        let restored = substitute(&manifest.templated_objective, &manifest.variables);
        if normalize_whitespace(&restored) != normalize_whitespace(objective) {
            problems.push("substituting variables does not reproduce the objective".to_string());
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(WorkflowError::InvalidManifest { problems })
    }
}

/// Placeholder names in order of first appearance.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    PLACEHOLDER_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

fn verbatim_placeholders(objective: &str) -> BTreeSet<String> {
    placeholders(objective).into_iter().collect()
}

/// Replace known placeholders with their values. Unknown ones stay verbatim.
pub fn substitute(text: &str, variables: &[Variable]) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            variables
                .iter()
                .find(|v| v.name == name)
                .map_or_else(|| caps[0].to_string(), |v| v.value.clone())
        })
        .into_owned()
}

/// Copy of `step` with every placeholder resolved, for the execution phase.
pub fn resolve_step(step: &Step, variables: &[Variable]) -> Step {
    let sub = |text: &str| substitute(text, variables);
    let sub_all = |items: &[String]| -> Vec<String> { items.iter().map(|item| sub(item)).collect() };
    Step {
        title: sub(&step.title),
        description: sub(&step.description),
        success_criteria: sub(&step.success_criteria),
        why_this_step: sub(&step.why_this_step),
        context_dependencies: sub_all(&step.context_dependencies),
        context_output: sub(&step.context_output),
        success_patterns: sub_all(&step.success_patterns),
        failure_patterns: sub_all(&step.failure_patterns),
    }
}

pub fn placeholder(name: &str) -> String {
    format!("{{{{{name}}}}}")
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_candidates(objective: &str) -> Vec<Candidate> {
    let mut accepted: Vec<Candidate> = Vec::new();
    let mut offer = |candidate: Candidate| {
        if candidate.value.is_empty() {
            return;
        }
        let overlaps = accepted
            .iter()
            .any(|c| candidate.start < c.end && c.start < candidate.end);
        if !overlaps {
            accepted.push(candidate);
        }
    };

    for caps in ASSIGNMENT_RE.captures_iter(objective) {
        let Some(name) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        let value = caps.get(3).or_else(|| caps.get(4)).or_else(|| caps.get(5));
        if let Some(value) = value {
            let (start, end) = trim_trailing_punctuation(objective, value.start(), value.end());
            offer(Candidate {
                start,
                end,
                value: objective[start..end].to_string(),
                name: name.as_str().to_string(),
                description: format!("Value assigned to {} in the objective", name.as_str()),
                priority: Priority::Explicit,
            });
        }
    }

    for m in URL_RE.find_iter(objective) {
        let (start, end) = trim_trailing_punctuation(objective, m.start(), m.end());
        let url = &objective[start..end];
        let (name, description) = url_name(url);
        offer(detected(start, end, url, name, description));
    }

    for m in EMAIL_RE.find_iter(objective) {
        offer(detected(
            m.start(),
            m.end(),
            m.as_str(),
            "EMAIL_ADDRESS".to_string(),
            "E-mail address".to_string(),
        ));
    }

    for caps in ARN_RE.captures_iter(objective) {
        let Some(whole) = caps.get(0) else { continue };
        let service = caps.get(1).map_or("AWS", |m| m.as_str());
        let (start, end) = trim_trailing_punctuation(objective, whole.start(), whole.end());
        offer(detected(
            start,
            end,
            &objective[start..end],
            format!("{}_ARN", to_upper_snake(service)),
            format!("AWS {service} resource ARN"),
        ));
    }

    for caps in IPV4_RE.captures_iter(objective) {
        let Some(whole) = caps.get(0) else { continue };
        let valid = (1..=4).all(|i| {
            caps.get(i)
                .and_then(|m| m.as_str().parse::<u16>().ok())
                .is_some_and(|octet| octet <= 255)
        });
        if valid {
            offer(detected(
                whole.start(),
                whole.end(),
                whole.as_str(),
                "IP_ADDRESS".to_string(),
                "Network address".to_string(),
            ));
        }
    }

    for m in AWS_REGION_RE.find_iter(objective) {
        offer(detected(
            m.start(),
            m.end(),
            m.as_str(),
            "AWS_REGION".to_string(),
            "AWS region".to_string(),
        ));
    }
    for m in GCP_REGION_RE.find_iter(objective) {
        offer(detected(
            m.start(),
            m.end(),
            m.as_str(),
            "GCP_REGION".to_string(),
            "GCP region".to_string(),
        ));
    }

    for caps in CREDENTIAL_RE.captures_iter(objective) {
        let (Some(keyword), Some(value)) = (
            caps.get(1),
            caps.get(2).or_else(|| caps.get(3)).or_else(|| caps.get(4)),
        ) else {
            continue;
        };
        let (start, end) = trim_trailing_punctuation(objective, value.start(), value.end());
        let base = match keyword.as_str().to_ascii_lowercase().as_str() {
            "password" | "passwd" => "PASSWORD".to_string(),
            other => to_upper_snake(other),
        };
        let name = match preceding_word(objective, keyword.start()) {
            Some(word) => format!("{}_{base}", to_upper_snake(&word)),
            None => base,
        };
        offer(detected(
            start,
            end,
            &objective[start..end],
            name,
            format!("Credential ({})", keyword.as_str().to_ascii_lowercase()),
        ));
    }

    for caps in PORT_RE.captures_iter(objective) {
        let (Some(whole), Some(port)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let name = match preceding_word(objective, whole.start()) {
            Some(word) => format!("{}_PORT", to_upper_snake(&word)),
            None => "PORT".to_string(),
        };
        offer(detected(
            port.start(),
            port.end(),
            port.as_str(),
            name,
            "Network port".to_string(),
        ));
    }

    let provider = cloud_provider(objective);
    for m in NUMERIC_ID_RE.find_iter(objective) {
        let (name, description) = match identifier_keyword(objective, m.start()) {
            Some(word) if word == "account" => (
                format!("{provider}_ACCOUNT_ID"),
                format!("{provider} account ID"),
            ),
            Some(word) => (
                format!("{}_ID", to_upper_snake(&word)),
                format!("{word} identifier"),
            ),
            None => ("IDENTIFIER".to_string(), "Numeric identifier".to_string()),
        };
        offer(detected(m.start(), m.end(), m.as_str(), name, description));
    }

    for caps in RESOURCE_AFTER_RE.captures_iter(objective) {
        let (Some(keyword), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if looks_like_identifier(value.as_str()) {
            let (name, description) = resource_name(keyword.as_str());
            offer(detected(
                value.start(),
                value.end(),
                value.as_str(),
                name,
                description,
            ));
        }
    }
    for caps in RESOURCE_BEFORE_RE.captures_iter(objective) {
        let (Some(value), Some(keyword)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let (name, description) = resource_name(keyword.as_str());
        offer(detected(
            value.start(),
            value.end(),
            value.as_str(),
            name,
            description,
        ));
    }

    accepted.sort_by_key(|c| c.start);
    accepted
}

fn detected(start: usize, end: usize, value: &str, name: String, description: String) -> Candidate {
    Candidate {
        start,
        end,
        value: value.to_string(),
        name,
        description,
        priority: Priority::Detected,
    }
}

/// Resolve final names: collapse repeats, reject ambiguity, suffix collisions.
fn assign_names(
    mut candidates: Vec<Candidate>,
    reserved: &BTreeSet<String>,
) -> Result<Vec<Candidate>> {
    let mut names_by_value: BTreeMap<String, BTreeMap<Priority, Vec<String>>> = BTreeMap::new();
    for c in &candidates {
        let names = names_by_value
            .entry(c.value.clone())
            .or_default()
            .entry(c.priority)
            .or_default();
        if !names.contains(&c.name) {
            names.push(c.name.clone());
        }
    }

    let mut chosen: BTreeMap<String, String> = BTreeMap::new();
    for (value, by_priority) in &names_by_value {
        let Some((_, names)) = by_priority.iter().next() else {
            continue;
        };
        if names.len() > 1 {
            return Err(WorkflowError::ExtractionAmbiguous {
                value: value.clone(),
                names: names.clone(),
            });
        }
        chosen.insert(value.clone(), names[0].clone());
    }

    let mut explicit_values: BTreeMap<String, String> = BTreeMap::new();
    for c in candidates.iter().filter(|c| c.priority == Priority::Explicit) {
        match explicit_values.insert(c.name.clone(), c.value.clone()) {
            Some(previous) if previous != c.value => {
                return Err(WorkflowError::InvalidManifest {
                    problems: vec![format!(
                        "{} is assigned two different values ('{previous}' and '{}')",
                        c.name, c.value
                    )],
                });
            }
            _ => {}
        }
    }

    // Values in order of first appearance; later distinct values that want a
    // taken name get a numeric suffix.
    let mut final_names: BTreeMap<String, String> = BTreeMap::new();
    let mut taken: BTreeMap<String, String> = explicit_values
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    for name in reserved {
        taken.entry(name.clone()).or_default();
    }
    for c in &candidates {
        if final_names.contains_key(&c.value) {
            continue;
        }
        let wanted = chosen
            .get(&c.value)
            .cloned()
            .unwrap_or_else(|| c.name.clone());
        let mut name = wanted.clone();
        let mut suffix = 2;
        while taken.get(&name).is_some_and(|owner| owner != &c.value) {
            name = format!("{wanted}_{suffix}");
            suffix += 1;
        }
        taken.insert(name.clone(), c.value.clone());
        final_names.insert(c.value.clone(), name);
    }

    for c in &mut candidates {
        if let Some(name) = final_names.get(&c.value) {
            c.name.clone_from(name);
        }
    }
    Ok(candidates)
}

fn url_name(url: &str) -> (String, String) {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
    let host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    let segments = path.split('/').filter(|s| !s.is_empty()).count();

    let forge = match host.as_str() {
        "github.com" => Some(("GITHUB", "GitHub")),
        "gitlab.com" => Some(("GITLAB", "GitLab")),
        "bitbucket.org" => Some(("BITBUCKET", "Bitbucket")),
        _ => None,
    };
    if let Some((prefix, label)) = forge {
        return if segments >= 2 {
            (
                format!("{prefix}_REPO_URL"),
                format!("{label} repository URL"),
            )
        } else {
            (format!("{prefix}_URL"), format!("{label} URL"))
        };
    }

    let labels: Vec<&str> = host.split('.').collect();
    let label = if labels.len() >= 2 {
        labels[labels.len() - 2]
    } else {
        labels[0]
    };
    let label = to_upper_snake(label);
    if label.is_empty() {
        ("ENDPOINT_URL".to_string(), "Endpoint URL".to_string())
    } else {
        (format!("{label}_URL"), format!("Endpoint URL ({host})"))
    }
}

fn resource_name(keyword: &str) -> (String, String) {
    let keyword = keyword.to_ascii_lowercase();
    let canonical = match keyword.as_str() {
        "db" => "database",
        "repo" => "repository",
        "lambda" => "function",
        other => other,
    };
    (
        format!("{}_NAME", to_upper_snake(canonical)),
        format!("Name of the {canonical}"),
    )
}

fn cloud_provider(objective: &str) -> &'static str {
    let lower = objective.to_ascii_lowercase();
    if lower.contains("gcp") || lower.contains("google cloud") {
        "GCP"
    } else if lower.contains("azure") {
        "AZURE"
    } else {
        "AWS"
    }
}

/// Keyword naming a numeric identifier, skipping filler like "id" or "number".
fn identifier_keyword(text: &str, start: usize) -> Option<String> {
    let mut end = start;
    for _ in 0..2 {
        let caps = PRECEDING_WORD_RE.captures(&text[..end])?;
        let word = caps.get(1)?;
        let lower = word.as_str().to_ascii_lowercase();
        if matches!(lower.as_str(), "id" | "number" | "no" | "num") {
            end = word.start();
            continue;
        }
        if STOPWORDS.contains(&lower.as_str()) {
            return None;
        }
        return Some(lower);
    }
    None
}

fn preceding_word(text: &str, start: usize) -> Option<String> {
    let caps = PRECEDING_WORD_RE.captures(&text[..start])?;
    let word = caps.get(1)?.as_str().to_ascii_lowercase();
    if word.len() < 2 || STOPWORDS.contains(&word.as_str()) {
        return None;
    }
    Some(word)
}

/// Generic words are never extracted; identifiers carry a separator or digit.
fn looks_like_identifier(value: &str) -> bool {
    value.chars().any(|c| matches!(c, '-' | '_' | '.') || c.is_ascii_digit())
}

fn trim_trailing_punctuation(text: &str, start: usize, mut end: usize) -> (usize, usize) {
    while end > start {
        let Some(last) = text[start..end].chars().last() else {
            break;
        };
        if matches!(last, '.' | ',' | ';' | ':' | '!' | '?' | ')' | ']' | '}') {
            end -= last.len_utf8();
        } else {
            break;
        }
    }
    (start, end)
}

fn to_upper_snake(text: &str) -> String {
    let mut out = String::new();
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_uppercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    let out = out.trim_end_matches('_').to_string();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        format!("V_{out}")
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATE: &str = "2026-01-01T00:00:00+00:00";

    fn names(manifest: &VariableManifest) -> Vec<&str> {
        manifest.variables.iter().map(|v| v.name.as_str()).collect()
    }

    #[test]
    fn extracts_account_and_repository() {
        let objective = "Deploy app to account 123456789 from https://github.com/acme/app";
        let manifest = extract_variables(objective, DATE).expect("extract");
        assert_eq!(
            manifest.templated_objective,
            "Deploy app to account {{AWS_ACCOUNT_ID}} from {{GITHUB_REPO_URL}}"
        );
        assert_eq!(names(&manifest), vec!["AWS_ACCOUNT_ID", "GITHUB_REPO_URL"]);
        assert_eq!(manifest.variables[0].value, "123456789");
        assert_eq!(manifest.variables[1].value, "https://github.com/acme/app");
        assert_eq!(manifest.extraction_date, DATE);
    }

    #[test]
    fn explicit_assignment_wins_over_detection() {
        let objective = "Set DEPLOY_TARGET=10.0.0.5 and ping 10.0.0.5 afterwards";
        let manifest = extract_variables(objective, DATE).expect("extract");
        assert_eq!(names(&manifest), vec!["DEPLOY_TARGET"]);
        assert_eq!(
            manifest.templated_objective,
            "Set DEPLOY_TARGET={{DEPLOY_TARGET}} and ping {{DEPLOY_TARGET}} afterwards"
        );
    }

    #[test]
    fn same_value_under_two_names_is_ambiguous() {
        let objective = "Use account 123456789 and project 123456789";
        let err = extract_variables(objective, DATE).unwrap_err();
        assert_eq!(
            err,
            WorkflowError::ExtractionAmbiguous {
                value: "123456789".to_string(),
                names: vec!["AWS_ACCOUNT_ID".to_string(), "PROJECT_ID".to_string()],
            }
        );
    }

    #[test]
    fn repeated_literal_collapses_to_one_variable() {
        let objective = "Clone https://github.com/acme/app, then open https://github.com/acme/app.";
        let manifest = extract_variables(objective, DATE).expect("extract");
        assert_eq!(names(&manifest), vec!["GITHUB_REPO_URL"]);
        assert_eq!(placeholders(&manifest.templated_objective), vec!["GITHUB_REPO_URL"]);
        assert!(manifest.templated_objective.ends_with("{{GITHUB_REPO_URL}}."));
    }

    #[test]
    fn distinct_values_with_same_name_get_suffixes() {
        let objective = "Mirror https://github.com/acme/app to https://github.com/acme/fork";
        let manifest = extract_variables(objective, DATE).expect("extract");
        assert_eq!(names(&manifest), vec!["GITHUB_REPO_URL", "GITHUB_REPO_URL_2"]);
    }

    /// Verifies template syntax already in the objective survives extraction.
    #[test]
    fn existing_brace_tokens_are_kept_as_text() {
        let objective = "Render the {{name}} helm value for account 123456789";
        let manifest = extract_variables(objective, DATE).expect("extract");
        assert_eq!(names(&manifest), vec!["AWS_ACCOUNT_ID"]);
        assert_eq!(
            manifest.templated_objective,
            "Render the {{name}} helm value for account {{AWS_ACCOUNT_ID}}"
        );

        let objective = "Fill {{AWS_ACCOUNT_ID}} in the template with account 123456789";
        let manifest = extract_variables(objective, DATE).expect("extract");
        assert_eq!(names(&manifest), vec!["AWS_ACCOUNT_ID_2"]);
        assert_eq!(
            substitute(&manifest.templated_objective, &manifest.variables),
            objective
        );
    }

    #[test]
    fn generic_words_are_left_alone() {
        let objective = "Write a report about the database migration";
        let manifest = extract_variables(objective, DATE).expect("extract");
        assert!(manifest.variables.is_empty());
        assert_eq!(manifest.templated_objective, objective);
    }

    #[test]
    fn detects_regions_credentials_and_resources() {
        let objective =
            "Create bucket acme-logs in us-east-1 with database password: hunter2 on port 5432";
        let manifest = extract_variables(objective, DATE).expect("extract");
        assert_eq!(
            names(&manifest),
            vec!["BUCKET_NAME", "AWS_REGION", "DATABASE_PASSWORD", "PORT"]
        );
        assert_eq!(
            substitute(&manifest.templated_objective, &manifest.variables),
            objective
        );
    }

    #[test]
    fn validate_rejects_broken_bijection() {
        let manifest = VariableManifest {
            templated_objective: "Deploy {{APP}} to {{REGION}}".to_string(),
            variables: vec![Variable {
                name: "APP".to_string(),
                value: "web".to_string(),
                description: String::new(),
            }],
            extraction_date: DATE.to_string(),
        };
        let err = validate_manifest("Deploy web to eu-west-1", &manifest).unwrap_err();
        let WorkflowError::InvalidManifest { problems } = err else {
            panic!("expected InvalidManifest, got {err:?}");
        };
        assert_eq!(problems, vec!["placeholder {{REGION}} has no variable"]);
    }

    #[test]
    fn validate_rejects_lost_information() {
        let manifest = VariableManifest {
            templated_objective: "Deploy {{APP}}".to_string(),
            variables: vec![Variable {
                name: "APP".to_string(),
                value: "web".to_string(),
                description: String::new(),
            }],
            extraction_date: DATE.to_string(),
        };
        assert!(validate_manifest("Deploy web to eu-west-1", &manifest).is_err());
        assert!(validate_manifest("Deploy   web", &manifest).is_ok());
    }

    #[test]
    fn resolve_step_substitutes_every_field() {
        let variables = vec![Variable {
            name: "BUCKET_NAME".to_string(),
            value: "acme-logs".to_string(),
            description: String::new(),
        }];
        let step = Step {
            title: "Create {{BUCKET_NAME}}".to_string(),
            context_output: "{{BUCKET_NAME}}.txt".to_string(),
            success_patterns: vec!["reuse {{BUCKET_NAME}}".to_string()],
            description: "keep {{UNKNOWN}}".to_string(),
            ..Step::default()
        };
        let resolved = resolve_step(&step, &variables);
        assert_eq!(resolved.title, "Create acme-logs");
        assert_eq!(resolved.context_output, "acme-logs.txt");
        assert_eq!(resolved.success_patterns, vec!["reuse acme-logs"]);
        assert_eq!(resolved.description, "keep {{UNKNOWN}}");
    }
}
