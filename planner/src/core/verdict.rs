//! Step validation verdicts.
//!
//! Two modes share one verdict shape:
//! - file evidence: claimed files are checked against the workspace;
//! - criteria: each success criterion must be backed by the execution trace.
//!
//! Absence of evidence is failure. Agent messages are never evidence.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::types::{FileClaim, Step, TraceEvent};

static TEST_CRITERION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(tests?|specs?|test suite)\b").expect("test regex"));
static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[\w.-]+/)*[\w-]+\.[A-Za-z][A-Za-z0-9]{1,7}\b").expect("path regex")
});
static TEST_RUNNER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(cargo\s+(?:nextest\s+run|test)|pytest|py\.test|go\s+test|(?:npm|pnpm|bun)\s+(?:run\s+)?test|yarn\s+test|jest|vitest|mocha|rspec|phpunit|mvn\b.*\btest|gradlew?\s+test|ctest|make\s+test|just\s+test|dotnet\s+test|mix\s+test|tox)\b",
    )
    .expect("test runner regex")
});
static FAILURE_COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[1-9]\d*\s+(?:failed|failures?|errors?)\b").expect("failure count regex")
});
static FAILURE_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bFAIL(?:ED|URE|URES)?\b").expect("failure marker regex"));
static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_]+").expect("word regex"));

const KEYWORD_STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "must", "should", "have",
    "been", "are", "all", "every", "each", "exists", "exist", "successfully", "correctly",
    "properly", "file", "files",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    Completed,
    Partial,
    Failed,
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CriteriaStatus {
    Pass,
    Fail,
}

/// Verdict status, tagged by the validation mode that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "status", rename_all = "snake_case")]
pub enum VerdictStatus {
    FileEvidence(FileStatus),
    Criteria(CriteriaStatus),
}

impl VerdictStatus {
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::FileEvidence(FileStatus::Completed) | Self::Criteria(CriteriaStatus::Pass)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::FileEvidence(FileStatus::Completed) => "COMPLETED",
            Self::FileEvidence(FileStatus::Partial) => "PARTIAL",
            Self::FileEvidence(FileStatus::Failed) => "FAILED",
            Self::FileEvidence(FileStatus::Incomplete) => "INCOMPLETE",
            Self::Criteria(CriteriaStatus::Pass) => "PASS",
            Self::Criteria(CriteriaStatus::Fail) => "FAIL",
        }
    }

    pub fn mode_label(self) -> &'static str {
        match self {
            Self::FileEvidence(_) => "file evidence",
            Self::Criteria(_) => "success criteria",
        }
    }
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceQuality {
    Strong,
    Moderate,
    Weak,
    Insufficient,
}

impl fmt::Display for EvidenceQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Strong => "STRONG",
            Self::Moderate => "MODERATE",
            Self::Weak => "WEAK",
            Self::Insufficient => "INSUFFICIENT",
        })
    }
}

/// Recorded outcome of validating one step. Written once, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub step_index: usize,
    pub status: VerdictStatus,
    pub evidence_quality: EvidenceQuality,
    #[serde(default)]
    pub verified_items: Vec<String>,
    #[serde(default)]
    pub partially_verified_items: Vec<String>,
    #[serde(default)]
    pub failed_items: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

impl ValidationVerdict {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// True when claimed files disagree with what the workspace holds.
    pub fn has_verification_mismatch(&self) -> bool {
        matches!(self.status, VerdictStatus::FileEvidence(status) if status != FileStatus::Completed)
    }
}

/// What the workspace holds at a claimed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileObservation {
    Missing,
    /// The path exists but is a directory or other non-regular file.
    NotAFile,
    Present(String),
}

/// Structured response from an LLM-backed criteria check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub is_success_criteria_met: bool,
    pub evidence_quality: EvidenceQuality,
    #[serde(default)]
    pub verified_items: Vec<String>,
    #[serde(default)]
    pub partially_verified_items: Vec<String>,
    #[serde(default)]
    pub failed_items: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

/// Check claimed files against observations (aligned by position).
pub fn assess_file_evidence(
    step_index: usize,
    claims: &[FileClaim],
    observations: &[FileObservation],
) -> ValidationVerdict {
    let mut verdict = ValidationVerdict {
        step_index,
        status: VerdictStatus::FileEvidence(FileStatus::Failed),
        evidence_quality: EvidenceQuality::Insufficient,
        verified_items: Vec::new(),
        partially_verified_items: Vec::new(),
        failed_items: Vec::new(),
        summary: String::new(),
    };
    if claims.is_empty() {
        verdict.failed_items.push("no files were claimed".to_string());
        verdict.summary = "no files were claimed".to_string();
        return verdict;
    }

    let (mut missing, mut empty, mut mismatched, mut with_content) = (0, 0, 0, 0);
    for (claim, observation) in claims.iter().zip(observations) {
        match observation {
            FileObservation::Missing => {
                missing += 1;
                verdict
                    .failed_items
                    .push(format!("{}: FILE NOT FOUND", claim.path));
            }
            FileObservation::NotAFile => {
                missing += 1;
                verdict
                    .failed_items
                    .push(format!("{}: NOT A FILE", claim.path));
            }
            FileObservation::Present(contents) if contents.trim().is_empty() => {
                empty += 1;
                verdict
                    .failed_items
                    .push(format!("{}: EMPTY FILE", claim.path));
            }
            FileObservation::Present(contents) => {
                let absent: Vec<&str> = claim
                    .expected_content
                    .iter()
                    .map(String::as_str)
                    .filter(|fragment| !contents.contains(fragment))
                    .collect();
                if !absent.is_empty() {
                    mismatched += 1;
                    verdict.partially_verified_items.push(format!(
                        "{}: CONTENT MISMATCH (missing: {})",
                        claim.path,
                        absent.join(", ")
                    ));
                } else if claim.expected_content.is_empty() {
                    verdict
                        .verified_items
                        .push(format!("{}: exists", claim.path));
                } else {
                    with_content += 1;
                    verdict.verified_items.push(format!(
                        "{}: contains {} expected fragment(s)",
                        claim.path,
                        claim.expected_content.len()
                    ));
                }
            }
        }
    }
    // Claims with no observation are treated as not found.
    for claim in claims.iter().skip(observations.len()) {
        missing += 1;
        verdict
            .failed_items
            .push(format!("{}: FILE NOT FOUND", claim.path));
    }

    let total = claims.len();
    let verified = verdict.verified_items.len();
    verdict.status = VerdictStatus::FileEvidence(if missing > 0 {
        FileStatus::Failed
    } else if empty > 0 {
        FileStatus::Incomplete
    } else if mismatched > 0 {
        FileStatus::Partial
    } else {
        FileStatus::Completed
    });
    verdict.evidence_quality = if verified == total && with_content == total {
        EvidenceQuality::Strong
    } else if verified == total {
        EvidenceQuality::Moderate
    } else if verified > 0 || mismatched > 0 {
        EvidenceQuality::Weak
    } else {
        EvidenceQuality::Insufficient
    };
    verdict.summary = format!("{verified} of {total} claimed file(s) confirmed");
    verdict
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Criterion {
    Tests,
    Artifact(String),
    General,
}

enum Finding {
    Verified(String, EvidenceQuality),
    Partial(String),
    Failed(String),
}

/// Check each success criterion against the execution trace.
pub fn assess_criteria(
    step_index: usize,
    success_criteria: &str,
    trace: &[TraceEvent],
) -> ValidationVerdict {
    let items = split_criteria(success_criteria);
    let mut verdict = ValidationVerdict {
        step_index,
        status: VerdictStatus::Criteria(CriteriaStatus::Fail),
        evidence_quality: EvidenceQuality::Insufficient,
        verified_items: Vec::new(),
        partially_verified_items: Vec::new(),
        failed_items: Vec::new(),
        summary: String::new(),
    };
    if items.is_empty() {
        verdict
            .failed_items
            .push("no success criteria declared".to_string());
        verdict.summary = "no success criteria declared".to_string();
        return verdict;
    }

    let mut qualities = Vec::new();
    for item in &items {
        let finding = match classify(item) {
            Criterion::Tests => check_tests(item, trace),
            Criterion::Artifact(path) => check_artifact(item, &path, trace),
            Criterion::General => check_general(item, trace),
        };
        match finding {
            Finding::Verified(text, quality) => {
                qualities.push(quality);
                verdict.verified_items.push(text);
            }
            Finding::Partial(text) => verdict.partially_verified_items.push(text),
            Finding::Failed(text) => verdict.failed_items.push(text),
        }
    }

    let all_verified = verdict.verified_items.len() == items.len();
    if all_verified {
        verdict.status = VerdictStatus::Criteria(CriteriaStatus::Pass);
    }
    verdict.evidence_quality = if trace.is_empty() {
        EvidenceQuality::Insufficient
    } else if all_verified {
        // Weakest verified item bounds the rating.
        qualities
            .into_iter()
            .max()
            .unwrap_or(EvidenceQuality::Moderate)
    } else if !verdict.verified_items.is_empty() || !verdict.partially_verified_items.is_empty() {
        EvidenceQuality::Weak
    } else {
        EvidenceQuality::Insufficient
    };
    verdict.summary = format!(
        "{} of {} criteria substantiated by the execution trace",
        verdict.verified_items.len(),
        items.len()
    );
    verdict
}

/// Normalize an LLM validation response into a verdict.
///
/// A claimed success is downgraded when the response itself lists failures
/// or rates its evidence as insufficient.
pub fn verdict_from_response(step_index: usize, response: &ValidationResponse) -> ValidationVerdict {
    let mut failed_items = response.failed_items.clone();
    let supported = failed_items.is_empty()
        && response.evidence_quality != EvidenceQuality::Insufficient;
    if response.is_success_criteria_met && !supported && failed_items.is_empty() {
        failed_items.push("success claimed without sufficient evidence".to_string());
    }
    let pass = response.is_success_criteria_met && supported;
    ValidationVerdict {
        step_index,
        status: VerdictStatus::Criteria(if pass {
            CriteriaStatus::Pass
        } else {
            CriteriaStatus::Fail
        }),
        evidence_quality: response.evidence_quality,
        verified_items: response.verified_items.clone(),
        partially_verified_items: response.partially_verified_items.clone(),
        failed_items,
        summary: response.reasoning.trim().to_string(),
    }
}

/// Markdown report written next to the verdict.
pub fn render_report(verdict: &ValidationVerdict, step: &Step) -> String {
    let mut out = format!("# Step {} Validation Report\n\n", verdict.step_index);
    out.push_str(&format!("**Step**: {}\n", step.title));
    out.push_str(&format!("**Mode**: {}\n", verdict.status.mode_label()));
    out.push_str(&format!("**Status**: {}\n", verdict.status));
    out.push_str(&format!(
        "**Evidence Quality**: {}\n\n",
        verdict.evidence_quality
    ));
    out.push_str(&format!(
        "## Success Criteria\n\n{}\n\n",
        step.success_criteria.trim()
    ));
    if !verdict.summary.is_empty() {
        out.push_str(&format!("## Summary\n\n{}\n\n", verdict.summary));
    }
    push_items(&mut out, "Verified Items", "✅", &verdict.verified_items);
    push_items(
        &mut out,
        "Partially Verified Items",
        "⚠️",
        &verdict.partially_verified_items,
    );
    push_items(&mut out, "Failed Items", "❌", &verdict.failed_items);
    out.truncate(out.trim_end().len());
    out.push('\n');
    out
}

fn push_items(out: &mut String, title: &str, marker: &str, items: &[String]) {
    out.push_str(&format!("## {title}\n\n"));
    if items.is_empty() {
        out.push_str("- None\n\n");
        return;
    }
    for item in items {
        out.push_str(&format!("- {marker} {item}\n"));
    }
    out.push('\n');
}

fn split_criteria(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            let line = line.trim();
            let line = line
                .strip_prefix(['-', '*', '+'])
                .map_or(line, str::trim_start);
            match line.split_once(['.', ')']) {
                Some((number, rest))
                    if !number.is_empty() && number.chars().all(|c| c.is_ascii_digit()) =>
                {
                    rest.trim_start()
                }
                _ => line,
            }
        })
        .flat_map(|line| line.split(';'))
        .map(|item| item.trim().trim_end_matches('.').trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn classify(item: &str) -> Criterion {
    if TEST_CRITERION_RE.is_match(item) {
        return Criterion::Tests;
    }
    match PATH_RE.find(item) {
        Some(m) => Criterion::Artifact(m.as_str().to_string()),
        None => Criterion::General,
    }
}

fn check_tests(item: &str, trace: &[TraceEvent]) -> Finding {
    let last_run = trace.iter().enumerate().rev().find_map(|(n, event)| match event {
        TraceEvent::ToolCall {
            tool,
            arguments,
            success,
            output,
        } if is_test_runner(tool, arguments) => {
            Some((n + 1, command_label(tool, arguments), *success, output))
        }
        _ => None,
    });
    match last_run {
        Some((n, command, true, output)) if !reports_failures(output) => Finding::Verified(
            format!("{item}: `{command}` succeeded (trace #{n})"),
            EvidenceQuality::Strong,
        ),
        Some((n, command, _, _)) => {
            Finding::Failed(format!("{item}: `{command}` reported failures (trace #{n})"))
        }
        None => Finding::Failed(format!("{item}: no test run found in the trace")),
    }
}

fn check_artifact(item: &str, path: &str, trace: &[TraceEvent]) -> Finding {
    let mut read_only = None;
    for (n, event) in trace.iter().enumerate() {
        match event {
            TraceEvent::FileOperation {
                operation,
                path: op_path,
            } if same_path(op_path, path) => {
                if operation.produces_content() {
                    return Finding::Verified(
                        format!("{item}: {op_path} written (trace #{})", n + 1),
                        EvidenceQuality::Moderate,
                    );
                }
                read_only.get_or_insert(n + 1);
            }
            TraceEvent::ToolCall {
                tool,
                arguments,
                success: true,
                output,
            } if arguments.contains(path) || output.contains(path) => {
                return Finding::Verified(
                    format!(
                        "{item}: `{}` touched {path} (trace #{})",
                        command_label(tool, arguments),
                        n + 1
                    ),
                    EvidenceQuality::Moderate,
                );
            }
            _ => {}
        }
    }
    match read_only {
        Some(n) => Finding::Partial(format!("{item}: {path} was only read (trace #{n})")),
        None => Finding::Failed(format!("{item}: no evidence that {path} was produced")),
    }
}

fn check_general(item: &str, trace: &[TraceEvent]) -> Finding {
    let keywords = keywords(item);
    if keywords.is_empty() {
        return Finding::Failed(format!("{item}: criterion has nothing to check"));
    }
    let mut best: Option<(usize, usize, String)> = None;
    for (n, event) in trace.iter().enumerate() {
        let TraceEvent::ToolCall {
            tool,
            arguments,
            success: true,
            output,
        } = event
        else {
            continue;
        };
        let haystack = format!("{tool} {arguments} {output}").to_lowercase();
        let hits = keywords.iter().filter(|k| haystack.contains(k.as_str())).count();
        if best.as_ref().is_none_or(|(best_hits, _, _)| hits > *best_hits) {
            best = Some((hits, n + 1, command_label(tool, arguments)));
        }
    }
    match best {
        Some((hits, n, command)) if hits == keywords.len() => Finding::Verified(
            format!("{item}: covered by `{command}` (trace #{n})"),
            EvidenceQuality::Moderate,
        ),
        Some((hits, n, command)) if hits * 2 >= keywords.len() && hits > 0 => {
            Finding::Partial(format!(
                "{item}: partially covered by `{command}` (trace #{n}, {hits}/{} keywords)",
                keywords.len()
            ))
        }
        _ => Finding::Failed(format!("{item}: no supporting evidence in the trace")),
    }
}

fn keywords(item: &str) -> Vec<String> {
    let words: Vec<String> = WORD_RE
        .find_iter(item)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| !KEYWORD_STOPWORDS.contains(&w.as_str()))
        .collect();
    let long: Vec<String> = words.iter().filter(|w| w.len() >= 4).cloned().collect();
    let mut chosen = if long.is_empty() {
        words.into_iter().filter(|w| w.len() >= 3).collect()
    } else {
        long
    };
    chosen.dedup();
    chosen
}

fn is_test_runner(tool: &str, arguments: &str) -> bool {
    tool.to_lowercase().contains("test") || TEST_RUNNER_RE.is_match(&format!("{tool} {arguments}"))
}

fn reports_failures(output: &str) -> bool {
    FAILURE_COUNT_RE.is_match(output) || FAILURE_MARKER_RE.is_match(output)
}

fn same_path(a: &str, b: &str) -> bool {
    let a = a.trim_start_matches("./");
    let b = b.trim_start_matches("./");
    a == b || a.ends_with(&format!("/{b}")) || b.ends_with(&format!("/{a}"))
}

fn command_label(tool: &str, arguments: &str) -> String {
    let label = if arguments.trim().is_empty() {
        tool.trim()
    } else {
        arguments.trim()
    };
    let first_line = label.lines().next().unwrap_or_default();
    if first_line.chars().count() > 80 {
        let cut: String = first_line.chars().take(77).collect();
        format!("{cut}...")
    } else {
        first_line.to_string()
    }
}
