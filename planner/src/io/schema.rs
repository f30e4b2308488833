//! Embedded JSON Schemas for structured artifacts and model responses.

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::de::DeserializeOwned;
use serde_json::Value;

const VARIABLES_MANIFEST: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/variables_manifest.schema.json"
));
const PLANNING_RESPONSE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/planning_response.schema.json"
));
const BREAKDOWN_RESPONSE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/breakdown_response.schema.json"
));
const EXECUTION_EVIDENCE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/execution_evidence.schema.json"
));
const VALIDATION_RESPONSE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/validation_response.schema.json"
));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    VariablesManifest,
    PlanningResponse,
    BreakdownResponse,
    ExecutionEvidence,
    ValidationResponse,
}

impl Schema {
    pub fn source(self) -> &'static str {
        match self {
            Self::VariablesManifest => VARIABLES_MANIFEST,
            Self::PlanningResponse => PLANNING_RESPONSE,
            Self::BreakdownResponse => BREAKDOWN_RESPONSE,
            Self::ExecutionEvidence => EXECUTION_EVIDENCE,
            Self::ValidationResponse => VALIDATION_RESPONSE,
        }
    }

    /// File name used when the schema is handed to an external process.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::VariablesManifest => "variables_manifest.schema.json",
            Self::PlanningResponse => "planning_response.schema.json",
            Self::BreakdownResponse => "breakdown_response.schema.json",
            Self::ExecutionEvidence => "execution_evidence.schema.json",
            Self::ValidationResponse => "validation_response.schema.json",
        }
    }
}

/// Validate `value` against `schema`, reporting every violation.
pub fn validate_value(schema: Schema, value: &Value) -> Result<()> {
    let schema_value: Value = serde_json::from_str(schema.source())
        .with_context(|| format!("parse embedded schema {}", schema.file_name()))?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "{} schema validation failed: {}",
            schema.file_name(),
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Parse JSON text (optionally fenced in a code block), validate it, then
/// deserialize it.
pub fn parse_validated<T: DeserializeOwned>(schema: Schema, text: &str, label: &str) -> Result<T> {
    let value: Value =
        serde_json::from_str(strip_code_fence(text)).with_context(|| format!("parse {label}"))?;
    validate_value(schema, &value).with_context(|| format!("validate {label}"))?;
    serde_json::from_value(value).with_context(|| format!("deserialize {label}"))
}

/// Body of a single fenced code block, or the trimmed text when unfenced.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
