//! Extracting: objective to variable manifest.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::agents::variables::VariablesAgent;
use crate::agents::{AgentSettings, agents_dir};
use crate::core::types::VariableManifest;
use crate::core::variables::{extract_variables, validate_manifest};
use crate::io::config::{PhaseMode, PlannerConfig};
use crate::io::llm::LanguageModel;
use crate::io::state::timestamp;
use crate::io::workspace::{Area, AreaWriter, VARIABLES_FILE, WorkspaceReader};

/// Produce `variables/variables.json`, or reuse a valid existing one.
pub fn run(
    objective: &str,
    reader: &WorkspaceReader<'_>,
    out: &AreaWriter<'_>,
    config: &PlannerConfig,
    model: &dyn LanguageModel,
) -> Result<VariableManifest> {
    if let Some(existing) = reader.read_json::<VariableManifest>(Area::Variables, VARIABLES_FILE)? {
        validate_manifest(objective, &existing).context("existing variables.json")?;
        debug!(variables = existing.variables.len(), "reusing variable manifest");
        return Ok(existing);
    }

    let today = timestamp();
    let manifest = match config.extraction.mode {
        PhaseMode::Rules => extract_variables(objective, &today)?,
        PhaseMode::Agent => VariablesAgent::new(
            &agents_dir(reader.root()),
            AgentSettings::planning(config),
        )
        .run(model, reader.root(), objective, &today)?,
    };
    validate_manifest(objective, &manifest)?;
    out.write_json(VARIABLES_FILE, &manifest)?;
    info!(variables = manifest.variables.len(), "variables extracted");
    Ok(manifest)
}
