//! Decomposing: split non-atomic steps into ordered sub-steps.

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{debug, info};

use crate::agents::decomposer::DecomposerAgent;
use crate::agents::{AgentSettings, agents_dir};
use crate::core::decompose::{Decomposition, apply_breakdowns};
use crate::core::invariants::ensure_valid_plan;
use crate::core::plan_format::render_plan_markdown;
use crate::core::types::Plan;
use crate::io::config::PlannerConfig;
use crate::io::llm::LanguageModel;
use crate::io::workspace::{
    Area, AreaWriter, DECOMPOSED_MARKDOWN, DECOMPOSITION_FILE, PLAN_JSON, WorkspaceReader,
};

/// Decompose `plan.json` once.
///
/// `decomposition.json` is written before `plan.json` is replaced, so a
/// resumed run finds it and never splits the already-split plan again.
pub fn run(
    reader: &WorkspaceReader<'_>,
    out: &AreaWriter<'_>,
    config: &PlannerConfig,
    model: &dyn LanguageModel,
) -> Result<Decomposition> {
    if let Some(existing) = reader.read_json::<Decomposition>(Area::Planning, DECOMPOSITION_FILE)? {
        debug!(steps = existing.plan.step_count(), "reusing decomposition");
        persist_plan(out, &existing.plan)?;
        return Ok(existing);
    }

    let plan: Plan = reader.require_json(Area::Planning, PLAN_JSON, "decomposing")?;
    let decomposition = if config.decomposition.enabled {
        let agent = DecomposerAgent::new(&agents_dir(reader.root()), AgentSettings::planning(config));
        let mut breakdowns = BTreeMap::new();
        for index in 1..=plan.step_count() {
            let breakdown = agent.run(model, reader.root(), &plan, index)?;
            debug!(step = index, sub_steps = breakdown.steps.len(), "breakdown received");
            breakdowns.insert(index, breakdown);
        }
        apply_breakdowns(&plan, &breakdowns)?
    } else {
        Decomposition::identity(plan)
    };
    ensure_valid_plan(&decomposition.plan)?;

    out.write_json(DECOMPOSITION_FILE, &decomposition)?;
    persist_plan(out, &decomposition.plan)?;
    info!(steps = decomposition.plan.step_count(), "plan decomposed");
    Ok(decomposition)
}

fn persist_plan(out: &AreaWriter<'_>, plan: &Plan) -> Result<()> {
    out.write_json(PLAN_JSON, plan)?;
    out.write(DECOMPOSED_MARKDOWN, &render_plan_markdown(plan))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::workspace::FsWorkspace;
    use crate::test_support::{ScriptedModel, sample_plan};

    const SPLIT: &str = r#"{"steps":[{"title":"List services","description":"Call the registry","success_criteria":"services.txt lists every service"},{"title":"Save endpoints","description":"Write endpoints.json"}]}"#;
    const ATOMIC: &str = r#"{"steps":[{"title":"Write report","description":"Summarize"}]}"#;

    fn seeded(temp: &tempfile::TempDir) -> FsWorkspace {
        let store = FsWorkspace::new(temp.path());
        AreaWriter::new(&store, Area::Planning)
            .write_json(PLAN_JSON, &sample_plan())
            .expect("seed");
        store
    }

    #[test]
    fn splits_steps_and_rewrites_plan_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = seeded(&temp);
        let reader = WorkspaceReader::new(&store);
        let out = AreaWriter::new(&store, Area::Planning);
        let model = ScriptedModel::new()
            .respond("breakdown_step_1", SPLIT)
            .respond("breakdown_step_2", ATOMIC);

        let result = run(&reader, &out, &PlannerConfig::default(), &model).expect("decompose");
        assert_eq!(result.origin, vec![1, 1, 2]);
        let stored: Option<Plan> = reader.read_json(Area::Planning, PLAN_JSON).expect("read");
        assert_eq!(stored.map(|p| p.step_count()), Some(3));
        assert!(reader.exists(Area::Planning, DECOMPOSED_MARKDOWN).expect("exists"));

        // A second run must not ask the model again or split the split plan.
        let again = run(&reader, &out, &PlannerConfig::default(), &ScriptedModel::new())
            .expect("resume");
        assert_eq!(again, result);
    }

    #[test]
    fn disabled_decomposition_keeps_plan() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = seeded(&temp);
        let reader = WorkspaceReader::new(&store);
        let out = AreaWriter::new(&store, Area::Planning);
        let mut config = PlannerConfig::default();
        config.decomposition.enabled = false;

        let result = run(&reader, &out, &config, &ScriptedModel::new()).expect("decompose");
        assert_eq!(result, Decomposition::identity(sample_plan()));
    }
}
