//! Drafting: narrative plan for human review.

use anyhow::Result;
use tracing::{debug, info};

use crate::agents::drafter::{DraftInput, DrafterAgent};
use crate::agents::{AgentSettings, agents_dir};
use crate::core::types::VariableManifest;
use crate::io::config::PlannerConfig;
use crate::io::llm::LanguageModel;
use crate::io::workspace::{
    Area, AreaWriter, PLAN_MARKDOWN, WorkspaceReader, plan_revision_name,
};

/// Where this draft sits in the review history.
#[derive(Debug, Clone, Copy)]
pub struct Revision<'a> {
    /// Number of drafts already produced.
    pub previous: u32,
    pub feedback: Option<&'a str>,
}

/// Produce `planning/plan.md`, or reuse the one already there.
///
/// A redraft finds no `plan.md` (it was archived as `plan.rev<K>.md`) and
/// hands the archived draft and the reviewer feedback to the drafter.
pub fn run(
    manifest: &VariableManifest,
    revision: Revision<'_>,
    reader: &WorkspaceReader<'_>,
    out: &AreaWriter<'_>,
    config: &PlannerConfig,
    model: &dyn LanguageModel,
) -> Result<String> {
    if let Some(existing) = reader.read(Area::Planning, PLAN_MARKDOWN)? {
        debug!("reusing drafted plan");
        return Ok(existing);
    }

    let previous_plan = if revision.previous > 0 {
        reader.read(Area::Planning, &plan_revision_name(revision.previous))?
    } else {
        None
    };
    let agent = DrafterAgent::new(&agents_dir(reader.root()), AgentSettings::planning(config));
    let markdown = agent.run(
        model,
        reader.root(),
        &DraftInput {
            objective: &manifest.templated_objective,
            variables: &manifest.variables,
            revision: revision.previous + 1,
            feedback: revision.feedback,
            previous_plan: previous_plan.as_deref(),
        },
    )?;
    out.write(PLAN_MARKDOWN, &markdown)?;
    info!(revision = revision.previous + 1, "plan drafted");
    Ok(markdown)
}

/// Move the current draft aside as `plan.rev<revision>.md`.
pub fn archive(
    revision: u32,
    reader: &WorkspaceReader<'_>,
    out: &AreaWriter<'_>,
) -> Result<()> {
    if reader.exists(Area::Planning, PLAN_MARKDOWN)? {
        out.rename(PLAN_MARKDOWN, &plan_revision_name(revision))?;
        info!(revision, "archived previous draft");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::workspace::FsWorkspace;
    use crate::test_support::{ScriptedModel, sample_manifest, sample_plan_markdown};

    #[test]
    fn existing_plan_is_reused_without_a_model_call() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsWorkspace::new(temp.path());
        let reader = WorkspaceReader::new(&store);
        let out = AreaWriter::new(&store, Area::Planning);
        out.write(PLAN_MARKDOWN, "## Approach\nkept\n").expect("seed");
        let model = ScriptedModel::new();

        let plan = run(
            &sample_manifest(),
            Revision {
                previous: 1,
                feedback: None,
            },
            &reader,
            &out,
            &PlannerConfig::default(),
            &model,
        )
        .expect("draft");
        assert_eq!(plan, "## Approach\nkept\n");
        assert!(model.requests().is_empty());
    }

    /// Verifies a redraft sees the archived draft and the feedback.
    #[test]
    fn redraft_uses_archived_revision() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsWorkspace::new(temp.path());
        let reader = WorkspaceReader::new(&store);
        let out = AreaWriter::new(&store, Area::Planning);
        out.write(PLAN_MARKDOWN, "## Approach\nfirst draft\n").expect("seed");
        archive(1, &reader, &out).expect("archive");
        assert!(reader.exists(Area::Planning, "plan.rev1.md").expect("exists"));

        let model = ScriptedModel::new().respond("draft", sample_plan_markdown());
        run(
            &sample_manifest(),
            Revision {
                previous: 1,
                feedback: Some("Add a rollback step."),
            },
            &reader,
            &out,
            &PlannerConfig::default(),
            &model,
        )
        .expect("redraft");

        let prompt = &model.prompts_for("draft")[0];
        assert!(prompt.contains("first draft"));
        assert!(prompt.contains("Add a rollback step."));
        assert_eq!(
            reader.read(Area::Planning, PLAN_MARKDOWN).expect("read"),
            Some(sample_plan_markdown())
        );
    }
}
