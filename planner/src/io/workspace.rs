//! Workspace file capability and per-area write discipline.
//!
//! Every artifact lives under a caller-supplied root:
//!
//! ```text
//! <root>/todo_creation_human/
//!   variables/   planning/   execution/   validation/   learnings/
//!   state/       (orchestrator bookkeeping)
//!   config.toml  (human-edited, read-only here)
//! <root>/todo_final.md
//! ```
//!
//! Phases never receive the store directly. Each gets an [`AreaWriter`]
//! for its own area and a [`WorkspaceReader`] for everything else.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::WorkflowError;

pub const WORKFLOW_DIR: &str = "todo_creation_human";
pub const FINAL_FILE: &str = "todo_final.md";
pub const CONFIG_FILE: &str = "config.toml";

pub const VARIABLES_FILE: &str = "variables.json";
pub const PLAN_MARKDOWN: &str = "plan.md";
pub const PLAN_JSON: &str = "plan.json";
pub const DECOMPOSITION_FILE: &str = "decomposition.json";
pub const DECOMPOSED_MARKDOWN: &str = "plan_decomposed.md";
pub const LEARNING_RECORD: &str = "learning_record.json";
pub const SUCCESS_PATTERNS: &str = "success_patterns.md";
pub const FAILURE_ANALYSIS: &str = "failure_analysis.md";
pub const STATE_FILE: &str = "state.json";
pub const EVENTS_FILE: &str = "events.jsonl";
pub const LOCK_FILE: &str = "lock";
pub const AGENTS_DIR: &str = "agents";

pub fn evidence_name(step: usize) -> String {
    format!("step_{step}_evidence.json")
}

pub fn verdict_name(step: usize) -> String {
    format!("step_{step}_verdict.json")
}

pub fn report_name(step: usize) -> String {
    format!("step_{step}_validation_report.md")
}

pub fn learning_name(step: usize) -> String {
    format!("step_{step}_learning.md")
}

/// `<root>/todo_creation_human/config.toml`.
pub fn config_path(root: &Path) -> PathBuf {
    root.join(WORKFLOW_DIR).join(CONFIG_FILE)
}

/// Archived draft `plan.rev<K>.md`.
pub fn plan_revision_name(revision: u32) -> String {
    format!("plan.rev{revision}.md")
}

/// Phase-owned region of the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    Variables,
    Planning,
    Execution,
    Validation,
    Learnings,
    /// The root-level `todo_final.md` and nothing else.
    Deliverable,
    /// Orchestrator bookkeeping under `state/`.
    Control,
}

impl Area {
    pub fn name(self) -> &'static str {
        match self {
            Self::Variables => "variables",
            Self::Planning => "planning",
            Self::Execution => "execution",
            Self::Validation => "validation",
            Self::Learnings => "learnings",
            Self::Deliverable => "deliverable",
            Self::Control => "state",
        }
    }

    /// Directory relative to the workspace root.
    pub fn dir(self) -> PathBuf {
        match self {
            Self::Deliverable => PathBuf::new(),
            other => Path::new(WORKFLOW_DIR).join(other.name()),
        }
    }

    /// Relative path of `name` inside this area.
    pub fn path(self, name: &str) -> PathBuf {
        self.dir().join(name)
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// File capability over a workspace root. Paths are root-relative.
/// What lies at a root-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Absent,
    /// A directory or anything else that is not a regular file.
    Special,
    File(Vec<u8>),
}

pub trait WorkspaceStore {
    fn root(&self) -> &Path;
    fn read(&self, rel: &Path) -> Result<Option<String>>;
    /// Raw bytes at `rel`, without assuming UTF-8 or a regular file.
    fn inspect(&self, rel: &Path) -> Result<Entry>;
    /// Replace the file atomically, creating parent directories.
    fn write(&self, rel: &Path, contents: &str) -> Result<()>;
    /// File names directly inside `rel`, sorted. Missing directories are empty.
    fn list(&self, rel: &Path) -> Result<Vec<String>>;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
}

/// [`WorkspaceStore`] backed by the local filesystem.
#[derive(Debug, Clone)]
pub struct FsWorkspace {
    root: PathBuf,
}

impl FsWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, rel: &Path) -> Result<PathBuf> {
        Ok(self.root.join(checked_relative(rel, "workspace")?))
    }
}

impl WorkspaceStore for FsWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, rel: &Path) -> Result<Option<String>> {
        let path = self.resolve(rel)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
        }
    }

    fn inspect(&self, rel: &Path) -> Result<Entry> {
        let path = self.resolve(rel)?;
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Entry::Absent),
            Err(err) => return Err(err).with_context(|| format!("stat {}", path.display())),
        };
        if !metadata.is_file() {
            return Ok(Entry::Special);
        }
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        Ok(Entry::File(bytes))
    }

    fn write(&self, rel: &Path, contents: &str) -> Result<()> {
        let path = self.resolve(rel)?;
        debug!(path = %path.display(), bytes = contents.len(), "writing artifact");
        write_atomic(&path, contents)
    }

    fn list(&self, rel: &Path) -> Result<Vec<String>> {
        let path = self.resolve(rel)?;
        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("list {}", path.display())),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("list {}", path.display()))?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        fs::rename(&from, &to)
            .with_context(|| format!("rename {} to {}", from.display(), to.display()))
    }
}

/// Write access to exactly one [`Area`].
#[derive(Clone, Copy)]
pub struct AreaWriter<'w> {
    store: &'w dyn WorkspaceStore,
    area: Area,
}

impl<'w> AreaWriter<'w> {
    pub(crate) fn new(store: &'w dyn WorkspaceStore, area: Area) -> Self {
        Self { store, area }
    }

    pub fn area(&self) -> Area {
        self.area
    }

    /// Root-relative path for `name`, rejecting anything outside the area.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let outside = || WorkflowError::OutsideArea {
            area: self.area.to_string(),
            path: name.to_string(),
        };
        let rel = checked_relative(Path::new(name), self.area.name()).map_err(|_| outside())?;
        if self.area == Area::Deliverable && rel != Path::new(FINAL_FILE) {
            return Err(outside().into());
        }
        Ok(self.area.dir().join(rel))
    }

    pub fn write(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let rel = self.resolve(name)?;
        self.store.write(&rel, contents)?;
        Ok(rel)
    }

    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let mut buf = serde_json::to_string_pretty(value)
            .with_context(|| format!("serialize {name}"))?;
        buf.push('\n');
        self.write(name, &buf)
    }

    /// Write a file that must not exist yet.
    pub fn create_new(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let rel = self.resolve(name)?;
        if self.store.read(&rel)?.is_some() {
            anyhow::bail!("{} already exists", rel.display());
        }
        self.store.write(&rel, contents)?;
        Ok(rel)
    }

    /// Rename `from` to `to`, both inside this area.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        self.store.rename(&from, &to)
    }

    /// Move `name` aside as `name.superseded-<k>`. Returns the new name.
    pub fn supersede(&self, name: &str) -> Result<Option<String>> {
        let rel = self.resolve(name)?;
        if self.store.read(&rel)?.is_none() {
            return Ok(None);
        }
        let existing = self.store.list(&self.area.dir())?;
        let mut k = 1;
        while existing.contains(&format!("{name}.superseded-{k}")) {
            k += 1;
        }
        let target = format!("{name}.superseded-{k}");
        self.store.rename(&rel, &self.resolve(&target)?)?;
        Ok(Some(target))
    }
}

/// Read access to the whole workspace.
#[derive(Clone, Copy)]
pub struct WorkspaceReader<'w> {
    store: &'w dyn WorkspaceStore,
}

impl<'w> WorkspaceReader<'w> {
    pub fn new(store: &'w dyn WorkspaceStore) -> Self {
        Self { store }
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub fn read(&self, area: Area, name: &str) -> Result<Option<String>> {
        self.store.read(&area.path(name))
    }

    pub fn exists(&self, area: Area, name: &str) -> Result<bool> {
        Ok(self.read(area, name)?.is_some())
    }

    /// Read an artifact a phase cannot run without.
    pub fn require(&self, area: Area, name: &str, phase: &str) -> Result<String> {
        self.read(area, name)?.ok_or_else(|| {
            WorkflowError::MissingArtifact {
                phase: phase.to_string(),
                path: area.path(name).display().to_string(),
            }
            .into()
        })
    }

    pub fn read_json<T: DeserializeOwned>(&self, area: Area, name: &str) -> Result<Option<T>> {
        let Some(contents) = self.read(area, name)? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&contents)
            .with_context(|| format!("parse {}", area.path(name).display()))?;
        Ok(Some(value))
    }

    pub fn require_json<T: DeserializeOwned>(&self, area: Area, name: &str, phase: &str) -> Result<T> {
        let contents = self.require(area, name, phase)?;
        serde_json::from_str(&contents).with_context(|| format!("parse {}", area.path(name).display()))
    }

    pub fn list(&self, area: Area) -> Result<Vec<String>> {
        self.store.list(&area.dir())
    }

    /// Look at any root-relative path (used to check claimed files).
    pub fn inspect_relative(&self, rel: &str) -> Result<Entry> {
        self.store.inspect(Path::new(rel))
    }
}

/// Normalize a relative path, rejecting absolute paths and `..`.
fn checked_relative(rel: &Path, area: &str) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(WorkflowError::OutsideArea {
                    area: area.to_string(),
                    path: rel.display().to_string(),
                }
                .into());
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(WorkflowError::OutsideArea {
            area: area.to_string(),
            path: rel.display().to_string(),
        }
        .into());
    }
    Ok(out)
}

/// Atomically write a file (temp file + rename).
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?;
    let tmp_path = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
