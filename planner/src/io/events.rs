//! Phase start/end events.
//!
//! Events are observational. A sink that fails is logged and ignored.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::io::state::timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Finished,
    Failed,
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseEvent {
    pub workflow_id: String,
    /// Phase display form, e.g. `executing(2)`.
    pub phase: String,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: String,
}

impl PhaseEvent {
    pub fn new(workflow_id: &str, phase: impl ToString, kind: EventKind) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            phase: phase.to_string(),
            kind,
            detail: None,
            at: timestamp(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

pub trait EventSink {
    fn emit(&self, event: &PhaseEvent) -> Result<()>;
}

/// Emits each event as an `info!` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &PhaseEvent) -> Result<()> {
        info!(
            workflow_id = %event.workflow_id,
            phase = %event.phase,
            kind = ?event.kind,
            detail = event.detail.as_deref().unwrap_or(""),
            "phase event"
        );
        Ok(())
    }
}

/// Appends one JSON object per line.
#[derive(Debug, Clone)]
pub struct JsonlEventLog {
    path: PathBuf,
}

impl JsonlEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonlEventLog {
    fn emit(&self, event: &PhaseEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(event).context("serialize event")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open event log {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append event log {}", self.path.display()))
    }
}

/// Forwards every event to each inner sink.
#[derive(Default)]
pub struct FanOut {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanOut {
    pub fn new(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanOut {
    fn emit(&self, event: &PhaseEvent) -> Result<()> {
        for sink in &self.sinks {
            publish(sink.as_ref(), event);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &PhaseEvent) -> Result<()> {
        Ok(())
    }
}

/// Emit without letting a sink failure reach the caller.
pub fn publish(sink: &dyn EventSink, event: &PhaseEvent) {
    if let Err(err) = sink.emit(event) {
        warn!(err = %format!("{err:#}"), phase = %event.phase, "event sink failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl EventSink for Failing {
        fn emit(&self, _event: &PhaseEvent) -> Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn jsonl_log_appends_one_line_per_event() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = JsonlEventLog::new(temp.path().join("state/events.jsonl"));
        log.emit(&PhaseEvent::new("wf-1", "drafting", EventKind::Started))
            .expect("emit");
        log.emit(
            &PhaseEvent::new("wf-1", "drafting", EventKind::Finished).with_detail("plan.md"),
        )
        .expect("emit");

        let raw = fs::read_to_string(log.path()).expect("read");
        let events: Vec<PhaseEvent> = raw
            .lines()
            .map(|line| serde_json::from_str(line).expect("parse"))
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, EventKind::Finished);
        assert_eq!(events[1].detail.as_deref(), Some("plan.md"));
    }

    /// Verifies one failing sink does not stop the others.
    #[test]
    fn fan_out_survives_failing_sink() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("events.jsonl");
        let fan_out = FanOut::new(vec![Box::new(Failing), Box::new(JsonlEventLog::new(&path))]);
        publish(&fan_out, &PhaseEvent::new("wf-1", "done", EventKind::Suspended));
        assert_eq!(fs::read_to_string(&path).expect("read").lines().count(), 1);
    }
}
