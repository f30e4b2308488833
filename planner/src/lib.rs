//! Human-gated plan-and-execute workflow over a shared, file-backed workspace.
//!
//! An objective is turned into a templated variable manifest, a narrative
//! plan awaiting human approval, a structured and decomposed plan, then one
//! execute/validate/learn pass per step and a final deliverable. Phases only
//! talk through workspace artifacts under `todo_creation_human/`.
//!
//! - **[`core`]**: Pure, deterministic logic (extraction, plan parsing,
//!   verdicts, learning, synthesis, phase transitions). No I/O.
//! - **[`io`]**: Side effects and external capabilities (workspace areas,
//!   language model, processes, prompts, events, locks).
//! - **[`agents`]**: Language-model roles with their prompts and schemas.
//! - **[`phases`]**: One module per pipeline phase, each handed only its own
//!   workspace writer.
//!
//! [`workflow`] drives the phases; [`start`] and [`validate`] back the CLI.

pub mod agents;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod phases;
pub mod start;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
pub mod workflow;

pub use error::WorkflowError;
