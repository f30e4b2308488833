//! Pure workflow logic.
//!
//! Nothing here touches the filesystem, spawns processes or reads the clock.
//! Callers in `io`, `phases` and `workflow` gather inputs and persist outputs.

pub mod decompose;
pub mod invariants;
pub mod learning;
pub mod phase;
pub mod plan_format;
pub mod synthesis;
pub mod types;
pub mod variables;
pub mod verdict;
