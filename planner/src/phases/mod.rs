//! Pipeline phases.
//!
//! Each phase reads what it needs through a [`WorkspaceReader`] and writes
//! only through the [`AreaWriter`] for its own area. A phase that finds its
//! output already present reuses it, so re-running after a stop is safe.
//!
//! [`WorkspaceReader`]: crate::io::workspace::WorkspaceReader
//! [`AreaWriter`]: crate::io::workspace::AreaWriter

pub mod decompose;
pub mod draft;
pub mod extract;
pub mod format;
pub mod steps;
pub mod synthesize;
