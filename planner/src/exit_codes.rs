//! Stable exit codes for `todo-planner` commands.

/// Command succeeded; a finished workflow had every step pass.
pub const OK: i32 = 0;
/// Invalid workspace, config or artifacts, or any other error.
pub const INVALID: i32 = 1;
/// The workflow is suspended waiting for plan approval.
pub const AWAITING_APPROVAL: i32 = 2;
/// The drafted plan was rejected and needs a redraft.
pub const REJECTED: i32 = 3;
/// The workflow finished but at least one step failed validation.
pub const STEPS_FAILED: i32 = 4;
