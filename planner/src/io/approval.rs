//! Human approval of the drafted plan.
//!
//! A decision is bound to the sha256 digest of the exact `plan.md` it was
//! made on, so an edit after approval is detected before formatting.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

/// A decision as handed over by an [`ApprovalChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub decision: Decision,
    pub feedback: Option<String>,
}

impl ApprovalDecision {
    pub fn approve() -> Self {
        Self {
            decision: Decision::Approved,
            feedback: None,
        }
    }

    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            decision: Decision::Rejected,
            feedback: Some(feedback.into()),
        }
    }
}

/// A decision as persisted in `state.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub decision: Decision,
    pub plan_digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub decided_at: String,
}

/// Source of approve/reject decisions for a drafted plan.
pub trait ApprovalChannel {
    /// Decide on `plan_markdown`. `None` leaves the workflow suspended in
    /// `AwaitingApproval`.
    fn decide(&self, plan_markdown: &str) -> Result<Option<ApprovalDecision>>;
}

/// Never decides in-process; the decision arrives later through
/// `approve`/`reject`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredApproval;

impl ApprovalChannel for DeferredApproval {
    fn decide(&self, _plan_markdown: &str) -> Result<Option<ApprovalDecision>> {
        Ok(None)
    }
}

/// Hex sha256 of a plan document.
pub fn plan_digest(markdown: &str) -> String {
    hex::encode(Sha256::digest(markdown.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        let digest = plan_digest("## Approach\n");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, plan_digest("## Approach\n"));
        assert_ne!(digest, plan_digest("## Approach \n"));
        assert_eq!(
            plan_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn deferred_approval_never_decides() {
        assert_eq!(DeferredApproval.decide("plan").expect("decide"), None);
    }
}
