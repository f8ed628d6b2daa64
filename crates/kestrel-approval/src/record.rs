use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of an approval record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Pending,
    Approved,
    Denied,
}

impl Decision {
    /// Approved and Denied admit no further transitions.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
        })
    }
}

/// A request for a human decision, as submitted by middleware or a caller.
///
/// `session_id` may be left empty when the request travels through an
/// execution context; the approval middleware then fills it from the run's
/// session key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    #[serde(default)]
    pub session_id: String,
    pub tool: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApprovalRequest {
    pub fn new(session_id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            tool: tool.into(),
            params: serde_json::Value::Null,
            reason: None,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// The persistent, audit-trailed unit of a human-in-the-loop decision.
///
/// Created by `ApprovalQueue::request`, mutated only by `approve`/`deny`,
/// never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: String,
    pub session_id: String,
    pub tool: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Normalized filesystem paths found in `params`. Audit only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<PathBuf>,
    pub decision: Decision,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub denied_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub approver: Option<String>,
    /// Why the action was requested.
    #[serde(default)]
    pub reason: Option<String>,
    /// Note attached to the decision (deny reason, approval comment, whitelist note).
    #[serde(default)]
    pub comment: Option<String>,
    /// Approved from the whitelist without a new human decision.
    #[serde(default)]
    pub auto: bool,
    /// Whitelist expiry granted by this approval, if it carried a TTL.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApprovalRecord {
    pub fn is_pending(&self) -> bool {
        self.decision == Decision::Pending
    }

    pub fn is_approved(&self) -> bool {
        self.decision == Decision::Approved
    }

    /// When the record left Pending, if it has.
    pub fn decided_at(&self) -> Option<DateTime<Utc>> {
        match self.decision {
            Decision::Pending => None,
            Decision::Approved => self.approved_at,
            Decision::Denied => self.denied_at,
        }
    }
}
