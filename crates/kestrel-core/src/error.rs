use thiserror::Error;

#[derive(Debug, Error)]
pub enum KestrelError {
    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    // State-conflict errors
    #[error("Approval record not found: {0}")]
    RecordNotFound(String),

    #[error("Approval {id} already decided ({decision})")]
    AlreadyDecided { id: String, decision: String },

    // Approval outcomes
    #[error("Approval denied for tool {tool}: {reason}")]
    ApprovalDenied { tool: String, reason: String },

    #[error("Approval timeout for tool {tool} (record {record_id} left pending)")]
    ApprovalTimeout { tool: String, record_id: String },

    #[error("Approval wait cancelled for tool {tool} (record {record_id} left pending)")]
    ApprovalCancelled { tool: String, record_id: String },

    // Execution errors
    #[error("Workflow cancelled")]
    Cancelled,

    #[error("Workflow deadline exceeded")]
    DeadlineExceeded,

    #[error("Node failed: {node}: {message}")]
    NodeFailed { node: String, message: String },

    #[error("Condition on transition {from} -> {to} failed: {message}")]
    Condition {
        from: String,
        to: String,
        message: String,
    },

    #[error("Middleware error: {name}: {message}")]
    Middleware { name: String, message: String },

    #[error("Workflow exceeded max steps ({0})")]
    MaxStepsExceeded(usize),

    // Collaborator errors
    #[error("Sub-agent delegation failed: {0}")]
    SubAgent(String),

    #[error("Summarization failed: {0}")]
    Summarization(String),

    // Persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Approval queue is closed")]
    QueueClosed,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KestrelError {
    /// True when a human (or policy) explicitly refused the action.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::ApprovalDenied { .. })
    }

    /// True for waits that ended without a decision: approval timeout,
    /// cancellation, or run deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ApprovalTimeout { .. }
                | Self::ApprovalCancelled { .. }
                | Self::Cancelled
                | Self::DeadlineExceeded
        )
    }

    /// Whether re-driving the same operation may succeed later.
    ///
    /// Only transient waits qualify; validation and state conflicts never do.
    pub fn is_retryable(&self) -> bool {
        self.is_timeout()
    }
}

pub type Result<T> = std::result::Result<T, KestrelError>;
