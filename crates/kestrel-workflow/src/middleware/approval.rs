use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, info, warn};

use kestrel_approval::{ApprovalQueue, ApprovalRecord, ApprovalRequest, Decision};
use kestrel_core::config::ApprovalConfig;
use kestrel_core::error::{KestrelError, Result};

use super::{Middleware, Step};
use crate::context::{ExecutionContext, Interrupt};

pub const DEFAULT_REQUEST_KEY: &str = "workflow.approval.requests";
pub const DEFAULT_RESULT_KEY: &str = "workflow.approval.results";
pub const DEFAULT_SESSION_KEY: &str = "workflow.session.id";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Gates a step on human approval.
///
/// Before each step it drains the request key. Each request is submitted to
/// the [`ApprovalQueue`]; whitelisted scopes approve at once, anything else
/// blocks this step (and only this step) until the record is decided or the
/// run is cancelled. Approved records are written to the result key as a
/// list in request order.
///
/// A denial fails the step with `ApprovalDenied`. Cancellation and deadline
/// fail it with `ApprovalCancelled` / `ApprovalTimeout` and leave the record
/// pending, so it can still be decided out of band and the workflow re-driven.
pub struct ApprovalMiddleware {
    queue: Arc<ApprovalQueue>,
    request_key: String,
    result_key: String,
    session_key: String,
    poll_interval: Duration,
}

impl ApprovalMiddleware {
    pub fn new(queue: Arc<ApprovalQueue>) -> Self {
        Self {
            queue,
            request_key: DEFAULT_REQUEST_KEY.to_string(),
            result_key: DEFAULT_RESULT_KEY.to_string(),
            session_key: DEFAULT_SESSION_KEY.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Build with the poll interval from configuration.
    pub fn from_config(queue: Arc<ApprovalQueue>, config: &ApprovalConfig) -> Self {
        Self::new(queue).with_poll_interval(config.poll_interval())
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Override the request and result keys.
    pub fn with_keys(mut self, request_key: impl Into<String>, result_key: impl Into<String>) -> Self {
        self.request_key = request_key.into();
        self.result_key = result_key.into();
        self
    }

    /// Override the key holding the session id used for requests without one.
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = key.into();
        self
    }

    pub fn queue(&self) -> &Arc<ApprovalQueue> {
        &self.queue
    }

    async fn resolve(&self, ctx: &ExecutionContext, request: &ApprovalRequest) -> Result<ApprovalRecord> {
        let (record, auto) = self.queue.submit(request)?;
        if auto {
            debug!(record_id = %record.id, tool = %record.tool, "Step auto-approved");
            return Ok(record);
        }

        info!(
            record_id = %record.id,
            session = %record.session_id,
            tool = %record.tool,
            "Step waiting for approval"
        );

        loop {
            // Register for the wake-up before reading so a decision landing
            // between the read and the wait is not missed.
            let decided = self.queue.decided();
            tokio::pin!(decided);
            decided.as_mut().enable();

            let current = self
                .queue
                .get(&record.id)?
                .ok_or_else(|| KestrelError::RecordNotFound(record.id.clone()))?;
            match current.decision {
                Decision::Approved => {
                    info!(record_id = %current.id, "Step approved");
                    return Ok(current);
                }
                Decision::Denied => {
                    let reason = current
                        .comment
                        .clone()
                        .unwrap_or_else(|| "denied by approver".to_string());
                    warn!(record_id = %current.id, reason = %reason, "Step denied");
                    return Err(KestrelError::ApprovalDenied {
                        tool: current.tool,
                        reason,
                    });
                }
                Decision::Pending => {}
            }

            tokio::select! {
                _ = &mut decided => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                interrupt = ctx.interrupted() => {
                    warn!(record_id = %record.id, ?interrupt, "Approval wait abandoned, record left pending");
                    return Err(match interrupt {
                        Interrupt::Cancelled => KestrelError::ApprovalCancelled {
                            tool: record.tool.clone(),
                            record_id: record.id.clone(),
                        },
                        Interrupt::DeadlineExceeded => KestrelError::ApprovalTimeout {
                            tool: record.tool.clone(),
                            record_id: record.id.clone(),
                        },
                    });
                }
            }
        }
    }
}

/// Accept one request or a list of them.
fn parse_requests(key: &str, raw: Value) -> Result<Vec<ApprovalRequest>> {
    let requests = match raw {
        Value::Null => Vec::new(),
        Value::Array(_) => serde_json::from_value(raw)?,
        Value::Object(_) => vec![serde_json::from_value(raw)?],
        other => {
            return Err(KestrelError::Validation(format!(
                "{} must hold an approval request or a list of them, got {}",
                key, other
            )))
        }
    };
    Ok(requests)
}

impl Middleware for ApprovalMiddleware {
    fn name(&self) -> &str {
        "approval"
    }

    fn before_step<'a>(&'a self, ctx: &'a ExecutionContext, step: &'a Step) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let Some(raw) = ctx.take(&self.request_key) else {
                return Ok(());
            };
            let requests = parse_requests(&self.request_key, raw)?;
            if requests.is_empty() {
                return Ok(());
            }

            let session = ctx.get_str(&self.session_key);
            debug!(step = %step, requests = requests.len(), "Resolving approval requests");

            let mut results = Vec::with_capacity(requests.len());
            let mut outcome = Ok(());
            let mut remaining = requests.into_iter();
            while let Some(mut request) = remaining.next() {
                if request.session_id.trim().is_empty() {
                    if let Some(session) = &session {
                        request.session_id = session.clone();
                    }
                }
                match self.resolve(ctx, &request).await {
                    Ok(record) => results.push(record),
                    Err(e) => {
                        outcome = Err(e);
                        break;
                    }
                }
            }

            // Records decided so far are published even when a later request
            // fails; requests never submitted go back under the request key.
            let unsubmitted: Vec<ApprovalRequest> = remaining.collect();
            if !unsubmitted.is_empty() {
                ctx.set_json(self.request_key.as_str(), &unsubmitted)?;
            }
            ctx.set_json(self.result_key.as_str(), &results)?;
            outcome
        })
    }
}
