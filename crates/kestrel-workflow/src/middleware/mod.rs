//! Middleware pipeline: before/after hooks around every node visit.
//!
//! Before-hooks run in registration order, after-hooks in reverse, so the
//! last-registered middleware wraps innermost. Middleware talks to node
//! bodies and to other middleware only through [`ExecutionContext`] keys,
//! and every middleware takes its key names as construction options so two
//! instances of the same type can coexist in one run.

pub mod approval;
pub mod subagent;
pub mod summarize;
pub mod todo;
pub mod trace;

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::warn;

use kestrel_core::error::{KestrelError, Result};

use crate::context::ExecutionContext;

pub use approval::ApprovalMiddleware;
pub use subagent::{SubAgentExecutor, SubAgentMiddleware, SubAgentRequest, SubAgentResult};
pub use summarize::{Message, SummarizationMiddleware, Summarizer};
pub use todo::{TodoItem, TodoListMiddleware, TodoStatus};
pub use trace::TracingMiddleware;

/// The node currently being entered or left.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Step {
    pub name: String,
}

impl Step {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Hooks invoked around each step.
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Runs before the node body. An error aborts the step.
    fn before_step<'a>(
        &'a self,
        _ctx: &'a ExecutionContext,
        _step: &'a Step,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Runs after the node body, or after a failing before-hook further in.
    /// `error` is the step's failure, if any.
    fn after_step<'a>(
        &'a self,
        _ctx: &'a ExecutionContext,
        _step: &'a Step,
        _error: Option<&'a KestrelError>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Ordered middleware list.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.stages.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|m| m.name()).collect()
    }

    /// Run before-hooks in order, stopping at the first failure.
    ///
    /// Returns how many middleware were entered (the failing one included)
    /// and the outcome. Pass the count to [`Pipeline::after`].
    pub async fn before(&self, ctx: &ExecutionContext, step: &Step) -> (usize, Result<()>) {
        for (i, stage) in self.stages.iter().enumerate() {
            if let Err(e) = stage.before_step(ctx, step).await {
                return (i + 1, Err(e));
            }
        }
        (self.stages.len(), Ok(()))
    }

    /// Run after-hooks of the first `entered` middleware in reverse order.
    ///
    /// Every hook runs even if an earlier one fails. When the step itself
    /// failed, hook errors are logged and dropped; otherwise the first hook
    /// error is returned.
    pub async fn after(
        &self,
        ctx: &ExecutionContext,
        step: &Step,
        entered: usize,
        error: Option<&KestrelError>,
    ) -> Result<()> {
        let mut first_error = None;
        for stage in self.stages[..entered.min(self.stages.len())].iter().rev() {
            if let Err(e) = stage.after_step(ctx, step, error).await {
                if error.is_some() {
                    warn!(middleware = stage.name(), step = %step, error = %e, "After-hook failed while unwinding");
                } else if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!(middleware = stage.name(), step = %step, error = %e, "After-hook failed");
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
