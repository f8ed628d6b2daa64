use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use kestrel_core::error::{KestrelError, Result};

use super::{Middleware, Step};
use crate::context::ExecutionContext;

pub const DEFAULT_REQUESTS_KEY: &str = "workflow.subagent.requests";
pub const DEFAULT_RESULTS_KEY: &str = "workflow.subagent.results";

/// Work handed to a sub-agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAgentRequest {
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl SubAgentRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAgentResult {
    pub instruction: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Runs delegated work (usually a child agent).
pub trait SubAgentExecutor: Send + Sync + 'static {
    fn delegate(&self, request: SubAgentRequest) -> BoxFuture<'_, Result<SubAgentResult>>;
}

/// Delegates queued sub-agent requests.
///
/// Both hooks drain the requests key, so work queued by a node body is
/// picked up right after that node. Requests drained together run
/// concurrently; their results are appended to the results key in request
/// order.
pub struct SubAgentMiddleware {
    executor: Arc<dyn SubAgentExecutor>,
    requests_key: String,
    results_key: String,
}

impl SubAgentMiddleware {
    pub fn new(executor: Arc<dyn SubAgentExecutor>) -> Self {
        Self {
            executor,
            requests_key: DEFAULT_REQUESTS_KEY.to_string(),
            results_key: DEFAULT_RESULTS_KEY.to_string(),
        }
    }

    pub fn with_keys(mut self, requests_key: impl Into<String>, results_key: impl Into<String>) -> Self {
        self.requests_key = requests_key.into();
        self.results_key = results_key.into();
        self
    }

    async fn dispatch(&self, ctx: &ExecutionContext, step: &Step) -> Result<()> {
        let Some(raw) = ctx.take(&self.requests_key) else {
            return Ok(());
        };
        let requests: Vec<SubAgentRequest> = match raw {
            Value::Null => Vec::new(),
            Value::Array(_) => serde_json::from_value(raw)?,
            other => vec![serde_json::from_value(other)?],
        };
        if requests.is_empty() {
            return Ok(());
        }

        debug!(step = %step, requests = requests.len(), "Delegating to sub-agents");
        let count = requests.len();
        let delegated = try_join_all(requests.into_iter().map(|req| {
            let instruction = req.instruction.clone();
            async move {
                self.executor.delegate(req).await.map_err(|e| match e {
                    KestrelError::SubAgent(_) => e,
                    other => KestrelError::SubAgent(format!("{}: {}", instruction, other)),
                })
            }
        }));

        let results = tokio::select! {
            res = delegated => res?,
            interrupt = ctx.interrupted() => return Err(interrupt.into()),
        };

        let encoded = results
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        ctx.update(|data| {
            let slot = data
                .entry(self.results_key.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            match slot {
                Value::Array(list) => list.extend(encoded),
                other => *other = Value::Array(encoded),
            }
        });

        info!(step = %step, delegated = count, "Sub-agent work complete");
        Ok(())
    }
}

impl Middleware for SubAgentMiddleware {
    fn name(&self) -> &str {
        "subagent"
    }

    fn before_step<'a>(&'a self, ctx: &'a ExecutionContext, step: &'a Step) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.dispatch(ctx, step))
    }

    fn after_step<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        step: &'a Step,
        _error: Option<&'a KestrelError>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.dispatch(ctx, step))
    }
}
