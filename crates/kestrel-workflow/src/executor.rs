use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::{join_all, BoxFuture};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use kestrel_core::config::WorkflowConfig;
use kestrel_core::error::{KestrelError, Result};

use crate::context::ExecutionContext;
use crate::graph::{Graph, Node};
use crate::middleware::{Middleware, Pipeline, Step};

/// Result of one node visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub node: String,
    /// Includes middleware and, for parallel nodes, every branch.
    pub elapsed_ms: u64,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Per-visit results in completion order.
    pub steps: Vec<StepResult>,
    /// The run's context with all accumulated data.
    pub context: ExecutionContext,
    pub total_elapsed_ms: u64,
}

impl ExecutionReport {
    /// How many times `node` was visited.
    pub fn visits(&self, node: &str) -> usize {
        self.steps.iter().filter(|s| s.node == node).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Safety cap on node visits per run, counted across all branches.
    /// `None` means unbounded.
    pub max_steps: Option<usize>,
    /// Deadline applied to runs whose context has none.
    pub timeout: Option<Duration>,
}

impl From<&WorkflowConfig> for ExecutorConfig {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            timeout: config.default_timeout(),
        }
    }
}

/// Per-run bookkeeping shared by all branches.
struct RunState {
    ctx: ExecutionContext,
    visits: AtomicUsize,
    steps: Mutex<Vec<StepResult>>,
}

impl RunState {
    fn record(&self, result: StepResult) {
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(result);
    }
}

/// Drives a [`Graph`] over an [`ExecutionContext`].
///
/// For every visited node: before-hooks, body, after-hooks, then the node's
/// transitions in registration order; the first that holds picks the next
/// node, none ends the walk. Parallel nodes run their branches concurrently
/// on the shared context and wait for all of them. Any error aborts the run.
pub struct Executor {
    graph: Arc<Graph>,
    pipeline: Pipeline,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(graph: impl Into<Arc<Graph>>) -> Self {
        Self {
            graph: graph.into(),
            pipeline: Pipeline::new(),
            config: ExecutorConfig::default(),
        }
    }

    /// Append a middleware. Registration order is before-hook order.
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.pipeline.push(middleware);
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.config.max_steps = Some(max_steps);
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Execute the graph once from its start node.
    pub async fn run(&self, ctx: ExecutionContext) -> Result<ExecutionReport> {
        self.graph.validate()?;
        let start = self
            .graph
            .start()
            .ok_or_else(|| KestrelError::InvalidGraph("graph has no nodes".to_string()))?
            .to_string();

        let ctx = match (self.config.timeout, ctx.deadline()) {
            (Some(timeout), None) => ctx.with_timeout(timeout),
            _ => ctx,
        };

        let started = Instant::now();
        let run = RunState {
            ctx,
            visits: AtomicUsize::new(0),
            steps: Mutex::new(Vec::new()),
        };

        info!(start = %start, nodes = self.graph.len(), middleware = self.pipeline.len(), "Workflow run started");

        let abort = CancellationToken::new();
        if let Err(e) = self.walk(&run, start, None, &abort).await {
            warn!(error = %e, visits = run.visits.load(Ordering::Relaxed), "Workflow run failed");
            return Err(e);
        }

        let total_elapsed_ms = started.elapsed().as_millis() as u64;
        let steps = run.steps.into_inner().unwrap_or_else(|e| e.into_inner());
        info!(steps = steps.len(), total_elapsed_ms, "Workflow run complete");

        Ok(ExecutionReport {
            steps,
            context: run.ctx,
            total_elapsed_ms,
        })
    }

    /// Walk from `from` until no transition matches or `stop_at` is reached.
    ///
    /// A cancelled `abort` ends the walk quietly before the next visit; the
    /// step in flight always finishes, after-hooks included.
    fn walk<'a>(
        &'a self,
        run: &'a RunState,
        from: String,
        stop_at: Option<&'a str>,
        abort: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut current = from;
            loop {
                if stop_at == Some(current.as_str()) {
                    return Ok(());
                }
                if abort.is_cancelled() {
                    debug!(node = %current, "Branch stopped after a sibling failed");
                    return Ok(());
                }
                let node = self
                    .graph
                    .node(&current)
                    .ok_or_else(|| KestrelError::UnknownNode(current.clone()))?;
                match self.visit(run, node, abort).await? {
                    Some(next) => current = next,
                    None => return Ok(()),
                }
            }
        })
    }

    /// Visit one node and return the next node to walk to, if any.
    async fn visit(
        &self,
        run: &RunState,
        node: &Node,
        abort: &CancellationToken,
    ) -> Result<Option<String>> {
        run.ctx.check()?;
        let visits = run.visits.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(max) = self.config.max_steps {
            if visits > max {
                return Err(KestrelError::MaxStepsExceeded(max));
            }
        }

        let step = Step::new(node.name());
        let started = Instant::now();
        debug!(node = %step, kind = node.kind(), visit = visits, "Entering node");

        let (entered, mut outcome) = self.pipeline.before(&run.ctx, &step).await;
        if outcome.is_ok() {
            outcome = self.execute(run, node, abort).await;
        }
        let after = self
            .pipeline
            .after(&run.ctx, &step, entered, outcome.as_ref().err())
            .await;
        if let Err(e) = outcome {
            error!(node = %step, error = %e, "Node failed");
            return Err(e);
        }
        after?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        run.record(StepResult {
            node: step.name.clone(),
            elapsed_ms,
        });
        debug!(node = %step, elapsed_ms, "Node complete");

        if let Node::Parallel {
            join: Some(join), ..
        } = node
        {
            return Ok(Some(join.clone()));
        }
        self.next(run, node)
    }

    async fn execute(&self, run: &RunState, node: &Node, abort: &CancellationToken) -> Result<()> {
        match node {
            Node::Action { body, .. } => {
                tokio::select! {
                    res = body(run.ctx.clone()) => res,
                    interrupt = run.ctx.interrupted() => Err(interrupt.into()),
                }
            }
            // Branches are never dropped mid-step: a failing branch cancels
            // the group and its siblings stop at their next node boundary,
            // so every entered middleware sees its after-hook.
            Node::Parallel { branches, join, .. } => {
                let join = join.as_deref();
                let group = abort.child_token();
                let group = &group;
                let walks = branches.iter().map(move |branch| async move {
                    let res = self.walk(run, branch.clone(), join, group).await;
                    if res.is_err() {
                        group.cancel();
                    }
                    res
                });
                join_all(walks).await.into_iter().collect::<Result<Vec<_>>>()?;
                Ok(())
            }
        }
    }

    /// First transition whose condition holds, in registration order.
    fn next(&self, run: &RunState, node: &Node) -> Result<Option<String>> {
        for transition in self.graph.transitions_from(node.name()) {
            let matched = transition
                .condition
                .evaluate(&run.ctx)
                .map_err(|e| KestrelError::Condition {
                    from: transition.from.clone(),
                    to: transition.to.clone(),
                    message: e.to_string(),
                })?;
            if matched {
                debug!(from = %transition.from, to = %transition.to, "Transition taken");
                return Ok(Some(transition.to.clone()));
            }
        }
        debug!(node = node.name(), "No transition matched, walk complete");
        Ok(None)
    }
}
