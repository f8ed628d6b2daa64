use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use kestrel_core::error::Result;

use crate::context::ExecutionContext;

/// Body of an action node.
pub type ActionFn = Arc<dyn Fn(ExecutionContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A node in the workflow graph.
///
/// Names are unique within a graph. The executor dispatches on the variant.
#[derive(Clone)]
pub enum Node {
    /// A named unit of work.
    Action { name: String, body: ActionFn },
    /// Fan out to `branches` concurrently and wait for all of them.
    ///
    /// Each branch walks the graph from its node until it reaches `join` or a
    /// node with no matching transition. With a join set, execution continues
    /// at the join node; without one, this node's own transitions decide.
    Parallel {
        name: String,
        branches: Vec<String>,
        join: Option<String>,
    },
}

impl Node {
    /// Create an action node from an async body.
    pub fn action<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::Action {
            name: name.into(),
            body: Arc::new(move |ctx| Box::pin(body(ctx))),
        }
    }

    /// Create an action node from a synchronous body.
    pub fn task<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Result<()> + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        Self::action(name, move |ctx| {
            let body = body.clone();
            async move { body(&ctx) }
        })
    }

    /// Create a parallel node over the named branches.
    pub fn parallel<I, S>(name: impl Into<String>, branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Parallel {
            name: name.into(),
            branches: branches.into_iter().map(Into::into).collect(),
            join: None,
        }
    }

    /// Set the join node of a parallel node. No effect on actions.
    pub fn with_join(self, join: impl Into<String>) -> Self {
        match self {
            Self::Parallel { name, branches, .. } => Self::Parallel {
                name,
                branches,
                join: Some(join.into()),
            },
            action => action,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Action { name, .. } | Self::Parallel { name, .. } => name,
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Parallel { .. })
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Action { .. } => "action",
            Self::Parallel { .. } => "parallel",
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action { name, .. } => f.debug_struct("Action").field("name", name).finish(),
            Self::Parallel {
                name,
                branches,
                join,
            } => f
                .debug_struct("Parallel")
                .field("name", name)
                .field("branches", branches)
                .field("join", join)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallel_builder() {
        let node = Node::parallel("fanout", ["left", "right"]).with_join("done");
        assert_eq!(node.name(), "fanout");
        assert!(node.is_parallel());
        match node {
            Node::Parallel { branches, join, .. } => {
                assert_eq!(branches, vec!["left", "right"]);
                assert_eq!(join.as_deref(), Some("done"));
            }
            _ => panic!("expected parallel"),
        }
    }

    #[test]
    fn join_ignored_on_actions() {
        let node = Node::task("a", |_| Ok(())).with_join("b");
        assert_eq!(node.kind(), "action");
        assert!(format!("{:?}", node).contains("\"a\""));
    }

    #[tokio::test]
    async fn task_body_runs() {
        let node = Node::task("set", |ctx| {
            ctx.set_str("done", "yes");
            Ok(())
        });
        let ctx = ExecutionContext::default();
        if let Node::Action { body, .. } = &node {
            body(ctx.clone()).await.unwrap();
        }
        assert_eq!(ctx.get_str("done").as_deref(), Some("yes"));
    }
}
