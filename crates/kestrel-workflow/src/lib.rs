//! Graph workflow engine.
//!
//! A [`Graph`] of action and parallel [`Node`]s joined by guarded
//! [`Transition`]s is driven by an [`Executor`] over a shared
//! [`ExecutionContext`]. Every node visit is wrapped by a [`Pipeline`] of
//! [`Middleware`]; [`ApprovalMiddleware`] can hold a step until a human
//! decides on it through the `kestrel-approval` queue.

pub mod context;
pub mod executor;
pub mod graph;
pub mod middleware;

pub use context::{ExecutionContext, Interrupt};
pub use executor::{ExecutionReport, Executor, ExecutorConfig, StepResult};
pub use graph::{Condition, Graph, Node, Transition};
pub use middleware::{
    ApprovalMiddleware, Message, Middleware, Pipeline, Step, SubAgentExecutor, SubAgentMiddleware,
    SubAgentRequest, SubAgentResult, SummarizationMiddleware, Summarizer, TodoItem,
    TodoListMiddleware, TodoStatus, TracingMiddleware,
};
