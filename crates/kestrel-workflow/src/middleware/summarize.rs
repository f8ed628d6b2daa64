use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use kestrel_core::error::{KestrelError, Result};

use super::{Middleware, Step};
use crate::context::ExecutionContext;

pub const DEFAULT_MESSAGES_KEY: &str = "workflow.summary.messages";
pub const DEFAULT_CURRENT_KEY: &str = "workflow.summary.current";
pub const DEFAULT_HISTORY_KEY: &str = "workflow.summary.history";
pub const DEFAULT_MANUAL_KEY: &str = "workflow.summary.manual";
pub const DEFAULT_THRESHOLD: usize = 20;

/// Role given to the message that replaces summarized history.
pub const SUMMARY_ROLE: &str = "summary";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn is_summary(&self) -> bool {
        self.role == SUMMARY_ROLE
    }
}

/// Produces a summary of a message list (usually backed by a model).
pub trait Summarizer: Send + Sync + 'static {
    fn summarize<'a>(&'a self, messages: &'a [Message]) -> BoxFuture<'a, Result<String>>;
}

/// Compresses the conversation held in the context.
///
/// Before a step, when the message list reaches the threshold or the manual
/// flag is set, everything except the last `keep_tail` messages is replaced
/// by one summary message. The new summary is stored under the current key
/// and the one it replaces is appended to the history list.
pub struct SummarizationMiddleware {
    summarizer: Arc<dyn Summarizer>,
    threshold: usize,
    keep_tail: usize,
    messages_key: String,
    current_key: String,
    history_key: String,
    manual_key: String,
}

impl SummarizationMiddleware {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            summarizer,
            threshold: DEFAULT_THRESHOLD,
            keep_tail: 0,
            messages_key: DEFAULT_MESSAGES_KEY.to_string(),
            current_key: DEFAULT_CURRENT_KEY.to_string(),
            history_key: DEFAULT_HISTORY_KEY.to_string(),
            manual_key: DEFAULT_MANUAL_KEY.to_string(),
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    /// Keep the last `n` messages verbatim.
    pub fn with_keep_tail(mut self, n: usize) -> Self {
        self.keep_tail = n;
        self
    }

    /// Override the messages, current-summary and history keys.
    pub fn with_keys(
        mut self,
        messages: impl Into<String>,
        current: impl Into<String>,
        history: impl Into<String>,
    ) -> Self {
        self.messages_key = messages.into();
        self.current_key = current.into();
        self.history_key = history.into();
        self
    }

    pub fn with_manual_key(mut self, key: impl Into<String>) -> Self {
        self.manual_key = key.into();
        self
    }

    async fn maybe_summarize(&self, ctx: &ExecutionContext, step: &Step) -> Result<()> {
        let manual = matches!(ctx.take(&self.manual_key), Some(Value::Bool(true)));
        let messages: Vec<Message> = ctx.get_as(&self.messages_key)?.unwrap_or_default();
        if messages.len() < self.threshold && !manual {
            return Ok(());
        }

        let split = messages.len().saturating_sub(self.keep_tail);
        let (head, tail) = messages.split_at(split);
        if head.is_empty() || (head.len() == 1 && head[0].is_summary()) {
            debug!(step = %step, "Nothing new to summarize");
            return Ok(());
        }

        let summary = self
            .summarizer
            .summarize(head)
            .await
            .map_err(|e| match e {
                KestrelError::Summarization(_) => e,
                other => KestrelError::Summarization(other.to_string()),
            })?;

        let mut compacted = Vec::with_capacity(tail.len() + 1);
        compacted.push(Message::new(SUMMARY_ROLE, summary.clone()));
        compacted.extend_from_slice(tail);

        let previous = ctx.take(&self.current_key);
        ctx.update(|data| {
            if let Some(previous) = previous {
                let history = data
                    .entry(self.history_key.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                match history {
                    Value::Array(list) => list.push(previous),
                    other => *other = Value::Array(vec![previous]),
                }
            }
            data.insert(self.current_key.clone(), Value::String(summary));
        });
        ctx.set_json(self.messages_key.as_str(), &compacted)?;

        info!(
            step = %step,
            summarized = head.len(),
            kept = tail.len(),
            manual,
            "Conversation summarized"
        );
        Ok(())
    }
}

impl Middleware for SummarizationMiddleware {
    fn name(&self) -> &str {
        "summarization"
    }

    fn before_step<'a>(&'a self, ctx: &'a ExecutionContext, step: &'a Step) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.maybe_summarize(ctx, step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
    }

    impl Summarizer for Counting {
        fn summarize<'a>(&'a self, messages: &'a [Message]) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(format!("recap {} of {} messages", n, messages.len()))
            })
        }
    }

    struct Failing;

    impl Summarizer for Failing {
        fn summarize<'a>(&'a self, _messages: &'a [Message]) -> BoxFuture<'a, Result<String>> {
            Box::pin(async { Err(KestrelError::Validation("model offline".into())) })
        }
    }

    fn counting() -> Arc<Counting> {
        Arc::new(Counting {
            calls: AtomicUsize::new(0),
        })
    }

    fn messages(n: usize) -> Vec<Message> {
        (0..n).map(|i| Message::new("user", format!("turn {}", i))).collect()
    }

    #[tokio::test]
    async fn below_threshold_is_noop() {
        let summarizer = counting();
        let mw = SummarizationMiddleware::new(summarizer.clone()).with_threshold(5);
        let ctx = ExecutionContext::default();
        ctx.set_json(DEFAULT_MESSAGES_KEY, &messages(3)).unwrap();

        mw.before_step(&ctx, &Step::new("s")).await.unwrap();
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
        assert!(!ctx.contains(DEFAULT_CURRENT_KEY));
    }

    #[tokio::test]
    async fn threshold_replaces_head_and_keeps_tail() {
        let summarizer = counting();
        let mw = SummarizationMiddleware::new(summarizer.clone())
            .with_threshold(4)
            .with_keep_tail(1);
        let ctx = ExecutionContext::default();
        ctx.set_json(DEFAULT_MESSAGES_KEY, &messages(4)).unwrap();

        mw.before_step(&ctx, &Step::new("s")).await.unwrap();

        let msgs: Vec<Message> = ctx.get_as(DEFAULT_MESSAGES_KEY).unwrap().unwrap();
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].is_summary());
        assert_eq!(msgs[0].content, "recap 1 of 3 messages");
        assert_eq!(msgs[1].content, "turn 3");
        assert_eq!(ctx.get_str(DEFAULT_CURRENT_KEY).as_deref(), Some("recap 1 of 3 messages"));
    }

    #[tokio::test]
    async fn manual_flag_and_history() {
        let summarizer = counting();
        let mw = SummarizationMiddleware::new(summarizer.clone())
            .with_keys("int.messages", "int.current", "int.history");
        let ctx = ExecutionContext::default();

        ctx.set_json("int.messages", &messages(1)).unwrap();
        ctx.set(DEFAULT_MANUAL_KEY, Value::Bool(true));
        mw.before_step(&ctx, &Step::new("a")).await.unwrap();
        assert!(!ctx.contains(DEFAULT_MANUAL_KEY));

        // Only the summary is left; a manual request has nothing new to do.
        ctx.set(DEFAULT_MANUAL_KEY, Value::Bool(true));
        mw.before_step(&ctx, &Step::new("b")).await.unwrap();
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);

        let mut msgs: Vec<Message> = ctx.get_as("int.messages").unwrap().unwrap();
        msgs.push(Message::new("user", "more"));
        ctx.set_json("int.messages", &msgs).unwrap();
        ctx.set(DEFAULT_MANUAL_KEY, Value::Bool(true));
        mw.before_step(&ctx, &Step::new("c")).await.unwrap();

        assert_eq!(ctx.get_str("int.current").as_deref(), Some("recap 2 of 2 messages"));
        let history: Vec<String> = ctx.get_as("int.history").unwrap().unwrap();
        assert_eq!(history, vec!["recap 1 of 1 messages"]);
    }

    #[tokio::test]
    async fn summarizer_errors_are_wrapped() {
        let mw = SummarizationMiddleware::new(Arc::new(Failing)).with_threshold(1);
        let ctx = ExecutionContext::default();
        ctx.set_json(DEFAULT_MESSAGES_KEY, &messages(2)).unwrap();
        let err = mw.before_step(&ctx, &Step::new("s")).await.unwrap_err();
        assert!(matches!(err, KestrelError::Summarization(msg) if msg.contains("model offline")));
    }
}
