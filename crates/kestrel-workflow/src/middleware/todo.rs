use std::sync::{Mutex, OnceLock};

use futures::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use kestrel_core::error::{KestrelError, Result};

use super::{Middleware, Step};
use crate::context::ExecutionContext;

pub const DEFAULT_TEXT_KEY: &str = "workflow.todo.text";
pub const DEFAULT_LIST_KEY: &str = "workflow.todo.list";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    #[serde(default)]
    pub status: TodoStatus,
}

/// Tracks the workflow's todo list.
///
/// Around every step it drains its text key, which may hold a markdown
/// checklist (`- [ ] open`, `- [~] doing`, `- [x] done`) or a JSON list of
/// items. The latest list replaces the previous one and is published under
/// the list key.
pub struct TodoListMiddleware {
    text_key: String,
    list_key: String,
    items: Mutex<Vec<TodoItem>>,
}

impl Default for TodoListMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl TodoListMiddleware {
    pub fn new() -> Self {
        Self {
            text_key: DEFAULT_TEXT_KEY.to_string(),
            list_key: DEFAULT_LIST_KEY.to_string(),
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn with_keys(mut self, text_key: impl Into<String>, list_key: impl Into<String>) -> Self {
        self.text_key = text_key.into();
        self.list_key = list_key.into();
        self
    }

    /// Snapshot of the current list.
    pub fn list(&self) -> Vec<TodoItem> {
        self.lock().clone()
    }

    fn sync(&self, ctx: &ExecutionContext, step: &Step) -> Result<()> {
        let Some(raw) = ctx.take(&self.text_key) else {
            return Ok(());
        };
        let items = parse_todos(raw)?;
        debug!(step = %step, items = items.len(), "Todo list updated");
        ctx.set_json(self.list_key.as_str(), &items)?;
        *self.lock() = items;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TodoItem>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Middleware for TodoListMiddleware {
    fn name(&self) -> &str {
        "todo"
    }

    fn before_step<'a>(&'a self, ctx: &'a ExecutionContext, step: &'a Step) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.sync(ctx, step) })
    }

    fn after_step<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        step: &'a Step,
        _error: Option<&'a KestrelError>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.sync(ctx, step) })
    }
}

fn checklist_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[-*+]\s+\[([ xX~])\]\s+(.+?)\s*$").unwrap())
}

/// Parse a checklist string or a JSON list (of items or plain strings).
pub fn parse_todos(raw: Value) -> Result<Vec<TodoItem>> {
    match raw {
        Value::String(text) => Ok(parse_checklist(&text)),
        Value::Array(entries) => entries
            .into_iter()
            .map(|entry| match entry {
                Value::String(content) => Ok(TodoItem {
                    content,
                    status: TodoStatus::Pending,
                }),
                other => serde_json::from_value(other).map_err(KestrelError::from),
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(KestrelError::Validation(format!(
            "todo list must be a checklist string or a list, got {}",
            other
        ))),
    }
}

fn parse_checklist(text: &str) -> Vec<TodoItem> {
    text.lines()
        .filter_map(|line| checklist_re().captures(line))
        .map(|caps| TodoItem {
            content: caps[2].to_string(),
            status: match &caps[1] {
                "x" | "X" => TodoStatus::Completed,
                "~" => TodoStatus::InProgress,
                _ => TodoStatus::Pending,
            },
        })
        .collect()
}
