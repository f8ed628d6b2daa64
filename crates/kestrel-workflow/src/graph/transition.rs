use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use kestrel_core::error::{KestrelError, Result};

use crate::context::ExecutionContext;

type ConditionFn = Arc<dyn Fn(&ExecutionContext) -> Result<bool> + Send + Sync>;

/// Guard on a transition. Conditions only observe the context.
#[derive(Clone)]
pub struct Condition {
    kind: ConditionKind,
}

#[derive(Clone)]
enum ConditionKind {
    Always,
    Expr(Expr),
    Func(ConditionFn),
}

impl Condition {
    /// Always take this transition.
    pub fn always() -> Self {
        Self {
            kind: ConditionKind::Always,
        }
    }

    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            kind: ConditionKind::Func(Arc::new(f)),
        }
    }

    /// Parse a simple expression over context values.
    ///
    /// Supported:
    /// - `key == "value"`
    /// - `key != "value"`
    /// - `key contains "substr"`
    ///
    /// Non-string values compare by their JSON text, so `count == "3"` matches
    /// the number 3. A missing key never matches.
    pub fn expr(expr: &str) -> Result<Self> {
        Ok(Self {
            kind: ConditionKind::Expr(Expr::parse(expr)?),
        })
    }

    pub fn evaluate(&self, ctx: &ExecutionContext) -> Result<bool> {
        match &self.kind {
            ConditionKind::Always => Ok(true),
            ConditionKind::Expr(expr) => Ok(expr.evaluate(ctx)),
            ConditionKind::Func(f) => f(ctx),
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::always()
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ConditionKind::Always => write!(f, "Always"),
            ConditionKind::Expr(expr) => write!(f, "Expr({} {:?} {:?})", expr.key, expr.op, expr.value),
            ConditionKind::Func(_) => write!(f, "Func"),
        }
    }
}

/// A conditional edge between two nodes.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub condition: Condition,
}

impl Transition {
    pub fn new(from: impl Into<String>, to: impl Into<String>, condition: Condition) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition,
        }
    }

    pub fn always(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(from, to, Condition::always())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Contains,
}

#[derive(Debug, Clone)]
struct Expr {
    key: String,
    op: Op,
    value: String,
}

impl Expr {
    /// Parse `key OP "value"`. The key is the leading token, so a key that
    /// happens to contain an operator word still parses as a key.
    fn parse(expr: &str) -> Result<Self> {
        let unsupported = || {
            KestrelError::Validation(format!("unsupported condition expression: {}", expr))
        };
        let trimmed = expr.trim();
        let split = trimmed
            .find(|c: char| c.is_whitespace() || c == '=' || c == '!')
            .unwrap_or(trimmed.len());
        let (key, rest) = trimmed.split_at(split);
        if key.is_empty() {
            return Err(unsupported());
        }

        let rest = rest.trim_start();
        let (op, value) = if let Some(value) = rest.strip_prefix("==") {
            (Op::Eq, value)
        } else if let Some(value) = rest.strip_prefix("!=") {
            (Op::Ne, value)
        } else if let Some(value) = rest
            .strip_prefix("contains")
            .filter(|v| v.starts_with(char::is_whitespace) || v.starts_with('"'))
        {
            (Op::Contains, value)
        } else {
            return Err(unsupported());
        };

        Ok(Self {
            key: key.to_string(),
            op,
            value: value.trim().trim_matches('"').to_string(),
        })
    }

    fn evaluate(&self, ctx: &ExecutionContext) -> bool {
        let Some(actual) = ctx.get(&self.key).and_then(value_text) else {
            return false;
        };
        match self.op {
            Op::Eq => actual == self.value,
            Op::Ne => actual != self.value,
            Op::Contains => actual.contains(&self.value),
        }
    }
}

fn value_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
