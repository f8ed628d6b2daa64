use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use kestrel_core::error::{KestrelError, Result};

/// Why a wait on the context ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    DeadlineExceeded,
}

impl From<Interrupt> for KestrelError {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => KestrelError::Cancelled,
            Interrupt::DeadlineExceeded => KestrelError::DeadlineExceeded,
        }
    }
}

/// Per-run key/value store shared by every node, branch and middleware.
///
/// Cloning is cheap and every clone sees the same data. Values are JSON;
/// all access goes through one lock, so parallel branches may read and write
/// freely. The context also carries the run's cancellation token and optional
/// deadline, which every blocking wait observes.
#[derive(Clone)]
pub struct ExecutionContext {
    data: Arc<Mutex<HashMap<String, Value>>>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

impl ExecutionContext {
    /// Create a context from a caller-supplied snapshot.
    pub fn new(initial: HashMap<String, Value>) -> Self {
        Self {
            data: Arc::new(Mutex::new(initial)),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Inherit cancellation from `parent`: cancelling the parent cancels this
    /// run, but cancelling the run leaves the parent alone.
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Get a value as a string, if it is one.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.lock()
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Deserialize a value into `T`. Missing keys give `Ok(None)`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.lock().insert(key.into(), value);
    }

    pub fn set_str(&self, key: impl Into<String>, value: impl Into<String>) {
        self.set(key, Value::String(value.into()));
    }

    /// Serialize `value` and store it under `key`.
    pub fn set_json<T: Serialize + ?Sized>(&self, key: impl Into<String>, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, value);
        Ok(())
    }

    /// Remove and return a value.
    pub fn take(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Run `f` with exclusive access to the whole store. Use this for
    /// read-modify-write sequences that must not interleave with other
    /// branches.
    pub fn update<R>(&self, f: impl FnOnce(&mut HashMap<String, Value>) -> R) -> R {
        let mut data = self.lock();
        f(&mut data)
    }

    /// Merge a map into the store (overwrites on conflict).
    pub fn merge(&self, other: HashMap<String, Value>) {
        self.lock().extend(other);
    }

    /// Copy of the current data.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.lock().clone()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel this run and every wait observing it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail fast if the run was cancelled or its deadline has passed.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(KestrelError::Cancelled);
        }
        if matches!(self.deadline, Some(d) if Instant::now() >= d) {
            return Err(KestrelError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolves when the run is cancelled or its deadline passes.
    /// Never resolves for a context with neither.
    pub async fn interrupted(&self) -> Interrupt {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => Interrupt::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Interrupt::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                Interrupt::Cancelled
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("keys", &self.lock().len())
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}
