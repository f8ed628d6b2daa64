use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use futures::future::BoxFuture;
use tracing::{info, warn};

use kestrel_core::error::{KestrelError, Result};

use super::{Middleware, Step};
use crate::context::ExecutionContext;

/// Logs every step with its elapsed time and outcome.
///
/// Its after-hook never fails, so it also serves as cleanup middleware that
/// observes every unwinding step.
#[derive(Default)]
pub struct TracingMiddleware {
    started: Mutex<HashMap<String, Vec<Instant>>>,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl TracingMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps that finished without error.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Steps that unwound with an error.
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Instant>>> {
        self.started.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Middleware for TracingMiddleware {
    fn name(&self) -> &str {
        "tracing"
    }

    fn before_step<'a>(&'a self, _ctx: &'a ExecutionContext, step: &'a Step) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.lock()
                .entry(step.name.clone())
                .or_default()
                .push(Instant::now());
            info!(step = %step, "Step started");
            Ok(())
        })
    }

    fn after_step<'a>(
        &'a self,
        _ctx: &'a ExecutionContext,
        step: &'a Step,
        error: Option<&'a KestrelError>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let started = {
                let mut started = self.lock();
                let popped = started.get_mut(&step.name).and_then(Vec::pop);
                if started.get(&step.name).is_some_and(Vec::is_empty) {
                    started.remove(&step.name);
                }
                popped
            };
            let elapsed_ms = started.map(|t| t.elapsed().as_millis() as u64).unwrap_or(0);

            match error {
                None => {
                    self.completed.fetch_add(1, Ordering::Relaxed);
                    info!(step = %step, elapsed_ms, "Step finished");
                }
                Some(e) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(step = %step, elapsed_ms, error = %e, "Step failed");
                }
            }
            Ok(())
        })
    }
}
