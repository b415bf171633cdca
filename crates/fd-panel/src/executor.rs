//! Entity-partitioned parallel execution.
//!
//! Materialization, forward fill and rolling windows are defined per entity, so
//! they run as independent partitions on a fixed-size worker pool. Cancellation
//! is cooperative: each partition checks the token before it starts, and a
//! cancelled run discards its partial output.

use crate::{EngineConfig, PanelError, Result};
use rayon::prelude::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Worker pool plus cancellation token shared by the panel operations.
///
/// Cloning is cheap; clones share the pool and the token.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    pool: Option<Arc<rayon::ThreadPool>>,
    cancel: CancellationToken,
}

impl Executor {
    /// Executor on rayon's global pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor with a dedicated pool of `workers` threads.
    pub fn with_workers(workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("fd-panel-{i}"))
            .build()?;
        Ok(Self {
            pool: Some(Arc::new(pool)),
            cancel: CancellationToken::new(),
        })
    }

    /// Executor configured from an [`EngineConfig`].
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        match config.workers {
            Some(workers) => Self::with_workers(workers),
            None => Ok(Self::new()),
        }
    }

    /// Replace the cancellation token, e.g. with a child of a run-wide token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token observed by this executor.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation of every run sharing this token.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.pool
            .as_ref()
            .map_or_else(rayon::current_num_threads, |pool| pool.current_num_threads())
    }

    /// Run `f` on every partition in parallel, preserving partition order.
    ///
    /// Fails with [`PanelError::Cancelled`] if the token fires before all
    /// partitions have started, or with the first partition error.
    pub fn map_partitions<T, R, F>(&self, partitions: &[T], f: F) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R> + Sync + Send,
    {
        let run = || {
            partitions
                .par_iter()
                .map(|partition| {
                    if self.cancel.is_cancelled() {
                        return Err(PanelError::Cancelled);
                    }
                    f(partition)
                })
                .collect::<Result<Vec<R>>>()
        };
        let result = match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        };
        if matches!(result, Err(PanelError::Cancelled)) {
            tracing::warn!(partitions = partitions.len(), "run cancelled, partial output discarded");
        }
        result
    }
}
