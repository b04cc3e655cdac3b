//! Bus configuration
//!
//! Selects the execution strategy used for asynchronous delivery. All
//! types use camelCase JSON so a bus can be configured from the same files
//! as the rest of an application.

use crate::error::{DispatchError, Result};
use crate::pool::{self, Executor, Inline, ThreadPerTask, WorkerPool};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Execution strategy for asynchronously delivered handlers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutorKind {
    /// Run on the emitting thread (no pool)
    #[default]
    Inline,
    /// Fixed-size worker pool over a bounded queue
    Pool,
    /// One new thread per invocation
    ThreadPerTask,
}

/// Event bus configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusConfig {
    /// Execution strategy
    #[serde(default)]
    pub executor: ExecutorKind,

    /// Pool worker count (defaults to the number of available cores)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Pool task queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    pool::DEFAULT_QUEUE_CAPACITY
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorKind::Inline,
            workers: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl BusConfig {
    /// Worker pool configuration with default sizing
    pub fn pool() -> Self {
        Self {
            executor: ExecutorKind::Pool,
            ..Self::default()
        }
    }

    /// Thread-per-task configuration
    pub fn thread_per_task() -> Self {
        Self {
            executor: ExecutorKind::ThreadPerTask,
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Effective worker count
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(pool::available_workers)
    }

    pub fn validate(&self) -> Result<()> {
        if self.executor != ExecutorKind::Pool {
            return Ok(());
        }
        if self.workers == Some(0) {
            return Err(DispatchError::Config(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(DispatchError::Config(
                "queueCapacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn build_executor(&self) -> Result<Arc<dyn Executor>> {
        self.validate()?;
        let executor: Arc<dyn Executor> = match self.executor {
            ExecutorKind::Inline => Arc::new(Inline),
            ExecutorKind::Pool => {
                Arc::new(WorkerPool::new(self.worker_count(), self.queue_capacity)?)
            }
            ExecutorKind::ThreadPerTask => Arc::new(ThreadPerTask::new()),
        };
        Ok(executor)
    }
}
