use std::fmt::{Display, Formatter};
use std::thread::available_parallelism;

use serde::{Deserialize, Serialize};

/// When writes reach the views they replicate to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    /// Replication finishes before the triggering write returns.
    #[default]
    Sync,
    /// Replication runs detached on a worker pool; failures are logged and counted.
    Async,
}

impl Display for ReplicationMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicationMode::Sync => write!(f, "sync"),
            ReplicationMode::Async => write!(f, "async"),
        }
    }
}

/// Settings for a graph, fixed when the graph is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplicationOptions {
    mode: ReplicationMode,
    sync_on_write: bool,
    workers: usize,
}

impl Default for ReplicationOptions {
    fn default() -> Self {
        Self {
            mode: ReplicationMode::default(),
            sync_on_write: false,
            workers: available_parallelism().map(|n| n.get()).unwrap_or(1).min(4),
        }
    }
}

impl ReplicationOptions {
    pub fn with_mode(mut self, mode: ReplicationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Flush the view's replica after every write made through the serving boundary.
    pub fn with_sync_on_write(mut self, sync_on_write: bool) -> Self {
        self.sync_on_write = sync_on_write;
        self
    }

    /// Size of the worker pool used in [`ReplicationMode::Async`].
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn mode(&self) -> ReplicationMode {
        self.mode
    }

    pub fn sync_on_write(&self) -> bool {
        self.sync_on_write
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}
