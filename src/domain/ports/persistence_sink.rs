//! PersistenceSink: optional fire-and-forget recorder of terminal results.

use async_trait::async_trait;

use crate::domain::models::task::{Task, TaskResult};

/// Must never block the dispatch critical path; implementations are
/// expected to buffer or drop rather than backpressure the core.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn record(&self, task: &Task, result: &TaskResult);
}

/// A sink that discards everything, used when no external persistence is
/// configured.
pub struct NullPersistenceSink;

#[async_trait]
impl PersistenceSink for NullPersistenceSink {
    async fn record(&self, _task: &Task, _result: &TaskResult) {}
}
