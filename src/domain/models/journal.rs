//! Crash-recovery journal record, per §6's persisted state layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::provider::ProviderQuota;
use crate::domain::models::task::{Task, TaskResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum JournalPayload {
    TaskCreated { task: Task },
    TaskDispatched { task_id: uuid::Uuid, supervisor_id: uuid::Uuid },
    TaskTerminal { result: TaskResult, idempotent_replay_safe: bool },
    QuotaRoll { quota: ProviderQuota },
    ConfigChange { description: String },
}

/// One append-only record. `monotonic_seq` is assigned by the journal store
/// at append time and is never reused across a process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub monotonic_seq: u64,
    pub wall_clock: DateTime<Utc>,
    pub payload: JournalPayload,
}

impl JournalRecord {
    pub fn new(monotonic_seq: u64, wall_clock: DateTime<Utc>, payload: JournalPayload) -> Self {
        Self {
            monotonic_seq,
            wall_clock,
            payload,
        }
    }

    /// On replay, a non-terminal task that is not flagged idempotent-replay-
    /// safe is marked `Failed/RecoveredFromCrash` rather than resumed,
    /// per §6's recovery rule.
    pub fn is_safe_to_resume(&self) -> bool {
        matches!(
            &self.payload,
            JournalPayload::TaskTerminal {
                idempotent_replay_safe: true,
                ..
            }
        )
    }
}
