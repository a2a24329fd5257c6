//! JournalStore: the append-only crash-recovery log port, backed in
//! production by `infrastructure::database`'s sqlx adapter.

use async_trait::async_trait;

use crate::domain::error::InternalError;
use crate::domain::models::journal::JournalRecord;

#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Appends a record, assigning it the next monotonic sequence number.
    async fn append(&self, payload: crate::domain::models::journal::JournalPayload) -> Result<u64, InternalError>;

    /// Replays records with `monotonic_seq > since`, in order.
    async fn replay_since(&self, since: u64) -> Result<Vec<JournalRecord>, InternalError>;

    async fn last_seq(&self) -> Result<u64, InternalError>;
}
