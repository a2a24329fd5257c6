//! sqlx-backed `JournalStore` adapter: the append-only crash-recovery log.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::error::InternalError;
use crate::domain::models::journal::{JournalPayload, JournalRecord};
use crate::domain::ports::journal_store::JournalStore;

pub struct SqliteJournalStore {
    pool: SqlitePool,
}

impl SqliteJournalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JournalStore for SqliteJournalStore {
    async fn append(&self, payload: JournalPayload) -> Result<u64, InternalError> {
        let wall_clock = chrono::Utc::now();
        let encoded = serde_json::to_string(&payload)
            .map_err(|e| InternalError(format!("journal encode failed: {e}")))?;
        let kind = journal_kind_name(&payload);

        let row = sqlx::query(
            "INSERT INTO journal (wall_clock, kind, payload) VALUES (?1, ?2, ?3) RETURNING monotonic_seq",
        )
        .bind(wall_clock)
        .bind(kind)
        .bind(encoded)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| InternalError(format!("journal append failed: {e}")))?;

        let seq: i64 = row
            .try_get("monotonic_seq")
            .map_err(|e| InternalError(format!("journal append failed: {e}")))?;
        Ok(seq as u64)
    }

    async fn replay_since(&self, since: u64) -> Result<Vec<JournalRecord>, InternalError> {
        let rows = sqlx::query(
            "SELECT monotonic_seq, wall_clock, payload FROM journal WHERE monotonic_seq > ?1 ORDER BY monotonic_seq ASC",
        )
        .bind(since as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| InternalError(format!("journal replay failed: {e}")))?;

        rows.into_iter()
            .map(|row| {
                let seq: i64 = row
                    .try_get("monotonic_seq")
                    .map_err(|e| InternalError(format!("journal replay failed: {e}")))?;
                let wall_clock: chrono::DateTime<chrono::Utc> = row
                    .try_get("wall_clock")
                    .map_err(|e| InternalError(format!("journal replay failed: {e}")))?;
                let raw: String = row
                    .try_get("payload")
                    .map_err(|e| InternalError(format!("journal replay failed: {e}")))?;
                let payload: JournalPayload = serde_json::from_str(&raw)
                    .map_err(|e| InternalError(format!("journal decode failed: {e}")))?;
                Ok(JournalRecord::new(seq as u64, wall_clock, payload))
            })
            .collect()
    }

    async fn last_seq(&self) -> Result<u64, InternalError> {
        let row = sqlx::query("SELECT COALESCE(MAX(monotonic_seq), 0) as max_seq FROM journal")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| InternalError(format!("journal query failed: {e}")))?;
        let seq: i64 = row
            .try_get("max_seq")
            .map_err(|e| InternalError(format!("journal query failed: {e}")))?;
        Ok(seq as u64)
    }
}

fn journal_kind_name(payload: &JournalPayload) -> &'static str {
    match payload {
        JournalPayload::TaskCreated { .. } => "TaskCreated",
        JournalPayload::TaskDispatched { .. } => "TaskDispatched",
        JournalPayload::TaskTerminal { .. } => "TaskTerminal",
        JournalPayload::QuotaRoll { .. } => "QuotaRoll",
        JournalPayload::ConfigChange { .. } => "ConfigChange",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::connection::create_test_pool;

    #[tokio::test]
    async fn append_then_replay_round_trips() {
        let pool = create_test_pool().await.unwrap();
        let store = SqliteJournalStore::new(pool);
        let seq = store
            .append(JournalPayload::ConfigChange {
                description: "initial boot".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(seq, 1);

        let records = store.replay_since(0).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].monotonic_seq, 1);
    }

    #[tokio::test]
    async fn last_seq_reflects_appends() {
        let pool = create_test_pool().await.unwrap();
        let store = SqliteJournalStore::new(pool);
        assert_eq!(store.last_seq().await.unwrap(), 0);
        store
            .append(JournalPayload::ConfigChange {
                description: "a".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(store.last_seq().await.unwrap(), 1);
    }
}
