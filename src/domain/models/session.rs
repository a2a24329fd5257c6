//! Session entity: an authenticated duplex channel bound to a principal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SessionId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub principal: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Monotonic per-session outbound sequence cursor (§6 wire protocol).
    pub outbound_seq: u64,
    pub cancelled: bool,
}

impl Session {
    pub fn new(principal: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal: principal.into(),
            created_at: now,
            last_activity: now,
            outbound_seq: 0,
            cancelled: false,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    pub fn is_idle(&self, now: DateTime<Utc>, idle_timeout: chrono::Duration) -> bool {
        now - self.last_activity > idle_timeout
    }

    /// Returns the next outbound sequence number, advancing the cursor.
    /// Gap-free by construction: this is the only mutator of `outbound_seq`.
    pub fn next_seq(&mut self) -> u64 {
        self.outbound_seq += 1;
        self.outbound_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_seq_is_monotonic_and_gap_free() {
        let mut s = Session::new("alice", Utc::now());
        assert_eq!(s.next_seq(), 1);
        assert_eq!(s.next_seq(), 2);
        assert_eq!(s.next_seq(), 3);
    }

    #[test]
    fn idle_detection_respects_timeout() {
        let now = Utc::now();
        let mut s = Session::new("alice", now);
        s.touch(now);
        assert!(!s.is_idle(now + chrono::Duration::seconds(10), chrono::Duration::minutes(30)));
        assert!(s.is_idle(now + chrono::Duration::minutes(31), chrono::Duration::minutes(30)));
    }
}
