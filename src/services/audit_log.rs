//! AuditLogService: in-process, queryable view over RouteDecision and
//! terminal task events, grounded in `services/audit_log.rs`'s bounded
//! ring buffer + persistence + redaction shape.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::models::route::RouteDecision;
use crate::domain::models::task::{TaskId, TaskResult};
use crate::infrastructure::logging::secret_scrubbing::scrub;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuditLevel {
    Debug,
    Info,
    Decision,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct AuditLogConfig {
    pub max_entries: usize,
    pub min_level: AuditLevel,
    pub redact_sensitive: bool,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            min_level: AuditLevel::Info,
            redact_sensitive: true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum AuditEntry {
    Route(RouteDecision),
    Terminal { task_id: TaskId, result: TaskResult, recorded_at: DateTime<Utc> },
}

pub struct AuditLogService {
    config: AuditLogConfig,
    ring: RwLock<VecDeque<AuditEntry>>,
}

impl AuditLogService {
    pub fn new(config: AuditLogConfig) -> Self {
        Self {
            config,
            ring: RwLock::new(VecDeque::new()),
        }
    }

    pub async fn record_route_decision(&self, mut decision: RouteDecision) {
        if self.config.min_level > AuditLevel::Decision {
            return;
        }
        if self.config.redact_sensitive {
            decision.rationale = scrub(&decision.rationale);
        }
        self.push(AuditEntry::Route(decision)).await;
    }

    pub async fn record_terminal(&self, task_id: TaskId, result: TaskResult, now: DateTime<Utc>) {
        self.push(AuditEntry::Terminal {
            task_id,
            result,
            recorded_at: now,
        })
        .await;
    }

    async fn push(&self, entry: AuditEntry) {
        let mut ring = self.ring.write().await;
        if ring.len() >= self.config.max_entries {
            ring.pop_front();
        }
        ring.push_back(entry);
    }

    pub async fn recent_routes(&self, limit: usize) -> Vec<RouteDecision> {
        self.ring
            .read()
            .await
            .iter()
            .rev()
            .filter_map(|e| match e {
                AuditEntry::Route(d) => Some(d.clone()),
                AuditEntry::Terminal { .. } => None,
            })
            .take(limit)
            .collect()
    }
}
