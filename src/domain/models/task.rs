//! Task and TaskResult entities, and the dispatch-side state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::error::ErrorKind;

pub type TaskId = Uuid;
pub type AgentId = Uuid;

/// Join policy for a multi-supervisor dispatch, carried on task type metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum JoinMode {
    All,
    Any,
    Quorum { k: u32 },
}

/// A declared task type: required capabilities, whether its payload is
/// splittable across sub-agents, and its join policy when multiple
/// supervisors are required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTypeSpec {
    pub name: String,
    pub required_capabilities: HashSet<String>,
    pub parallelizable: bool,
    pub join_mode: JoinMode,
    pub default_deadline_ms: u64,
}

/// Opaque payload blob with a MIME tag, carried end to end without
/// interpretation by the dispatch layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Payload {
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            mime: "text/plain".to_string(),
            bytes: s.into().into_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Pending,
    Dispatched,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl TaskStatus {
    /// Legal next states per §4.5's task state machine. Terminal states have
    /// no outgoing transitions.
    pub fn valid_transitions(self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Dispatched, Self::Cancelled, Self::TimedOut],
            Self::Dispatched => &[Self::Running, Self::Cancelled, Self::TimedOut, Self::Failed],
            Self::Running => &[
                Self::Completed,
                Self::Failed,
                Self::Cancelled,
                Self::TimedOut,
            ],
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut => &[],
        }
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }
}

/// A unit of work submitted by a client or a parent task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub parent_id: Option<TaskId>,
    pub submitter: String,
    pub task_type: String,
    pub required_capabilities: HashSet<String>,
    pub payload: Payload,
    pub priority: u8,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub join_mode: JoinMode,
}

impl Task {
    /// Builds a new `Pending` task, clamping priority to the 0-9 range
    /// required by the data model.
    pub fn new(
        submitter: impl Into<String>,
        task_type: impl Into<String>,
        required_capabilities: HashSet<String>,
        payload: Payload,
        priority: u8,
        deadline: DateTime<Utc>,
        created_at: DateTime<Utc>,
        join_mode: JoinMode,
    ) -> Result<Self, ErrorKind> {
        if deadline < created_at {
            return Err(ErrorKind::InvalidRequest(
                "deadline precedes createdAt".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            parent_id: None,
            submitter: submitter.into(),
            task_type: task_type.into(),
            required_capabilities,
            payload,
            priority: priority.min(9),
            deadline,
            created_at,
            status: TaskStatus::Pending,
            join_mode,
        })
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }

    /// Applies a status transition, rejecting one the state machine forbids.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), ErrorKind> {
        if !self.status.can_transition_to(next) {
            return Err(ErrorKind::InternalError(format!(
                "illegal task transition {:?} -> {:?}",
                self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

/// The outcome of a terminal task transition. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub payload: Option<Payload>,
    pub error: Option<ErrorKind>,
    pub produced_by: Option<AgentId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tokens_used: u64,
    pub cost_estimate: f64,
    /// Set on a best-effort aggregation (§4.4) that still reached
    /// `Completed`: describes the branches that failed alongside the
    /// successes this result carries. `None` for a clean success.
    pub failure_summary: Option<String>,
}

impl TaskResult {
    pub fn success(
        task_id: TaskId,
        payload: Payload,
        produced_by: AgentId,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        tokens_used: u64,
        cost_estimate: f64,
    ) -> Result<Self, ErrorKind> {
        if finished_at < started_at {
            return Err(ErrorKind::InternalError(
                "finishedAt precedes startedAt".to_string(),
            ));
        }
        Ok(Self {
            task_id,
            status: TaskStatus::Completed,
            payload: Some(payload),
            error: None,
            produced_by: Some(produced_by),
            started_at,
            finished_at,
            tokens_used,
            cost_estimate,
            failure_summary: None,
        })
    }

    /// Attaches a best-effort aggregation summary to an otherwise-successful
    /// result (§4.4: "finalize with `Completed` and an attached failure
    /// summary if at least one success exists").
    pub fn with_failure_summary(mut self, summary: impl Into<String>) -> Self {
        self.failure_summary = Some(summary.into());
        self
    }

    pub fn failure(
        task_id: TaskId,
        status: TaskStatus,
        error: ErrorKind,
        produced_by: Option<AgentId>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Result<Self, ErrorKind> {
        if status == TaskStatus::Completed {
            return Err(ErrorKind::InternalError(
                "failure() called with Completed status".to_string(),
            ));
        }
        if !status.is_terminal() {
            return Err(ErrorKind::InternalError(
                "TaskResult requires a terminal status".to_string(),
            ));
        }
        if finished_at < started_at {
            return Err(ErrorKind::InternalError(
                "finishedAt precedes startedAt".to_string(),
            ));
        }
        Ok(Self {
            task_id,
            status,
            payload: None,
            error: Some(error),
            produced_by,
            started_at,
            finished_at,
            tokens_used: 0,
            cost_estimate: 0.0,
            failure_summary: None,
        })
    }
}
