//! RouteDecision: the immutable audit record produced per dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::agent::AgentId;
use crate::domain::models::task::TaskId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub task_id: TaskId,
    pub candidate_supervisors: Vec<AgentId>,
    pub chosen_supervisor: AgentId,
    pub rationale: String,
    pub alternatives: Vec<AgentId>,
    pub decided_at: DateTime<Utc>,
}

impl RouteDecision {
    /// Builds a decision, enforcing that the choice is among the candidates
    /// and that a rationale was actually given (§3 invariants).
    pub fn new(
        task_id: TaskId,
        candidate_supervisors: Vec<AgentId>,
        chosen_supervisor: AgentId,
        rationale: impl Into<String>,
        decided_at: DateTime<Utc>,
    ) -> Option<Self> {
        let rationale = rationale.into();
        if rationale.is_empty() || !candidate_supervisors.contains(&chosen_supervisor) {
            return None;
        }
        let alternatives = candidate_supervisors
            .iter()
            .copied()
            .filter(|id| *id != chosen_supervisor)
            .collect();
        Some(Self {
            task_id,
            candidate_supervisors,
            chosen_supervisor,
            rationale,
            alternatives,
            decided_at,
        })
    }
}
