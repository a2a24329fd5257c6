//! Agent entity and the fixed three-tier topology.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::domain::error::RegistryError;
use crate::domain::models::task::AgentId;

/// The three fixed tiers of the topology. Unlike the teacher's
/// `Architect`/`Specialist`/`Worker`, no additional tier is ever introduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgentTier {
    Orchestrator,
    Supervisor,
    SubAgent,
}

impl AgentTier {
    /// Whether `child` is strictly lower in the topology than `self`.
    pub fn is_strictly_above(self, child: AgentTier) -> bool {
        self < child
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    Initializing,
    Ready,
    Busy,
    Degraded,
    Offline,
}

impl AgentState {
    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::{Busy, Degraded, Initializing, Offline, Ready};
        matches!(
            (self, next),
            (Initializing, Ready)
                | (Ready, Busy)
                | (Busy, Ready)
                | (Ready, Degraded)
                | (Busy, Degraded)
                | (Degraded, Ready)
                | (Degraded, Offline)
                | (Ready, Offline)
                | (Busy, Offline)
        )
    }
}

/// Liveness tracking attached to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub last_heartbeat: DateTime<Utc>,
    pub consecutive_misses: u32,
    pub recent_success_rate: f64,
}

impl Health {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_heartbeat: now,
            consecutive_misses: 0,
            recent_success_rate: 1.0,
        }
    }
}

/// An execution entity at one of three tiers with a capability set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub tier: AgentTier,
    pub capabilities: HashSet<String>,
    pub parent_id: Option<AgentId>,
    pub state: AgentState,
    pub concurrency: u32,
    pub in_flight: u32,
    pub health: Health,
}

impl Agent {
    /// Validates the invariants in §4.2/§3's Agent row before construction:
    /// orchestrator has no parent, non-orchestrator tiers declare at least
    /// one capability.
    pub fn new(
        id: AgentId,
        tier: AgentTier,
        capabilities: HashSet<String>,
        parent_id: Option<AgentId>,
        concurrency: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, RegistryError> {
        match tier {
            AgentTier::Orchestrator if parent_id.is_some() => {
                return Err(RegistryError::InvalidParent)
            }
            AgentTier::Orchestrator => {}
            _ if parent_id.is_none() => return Err(RegistryError::InvalidParent),
            _ if capabilities.is_empty() => return Err(RegistryError::InvalidCapability),
            _ => {}
        }
        Ok(Self {
            id,
            tier,
            capabilities,
            parent_id,
            state: AgentState::Initializing,
            concurrency,
            in_flight: 0,
            health: Health::new(now),
        })
    }

    pub fn has_free_capacity(&self) -> bool {
        self.in_flight < self.concurrency
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, AgentState::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cap(name: &str) -> HashSet<String> {
        let mut s = HashSet::new();
        s.insert(name.to_string());
        s
    }

    #[test]
    fn orchestrator_cannot_have_parent() {
        let err = Agent::new(
            AgentId::new_v4(),
            AgentTier::Orchestrator,
            HashSet::new(),
            Some(AgentId::new_v4()),
            1,
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, RegistryError::InvalidParent);
    }

    #[test]
    fn subagent_requires_capability_and_parent() {
        let err = Agent::new(
            AgentId::new_v4(),
            AgentTier::SubAgent,
            HashSet::new(),
            Some(AgentId::new_v4()),
            1,
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, RegistryError::InvalidCapability);

        let err = Agent::new(
            AgentId::new_v4(),
            AgentTier::SubAgent,
            cap("text.summarize"),
            None,
            1,
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, RegistryError::InvalidParent);
    }

    #[test]
    fn tier_ordering_matches_topology() {
        assert!(AgentTier::Orchestrator.is_strictly_above(AgentTier::Supervisor));
        assert!(AgentTier::Supervisor.is_strictly_above(AgentTier::SubAgent));
        assert!(!AgentTier::SubAgent.is_strictly_above(AgentTier::Supervisor));
    }

    #[test]
    fn state_machine_forbids_offline_to_ready_directly() {
        assert!(!AgentState::Offline.can_transition_to(AgentState::Ready));
        assert!(AgentState::Degraded.can_transition_to(AgentState::Offline));
    }
}
