//! Agent Registry: authoritative directory with single-writer discipline.
//!
//! Mutations go through one write path behind a `tokio::sync::RwLock`, so a
//! `find` snapshot never observes partial mutation, per §5(c). Generalizes
//! the teacher's `AgentTier`/`AgentInstance` model (`Architect`/
//! `Specialist`/`Worker`) into the spec's fixed three tiers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::error::RegistryError;
use crate::domain::models::agent::{Agent, AgentState, AgentTier, Health};
use crate::domain::models::task::AgentId;

#[derive(Debug, Clone, Default)]
pub struct HeartbeatStatus {
    pub in_flight: u32,
    pub reported_error_rate: f64,
}

pub struct AgentRegistryConfig {
    /// Consecutive misses before Ready/Busy -> Degraded.
    pub degraded_miss_threshold: u32,
    /// Further consecutive misses (past degraded) before -> Offline.
    pub offline_miss_threshold: u32,
    pub error_rate_degraded_threshold: f64,
    /// How long `deregister` waits for `in_flight` to drain to zero before
    /// removing the agent unconditionally.
    pub deregister_grace_period: chrono::Duration,
}

impl Default for AgentRegistryConfig {
    fn default() -> Self {
        Self {
            degraded_miss_threshold: 3,
            offline_miss_threshold: 6,
            error_rate_degraded_threshold: 0.5,
            deregister_grace_period: chrono::Duration::seconds(5),
        }
    }
}

pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, Agent>>,
    config: AgentRegistryConfig,
}

impl AgentRegistry {
    pub fn new(config: AgentRegistryConfig) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Validates id uniqueness, tier/parent linkage, and capability
    /// non-emptiness before inserting (§4.2 `register`).
    pub async fn register(&self, agent: Agent) -> Result<AgentId, RegistryError> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(&agent.id) {
            return Err(RegistryError::Conflict(agent.id));
        }
        if let Some(parent_id) = agent.parent_id {
            match agents.get(&parent_id) {
                Some(parent) if parent.tier.is_strictly_above(agent.tier) => {}
                _ => return Err(RegistryError::InvalidParent),
            }
        }
        let id = agent.id;
        agents.insert(id, agent);
        Ok(id)
    }

    /// Transitions to Offline immediately, then waits for in-flight calls
    /// to drain (up to `deregister_grace_period`) before removing the agent
    /// (§4.2 `deregister`).
    pub async fn deregister(&self, id: AgentId) -> Result<(), RegistryError> {
        {
            let mut agents = self.agents.write().await;
            let agent = agents.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
            agent.state = AgentState::Offline;
        }

        let deadline = Utc::now() + self.config.deregister_grace_period;
        loop {
            let in_flight = self.agents.read().await.get(&id).map(|a| a.in_flight);
            match in_flight {
                None | Some(0) => break,
                Some(_) if Utc::now() >= deadline => break,
                Some(_) => tokio::time::sleep(std::time::Duration::from_millis(20)).await,
            }
        }

        self.agents.write().await.remove(&id);
        Ok(())
    }

    /// Ranked by (health, load, recent success rate), id as final tie-break.
    /// Empty is a valid, non-error result (§4.2).
    pub async fn find(&self, capability: &str, required_parent: Option<AgentId>) -> Vec<Agent> {
        let agents = self.agents.read().await;
        let mut matches: Vec<Agent> = agents
            .values()
            .filter(|a| a.is_ready())
            .filter(|a| a.capabilities.contains(capability))
            .filter(|a| required_parent.is_none_or(|p| a.parent_id == Some(p)))
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            health_rank(a.state)
                .cmp(&health_rank(b.state))
                .then(a.in_flight.cmp(&b.in_flight))
                .then(
                    b.health
                        .recent_success_rate
                        .partial_cmp(&a.health.recent_success_rate)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.id.cmp(&b.id))
        });
        matches
    }

    /// Updates liveness and drives the Ready<->Degraded edges of the state
    /// machine based on reported status (§4.2 `heartbeat`).
    pub async fn heartbeat(&self, id: AgentId, status: HeartbeatStatus, now: DateTime<Utc>) -> Result<(), RegistryError> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        agent.health.last_heartbeat = now;
        agent.health.consecutive_misses = 0;
        agent.in_flight = status.in_flight;

        if agent.state == AgentState::Initializing {
            agent.state = AgentState::Ready;
        }

        let degraded = status.reported_error_rate >= self.config.error_rate_degraded_threshold;
        match agent.state {
            AgentState::Ready if degraded => agent.state = AgentState::Degraded,
            AgentState::Busy if degraded => agent.state = AgentState::Degraded,
            AgentState::Degraded if !degraded => agent.state = AgentState::Ready,
            AgentState::Ready | AgentState::Busy if agent.in_flight > 0 => agent.state = AgentState::Busy,
            AgentState::Busy if agent.in_flight == 0 => agent.state = AgentState::Ready,
            _ => {}
        }
        Ok(())
    }

    /// Advances the per-agent miss counter; callers invoke this on a
    /// periodic liveness sweep for agents that did not heartbeat in time.
    pub async fn record_missed_heartbeat(&self, id: AgentId) -> Result<AgentState, RegistryError> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        agent.health.consecutive_misses += 1;
        if agent.health.consecutive_misses >= self.config.offline_miss_threshold
            && agent.state == AgentState::Degraded
        {
            agent.state = AgentState::Offline;
        } else if agent.health.consecutive_misses >= self.config.degraded_miss_threshold
            && matches!(agent.state, AgentState::Ready | AgentState::Busy)
        {
            agent.state = AgentState::Degraded;
        }
        Ok(agent.state)
    }

    /// Updates rolling success rate from a terminal task outcome (§4.2
    /// `observe`). Uses an exponential moving average to avoid retaining an
    /// unbounded event history.
    pub async fn observe(&self, id: AgentId, succeeded: bool) -> Result<(), RegistryError> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        const ALPHA: f64 = 0.2;
        let sample = if succeeded { 1.0 } else { 0.0 };
        agent.health.recent_success_rate =
            ALPHA * sample + (1.0 - ALPHA) * agent.health.recent_success_rate;
        Ok(())
    }

    pub async fn get(&self, id: AgentId) -> Option<Agent> {
        self.agents.read().await.get(&id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<Agent> {
        self.agents.read().await.values().cloned().collect()
    }

    pub async fn reinitialize_health(&self, id: AgentId, now: DateTime<Utc>) -> Result<(), RegistryError> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        agent.health = Health::new(now);
        Ok(())
    }
}

fn health_rank(state: AgentState) -> u8 {
    match state {
        AgentState::Ready => 0,
        AgentState::Busy => 1,
        AgentState::Degraded => 2,
        AgentState::Initializing | AgentState::Offline => 3,
    }
}
