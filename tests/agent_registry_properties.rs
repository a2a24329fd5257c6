//! Property-based test backing invariant 5: no agent appears in the
//! registry with a parent reference that does not resolve to a
//! strictly-higher tier.

use std::collections::HashSet;

use chrono::Utc;
use conclave::domain::models::agent::{Agent, AgentTier};
use conclave::services::agent_registry::{AgentRegistry, AgentRegistryConfig};
use proptest::prelude::*;
use uuid::Uuid;

fn cap(name: &str) -> HashSet<String> {
    let mut s = HashSet::new();
    s.insert(name.to_string());
    s
}

proptest! {
    #[test]
    fn every_registered_agent_has_a_valid_parent_or_none(
        subagent_count in 0usize..20,
        bogus_parent_attempts in 0usize..10,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let registry = AgentRegistry::new(AgentRegistryConfig::default());
            let orch = Agent::new(Uuid::new_v4(), AgentTier::Orchestrator, HashSet::new(), None, 100, Utc::now()).unwrap();
            let orch_id = registry.register(orch).await.unwrap();
            let sup = Agent::new(Uuid::new_v4(), AgentTier::Supervisor, cap("x"), Some(orch_id), 8, Utc::now()).unwrap();
            let sup_id = registry.register(sup).await.unwrap();

            for _ in 0..subagent_count {
                let sub = Agent::new(Uuid::new_v4(), AgentTier::SubAgent, cap("x"), Some(sup_id), 2, Utc::now()).unwrap();
                registry.register(sub).await.unwrap();
            }

            for _ in 0..bogus_parent_attempts {
                let bogus = Agent::new(Uuid::new_v4(), AgentTier::SubAgent, cap("x"), Some(Uuid::new_v4()), 2, Utc::now()).unwrap();
                let result = registry.register(bogus).await;
                assert!(result.is_err());
            }

            let snapshot = registry.snapshot().await;
            let by_id: std::collections::HashMap<_, _> = snapshot.iter().map(|a| (a.id, a)).collect();
            for agent in &snapshot {
                if let Some(parent_id) = agent.parent_id {
                    let parent = by_id.get(&parent_id).expect("parent must resolve within the registry");
                    assert!(parent.tier.is_strictly_above(agent.tier));
                }
            }
        });
    }
}
