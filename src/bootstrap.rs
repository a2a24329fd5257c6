//! Wiring helper shared by the `conclave` CLI binary and `conclave-gateway`:
//! registers the Orchestrator/Supervisor/SubAgent topology declared in
//! config, declares their task types, and spawns each Supervisor's bus
//! consumer loop. Both binaries need the identical pipeline, so it lives
//! here rather than being duplicated per entry point.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use crate::domain::models::agent::{Agent, AgentId, AgentTier};
use crate::domain::models::task::{JoinMode, TaskTypeSpec};
use crate::infrastructure::config::loader::SupervisorConfigSchema;
use crate::infrastructure::substrates::mock::EchoCapabilityProvider;
use crate::services::agent_registry::{AgentRegistry, HeartbeatStatus};
use crate::services::message_bus::MessageBus;
use crate::services::orchestrator::{IntentClassifier, Orchestrator};
use crate::services::provider_pool::ProviderPool;
use crate::services::supervisor::{IdentitySplitter, ProviderGatedExecutor, Supervisor, SupervisorConfig};

/// A supervisor wired into the registry and running its bus consumer loop.
/// Dropping the handle does not stop the loop; hold it for the process
/// lifetime and abort on shutdown if an orderly stop is ever needed.
pub struct RunningSupervisor {
    pub supervisor: Arc<Supervisor<ProviderGatedExecutor>>,
    pub handle: tokio::task::JoinHandle<()>,
}

/// Registers the orchestrator as the tree root, then for each configured
/// supervisor: registers the Supervisor and one backing SubAgent, declares
/// a task type per capability, and spawns the Supervisor's `run` loop
/// against `bus`. Without this, `Orchestrator::submit_task` publishes a
/// `TaskRequest` nothing ever consumes.
pub async fn wire_supervisors<C: IntentClassifier>(
    orchestrator: &Orchestrator<C>,
    registry: &Arc<AgentRegistry>,
    bus: &Arc<MessageBus>,
    provider_pool: &Arc<ProviderPool>,
    default_provider_id: &str,
    supervisors: &[SupervisorConfigSchema],
) -> anyhow::Result<Vec<RunningSupervisor>> {
    let now = Utc::now();
    let root = Agent::new(
        orchestrator.id,
        AgentTier::Orchestrator,
        HashSet::new(),
        None,
        supervisors.len().max(1) as u32,
        now,
    )?;
    registry.register(root).await?;

    let mut running = Vec::with_capacity(supervisors.len());
    for sup_cfg in supervisors {
        let capabilities: HashSet<String> = sup_cfg.capabilities.iter().cloned().collect();

        let sup_id: AgentId = uuid::Uuid::new_v4();
        let sup_agent = Agent::new(
            sup_id,
            AgentTier::Supervisor,
            capabilities.clone(),
            Some(orchestrator.id),
            sup_cfg.max_in_flight,
            now,
        )?;
        registry.register(sup_agent).await?;
        registry.heartbeat(sup_id, HeartbeatStatus::default(), now).await?;

        let sub_id: AgentId = uuid::Uuid::new_v4();
        let sub_agent = Agent::new(
            sub_id,
            AgentTier::SubAgent,
            capabilities.clone(),
            Some(sup_id),
            sup_cfg.max_in_flight,
            now,
        )?;
        registry.register(sub_agent).await?;
        registry
            .heartbeat(
                sub_id,
                HeartbeatStatus {
                    in_flight: 0,
                    reported_error_rate: 0.0,
                },
                now,
            )
            .await?;

        for capability in &capabilities {
            orchestrator
                .declare_task_type(TaskTypeSpec {
                    name: capability.clone(),
                    required_capabilities: [capability.clone()].into_iter().collect(),
                    parallelizable: false,
                    join_mode: JoinMode::All,
                    default_deadline_ms: sup_cfg.default_task_deadline_ms,
                })
                .await;
        }

        let executor = Arc::new(ProviderGatedExecutor::new(
            default_provider_id.to_string(),
            Arc::clone(provider_pool),
            Arc::new(EchoCapabilityProvider::default()),
            1_000,
        ));
        let supervisor = Arc::new(Supervisor::new(
            sup_id,
            Arc::clone(registry),
            executor,
            Arc::new(IdentitySplitter),
            SupervisorConfig {
                max_in_flight: sup_cfg.max_in_flight,
                queue_capacity: sup_cfg.queue_capacity,
                default_task_deadline: chrono::Duration::milliseconds(sup_cfg.default_task_deadline_ms as i64),
                ..SupervisorConfig::default()
            },
        ));

        let run_supervisor = Arc::clone(&supervisor);
        let run_bus = Arc::clone(bus);
        let orchestrator_id = orchestrator.id;
        let handle = tokio::spawn(async move {
            run_supervisor.run(run_bus, orchestrator_id).await;
        });

        running.push(RunningSupervisor { supervisor, handle });
    }
    Ok(running)
}
