//! Orchestrator: root dispatcher. Authenticates, classifies, selects a
//! supervisor, composes responses, manages cancellation.
//!
//! Kept as a thin coordinator over focused functions — dispatch,
//! classification, composition, cancellation — rather than one large match
//! arm, generalizing `services/swarm_orchestrator/`'s module split.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::error::{DispatchError, ErrorKind};
use crate::domain::models::agent::{Agent, AgentId, AgentTier};
use crate::domain::models::message::{Cancel, Message, MessagePayload, PartialResult, TaskRequest};
use crate::domain::models::route::RouteDecision;
use crate::domain::models::session::SessionId;
use crate::domain::models::task::{JoinMode, Task, TaskId, TaskResult, TaskStatus};
use crate::services::agent_registry::AgentRegistry;
use crate::services::audit_log::AuditLogService;
use crate::services::message_bus::{BusHandle, MessageBus};

/// A declared task type, carrying required capabilities and join policy —
/// the classifier short-circuits when this is already populated (§4.5
/// dispatch step 3).
#[derive(Debug, Clone)]
pub struct TaskTypeRegistry {
    types: HashMap<String, crate::domain::models::task::TaskTypeSpec>,
}

impl TaskTypeRegistry {
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    pub fn declare(&mut self, spec: crate::domain::models::task::TaskTypeSpec) {
        self.types.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&crate::domain::models::task::TaskTypeSpec> {
        self.types.get(name)
    }
}

impl Default for TaskTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded, cheap intent classifier — itself dispatched as a Task to a
/// classification capability provider, subject to Provider Pool rules.
#[async_trait::async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, payload: &crate::domain::models::task::Payload) -> Result<HashSet<String>, ErrorKind>;
}

pub struct NoopClassifier;

#[async_trait::async_trait]
impl IntentClassifier for NoopClassifier {
    async fn classify(&self, _payload: &crate::domain::models::task::Payload) -> Result<HashSet<String>, ErrorKind> {
        Ok(HashSet::new())
    }
}

pub struct OrchestratorConfig {
    pub classification_enabled: bool,
    pub default_join_mode: JoinMode,
    pub cancel_grace_period: chrono::Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            classification_enabled: true,
            default_join_mode: JoinMode::All,
            cancel_grace_period: chrono::Duration::seconds(5),
        }
    }
}

/// Entry point for client-submitted work. Owns the session set and the
/// top-level task queue exclusively (§3 ownership rule).
pub struct Orchestrator<C: IntentClassifier> {
    pub id: AgentId,
    registry: Arc<AgentRegistry>,
    bus: BusHandle,
    classifier: Arc<C>,
    task_types: RwLock<TaskTypeRegistry>,
    tasks: RwLock<HashMap<TaskId, Task>>,
    audit: Arc<AuditLogService>,
    config: OrchestratorConfig,
}

impl<C: IntentClassifier> Orchestrator<C> {
    pub fn new(
        id: AgentId,
        registry: Arc<AgentRegistry>,
        bus: Arc<MessageBus>,
        classifier: Arc<C>,
        audit: Arc<AuditLogService>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            id,
            registry,
            bus: BusHandle::new(bus, id),
            classifier,
            task_types: RwLock::new(TaskTypeRegistry::new()),
            tasks: RwLock::new(HashMap::new()),
            audit,
            config,
        }
    }

    pub async fn declare_task_type(&self, spec: crate::domain::models::task::TaskTypeSpec) {
        self.task_types.write().await.declare(spec);
    }

    /// Dispatch algorithm, §4.5 steps 1-6. Session auth/input validation is
    /// the caller's responsibility (Session Layer validates before calling
    /// in); this entry point assumes a validated principal.
    #[instrument(skip(self, payload))]
    pub async fn submit_task(
        &self,
        _session: SessionId,
        submitter: impl Into<String> + std::fmt::Debug,
        task_type: &str,
        payload: crate::domain::models::task::Payload,
        priority: u8,
        deadline: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<TaskId, DispatchError> {
        let spec = self.task_types.read().await.get(task_type).cloned();
        let Some(spec) = spec else {
            return Err(DispatchError::InvalidRequest(format!(
                "unknown task type {task_type}"
            )));
        };

        let deadline = deadline.unwrap_or(now + chrono::Duration::milliseconds(spec.default_deadline_ms as i64));
        if deadline < now {
            return Err(DispatchError::TimedOut);
        }

        let required_capabilities = if spec.required_capabilities.is_empty() && self.config.classification_enabled {
            self.classifier
                .classify(&payload)
                .await
                .map_err(|_| DispatchError::InvalidRequest("classification failed".to_string()))?
        } else {
            spec.required_capabilities.clone()
        };

        let task = Task::new(
            submitter,
            task_type,
            required_capabilities,
            payload,
            priority,
            deadline,
            now,
            spec.join_mode,
        )
        .map_err(|_| DispatchError::InvalidRequest("invalid task parameters".to_string()))?;

        let task_id = task.id;
        self.tasks.write().await.insert(task_id, task.clone());

        let chosen = self.select_supervisor(&task).await?;
        self.record_route_decision(&task, &chosen, now).await;

        self.bus
            .send(
                Some(chosen.chosen_supervisor),
                task_id,
                MessagePayload::TaskRequest(TaskRequest {
                    task_id,
                    task_type: task.task_type.clone(),
                    required_capabilities: task.required_capabilities.iter().cloned().collect(),
                    payload: task.payload.clone(),
                    deadline: task.deadline,
                    parallelizable: spec.parallelizable,
                }),
                now,
            )
            .await
            .map_err(|_| DispatchError::QueueTimeout)?;

        if let Some(t) = self.tasks.write().await.get_mut(&task_id) {
            let _ = t.transition(TaskStatus::Dispatched);
        }

        info!(task_id = %task_id, supervisor = %chosen.chosen_supervisor, "task dispatched");
        Ok(task_id)
    }

    /// Supervisor selection per §4.5 step 4: candidates whose declared
    /// capabilities cover the required set, ranked by (health, load, recent
    /// success rate, cost preference), id tie-break.
    async fn select_supervisor(&self, task: &Task) -> Result<RouteDecision, DispatchError> {
        let mut candidate_sets: Vec<Vec<Agent>> = Vec::new();
        for capability in &task.required_capabilities {
            candidate_sets.push(self.registry.find(capability, None).await);
        }
        if candidate_sets.is_empty() {
            candidate_sets.push(self.registry.find("", None).await);
        }

        let mut scored: HashMap<AgentId, Agent> = HashMap::new();
        for set in candidate_sets {
            for agent in set {
                if agent.tier == AgentTier::Supervisor {
                    scored.entry(agent.id).or_insert(agent);
                }
            }
        }
        let mut candidates: Vec<Agent> = scored.into_values().collect();
        candidates.sort_by(|a, b| a.in_flight.cmp(&b.in_flight).then(a.id.cmp(&b.id)));

        let Some(chosen) = candidates.first().cloned() else {
            return Err(DispatchError::NoCapableAgent);
        };

        RouteDecision::new(
            task.id,
            candidates.iter().map(|a| a.id).collect(),
            chosen.id,
            "selected by lowest in-flight load, id tie-break",
            Utc::now(),
        )
        .ok_or(DispatchError::NoCapableAgent)
    }

    async fn record_route_decision(&self, task: &Task, decision: &RouteDecision, _now: DateTime<Utc>) {
        self.audit.record_route_decision(decision.clone()).await;
        let _ = self
            .bus
            .send(
                None,
                task.id,
                MessagePayload::RouteDecision(decision.clone()),
                decision.decided_at,
            )
            .await;
    }

    /// Streams `PartialResult`/`TaskResult` for a task in bus order to the
    /// caller, which forwards them to the Session Layer in order.
    pub async fn stream_results(&self, bus: &MessageBus, task_id: TaskId) -> mpsc::Receiver<Message> {
        bus.subscribe_correlation(task_id).await.receiver
    }

    /// Emits `Cancel` to the owning supervisor; cascades per §5.
    pub async fn cancel_task(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<(), DispatchError> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&task_id) else {
            return Err(DispatchError::InvalidRequest("unknown task".to_string()));
        };
        if task.status.is_terminal() {
            return Ok(());
        }
        task.transition(TaskStatus::Cancelled).ok();
        drop(tasks);

        self.bus
            .send(
                None,
                task_id,
                MessagePayload::Cancel(Cancel {
                    task_id,
                    reason: "client requested".to_string(),
                }),
                now,
            )
            .await
            .ok();
        Ok(())
    }

    pub async fn record_terminal(&self, result: TaskResult) {
        if let Some(task) = self.tasks.write().await.get_mut(&result.task_id) {
            let _ = task.transition(result.status);
        }
    }

    /// Composition: waits according to the declared join mode when a task
    /// fans out to multiple supervisors (§4.5 composition policy).
    pub async fn compose(
        &self,
        join_mode: JoinMode,
        mut branch_results: Vec<Result<TaskResult, ErrorKind>>,
    ) -> Result<TaskResult, ErrorKind> {
        match join_mode {
            JoinMode::All => {
                let mut last_err = None;
                let mut successes = Vec::new();
                for r in branch_results.drain(..) {
                    match r {
                        Ok(t) => successes.push(t),
                        Err(e) => last_err = Some(e),
                    }
                }
                if let Some(e) = last_err {
                    return Err(e);
                }
                successes
                    .into_iter()
                    .next()
                    .ok_or_else(|| ErrorKind::InternalError("no branches".to_string()))
            }
            JoinMode::Any => branch_results
                .into_iter()
                .find_map(Result::ok)
                .ok_or_else(|| ErrorKind::InternalError("no branch succeeded".to_string())),
            JoinMode::Quorum { k } => {
                let successes: Vec<TaskResult> = branch_results.into_iter().filter_map(Result::ok).collect();
                if successes.len() as u32 >= k {
                    successes
                        .into_iter()
                        .next()
                        .ok_or_else(|| ErrorKind::InternalError("no branches".to_string()))
                } else {
                    Err(ErrorKind::AggregationFailed(format!(
                        "quorum of {k} not reached"
                    )))
                }
            }
        }
    }

    pub async fn describe(&self) -> Vec<Agent> {
        self.registry.snapshot().await
    }
}
