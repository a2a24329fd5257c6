//! Supervisor: per-domain scheduler over a fleet of sub-agents.
//!
//! Generalized from `services/swarm_orchestrator/`'s thin-coordinator shape:
//! selection, aggregation, and concurrency-policy enforcement are kept as
//! separate functions rather than folded into one large match arm.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use backoff::backoff::Backoff;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::error::{ErrorKind, SupervisorError};
use crate::domain::models::agent::{Agent, AgentId};
use crate::domain::models::message::{Message, MessagePayload, PartialResult};
use crate::domain::models::provider::PendingCall;
use crate::domain::models::task::{JoinMode, Payload, Task, TaskResult, TaskStatus};
use crate::domain::ports::capability_provider::{CapabilityProvider, ProviderRequest};
use crate::services::agent_registry::AgentRegistry;
use crate::services::message_bus::MessageBus;
use crate::services::provider_pool::{retry_backoff, ProviderPool};

/// Aggregation policy for a divisible task, per §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationPolicy {
    Strict,
    BestEffort,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub max_in_flight: u32,
    pub queue_capacity: usize,
    pub default_task_deadline: chrono::Duration,
    pub dispatch_overhead_budget: chrono::Duration,
    pub aggregation_policy: AggregationPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            queue_capacity: 64,
            default_task_deadline: chrono::Duration::seconds(30),
            dispatch_overhead_budget: chrono::Duration::milliseconds(200),
            aggregation_policy: AggregationPolicy::Strict,
        }
    }
}

struct QueuedTask {
    task: Task,
    priority: u8,
}

/// Splits a payload into N sub-task payloads for a parallelizable task.
/// Supervisor-domain-specific splitters implement this trait.
pub trait PayloadSplitter: Send + Sync {
    fn split(&self, payload: &Payload, n: usize) -> Vec<Payload>;
}

/// Splits into a single identical copy; the default for domains that do not
/// override splitting (effectively disables parallelization).
pub struct IdentitySplitter;

impl PayloadSplitter for IdentitySplitter {
    fn split(&self, payload: &Payload, _n: usize) -> Vec<Payload> {
        vec![payload.clone()]
    }
}

/// One invocation of a sub-agent, abstracted so tests can stub execution
/// without a real Provider Pool round trip.
#[async_trait::async_trait]
pub trait SubAgentExecutor: Send + Sync {
    async fn execute(
        &self,
        agent: &Agent,
        payload: Payload,
        deadline: DateTime<Utc>,
        cancel: CancellationToken,
    ) -> Result<TaskResult, ErrorKind>;
}

/// Bridges Supervisor dispatch to an external service: gates every
/// invocation behind the Provider Pool's admission control, releasing the
/// ticket on completion or failure.
pub struct ProviderGatedExecutor {
    provider_id: String,
    pool: Arc<ProviderPool>,
    provider: Arc<dyn CapabilityProvider>,
    token_budget: u64,
}

impl ProviderGatedExecutor {
    pub fn new(
        provider_id: impl Into<String>,
        pool: Arc<ProviderPool>,
        provider: Arc<dyn CapabilityProvider>,
        token_budget: u64,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            pool,
            provider,
            token_budget,
        }
    }
}

#[async_trait::async_trait]
impl SubAgentExecutor for ProviderGatedExecutor {
    /// Gates the invocation behind the Provider Pool, retrying transient
    /// failures per §4.1's retry policy: exponential backoff from
    /// `retry_initial_backoff` up to `retry_max_backoff`, ±20% jitter, a
    /// hard cap of `retry_max_attempts` tries for this `PendingCall`.
    /// `Auth`/`BadRequest` failures are surfaced immediately, never retried.
    async fn execute(
        &self,
        agent: &Agent,
        payload: Payload,
        deadline: DateTime<Utc>,
        cancel: CancellationToken,
    ) -> Result<TaskResult, ErrorKind> {
        let started_at = Utc::now();
        let config = self.pool.get_config(&self.provider_id).await.unwrap_or_default();
        let mut call = PendingCall::new(&self.provider_id, self.token_budget, started_at, deadline);
        let mut backoff = retry_backoff(&config);

        loop {
            let ticket = self
                .pool
                .submit(&self.provider_id, self.token_budget, deadline, Utc::now())
                .await?;

            let invocation = self
                .provider
                .invoke(
                    ProviderRequest {
                        payload: payload.clone(),
                        token_budget: self.token_budget,
                    },
                    cancel.clone(),
                )
                .await;
            let finished_at = Utc::now();

            match invocation {
                Ok(response) => {
                    self.pool.release(ticket, response.tokens_used, true, finished_at).await;
                    return TaskResult::success(
                        Uuid::nil(),
                        response.result,
                        agent.id,
                        started_at,
                        finished_at,
                        response.tokens_used,
                        0.0,
                    );
                }
                Err(err) => {
                    self.pool.release(ticket, 0, false, finished_at).await;
                    if !err.is_transient() || call.attempt >= config.retry_max_attempts {
                        return Err(err.into());
                    }
                    let Some(wait) = backoff.next_backoff() else {
                        return Err(err.into());
                    };
                    call.attempt += 1;
                    call.backoff_until = Some(Utc::now() + chrono::Duration::from_std(wait).unwrap_or_default());
                    warn!(
                        provider_id = %self.provider_id,
                        attempt = call.attempt,
                        wait_ms = wait.as_millis() as u64,
                        "retrying transient provider failure"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(wait) => {}
                        () = cancel.cancelled() => {
                            return Err(ErrorKind::Cancelled("cancelled during provider retry backoff".to_string()));
                        }
                    }
                }
            }
        }
    }
}

pub struct Supervisor<E: SubAgentExecutor> {
    pub id: AgentId,
    registry: Arc<AgentRegistry>,
    executor: Arc<E>,
    splitter: Arc<dyn PayloadSplitter>,
    config: SupervisorConfig,
    in_flight: Mutex<u32>,
    queue: Mutex<VecDeque<QueuedTask>>,
    cancellations: Mutex<HashMap<Uuid, CancellationToken>>,
    /// Set by `run` once this supervisor is wired to a bus; used to publish
    /// best-effort `PartialResult`s as branches complete. `None` when driven
    /// directly (e.g. unit tests calling `handle_task_request`), in which
    /// case partials are simply not emitted.
    partial_sink: Mutex<Option<Arc<MessageBus>>>,
}

impl<E: SubAgentExecutor> Supervisor<E> {
    pub fn new(
        id: AgentId,
        registry: Arc<AgentRegistry>,
        executor: Arc<E>,
        splitter: Arc<dyn PayloadSplitter>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            id,
            registry,
            executor,
            splitter,
            config,
            in_flight: Mutex::new(0),
            queue: Mutex::new(VecDeque::new()),
            cancellations: Mutex::new(HashMap::new()),
            partial_sink: Mutex::new(None),
        }
    }

    /// Consumes a `TaskRequest`, enforcing §4.4's concurrency policy:
    /// overflow holds in a priority-then-FIFO queue, deadline-exceeded
    /// queued tasks fail `QueueTimeout`.
    pub async fn handle_task_request(&self, task: Task, parallelizable: bool, now: DateTime<Utc>) -> Result<TaskResult, SupervisorError> {
        {
            let mut in_flight = self.in_flight.lock().await;
            if *in_flight >= self.config.max_in_flight {
                let mut queue = self.queue.lock().await;
                if queue.len() >= self.config.queue_capacity {
                    return Err(SupervisorError::QueueTimeout);
                }
                queue.push_back(QueuedTask {
                    task: task.clone(),
                    priority: task.priority,
                });
                queue.make_contiguous().sort_by(|a, b| b.priority.cmp(&a.priority));
                drop(queue);
                drop(in_flight);
                return self.wait_for_turn(task, parallelizable, now).await;
            }
            *in_flight += 1;
        }
        let result = self.dispatch(task, parallelizable, now).await;
        *self.in_flight.lock().await -= 1;
        result
    }

    async fn wait_for_turn(&self, task: Task, parallelizable: bool, now: DateTime<Utc>) -> Result<TaskResult, SupervisorError> {
        if now > task.deadline {
            return Err(SupervisorError::QueueTimeout);
        }
        *self.in_flight.lock().await += 1;
        let result = self.dispatch(task, parallelizable, now).await;
        *self.in_flight.lock().await -= 1;
        result
    }

    /// Selection + dispatch + aggregation for one `TaskRequest`.
    async fn dispatch(&self, task: Task, parallelizable: bool, now: DateTime<Utc>) -> Result<TaskResult, SupervisorError> {
        let candidates = self.select_candidates(&task).await;
        if candidates.is_empty() {
            return Err(SupervisorError::NoCapableAgent);
        }

        let deadline = task.deadline - self.config.dispatch_overhead_budget;
        let cancel = CancellationToken::new();
        self.cancellations.lock().await.insert(task.id, cancel.clone());

        let outcome = if parallelizable && candidates.len() > 1 {
            self.dispatch_parallel(&task, candidates, deadline, cancel.clone()).await
        } else {
            self.dispatch_single(&task, &candidates[0], deadline, cancel.clone()).await
        };

        self.cancellations.lock().await.remove(&task.id);
        outcome
    }

    async fn select_candidates(&self, task: &Task) -> Vec<Agent> {
        let mut pool = Vec::new();
        for capability in &task.required_capabilities {
            let found = self.registry.find(capability, Some(self.id)).await;
            for agent in found {
                if agent.has_free_capacity() && !pool.iter().any(|a: &Agent| a.id == agent.id) {
                    pool.push(agent);
                }
            }
        }
        pool
    }

    async fn dispatch_single(
        &self,
        task: &Task,
        agent: &Agent,
        deadline: DateTime<Utc>,
        cancel: CancellationToken,
    ) -> Result<TaskResult, SupervisorError> {
        tokio::select! {
            result = self.executor.execute(agent, task.payload.clone(), deadline, cancel.clone()) => {
                result.map_err(|e| error_kind_to_supervisor_error(e, agent.id))
            }
            () = tokio::time::sleep(std_duration_until(deadline)) => {
                cancel.cancel();
                Err(SupervisorError::SubAgentTimeout(agent.id))
            }
        }
    }

    async fn dispatch_parallel(
        &self,
        task: &Task,
        candidates: Vec<Agent>,
        deadline: DateTime<Utc>,
        cancel: CancellationToken,
    ) -> Result<TaskResult, SupervisorError> {
        let n = candidates.len();
        let payloads = self.splitter.split(&task.payload, n);
        let mut handles = Vec::with_capacity(n);

        for (agent, payload) in candidates.into_iter().zip(payloads.into_iter()) {
            let executor = Arc::clone(&self.executor);
            let cancel = cancel.clone();
            let deadline_inner = deadline;
            handles.push(tokio::spawn(async move {
                executor.execute(&agent, payload, deadline_inner, cancel).await
            }));
        }

        let best_effort = self.config.aggregation_policy == AggregationPolicy::BestEffort;
        let sink = self.partial_sink.lock().await.clone();
        let mut successes = Vec::new();
        let mut failures = Vec::new();
        let mut partial_seq = 0u64;
        for handle in handles {
            match handle.await {
                Ok(Ok(result)) => {
                    if best_effort {
                        self.publish_partial(sink.as_ref(), task, &result, partial_seq).await;
                        partial_seq += 1;
                    }
                    successes.push(result);
                }
                Ok(Err(e)) => failures.push(e),
                Err(join_err) => failures.push(ErrorKind::InternalError(format!("sub-agent task panicked: {join_err}"))),
            }
        }

        match self.config.aggregation_policy {
            AggregationPolicy::Strict => {
                if let Some(e) = failures.into_iter().next() {
                    cancel.cancel();
                    return Err(SupervisorError::AggregationFailed(e.as_str().to_string()));
                }
            }
            AggregationPolicy::BestEffort => {
                if successes.is_empty() {
                    return Err(SupervisorError::AggregationFailed(
                        "no sub-agent produced a success".to_string(),
                    ));
                }
            }
        }

        let mut result = successes
            .into_iter()
            .next()
            .ok_or_else(|| SupervisorError::AggregationFailed("no results collected".to_string()))?;

        if best_effort && !failures.is_empty() {
            let summary = failures.iter().map(ErrorKind::as_str).collect::<Vec<_>>().join(", ");
            result = result.with_failure_summary(format!("{} of {n} branches failed: {summary}", failures.len()));
        }

        Ok(result)
    }

    /// Publishes a collected success as a `PartialResult` correlated by the
    /// parent task id, so a best-effort caller sees every successful branch
    /// as it lands rather than only the one the aggregator keeps (§4.4).
    async fn publish_partial(&self, sink: Option<&Arc<MessageBus>>, task: &Task, result: &TaskResult, seq: u64) {
        let Some(bus) = sink else { return };
        let Some(payload) = result.payload.clone() else { return };
        let message = Message::new(
            task.id,
            self.id,
            None,
            MessagePayload::PartialResult(PartialResult {
                task_id: task.id,
                seq,
                payload,
            }),
            Utc::now(),
        );
        let _ = bus.publish(message).await;
    }

    /// Propagates a `Cancel` to an in-flight dispatch, honored cooperatively
    /// (§5 cancellation semantics).
    pub async fn cancel(&self, task_id: Uuid) {
        if let Some(token) = self.cancellations.lock().await.get(&task_id) {
            token.cancel();
            info!(task_id = %task_id, "cancellation propagated to sub-agents");
        }
    }
}

impl<E: SubAgentExecutor + 'static> Supervisor<E> {
    /// Consumes `TaskRequest`s addressed to this supervisor from `parent`
    /// and publishes the resulting `TaskResult` back onto the bus,
    /// correlated by the original task id (§4.4, §8 scenario 1).
    pub async fn run(self: Arc<Self>, bus: Arc<MessageBus>, parent: AgentId) {
        *self.partial_sink.lock().await = Some(Arc::clone(&bus));
        let mut subscription = bus.subscribe_pair(parent, self.id).await;
        while let Some(message) = subscription.receiver.recv().await {
            let MessagePayload::TaskRequest(request) = message.payload else {
                continue;
            };
            let supervisor = Arc::clone(&self);
            let bus = Arc::clone(&bus);
            let from = self.id;
            let correlation_id = message.correlation_id;
            tokio::spawn(async move {
                let now = Utc::now();
                let task = Task {
                    id: request.task_id,
                    parent_id: None,
                    submitter: "orchestrator".to_string(),
                    task_type: request.task_type,
                    required_capabilities: request.required_capabilities.into_iter().collect(),
                    payload: request.payload,
                    priority: 5,
                    deadline: request.deadline,
                    created_at: now,
                    status: TaskStatus::Dispatched,
                    join_mode: JoinMode::All,
                };
                let result = match supervisor.handle_task_request(task, request.parallelizable, now).await {
                    Ok(mut result) => {
                        result.task_id = request.task_id;
                        result
                    }
                    Err(err) => failure_result(request.task_id, err, now),
                };
                let _ = bus
                    .publish(Message::new(
                        correlation_id,
                        from,
                        None,
                        MessagePayload::TaskResult(result),
                        Utc::now(),
                    ))
                    .await;
            });
        }
    }
}

/// Builds a terminal `TaskResult` from a dispatch failure, choosing
/// `TimedOut` for deadline-driven errors and `Failed` otherwise.
fn failure_result(task_id: Uuid, err: SupervisorError, started_at: DateTime<Utc>) -> TaskResult {
    let status = match err {
        SupervisorError::SubAgentTimeout(_) | SupervisorError::QueueTimeout => TaskStatus::TimedOut,
        _ => TaskStatus::Failed,
    };
    let finished_at = Utc::now();
    TaskResult::failure(task_id, status, err.into(), None, started_at, finished_at)
        .unwrap_or_else(|_| {
            TaskResult::failure(
                task_id,
                TaskStatus::Failed,
                ErrorKind::InternalError("failed to construct failure result".to_string()),
                None,
                started_at,
                finished_at.max(started_at),
            )
            .expect("well-formed fallback failure result")
        })
}

fn std_duration_until(deadline: DateTime<Utc>) -> std::time::Duration {
    let now = Utc::now();
    if deadline <= now {
        std::time::Duration::ZERO
    } else {
        (deadline - now).to_std().unwrap_or(std::time::Duration::ZERO)
    }
}

fn error_kind_to_supervisor_error(e: ErrorKind, agent_id: AgentId) -> SupervisorError {
    match e {
        ErrorKind::SubAgentTimeout(_) => SupervisorError::SubAgentTimeout(agent_id),
        ErrorKind::BudgetExhausted(m) => SupervisorError::BudgetExhausted(m),
        ErrorKind::AggregationFailed(m) => SupervisorError::AggregationFailed(m),
        ErrorKind::NoCapableAgent(_) => SupervisorError::NoCapableAgent,
        other => SupervisorError::AggregationFailed(other.as_str().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::agent::AgentTier;
    use crate::services::agent_registry::{AgentRegistryConfig, HeartbeatStatus};
    use std::collections::HashSet;

    struct EchoExecutor;

    #[async_trait::async_trait]
    impl SubAgentExecutor for EchoExecutor {
        async fn execute(
            &self,
            _agent: &Agent,
            payload: Payload,
            _deadline: DateTime<Utc>,
            _cancel: CancellationToken,
        ) -> Result<TaskResult, ErrorKind> {
            let now = Utc::now();
            TaskResult::success(Uuid::new_v4(), payload, Uuid::new_v4(), now, now, 10, 0.0)
                .map_err(|_| ErrorKind::InternalError("bad result".into()))
        }
    }

    fn cap(name: &str) -> HashSet<String> {
        let mut s = HashSet::new();
        s.insert(name.to_string());
        s
    }

    #[tokio::test]
    async fn fails_with_no_capable_agent_when_registry_empty() {
        let registry = Arc::new(AgentRegistry::new(AgentRegistryConfig::default()));
        let sup_id = Uuid::new_v4();
        let supervisor = Supervisor::new(
            sup_id,
            registry,
            Arc::new(EchoExecutor),
            Arc::new(IdentitySplitter),
            SupervisorConfig::default(),
        );
        let now = Utc::now();
        let task = Task::new(
            "client",
            "text.summarize",
            cap("text.summarize"),
            Payload::text("hi"),
            5,
            now + chrono::Duration::seconds(30),
            now,
            crate::domain::models::task::JoinMode::All,
        )
        .unwrap();
        let err = supervisor.handle_task_request(task, false, now).await.unwrap_err();
        assert_eq!(err, SupervisorError::NoCapableAgent);
    }

    #[tokio::test]
    async fn dispatches_to_ready_subagent() {
        let registry = Arc::new(AgentRegistry::new(AgentRegistryConfig::default()));
        let orch = Agent::new(Uuid::new_v4(), AgentTier::Orchestrator, HashSet::new(), None, 100, Utc::now()).unwrap();
        let orch_id = registry.register(orch).await.unwrap();
        let sup = Agent::new(Uuid::new_v4(), AgentTier::Supervisor, cap("text.summarize"), Some(orch_id), 4, Utc::now()).unwrap();
        let sup_id = registry.register(sup).await.unwrap();
        let sub = Agent::new(Uuid::new_v4(), AgentTier::SubAgent, cap("text.summarize"), Some(sup_id), 2, Utc::now()).unwrap();
        let sub_id = registry.register(sub).await.unwrap();
        registry.heartbeat(sub_id, HeartbeatStatus::default(), Utc::now()).await.unwrap();

        let supervisor = Supervisor::new(
            sup_id,
            registry,
            Arc::new(EchoExecutor),
            Arc::new(IdentitySplitter),
            SupervisorConfig::default(),
        );
        let now = Utc::now();
        let task = Task::new(
            "client",
            "text.summarize",
            cap("text.summarize"),
            Payload::text("hi"),
            5,
            now + chrono::Duration::seconds(30),
            now,
            crate::domain::models::task::JoinMode::All,
        )
        .unwrap();
        let result = supervisor.handle_task_request(task, false, now).await.unwrap();
        assert_eq!(result.status, crate::domain::models::task::TaskStatus::Completed);
    }
}
