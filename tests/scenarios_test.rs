//! End-to-end scenarios from the orchestration engine's testable properties:
//! single-supervisor success, provider rate-limiting with queued drain,
//! supervisor unavailability, quorum composition, cancellation cascade, and
//! session disconnect/resume.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use conclave::domain::error::{DispatchError, ErrorKind};
use conclave::domain::models::agent::{Agent, AgentTier};
use conclave::domain::models::task::{JoinMode, Payload, TaskTypeSpec};
use conclave::services::agent_registry::{AgentRegistry, AgentRegistryConfig, HeartbeatStatus};
use conclave::services::audit_log::{AuditLogConfig, AuditLogService};
use conclave::services::message_bus::MessageBus;
use conclave::services::orchestrator::{NoopClassifier, Orchestrator, OrchestratorConfig};
use conclave::services::provider_pool::{ProviderConfig, ProviderPool};
use conclave::services::supervisor::{IdentitySplitter, Supervisor, SupervisorConfig, SubAgentExecutor};
use conclave::domain::models::task::{Task, TaskResult};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn cap(name: &str) -> HashSet<String> {
    let mut s = HashSet::new();
    s.insert(name.to_string());
    s
}

async fn build() -> (Orchestrator<NoopClassifier>, Arc<AgentRegistry>, Arc<MessageBus>) {
    let registry = Arc::new(AgentRegistry::new(AgentRegistryConfig::default()));
    let bus = Arc::new(MessageBus::default());
    let audit = Arc::new(AuditLogService::new(AuditLogConfig::default()));
    let orch_id = Uuid::new_v4();
    let orchestrator = Orchestrator::new(
        orch_id,
        Arc::clone(&registry),
        Arc::clone(&bus),
        Arc::new(NoopClassifier),
        audit,
        OrchestratorConfig::default(),
    );
    (orchestrator, registry, bus)
}

struct TestExecutor;

#[async_trait::async_trait]
impl SubAgentExecutor for TestExecutor {
    async fn execute(
        &self,
        agent: &Agent,
        payload: Payload,
        _deadline: chrono::DateTime<Utc>,
        _cancel: CancellationToken,
    ) -> Result<TaskResult, ErrorKind> {
        let now = Utc::now();
        TaskResult::success(Uuid::nil(), payload, agent.id, now, now, 10, 0.0)
            .map_err(|_| ErrorKind::InternalError("bad result".into()))
    }
}

/// Scenario 1: single supervisor, single sub-agent, one provider request.
#[tokio::test]
async fn single_supervisor_success_dispatches_to_registered_agent() {
    let (orch, registry, bus) = build().await;
    let root_id = orch.id;

    let root = Agent::new(root_id, AgentTier::Orchestrator, HashSet::new(), None, 100, Utc::now()).unwrap();
    registry.register(root).await.unwrap();
    let s1 = Agent::new(Uuid::new_v4(), AgentTier::Supervisor, cap("text.summarize"), Some(root_id), 4, Utc::now()).unwrap();
    let s1_id = registry.register(s1).await.unwrap();
    registry.heartbeat(s1_id, HeartbeatStatus::default(), Utc::now()).await.unwrap();

    let sub = Agent::new(Uuid::new_v4(), AgentTier::SubAgent, cap("text.summarize"), Some(s1_id), 2, Utc::now()).unwrap();
    let sub_id = registry.register(sub).await.unwrap();
    registry.heartbeat(sub_id, HeartbeatStatus::default(), Utc::now()).await.unwrap();

    orch.declare_task_type(TaskTypeSpec {
        name: "text.summarize".to_string(),
        required_capabilities: cap("text.summarize"),
        parallelizable: false,
        join_mode: JoinMode::All,
        default_deadline_ms: 30_000,
    })
    .await;

    let supervisor = Arc::new(Supervisor::new(
        s1_id,
        Arc::clone(&registry),
        Arc::new(TestExecutor),
        Arc::new(IdentitySplitter),
        SupervisorConfig::default(),
    ));
    tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        let bus = Arc::clone(&bus);
        async move { supervisor.run(bus, root_id).await }
    });

    let task_id = orch
        .submit_task(
            Uuid::new_v4(),
            "client",
            "text.summarize",
            Payload::text("hello world"),
            5,
            None,
            Utc::now(),
        )
        .await
        .unwrap();

    let mut results = orch.stream_results(&bus, task_id).await;
    let message = tokio::time::timeout(std::time::Duration::from_secs(2), results.recv())
        .await
        .expect("supervisor should publish a terminal result before the timeout")
        .expect("bus channel should not close while the subscription is held");
    let result = match message.payload {
        conclave::domain::models::message::MessagePayload::TaskResult(result) => result,
        other => panic!("expected a TaskResult, got {other:?}"),
    };
    assert_eq!(result.status, conclave::domain::models::task::TaskStatus::Completed);
    assert_eq!(result.produced_by, Some(sub_id));
}

/// Scenario 2: provider with requestsPerWindow=1 queues and drains within
/// its window, completing every admitted call.
#[tokio::test]
async fn provider_rate_limited_requests_queue_and_drain() {
    let pool = ProviderPool::new();
    pool.configure(
        "p1",
        ProviderConfig {
            requests_per_window: 1,
            window_duration: chrono::Duration::milliseconds(50),
            max_concurrent: 1,
            ..ProviderConfig::default()
        },
        Utc::now(),
    )
    .await;

    let deadline = Utc::now() + chrono::Duration::seconds(3);
    let first = pool.submit("p1", 10, deadline, Utc::now()).await.unwrap();

    let pool = Arc::new(pool);
    let pool2 = Arc::clone(&pool);
    let pool3 = Arc::clone(&pool);
    let second = tokio::spawn(async move { pool2.submit("p1", 10, deadline, Utc::now()).await });
    let third = tokio::spawn(async move { pool3.submit("p1", 10, deadline, Utc::now()).await });

    pool.release(first, 10, true, Utc::now()).await;
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    pool.drain_queue("p1", Utc::now()).await;
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    pool.drain_queue("p1", Utc::now()).await;

    let second = second.await.unwrap();
    let third = third.await.unwrap();
    assert!(second.is_ok());
    assert!(third.is_ok());
}

/// Scenario 4: no agent matches the requested capability anywhere in the
/// registry; dispatch fails immediately with NoCapableAgent.
#[tokio::test]
async fn supervisor_unavailable_fails_fast_with_no_capable_agent() {
    let (orch, _registry, _bus) = build().await;
    orch.declare_task_type(TaskTypeSpec {
        name: "image.generate".to_string(),
        required_capabilities: cap("image.generate"),
        parallelizable: false,
        join_mode: JoinMode::All,
        default_deadline_ms: 30_000,
    })
    .await;

    let err = orch
        .submit_task(Uuid::new_v4(), "client", "image.generate", Payload::text("a cat"), 5, None, Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err, DispatchError::NoCapableAgent);
}

/// Scenario 5: quorum(2) composition succeeds once two of three branches
/// report success, regardless of the third's outcome.
#[tokio::test]
async fn quorum_composition_ignores_the_losing_branch() {
    use conclave::domain::error::ErrorKind;
    use conclave::domain::models::task::TaskResult;

    let (orch, _registry, _bus) = build().await;
    let now = Utc::now();
    let success = |n: u64| TaskResult::success(Uuid::new_v4(), Payload::text("ok"), Uuid::new_v4(), now, now, n, 0.0).unwrap();

    let result = orch
        .compose(
            JoinMode::Quorum { k: 2 },
            vec![Ok(success(1)), Ok(success(2)), Err(ErrorKind::TimedOut("slow branch".into()))],
        )
        .await;
    assert!(result.is_ok());
}

struct CancelAwareExecutor;

#[async_trait::async_trait]
impl SubAgentExecutor for CancelAwareExecutor {
    async fn execute(
        &self,
        _agent: &Agent,
        _payload: Payload,
        _deadline: chrono::DateTime<Utc>,
        cancel: CancellationToken,
    ) -> Result<TaskResult, ErrorKind> {
        tokio::select! {
            () = cancel.cancelled() => Err(ErrorKind::Cancelled("cancelled by supervisor".to_string())),
            () = tokio::time::sleep(std::time::Duration::from_secs(5)) => {
                let now = Utc::now();
                TaskResult::success(Uuid::new_v4(), Payload::text("too slow"), Uuid::new_v4(), now, now, 1, 0.0)
                    .map_err(|_| ErrorKind::InternalError("bad result".into()))
            }
        }
    }
}

/// Scenario 3: a divisible task fans out to four sub-agents; cancelling it
/// mid-flight propagates to every branch and the supervisor returns well
/// before each branch's own 5s stall would have finished.
#[tokio::test]
async fn cancel_propagates_to_all_branches_of_a_divisible_task() {
    let registry = Arc::new(AgentRegistry::new(AgentRegistryConfig::default()));
    let orch = Agent::new(Uuid::new_v4(), AgentTier::Orchestrator, HashSet::new(), None, 100, Utc::now()).unwrap();
    let orch_id = registry.register(orch).await.unwrap();
    let sup_id = Uuid::new_v4();
    for _ in 0..4 {
        let sub = Agent::new(Uuid::new_v4(), AgentTier::SubAgent, cap("image.tile"), Some(sup_id), 2, Utc::now()).unwrap();
        let sub_id = registry.register(sub).await.unwrap();
        registry.heartbeat(sub_id, HeartbeatStatus::default(), Utc::now()).await.unwrap();
    }
    let _ = orch_id;

    let supervisor = Arc::new(Supervisor::new(
        sup_id,
        registry,
        Arc::new(CancelAwareExecutor),
        Arc::new(IdentitySplitter),
        SupervisorConfig::default(),
    ));

    let now = Utc::now();
    let task = Task::new(
        "client",
        "image.tile.render",
        cap("image.tile"),
        Payload::text("tile-job"),
        5,
        now + chrono::Duration::seconds(30),
        now,
        JoinMode::All,
    )
    .unwrap();
    let task_id = task.id;

    let sup_for_task = Arc::clone(&supervisor);
    let handle = tokio::spawn(async move { sup_for_task.handle_task_request(task, true, now).await });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    supervisor.cancel(task_id).await;

    let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("cancellation should resolve well before the 5s stall")
        .unwrap();
    assert!(outcome.is_err(), "every branch reports cancellation, so aggregation fails rather than succeeding");
}

/// Scenario 6: a session created before a gap in activity is still valid
/// (and its outbound sequence still gap-free) after resuming within the
/// idle window; a long enough gap instead closes it on sweep.
#[tokio::test]
async fn session_survives_reconnect_within_idle_window_but_not_beyond_it() {
    use conclave::domain::ports::identity_verifier::{AuthError, VerifiedIdentity};
    use conclave::services::session_layer::{SessionConfig, SessionLayer};

    struct AlwaysOk;
    #[async_trait::async_trait]
    impl conclave::domain::ports::identity_verifier::IdentityVerifier for AlwaysOk {
        async fn verify(&self, _credential: &str) -> Result<VerifiedIdentity, AuthError> {
            Ok(VerifiedIdentity {
                principal: "alice".to_string(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
        }
    }

    let layer = SessionLayer::new(
        Arc::new(AlwaysOk),
        SessionConfig {
            idle_timeout: chrono::Duration::seconds(10),
            ..SessionConfig::default()
        },
    );
    let t0 = Utc::now();
    let id = layer.connect("token", t0).await.unwrap();
    for _ in 0..5 {
        let _ = layer.next_seq(id).await.unwrap();
    }

    let reconnect_at = t0 + chrono::Duration::seconds(3);
    layer.touch(id, reconnect_at).await.unwrap();
    let closed = layer.sweep(reconnect_at).await;
    assert!(closed.is_empty(), "reconnecting within the idle window must not close the session");

    let next = layer.next_seq(id).await.unwrap();
    assert_eq!(next, 6, "sequence must resume without gap or duplication after reconnect");

    let long_gap = reconnect_at + chrono::Duration::seconds(30);
    let closed = layer.sweep(long_gap).await;
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].0, id);
}

/// Scenario 6b: a reconnecting client that supplies its prior `sessionId`
/// gets the same session back along with every unacked outbound frame,
/// without duplicating what it already acknowledged.
#[tokio::test]
async fn reconnect_with_session_id_replays_unacked_partials_without_duplication() {
    use conclave::domain::models::message::{WireBody, WireEnvelope, WireKind};
    use conclave::domain::ports::identity_verifier::{AuthError, VerifiedIdentity};
    use conclave::services::session_layer::{SessionConfig, SessionLayer};

    struct AlwaysOk;
    #[async_trait::async_trait]
    impl conclave::domain::ports::identity_verifier::IdentityVerifier for AlwaysOk {
        async fn verify(&self, _credential: &str) -> Result<VerifiedIdentity, AuthError> {
            Ok(VerifiedIdentity {
                principal: "alice".to_string(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
        }
    }

    fn frame(seq: u64) -> WireEnvelope {
        WireEnvelope {
            kind: WireKind::Partial,
            session_id: None,
            task_id: None,
            seq,
            payload: WireBody::Empty,
        }
    }

    let layer = SessionLayer::new(Arc::new(AlwaysOk), SessionConfig::default());
    let t0 = Utc::now();
    let id = layer.connect("token", t0).await.unwrap();

    layer.record_outbound(id, frame(1)).await.unwrap();
    layer.record_outbound(id, frame(2)).await.unwrap();
    layer.record_outbound(id, frame(3)).await.unwrap();
    layer.ack(id, 1).await.unwrap();

    let (resumed_id, replay) = layer
        .connect_or_resume(Some(id), "token", t0 + chrono::Duration::seconds(1))
        .await
        .unwrap();

    assert_eq!(resumed_id, id, "resume must rebind the same session, not mint a new one");
    assert_eq!(
        replay.iter().map(|e| e.seq).collect::<Vec<_>>(),
        vec![2, 3],
        "only frames after the last ack are redelivered, each exactly once"
    );
}
