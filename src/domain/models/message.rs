//! Message Bus wire types: the closed set of message kinds in §4.3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::ErrorKind;
use crate::domain::models::agent::AgentId;
use crate::domain::models::provider::ProviderHealth;
use crate::domain::models::route::RouteDecision;
use crate::domain::models::task::{Payload, TaskId, TaskResult};

pub type MessageId = Uuid;
pub type CorrelationId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_id: TaskId,
    pub task_type: String,
    pub required_capabilities: Vec<String>,
    pub payload: Payload,
    pub deadline: DateTime<Utc>,
    pub parallelizable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialResult {
    pub task_id: TaskId,
    pub seq: u64,
    pub payload: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cancel {
    pub task_id: TaskId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent_id: AgentId,
    pub in_flight: u32,
    pub reported_error_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthQuery {
    pub agent_id: AgentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReply {
    pub agent_id: AgentId,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub provider_id: String,
    pub health: ProviderHealth,
}

/// The closed set of message kinds carried between tiers. Each payload
/// variant corresponds exactly to one row of §4.3's enumerated list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessagePayload {
    TaskRequest(TaskRequest),
    TaskResult(TaskResult),
    PartialResult(PartialResult),
    Cancel(Cancel),
    Heartbeat(Heartbeat),
    HealthQuery(HealthQuery),
    HealthReply(HealthReply),
    RouteDecision(RouteDecision),
    ProviderEvent(ProviderEvent),
}

impl MessagePayload {
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::TaskRequest(_) => "TaskRequest",
            Self::TaskResult(_) => "TaskResult",
            Self::PartialResult(_) => "PartialResult",
            Self::Cancel(_) => "Cancel",
            Self::Heartbeat(_) => "Heartbeat",
            Self::HealthQuery(_) => "HealthQuery",
            Self::HealthReply(_) => "HealthReply",
            Self::RouteDecision(_) => "RouteDecision",
            Self::ProviderEvent(_) => "ProviderEvent",
        }
    }

    /// Drop-eligibility on mailbox overflow, per §4.3: `PartialResult` is
    /// dropped first, then `Heartbeat`; the rest must backpressure instead.
    pub const fn is_droppable(&self) -> bool {
        matches!(self, Self::PartialResult(_) | Self::Heartbeat(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub correlation_id: CorrelationId,
    pub from_agent: AgentId,
    pub to_agent: Option<AgentId>,
    pub payload: MessagePayload,
    pub enqueued_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        correlation_id: CorrelationId,
        from_agent: AgentId,
        to_agent: Option<AgentId>,
        payload: MessagePayload,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            correlation_id,
            from_agent,
            to_agent,
            payload,
            enqueued_at,
        }
    }
}

/// Wire envelope kinds exchanged with clients over the duplex channel (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WireKind {
    Auth,
    AuthAck,
    Submit,
    Submitted,
    Cancel,
    Partial,
    Result,
    Error,
    Ping,
    Pong,
    /// Client acknowledgement of the highest outbound `seq` it has
    /// processed, trimming the gateway's resume replay buffer (§6
    /// reconnection semantics). Not one of §6's required kinds, but needed
    /// to let the server know what a reconnect no longer needs to resend.
    Ack,
}

/// A length-prefixed framed envelope, carried as JSON text over the
/// gateway's WebSocket transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub kind: WireKind,
    pub session_id: Option<Uuid>,
    pub task_id: Option<TaskId>,
    pub seq: u64,
    pub payload: WireBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireBody {
    Auth { credential: String },
    Submit { task_type: String, payload: Payload, priority: u8, deadline_ms: Option<u64> },
    Cancel,
    Partial(PartialResult),
    Result(TaskResult),
    Error { kind: ErrorKind, message: String },
    Ack { seq: u64 },
    Empty,
}
