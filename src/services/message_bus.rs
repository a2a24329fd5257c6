//! Message Bus: typed, in-process publish/route fabric between tiers.
//!
//! Generalizes the teacher's `event_bus.rs` (monotonic sequencing, per-
//! correlation ordering) and `command_bus.rs` (typed envelope routing) into
//! the nine message kinds of §4.3. Per-(from,to) ordering is one bounded
//! mpsc channel per directed pair; per-correlationId ordering for
//! `PartialResult` is one channel per correlation id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::warn;

use crate::domain::error::BusError;
use crate::domain::models::agent::AgentId;
use crate::domain::models::message::{CorrelationId, Message, MessagePayload};

#[derive(Debug, Clone, Copy)]
pub struct BusConfig {
    pub mailbox_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
        }
    }
}

type Mailbox = mpsc::Sender<Message>;

/// Multi-producer/multi-consumer routing fabric. Directed-pair channels are
/// created lazily on first publish or subscribe.
pub struct MessageBus {
    config: BusConfig,
    by_pair: RwLock<HashMap<(AgentId, AgentId), Mailbox>>,
    by_correlation: RwLock<HashMap<CorrelationId, Mailbox>>,
    broadcast_subs: RwLock<Vec<Mailbox>>,
}

pub struct Subscription {
    pub receiver: mpsc::Receiver<Message>,
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            by_pair: RwLock::new(HashMap::new()),
            by_correlation: RwLock::new(HashMap::new()),
            broadcast_subs: RwLock::new(Vec::new()),
        }
    }

    /// Registers a directed-pair mailbox. Delivery order to this mailbox
    /// follows submission order from `from` (§4.3 ordering guarantee).
    pub async fn subscribe_pair(&self, from: AgentId, to: AgentId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity);
        self.by_pair.write().await.insert((from, to), tx);
        Subscription { receiver: rx }
    }

    /// Registers a correlationId subscription; auto-removed by the caller
    /// on terminal `TaskResult` or explicit cancel (§4.3 subscription
    /// contract) via `unsubscribe_correlation`.
    pub async fn subscribe_correlation(&self, correlation_id: CorrelationId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity);
        self.by_correlation.write().await.insert(correlation_id, tx);
        Subscription { receiver: rx }
    }

    pub async fn unsubscribe_correlation(&self, correlation_id: CorrelationId) {
        self.by_correlation.write().await.remove(&correlation_id);
    }

    pub async fn subscribe_broadcast(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity);
        self.broadcast_subs.write().await.push(tx);
        Subscription { receiver: rx }
    }

    /// Publishes a message. Droppable kinds (`PartialResult`, `Heartbeat`)
    /// are silently dropped on a full mailbox; all others surface
    /// `Backpressure` to the producer instead of blocking (§4.3, §5).
    pub async fn publish(&self, message: Message) -> Result<(), BusError> {
        let droppable = message.payload.is_droppable();

        if let Some(to) = message.to_agent {
            let key = (message.from_agent, to);
            let mailbox = self.by_pair.read().await.get(&key).cloned();
            if let Some(mailbox) = mailbox {
                self.send_one(&mailbox, message.clone(), droppable).await?;
            }
        }

        if matches!(message.payload, MessagePayload::PartialResult(_) | MessagePayload::TaskResult(_)) {
            let mailbox = self
                .by_correlation
                .read()
                .await
                .get(&message.correlation_id)
                .cloned();
            if let Some(mailbox) = mailbox {
                self.send_one(&mailbox, message, droppable).await?;
            }
            return Ok(());
        }

        if message.to_agent.is_none() {
            let subs = self.broadcast_subs.read().await.clone();
            for mailbox in subs {
                self.send_one(&mailbox, message.clone(), droppable).await?;
            }
        }
        Ok(())
    }

    async fn send_one(&self, mailbox: &Mailbox, message: Message, droppable: bool) -> Result<(), BusError> {
        match mailbox.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                if droppable {
                    warn!(kind = msg.payload.kind_name(), "mailbox full, dropping droppable message");
                    Ok(())
                } else {
                    Err(BusError::Backpressure)
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Ok(()),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

/// Convenience wrapper pairing a bus with a fixed agent identity, used by
/// Supervisors and the Orchestrator to publish without repeating `from`.
#[derive(Clone)]
pub struct BusHandle {
    pub bus: Arc<MessageBus>,
    pub agent_id: AgentId,
}

impl BusHandle {
    pub fn new(bus: Arc<MessageBus>, agent_id: AgentId) -> Self {
        Self { bus, agent_id }
    }

    pub async fn send(
        &self,
        to: Option<AgentId>,
        correlation_id: CorrelationId,
        payload: MessagePayload,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), BusError> {
        let message = Message::new(correlation_id, self.agent_id, to, payload, now);
        self.bus.publish(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::message::{Cancel, Heartbeat};
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn pair_delivery_preserves_submission_order() {
        let bus = MessageBus::new(BusConfig::default());
        let from = Uuid::new_v4();
        let to = Uuid::new_v4();
        let mut sub = bus.subscribe_pair(from, to).await;

        for i in 0..3u32 {
            let msg = Message::new(
                Uuid::new_v4(),
                from,
                Some(to),
                MessagePayload::Heartbeat(Heartbeat {
                    agent_id: from,
                    in_flight: i,
                    reported_error_rate: 0.0,
                }),
                Utc::now(),
            );
            bus.publish(msg).await.unwrap();
        }

        for expected in 0..3u32 {
            let msg = sub.receiver.recv().await.unwrap();
            match msg.payload {
                MessagePayload::Heartbeat(h) => assert_eq!(h.in_flight, expected),
                _ => panic!("unexpected payload"),
            }
        }
    }

    #[tokio::test]
    async fn cancel_backpressures_instead_of_dropping() {
        let bus = MessageBus::new(BusConfig { mailbox_capacity: 1 });
        let from = Uuid::new_v4();
        let to = Uuid::new_v4();
        let _sub = bus.subscribe_pair(from, to).await;

        let correlation = Uuid::new_v4();
        let fill = Message::new(
            correlation,
            from,
            Some(to),
            MessagePayload::Cancel(Cancel {
                task_id: correlation,
                reason: "r1".into(),
            }),
            Utc::now(),
        );
        bus.publish(fill).await.unwrap();

        let overflow = Message::new(
            correlation,
            from,
            Some(to),
            MessagePayload::Cancel(Cancel {
                task_id: correlation,
                reason: "r2".into(),
            }),
            Utc::now(),
        );
        let err = bus.publish(overflow).await.unwrap_err();
        assert_eq!(err, BusError::Backpressure);
    }

    #[tokio::test]
    async fn correlation_subscription_receives_partials_in_order() {
        let bus = MessageBus::new(BusConfig::default());
        let correlation = Uuid::new_v4();
        let mut sub = bus.subscribe_correlation(correlation).await;
        let from = Uuid::new_v4();

        for i in 0..3u64 {
            let msg = Message::new(
                correlation,
                from,
                None,
                MessagePayload::PartialResult(crate::domain::models::message::PartialResult {
                    task_id: correlation,
                    seq: i,
                    payload: crate::domain::models::task::Payload::text("chunk"),
                }),
                Utc::now(),
            );
            bus.publish(msg).await.unwrap();
        }

        for expected in 0..3u64 {
            let msg = sub.receiver.recv().await.unwrap();
            match msg.payload {
                MessagePayload::PartialResult(p) => assert_eq!(p.seq, expected),
                _ => panic!("unexpected payload"),
            }
        }
    }
}
