//! Property-based test backing invariant 8: for every directed pair
//! (from, to), the delivery sequence to `to` matches the submission
//! sequence from `from`.

use conclave::domain::models::message::{Heartbeat, Message, MessagePayload};
use conclave::services::message_bus::{BusConfig, MessageBus};
use proptest::prelude::*;
use uuid::Uuid;

proptest! {
    #[test]
    fn pair_delivery_order_matches_submission_order(seqs in prop::collection::vec(0u32..1000, 1..50)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let received = rt.block_on(async {
            let bus = MessageBus::new(BusConfig { mailbox_capacity: seqs.len() + 1 });
            let from = Uuid::new_v4();
            let to = Uuid::new_v4();
            let mut sub = bus.subscribe_pair(from, to).await;

            for &seq in &seqs {
                let msg = Message::new(
                    Uuid::new_v4(),
                    from,
                    Some(to),
                    MessagePayload::Heartbeat(Heartbeat {
                        agent_id: from,
                        in_flight: seq,
                        reported_error_rate: 0.0,
                    }),
                    chrono::Utc::now(),
                );
                bus.publish(msg).await.unwrap();
            }

            let mut received = Vec::with_capacity(seqs.len());
            for _ in 0..seqs.len() {
                let msg = sub.receiver.recv().await.unwrap();
                match msg.payload {
                    MessagePayload::Heartbeat(h) => received.push(h.in_flight),
                    _ => unreachable!(),
                }
            }
            received
        });
        prop_assert_eq!(received, seqs);
    }
}
