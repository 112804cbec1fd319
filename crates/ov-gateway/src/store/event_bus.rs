//! In-process publish/subscribe of typed events (§4.C).
//!
//! Pure fan-out to live subscribers — persistence is the Event Store's job
//! (`event_store.rs`), which wraps this bus and publishes only after the
//! durable append has committed.

use ov_domain::model::AgentRunEvent;
use tokio::sync::broadcast;

/// A single process-wide channel. Subscribers filter by `run_id` themselves;
/// delivery across subscribers is concurrent, delivery to one subscriber is
/// serialized by the channel itself.
pub struct EventBus {
    tx: broadcast::Sender<AgentRunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentRunEvent> {
        self.tx.subscribe()
    }

    /// Deliver to all current subscribers. A failed send (no subscribers)
    /// is not an error — it just means nobody is currently listening live.
    pub fn publish(&self, event: AgentRunEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_event(run_id: uuid::Uuid, id: u64) -> AgentRunEvent {
        AgentRunEvent {
            id,
            run_id,
            event_type: "supervisor_started".into(),
            payload: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let run_id = Uuid::new_v4();
        bus.publish(sample_event(run_id, 1));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.run_id, run_id);
        assert_eq!(received.id, 1);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(sample_event(Uuid::new_v4(), 1));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_a_copy() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        let run_id = Uuid::new_v4();
        bus.publish(sample_event(run_id, 7));

        assert_eq!(rx1.recv().await.unwrap().id, 7);
        assert_eq!(rx2.recv().await.unwrap().id, 7);
    }
}
