//! Broadcast bus for workflow lifecycle notifications.
//!
//! Publishing with no active subscribers is a no-op, so the executor can emit
//! unconditionally.

use tokio::sync::broadcast;
use waypoint_types::event::LifecycleEvent;

/// Multi-consumer bus for `LifecycleEvent`s.
///
/// Cloning the bus clones the sender; every clone feeds the same channel.
pub struct LifecycleBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleBus {
    /// Create a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every notification published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for LifecycleBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for LifecycleBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(id: &str) -> LifecycleEvent {
        LifecycleEvent::WorkflowCompleted {
            workflow_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn subscribers_each_receive_published_event() {
        let bus = LifecycleBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(completed("wf-1"));

        assert_eq!(rx1.recv().await.unwrap().workflow_id(), "wf-1");
        assert_eq!(rx2.recv().await.unwrap().workflow_id(), "wf-1");
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = LifecycleBus::new(4);
        bus.publish(completed("a"));
        assert_eq!(bus.receiver_count(), 0);
    }

    #[test]
    fn clone_feeds_the_same_channel() {
        let bus = LifecycleBus::new(16);
        let other = bus.clone();
        let mut rx = bus.subscribe();

        other.publish(completed("wf-2"));

        let got = rx.try_recv().unwrap();
        assert!(matches!(got, LifecycleEvent::WorkflowCompleted { .. }));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let bus = LifecycleBus::new(0);
        let mut rx = bus.subscribe();
        bus.publish(completed("x"));
        assert!(rx.try_recv().is_ok());
        assert!(format!("{bus:?}").contains("receiver_count"));
    }
}
