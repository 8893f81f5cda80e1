//! In-process event channel between the orchestrator and its consumers.
//!
//! An instantiable publish/subscribe handle rather than a process-wide
//! channel, so tests and embedders can wire their own bus. Delivery is
//! synchronous fan-out, best-effort: a subscriber registered after an event
//! fires does not receive it, and publishing with no subscribers is fine.

use crate::model::TaskEvent;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: TaskEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;

    #[tokio::test]
    async fn fans_out_to_all_current_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(TaskEvent::StatusUpdate {
            task_id: 1,
            status: TaskStatus::Searching,
        });

        for rx in [&mut a, &mut b] {
            match rx.recv().await.unwrap() {
                TaskEvent::StatusUpdate { task_id, status } => {
                    assert_eq!(task_id, 1);
                    assert_eq!(status, TaskStatus::Searching);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn late_subscribers_miss_earlier_events() {
        let bus = EventBus::new();
        bus.publish(TaskEvent::StatusUpdate {
            task_id: 1,
            status: TaskStatus::Completed,
        });

        let mut late = bus.subscribe();
        assert!(matches!(
            late.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn publishing_without_subscribers_is_not_an_error() {
        let bus = EventBus::new();
        bus.publish(TaskEvent::StatusUpdate {
            task_id: 1,
            status: TaskStatus::Pending,
        });
    }
}
