//! Broadcast bus for cycle lifecycle events.
//!
//! Publishing never fails. A [`CycleSubscription`] can follow one cycle
//! tree: it learns child ids from `micro_cycle_spawned` events as they pass,
//! so grandchildren spawned later are followed too.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::types::EdrrEvent;

const CHANNEL_CAPACITY: usize = 256;

pub type SharedEventBus = Arc<EventBus>;

pub struct EventBus {
    sender: broadcast::Sender<EdrrEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: EdrrEvent) -> usize {
        let event_type = event.event_type();
        let cycle_id = event.cycle_id().to_string();
        let delivered = self.sender.send(event).unwrap_or(0);
        debug!(event_type, cycle_id = %cycle_id, receivers = delivered, "Event published");
        delivered
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EdrrEvent> {
        self.sender.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: EventFilter) -> CycleSubscription {
        CycleSubscription::new(self.subscribe(), filter)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Which events a [`CycleSubscription`] yields.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Root of the followed cycle tree; `None` follows every cycle.
    pub cycle_id: Option<String>,
    /// Event type names (`EdrrEvent::event_type`); `None` yields all.
    pub event_types: Option<Vec<&'static str>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycle(mut self, cycle_id: &str) -> Self {
        self.cycle_id = Some(cycle_id.to_string());
        self
    }

    pub fn types(mut self, event_types: Vec<&'static str>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    fn wants_type(&self, event: &EdrrEvent) -> bool {
        self.event_types
            .as_ref()
            .map_or(true, |types| types.contains(&event.event_type()))
    }
}

/// Receiver that yields the events of one cycle tree.
pub struct CycleSubscription {
    receiver: broadcast::Receiver<EdrrEvent>,
    filter: EventFilter,
    followed: HashSet<String>,
}

impl CycleSubscription {
    pub fn new(receiver: broadcast::Receiver<EdrrEvent>, filter: EventFilter) -> Self {
        let followed = filter.cycle_id.iter().cloned().collect();
        Self {
            receiver,
            filter,
            followed,
        }
    }

    /// Next matching event; `None` once the bus is gone.
    ///
    /// A lagging subscriber skips what it missed and keeps going.
    pub async fn recv(&mut self) -> Option<EdrrEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.in_tree(&event) && self.filter.wants_type(&event) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged; events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn in_tree(&mut self, event: &EdrrEvent) -> bool {
        if self.filter.cycle_id.is_none() {
            return true;
        }
        let parent_followed = event
            .parent_id()
            .is_some_and(|parent| self.followed.contains(parent));
        if parent_followed {
            if let EdrrEvent::MicroCycleSpawned { cycle_id, .. } = event {
                self.followed.insert(cycle_id.clone());
            }
        }
        parent_followed || self.followed.contains(event.cycle_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edrr::{Phase, TerminationReason};
    use chrono::Utc;

    fn started(id: &str) -> EdrrEvent {
        EdrrEvent::CycleStarted {
            cycle_id: id.to_string(),
            task_preview: "task".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn spawned(id: &str, parent: &str, depth: u32) -> EdrrEvent {
        EdrrEvent::MicroCycleSpawned {
            cycle_id: id.to_string(),
            parent_id: parent.to_string(),
            phase: Phase::Differentiate,
            depth,
            timestamp: Utc::now(),
        }
    }

    fn completed(id: &str) -> EdrrEvent {
        EdrrEvent::CycleCompleted {
            cycle_id: id.to_string(),
            depth: 0,
            elapsed_ms: 1,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_counts_receivers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(started("c1")), 0);

        let mut receiver = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.publish(started("c1")), 1);
        assert_eq!(receiver.recv().await.unwrap().event_type(), "cycle_started");
    }

    #[tokio::test]
    async fn test_subscription_follows_tree() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_filtered(EventFilter::new().cycle("root"));

        bus.publish(started("other"));
        bus.publish(spawned("child", "root", 1));
        bus.publish(spawned("grandchild", "child", 2));
        bus.publish(completed("grandchild"));
        bus.publish(EdrrEvent::CycleTerminated {
            cycle_id: "stray".into(),
            parent_id: Some("other".into()),
            reason: TerminationReason::HumanOverride,
            timestamp: Utc::now(),
        });
        bus.publish(completed("root"));
        drop(bus);

        let mut seen = Vec::new();
        while let Some(event) = sub.recv().await {
            seen.push(event.cycle_id().to_string());
        }
        assert_eq!(seen, vec!["child", "grandchild", "grandchild", "root"]);
    }

    #[tokio::test]
    async fn test_type_filter_still_tracks_children() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_filtered(
            EventFilter::new()
                .cycle("root")
                .types(vec!["cycle_completed"]),
        );

        bus.publish(spawned("child", "root", 1));
        bus.publish(completed("child"));
        drop(bus);

        assert_eq!(sub.recv().await.map(|e| e.cycle_id().to_string()), Some("child".into()));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_recovers() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_filtered(EventFilter::new());
        for i in 0..(CHANNEL_CAPACITY + 10) {
            bus.publish(started(&format!("c{}", i)));
        }
        let first = sub.recv().await.unwrap();
        assert_ne!(first.cycle_id(), "c0");
    }
}
