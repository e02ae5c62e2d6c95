//! Event bus for consensus notifications
//!
//! Tokio broadcast pub/sub. Publishing never fails because nobody is
//! listening; slow subscribers lag and lose the oldest events.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::ConsensusEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

pub struct EventBus {
    sender: broadcast::Sender<ConsensusEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: ConsensusEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsensusEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only events of this request; request-less events are dropped
    pub request_id: Option<String>,
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Empty filter, matches all events
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(mut self, request_id: &str) -> Self {
        self.request_id = Some(request_id.to_string());
        self
    }

    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    pub fn matches(&self, event: &ConsensusEvent) -> bool {
        if let Some(ref rid) = self.request_id {
            if event.request_id() != Some(rid.as_str()) {
                return false;
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        true
    }
}

/// Receiver that only yields events matching a filter
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<ConsensusEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    pub fn new(receiver: broadcast::Receiver<ConsensusEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<ConsensusEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Next matching event already in the channel, without waiting
    pub fn try_recv(&mut self) -> Result<ConsensusEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// Extension trait for subscribing with filters
pub trait EventBusExt {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

impl EventBusExt for SharedEventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ValidationStatus;
    use chrono::Utc;

    fn fallback(request_id: &str) -> ConsensusEvent {
        ConsensusEvent::FallbackUsed {
            request_id: request_id.to_string(),
            reason: "empty population".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(fallback("req-1"));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "fallback_used");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new().shared();
        assert!(!bus.has_subscribers());
        bus.publish(fallback("req-1"));
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::new()
            .request("req-1")
            .types(vec!["consensus_reached", "fallback_used"]);

        let reached = ConsensusEvent::OutcomeRecorded {
            request_id: "req-1".to_string(),
            actual_success: true,
            predicted_status: ValidationStatus::Approved,
            timestamp: Utc::now(),
        };

        assert!(filter.matches(&fallback("req-1")));
        assert!(!filter.matches(&fallback("req-2")));
        assert!(!filter.matches(&reached));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let bus = EventBus::new().shared();
        let mut filtered = bus.subscribe_filtered(EventFilter::new().request("target"));

        let publisher = SharedEventBus::clone(&bus);
        tokio::spawn(async move {
            publisher.publish(fallback("other"));
            publisher.publish(fallback("target"));
        });

        let event = filtered.recv().await.unwrap();
        assert_eq!(event.request_id(), Some("target"));
    }
}
