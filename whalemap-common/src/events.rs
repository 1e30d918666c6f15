//! Event types for the whalemap event system
//!
//! Provides shared event definitions and the EventBus used to tell
//! collaborators (SSE clients, in-process subscribers) that a published
//! collection or the query state changed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Which piece of query state changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryField {
    Focus,
    Radius,
    Taxon,
    Extent,
}

/// Whalemap event types
///
/// Events carry counts and generations only; subscribers re-read the
/// published collections from the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WhalemapEvent {
    /// Published (filtered) observation collection changed
    ObservationsChanged {
        /// Fetch generation that produced the collection
        generation: u64,
        /// Number of published observations
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Travel edges recomputed after a generation settled
    TravelsChanged {
        generation: u64,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A reactive query value changed
    QueryChanged {
        field: QueryField,
        /// Canonical string encoding of the new value
        value: String,
        timestamp: DateTime<Utc>,
    },

    /// A source adapter failed (or timed out) for a generation
    ///
    /// The pipeline continues with the remaining sources.
    AdapterFailed {
        generation: u64,
        source: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl WhalemapEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            WhalemapEvent::ObservationsChanged { .. } => "ObservationsChanged",
            WhalemapEvent::TravelsChanged { .. } => "TravelsChanged",
            WhalemapEvent::QueryChanged { .. } => "QueryChanged",
            WhalemapEvent::AdapterFailed { .. } => "AdapterFailed",
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use whalemap_common::events::{EventBus, WhalemapEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(WhalemapEvent::TravelsChanged {
///     generation: 1,
///     count: 0,
///     timestamp: chrono::Utc::now(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WhalemapEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<WhalemapEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: WhalemapEvent,
    ) -> Result<usize, broadcast::error::SendError<WhalemapEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: WhalemapEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(10);
        let result = bus.emit(WhalemapEvent::TravelsChanged {
            generation: 1,
            count: 0,
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit_lossy(WhalemapEvent::ObservationsChanged {
            generation: 7,
            count: 3,
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            WhalemapEvent::ObservationsChanged { generation, count, .. } => {
                assert_eq!(generation, 7);
                assert_eq!(count, 3);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = WhalemapEvent::QueryChanged {
            field: QueryField::Taxon,
            value: "Orcinus orca".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "QueryChanged");
        assert_eq!(json["field"], "taxon");
        assert_eq!(event.event_type(), "QueryChanged");
    }

    #[test]
    fn test_capacity() {
        assert_eq!(EventBus::new(42).capacity(), 42);
    }
}
