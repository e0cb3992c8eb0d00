//! Pipeline event types and EventBus
//!
//! Stages announce what they changed; the coordinator listens and schedules
//! the next stage. Nothing downstream depends on an event being delivered:
//! every stage also runs on its own schedule.

use crate::db::models::{AgentKind, AgentState, RunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Localist pipeline events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A collector inserted new Bronze rows
    ///
    /// Triggers:
    /// - Coordinator: run the Reconciler
    BronzeInserted {
        source_id: String,
        created: u64,
        timestamp: DateTime<Utc>,
    },

    /// Silver venues were created or updated
    ///
    /// Triggers:
    /// - Coordinator: run the Scorer (when the Reconciler changed Silver)
    /// - Coordinator: run Curators for the affected cities
    SilverUpdated {
        origin: AgentKind,
        cities: Vec<String>,
        venues: u64,
        timestamp: DateTime<Utc>,
    },

    /// A Gold list was replaced
    ///
    /// Triggers:
    /// - Publish listener: downstream cache invalidation
    GoldPublished {
        list_id: String,
        slug: String,
        city: Option<String>,
        category: Option<String>,
        item_count: u64,
        timestamp: DateTime<Utc>,
    },

    /// An agent changed lifecycle state
    AgentStateChanged {
        agent_name: String,
        old_state: AgentState,
        new_state: AgentState,
        timestamp: DateTime<Utc>,
    },

    /// An agent run was recorded
    AgentRunFinished {
        agent_name: String,
        run_id: String,
        status: RunStatus,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for pipeline events
///
/// # Examples
///
/// ```
/// use localist_common::events::{EventBus, PipelineEvent};
///
/// let bus = EventBus::new(16);
/// let mut rx = bus.subscribe();
/// bus.emit_lossy(PipelineEvent::BronzeInserted {
///     source_id: "michelin".to_string(),
///     created: 3,
///     timestamp: chrono::Utc::now(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per receiver
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(4);
        let result = bus.emit(PipelineEvent::SilverUpdated {
            origin: AgentKind::Reconciler,
            cities: vec!["nyc".to_string()],
            venues: 1,
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        bus.emit_lossy(PipelineEvent::BronzeInserted {
            source_id: "a".to_string(),
            created: 1,
            timestamp: Utc::now(),
        });
        bus.emit_lossy(PipelineEvent::BronzeInserted {
            source_id: "b".to_string(),
            created: 2,
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            PipelineEvent::BronzeInserted { source_id, .. } => assert_eq!(source_id, "a"),
            other => panic!("unexpected event {:?}", other),
        }
        match rx.recv().await.unwrap() {
            PipelineEvent::BronzeInserted { created, .. } => assert_eq!(created, 2),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(PipelineEvent::AgentRunFinished {
            agent_name: "scorer".to_string(),
            run_id: "r1".to_string(),
            status: RunStatus::Completed,
            timestamp: Utc::now(),
        })
        .unwrap();
        assert_eq!(json["type"], "AgentRunFinished");
        assert_eq!(json["status"], "completed");
    }
}
