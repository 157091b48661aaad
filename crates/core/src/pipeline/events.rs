//! # Stage Events
//!
//! Best-effort push notifications for live viewers. Events are invalidation
//! hints: receivers refetch authoritative state through the API.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::state::{Message, Stage, StageId};

/// An event broadcast to connected viewers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageEvent {
    /// New messages were stored for a stage
    Messages {
        #[serde(rename = "stageId")]
        stage_id: StageId,
        messages: Vec<Message>,
    },
    /// A stage's status or fields changed
    Stage { stage: Stage },
}

impl StageEvent {
    pub fn messages(stage_id: StageId, messages: Vec<Message>) -> Self {
        Self::Messages { stage_id, messages }
    }

    pub fn stage(stage: Stage) -> Self {
        Self::Stage { stage }
    }

    pub fn stage_id(&self) -> StageId {
        match self {
            Self::Messages { stage_id, .. } => *stage_id,
            Self::Stage { stage } => stage.id,
        }
    }
}

/// Fan-out of stage events to every subscriber
///
/// No persistence, no replay, no acknowledgment. A subscriber that falls
/// more than `capacity` events behind loses the oldest ones.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<StageEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event; returns how many subscribers it reached
    pub fn publish(&self, event: StageEvent) -> usize {
        let stage_id = event.stage_id();
        match self.tx.send(event) {
            Ok(reached) => {
                tracing::trace!(stage_id, reached, "Published stage event");
                reached
            }
            // No subscribers connected
            Err(_) => 0,
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(100)
    }
}
