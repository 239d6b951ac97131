// ============================
// crates/backend-lib/src/events.rs
// ============================
//! Domain events published by the SOS lifecycle and the safe walk monitor.
use campus_safety_common::{ActorSnapshot, SosEvent, SosId, UserId, WalkId};
use tokio::sync::broadcast;

pub const EVENT_CAPACITY: usize = 256;

/// Describes the events consumers can subscribe to.
#[derive(Debug, Clone, PartialEq)]
pub enum SafetyEvent {
    /// A new SOS was durably created.
    SosCreated { event: SosEvent },
    /// A security actor took the SOS.
    SosRecognised { sos_id: SosId, by: ActorSnapshot },
    /// The SOS was resolved or cancelled.
    SosResolved {
        sos_id: SosId,
        user_id: UserId,
        summary: String,
    },
    /// A safe walk handed over to the SOS lifecycle.
    WalkEscalated {
        walk_id: WalkId,
        sos_id: SosId,
        user_id: UserId,
    },
}

/// Fan-out of [`SafetyEvent`]s to any number of consumers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SafetyEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publishing with no subscribers is not an error
    pub fn publish(&self, event: SafetyEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("safety event published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SafetyEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
