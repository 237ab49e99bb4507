//! Event bus for redboard using tokio::broadcast
//!
//! Consumers subscribe to learn when a new snapshot is published or the
//! coordinator changes state, instead of polling `get_snapshot()`.

use crate::config::PollingInterval;
use redboard_types::{CircuitState, CycleOutcome};
use tokio::sync::broadcast;

/// Events emitted by a coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    /// A refresh cycle started fetching
    CycleStarted { config_id: String },
    /// A cycle finished; the snapshot was republished if it changed
    SnapshotPublished {
        config_id: String,
        outcome: CycleOutcome,
    },
    /// The circuit breaker moved to a new state
    BreakerStateChanged {
        config_id: String,
        state: CircuitState,
    },
    /// Credentials were rejected and the cycle halted
    AuthFailed { config_id: String, message: String },
    IntervalChanged {
        config_id: String,
        interval: PollingInterval,
    },
    CredentialsUpdated { config_id: String },
}

/// Receivers more than this many events behind see `RecvError::Lagged`
const CAPACITY: usize = 256;

/// Fan-out of coordinator events over a tokio broadcast channel
pub struct EventBus {
    sender: broadcast::Sender<CoordinatorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CAPACITY);
        Self { sender }
    }
}

impl EventBus {
    /// Send to current subscribers; a bus nobody listens to drops the event
    pub fn publish(&self, event: CoordinatorEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.sender.subscribe()
    }
}
