//! Connection lifecycle state machine
//!
//! Idle -> Connecting -> Connected <-> Updating, with Error reachable from any
//! active state and Idle reachable from everywhere via disconnect. The
//! current state is published on a watch channel so dashboards can follow it.

use crate::infra::metrics::{
    Metrics, CONNECTION_CONNECTED, CONNECTION_CONNECTING, CONNECTION_ERROR, CONNECTION_IDLE,
    CONNECTION_UPDATING,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Updating,
    Error(String),
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Updating => "updating",
            ConnectionState::Error(_) => "error",
        }
    }

    pub fn gauge(&self) -> u64 {
        match self {
            ConnectionState::Idle => CONNECTION_IDLE,
            ConnectionState::Connecting => CONNECTION_CONNECTING,
            ConnectionState::Connected => CONNECTION_CONNECTED,
            ConnectionState::Updating => CONNECTION_UPDATING,
            ConnectionState::Error(_) => CONNECTION_ERROR,
        }
    }

    /// Connected or Updating
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Updating)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ConnectionState::Error(msg) => Some(msg),
            _ => None,
        }
    }

    fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Connected | Error(_) | Idle)
                | (Connected, Updating | Error(_) | Idle)
                | (Updating, Connected | Error(_) | Idle)
                | (Error(_), Idle)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Error(msg) => write!(f, "error: {}", msg),
            other => f.write_str(other.name()),
        }
    }
}

pub struct ConnectionMachine {
    tx: watch::Sender<ConnectionState>,
    metrics: Arc<Metrics>,
}

impl ConnectionMachine {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Idle);
        metrics.set_connection_state(CONNECTION_IDLE);
        Self { tx, metrics }
    }

    pub fn state(&self) -> ConnectionState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Apply a transition if the table allows it
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut applied = false;
        self.tx.send_if_modified(|current| {
            if !current.can_transition_to(&next) {
                return false;
            }
            debug!(from = %current.name(), to = %next.name(), "connection_transition");
            *current = next.clone();
            applied = true;
            true
        });

        if applied {
            self.metrics.set_connection_state(next.gauge());
        } else {
            warn!(from = %self.state().name(), to = %next.name(), "connection_transition_rejected");
        }
        applied
    }

    pub fn begin_connect(&self) -> bool {
        self.transition(ConnectionState::Connecting)
    }

    pub fn connected(&self) -> bool {
        self.transition(ConnectionState::Connected)
    }

    pub fn begin_update(&self) -> bool {
        self.transition(ConnectionState::Updating)
    }

    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.transition(ConnectionState::Error(message.into()))
    }

    /// Back to Idle from any state; no-op when already Idle
    pub fn reset(&self) -> bool {
        if self.state() == ConnectionState::Idle {
            return false;
        }
        self.transition(ConnectionState::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> (ConnectionMachine, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        (ConnectionMachine::new(Arc::clone(&metrics)), metrics)
    }

    #[test]
    fn test_happy_path() {
        let (machine, metrics) = machine();
        assert!(machine.begin_connect());
        assert!(machine.connected());
        assert!(machine.begin_update());
        assert_eq!(metrics.connection_state(), CONNECTION_UPDATING);
        assert!(machine.connected());
        assert!(machine.reset());
        assert_eq!(machine.state(), ConnectionState::Idle);
        assert_eq!(metrics.connection_state(), CONNECTION_IDLE);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let (machine, _) = machine();
        assert!(!machine.connected());
        assert!(!machine.begin_update());
        assert!(!machine.fail("boom"));
        assert_eq!(machine.state(), ConnectionState::Idle);

        machine.begin_connect();
        assert!(!machine.begin_connect());
        assert!(!machine.begin_update());
    }

    #[test]
    fn test_error_only_leaves_to_idle() {
        let (machine, metrics) = machine();
        machine.begin_connect();
        assert!(machine.fail("HTTP 500"));
        assert_eq!(machine.state().error_message(), Some("HTTP 500"));
        assert_eq!(metrics.connection_state(), CONNECTION_ERROR);

        assert!(!machine.connected());
        assert!(!machine.begin_connect());
        assert!(machine.reset());
        assert!(machine.begin_connect());
    }

    #[test]
    fn test_reset_from_idle_is_noop() {
        let (machine, _) = machine();
        assert!(!machine.reset());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let (machine, _) = machine();
        let mut rx = machine.subscribe();
        machine.begin_connect();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Connecting);
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Error("bad".into()).to_string(), "error: bad");
        assert_eq!(ConnectionState::Updating.to_string(), "updating");
    }
}
