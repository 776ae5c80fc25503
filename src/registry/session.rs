//! Connection sessions.

use crate::router::{DeliverySink, SinkStatus};
use crate::types::{ConnectionId, Delivery};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Lifecycle of a session. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// Result of handing a delivery to a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Sink queue full; this delivery is lost.
    Full,
    /// Sink's receiving side is gone.
    Disconnected,
    /// Session closed before the delivery could be made.
    Closed,
}

/// One live transport connection.
///
/// The state lock orders deliveries against close: a delivery holds it
/// shared, close holds it exclusively while releasing publications, so
/// nothing reaches the sink once close has started.
pub struct Session {
    id: ConnectionId,
    state: RwLock<SessionState>,
    sink: Arc<dyn DeliverySink>,
    opened_at: Instant,
}

impl Session {
    pub(crate) fn new(id: ConnectionId, sink: Arc<dyn DeliverySink>) -> Self {
        Self {
            id,
            state: RwLock::new(SessionState::Open),
            sink,
            opened_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Run `f` while the session is guaranteed to stay open.
    ///
    /// Returns `None` if it is already closed.
    pub(crate) fn while_open<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let state = self.state.read();
        match *state {
            SessionState::Open => Some(f()),
            SessionState::Closed => None,
        }
    }

    /// Transition to `Closed`, running `release` exactly once under the
    /// exclusive lock. Returns `None` if the session was already closed.
    pub(crate) fn close<R>(&self, release: impl FnOnce() -> R) -> Option<R> {
        let mut state = self.state.write();
        if *state == SessionState::Closed {
            return None;
        }
        *state = SessionState::Closed;
        Some(release())
    }

    pub(crate) fn deliver(&self, delivery: Delivery) -> DeliveryOutcome {
        self.while_open(|| match self.sink.deliver(delivery) {
            SinkStatus::Delivered => DeliveryOutcome::Delivered,
            SinkStatus::Full => DeliveryOutcome::Full,
            SinkStatus::Disconnected => DeliveryOutcome::Disconnected,
        })
        .unwrap_or(DeliveryOutcome::Closed)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
