//! Delivery sinks: where filtered events leave the engine.

use crate::types::{ConnectionId, Delivery};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::time::Duration;

/// Outcome reported by a sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkStatus {
    Delivered,
    /// Queue full; the delivery was not accepted.
    Full,
    /// Receiving side is gone.
    Disconnected,
}

/// Transport side of one connection.
///
/// `deliver` is called while routing and must not block.
pub trait DeliverySink: Send + Sync {
    fn deliver(&self, delivery: Delivery) -> SinkStatus;
}

impl DeliverySink for Sender<Delivery> {
    fn deliver(&self, delivery: Delivery) -> SinkStatus {
        match self.try_send(delivery) {
            Ok(()) => SinkStatus::Delivered,
            Err(TrySendError::Full(_)) => SinkStatus::Full,
            Err(TrySendError::Disconnected(_)) => SinkStatus::Disconnected,
        }
    }
}

/// Sink calling a closure for every delivery.
pub struct FnSink<F>(pub F);

impl<F> DeliverySink for FnSink<F>
where
    F: Fn(Delivery) -> SinkStatus + Send + Sync,
{
    fn deliver(&self, delivery: Delivery) -> SinkStatus {
        (self.0)(delivery)
    }
}

/// Receiving end of a channel-backed connection.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// Channel to receive deliveries.
    pub receiver: Receiver<Delivery>,
}

impl ConnectionHandle {
    /// Receive the next delivery (blocking).
    pub fn recv(&self) -> Result<Delivery, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a delivery (non-blocking).
    pub fn try_recv(&self) -> Result<Delivery, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Delivery, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently queued.
    pub fn drain(&self) -> Vec<Delivery> {
        self.receiver.try_iter().collect()
    }
}
