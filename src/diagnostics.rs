//! Diagnostic event stream.
//!
//! Registry and router state transitions are published here as typed
//! [`Diagnostic`] values. Listeners either see everything or only the
//! events attributed to one connection (the view a client gets of its own
//! requests). Serialized, each variant carries a `source` tag:
//!
//! ```text
//! {"source":"addPublication","serviceName":"messages","name":"query",
//!  "params":[{"dept":"acct"}],"ifServer":true,"checkBefore":false,
//!  "store":{"ifServer":true,"checkBefore":false}}
//! ```

use crate::types::ConnectionId;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Flags stored alongside a publication.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreFlags {
    pub if_server: bool,
    pub check_before: bool,
}

/// Why a delivery did not reach its connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Connection queue was full.
    BufferFull,
    /// Connection's receiving side is gone.
    Disconnected,
}

/// A state transition worth observing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum Diagnostic {
    #[serde(rename_all = "camelCase")]
    AddPublication {
        service_name: String,
        name: String,
        params: Vec<Value>,
        if_server: bool,
        check_before: bool,
        store: StoreFlags,
    },

    #[serde(rename_all = "camelCase")]
    RemovePublication {
        service_name: String,
        /// Publication keys left for the connection and service.
        keys: Vec<String>,
    },

    #[serde(rename_all = "camelCase")]
    PredicateError {
        service_name: String,
        connection_id: ConnectionId,
        name: String,
        error: String,
    },

    #[serde(rename_all = "camelCase")]
    DeliveryDropped {
        service_name: String,
        connection_id: ConnectionId,
        reason: DropReason,
    },

    #[serde(rename_all = "camelCase")]
    ConnectionClosed {
        connection_id: ConnectionId,
        /// Services whose publications were released.
        released: Vec<String>,
    },
}

impl Diagnostic {
    /// The `source` tag.
    pub fn source(&self) -> &'static str {
        match self {
            Diagnostic::AddPublication { .. } => "addPublication",
            Diagnostic::RemovePublication { .. } => "removePublication",
            Diagnostic::PredicateError { .. } => "predicateError",
            Diagnostic::DeliveryDropped { .. } => "deliveryDropped",
            Diagnostic::ConnectionClosed { .. } => "connectionClosed",
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

struct Listener {
    id: u64,
    /// `None` listens to every connection.
    scope: Option<ConnectionId>,
    sender: Sender<Diagnostic>,
}

/// Fan-out hub for diagnostics.
pub struct Diagnostics {
    listeners: RwLock<Vec<Listener>>,
    next_id: AtomicU64,
    buffer_size: usize,
}

impl Diagnostics {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            buffer_size,
        }
    }

    /// Listen to every diagnostic.
    pub fn subscribe(&self) -> DiagnosticHandle {
        self.register(None)
    }

    /// Listen to diagnostics attributed to one connection.
    pub fn subscribe_connection(&self, connection: ConnectionId) -> DiagnosticHandle {
        self.register(Some(connection))
    }

    fn register(&self, scope: Option<ConnectionId>) -> DiagnosticHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = bounded(self.buffer_size);
        self.listeners.write().push(Listener { id, scope, sender });
        DiagnosticHandle { receiver }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Publish a diagnostic attributed to `connection`.
    ///
    /// Full listeners miss the event; disconnected ones are removed.
    pub fn emit(&self, connection: Option<ConnectionId>, diagnostic: Diagnostic) {
        let mut gone = Vec::new();

        {
            let listeners = self.listeners.read();
            if listeners.is_empty() {
                return;
            }
            for listener in listeners.iter() {
                let in_scope = match listener.scope {
                    None => true,
                    Some(scope) => connection == Some(scope),
                };
                if !in_scope {
                    continue;
                }
                match listener.sender.try_send(diagnostic.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::trace!(listener = listener.id, "diagnostic listener full");
                    }
                    Err(TrySendError::Disconnected(_)) => gone.push(listener.id),
                }
            }
        }

        if !gone.is_empty() {
            self.listeners.write().retain(|l| !gone.contains(&l.id));
        }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Receiving end of a diagnostic subscription.
pub struct DiagnosticHandle {
    pub receiver: Receiver<Diagnostic>,
}

impl DiagnosticHandle {
    /// Receive the next diagnostic (blocking).
    pub fn recv(&self) -> Result<Diagnostic, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a diagnostic (non-blocking).
    pub fn try_recv(&self) -> Result<Diagnostic, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Diagnostic, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently queued.
    pub fn drain(&self) -> Vec<Diagnostic> {
        self.receiver.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn removal(service: &str) -> Diagnostic {
        Diagnostic::RemovePublication {
            service_name: service.to_string(),
            keys: vec![],
        }
    }

    #[test]
    fn test_add_publication_shape() {
        let diagnostic = Diagnostic::AddPublication {
            service_name: "messages".to_string(),
            name: "query".to_string(),
            params: vec![json!({"dept": "acct"})],
            if_server: true,
            check_before: false,
            store: StoreFlags {
                if_server: true,
                check_before: false,
            },
        };

        assert_eq!(
            diagnostic.to_json(),
            json!({
                "source": "addPublication",
                "serviceName": "messages",
                "name": "query",
                "params": [{"dept": "acct"}],
                "ifServer": true,
                "checkBefore": false,
                "store": {"ifServer": true, "checkBefore": false}
            })
        );
        assert_eq!(diagnostic.source(), "addPublication");
    }

    #[test]
    fn test_remove_publication_shape() {
        assert_eq!(
            removal("messages").to_json(),
            json!({"source": "removePublication", "serviceName": "messages", "keys": []})
        );
    }

    #[test]
    fn test_shape_round_trips_through_serde() {
        let original = Diagnostic::DeliveryDropped {
            service_name: "messages".to_string(),
            connection_id: ConnectionId(7),
            reason: DropReason::BufferFull,
        };
        let back: Diagnostic = serde_json::from_value(original.to_json()).unwrap();
        assert_eq!(back, original);
        assert_eq!(original.to_json()["connectionId"], json!(7));
    }

    #[test]
    fn test_scoped_listener() {
        let hub = Diagnostics::default();
        let everything = hub.subscribe();
        let only_one = hub.subscribe_connection(ConnectionId(1));

        hub.emit(Some(ConnectionId(2)), removal("a"));
        hub.emit(Some(ConnectionId(1)), removal("b"));
        hub.emit(None, removal("c"));

        assert_eq!(everything.drain().len(), 3);
        assert_eq!(only_one.drain(), vec![removal("b")]);
    }

    #[test]
    fn test_disconnected_listener_pruned() {
        let hub = Diagnostics::default();
        let handle = hub.subscribe();
        assert_eq!(hub.listener_count(), 1);

        drop(handle);
        hub.emit(None, removal("messages"));
        assert_eq!(hub.listener_count(), 0);
    }

    #[test]
    fn test_full_listener_misses_events() {
        let hub = Diagnostics::new(1);
        let handle = hub.subscribe();

        hub.emit(None, removal("a"));
        hub.emit(None, removal("b"));

        assert_eq!(handle.drain(), vec![removal("a")]);
        assert_eq!(hub.listener_count(), 1);
    }
}
