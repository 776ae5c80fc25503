//! Server facade tying the filter module, registry, router and diagnostics
//! together.

use crate::diagnostics::{DiagnosticHandle, Diagnostics};
use crate::error::Result;
use crate::filters::{FilterModule, Predicate};
use crate::registry::{PublicationRegistry, RegistryConfig};
use crate::router::{ConnectionHandle, DeliverySink, EventRouter, RouteSummary, RouterStats};
use crate::types::{ConnectionId, Delivery, MutationEvent, PublicationSpec};
use crossbeam_channel::{bounded, Receiver};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Input accepted by the event loop.
pub enum Inbound {
    /// A service mutation to route.
    Mutation(MutationEvent),
    /// A new transport connection and its sink.
    Open {
        connection: ConnectionId,
        sink: Arc<dyn DeliverySink>,
    },
    /// A transport connection went away.
    Close(ConnectionId),
}

impl fmt::Debug for Inbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inbound::Mutation(event) => f.debug_tuple("Mutation").field(event).finish(),
            Inbound::Open { connection, .. } => {
                f.debug_struct("Open").field("connection", connection).finish()
            }
            Inbound::Close(connection) => f.debug_tuple("Close").field(connection).finish(),
        }
    }
}

/// Server-side publication support for a set of services.
///
/// Holds the filter module every publication is compiled from; the module
/// is fixed for the server's lifetime.
pub struct PublicationServer {
    module: Arc<FilterModule>,
    registry: Arc<PublicationRegistry>,
    router: EventRouter,
}

impl PublicationServer {
    pub fn new(module: Arc<FilterModule>, config: RegistryConfig) -> Self {
        let registry = Arc::new(PublicationRegistry::new(config));
        Self {
            module,
            router: EventRouter::new(registry.clone()),
            registry,
        }
    }

    pub fn module(&self) -> &Arc<FilterModule> {
        &self.module
    }

    pub fn registry(&self) -> &Arc<PublicationRegistry> {
        &self.registry
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        self.registry.diagnostics()
    }

    /// Listen to diagnostics for one connection.
    pub fn watch(&self, connection: ConnectionId) -> DiagnosticHandle {
        self.diagnostics().subscribe_connection(connection)
    }

    // --- Connections ---

    /// Open a connection backed by a bounded channel.
    pub fn open_connection(&self, connection: ConnectionId) -> Result<ConnectionHandle> {
        let (sender, receiver) = bounded::<Delivery>(self.registry.config().buffer_size);
        self.registry.open_connection(connection, Arc::new(sender))?;
        Ok(ConnectionHandle {
            id: connection,
            receiver,
        })
    }

    /// Open a connection delivering through `sink`.
    pub fn open_connection_with_sink(
        &self,
        connection: ConnectionId,
        sink: Arc<dyn DeliverySink>,
    ) -> Result<()> {
        self.registry.open_connection(connection, sink).map(|_| ())
    }

    /// Close a connection. Returns the services whose publications were
    /// released, or `None` if it was not open.
    pub fn close_connection(&self, connection: ConnectionId) -> Option<Vec<String>> {
        self.registry.close_connection(connection)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    // --- Publications ---

    /// Add or replace the publication of `connection` on `service`.
    pub fn add_publication(
        &self,
        connection: ConnectionId,
        service: &str,
        spec: &PublicationSpec,
    ) -> Result<Predicate> {
        self.registry.add_publication(connection, service, &self.module, spec)
    }

    pub fn remove_publication(
        &self,
        connection: ConnectionId,
        service: &str,
    ) -> Result<Vec<String>> {
        self.registry.remove_publication(connection, service)
    }

    pub fn publication_count(&self) -> usize {
        self.registry.publication_count()
    }

    // --- Events ---

    /// Route one mutation to matching connections.
    pub fn publish(&self, event: &MutationEvent) -> RouteSummary {
        self.router.route(event)
    }

    pub fn stats(&self) -> RouterStats {
        self.router.stats()
    }

    /// Apply one inbound message.
    pub fn handle(&self, inbound: Inbound) {
        match inbound {
            Inbound::Mutation(event) => {
                self.publish(&event);
            }
            Inbound::Open { connection, sink } => {
                if let Err(e) = self.open_connection_with_sink(connection, sink) {
                    tracing::warn!(%connection, error = %e, "open rejected");
                }
            }
            Inbound::Close(connection) => {
                self.close_connection(connection);
            }
        }
    }

    /// Process `inbound` on a dedicated thread until every sender is gone.
    ///
    /// Messages are handled in arrival order, so a close is fully applied
    /// before any later mutation is routed.
    pub fn spawn_event_loop(
        self: &Arc<Self>,
        inbound: Receiver<Inbound>,
    ) -> Result<JoinHandle<RouterStats>> {
        let server = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("publication-router".to_string())
            .spawn(move || {
                tracing::debug!("event loop started");
                for message in inbound.iter() {
                    server.handle(message);
                }
                let stats = server.stats();
                tracing::debug!(
                    events = stats.events,
                    delivered = stats.delivered,
                    "event loop stopped"
                );
                stats
            })?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters;
    use crate::router::{FnSink, SinkStatus};
    use crossbeam_channel::unbounded;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    fn server() -> Arc<PublicationServer> {
        Arc::new(PublicationServer::new(
            Arc::new(filters::common()),
            RegistryConfig::default(),
        ))
    }

    #[test]
    fn test_publish_through_facade() {
        let server = server();
        let conn = server.open_connection(ConnectionId(1)).unwrap();
        server
            .add_publication(
                ConnectionId(1),
                "messages",
                &PublicationSpec::new("query").params(json!({"dept": "acct"})),
            )
            .unwrap();

        server.publish(&MutationEvent::created("messages", json!({"dept": "acct"})));
        server.publish(&MutationEvent::created("messages", json!({"dept": "xacct"})));

        let got = conn.drain();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].record, json!({"dept": "acct"}));
        assert_eq!(server.stats().events, 2);
    }

    #[test]
    fn test_event_loop_applies_in_order() {
        let server = server();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink = FnSink(move |delivery: Delivery| {
            sink_seen.lock().push(delivery.record);
            SinkStatus::Delivered
        });

        let (tx, rx) = unbounded();
        let handle = server.spawn_event_loop(rx).unwrap();

        tx.send(Inbound::Open {
            connection: ConnectionId(9),
            sink: Arc::new(sink),
        })
        .unwrap();
        // Publications are requested directly; wait for the open to land
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !server.registry().is_open(ConnectionId(9)) {
            assert!(std::time::Instant::now() < deadline, "open never applied");
            thread::sleep(Duration::from_millis(5));
        }
        server
            .add_publication(ConnectionId(9), "messages", &PublicationSpec::new("all"))
            .unwrap();

        tx.send(Inbound::Mutation(MutationEvent::created("messages", json!({"n": 1}))))
            .unwrap();
        tx.send(Inbound::Close(ConnectionId(9))).unwrap();
        tx.send(Inbound::Mutation(MutationEvent::created("messages", json!({"n": 2}))))
            .unwrap();
        drop(tx);

        let stats = handle.join().unwrap();
        assert_eq!(stats.events, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(*seen.lock(), vec![json!({"n": 1})]);
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn test_watch_sees_own_requests() {
        let server = server();
        let _a = server.open_connection(ConnectionId(1)).unwrap();
        let _b = server.open_connection(ConnectionId(2)).unwrap();
        let watch = server.watch(ConnectionId(1));

        server
            .add_publication(ConnectionId(2), "messages", &PublicationSpec::new("all"))
            .unwrap();
        server.remove_publication(ConnectionId(1), "messages").unwrap();

        let seen = watch.drain();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].source(), "removePublication");
    }
}
