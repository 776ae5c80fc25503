//! Per-connection, per-service publication registry.

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{PublicationError, Result};
use crate::filters::{compile, FilterModule, Predicate};
use crate::router::DeliverySink;
use crate::types::{ConnectionId, PublicationSpec};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use super::session::Session;
use super::types::{Publication, RegistryConfig};

type ServicePublications = DashMap<ConnectionId, Arc<Publication>>;

/// Holds every active publication, keyed by service and then connection.
///
/// Locking is sharded: operations on different connections never contend on
/// a registry-wide lock, and a publication for `(connection, service)` is
/// replaced or removed with a single map operation, so readers see either
/// the old or the new publication and never a partial one.
pub struct PublicationRegistry {
    /// Live sessions by connection.
    sessions: DashMap<ConnectionId, Arc<Session>>,
    /// Publications by service, then connection.
    services: DashMap<String, Arc<ServicePublications>>,
    diagnostics: Arc<Diagnostics>,
    config: RegistryConfig,
}

impl PublicationRegistry {
    /// Create a registry with its own diagnostics hub.
    pub fn new(config: RegistryConfig) -> Self {
        let diagnostics = Arc::new(Diagnostics::new(config.diagnostic_buffer_size));
        Self::with_diagnostics(config, diagnostics)
    }

    /// Create a registry publishing to an existing diagnostics hub.
    pub fn with_diagnostics(config: RegistryConfig, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            sessions: DashMap::new(),
            services: DashMap::new(),
            diagnostics,
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    // --- Connection lifecycle ---

    /// Start a session for `connection` delivering through `sink`.
    pub fn open_connection(
        &self,
        connection: ConnectionId,
        sink: Arc<dyn DeliverySink>,
    ) -> Result<Arc<Session>> {
        match self.sessions.entry(connection) {
            Entry::Occupied(_) => Err(PublicationError::ConnectionExists(connection)),
            Entry::Vacant(slot) => {
                let session = Arc::new(Session::new(connection, sink));
                slot.insert(session.clone());
                tracing::debug!(%connection, "connection opened");
                Ok(session)
            }
        }
    }

    /// Close `connection`, releasing all of its publications.
    ///
    /// Returns the services that had a publication, or `None` if the
    /// connection was not open. The id can be reopened once this returns.
    pub fn close_connection(&self, connection: ConnectionId) -> Option<Vec<String>> {
        let session = self.session(connection)?;
        let released = session.close(|| self.release_all(connection))?;

        self.sessions
            .remove_if(&connection, |_, current| Arc::ptr_eq(current, &session));

        tracing::debug!(%connection, released = released.len(), "connection closed");
        self.diagnostics.emit(
            Some(connection),
            Diagnostic::ConnectionClosed {
                connection_id: connection,
                released: released.clone(),
            },
        );
        Some(released)
    }

    /// Remove every publication owned by `connection`, dropping services
    /// left with none.
    fn release_all(&self, connection: ConnectionId) -> Vec<String> {
        let mut released = Vec::new();
        self.services.retain(|service, publications| {
            if publications.remove(&connection).is_some() {
                released.push(service.clone());
            }
            !publications.is_empty()
        });
        released.sort_unstable();
        released
    }

    pub fn session(&self, connection: ConnectionId) -> Option<Arc<Session>> {
        self.sessions.get(&connection).map(|s| s.value().clone())
    }

    pub fn is_open(&self, connection: ConnectionId) -> bool {
        self.session(connection).is_some_and(|s| s.is_open())
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    // --- Publications ---

    /// Compile `spec` against `module` and make it the publication for
    /// `(connection, service)`, replacing any previous one.
    ///
    /// Returns the compiled predicate so callers can evaluate it locally.
    pub fn add_publication(
        &self,
        connection: ConnectionId,
        service: &str,
        module: &FilterModule,
        spec: &PublicationSpec,
    ) -> Result<Predicate> {
        let session = self.live_session(connection)?;

        let params = spec.positional_params();
        let predicate = compile(module, &spec.name, &params)?;

        let publication = Arc::new(Publication {
            connection,
            service_name: service.to_string(),
            name: spec.name.clone(),
            params: params.clone(),
            predicate: predicate.clone(),
            if_server: spec.if_server,
            check_before: spec.check_before,
            session: session.clone(),
        });
        let flags = publication.flags();

        session
            .while_open(|| {
                let publications = self
                    .services
                    .entry(service.to_string())
                    .or_insert_with(|| Arc::new(DashMap::new()));
                let replaced = publications.insert(connection, publication);

                tracing::debug!(
                    %connection,
                    service,
                    name = %spec.name,
                    replaced = replaced.is_some(),
                    "publication added"
                );
                self.diagnostics.emit(
                    Some(connection),
                    Diagnostic::AddPublication {
                        service_name: service.to_string(),
                        name: spec.name.clone(),
                        params,
                        if_server: flags.if_server,
                        check_before: flags.check_before,
                        store: flags,
                    },
                );
            })
            .ok_or_else(|| self.stale(connection))?;

        Ok(predicate)
    }

    /// Remove the publication for `(connection, service)` if there is one.
    ///
    /// Returns the keys of the removed publication; empty when nothing was
    /// registered.
    pub fn remove_publication(
        &self,
        connection: ConnectionId,
        service: &str,
    ) -> Result<Vec<String>> {
        let session = self.live_session(connection)?;

        let removed = session
            .while_open(|| {
                let entry = self.services.entry(service.to_string());
                let (removed, keys) = match &entry {
                    Entry::Occupied(occupied) => {
                        let publications = occupied.get();
                        let removed = publications
                            .remove(&connection)
                            .map(|(_, publication)| vec![publication.name.clone()])
                            .unwrap_or_default();
                        let keys = publications
                            .get(&connection)
                            .map(|p| vec![p.name.clone()])
                            .unwrap_or_default();
                        (removed, keys)
                    }
                    Entry::Vacant(_) => (Vec::new(), Vec::new()),
                };

                tracing::debug!(
                    %connection,
                    service,
                    removed = removed.len(),
                    "publication removed"
                );
                self.diagnostics.emit(
                    Some(connection),
                    Diagnostic::RemovePublication {
                        service_name: service.to_string(),
                        keys,
                    },
                );
                if let Entry::Occupied(occupied) = entry {
                    if occupied.get().is_empty() {
                        occupied.remove();
                    }
                }
                removed
            })
            .ok_or_else(|| self.stale(connection))?;

        Ok(removed)
    }

    /// Point-in-time list of publications on `service`.
    pub fn snapshot(&self, service: &str) -> Vec<(ConnectionId, Arc<Publication>)> {
        let map = match self.services.get(service) {
            Some(map) => map.value().clone(),
            None => return Vec::new(),
        };
        map.iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Current publication for `(connection, service)`.
    pub fn publication(&self, connection: ConnectionId, service: &str) -> Option<Arc<Publication>> {
        self.services
            .get(service)
            .and_then(|map| map.get(&connection).map(|p| p.value().clone()))
    }

    /// Services `connection` currently publishes on, sorted.
    pub fn services_for(&self, connection: ConnectionId) -> Vec<String> {
        let mut services: Vec<String> = self
            .services
            .iter()
            .filter(|entry| entry.value().contains_key(&connection))
            .map(|entry| entry.key().clone())
            .collect();
        services.sort_unstable();
        services
    }

    pub fn publication_count(&self) -> usize {
        self.services.iter().map(|entry| entry.value().len()).sum()
    }

    /// Services with at least one publication.
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    fn live_session(&self, connection: ConnectionId) -> Result<Arc<Session>> {
        match self.session(connection) {
            Some(session) if session.is_open() => Ok(session),
            _ => Err(self.stale(connection)),
        }
    }

    fn stale(&self, connection: ConnectionId) -> PublicationError {
        tracing::warn!(%connection, "request on closed connection discarded");
        PublicationError::StaleConnection(connection)
    }
}

impl Default for PublicationRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::StoreFlags;
    use crate::filters;
    use crate::types::Delivery;
    use crossbeam_channel::{bounded, Receiver};
    use serde_json::json;

    fn open(registry: &PublicationRegistry, id: u64) -> Receiver<Delivery> {
        let (tx, rx) = bounded::<Delivery>(16);
        registry.open_connection(ConnectionId(id), Arc::new(tx)).unwrap();
        rx
    }

    fn acct() -> PublicationSpec {
        PublicationSpec::new("query")
            .params(json!({"dept": "acct"}))
            .if_server(true)
    }

    #[test]
    fn test_add_returns_predicate() {
        let registry = PublicationRegistry::default();
        let _rx = open(&registry, 1);

        let predicate = registry
            .add_publication(ConnectionId(1), "messages", &filters::common(), &acct())
            .unwrap();

        assert!(predicate.matches(&json!({"dept": "acct"})));
        assert!(!predicate.matches(&json!({"dept": "xacct"})));
        assert_eq!(registry.publication_count(), 1);
    }

    #[test]
    fn test_add_replaces_previous() {
        let registry = PublicationRegistry::default();
        let _rx = open(&registry, 1);
        let module = filters::common();

        registry
            .add_publication(ConnectionId(1), "messages", &module, &acct())
            .unwrap();
        let second = registry
            .add_publication(
                ConnectionId(1),
                "messages",
                &module,
                &PublicationSpec::new("all").check_before(true),
            )
            .unwrap();

        let snapshot = registry.snapshot("messages");
        assert_eq!(snapshot.len(), 1);
        let (connection, publication) = &snapshot[0];
        assert_eq!(*connection, ConnectionId(1));
        assert_eq!(publication.name(), "all");
        assert!(publication.predicate().ptr_eq(&second));
        assert_eq!(
            publication.flags(),
            StoreFlags {
                if_server: false,
                check_before: true
            }
        );
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = PublicationRegistry::default();
        let _rx = open(&registry, 1);

        registry
            .add_publication(ConnectionId(1), "messages", &filters::common(), &acct())
            .unwrap();

        let removed = registry.remove_publication(ConnectionId(1), "messages").unwrap();
        assert_eq!(removed, vec!["query".to_string()]);

        let removed = registry.remove_publication(ConnectionId(1), "messages").unwrap();
        assert!(removed.is_empty());
        let removed = registry.remove_publication(ConnectionId(1), "never-used").unwrap();
        assert!(removed.is_empty());
    }

    #[test]
    fn test_emptied_services_are_dropped() {
        let registry = PublicationRegistry::default();
        let _a = open(&registry, 1);
        let _b = open(&registry, 2);
        let module = filters::common();

        for i in 0..1_000 {
            let service = format!("svc-{}", i);
            registry
                .add_publication(ConnectionId(1), &service, &module, &acct())
                .unwrap();
            registry.remove_publication(ConnectionId(1), &service).unwrap();
        }
        assert_eq!(registry.services.len(), 0);

        // Shared service survives until its last publication goes
        for id in [1, 2] {
            registry
                .add_publication(ConnectionId(id), "messages", &module, &acct())
                .unwrap();
        }
        registry
            .add_publication(ConnectionId(1), "users", &module, &acct())
            .unwrap();
        registry.close_connection(ConnectionId(1));
        assert_eq!(registry.service_count(), 1);
        assert_eq!(registry.snapshot("messages").len(), 1);

        registry.remove_publication(ConnectionId(2), "messages").unwrap();
        assert_eq!(registry.service_count(), 0);
        assert_eq!(registry.publication_count(), 0);
    }

    #[test]
    fn test_remove_of_unknown_service_creates_nothing() {
        let registry = PublicationRegistry::default();
        let _rx = open(&registry, 1);

        registry.remove_publication(ConnectionId(1), "never-used").unwrap();
        assert_eq!(registry.service_count(), 0);
    }

    #[test]
    fn test_unknown_filter_creates_nothing() {
        let registry = PublicationRegistry::default();
        let _rx = open(&registry, 1);

        let result = registry.add_publication(
            ConnectionId(1),
            "messages",
            &filters::common(),
            &PublicationSpec::new("missing"),
        );

        assert!(matches!(result, Err(PublicationError::UnknownFilter(_))));
        assert_eq!(registry.publication_count(), 0);
    }

    #[test]
    fn test_close_releases_everything() {
        let registry = PublicationRegistry::default();
        let _a = open(&registry, 1);
        let _b = open(&registry, 2);
        let module = filters::common();

        for service in ["messages", "users"] {
            registry
                .add_publication(ConnectionId(1), service, &module, &acct())
                .unwrap();
        }
        registry
            .add_publication(ConnectionId(2), "messages", &module, &acct())
            .unwrap();

        let released = registry.close_connection(ConnectionId(1)).unwrap();
        assert_eq!(released, vec!["messages".to_string(), "users".to_string()]);
        assert!(registry.services_for(ConnectionId(1)).is_empty());
        assert_eq!(registry.services_for(ConnectionId(2)), vec!["messages".to_string()]);
        assert_eq!(registry.connection_count(), 1);

        // Second close is a no-op
        assert!(registry.close_connection(ConnectionId(1)).is_none());
    }

    #[test]
    fn test_closed_connection_is_stale() {
        let registry = PublicationRegistry::default();
        let _rx = open(&registry, 1);
        registry.close_connection(ConnectionId(1));

        let add = registry.add_publication(ConnectionId(1), "messages", &filters::common(), &acct());
        assert!(matches!(add, Err(PublicationError::StaleConnection(ConnectionId(1)))));

        let remove = registry.remove_publication(ConnectionId(1), "messages");
        assert!(matches!(remove, Err(PublicationError::StaleConnection(_))));
        assert_eq!(registry.publication_count(), 0);
    }

    #[test]
    fn test_open_twice_fails_until_closed() {
        let registry = PublicationRegistry::default();
        let _rx = open(&registry, 1);

        let (tx, _rx2) = bounded::<Delivery>(1);
        let again = registry.open_connection(ConnectionId(1), Arc::new(tx.clone()));
        assert!(matches!(again, Err(PublicationError::ConnectionExists(_))));

        registry.close_connection(ConnectionId(1));
        assert!(registry.open_connection(ConnectionId(1), Arc::new(tx)).is_ok());
        assert!(registry.is_open(ConnectionId(1)));
    }

    #[test]
    fn test_stale_session_handle_rejected() {
        let registry = PublicationRegistry::default();
        let _rx = open(&registry, 1);
        let session = registry.session(ConnectionId(1)).unwrap();

        registry.close_connection(ConnectionId(1));
        assert!(!session.is_open());
        assert!(session.while_open(|| ()).is_none());
    }
}
