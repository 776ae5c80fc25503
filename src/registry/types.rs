//! Publication records and registry configuration.

use crate::diagnostics::StoreFlags;
use crate::error::FilterError;
use crate::filters::Predicate;
use crate::types::ConnectionId;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::session::Session;

/// Service key whose server-only fields apply to every service.
pub const ALL_SERVICES: &str = "*";

/// Configuration for a registry.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Max queued deliveries per connection before deliveries are dropped.
    /// Default: 1000
    pub buffer_size: usize,

    /// Max queued events per diagnostic listener.
    /// Default: 1024
    pub diagnostic_buffer_size: usize,

    /// Fields only predicates of `ifServer` publications may see, by
    /// service name. Never delivered to clients.
    pub server_fields: HashMap<String, Vec<String>>,

    /// Close a connection as soon as its sink reports the peer gone.
    /// Default: true
    pub close_on_disconnect: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            diagnostic_buffer_size: 1024,
            server_fields: HashMap::new(),
            close_on_disconnect: true,
        }
    }
}

impl RegistryConfig {
    /// Mark `fields` of `service` as server-only. Use [`ALL_SERVICES`] to
    /// apply them everywhere.
    pub fn with_server_fields<I, S>(mut self, service: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.server_fields
            .entry(service.into())
            .or_default()
            .extend(fields.into_iter().map(Into::into));
        self
    }

    /// Server-only fields in effect for `service`.
    pub fn server_fields_for(&self, service: &str) -> Vec<&str> {
        let mut fields: Vec<&str> = [ALL_SERVICES, service]
            .iter()
            .filter_map(|key| self.server_fields.get(*key))
            .flatten()
            .map(String::as_str)
            .collect();
        fields.sort_unstable();
        fields.dedup();
        fields
    }
}

/// An active publication: one connection's interest in one service.
pub struct Publication {
    pub(crate) connection: ConnectionId,
    pub(crate) service_name: String,
    pub(crate) name: String,
    pub(crate) params: Vec<Value>,
    pub(crate) predicate: Predicate,
    pub(crate) if_server: bool,
    pub(crate) check_before: bool,
    /// Owning session, used by the router for delivery.
    pub(crate) session: Arc<Session>,
}

impl Publication {
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Filter name this publication was compiled from.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn if_server(&self) -> bool {
        self.if_server
    }

    pub fn check_before(&self) -> bool {
        self.check_before
    }

    pub fn flags(&self) -> StoreFlags {
        StoreFlags {
            if_server: self.if_server,
            check_before: self.check_before,
        }
    }

    pub fn evaluate(&self, record: &Value) -> Result<bool, FilterError> {
        self.predicate.evaluate(record)
    }
}

impl fmt::Debug for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publication")
            .field("connection", &self.connection)
            .field("service_name", &self.service_name)
            .field("name", &self.name)
            .field("params", &self.params)
            .field("if_server", &self.if_server)
            .field("check_before", &self.check_before)
            .finish()
    }
}
