//! Core types shared by the registry and the router.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque identifier of a transport connection.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Conn({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of mutation a service performed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Created,
    Updated,
    Patched,
    Removed,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Created => "created",
            Operation::Updated => "updated",
            Operation::Patched => "patched",
            Operation::Removed => "removed",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation raised by a service after (or while) it changed a record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub service: String,
    pub operation: Operation,
    /// Pre-mutation candidate, if the service supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    /// Resulting record.
    pub after: Value,
}

impl MutationEvent {
    pub fn new(service: impl Into<String>, operation: Operation, after: Value) -> Self {
        Self {
            service: service.into(),
            operation,
            before: None,
            after,
        }
    }

    pub fn created(service: impl Into<String>, record: Value) -> Self {
        Self::new(service, Operation::Created, record)
    }

    pub fn updated(service: impl Into<String>, record: Value) -> Self {
        Self::new(service, Operation::Updated, record)
    }

    pub fn patched(service: impl Into<String>, record: Value) -> Self {
        Self::new(service, Operation::Patched, record)
    }

    pub fn removed(service: impl Into<String>, record: Value) -> Self {
        Self::new(service, Operation::Removed, record)
    }

    /// Attach the pre-mutation candidate.
    pub fn with_before(mut self, before: Value) -> Self {
        self.before = Some(before);
        self
    }

    /// Record tested by `checkBefore` publications. Falls back to the
    /// resulting record when the service supplied no candidate.
    pub fn candidate(&self) -> &Value {
        self.before.as_ref().unwrap_or(&self.after)
    }
}

/// A filtered event handed to one connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub connection: ConnectionId,
    pub service: String,
    pub operation: Operation,
    pub record: Value,
}

/// Client request describing a publication.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationSpec {
    /// Filter name within the filter module.
    pub name: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub if_server: bool,
    #[serde(default)]
    pub check_before: bool,
}

impl PublicationSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn if_server(mut self, if_server: bool) -> Self {
        self.if_server = if_server;
        self
    }

    pub fn check_before(mut self, check_before: bool) -> Self {
        self.check_before = check_before;
        self
    }

    /// Positional arguments for the filter factory.
    pub fn positional_params(&self) -> Vec<Value> {
        canonical_params(&self.params)
    }
}

/// Turn client-supplied params into a positional argument list.
///
/// Arrays are kept as-is, `null` becomes no arguments, and any other value
/// becomes a single argument.
pub fn canonical_params(params: &Value) -> Vec<Value> {
    match params {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_params() {
        assert_eq!(canonical_params(&Value::Null), Vec::<Value>::new());
        assert_eq!(
            canonical_params(&json!({"dept": "acct"})),
            vec![json!({"dept": "acct"})]
        );
        assert_eq!(canonical_params(&json!([1, "a"])), vec![json!(1), json!("a")]);
    }

    #[test]
    fn test_spec_wire_format() {
        let spec: PublicationSpec = serde_json::from_value(json!({
            "name": "query",
            "params": {"dept": "acct"},
            "ifServer": true
        }))
        .unwrap();

        assert_eq!(spec.name, "query");
        assert!(spec.if_server);
        assert!(!spec.check_before);
        assert_eq!(spec.positional_params(), vec![json!({"dept": "acct"})]);
    }

    #[test]
    fn test_candidate_falls_back_to_after() {
        let event = MutationEvent::created("messages", json!({"id": 1}));
        assert_eq!(event.candidate(), &json!({"id": 1}));

        let event = event.with_before(json!({"id": 0}));
        assert_eq!(event.candidate(), &json!({"id": 0}));
    }

    #[test]
    fn test_operation_wire_names() {
        assert_eq!(serde_json::to_value(Operation::Patched).unwrap(), json!("patched"));
        assert_eq!(Operation::Removed.to_string(), "removed");
    }
}
