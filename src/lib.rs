//! # Publications
//!
//! Server-side publication support for collection services: each connection
//! declares which mutations of a service it wants to hear about, and every
//! create, update, patch or remove is delivered only to the connections
//! whose publication accepts it.
//!
//! ## Core Concepts
//!
//! - **Filter modules**: read-only maps of named predicate factories
//! - **Publications**: one compiled predicate per connection and service
//! - **Router**: fans each mutation out to matching connections
//! - **Diagnostics**: typed stream of registry and routing transitions
//!
//! ## Example
//!
//! ```ignore
//! use publications::{filters, ConnectionId, MutationEvent, PublicationServer, PublicationSpec};
//!
//! let server = PublicationServer::new(Arc::new(filters::common()), Default::default());
//! let conn = server.open_connection(ConnectionId(1))?;
//!
//! let predicate = server.add_publication(
//!     ConnectionId(1),
//!     "messages",
//!     &PublicationSpec::new("query").params(json!({"dept": "acct"})).if_server(true),
//! )?;
//!
//! server.publish(&MutationEvent::created("messages", json!({"name": "john", "dept": "acct"})));
//! let delivery = conn.recv()?;
//! ```

pub mod diagnostics;
pub mod error;
pub mod filters;
pub mod registry;
pub mod router;
pub mod server;
pub mod types;

// Re-exports
pub use diagnostics::{Diagnostic, DiagnosticHandle, Diagnostics, DropReason, StoreFlags};
pub use error::{FilterError, PublicationError, Result};
pub use filters::{compile, FilterFactory, FilterModule, FilterModuleBuilder, Predicate};
pub use registry::{
    DeliveryOutcome, Publication, PublicationRegistry, RegistryConfig, Session, SessionState,
    ALL_SERVICES,
};
pub use router::{
    ConnectionHandle, DeliverySink, EventRouter, FnSink, RouteSummary, RouterStats, SinkStatus,
};
pub use server::{Inbound, PublicationServer};
pub use types::*;
