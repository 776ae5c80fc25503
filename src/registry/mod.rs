//! Publication registry.
//!
//! Tracks, for every open connection, at most one publication per service.
//! Connections are opened with a delivery sink and closed by the transport;
//! closing releases all of the connection's publications before the id can
//! be reused.
//!
//! # Example
//!
//! ```ignore
//! let registry = PublicationRegistry::default();
//! let (tx, rx) = crossbeam_channel::bounded(100);
//! registry.open_connection(ConnectionId(1), Arc::new(tx))?;
//!
//! let predicate = registry.add_publication(
//!     ConnectionId(1),
//!     "messages",
//!     &filters::common(),
//!     &PublicationSpec::new("query").params(json!({"dept": "acct"})),
//! )?;
//! assert!(predicate.matches(&json!({"dept": "acct"})));
//! ```

mod manager;
mod session;
mod types;

pub use manager::PublicationRegistry;
pub use session::{DeliveryOutcome, Session, SessionState};
pub use types::{Publication, RegistryConfig, ALL_SERVICES};
