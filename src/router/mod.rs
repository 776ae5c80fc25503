//! Event routing.
//!
//! Every mutation is tested against the publications registered for its
//! service and delivered to each connection whose predicate accepts it.
//! `checkBefore` publications test the pre-mutation candidate, the rest test
//! the resulting record. Server-only fields are visible to `ifServer`
//! predicates but are stripped from what connections receive.

mod dispatch;
mod sink;

pub use dispatch::{EventRouter, RouteSummary, RouterStats};
pub use sink::{ConnectionHandle, DeliverySink, FnSink, SinkStatus};
