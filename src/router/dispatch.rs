//! Routes mutation events to the connections whose publications match.

use crate::diagnostics::{Diagnostic, DropReason};
use crate::registry::{DeliveryOutcome, PublicationRegistry};
use crate::types::{ConnectionId, Delivery, MutationEvent};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counts for a single routed event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouteSummary {
    /// Publications whose predicate accepted the event.
    pub matched: usize,
    /// Matches handed to their connection.
    pub delivered: usize,
    /// Publications whose predicate rejected the event.
    pub suppressed: usize,
    /// Predicates that failed (treated as no match).
    pub failed: usize,
    /// Matches lost to a full, gone, or closing connection.
    pub dropped: usize,
}

/// Cumulative router counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub events: u64,
    pub delivered: u64,
    pub suppressed: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    events: AtomicU64,
    delivered: AtomicU64,
    suppressed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Evaluates each mutation against the registry and delivers matches.
pub struct EventRouter {
    registry: Arc<PublicationRegistry>,
    counters: Counters,
}

impl EventRouter {
    pub fn new(registry: Arc<PublicationRegistry>) -> Self {
        Self {
            registry,
            counters: Counters::default(),
        }
    }

    pub fn registry(&self) -> &Arc<PublicationRegistry> {
        &self.registry
    }

    /// Route one mutation.
    ///
    /// Publications are read once up front; one added while this runs is
    /// picked up by the next event. Predicate failures and delivery problems
    /// stay local to their connection.
    pub fn route(&self, event: &MutationEvent) -> RouteSummary {
        let mut summary = RouteSummary::default();
        let publications = self.registry.snapshot(&event.service);
        self.counters.events.fetch_add(1, Ordering::Relaxed);

        if publications.is_empty() {
            return summary;
        }

        let hidden = self.registry.config().server_fields_for(&event.service);
        let client_after = strip_fields(&event.after, &hidden);
        let client_candidate = strip_fields(event.candidate(), &hidden);
        let mut disconnected = Vec::new();

        for (connection, publication) in publications {
            let tested: &Value = match (publication.check_before, publication.if_server) {
                (true, true) => event.candidate(),
                (true, false) => &*client_candidate,
                (false, true) => &event.after,
                (false, false) => &*client_after,
            };

            match publication.evaluate(tested) {
                Ok(true) => summary.matched += 1,
                Ok(false) => {
                    summary.suppressed += 1;
                    tracing::trace!(%connection, service = %event.service, "event suppressed");
                    continue;
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        %connection,
                        service = %event.service,
                        filter = %publication.name,
                        error = %e,
                        "predicate failed, treating as no match"
                    );
                    self.registry.diagnostics().emit(
                        Some(connection),
                        Diagnostic::PredicateError {
                            service_name: event.service.clone(),
                            connection_id: connection,
                            name: publication.name.clone(),
                            error: e.to_string(),
                        },
                    );
                    continue;
                }
            }

            let delivery = Delivery {
                connection,
                service: event.service.clone(),
                operation: event.operation,
                record: client_after.clone().into_owned(),
            };

            match publication.session.deliver(delivery) {
                DeliveryOutcome::Delivered => {
                    summary.delivered += 1;
                    tracing::trace!(
                        %connection,
                        service = %event.service,
                        op = %event.operation,
                        "event delivered"
                    );
                }
                DeliveryOutcome::Full => {
                    summary.dropped += 1;
                    self.report_drop(connection, &event.service, DropReason::BufferFull);
                }
                DeliveryOutcome::Disconnected => {
                    summary.dropped += 1;
                    self.report_drop(connection, &event.service, DropReason::Disconnected);
                    disconnected.push(connection);
                }
                DeliveryOutcome::Closed => {
                    summary.dropped += 1;
                    tracing::trace!(%connection, "connection closed during routing");
                }
            }
        }

        if self.registry.config().close_on_disconnect {
            for connection in disconnected {
                self.registry.close_connection(connection);
            }
        }

        self.record(&summary);
        summary
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            events: self.counters.events.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    fn record(&self, summary: &RouteSummary) {
        let c = &self.counters;
        c.delivered.fetch_add(summary.delivered as u64, Ordering::Relaxed);
        c.suppressed.fetch_add(summary.suppressed as u64, Ordering::Relaxed);
        c.failed.fetch_add(summary.failed as u64, Ordering::Relaxed);
        c.dropped.fetch_add(summary.dropped as u64, Ordering::Relaxed);
    }

    fn report_drop(&self, connection: ConnectionId, service: &str, reason: DropReason) {
        tracing::warn!(%connection, service, ?reason, "delivery dropped");
        self.registry.diagnostics().emit(
            Some(connection),
            Diagnostic::DeliveryDropped {
                service_name: service.to_string(),
                connection_id: connection,
                reason,
            },
        );
    }
}

/// Copy of `record` without the top-level `fields`; borrowed when there is
/// nothing to remove.
fn strip_fields<'a>(record: &'a Value, fields: &[&str]) -> Cow<'a, Value> {
    match record {
        Value::Object(map) if fields.iter().any(|f| map.contains_key(*f)) => {
            let mut map = map.clone();
            for field in fields {
                map.remove(*field);
            }
            Cow::Owned(Value::Object(map))
        }
        _ => Cow::Borrowed(record),
    }
}
