//! Performance benchmarks for publication routing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use publications::{
    filters, ConnectionHandle, ConnectionId, MutationEvent, PublicationServer, PublicationSpec,
    RegistryConfig,
};
use serde_json::json;
use std::sync::Arc;

fn create_server(connections: u64) -> (PublicationServer, Vec<ConnectionHandle>) {
    let config = RegistryConfig {
        buffer_size: 1_000_000,
        ..Default::default()
    };
    let server = PublicationServer::new(Arc::new(filters::common()), config);
    let handles = (0..connections)
        .map(|id| {
            let handle = server.open_connection(ConnectionId(id)).unwrap();
            // Half the connections match
            let dept = if id % 2 == 0 { "acct" } else { "sales" };
            server
                .add_publication(
                    ConnectionId(id),
                    "messages",
                    &PublicationSpec::new("query").params(json!({ "dept": dept })),
                )
                .unwrap();
            handle
        })
        .collect();
    (server, handles)
}

/// Benchmark routing one mutation across a growing number of connections
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for connections in [10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("connections", connections),
            &connections,
            |b, &connections| {
                let (server, handles) = create_server(connections);
                let event = MutationEvent::created("messages", json!({"name": "john", "dept": "acct"}));

                b.iter(|| {
                    let summary = server.publish(black_box(&event));
                    for handle in &handles {
                        handle.drain();
                    }
                    summary
                });
            },
        );
    }

    group.finish();
}

/// Benchmark compiling and replacing a publication
fn bench_add_publication(c: &mut Criterion) {
    let (server, _handles) = create_server(1);
    let spec = PublicationSpec::new("query").params(json!({
        "dept": "acct",
        "age": {"$gte": 18},
        "$or": [{"role": "admin"}, {"role": "staff"}]
    }));

    c.bench_function("add_publication_replace", |b| {
        b.iter(|| {
            server
                .add_publication(ConnectionId(0), "messages", black_box(&spec))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_fan_out, bench_add_publication);
criterion_main!(benches);
