use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use ticketeer_core::{
    Authentication, ExpirationPolicy, GrantingTicket, Principal, Service, ServiceTicket, Ticket,
    TicketId, UniqueTicketIdGenerator,
};
use ticketeer_infra::cipher::{AesGcmCipherExecutor, CipherExecutor, CipherKeys, NoOpCipherExecutor};
use ticketeer_infra::id_generator::HostNameBasedUniqueTicketIdGenerator;
use ticketeer_infra::registry::{InMemoryRegistryConfig, InMemoryTicketRegistry, Mutation, TicketRegistry};

fn registries() -> Vec<(&'static str, InMemoryTicketRegistry)> {
    let plain: Arc<dyn CipherExecutor> = Arc::new(NoOpCipherExecutor);
    let encrypted: Arc<dyn CipherExecutor> =
        Arc::new(AesGcmCipherExecutor::new("bench", CipherKeys::generate()));
    vec![
        ("plain", InMemoryTicketRegistry::with_cipher(InMemoryRegistryConfig::default(), plain)),
        ("encrypted", InMemoryTicketRegistry::with_cipher(InMemoryRegistryConfig::default(), encrypted)),
    ]
}

fn session(id: TicketId) -> Ticket {
    let now = Utc::now();
    GrantingTicket::new_ticket_granting(
        id,
        Authentication::new(Principal::new("casuser").with_attribute("mail", "casuser@example.org"), now),
        ExpirationPolicy::ticket_granting(28_800, 7_200),
        now,
    )
    .into()
}

fn service_ticket(id: TicketId) -> Ticket {
    ServiceTicket::new_service(
        id,
        TicketId::new("TGT-bench"),
        Service::new("https://app.example/login"),
        true,
        ExpirationPolicy::multi_use_or_timeout(1, 10),
        Utc::now(),
    )
    .into()
}

fn bench_id_generation(c: &mut Criterion) {
    let generator = HostNameBasedUniqueTicketIdGenerator::new(64, "cas.example").unwrap();
    c.bench_function("id_generation", |b| {
        b.iter(|| black_box(generator.new_ticket_id("ST")))
    });
}

fn bench_add_and_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_add_get");
    group.throughput(Throughput::Elements(1));

    for (name, registry) in registries() {
        let counter = AtomicU64::new(0);
        group.bench_with_input(BenchmarkId::new("add", name), &registry, |b, registry| {
            b.iter(|| {
                let n = counter.fetch_add(1, Ordering::Relaxed);
                registry.add(session(TicketId::new(format!("TGT-{n}")))).unwrap();
            })
        });

        let id = TicketId::new("TGT-lookup");
        registry.add(session(id.clone())).unwrap();
        group.bench_with_input(BenchmarkId::new("get", name), &registry, |b, registry| {
            b.iter(|| black_box(registry.get(&id).unwrap()))
        });
    }
    group.finish();
}

fn bench_consume(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_consume");
    group.throughput(Throughput::Elements(1));

    for (name, registry) in registries() {
        let counter = AtomicU64::new(0);
        group.bench_with_input(BenchmarkId::new("add_then_consume", name), &registry, |b, registry| {
            b.iter(|| {
                let n = counter.fetch_add(1, Ordering::Relaxed);
                let id = TicketId::new(format!("ST-{n}"));
                registry.add(service_ticket(id.clone())).unwrap();
                let consumed = registry
                    .mutate(&id, &mut |t| {
                        t.record_use(Utc::now());
                        Mutation::Remove
                    })
                    .unwrap();
                black_box(consumed)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_id_generation, bench_add_and_get, bench_consume);
criterion_main!(benches);
