//! Performance benchmarks for classification and execution

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pwsync::store::MemoryStore;
use pwsync::sync::{
    AlwaysApply, ConflictPolicy, ExecuteOptions, IdentityResolver, ReconciliationEngine,
    SyncPlanExecutor,
};
use pwsync::types::CanonicalRecord;

/// Two stores sharing most keys: a tenth differ, a tenth only in each side
fn fixture(n: usize) -> (Vec<CanonicalRecord>, Vec<CanonicalRecord>) {
    let now = Utc::now();
    let mut source = Vec::with_capacity(n);
    let mut target = Vec::with_capacity(n);

    for i in 0..n {
        let folder = format!("Folder{}", i % 20);
        let record = CanonicalRecord::new([folder], format!("Site {}", i), "user", "secret")
            .with_url(format!("https://site{}.example", i))
            .modified_at(now);

        match i % 10 {
            0 => source.push(record),
            1 => target.push(record),
            2 => {
                let mut older = record.clone().modified_at(now - Duration::hours(1));
                older.secret = "stale".to_string();
                source.push(record);
                target.push(older);
            }
            _ => {
                source.push(record.clone());
                target.push(record);
            }
        }
    }

    (source, target)
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");

    for size in [100, 1_000, 10_000] {
        let (source, target) = fixture(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("classify", size), &size, |b, _| {
            let engine = ReconciliationEngine::default();
            b.iter(|| {
                let ops = engine
                    .reconcile(black_box(&source), black_box(&target))
                    .unwrap();
                ConflictPolicy::new().apply(ops)
            })
        });
    }

    group.finish();
}

fn bench_dry_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute");
    let (source, target_records) = fixture(1_000);
    let target = MemoryStore::new("to").with_records(target_records.clone());
    let ops = ConflictPolicy::new().apply(
        ReconciliationEngine::default()
            .reconcile(&source, &target_records)
            .unwrap(),
    );
    let executor = SyncPlanExecutor::new(
        ExecuteOptions {
            dry_run: true,
            ..Default::default()
        },
        IdentityResolver::default(),
    );

    group.bench_function("dry_run_1000", |b| {
        b.iter(|| executor.execute(black_box(ops.clone()), &target, &mut AlwaysApply))
    });

    group.finish();
}

criterion_group!(benches, bench_reconcile, bench_dry_run);
criterion_main!(benches);
