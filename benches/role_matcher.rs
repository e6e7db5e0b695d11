use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fleet_rbac::{Role, RoleRecord, Verb};

/// Role with `grants` service-scoped patterns plus a few nested ones
fn create_wide_role(grants: usize) -> Role {
    let mut record = RoleRecord::new("Wide").with_id("wide");
    for i in 0..grants {
        record = record.grant(format!("svc{}/*", i), &[Verb::Get]);
        record = record.grant(format!("svc{}/admin/*/purge", i), &[Verb::Delete]);
    }
    Role::new(record)
}

/// Benchmark a blanket grant (hot path for system roles)
fn bench_blanket_grant(c: &mut Criterion) {
    let role = Role::new(RoleRecord::new("Viewer").grant("*", &[Verb::Get]));

    c.bench_function("blanket_grant_match", |b| {
        b.iter(|| {
            let allowed = role.matches_permission(black_box("users/profile/read"), Verb::Get);
            black_box(allowed);
        });
    });
}

/// Benchmark matching against roles with many patterns
fn bench_wide_role(c: &mut Criterion) {
    let grant_counts = vec![10, 100, 1_000];

    let mut group = c.benchmark_group("wide_role_match");

    for count in grant_counts {
        let role = create_wide_role(count);
        let last = format!("svc{}/admin/users/purge", count - 1);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                black_box(role.matches_permission(black_box(&last), Verb::Delete));
                black_box(role.matches_permission(black_box("unknown/thing"), Verb::Get));
            });
        });
    }

    group.finish();
}

/// Benchmark compiling roles, as done on every sync
fn bench_compile(c: &mut Criterion) {
    let grant_counts = vec![10, 100, 1_000];

    let mut group = c.benchmark_group("role_compile");

    for count in grant_counts {
        let record = create_wide_role(count).to_record();

        group.throughput(Throughput::Elements(count as u64 * 2));
        group.bench_with_input(BenchmarkId::from_parameter(count), &record, |b, record| {
            b.iter(|| black_box(Role::new(record.clone())));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_blanket_grant, bench_wide_role, bench_compile);
criterion_main!(benches);
