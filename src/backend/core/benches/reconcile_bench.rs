//! Benchmarks for policy compilation, desired-state synthesis and diffing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tessera_core::policy::PolicyCompiler;
use tessera_core::reconcile::{DesiredState, LiveState, Reconciler};
use tessera_core::topology::{AccountId, AccountKind, Scope, Topology, TopologyBuilder};

const MANAGEMENT: &str = "100000000000";

/// `accounts` targets, `scopes` scopes, and one user per (scope, account) pair.
fn build_topology(accounts: usize, scopes: usize) -> Topology {
    let mut builder = TopologyBuilder::new();
    builder.add_account(MANAGEMENT, "mgmt", AccountKind::Management).unwrap();
    for a in 0..accounts {
        builder
            .add_account(format!("2{:011}", a), format!("acct{a}"), AccountKind::Target)
            .unwrap();
    }
    for s in 0..scopes {
        builder
            .add_scope(Scope::new(format!("scope{s}")).allow(format!("svc{s}:*")).deny(format!("svc{s}:Delete*")))
            .unwrap();
    }
    for s in 0..scopes {
        for a in 0..accounts {
            builder
                .add_assignment(format!("user-{s}-{a}"), format!("scope{s}"), format!("acct{a}"))
                .unwrap();
        }
    }
    builder.snapshot().unwrap()
}

fn users_only(topology: &Topology) -> LiveState {
    LiveState::new().with_users(&AccountId::new(MANAGEMENT), topology.users())
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_scopes");
    for scopes in [10, 100, 500] {
        let topology = build_topology(1, scopes);
        let compiler = PolicyCompiler::default();
        group.throughput(Throughput::Elements(scopes as u64));
        group.bench_with_input(BenchmarkId::from_parameter(scopes), &topology, |b, t| {
            b.iter(|| black_box(compiler.compile_all(t).unwrap()));
        });
    }
    group.finish();
}

fn bench_synthesize(c: &mut Criterion) {
    let mut group = c.benchmark_group("synthesize");
    for (accounts, scopes) in [(2, 5), (10, 20), (25, 40)] {
        let topology = build_topology(accounts, scopes);
        let compiler = PolicyCompiler::default();
        group.throughput(Throughput::Elements((accounts * scopes) as u64));
        group.bench_with_input(
            BenchmarkId::new("pairs", accounts * scopes),
            &topology,
            |b, t| b.iter(|| black_box(DesiredState::synthesize(t, &compiler).unwrap())),
        );
    }
    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");
    let reconciler = Reconciler::default();
    for (accounts, scopes) in [(2, 5), (10, 20), (25, 40)] {
        let topology = build_topology(accounts, scopes);
        let desired = DesiredState::synthesize(&topology, &PolicyCompiler::default()).unwrap();
        let empty = users_only(&topology);
        let converged = desired.to_live().unwrap();
        let pairs = accounts * scopes;

        group.throughput(Throughput::Elements(pairs as u64));
        group.bench_with_input(BenchmarkId::new("from_empty", pairs), &empty, |b, live| {
            b.iter(|| black_box(reconciler.diff(&desired, live).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("converged", pairs), &converged, |b, live| {
            b.iter(|| black_box(reconciler.diff(&desired, live).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_synthesize, bench_diff);
criterion_main!(benches);
