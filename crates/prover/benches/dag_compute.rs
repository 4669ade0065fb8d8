use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use poet_crypto::HashKind;
use poet_prover::{DagShape, Params, Prover, ShutdownSignal, Verifier};
use tempfile::TempDir;

const STATEMENT: [u8; 32] = [0x5a; 32];

fn benchmark_dag_compute(c: &mut Criterion) {
    let mut group = c.benchmark_group("dag_compute");
    group.sample_size(10);

    for hash in [HashKind::Sha256, HashKind::Blake3] {
        for n in [10u32, 14] {
            let nodes = DagShape::new(n).map(|shape| shape.node_count()).unwrap_or(0);
            group.throughput(Throughput::Elements(nodes));
            group.bench_with_input(BenchmarkId::new(hash.to_string(), n), &n, |b, &n| {
                b.iter(|| {
                    let dir = TempDir::new().unwrap();
                    let mut prover = Prover::open(
                        STATEMENT,
                        Params::new(n, hash),
                        dir.path().join("bench.labels"),
                    )
                    .unwrap();
                    prover.compute(&ShutdownSignal::new()).unwrap()
                });
            });
        }
    }
    group.finish();
}

fn benchmark_verify_nip(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let params = Params::new(14, HashKind::Sha256);
    let mut prover = Prover::open(STATEMENT, params, dir.path().join("bench.labels")).unwrap();
    prover.compute(&ShutdownSignal::new()).unwrap();
    let (_, proof) = prover.nip().unwrap();
    let verifier = Verifier::new(STATEMENT, params).unwrap();

    c.bench_function("verify_nip_n14_k150", |b| b.iter(|| verifier.verify_nip(&proof)));
}

criterion_group!(benches, benchmark_dag_compute, benchmark_verify_nip);
criterion_main!(benches);
