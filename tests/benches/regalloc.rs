//! Criterion benchmarks for location assignment of long traces.

use criterion::{BenchmarkId, Criterion, SamplingMode, criterion_group, criterion_main};
use std::{fmt::Write, hint::black_box, str::FromStr, time::Duration};
use tests::regfile;
use ykra::{Backend, config::Config, trace::Trace};

const SAMPLE_SIZE: usize = 30;
const MEASUREMENT_TIME: Duration = Duration::from_secs(10);
/// How many formal arguments the generated traces have. More than the registers available, so
/// that the benchmarks exercise spilling.
const FORMALS: usize = 8;

/// Generate a loop of `n` add/compare/guard triples that keeps all its formals alive to the end.
fn mk_trace(n: usize) -> String {
    let mut s = String::new();
    let formals = (0..FORMALS).map(|i| format!("i{i}")).collect::<Vec<_>>();
    writeln!(s, "[{}]", formals.join(", ")).unwrap();
    let mut prev = 0;
    for k in 0..n {
        let sum = FORMALS + 2 * k;
        writeln!(s, "i{sum} = int_add(i{prev}, i{})", k % FORMALS).unwrap();
        writeln!(s, "i{} = int_lt(i{sum}, 1000)", sum + 1).unwrap();
        writeln!(s, "guard_true(i{}) [i{sum}, i{}]", sum + 1, (k + 1) % FORMALS).unwrap();
        prev = sum;
    }
    writeln!(s, "jump(i{prev}, {})", formals[1..].join(", ")).unwrap();
    s
}

fn bench_regalloc(c: &mut Criterion) {
    let mut group = c.benchmark_group("regalloc");
    group.sample_size(SAMPLE_SIZE);
    group.measurement_time(MEASUREMENT_TIME);
    group.sampling_mode(SamplingMode::Flat);

    for rf in ["x86_32_minimal", "x86_32"] {
        let backend = Backend::new(regfile(rf).unwrap(), Config::default()).unwrap();
        for n in [100, 1000] {
            let t = Trace::from_str(&mk_trace(n)).unwrap();
            group.bench_function(BenchmarkId::new(rf, n), |b| {
                b.iter(|| backend.compile_loop(black_box(&t)).unwrap())
            });
        }
    }
    group.finish();
}

criterion_group!(regalloc_benchmarks, bench_regalloc);
criterion_main!(regalloc_benchmarks);
