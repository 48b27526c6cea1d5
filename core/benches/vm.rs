//! Benchmarks for the compiler and the virtual machine.
//!
//! Run with: `cargo bench` in the core/ directory.
//!
//! Benchmark groups:
//! 1. compile: parse + code generation of a loop-heavy script
//! 2. execute: running the compiled program with growing iteration counts

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use nwscript_core::api::{self, CompileOptions, ExecutionOptions};

/// A script whose inner loop runs `n * 10` times and calls the engine once
/// per outer iteration.
fn loop_script(n: usize) -> String {
    format!(
        "void main() {{
            int total = 0;
            int i;
            for (i = 0; i < {}; i++) {{
                int j = 0;
                while (j < 10) {{
                    total += i * j;
                    if (total % 7 == 0) {{
                        total = total / 2;
                    }}
                    j++;
                }}
                PrintInteger(total);
            }}
        }}",
        n
    )
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    let source = loop_script(100);
    group.bench_function("loop_script", |b| {
        b.iter(|| api::compile(black_box(&source), &CompileOptions::default()).expect("Compile failed"))
    });
    group.finish();
}

fn bench_execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute");
    let options = ExecutionOptions {
        cycle_budget: u64::MAX,
        ..ExecutionOptions::default()
    };

    for size in [10, 100, 1000] {
        group.throughput(Throughput::Elements(size as u64 * 10));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let program =
                api::compile(&loop_script(size), &CompileOptions::default()).expect("Compile failed");
            b.iter(|| {
                let result = api::execute(black_box(&program), &options);
                assert!(result.is_halted());
                result
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_execute);
criterion_main!(benches);
