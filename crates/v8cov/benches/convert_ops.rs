//! Conversion Benchmarks
//!
//! Benchmarks for range lookup, script conversion and map merging.
//!
//! Run with: `cargo bench --bench convert_ops`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use v8cov::convert::{convert, ConvertTask};
use v8cov::istanbul::CoverageMap;
use v8cov::pool::executor_for;
use v8cov::v8::{RangeIndex, V8Function, V8Range};

/// A script of `n` small functions, each with its own range
fn synthetic_script(n: usize) -> (String, Vec<V8Function>) {
    let mut code = String::new();
    let mut ranges = Vec::with_capacity(n + 1);
    for i in 0..n {
        let start = code.len() as u32;
        code.push_str(&format!(
            "function f{i}(a) {{\n  if (a > {i}) {{\n    return a && {i};\n  }}\n  return a ? 1 : 0;\n}}\n"
        ));
        ranges.push(V8Range::new(start, code.len() as u32, (i % 3) as u64));
    }
    ranges.insert(0, V8Range::new(0, code.len() as u32, 1));
    let functions = vec![V8Function {
        function_name: String::new(),
        is_block_coverage: true,
        ranges,
    }];
    (code, functions)
}

fn bench_range_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_lookup");

    for n in [10, 100, 1000] {
        let (code, functions) = synthetic_script(n);
        let index = RangeIndex::from_functions(&functions);
        let len = code.len() as u32;
        group.bench_with_input(BenchmarkId::from_parameter(n), &index, |bench, index| {
            bench.iter(|| {
                let mut total = 0u64;
                for offset in (0..len).step_by(7) {
                    total += index.count_or_zero(black_box(offset));
                }
                black_box(total);
            });
        });
    }

    group.finish();
}

fn bench_convert_script(c: &mut Criterion) {
    let mut group = c.benchmark_group("convert_script");

    for n in [10, 100, 500] {
        let (code, functions) = synthetic_script(n);
        let task = ConvertTask::new("bench.js", code, functions);
        group.bench_with_input(BenchmarkId::from_parameter(n), &task, |bench, task| {
            bench.iter(|| black_box(convert(black_box(task))));
        });
    }

    group.finish();
}

fn bench_executors(c: &mut Criterion) {
    let mut group = c.benchmark_group("executors");
    let tasks: Vec<ConvertTask> = (0..16)
        .map(|i| {
            let (code, functions) = synthetic_script(50);
            ConvertTask::new(format!("bench{i}.js"), code, functions)
        })
        .collect();

    for workers in [0, 2, 4] {
        let executor = executor_for(workers);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{workers}_workers")),
            &tasks,
            |bench, tasks| {
                bench.iter(|| black_box(executor.execute_all(tasks.clone())));
            },
        );
        executor.shutdown();
    }

    group.finish();
}

fn bench_map_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_merge");

    for files in [10, 100] {
        let fragments: Vec<_> = (0..files)
            .flat_map(|i| {
                let (code, functions) = synthetic_script(5);
                convert(&ConvertTask::new(format!("src/f{i}.js"), code, functions)).files
            })
            .collect();
        group.bench_with_input(
            BenchmarkId::from_parameter(files),
            &fragments,
            |bench, fragments| {
                bench.iter(|| {
                    let mut map = CoverageMap::new();
                    for fragment in fragments.iter().chain(fragments.iter()) {
                        map.add_file_coverage(fragment.clone());
                    }
                    black_box(map.summary());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_range_lookup,
    bench_convert_script,
    bench_executors,
    bench_map_merge
);
criterion_main!(benches);
