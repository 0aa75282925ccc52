use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use xyopt::ir::Module;
use xyopt::pass::{Pass, PassContext, PassDescriptor, PassError};
use xyopt::passes::standard_registry;
use xyopt::registry::{PassRegistry, RegistryBuilder};
use xyopt::scheduler::PassManager;
use xyopt::*;

// Scheduler latency scenarios over the standard pass set and synthetic registries.

const ARITH: &str = include_str!("../demos/arith.xy");
const BRANCHES: &str = include_str!("../demos/branches.xy");

fn scenarios() -> [(&'static str, &'static str); 2] {
    [("arith", ARITH), ("branches", BRANCHES)]
}

/// Straight-line function with `n_insts` foldable instructions.
fn generate_scaling_module(n_insts: usize) -> String {
    let mut src = String::from("fn f(%0) {\nentry:\n  %1 = const 1\n");
    for i in 2..n_insts + 2 {
        let op = if i % 3 == 0 { "mul" } else { "add" };
        src.push_str(&format!("  %{} = {} %{}, {}\n", i, op, i - 1, i % 4));
    }
    src.push_str(&format!("  ret %{}\n}}\n", n_insts + 1));
    src
}

fn parse_module(source: &str) -> Module {
    parser::parse(source)
        .module
        .expect("benchmark scenario must parse")
}

struct Quiet;

impl Pass for Quiet {
    fn run(&mut self, _module: &mut Module) -> Result<bool, PassError> {
        Ok(false)
    }
}

/// Analysis chain `a0 <- a1 <- ... <- a{n-1}` capped by a transformation
/// that requires the last link and invalidates the first.
fn chain_registry(n: usize) -> PassRegistry {
    let names: Vec<&'static str> = (0..n)
        .map(|i| &*Box::leak(format!("a{i}").into_boxed_str()))
        .collect();
    let mut builder = RegistryBuilder::new();
    let quiet = |_: &PassContext| -> Box<dyn Pass> { Box::new(Quiet) };
    for (i, &name) in names.iter().enumerate() {
        let mut descriptor = PassDescriptor::analysis(name);
        if i > 0 {
            descriptor = descriptor.requires(names[i - 1]);
        }
        builder.register(descriptor, quiet).expect("chain link");
    }
    let sink = PassDescriptor::transformation("sink")
        .requires(names[n - 1])
        .invalidates(names[0]);
    builder.register(sink, quiet).expect("chain sink");
    builder.initialize().expect("chain registry")
}

// Reader latency for the demo inputs.
fn bench_parse_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler/parse_latency");

    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| {
                let result = parser::parse(black_box(source));
                black_box(&result.module);
            });
        });
    }

    group.finish();
}

// One scheduling round over the standard pass set, per optimization level.
fn bench_run_once(c: &mut Criterion) {
    let registry = standard_registry().expect("standard registry");

    for level in [0u32, 1, 2] {
        let mut group = c.benchmark_group(format!("scheduler/run_once/O{}", level));
        for (name, source) in scenarios() {
            group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
                b.iter_batched(
                    || parse_module(source),
                    |mut module| {
                        let mut pm = PassManager::new(&registry, level);
                        let changed = pm.run_once(black_box(&mut module));
                        black_box((changed, pm.take_trace()));
                    },
                    BatchSize::SmallInput,
                );
            });
        }
        group.finish();
    }
}

// Fixed-point driving vs module size.
fn bench_fixed_point_scaling(c: &mut Criterion) {
    let registry = standard_registry().expect("standard registry");
    let mut group = c.benchmark_group("scheduler/fixed_point_scaling");

    for n_insts in [8_usize, 32, 128, 512] {
        let source = generate_scaling_module(n_insts);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}insts", n_insts)),
            &source,
            |b, source| {
                b.iter_batched(
                    || parse_module(source),
                    |mut module| {
                        let mut pm = PassManager::new(&registry, 2);
                        black_box(pm.run_to_fixed_point(&mut module, 16))
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

// Registry validation and requirement resolution vs chain length.
fn bench_registry_scaling(c: &mut Criterion) {
    {
        let mut group = c.benchmark_group("scheduler/registry/standard");
        group.bench_function("initialize", |b| {
            b.iter(|| black_box(standard_registry()));
        });
        group.finish();
    }

    let mut group = c.benchmark_group("scheduler/registry/chain");
    for n in [16_usize, 64, 200] {
        let registry = chain_registry(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &registry, |b, registry| {
            b.iter(|| {
                let mut pm = PassManager::new(registry, 0);
                let mut module = Module::new();
                black_box(pm.run_pass(&mut module, "sink"))
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_parse_latency,
    bench_run_once,
    bench_fixed_point_scaling,
    bench_registry_scaling,
);
criterion_main!(benches);
