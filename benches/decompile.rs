//! Benchmarks for the decompilation pipeline.
//!
//! Measures each stage on generated functions of growing size:
//! - Translation and CFG construction
//! - SSA construction
//! - Type inference
//! - Structure recovery
//! - The full pipeline, sequential and parallel

extern crate irscope;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use irscope::{
    analysis::{build_cfg, recover_structure, ControlFlowGraph, JumpTables, SsaBuilder},
    config::{StructureConfig, TypeConfig},
    ir::IrProgram,
    prelude::*,
};
use std::hint::black_box;

const SIZES: [usize; 3] = [4, 16, 64];

/// A function made of `loops` counted loops, each with an if/else in its body.
fn listing(loops: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for _ in 0..loops {
        let base = 0x1000 + 4 * lines.len() as u64;
        lines.push("mov r1, 0".to_string());
        lines.push(format!("bge r1, 10, 0x{:x}", base + 4 * 8));
        lines.push(format!("beqz r2, 0x{:x}", base + 4 * 5));
        lines.push("add r3, r3, r1".to_string());
        lines.push(format!("b 0x{:x}", base + 4 * 6));
        lines.push("sub r3, r3, 1".to_string());
        lines.push("add r1, r1, 1".to_string());
        lines.push(format!("b 0x{:x}", base + 4));
    }
    lines.push("ret".to_string());
    lines
}

fn input(loops: usize) -> FunctionInput {
    let lines = listing(loops);
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    FunctionInput::from_listing(0x1000, 4, &refs).unwrap()
}

fn cfg(input: &FunctionInput) -> ControlFlowGraph {
    let mut translator = Translator::new(Generic::default());
    let mut program = IrProgram::new();
    for insn in &input.instructions {
        let ops = translator.translate(insn).unwrap();
        program.add_instruction(insn.address, insn.length, ops).unwrap();
    }
    build_cfg(&mut program, &JumpTables::new(), &Diagnostics::new()).unwrap()
}

/// Benchmark translation plus CFG construction.
fn bench_build_cfg(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_cfg");
    for loops in SIZES {
        let input = input(loops);
        group.bench_with_input(BenchmarkId::from_parameter(loops), &input, |b, input| {
            b.iter(|| black_box(cfg(black_box(input))));
        });
    }
    group.finish();
}

/// Benchmark SSA construction on a prebuilt CFG.
fn bench_ssa(c: &mut Criterion) {
    let mut group = c.benchmark_group("ssa");
    for loops in SIZES {
        let graph = cfg(&input(loops));
        group.bench_with_input(BenchmarkId::from_parameter(loops), &graph, |b, graph| {
            b.iter(|| black_box(SsaBuilder::build(black_box(graph)).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark type inference on a prebuilt SSA function.
fn bench_types(c: &mut Criterion) {
    let config = TypeConfig::default();
    let mut group = c.benchmark_group("types");
    for loops in SIZES {
        let graph = cfg(&input(loops));
        let function = SsaBuilder::build(&graph).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(loops), &function, |b, function| {
            b.iter(|| {
                let types =
                    TypeInference::new(&config).infer_ssa(black_box(function), &Diagnostics::new());
                black_box(types)
            });
        });
    }
    group.finish();
}

/// Benchmark structure recovery on a prebuilt CFG.
fn bench_structure(c: &mut Criterion) {
    let config = StructureConfig::default();
    let mut group = c.benchmark_group("structure");
    for loops in SIZES {
        let graph = cfg(&input(loops));
        group.bench_with_input(BenchmarkId::from_parameter(loops), &graph, |b, graph| {
            b.iter(|| black_box(recover_structure(black_box(graph), &config)));
        });
    }
    group.finish();
}

/// Benchmark the whole pipeline on one function.
fn bench_decompile(c: &mut Criterion) {
    let decompiler = Decompiler::new(Generic::default(), DecompilerConfig::default());
    let mut group = c.benchmark_group("decompile");
    for loops in SIZES {
        let input = input(loops);
        group.bench_with_input(BenchmarkId::from_parameter(loops), &input, |b, input| {
            b.iter(|| black_box(decompiler.decompile(black_box(input)).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark decompiling a batch of functions in parallel.
fn bench_decompile_all(c: &mut Criterion) {
    let decompiler = Decompiler::new(Generic::default(), DecompilerConfig::default());
    let inputs: Vec<FunctionInput> = (0..64).map(|_| input(8)).collect();

    c.bench_function("decompile_all_64", |b| {
        b.iter(|| black_box(decompiler.decompile_all(black_box(&inputs))));
    });
}

criterion_group!(
    benches,
    bench_build_cfg,
    bench_ssa,
    bench_types,
    bench_structure,
    bench_decompile,
    bench_decompile_all,
);
criterion_main!(benches);
