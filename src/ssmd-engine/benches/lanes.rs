// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use ssmd_engine::bytecode::{Function, NamedConstant, Opcode};
use ssmd_engine::{
    DataType, EngineContext, Encoding, ExecuteOptions, FailurePolicy, Interpreter, Lanes, Package,
    PackageBuilder,
};

/// A loop-free kernel touching the common paths: arithmetic on slots,
/// vectors, cdata lookups and the stack.
fn kernel() -> Package {
    let mut b = PackageBuilder::new().with_stack(4);
    let a = b.scalar(0.0).unwrap();
    let index = b.scalar(0.0).unwrap();
    let y = b.scalar(0.0).unwrap();
    let v = b.declare(DataType::Numeric, &[0.0, 0.0, 0.0]).unwrap();
    let table = b.cdata(Encoding::Half, &[0.0, 0.25, 0.5, 0.75]).unwrap();

    b.op(Opcode::Push).id(a).unwrap();
    b.op(Opcode::Assign).id(y).unwrap();
    b.id(a).unwrap().op(Opcode::Multiply).constant(1.5).op(Opcode::Add);
    b.op(Opcode::IndexN).cdata_ref(table).unwrap();
    b.id(index).unwrap().op(Opcode::End);
    b.op(Opcode::Assignf).id(v).unwrap();
    b.function(Function::ExpandV3).id(y).unwrap();
    b.op(Opcode::Assign).id(v).unwrap();
    b.function(Function::Normalize).id(v).unwrap();
    b.op(Opcode::Multiply).named(NamedConstant::Pi).op(Opcode::End);
    b.op(Opcode::Assign).id(y).unwrap();
    b.op(Opcode::Pop).op(Opcode::Add).function(Function::Dot).id(v).unwrap().id(v).unwrap();
    b.op(Opcode::End).op(Opcode::Ret);
    b.finish().unwrap()
}

fn arena(package: &Package, lanes: usize, stride: usize) -> Vec<f32> {
    let mut arena = vec![0.0; lanes * stride];
    for lane in 0..lanes {
        arena[lane * stride] = lane as f32 * 0.01;
        arena[lane * stride + 1] = (lane % 4) as f32;
    }
    debug_assert!(stride >= package.row_len());
    arena
}

fn bench_execute(c: &mut Criterion) {
    let package = kernel();
    let ctx = EngineContext::new();
    let row = package.row_len();
    let mut group = c.benchmark_group("execute");

    for policy in [FailurePolicy::Verbose, FailurePolicy::Silent] {
        let mut interpreter = Interpreter::new(ExecuteOptions {
            failure_policy: policy,
            ..ExecuteOptions::default()
        });
        interpreter.set_package(&package).unwrap();

        for &n in &[4usize, 64, 1024, 16384] {
            group.throughput(Throughput::Elements(n as u64));
            let mut data = arena(&package, n, row);
            group.bench_with_input(
                BenchmarkId::new(format!("{policy:?}"), n),
                &n,
                |b, &n| {
                    b.iter(|| {
                        let mut lanes = Lanes::strided(&mut data, row, n);
                        interpreter.execute(&ctx, None, &mut lanes, true).unwrap()
                    })
                },
            );
        }
    }
    group.finish();
}

fn bench_scattered(c: &mut Criterion) {
    let package = kernel();
    let ctx = EngineContext::new();
    let row = package.row_len();
    let mut interpreter = Interpreter::new(ExecuteOptions {
        failure_policy: FailurePolicy::Silent,
        ..ExecuteOptions::default()
    });
    interpreter.set_package(&package).unwrap();

    let n = 1024;
    // every other lane gets one element of padding
    let bases: Vec<usize> = (0..n).map(|i| i * row + i / 2).collect();
    let mut data = arena(&package, n + 1, row + 1);

    c.bench_function("execute_scattered_1024", |b| {
        b.iter(|| {
            let mut lanes = Lanes::with_bases(&mut data, bases.clone());
            interpreter.execute(&ctx, None, &mut lanes, true).unwrap()
        })
    });
}

criterion_group!(benches, bench_execute, bench_scattered);
criterion_main!(benches);
