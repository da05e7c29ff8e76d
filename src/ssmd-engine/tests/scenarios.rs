// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use float_cmp::approx_eq;

use ssmd_engine::bytecode::{ExtOp, Function, NamedConstant, Opcode};
use ssmd_engine::{
    DataType, EngineContext, Encoding, ErrorCode, ErrorKind, ExecuteOptions, ExecutionSummary,
    ExternalFunction, FailurePolicy, Interpreter, Lanes, Package, PackageBuilder, PackageMode,
    Result, execute,
};

fn verbose() -> ExecuteOptions {
    ExecuteOptions {
        failure_policy: FailurePolicy::Verbose,
        ..ExecuteOptions::default()
    }
}

fn silent() -> ExecuteOptions {
    ExecuteOptions {
        failure_policy: FailurePolicy::Silent,
        ..ExecuteOptions::default()
    }
}

/// Run `package` over lanes whose rows start out as `rows`, returning the
/// rows afterwards along with the call's result.
fn run_rows(
    package: &Package,
    ctx: &EngineContext,
    rows: &[Vec<f32>],
    options: ExecuteOptions,
) -> (Vec<Vec<f32>>, Result<ExecutionSummary>) {
    let stride = package.row_len();
    let mut arena = vec![0.0f32; stride * rows.len()];
    for (lane, row) in rows.iter().enumerate() {
        arena[lane * stride..lane * stride + row.len()].copy_from_slice(row);
    }
    let result = {
        let mut lanes = Lanes::strided(&mut arena, stride, rows.len());
        let mut interpreter = Interpreter::new(options);
        interpreter.set_package(package).unwrap();
        interpreter.execute(ctx, None, &mut lanes, true)
    };
    let out = arena.chunks(stride.max(1)).map(|row| row.to_vec()).collect();
    (out, result)
}

fn run(package: &Package, rows: &[Vec<f32>], options: ExecuteOptions) -> (Vec<Vec<f32>>, Result<ExecutionSummary>) {
    run_rows(package, &EngineContext::new(), rows, options)
}

fn column(rows: &[Vec<f32>], slot: usize) -> Vec<f32> {
    rows.iter().map(|row| row[slot]).collect()
}

#[test]
fn constant_sum_over_five_lanes() {
    let mut b = PackageBuilder::new();
    let x = b.scalar(0.0).unwrap();
    b.op(Opcode::Assign).id(x).unwrap();
    b.constant(1.0).op(Opcode::Add).constant(2.0).op(Opcode::End);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    for write_through in [true, false] {
        let options = ExecuteOptions {
            write_through,
            ..verbose()
        };
        let (rows, result) = run(&package, &vec![vec![0.0]; 5], options);
        let summary = result.unwrap();
        assert_eq!(vec![3.0; 5], column(&rows, x));
        assert_eq!(2, summary.iterations);
        assert_eq!(0, summary.final_stack_offset);
    }
}

#[test]
fn min_against_a_constant() {
    let mut b = PackageBuilder::new();
    let input = b.scalar(0.0).unwrap();
    let output = b.scalar(0.0).unwrap();
    b.op(Opcode::Assign).id(output).unwrap();
    b.nary(Function::Min, 2, 1).unwrap();
    b.id(input).unwrap();
    b.constant(10.0).op(Opcode::End).op(Opcode::Ret);
    let package = b.finish().unwrap();

    let rows: Vec<Vec<f32>> = [3.0, 15.0, 10.0, -2.0, 10.0].iter().map(|v| vec![*v, 0.0]).collect();
    let (rows, result) = run(&package, &rows, verbose());
    result.unwrap();
    assert_eq!(vec![3.0, 10.0, 10.0, -2.0, 10.0], column(&rows, output));
}

#[test]
fn cdata_indexed_per_lane() {
    let mut b = PackageBuilder::new();
    let index = b.scalar(0.0).unwrap();
    let _unused = b.scalar(0.0).unwrap();
    let output = b.scalar(0.0).unwrap();
    let blob = b.cdata(Encoding::Numeric, &[1.0, 2.0, 3.0, 4.0]).unwrap();
    b.op(Opcode::Assign).id(output).unwrap();
    b.op(Opcode::IndexN).cdata_ref(blob).unwrap();
    b.id(index).unwrap();
    b.op(Opcode::End).op(Opcode::Ret);
    let package = b.finish().unwrap();

    let rows: Vec<Vec<f32>> = (0..4).map(|i| vec![i as f32, 0.0, 0.0]).collect();
    let (rows, result) = run(&package, &rows, verbose());
    result.unwrap();
    assert_eq!(vec![1.0, 2.0, 3.0, 4.0], column(&rows, output));
}

#[test]
fn runaway_loop_hits_the_iteration_cap() {
    let mut b = PackageBuilder::new();
    let x = b.scalar(0.0).unwrap();
    let top = b.label();
    b.bind(top);
    b.op(Opcode::Assign).id(x).unwrap();
    b.id(x).unwrap().op(Opcode::Add).named(NamedConstant::Value1).op(Opcode::End);
    b.jump_back(top);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    for seed in [0.0, -7.5, f32::NAN, 1e9] {
        for options in [verbose(), silent()] {
            let options = ExecuteOptions {
                max_iterations: 100,
                ..options
            };
            let (_, result) = run(&package, &vec![vec![seed]; 3], options);
            let err = result.unwrap_err();
            assert_eq!(ErrorCode::MaxIterationsExceeded, err.code);
            assert_eq!(ErrorKind::Runaway, err.kind);
        }
    }
}

#[test]
fn assignv_from_three_pops() {
    let mut b = PackageBuilder::new().with_stack(3);
    let v = b.declare(DataType::Numeric, &[0.0, 0.0, 0.0]).unwrap();
    let a = b.scalar(0.0).unwrap();
    let c1 = b.scalar(0.0).unwrap();
    let c2 = b.scalar(0.0).unwrap();
    b.op(Opcode::Push).id(a).unwrap();
    b.op(Opcode::Push).id(c1).unwrap();
    b.op(Opcode::Push).id(c2).unwrap();
    b.op(Opcode::Assignv).id(v).unwrap();
    b.op(Opcode::Pop);
    b.op(Opcode::Substract).op(Opcode::Pop);
    b.op(Opcode::Pop);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let rows = vec![
        vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0],
        vec![0.0, 0.0, 0.0, -4.0, 5.0, 6.5],
        vec![0.0, 0.0, 0.0, 7.0, -8.0, 0.0],
    ];
    let (out, result) = run(&package, &rows, verbose());
    assert_eq!(0, result.unwrap().final_stack_offset);
    for (row, before) in out.iter().zip(&rows) {
        // pops come back in reverse push order
        assert_eq!(before[5], row[v]);
        assert_eq!(-before[4], row[v + 1]);
        assert_eq!(before[3], row[v + 2]);
    }
}

#[test]
fn lanes_are_seeded_from_initial_data() {
    let mut b = PackageBuilder::new();
    let x = b.scalar(4.0).unwrap();
    let y = b.scalar(0.5).unwrap();
    b.op(Opcode::Assign).id(y).unwrap();
    b.id(x).unwrap().op(Opcode::Multiply).id(y).unwrap().op(Opcode::End);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let mut arena = vec![f32::NAN; 2 * 3];
    let mut lanes = Lanes::strided(&mut arena, 2, 3);
    execute(&package, &EngineContext::new(), None, &mut lanes, false).unwrap();
    for lane in 0..3 {
        assert_eq!(Some(4.0), lanes.get(lane, x));
        assert_eq!(Some(2.0), lanes.get(lane, y));
    }
}

#[test]
fn conditional_loop_counts_to_five() {
    let mut b = PackageBuilder::new();
    let x = b.scalar(0.0).unwrap();
    let (top, out) = (b.label(), b.label());
    b.bind(top);
    b.cjz(out);
    b.id(x).unwrap().op(Opcode::Smaller).named(NamedConstant::Value5).op(Opcode::End);
    b.op(Opcode::Assign).id(x).unwrap();
    b.id(x).unwrap().op(Opcode::Add).named(NamedConstant::Value1).op(Opcode::End);
    b.jump_back(top);
    b.bind(out);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let (rows, result) = run(&package, &vec![vec![0.0]; 4], verbose());
    result.unwrap();
    assert_eq!(vec![5.0; 4], column(&rows, x));
}

#[test]
fn lane_zero_decides_the_branch() {
    let mut b = PackageBuilder::new();
    let cond = b.scalar(0.0).unwrap();
    let x = b.scalar(0.0).unwrap();
    let skip = b.label();
    b.cjz(skip);
    b.id(cond).unwrap().op(Opcode::End);
    b.op(Opcode::Assign).id(x).unwrap();
    b.named(NamedConstant::Value7).op(Opcode::End);
    b.bind(skip);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let (rows, _) = run(&package, &[vec![1.0, 0.0], vec![0.0, 0.0]], verbose());
    assert_eq!(vec![7.0, 7.0], column(&rows, x));
    let (rows, _) = run(&package, &[vec![0.0, 0.0], vec![1.0, 0.0]], verbose());
    assert_eq!(vec![0.0, 0.0], column(&rows, x));
}

#[test]
fn constant_references_resolve() {
    let mut b = PackageBuilder::new();
    let x = b.scalar(0.0).unwrap();
    let y = b.scalar(0.0).unwrap();
    b.op(Opcode::Assign).id(x).unwrap();
    b.constant(0.1).op(Opcode::Add).constant(0.1).op(Opcode::End);
    for _ in 0..300 {
        b.op(Opcode::Nop);
    }
    b.op(Opcode::Assign).id(y).unwrap();
    b.constant(0.1).op(Opcode::End);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let (rows, result) = run(&package, &[vec![0.0, 0.0]], verbose());
    result.unwrap();
    assert_eq!(0.1f32 + 0.1f32, rows[0][x]);
    assert_eq!(0.1f32, rows[0][y]);
}

#[test]
fn malformed_constant_reference() {
    let mut b = PackageBuilder::new();
    let x = b.scalar(0.0).unwrap();
    b.op(Opcode::Assign).id(x).unwrap();
    // points back at the assign opcode rather than a constant
    b.bytes(&[Opcode::ConstantShortRef as u8, 2, Opcode::End as u8]);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let (_, result) = run(&package, &[vec![0.0]], verbose());
    assert_eq!(ErrorCode::ConstantReferenceMalformed, result.unwrap_err().code);
}

#[test]
fn negated_subexpression_and_components() {
    let mut b = PackageBuilder::new();
    let v = b.declare(DataType::Numeric, &[0.0, 0.0]).unwrap();
    let a = b.scalar(0.0).unwrap();
    let c = b.scalar(0.0).unwrap();
    // v.y = -(a + c)
    b.op(Opcode::Assign).op(Opcode::IndexY).id(v).unwrap();
    b.op(Opcode::Begin).op(Opcode::Substract);
    b.id(a).unwrap().op(Opcode::Add).id(c).unwrap().op(Opcode::End);
    b.op(Opcode::End);
    // v.x = a * 2
    b.op(Opcode::Assign).op(Opcode::IndexX).id(v).unwrap();
    b.id(a).unwrap().op(Opcode::Multiply).named(NamedConstant::Value2).op(Opcode::End);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let rows = vec![vec![0.0, 0.0, 1.5, 2.0], vec![0.0, 0.0, -3.0, 1.0]];
    let (out, result) = run(&package, &rows, verbose());
    result.unwrap();
    assert_eq!(vec![3.0, -3.5], out[0][..2].to_vec());
    assert_eq!(vec![-6.0, 2.0], out[1][..2].to_vec());
}

#[test]
fn expression_continues_past_a_terminator() {
    let mut b = PackageBuilder::new();
    let x = b.scalar(0.0).unwrap();
    let a = b.scalar(0.0).unwrap();
    // (a + 1) end * 2 end
    b.op(Opcode::Assign).id(x).unwrap();
    b.id(a).unwrap().op(Opcode::Add).named(NamedConstant::Value1).op(Opcode::End);
    b.op(Opcode::Multiply).named(NamedConstant::Value2).op(Opcode::End);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    for write_through in [true, false] {
        let options = ExecuteOptions {
            write_through,
            ..verbose()
        };
        let (rows, result) = run(&package, &[vec![0.0, 3.0], vec![0.0, -1.0]], options);
        result.unwrap();
        assert_eq!(vec![8.0, 0.0], column(&rows, x));
    }
}

#[test]
fn vector_size_mismatch_by_policy() {
    let mut b = PackageBuilder::new();
    let x = b.scalar(0.0).unwrap();
    b.op(Opcode::Assign).id(x).unwrap();
    b.function(Function::ExpandV2).named(NamedConstant::Value3).op(Opcode::End);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let (_, result) = run(&package, &[vec![0.0]], verbose());
    let err = result.unwrap_err();
    assert_eq!(ErrorCode::VectorSizeMismatch, err.code);
    assert_eq!(ErrorKind::Shape, err.kind);
    assert!(err.status() < 0);

    let (rows, result) = run(&package, &[vec![0.0]], silent());
    result.unwrap();
    assert_eq!(3.0, rows[0][x]);
}

#[test]
fn cdata_index_out_of_bounds_by_policy() {
    let mut b = PackageBuilder::new();
    let index = b.scalar(0.0).unwrap();
    let output = b.scalar(0.0).unwrap();
    let blob = b.cdata(Encoding::Half, &[0.5, 1.5]).unwrap();
    b.op(Opcode::Assign).id(output).unwrap();
    b.op(Opcode::IndexN).cdata_ref(blob).unwrap();
    b.id(index).unwrap();
    b.op(Opcode::End).op(Opcode::Ret);
    let package = b.finish().unwrap();

    let rows = vec![vec![1.0, 0.0], vec![2.0, 0.0]];
    let (_, result) = run(&package, &rows, verbose());
    assert_eq!(ErrorCode::CDataIndexOutOfBounds, result.unwrap_err().code);

    let (out, result) = run(&package, &rows, silent());
    result.unwrap();
    assert_eq!(1.5, out[0][output]);
    assert!(out[1][output].is_nan());
}

#[test]
fn cdata_writes_are_scoped_to_the_call() {
    let mut b = PackageBuilder::new();
    let index = b.scalar(0.0).unwrap();
    let before = b.scalar(0.0).unwrap();
    let after = b.scalar(0.0).unwrap();
    let blob = b.cdata(Encoding::Numeric, &[10.0, 20.0, 30.0]).unwrap();
    // before = blob[index]; blob[index] = index * 100; after = blob[index]
    b.op(Opcode::Assign).id(before).unwrap();
    b.op(Opcode::IndexN).cdata_ref(blob).unwrap();
    b.id(index).unwrap().op(Opcode::End);
    b.op(Opcode::Assigns).op(Opcode::IndexN).cdata_ref(blob).unwrap();
    b.id(index).unwrap();
    b.op(Opcode::Begin).op(Opcode::Substract);
    b.id(index).unwrap().op(Opcode::Multiply).named(NamedConstant::Value100).op(Opcode::End);
    b.op(Opcode::Assign).id(after).unwrap();
    b.op(Opcode::IndexN).cdata_ref(blob).unwrap();
    b.id(index).unwrap().op(Opcode::End);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let rows: Vec<Vec<f32>> = (0..3).map(|i| vec![i as f32, 0.0, 0.0]).collect();
    for _ in 0..2 {
        let (out, result) = run(&package, &rows, verbose());
        result.unwrap();
        assert_eq!(vec![10.0, 20.0, 30.0], column(&out, before));
        assert_eq!(vec![-0.0, -100.0, -200.0], column(&out, after));
    }
}

#[test]
fn stack_errors() {
    let mut b = PackageBuilder::new();
    let x = b.scalar(0.0).unwrap();
    b.op(Opcode::Push).id(x).unwrap().op(Opcode::Ret);
    let package = b.finish().unwrap();
    let (_, result) = run(&package, &[vec![0.0]], silent());
    assert_eq!(ErrorCode::StackOverflow, result.unwrap_err().code);

    let mut b = PackageBuilder::new().with_stack(4);
    let x = b.scalar(0.0).unwrap();
    b.op(Opcode::Assign).id(x).unwrap();
    b.op(Opcode::Pop).op(Opcode::End).op(Opcode::Ret);
    let package = b.finish().unwrap();
    let (_, result) = run(&package, &[vec![0.0]], silent());
    assert_eq!(ErrorCode::StackUnderflow, result.unwrap_err().code);
}

#[test]
fn unbalanced_stack_is_observable() {
    let mut b = PackageBuilder::new().with_stack(4);
    let v = b.declare(DataType::Numeric, &[1.0, 2.0]).unwrap();
    b.op(Opcode::Push).id(v).unwrap().op(Opcode::Ret);
    let package = b.finish().unwrap();
    let (_, result) = run(&package, &[vec![1.0, 2.0]], verbose());
    assert_eq!(2, result.unwrap().final_stack_offset);
}

#[test]
fn pushv_and_vector_pop() {
    let mut b = PackageBuilder::new().with_stack(4);
    let v = b.declare(DataType::Numeric, &[0.0, 0.0, 0.0]).unwrap();
    let a = b.scalar(0.0).unwrap();
    b.pushv(3, 3).unwrap();
    b.id(a).unwrap().named(NamedConstant::Value2).op(Opcode::Substract).id(a).unwrap();
    b.op(Opcode::Assign).id(v).unwrap();
    b.op(Opcode::Pop).op(Opcode::End);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let (out, result) = run(&package, &[vec![0.0, 0.0, 0.0, 4.0]], verbose());
    assert_eq!(0, result.unwrap().final_stack_offset);
    assert_eq!(vec![4.0, 2.0, -4.0], out[0][..3].to_vec());
}

#[test]
fn pushv_rejects_oversized_vectors() {
    let mut b = PackageBuilder::new().with_stack(8);
    let v = b.declare(DataType::Numeric, &[1.0, 2.0, 3.0, 4.0]).unwrap();
    let a = b.scalar(5.0).unwrap();
    // two terms of 4 + 1 components declared as a 5-vector
    b.bytes(&[Opcode::Pushv as u8, 0x25]);
    b.id(v).unwrap().id(a).unwrap();
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let row = vec![1.0, 2.0, 3.0, 4.0, 5.0];
    for options in [verbose(), silent()] {
        let (_, result) = run(&package, &[row.clone(), row.clone()], options);
        assert_eq!(ErrorCode::UnsupportedVectorSize, result.unwrap_err().code);
    }
}

#[test]
fn pushed_constants_pop_as_constants() {
    let mut b = PackageBuilder::new().with_stack(2);
    let x = b.scalar(0.0).unwrap();
    b.op(Opcode::Pushc).named(NamedConstant::Value3).op(Opcode::Multiply).named(NamedConstant::Value3).op(Opcode::End);
    b.op(Opcode::Assign).id(x).unwrap();
    b.op(Opcode::Pop).op(Opcode::End);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let (out, result) = run(&package, &vec![vec![0.0]; 3], verbose());
    result.unwrap();
    assert_eq!(vec![9.0; 3], column(&out, x));
}

#[test]
fn assignf_forms() {
    let mut b = PackageBuilder::new();
    let x = b.scalar(0.0).unwrap();
    let y = b.scalar(0.0).unwrap();
    let n = b.scalar(0.0).unwrap();
    let v = b.declare(DataType::Numeric, &[0.0, 0.0, 0.0]).unwrap();
    let blob = b.cdata(Encoding::Byte, &[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
    b.op(Opcode::Assignfn).id(y).unwrap();
    b.function(Function::Abs).id(x).unwrap();
    b.op(Opcode::Assignf).id(n).unwrap();
    b.function(Function::Size).cdata_ref(blob).unwrap();
    b.op(Opcode::Assignfn).id(v).unwrap();
    b.function(Function::ExpandV3).id(x).unwrap();
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let (out, result) = run(&package, &[vec![-3.0, 0.0, 0.0, 0.0, 0.0, 0.0]], verbose());
    result.unwrap();
    assert_eq!(-3.0, out[0][y]);
    assert_eq!(5.0, out[0][n]);
    assert_eq!(vec![3.0, 3.0, 3.0], out[0][v..v + 3].to_vec());
}

#[test]
fn math_functions() {
    let mut b = PackageBuilder::new();
    let a = b.scalar(0.0).unwrap();
    let clamped = b.scalar(0.0).unwrap();
    let dot = b.scalar(0.0).unwrap();
    let picked = b.scalar(0.0).unwrap();
    let total = b.scalar(0.0).unwrap();
    let v = b.declare(DataType::Numeric, &[1.0, 2.0, 3.0]).unwrap();

    b.op(Opcode::Assign).id(clamped).unwrap();
    b.function(Function::Clamp).id(a).unwrap().named(NamedConstant::Value0).named(NamedConstant::Value1);
    b.op(Opcode::End);
    b.op(Opcode::Assign).id(dot).unwrap();
    b.function(Function::Dot).id(v).unwrap().id(v).unwrap().op(Opcode::End);
    b.op(Opcode::Assign).id(picked).unwrap();
    b.function(Function::Select).id(clamped).unwrap();
    b.named(NamedConstant::Value10).named(NamedConstant::Value100).op(Opcode::End);
    b.op(Opcode::Assign).id(total).unwrap();
    b.nary(Function::Csum, 2, 3).unwrap();
    b.id(v).unwrap().id(a).unwrap().op(Opcode::End);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let rows = vec![
        vec![0.25, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0],
        vec![-4.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0],
    ];
    let (out, result) = run(&package, &rows, verbose());
    result.unwrap();
    assert_eq!(vec![0.25, 0.0], column(&out, clamped));
    assert_eq!(vec![14.0, 14.0], column(&out, dot));
    assert_eq!(vec![10.0, 100.0], column(&out, picked));
    assert!(approx_eq!(f32, 6.25, out[0][total]));
    assert!(approx_eq!(f32, 2.0, out[1][total]));
}

#[test]
fn bit_operations_produce_masks() {
    let mut b = PackageBuilder::new();
    let mask = b.declare(DataType::Bool32, &[0.0]).unwrap();
    let count = b.scalar(0.0).unwrap();
    b.op(Opcode::Assign).id(mask).unwrap();
    b.ext(ExtOp::Shl).named(NamedConstant::Value1).named(NamedConstant::Value4).op(Opcode::End);
    b.op(Opcode::Assign).id(count).unwrap();
    b.ext(ExtOp::CountBits).id(mask).unwrap().op(Opcode::End);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let (out, result) = run(&package, &[vec![0.0, 0.0]], verbose());
    result.unwrap();
    assert_eq!(16, out[0][mask].to_bits());
    assert_eq!(1.0, out[0][count]);
}

#[test]
fn operators_respect_mask_bits() {
    let mut b = PackageBuilder::new();
    let m5 = b.declare(DataType::Bool32, &[0.0]).unwrap();
    let m6 = b.declare(DataType::Bool32, &[0.0]).unwrap();
    let eq = b.scalar(0.0).unwrap();
    let neq = b.scalar(0.0).unwrap();
    let and = b.scalar(0.0).unwrap();
    let or = b.scalar(0.0).unwrap();
    let not = b.scalar(0.0).unwrap();
    b.op(Opcode::Assign).id(eq).unwrap();
    b.id(m5).unwrap().op(Opcode::Equals).id(m6).unwrap().op(Opcode::End);
    b.op(Opcode::Assign).id(neq).unwrap();
    b.id(m5).unwrap().op(Opcode::NotEquals).id(m6).unwrap().op(Opcode::End);
    b.op(Opcode::Assign).id(and).unwrap();
    b.id(m5).unwrap().op(Opcode::And).named(NamedConstant::Value1).op(Opcode::End);
    b.op(Opcode::Assign).id(or).unwrap();
    b.id(m5).unwrap().op(Opcode::Or).named(NamedConstant::Value0).op(Opcode::End);
    b.op(Opcode::Assign).id(not).unwrap();
    b.op(Opcode::Not).id(m5).unwrap().op(Opcode::End);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let row = vec![f32::from_bits(5), f32::from_bits(6), 0.0, 0.0, 0.0, 0.0, 0.0];
    let zero = vec![f32::from_bits(0), f32::from_bits(6), 0.0, 0.0, 0.0, 0.0, 0.0];
    for options in [verbose(), silent()] {
        let (out, result) = run(&package, &[row.clone(), zero.clone()], options);
        result.unwrap();
        assert_eq!(vec![0.0, 0.0], column(&out, eq));
        assert_eq!(vec![1.0, 1.0], column(&out, neq));
        // `and`, `or` and `not` agree on which masks are set
        assert_eq!(vec![1.0, 0.0], column(&out, and));
        assert_eq!(vec![1.0, 0.0], column(&out, or));
        assert_eq!(vec![0.0, 1.0], column(&out, not));
    }
}

#[test]
fn reinterpret_allows_numeric_into_mask() {
    let mut b = PackageBuilder::new();
    let mask = b.declare(DataType::Bool32, &[0.0]).unwrap();
    b.ext(ExtOp::ReinterpretFloat).id(mask).unwrap();
    b.op(Opcode::Assign).id(mask).unwrap();
    b.named(NamedConstant::Value2).op(Opcode::End);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let (out, result) = run(&package, &[vec![0.0]], verbose());
    result.unwrap();
    assert_eq!(2.0, out[0][mask]);
}

#[test]
fn host_functions() {
    let mut ctx = EngineContext::new();
    ctx.register_function(
        7,
        ExternalFunction::new("twice", vec![1], 1, |args, out| {
            for (o, x) in out.iter_mut().zip(args.params[0]) {
                *o = 2.0 * x;
            }
            Ok(())
        }),
    );
    ctx.register_function(8, ExternalFunction::new("wide", vec![3], 1, |_, _| Ok(())));

    let build = |id: u16| {
        let mut b = PackageBuilder::new();
        let x = b.scalar(0.0).unwrap();
        let y = b.scalar(0.0).unwrap();
        b.op(Opcode::Assign).id(y).unwrap();
        b.call(id).id(x).unwrap().op(Opcode::End);
        b.op(Opcode::Ret);
        b.finish().unwrap()
    };

    let (out, result) = run_rows(&build(7), &ctx, &[vec![1.5, 0.0], vec![-2.0, 0.0]], verbose());
    result.unwrap();
    assert_eq!(vec![3.0, -4.0], column(&out, 1));

    let (_, result) = run_rows(&build(9), &ctx, &[vec![1.5, 0.0]], silent());
    let err = result.unwrap_err();
    assert_eq!(ErrorCode::ExternalFunctionIdInvalid, err.code);
    assert_eq!(ErrorKind::Host, err.kind);

    let (_, result) = run_rows(&build(8), &ctx, &[vec![1.5, 0.0]], silent());
    assert_eq!(ErrorCode::ExternalFunctionFailed, result.unwrap_err().code);
}

#[test]
fn validate_statement() {
    let build = |other: NamedConstant| {
        let mut b = PackageBuilder::new();
        let x = b.scalar(0.0).unwrap();
        b.op(Opcode::Assign).id(x).unwrap();
        b.named(NamedConstant::Value2).op(Opcode::End);
        b.ext(ExtOp::Validate).id(x).unwrap().named(other);
        b.ext(ExtOp::Debug).id(x).unwrap();
        b.ext(ExtOp::DebugStack);
        b.op(Opcode::Ret);
        b.finish().unwrap()
    };

    let (_, result) = run(&build(NamedConstant::Value2), &vec![vec![0.0]; 2], verbose());
    assert_eq!(5, result.unwrap().iterations);

    let (_, result) = run(&build(NamedConstant::Value3), &vec![vec![0.0]; 2], verbose());
    assert_eq!(ErrorCode::ValidationFailed, result.unwrap_err().code);
}

#[test]
fn unsupported_bytes_at_root() {
    let mut b = PackageBuilder::new();
    b.scalar(0.0).unwrap();
    b.bytes(&[120, Opcode::Ret as u8]);
    let package = b.finish().unwrap();
    let (_, result) = run(&package, &[vec![0.0]], silent());
    let err = result.unwrap_err();
    assert_eq!(ErrorCode::UnsupportedOpcodeAtRoot, err.code);
    assert_eq!(Some(0), err.offset);
}

#[test]
fn setup_errors() {
    let mut b = PackageBuilder::new();
    let x = b.scalar(0.0).unwrap();
    b.op(Opcode::Assign).id(x).unwrap();
    b.named(NamedConstant::Pi).op(Opcode::End).op(Opcode::Ret);
    let package = b.finish().unwrap();
    let ctx = EngineContext::new();

    let unbound = Interpreter::new(verbose());
    let mut arena = vec![0.0; 4];
    let mut lanes = Lanes::strided(&mut arena, 1, 4);
    let err = unbound.execute(&ctx, None, &mut lanes, true).unwrap_err();
    assert_eq!(ErrorCode::PackageNotSet, err.code);
    assert_eq!(ErrorKind::Setup, err.kind);

    let mut scalar = package.clone();
    scalar.flags.mode = PackageMode::Scalar;
    let mut interpreter = Interpreter::new(verbose());
    assert_eq!(
        ErrorCode::PackageModeMismatch,
        interpreter.set_package(&scalar).unwrap_err().code
    );

    let mut validation = package.clone();
    validation.flags.mode = PackageMode::Validation;
    interpreter.set_package(&validation).unwrap();
    let err = interpreter.execute(&ctx, None, &mut lanes, true).unwrap_err();
    assert_eq!(ErrorCode::ValidationModeIncompatible, err.code);
    interpreter.execute(&ctx, None, &mut lanes, false).unwrap();
    assert_eq!(Some(std::f32::consts::PI), lanes.get(3, x));

    interpreter.set_package(&package).unwrap();
    let mut empty: Vec<f32> = vec![];
    let mut none = Lanes::strided(&mut empty, 1, 0);
    let err = interpreter.execute(&ctx, None, &mut none, true).unwrap_err();
    assert_eq!(ErrorCode::InvalidLaneCount, err.code);

    let mut short = vec![0.0; 2];
    let mut overrun = Lanes::strided(&mut short, 1, 3);
    let err = interpreter.execute(&ctx, None, &mut overrun, true).unwrap_err();
    assert_eq!(ErrorCode::NullRequiredPointer, err.code);
}

#[test]
fn packaged_stack_lives_in_the_rows() {
    let mut b = PackageBuilder::new().with_stack(2).packaged_stack(true);
    let x = b.scalar(0.0).unwrap();
    let y = b.scalar(0.0).unwrap();
    b.op(Opcode::Push).id(x).unwrap();
    b.op(Opcode::Assign).id(y).unwrap();
    b.op(Opcode::Pop).op(Opcode::Multiply).named(NamedConstant::Value10).op(Opcode::End);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();
    assert_eq!(4, package.row_len());

    let rows = vec![vec![1.0, 0.0], vec![2.0, 0.0], vec![3.0, 0.0]];
    let (out, result) = run(&package, &rows, verbose());
    result.unwrap();
    assert_eq!(vec![10.0, 20.0, 30.0], column(&out, y));
    // the pushed value is left behind in each lane's stack region
    assert_eq!(vec![1.0, 2.0, 3.0], column(&out, 2));
}

#[test]
fn dynamic_component_targets() {
    let mut b = PackageBuilder::new();
    let v = b.declare(DataType::Numeric, &[0.0, 0.0, 0.0, 0.0]).unwrap();
    let index = b.scalar(0.0).unwrap();
    b.op(Opcode::Assigns).op(Opcode::IndexN).id(v).unwrap();
    b.id(index).unwrap();
    b.named(NamedConstant::Value9);
    b.op(Opcode::Ret);
    let package = b.finish().unwrap();

    let rows: Vec<Vec<f32>> = (0..4).map(|i| vec![0.0, 0.0, 0.0, 0.0, i as f32]).collect();
    let (out, result) = run(&package, &rows, verbose());
    result.unwrap();
    for (lane, row) in out.iter().enumerate() {
        for c in 0..4 {
            assert_eq!(if c == lane { 9.0 } else { 0.0 }, row[v + c]);
        }
    }

    let (_, result) = run(&package, &[vec![0.0, 0.0, 0.0, 0.0, 4.0]], verbose());
    assert_eq!(ErrorCode::ComponentIndexOutOfBounds, result.unwrap_err().code);
    let (out, result) = run(&package, &[vec![0.0, 0.0, 0.0, 0.0, 4.0]], silent());
    result.unwrap();
    assert_eq!(vec![0.0; 4], out[0][..4].to_vec());
}
