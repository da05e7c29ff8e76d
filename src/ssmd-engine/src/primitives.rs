// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Per-component math and the lane-wide loops that apply it.
//!
//! Everything here works on `V4` values plus an explicit vector size; unused
//! components are left at zero and never read.

use float_cmp::approx_eq;

use crate::bytecode::Opcode;
use crate::metadata::DataType;

pub type V4 = [f32; 4];

pub const ZERO: V4 = [0.0; 4];

#[inline(always)]
pub(crate) fn is_truthy(n: f32) -> bool {
    let is_false = approx_eq!(f32, n, 0.0);
    !is_false
}

/// Truthiness that respects Bool32 masks, whose bit patterns are tiny
/// subnormals when read as floats.
#[inline(always)]
pub(crate) fn truthy(n: f32, datatype: DataType) -> bool {
    match datatype {
        DataType::Bool32 => n.to_bits() != 0,
        _ => is_truthy(n),
    }
}

#[inline(always)]
pub(crate) fn from_bool(b: bool) -> f32 {
    b as i8 as f32
}

/// Integer view of a scalar: masks keep their bit pattern, numbers convert.
#[inline(always)]
pub(crate) fn to_bits(n: f32, datatype: DataType) -> u32 {
    match datatype {
        DataType::Bool32 => n.to_bits(),
        _ => n as u32,
    }
}

/// Component `i` of a value, broadcasting scalars.
#[inline(always)]
pub(crate) fn pick(v: &V4, size: u8, i: usize) -> f32 {
    if size == 1 { v[0] } else { v[i] }
}

#[inline(always)]
pub(crate) fn splat(v: f32, size: u8) -> V4 {
    let mut out = ZERO;
    for c in out.iter_mut().take(size as usize) {
        *c = v;
    }
    out
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
    Neq,
}

impl BinaryOp {
    pub fn from_opcode(op: Opcode) -> Option<BinaryOp> {
        let op = match op {
            Opcode::Add => BinaryOp::Add,
            Opcode::Substract => BinaryOp::Sub,
            Opcode::Multiply => BinaryOp::Mul,
            Opcode::Divide => BinaryOp::Div,
            Opcode::And => BinaryOp::And,
            Opcode::Or => BinaryOp::Or,
            Opcode::Xor => BinaryOp::Xor,
            Opcode::Smaller => BinaryOp::Lt,
            Opcode::Greater => BinaryOp::Gt,
            Opcode::SmallerEquals => BinaryOp::Lte,
            Opcode::GreaterEquals => BinaryOp::Gte,
            Opcode::Equals => BinaryOp::Eq,
            Opcode::NotEquals => BinaryOp::Neq,
            _ => return None,
        };
        Some(op)
    }

    /// Logic and comparison operators produce 0/1 numerics.
    pub fn result_type(self, lhs: DataType) -> DataType {
        match self {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => lhs,
            _ => DataType::Numeric,
        }
    }

    /// Logic operators use datatype-aware truthiness; equality between
    /// masks compares bit patterns, as does ordering when both sides are masks.
    #[inline(always)]
    pub fn apply(self, l: f32, r: f32, types: (DataType, DataType)) -> f32 {
        let (lt, rt) = types;
        let masks = lt == DataType::Bool32 || rt == DataType::Bool32;
        let both = lt == DataType::Bool32 && rt == DataType::Bool32;
        match self {
            BinaryOp::Add => l + r,
            BinaryOp::Sub => l - r,
            BinaryOp::Mul => l * r,
            BinaryOp::Div => l / r,
            BinaryOp::And => from_bool(truthy(l, lt) && truthy(r, rt)),
            BinaryOp::Or => from_bool(truthy(l, lt) || truthy(r, rt)),
            BinaryOp::Xor => from_bool(truthy(l, lt) != truthy(r, rt)),
            BinaryOp::Lt if both => from_bool(l.to_bits() < r.to_bits()),
            BinaryOp::Gt if both => from_bool(l.to_bits() > r.to_bits()),
            BinaryOp::Lte if both => from_bool(l.to_bits() <= r.to_bits()),
            BinaryOp::Gte if both => from_bool(l.to_bits() >= r.to_bits()),
            BinaryOp::Lt => from_bool(l < r),
            BinaryOp::Gt => from_bool(l > r),
            BinaryOp::Lte => from_bool(l <= r),
            BinaryOp::Gte => from_bool(l >= r),
            BinaryOp::Eq if masks => from_bool(to_bits(l, lt) == to_bits(r, rt)),
            BinaryOp::Neq if masks => from_bool(to_bits(l, lt) != to_bits(r, rt)),
            BinaryOp::Eq => from_bool(approx_eq!(f32, l, r)),
            BinaryOp::Neq => from_bool(!approx_eq!(f32, l, r)),
        }
    }

    #[inline(always)]
    pub fn apply_v4(
        self,
        a: &V4,
        a_size: u8,
        b: &V4,
        b_size: u8,
        size: u8,
        types: (DataType, DataType),
    ) -> V4 {
        let mut out = ZERO;
        for (i, o) in out.iter_mut().enumerate().take(size as usize) {
            *o = self.apply(pick(a, a_size, i), pick(b, b_size, i), types);
        }
        out
    }
}

/// Result size of combining two operands: equal sizes, or a scalar
/// broadcast against a vector.
#[inline]
pub fn broadcast_size(a: u8, b: u8) -> Option<u8> {
    if a == b {
        Some(a)
    } else if a == 1 {
        Some(b)
    } else if b == 1 {
        Some(a)
    } else {
        None
    }
}

// ============================================================================
// Component math
// ============================================================================

#[inline(always)]
pub(crate) fn map(v: &V4, size: u8, f: impl Fn(f32) -> f32) -> V4 {
    let mut out = ZERO;
    for i in 0..size as usize {
        out[i] = f(v[i]);
    }
    out
}

#[inline(always)]
pub(crate) fn dot(a: &V4, b: &V4, size: u8) -> f32 {
    let mut sum = 0.0;
    for i in 0..size as usize {
        sum += a[i] * b[i];
    }
    sum
}

#[inline(always)]
pub(crate) fn length(v: &V4, size: u8) -> f32 {
    dot(v, v, size).sqrt()
}

pub(crate) fn normalize(v: &V4, size: u8) -> V4 {
    let len = length(v, size);
    map(v, size, |x| x / len)
}

pub(crate) fn cross(a: &V4, b: &V4) -> V4 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
        0.0,
    ]
}

#[inline(always)]
pub(crate) fn frac(x: f32) -> f32 {
    x - x.floor()
}

#[inline(always)]
pub(crate) fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        x
    }
}

#[inline(always)]
pub(crate) fn saturate(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

#[inline(always)]
pub(crate) fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[inline(always)]
pub(crate) fn unlerp(a: f32, b: f32, x: f32) -> f32 {
    (x - a) / (b - a)
}

/// Normalized linear interpolation between quaternions along the shorter arc.
pub(crate) fn nlerp(q0: &V4, q1: &V4, t: f32) -> V4 {
    let flip = if dot(q0, q1, 4) < 0.0 { -1.0 } else { 1.0 };
    let mut out = ZERO;
    for i in 0..4 {
        out[i] = lerp(q0[i], flip * q1[i], t);
    }
    normalize(&out, 4)
}

/// Spherical interpolation between quaternions; falls back to nlerp when
/// the inputs are nearly parallel.
pub(crate) fn slerp(q0: &V4, q1: &V4, t: f32) -> V4 {
    let mut cos = dot(q0, q1, 4);
    let mut q1 = *q1;
    if cos < 0.0 {
        cos = -cos;
        q1 = map(&q1, 4, |x| -x);
    }
    if cos > 0.9995 {
        return nlerp(q0, &q1, t);
    }
    let theta = cos.acos();
    let sin = theta.sin();
    let w0 = ((1.0 - t) * theta).sin() / sin;
    let w1 = (t * theta).sin() / sin;
    let mut out = ZERO;
    for i in 0..4 {
        out[i] = w0 * q0[i] + w1 * q1[i];
    }
    out
}

// ============================================================================
// Lane-wide loops
// ============================================================================

/// A read-only operand as seen by the lane loops.
#[derive(Copy, Clone)]
pub(crate) enum Src<'s> {
    Const(V4),
    Lanes(&'s [V4]),
}

impl Src<'_> {
    #[inline(always)]
    pub(crate) fn at(&self, lane: usize) -> V4 {
        match self {
            Src::Const(v) => *v,
            Src::Lanes(buf) => buf[lane],
        }
    }
}

#[inline(never)]
pub(crate) fn zip_lanes(out: &mut [V4], a: Src, b: Src, f: impl Fn(&V4, &V4) -> V4) {
    match (a, b) {
        (Src::Lanes(x), Src::Lanes(y)) => {
            for ((o, l), r) in out.iter_mut().zip(x).zip(y) {
                *o = f(l, r);
            }
        }
        (Src::Lanes(x), Src::Const(r)) => {
            for (o, l) in out.iter_mut().zip(x) {
                *o = f(l, &r);
            }
        }
        (Src::Const(l), Src::Lanes(y)) => {
            for (o, r) in out.iter_mut().zip(y) {
                *o = f(&l, r);
            }
        }
        (Src::Const(l), Src::Const(r)) => out.fill(f(&l, &r)),
    }
}

#[inline(never)]
pub(crate) fn zip3_lanes(
    out: &mut [V4],
    a: Src,
    b: Src,
    c: Src,
    f: impl Fn(&V4, &V4, &V4) -> V4,
) {
    for (lane, o) in out.iter_mut().enumerate() {
        *o = f(&a.at(lane), &b.at(lane), &c.at(lane));
    }
}
