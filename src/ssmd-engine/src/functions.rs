// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Function dispatch: single-byte math functions, the `ex_op` extended set
//! and host calls.

use smallvec::SmallVec;
use ssmd_core::common::{Error, ErrorCode, Result};
use ssmd_core::vm_err;

use crate::bytecode::{self, ExtOp, Function, Opcode};
use crate::context::ExternalArgs;
use crate::metadata::DataType;
use crate::primitives::{self, V4, ZERO, from_bool, pick, splat, to_bits, truthy};
use crate::record::{Operand, Value};
use crate::vm::Exec;

/// How an n-ary function combines its operands.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Fold {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    All,
    Any,
    /// Every component of every operand down to one scalar.
    Reduce(Reduction),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Reduction {
    Min,
    Max,
    Sum,
}

impl Fold {
    fn from_function(f: Function) -> Option<Fold> {
        let fold = match f {
            Function::Adda => Fold::Add,
            Function::Suba => Fold::Sub,
            Function::Mula => Fold::Mul,
            Function::Diva => Fold::Div,
            Function::Min => Fold::Min,
            Function::Max => Fold::Max,
            Function::All => Fold::All,
            Function::Any => Fold::Any,
            Function::Mina => Fold::Reduce(Reduction::Min),
            Function::Maxa => Fold::Reduce(Reduction::Max),
            Function::Csum => Fold::Reduce(Reduction::Sum),
            _ => return None,
        };
        Some(fold)
    }

    /// Folds whose result is one scalar regardless of operand sizes.
    fn is_scalar(self) -> bool {
        matches!(self, Fold::All | Fold::Any | Fold::Reduce(_))
    }

    #[inline(always)]
    fn step(self, acc: f32, x: f32) -> f32 {
        match self {
            Fold::Add | Fold::Reduce(Reduction::Sum) => acc + x,
            Fold::Sub => acc - x,
            Fold::Mul => acc * x,
            Fold::Div => acc / x,
            Fold::Min | Fold::Reduce(Reduction::Min) => acc.min(x),
            Fold::Max | Fold::Reduce(Reduction::Max) => acc.max(x),
            Fold::All => from_bool(truthy(acc, DataType::Numeric) && truthy(x, DataType::Numeric)),
            Fold::Any => from_bool(truthy(acc, DataType::Numeric) || truthy(x, DataType::Numeric)),
        }
    }

    /// Collapse one operand to the scalar a scalar fold carries.
    #[inline(always)]
    fn collapse(self, v: &V4, size: u8, datatype: DataType) -> f32 {
        let comps = &v[..size as usize];
        match self {
            Fold::All => from_bool(comps.iter().all(|c| truthy(*c, datatype))),
            Fold::Any => from_bool(comps.iter().any(|c| truthy(*c, datatype))),
            _ => match comps.split_first() {
                Some((first, rest)) => rest.iter().fold(*first, |acc, c| self.step(acc, *c)),
                None => f32::NAN,
            },
        }
    }
}

/// Bit operations on 32-bit masks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BitOp {
    GetBit,
    GetBits,
    SetBit,
    SetBits,
    CountBits,
    ReverseBits,
    Tzcnt,
    Lzcnt,
    Rol,
    Ror,
    Shl,
    Shr,
}

impl BitOp {
    fn from_ext(op: ExtOp) -> Option<BitOp> {
        let bit = match op {
            ExtOp::GetBit => BitOp::GetBit,
            ExtOp::GetBits => BitOp::GetBits,
            ExtOp::SetBit => BitOp::SetBit,
            ExtOp::SetBits => BitOp::SetBits,
            ExtOp::CountBits => BitOp::CountBits,
            ExtOp::ReverseBits => BitOp::ReverseBits,
            ExtOp::Tzcnt => BitOp::Tzcnt,
            ExtOp::Lzcnt => BitOp::Lzcnt,
            ExtOp::Rol => BitOp::Rol,
            ExtOp::Ror => BitOp::Ror,
            ExtOp::Shl => BitOp::Shl,
            ExtOp::Shr => BitOp::Shr,
            _ => return None,
        };
        Some(bit)
    }

    fn arity(self) -> usize {
        match self {
            BitOp::CountBits | BitOp::ReverseBits | BitOp::Tzcnt | BitOp::Lzcnt => 1,
            BitOp::GetBit | BitOp::Rol | BitOp::Ror | BitOp::Shl | BitOp::Shr => 2,
            BitOp::GetBits | BitOp::SetBit => 3,
            BitOp::SetBits => 4,
        }
    }

    /// Counts and single-bit reads are numbers; everything else is a mask.
    fn result_type(self) -> DataType {
        match self {
            BitOp::GetBit | BitOp::CountBits | BitOp::Tzcnt | BitOp::Lzcnt => DataType::Numeric,
            _ => DataType::Bool32,
        }
    }

    fn apply(self, args: &[u32]) -> u32 {
        let a = |i: usize| args.get(i).copied().unwrap_or(0);
        match self {
            BitOp::GetBit => shr(a(0), a(1)) & 1,
            BitOp::GetBits => shr(a(0), a(1)) & mask(a(2)),
            BitOp::SetBit => {
                let bit = shl(1, a(1));
                if a(2) != 0 { a(0) | bit } else { a(0) & !bit }
            }
            BitOp::SetBits => {
                let m = shl(mask(a(2)), a(1));
                (a(0) & !m) | (shl(a(3), a(1)) & m)
            }
            BitOp::CountBits => a(0).count_ones(),
            BitOp::ReverseBits => a(0).reverse_bits(),
            BitOp::Tzcnt => a(0).trailing_zeros(),
            BitOp::Lzcnt => a(0).leading_zeros(),
            BitOp::Rol => a(0).rotate_left(a(1)),
            BitOp::Ror => a(0).rotate_right(a(1)),
            BitOp::Shl => shl(a(0), a(1)),
            BitOp::Shr => shr(a(0), a(1)),
        }
    }
}

#[inline(always)]
fn shl(v: u32, n: u32) -> u32 {
    v.checked_shl(n).unwrap_or(0)
}

#[inline(always)]
fn shr(v: u32, n: u32) -> u32 {
    v.checked_shr(n).unwrap_or(0)
}

/// The low `count` bits set.
#[inline(always)]
fn mask(count: u32) -> u32 {
    if count >= 32 { u32::MAX } else { (1u32 << count) - 1 }
}

impl<'a> Exec<'a> {
    /// A function call at the code pointer: a function byte or `ex_op`.
    pub(crate) fn function_call(&mut self) -> Result<Operand<'a>> {
        let at = self.pc;
        let byte = self.peek()?;
        let result = if let Some(f) = Function::from_u8(byte) {
            self.pc += 1;
            self.call(f)
        } else if byte == Opcode::ExOp as u8 {
            self.pc += 1;
            self.ext_call()
        } else {
            vm_err!(UnsupportedOpcode, format!("byte {byte} where a function was expected"))
        };
        result.map_err(|e| e.at(at))
    }

    /// One evaluated argument.
    fn arg(&mut self) -> Result<Value<'a>> {
        let term = self.term()?;
        self.readable(term)
    }

    /// Dispatch a single-byte function; the code pointer is past its opcode.
    pub(crate) fn call(&mut self, f: Function) -> Result<Operand<'a>> {
        use Function::*;
        let result = match f {
            Abs => self.unary(f32::abs)?,
            Trunc => self.unary(f32::trunc)?,
            Floor => self.unary(f32::floor)?,
            Ceil => self.unary(f32::ceil)?,
            Frac => self.unary(primitives::frac)?,
            Sqrt => self.unary(f32::sqrt)?,
            Rsqrt => self.unary(|x| 1.0 / x.sqrt())?,
            Sin => self.unary(f32::sin)?,
            Cos => self.unary(f32::cos)?,
            Tan => self.unary(f32::tan)?,
            Atan => self.unary(f32::atan)?,
            Exp => self.unary(f32::exp)?,
            Log2 => self.unary(f32::log2)?,
            Log => self.unary(f32::ln)?,
            Saturate => self.unary(primitives::saturate)?,
            Sign => self.unary(primitives::sign)?,
            Normalize => {
                let v = self.arg()?;
                let size = v.size();
                self.map_value(v, size, DataType::Numeric, |x| primitives::normalize(x, size))
            }
            Pow => self.binary(f32::powf)?,
            Fmod => self.binary(|x, y| x % y)?,
            Atan2 => self.binary(f32::atan2)?,
            Dot => {
                let (a, b) = (self.arg()?, self.arg()?);
                let (a_size, b_size) = (a.size(), b.size());
                let size = self.broadcast(a_size, b_size)?;
                self.zip_values(a, b, 1, DataType::Numeric, |x, y| {
                    let sum = (0..size as usize).map(|i| pick(x, a_size, i) * pick(y, b_size, i)).sum();
                    [sum, 0.0, 0.0, 0.0]
                })
            }
            Cross => {
                let (a, b) = (self.arg()?, self.arg()?);
                let ok = a.size() == 3 && b.size() == 3;
                self.shape(ok, ErrorCode::UnsupportedVectorSize, || {
                    format!("cross of a {}-vector and a {}-vector", a.size(), b.size())
                })?;
                self.zip_values(a, b, 3, DataType::Numeric, primitives::cross)
            }
            Clamp => self.ternary(|x, lo, hi| x.max(lo).min(hi))?,
            Lerp => self.ternary(primitives::lerp)?,
            Unlerp => self.ternary(primitives::unlerp)?,
            Fma => self.ternary(f32::mul_add)?,
            Slerp => self.quaternion(primitives::slerp)?,
            Nlerp => self.quaternion(primitives::nlerp)?,
            Select => {
                let (cond, a, b) = (self.arg()?, self.arg()?, self.arg()?);
                let (c_size, a_size, b_size) = (cond.size(), a.size(), b.size());
                let size = self.broadcast(a_size, b_size)?;
                let size = self.broadcast(c_size, size)?;
                let (c_type, datatype) = (cond.datatype(), a.datatype());
                self.zip3_values(cond, a, b, size, datatype, |c, x, y| {
                    let mut out = ZERO;
                    for (i, o) in out.iter_mut().enumerate().take(size as usize) {
                        *o = if truthy(pick(c, c_size, i), c_type) {
                            pick(x, a_size, i)
                        } else {
                            pick(y, b_size, i)
                        };
                    }
                    out
                })
            }
            Adda | Mula | Suba | Diva | Min | Max | All | Any | Mina | Maxa | Csum => {
                return self.nary(f);
            }
            Size => {
                let term = self.term()?;
                let n = term.size();
                self.release_operand(term);
                Value::scalar(n as f32)
            }
            ExpandV2 => self.expand(2)?,
            ExpandV3 => self.expand(3)?,
            ExpandV4 => self.expand(4)?,
        };
        Ok(result.into())
    }

    fn unary(&mut self, f: impl Fn(f32) -> f32) -> Result<Value<'a>> {
        let v = self.arg()?;
        let size = v.size();
        Ok(self.map_value(v, size, DataType::Numeric, |x| primitives::map(x, size, &f)))
    }

    fn binary(&mut self, f: impl Fn(f32, f32) -> f32) -> Result<Value<'a>> {
        let (a, b) = (self.arg()?, self.arg()?);
        let (a_size, b_size) = (a.size(), b.size());
        let size = self.broadcast(a_size, b_size)?;
        Ok(self.zip_values(a, b, size, DataType::Numeric, |x, y| {
            let mut out = ZERO;
            for (i, o) in out.iter_mut().enumerate().take(size as usize) {
                *o = f(pick(x, a_size, i), pick(y, b_size, i));
            }
            out
        }))
    }

    fn ternary(&mut self, f: impl Fn(f32, f32, f32) -> f32) -> Result<Value<'a>> {
        let (a, b, c) = (self.arg()?, self.arg()?, self.arg()?);
        let (a_size, b_size, c_size) = (a.size(), b.size(), c.size());
        let size = self.broadcast(a_size, b_size)?;
        let size = self.broadcast(size, c_size)?;
        Ok(self.zip3_values(a, b, c, size, DataType::Numeric, |x, y, z| {
            let mut out = ZERO;
            for (i, o) in out.iter_mut().enumerate().take(size as usize) {
                *o = f(pick(x, a_size, i), pick(y, b_size, i), pick(z, c_size, i));
            }
            out
        }))
    }

    /// Interpolation between two quaternions by a scalar.
    fn quaternion(&mut self, f: impl Fn(&V4, &V4, f32) -> V4) -> Result<Value<'a>> {
        let (q0, q1, t) = (self.arg()?, self.arg()?, self.arg()?);
        let ok = q0.size() == 4 && q1.size() == 4 && t.size() == 1;
        self.shape(ok, ErrorCode::UnsupportedVectorSize, || {
            format!(
                "quaternion interpolation over {}, {} and {} components",
                q0.size(),
                q1.size(),
                t.size()
            )
        })?;
        Ok(self.zip3_values(q0, q1, t, 4, DataType::Numeric, |x, y, z| f(x, y, z[0])))
    }

    fn expand(&mut self, size: u8) -> Result<Value<'a>> {
        let v = self.arg()?;
        self.shape(v.size() == 1, ErrorCode::UnsupportedVectorSize, || {
            format!("expand_v{size} of a {}-vector", v.size())
        })?;
        let datatype = v.datatype();
        Ok(self.map_value(v, size, datatype, |x| splat(x[0], size)))
    }

    /// `<f> <62> <term>...`
    fn nary(&mut self, f: Function) -> Result<Operand<'a>> {
        let Some(fold) = Fold::from_function(f) else {
            return vm_err!(UnsupportedOpcode, format!("{} is not an n-ary function", f.name()));
        };
        let (count, size) = bytecode::unpack62(bytecode::read_u8(&self.code, self.pc)?);
        self.pc += 1;
        if count == 0 {
            return vm_err!(MalformedSequence, format!("{} of zero operands", f.name()));
        }
        let out_size = if fold.is_scalar() { 1 } else { size };

        let mut acc: Option<Value<'a>> = None;
        for _ in 0..count {
            let v = self.arg()?;
            let (v_size, v_type) = (v.size(), v.datatype());
            let v = if fold.is_scalar() {
                self.map_value(v, 1, DataType::Numeric, |x| {
                    [fold.collapse(x, v_size, v_type), 0.0, 0.0, 0.0]
                })
            } else {
                self.shape(v_size == size || v_size == 1, ErrorCode::VectorSizeMismatch, || {
                    format!("{}-vector operand to a {size}-wide {}", v_size, f.name())
                })?;
                if v_size == size {
                    v
                } else {
                    self.map_value(v, size, v_type, |x| {
                        let mut out = ZERO;
                        for (i, o) in out.iter_mut().enumerate().take(size as usize) {
                            *o = pick(x, v_size, i);
                        }
                        out
                    })
                }
            };
            acc = Some(match acc {
                None => v,
                Some(lhs) => {
                    let datatype = lhs.datatype();
                    self.zip_values(lhs, v, out_size, datatype, |x, y| {
                        let mut out = ZERO;
                        for (i, o) in out.iter_mut().enumerate().take(out_size as usize) {
                            *o = fold.step(x[i], y[i]);
                        }
                        out
                    })
                }
            });
        }
        match acc {
            Some(v) => Ok(v.into()),
            None => vm_err!(MalformedSequence, format!("{} of zero operands", f.name())),
        }
    }

    // ========================================================================
    // Extended operations
    // ========================================================================

    /// Dispatch the extended operation whose selector byte is at the code
    /// pointer.
    pub(crate) fn ext_call(&mut self) -> Result<Operand<'a>> {
        let byte = self.peek()?;
        let Some(op) = ExtOp::from_u8(byte) else {
            return vm_err!(UnsupportedOpcode, format!("ex_op {byte}"));
        };
        self.pc += 1;
        if let Some(bit) = BitOp::from_ext(op) {
            return self.bits(bit).map(Operand::from);
        }
        let result = match op {
            ExtOp::Exp10 => self.unary(|x| 10f32.powf(x))?,
            ExtOp::Log10 => self.unary(f32::log10)?,
            ExtOp::Sinh => self.unary(f32::sinh)?,
            ExtOp::Cosh => self.unary(f32::cosh)?,
            ExtOp::Tanh => self.unary(f32::tanh)?,
            ExtOp::Asin => self.unary(f32::asin)?,
            ExtOp::Acos => self.unary(f32::acos)?,
            ExtOp::Degrees => self.unary(f32::to_degrees)?,
            ExtOp::Radians => self.unary(f32::to_radians)?,
            ExtOp::Cbrt => self.unary(f32::cbrt)?,
            ExtOp::Call => self.host_call()?,
            _ => {
                return vm_err!(
                    UnsupportedOpcode,
                    format!("{} where a value was expected", op.name())
                );
            }
        };
        Ok(result.into())
    }

    fn bits(&mut self, op: BitOp) -> Result<Value<'a>> {
        let mut args: SmallVec<[(Value<'a>, DataType); 4]> = SmallVec::new();
        for _ in 0..op.arity() {
            let v = self.arg()?;
            self.shape(v.size() == 1, ErrorCode::UnsupportedVectorSize, || {
                format!("{op:?} takes scalars, got a {}-vector", v.size())
            })?;
            let datatype = v.datatype();
            args.push((v, datatype));
        }
        let result_type = op.result_type();
        let eval = |lane: usize, args: &[(Value<'a>, DataType)]| -> V4 {
            let mut words = [0u32; 4];
            for (w, (v, datatype)) in words.iter_mut().zip(args) {
                *w = to_bits(v.scalar_at(lane), *datatype);
            }
            let r = op.apply(&words[..args.len()]);
            let x = match result_type {
                DataType::Bool32 => f32::from_bits(r),
                _ => r as f32,
            };
            [x, 0.0, 0.0, 0.0]
        };

        if args.iter().all(|(v, _)| v.is_const()) {
            return Ok(Value::Const {
                v: eval(0, &args[..]),
                size: 1,
                datatype: result_type,
            });
        }
        let out = self.pool.take();
        for (lane, o) in out.iter_mut().enumerate() {
            *o = eval(lane, &args[..]);
        }
        for (v, _) in args {
            self.release(v);
        }
        Ok(Value::Lanes {
            buf: out,
            size: 1,
            datatype: result_type,
        })
    }

    /// `ex_op call <u16 id> <term>...`: one invocation for the whole batch.
    fn host_call(&mut self) -> Result<Value<'a>> {
        let id = bytecode::read_u16(&self.code, self.pc)?;
        self.pc += 2;
        let ctx = self.ctx;
        let Some(function) = ctx.function(id) else {
            return vm_err!(ExternalFunctionIdInvalid, format!("no host function {id}"));
        };
        if !function.is_scalar() {
            return vm_err!(
                ExternalFunctionFailed,
                format!("host function {} exchanges vectors", function.name)
            );
        }

        let bump = self.pool.bump();
        let mut columns: SmallVec<[&[f32]; 4]> = SmallVec::new();
        for _ in 0..function.parameter_sizes.len() {
            let v = self.arg()?;
            if v.size() != 1 {
                return vm_err!(
                    ExternalFunctionFailed,
                    format!("{}-vector passed to host function {}", v.size(), function.name)
                );
            }
            let column = bump.alloc_slice_fill_with(self.lanes, |lane| v.scalar_at(lane));
            self.release(v);
            columns.push(column);
        }

        let out = bump.alloc_slice_fill_copy(self.lanes, 0.0f32);
        let args = ExternalArgs {
            env: self.env,
            params: &columns[..],
            lanes: self.lanes,
        };
        function.invoke(&args, out).map_err(|err| {
            let details = format!(
                "host function {} failed: {}",
                function.name,
                err.details.unwrap_or_else(|| err.code.to_string())
            );
            Error::from_code(ErrorCode::ExternalFunctionFailed, Some(details))
        })?;

        let buf = self.pool.take();
        for (o, x) in buf.iter_mut().zip(out.iter()) {
            *o = [*x, 0.0, 0.0, 0.0];
        }
        Ok(Value::Lanes {
            buf,
            size: 1,
            datatype: DataType::Numeric,
        })
    }
}
