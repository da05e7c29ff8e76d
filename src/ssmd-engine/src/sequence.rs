// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The expression sequence evaluator.
//!
//! A sequence is `<term> (<operator> <term>)*` closed by `end` or `nop`.
//! Terms are a run of prefix modifiers (negation, boolean not, a component
//! selector) followed by one primary value. Values stay lazy as long as
//! possible: a bare data slot or stack slot is carried as a record handle so
//! that the final move into an assignment target can be a slot-to-slot copy.

use smallvec::SmallVec;
use ssmd_core::common::{Error, ErrorCode, Result};
use ssmd_core::vm_err;

use crate::bytecode::{self, Opcode, Token, decode, is_binary_operator_byte};
use crate::cdata;
use crate::memory::Segment;
use crate::metadata::DataType;
use crate::primitives::{self, BinaryOp, broadcast_size, from_bool, truthy};
use crate::record::{Operand, Record, Value, blob_datatype, lane_index};
use crate::vm::Exec;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Modifier {
    Negate,
    Not,
    Component(usize),
}

#[inline(always)]
fn is_terminator(byte: u8) -> bool {
    byte == Opcode::End as u8 || byte == Opcode::Nop as u8
}

fn out_of_bounds_code(op: &Operand) -> ErrorCode {
    match op {
        Operand::Blob(_) => ErrorCode::CDataIndexOutOfBounds,
        _ => ErrorCode::ComponentIndexOutOfBounds,
    }
}

fn nan<'a>(datatype: DataType) -> Operand<'a> {
    Operand::Value(Value::Const {
        v: [f32::NAN, 0.0, 0.0, 0.0],
        size: 1,
        datatype,
    })
}

impl<'a> Exec<'a> {
    /// Evaluate a top-level sequence for its value.
    pub(crate) fn sequence_value(&mut self) -> Result<Operand<'a>> {
        match self.sequence(None, false)? {
            Some(op) => Ok(op),
            None => vm_err!(MalformedSequence, "sequence produced no value".to_owned()),
        }
    }

    /// Evaluate a sequence at the code pointer, consuming its terminator.
    ///
    /// With a `target` and write-through enabled, the final term of a
    /// top-level sequence is stored straight into the target and `None` is
    /// returned; otherwise the caller receives the accumulated operand.
    pub(crate) fn sequence(&mut self, target: Option<Record>, nested: bool) -> Result<Option<Operand<'a>>> {
        let start = self.pc;
        let mut acc: Option<Operand<'a>> = None;
        let mut pending: Option<BinaryOp> = None;

        loop {
            let at = self.pc;
            let byte = self.peek()?;

            if is_terminator(byte) {
                if acc.is_none() || pending.is_some() {
                    let details = format!("sequence starting at {start} ends without a value");
                    return Err(Error::from_code(ErrorCode::MalformedSequence, Some(details)).at(at));
                }
                self.pc += 1;
                if !nested && self.continues() {
                    continue;
                }
                return Ok(acc);
            }

            if acc.is_some() && pending.is_none() {
                let Some(op) = Opcode::from_u8(byte).and_then(BinaryOp::from_opcode) else {
                    let details = format!("expected an operator, found byte {byte}");
                    return Err(Error::from_code(ErrorCode::MalformedSequence, Some(details)).at(at));
                };
                pending = Some(op);
                self.pc += 1;
                continue;
            }

            let rhs = self.term()?;
            let value = match (acc.take(), pending.take()) {
                (Some(lhs), Some(op)) => Operand::Value(self.combine(lhs, op, rhs).map_err(|e| e.at(at))?),
                (_, _) => rhs,
            };

            if !nested && self.options.write_through {
                if let Some(rec) = target {
                    if self.at_last_token() {
                        self.pc += 1;
                        self.store(value, rec).map_err(|e| e.at(at))?;
                        return Ok(None);
                    }
                }
            }
            acc = Some(value);
        }
    }

    /// After a consumed terminator: does a binary operator carry the
    /// expression on?
    fn continues(&self) -> bool {
        bytecode::read_u8(&self.code, self.pc).is_ok_and(is_binary_operator_byte)
    }

    /// True when the code pointer sits on a terminator that really closes the
    /// sequence, so the value just read is its last.
    fn at_last_token(&self) -> bool {
        match bytecode::read_u8(&self.code, self.pc) {
            Ok(byte) if is_terminator(byte) => {
                !bytecode::read_u8(&self.code, self.pc + 1).is_ok_and(is_binary_operator_byte)
            }
            _ => false,
        }
    }

    // ========================================================================
    // Terms
    // ========================================================================

    pub(crate) fn term(&mut self) -> Result<Operand<'a>> {
        let at = self.pc;
        let mut modifiers: SmallVec<[Modifier; 4]> = SmallVec::new();
        let value = loop {
            let byte = self.peek()?;
            let modifier = match Opcode::from_u8(byte) {
                Some(Opcode::Substract) => Modifier::Negate,
                Some(Opcode::Not) => Modifier::Not,
                Some(Opcode::IndexN) => {
                    self.pc += 1;
                    let base = self.primary()?;
                    let index = self.term()?;
                    let index = self.readable(index)?;
                    break self.dynamic_index(base, index)?;
                }
                Some(op) => match op.component() {
                    Some(c) => Modifier::Component(c as usize),
                    None => break self.primary()?,
                },
                None => break self.primary()?,
            };
            modifiers.push(modifier);
            self.pc += 1;
        };

        let mut value = value;
        for modifier in modifiers.into_iter().rev() {
            value = self.modify(value, modifier).map_err(|e| e.at(at))?;
        }
        Ok(value)
    }

    fn modify(&mut self, op: Operand<'a>, modifier: Modifier) -> Result<Operand<'a>> {
        match modifier {
            Modifier::Component(c) => self.select_component(op, c),
            Modifier::Negate => {
                let v = self.readable(op)?;
                Ok(self.negate(v).into())
            }
            Modifier::Not => {
                let v = self.readable(op)?;
                let (size, datatype) = (v.size(), v.datatype());
                Ok(self
                    .map_value(v, size, DataType::Numeric, |x| {
                        primitives::map(x, size, |c| from_bool(!truthy(c, datatype)))
                    })
                    .into())
            }
        }
    }

    fn primary(&mut self) -> Result<Operand<'a>> {
        let at = self.pc;
        let byte = self.peek()?;
        let result = match decode(byte) {
            Token::Data(slot) => {
                self.pc += 1;
                self.data_record(slot).map(Operand::Slot)
            }
            Token::Constant(c) => {
                self.pc += 1;
                Ok(Value::scalar(self.ctx.constant(c)).into())
            }
            Token::Function(f) => {
                self.pc += 1;
                self.call(f)
            }
            Token::Op(op) => self.primary_op(op, at),
            Token::Reserved | Token::Unassigned(_) => {
                vm_err!(UnsupportedOpcode, format!("byte {byte} where a value was expected"))
            }
        };
        result.map_err(|e| e.at(at))
    }

    fn primary_op(&mut self, op: Opcode, at: usize) -> Result<Operand<'a>> {
        match op {
            Opcode::Pop => {
                self.pc += 1;
                self.pop()
            }
            Opcode::ConstantF1 => {
                let v = bytecode::read_f32(&self.code, at + 1)?;
                self.pc = at + 5;
                Ok(Value::scalar(v).into())
            }
            Opcode::ConstantF1H => {
                let v = bytecode::read_f16(&self.code, at + 1)?;
                self.pc = at + 3;
                Ok(Value::scalar(v).into())
            }
            Opcode::ConstantShortRef => {
                let back = bytecode::read_u8(&self.code, at + 1)? as usize;
                self.pc = at + 2;
                Ok(Value::scalar(self.constant_at(at, back)?).into())
            }
            Opcode::ConstantLongRef => {
                let back = bytecode::read_u16(&self.code, at + 1)? as usize;
                self.pc = at + 3;
                Ok(Value::scalar(self.constant_at(at, back)?).into())
            }
            Opcode::CDataRef => {
                let blob = cdata::resolve(&self.code, at)?;
                self.pc = at + 3;
                Ok(Operand::Blob(blob))
            }
            Opcode::Begin => {
                if bytecode::read_u8(&self.code, at + 1)? != Opcode::Substract as u8 {
                    return vm_err!(
                        MalformedSequence,
                        "begin must open a negated sub-expression".to_owned()
                    );
                }
                self.pc = at + 2;
                let inner = self.sequence(None, true)?;
                let Some(inner) = inner else {
                    return vm_err!(MalformedSequence, "empty sub-expression".to_owned());
                };
                let v = self.readable(inner)?;
                Ok(self.negate(v).into())
            }
            Opcode::ExOp => {
                self.pc = at + 1;
                self.ext_call()
            }
            _ => vm_err!(UnsupportedOpcode, format!("{} where a value was expected", op.name())),
        }
    }

    /// Follow a constant back reference from the token at `at`.
    fn constant_at(&self, at: usize, back: usize) -> Result<f32> {
        let target = match at.checked_sub(back) {
            Some(t) if back > 0 => t,
            _ => {
                return vm_err!(
                    ConstantReferenceMalformed,
                    format!("reference at {at} points {back} bytes back")
                );
            }
        };
        match Opcode::from_u8(self.code[target]) {
            Some(Opcode::ConstantF1) if target + 5 <= at => bytecode::read_f32(&self.code, target + 1),
            Some(Opcode::ConstantF1H) if target + 3 <= at => bytecode::read_f16(&self.code, target + 1),
            _ => vm_err!(
                ConstantReferenceMalformed,
                format!("reference at {at} does not land on an inline constant")
            ),
        }
    }

    /// Handle for data slot `slot`, checked against the declared segment.
    pub(crate) fn data_record(&self, slot: usize) -> Result<Record> {
        if slot >= self.data_size {
            return vm_err!(
                InvalidSlot,
                format!("slot {slot} outside a data segment of {}", self.data_size)
            );
        }
        let meta = self.meta.get(slot)?;
        if slot + meta.vector_size as usize > self.data_size {
            return vm_err!(
                InvalidSlot,
                format!("{}-vector at slot {slot} overruns the data segment", meta.vector_size)
            );
        }
        Ok(Record {
            seg: Segment::Data,
            slot,
            size: meta.vector_size,
            datatype: meta.datatype,
        })
    }

    // ========================================================================
    // Operators and indexing
    // ========================================================================

    /// Result size of a component-wise operation on two operands.
    pub(crate) fn broadcast(&self, a: u8, b: u8) -> Result<u8> {
        match broadcast_size(a, b) {
            Some(size) => Ok(size),
            None => {
                self.shape(false, ErrorCode::VectorSizeMismatch, || {
                    format!("{a}-vector combined with a {b}-vector")
                })?;
                Ok(a.min(b))
            }
        }
    }

    fn combine(&mut self, lhs: Operand<'a>, op: BinaryOp, rhs: Operand<'a>) -> Result<Value<'a>> {
        let a = self.readable(lhs)?;
        let b = self.readable(rhs)?;
        let (a_size, b_size) = (a.size(), b.size());
        let size = self.broadcast(a_size, b_size)?;
        let types = (a.datatype(), b.datatype());
        let datatype = op.result_type(types.0);
        Ok(self.zip_values(a, b, size, datatype, |x, y| {
            op.apply_v4(x, a_size, y, b_size, size, types)
        }))
    }

    /// The same component of every lane.
    pub(crate) fn select_component(&mut self, op: Operand<'a>, c: usize) -> Result<Operand<'a>> {
        let in_bounds = c < op.size();
        self.shape(in_bounds, out_of_bounds_code(&op), || {
            format!("component {c} of a {}-element value", op.size())
        })?;
        match op {
            Operand::Slot(rec) if in_bounds => Ok(Operand::Slot(rec.component(c))),
            Operand::Blob(blob) if in_bounds => {
                let v = blob.get(&self.code, c).unwrap_or(f32::NAN);
                Ok(Operand::Value(Value::Const {
                    v: [v, 0.0, 0.0, 0.0],
                    size: 1,
                    datatype: blob_datatype(blob),
                }))
            }
            Operand::Value(v) if in_bounds => {
                let datatype = v.datatype();
                Ok(self.map_value(v, 1, datatype, |x| [x[c], 0.0, 0.0, 0.0]).into())
            }
            Operand::Slot(rec) => Ok(nan(rec.datatype)),
            Operand::Blob(blob) => Ok(nan(blob_datatype(blob))),
            Operand::Value(v) => {
                let datatype = v.datatype();
                self.release(v);
                Ok(nan(datatype))
            }
        }
    }

    /// `index_n`: a component chosen by a value that may differ per lane.
    fn dynamic_index(&mut self, base: Operand<'a>, index: Value<'a>) -> Result<Operand<'a>> {
        let buf = match index {
            Value::Const { v, .. } => {
                let c = lane_index(v[0]).unwrap_or(usize::MAX);
                return self.select_component(base, c);
            }
            Value::Lanes { buf, .. } => buf,
        };

        let code = out_of_bounds_code(&base);
        let size = base.size();
        let datatype = match &base {
            Operand::Slot(rec) => rec.datatype,
            Operand::Blob(blob) => blob_datatype(*blob),
            Operand::Value(v) => v.datatype(),
        };
        // the index buffer is overwritten in place with the selected values
        for lane in 0..self.lanes {
            let raw = buf[lane][0];
            let x = match lane_index(raw) {
                Some(c) if c < size => match &base {
                    Operand::Slot(rec) => self.mem.read_scalar(rec.seg, lane, rec.slot + c),
                    Operand::Blob(blob) => blob.get(&self.code, c).unwrap_or(f32::NAN),
                    Operand::Value(v) => v.src().at(lane)[c],
                },
                _ => {
                    self.shape(false, code, || {
                        format!("lane {lane} selects element {raw} of a {size}-element value")
                    })?;
                    f32::NAN
                }
            };
            buf[lane] = [x, 0.0, 0.0, 0.0];
        }
        self.release_operand(base);
        Ok(Operand::Value(Value::Lanes {
            buf,
            size: 1,
            datatype,
        }))
    }
}
