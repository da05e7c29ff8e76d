// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Assignment targets and the four assignment instructions.

use ssmd_core::common::{ErrorCode, Result};
use ssmd_core::vm_err;

use crate::bytecode::{Function, Opcode, Token, decode};
use crate::cdata::{self, Blob};
use crate::record::{Operand, Record, Target, Value, lane_index};
use crate::vm::Exec;

/// A target before any component selection.
enum Base {
    Slot(Record),
    Blob(Blob),
}

impl<'a> Exec<'a> {
    fn target_base(&mut self) -> Result<Base> {
        let at = self.pc;
        match decode(self.peek()?) {
            Token::Data(slot) => {
                self.pc += 1;
                Ok(Base::Slot(self.data_record(slot)?))
            }
            Token::Op(Opcode::CDataRef) => {
                let blob = cdata::resolve(&self.code, at)?;
                self.pc = at + 3;
                Ok(Base::Blob(blob))
            }
            _ => vm_err!(MalformedSequence, format!("no assignment target at {at}")),
        }
    }

    /// Parse `[index_x..w] id`, `index_n id <term>`, or the same forms over
    /// a `cdataref`.
    pub(crate) fn target(&mut self) -> Result<Target<'a>> {
        let at = self.pc;
        let byte = self.peek()?;
        let component = Opcode::from_u8(byte).and_then(Opcode::component);

        if byte == Opcode::IndexN as u8 {
            self.pc += 1;
            let base = self.target_base()?;
            let index = self.term()?;
            let index = self.readable(index)?;
            return Ok(match base {
                Base::Slot(rec) => Target::Dynamic(rec, index),
                Base::Blob(blob) => Target::CData(blob, index),
            });
        }

        let Some(c) = component else {
            return match self.target_base()? {
                Base::Slot(rec) => Ok(Target::Slot(rec)),
                Base::Blob(_) => vm_err!(
                    MalformedSequence,
                    format!("cdata target at {at} needs an element index")
                ),
            };
        };
        self.pc += 1;
        let c = c as usize;
        match self.target_base()? {
            Base::Slot(rec) => {
                let ok = c < rec.size as usize;
                self.shape(ok, ErrorCode::ComponentIndexOutOfBounds, || {
                    format!("component {c} of a {}-vector target", rec.size)
                })?;
                Ok(if ok {
                    Target::Component(rec, c)
                } else {
                    Target::Discard
                })
            }
            Base::Blob(blob) => Ok(Target::CData(blob, Value::scalar(c as f32))),
        }
    }

    /// Write an operand to any target kind.
    pub(crate) fn assign_to(&mut self, target: Target<'a>, op: Operand<'a>) -> Result<()> {
        match target {
            Target::Slot(rec) => self.store(op, rec),
            Target::Component(rec, c) => self.store(op, rec.component(c)),
            Target::Dynamic(rec, index) => {
                let v = self.readable(op)?;
                self.shape(v.size() == 1, ErrorCode::VectorSizeMismatch, || {
                    format!("{}-vector assigned to one component", v.size())
                })?;
                self.shape(
                    v.datatype().assignable_to(rec.datatype),
                    ErrorCode::DataTypeMismatch,
                    || format!("{:?} value assigned to {:?} slot", v.datatype(), rec.datatype),
                )?;
                for lane in 0..self.lanes {
                    let raw = index.scalar_at(lane);
                    match lane_index(raw) {
                        Some(c) if c < rec.size as usize => {
                            self.mem.write_scalar(rec.seg, lane, rec.slot + c, v.scalar_at(lane));
                        }
                        _ => self.shape(false, ErrorCode::ComponentIndexOutOfBounds, || {
                            format!("lane {lane} writes component {raw} of a {}-vector", rec.size)
                        })?,
                    }
                }
                self.release(v);
                self.release(index);
                Ok(())
            }
            Target::CData(blob, index) => {
                let v = self.readable(op)?;
                self.shape(v.size() == 1, ErrorCode::VectorSizeMismatch, || {
                    format!("{}-vector assigned to one cdata element", v.size())
                })?;
                if index.is_const() {
                    // every lane targets the same element; the last lane wins
                    let last = self.lanes - 1;
                    self.write_cdata(blob, index.scalar_at(0), v.scalar_at(last), last)?;
                } else {
                    for lane in 0..self.lanes {
                        self.write_cdata(blob, index.scalar_at(lane), v.scalar_at(lane), lane)?;
                    }
                }
                self.release(v);
                self.release(index);
                Ok(())
            }
            Target::Discard => {
                self.release_operand(op);
                Ok(())
            }
        }
    }

    fn write_cdata(&mut self, blob: Blob, raw: f32, v: f32, lane: usize) -> Result<()> {
        let written = match lane_index(raw) {
            Some(i) => blob.set(self.code.to_mut(), i, v),
            None => false,
        };
        self.shape(written, ErrorCode::CDataIndexOutOfBounds, || {
            format!("lane {lane} writes element {raw} of a {}-element blob", blob.count)
        })
    }

    /// Finish an assignment whose value was left in hand: through the
    /// register for record targets, directly otherwise.
    fn settle(&mut self, target: Target<'a>, op: Operand<'a>, negated: bool) -> Result<()> {
        match target.record() {
            Some(rec) => {
                let (size, datatype) = self.stage(op)?;
                if negated {
                    self.negate_register(size);
                }
                self.commit(rec, size, datatype)
            }
            None => {
                let op = if negated {
                    let v = self.readable(op)?;
                    Operand::Value(self.negate(v))
                } else {
                    op
                };
                self.assign_to(target, op)
            }
        }
    }

    /// `assign <target> <sequence>`
    pub(crate) fn assign(&mut self) -> Result<()> {
        self.pc += 1;
        let target = self.target()?;
        let handle = target.record();
        match self.sequence(handle, false)? {
            Some(op) => self.settle(target, op, false),
            None => Ok(()),
        }
    }

    /// `assigns <target> <term>`
    pub(crate) fn assigns(&mut self) -> Result<()> {
        self.pc += 1;
        let target = self.target()?;
        let op = self.term()?;
        self.assign_to(target, op)
    }

    /// `assignf <target> <function-call>` and its negated twin.
    pub(crate) fn assignf(&mut self, negated: bool) -> Result<()> {
        self.pc += 1;
        let target = self.target()?;
        let byte = self.peek()?;
        let direct = byte == Opcode::IndexN as u8
            || matches!(
                Function::from_u8(byte),
                Some(Function::Size | Function::ExpandV2 | Function::ExpandV3 | Function::ExpandV4)
            );
        if !direct {
            let op = self.function_call()?;
            return self.settle(target, op, negated);
        }

        let op = if byte == Opcode::IndexN as u8 {
            self.term()?
        } else {
            self.function_call()?
        };
        let op = if negated {
            let v = self.readable(op)?;
            Operand::Value(self.negate(v))
        } else {
            op
        };
        self.assign_to(target, op)
    }

    /// `assignv <target> <term>...`: fill consecutive components of the
    /// target from successive terms.
    pub(crate) fn assignv(&mut self) -> Result<()> {
        self.pc += 1;
        let target = self.target()?;
        let Some(rec) = target.record() else {
            let op = self.term()?;
            return self.assign_to(target, op);
        };

        let mut filled = 0usize;
        while filled < rec.size as usize {
            let op = self.term()?;
            let size = op.size();
            let fits = filled + size <= rec.size as usize;
            self.shape(fits, ErrorCode::VectorSizeMismatch, || {
                format!("{size} components past component {filled} of a {}-vector", rec.size)
            })?;
            if !fits {
                self.release_operand(op);
                break;
            }
            self.store(op, rec.window(filled, size as u8))?;
            filled += size;
        }
        Ok(())
    }
}
