// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Statement-only extended operations: metadata reinterpretation and the
//! debug, debugstack and validate hooks.

use ssmd_core::common::Result;
use ssmd_core::vm_err;

use crate::bytecode::{ExtOp, Token, decode};
use crate::metadata::DataType;
use crate::vm::Exec;

impl<'a> Exec<'a> {
    /// Run a statement `ex_op`; the code pointer is past the selector byte.
    pub(crate) fn statement(&mut self, op: ExtOp) -> Result<()> {
        match op {
            ExtOp::ReinterpretBool32 => self.reinterpret(DataType::Bool32),
            ExtOp::ReinterpretFloat => self.reinterpret(DataType::Numeric),
            ExtOp::Debug => {
                let slot = self.slot_operand()?;
                self.debug_slot(slot)
            }
            ExtOp::DebugStack => {
                self.debug_stack();
                Ok(())
            }
            ExtOp::Validate => self.validate(),
            _ => vm_err!(UnsupportedOpcodeAtRoot, format!("{} is not a statement", op.name())),
        }
    }

    fn slot_operand(&mut self) -> Result<usize> {
        let byte = self.peek()?;
        let Token::Data(slot) = decode(byte) else {
            return vm_err!(MalformedSequence, format!("expected a data id, found byte {byte}"));
        };
        self.pc += 1;
        self.data_record(slot).map(|rec| rec.slot)
    }

    /// Pun a slot's declared datatype for the rest of the call.
    fn reinterpret(&mut self, datatype: DataType) -> Result<()> {
        let slot = self.slot_operand()?;
        self.meta.retype(slot, datatype)
    }

    #[cfg(feature = "diagnostics")]
    fn debug_slot(&mut self, slot: usize) -> Result<()> {
        if tracing::enabled!(tracing::Level::DEBUG) {
            let rec = self.data_record(slot)?;
            let values: Vec<_> = (0..self.lanes)
                .map(|lane| self.mem.read(rec.seg, lane, rec.slot, rec.size))
                .map(|v| v[..rec.size as usize].to_vec())
                .collect();
            tracing::debug!(
                offset = self.pc,
                slot,
                datatype = ?rec.datatype,
                values = ?values,
                "debug"
            );
        }
        Ok(())
    }

    #[cfg(not(feature = "diagnostics"))]
    fn debug_slot(&mut self, _slot: usize) -> Result<()> {
        Ok(())
    }

    #[cfg(feature = "diagnostics")]
    fn debug_stack(&self) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        let mut offset = self.stack_offset;
        while offset > 0 {
            let Ok(top) = self.meta.stack(offset - 1) else {
                break;
            };
            let Some(start) = offset.checked_sub(top.vector_size as usize) else {
                break;
            };
            let lane0 = match self.pushed_constants[start] {
                Some(v) => v,
                None => self.mem.read(crate::memory::Segment::Stack, 0, start, top.vector_size),
            };
            tracing::debug!(
                offset = start,
                size = top.vector_size,
                datatype = ?top.datatype,
                constant = self.pushed_constants[start].is_some(),
                lane0 = ?&lane0[..top.vector_size as usize],
                "debugstack"
            );
            offset = start;
        }
    }

    #[cfg(not(feature = "diagnostics"))]
    fn debug_stack(&self) {}

    /// `validate <term> <term>`: both values must agree on every lane.
    fn validate(&mut self) -> Result<()> {
        let (a, b) = (self.term()?, self.term()?);
        let a = self.readable(a)?;
        let b = self.readable(b)?;
        let result = self.compare(&a, &b);
        self.release(a);
        self.release(b);
        result
    }

    #[cfg(feature = "diagnostics")]
    fn compare(&self, a: &crate::record::Value<'a>, b: &crate::record::Value<'a>) -> Result<()> {
        use float_cmp::approx_eq;

        if a.size() != b.size() {
            return vm_err!(
                ValidationFailed,
                format!("a {}-vector validated against a {}-vector", a.size(), b.size())
            );
        }
        let size = a.size() as usize;
        let (x, y) = (a.src(), b.src());
        for lane in 0..self.lanes {
            let (l, r) = (x.at(lane), y.at(lane));
            let same = l[..size]
                .iter()
                .zip(&r[..size])
                .all(|(p, q)| p.to_bits() == q.to_bits() || approx_eq!(f32, *p, *q));
            if !same {
                return vm_err!(
                    ValidationFailed,
                    format!("lane {lane}: {:?} != {:?}", &l[..size], &r[..size])
                );
            }
        }
        Ok(())
    }

    #[cfg(not(feature = "diagnostics"))]
    fn compare(&self, _a: &crate::record::Value<'a>, _b: &crate::record::Value<'a>) -> Result<()> {
        Ok(())
    }
}
