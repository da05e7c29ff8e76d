// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The typed lane stack.
//!
//! Every lane shares one `stack_offset`. A push of a K-vector tags each of
//! its K metadata entries with `(datatype, K)`, so a pop only needs to read
//! the topmost entry to know how far to rewind.

use smallvec::SmallVec;
use ssmd_core::common::{ErrorCode, Result};
use ssmd_core::vm_err;

use crate::bytecode;
use crate::memory::Segment;
use crate::primitives::{V4, ZERO};
use crate::record::{Operand, Record, Value, blob_datatype};
use crate::vm::Exec;

impl<'a> Exec<'a> {
    pub(crate) fn push(&mut self, op: Operand<'a>) -> Result<()> {
        let op = match op {
            Operand::Blob(blob) => Operand::Value(self.blob_value(blob)?),
            op => op,
        };
        let (size, datatype) = match &op {
            Operand::Slot(rec) => (rec.size, rec.datatype),
            Operand::Value(v) => (v.size(), v.datatype()),
            Operand::Blob(blob) => (blob.count as u8, blob_datatype(*blob)),
        };
        let offset = self.stack_offset;
        if offset + size as usize > self.stack_size {
            return vm_err!(
                StackOverflow,
                format!("{size}-vector pushed at offset {offset} of {}", self.stack_size)
            );
        }
        self.meta.set_stack(offset, datatype, size)?;

        let mut constant = None;
        match op {
            Operand::Value(Value::Const { v, .. }) => constant = Some(v),
            Operand::Value(Value::Lanes { buf, .. }) => {
                self.mem.store(Segment::Stack, offset, size, buf);
                self.pool.put(buf);
            }
            Operand::Slot(src) => {
                self.mem.copy((src.seg, src.slot), (Segment::Stack, offset), size);
            }
            Operand::Blob(_) => {}
        }
        self.pushed_constants[offset] = constant;
        self.stack_offset += size as usize;
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Result<Operand<'a>> {
        if self.stack_offset == 0 {
            return vm_err!(StackUnderflow, "pop from an empty stack".to_owned());
        }
        let top = self.meta.stack(self.stack_offset - 1)?;
        let size = top.vector_size as usize;
        let Some(offset) = self.stack_offset.checked_sub(size) else {
            return vm_err!(
                StackCorrupted,
                format!("{size}-vector on top of a {}-slot stack", self.stack_offset)
            );
        };
        if self.options.verbose() {
            let first = self.meta.stack(offset)?;
            if first != top {
                return vm_err!(
                    StackCorrupted,
                    format!("push at offset {offset} recorded {first:?}, pop expects {top:?}")
                );
            }
        }
        self.stack_offset = offset;

        Ok(match self.pushed_constants[offset].take() {
            Some(v) => Operand::Value(Value::Const {
                v,
                size: top.vector_size,
                datatype: top.datatype,
            }),
            None => Operand::Slot(Record {
                seg: Segment::Stack,
                slot: offset,
                size: top.vector_size,
                datatype: top.datatype,
            }),
        })
    }

    /// `pushv <44> <term>...`: assemble one vector from several terms.
    pub(crate) fn pushv(&mut self) -> Result<()> {
        let at = self.pc;
        let (count, size) = bytecode::unpack44(bytecode::read_u8(&self.code, at + 1)?);
        self.pc = at + 2;
        if count == 0 {
            return vm_err!(MalformedSequence, "pushv of zero terms".to_owned());
        }
        if !(1..=4).contains(&size) {
            return vm_err!(UnsupportedVectorSize, format!("pushv of a {size}-vector"));
        }

        // terms are read before anything is written, since pops among them
        // may alias the slots the result lands in
        let mut parts: SmallVec<[Value<'a>; 4]> = SmallVec::new();
        let mut total = 0usize;
        for _ in 0..count {
            let term = self.term()?;
            let v = self.readable(term)?;
            total += v.size() as usize;
            parts.push(v);
        }
        self.shape(total == size as usize, ErrorCode::VectorSizeMismatch, || {
            format!("pushv of {total} components declared as a {size}-vector")
        })?;
        let datatype = parts.first().map(|v| v.datatype()).unwrap_or_default();

        let gather = |lane: usize, parts: &[Value<'a>]| -> V4 {
            let mut out = ZERO;
            let mut k = 0;
            for part in parts {
                let v = part.src().at(lane);
                for c in v.iter().take(part.size() as usize) {
                    if k < (size as usize).min(4) {
                        out[k] = *c;
                        k += 1;
                    }
                }
            }
            out
        };

        let value = if parts.iter().all(Value::is_const) {
            Value::Const {
                v: gather(0, &parts[..]),
                size,
                datatype,
            }
        } else {
            let out = self.pool.take();
            for (lane, o) in out.iter_mut().enumerate() {
                *o = gather(lane, &parts[..]);
            }
            for part in parts {
                self.release(part);
            }
            Value::Lanes {
                buf: out,
                size,
                datatype,
            }
        };
        self.push(Operand::Value(value))
    }
}
