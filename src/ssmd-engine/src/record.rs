// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Operands, write targets, and the moves between them.

use bumpalo::Bump;
use ssmd_core::common::{Error, ErrorCode, Result};

use crate::cdata::Blob;
use crate::memory::Segment;
use crate::metadata::DataType;
use crate::primitives::{self, Src, V4, ZERO};
use crate::vm::Exec;

/// A write target (or lazily read source) inside lane memory. Handles never
/// own memory; `None` in place of a handle means "use the register".
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Record {
    pub(crate) seg: Segment,
    pub(crate) slot: usize,
    pub(crate) size: u8,
    pub(crate) datatype: DataType,
}

impl Record {
    pub(crate) fn component(self, c: usize) -> Record {
        Record {
            slot: self.slot + c,
            size: 1,
            ..self
        }
    }

    pub(crate) fn window(self, start: usize, size: u8) -> Record {
        Record {
            slot: self.slot + start,
            size,
            ..self
        }
    }
}

/// A fully evaluated value: either the same for every lane or one `V4` per
/// lane in a call-scoped buffer.
#[cfg_attr(feature = "debug-derive", derive(Debug))]
pub(crate) enum Value<'a> {
    Const { v: V4, size: u8, datatype: DataType },
    Lanes { buf: &'a mut [V4], size: u8, datatype: DataType },
}

impl<'a> Value<'a> {
    pub(crate) fn scalar(v: f32) -> Value<'a> {
        Value::Const {
            v: [v, 0.0, 0.0, 0.0],
            size: 1,
            datatype: DataType::Numeric,
        }
    }

    #[inline]
    pub(crate) fn size(&self) -> u8 {
        match self {
            Value::Const { size, .. } | Value::Lanes { size, .. } => *size,
        }
    }

    #[inline]
    pub(crate) fn datatype(&self) -> DataType {
        match self {
            Value::Const { datatype, .. } | Value::Lanes { datatype, .. } => *datatype,
        }
    }

    #[inline]
    pub(crate) fn is_const(&self) -> bool {
        matches!(self, Value::Const { .. })
    }

    #[inline]
    pub(crate) fn src(&self) -> Src<'_> {
        match self {
            Value::Const { v, .. } => Src::Const(*v),
            Value::Lanes { buf, .. } => Src::Lanes(buf),
        }
    }

    /// Component 0 for `lane`.
    #[inline]
    pub(crate) fn scalar_at(&self, lane: usize) -> f32 {
        match self {
            Value::Const { v, .. } => v[0],
            Value::Lanes { buf, .. } => buf[lane][0],
        }
    }
}

#[cfg_attr(feature = "debug-derive", derive(Debug))]
pub(crate) enum Operand<'a> {
    Value(Value<'a>),
    /// A data or stack slot that has not been read yet.
    Slot(Record),
    /// An unindexed CDATA reference.
    Blob(Blob),
}

impl<'a> From<Value<'a>> for Operand<'a> {
    fn from(v: Value<'a>) -> Self {
        Operand::Value(v)
    }
}

impl Operand<'_> {
    pub(crate) fn size(&self) -> usize {
        match self {
            Operand::Value(v) => v.size() as usize,
            Operand::Slot(rec) => rec.size as usize,
            Operand::Blob(blob) => blob.count,
        }
    }
}

/// Where an assignment lands.
#[cfg_attr(feature = "debug-derive", derive(Debug))]
pub(crate) enum Target<'a> {
    Slot(Record),
    /// Fixed component of a vector slot; the record covers the whole slot.
    Component(Record, usize),
    /// Per-lane component of a vector slot.
    Dynamic(Record, Value<'a>),
    CData(Blob, Value<'a>),
    /// An out-of-range component under the silent policy; writes are dropped.
    Discard,
}

impl Target<'_> {
    /// The record handle for targets that cover whole lanes of one slot.
    pub(crate) fn record(&self) -> Option<Record> {
        match self {
            Target::Slot(rec) => Some(*rec),
            Target::Component(rec, c) => Some(rec.component(*c)),
            _ => None,
        }
    }
}

/// Reusable lane buffers carved from the call's bump arena.
pub(crate) struct TempPool<'a> {
    bump: &'a Bump,
    free: Vec<&'a mut [V4]>,
    lanes: usize,
}

impl<'a> TempPool<'a> {
    pub(crate) fn new(bump: &'a Bump, lanes: usize) -> Self {
        TempPool {
            bump,
            free: Vec::new(),
            lanes,
        }
    }

    #[inline]
    pub(crate) fn take(&mut self) -> &'a mut [V4] {
        match self.free.pop() {
            Some(buf) => buf,
            None => self.bump.alloc_slice_fill_copy(self.lanes, ZERO),
        }
    }

    #[inline]
    pub(crate) fn put(&mut self, buf: &'a mut [V4]) {
        self.free.push(buf);
    }

    pub(crate) fn bump(&self) -> &'a Bump {
        self.bump
    }
}

/// Lane index from a float, truncating toward zero.
#[inline]
pub(crate) fn lane_index(x: f32) -> Option<usize> {
    if x >= 0.0 && x.is_finite() {
        Some(x as usize)
    } else {
        None
    }
}

impl<'a> Exec<'a> {
    /// Report a shape violation. Under the silent policy the caller carries
    /// on with a defined-but-meaningless fallback instead.
    pub(crate) fn shape(&self, ok: bool, code: ErrorCode, details: impl FnOnce() -> String) -> Result<()> {
        if ok || !self.options.verbose() {
            Ok(())
        } else {
            Err(Error::from_code(code, Some(details())))
        }
    }

    #[inline]
    pub(crate) fn release(&mut self, v: Value<'a>) {
        if let Value::Lanes { buf, .. } = v {
            self.pool.put(buf);
        }
    }

    pub(crate) fn release_operand(&mut self, op: Operand<'a>) {
        if let Operand::Value(v) = op {
            self.release(v);
        }
    }

    /// Read a whole unindexed blob as a vector value.
    pub(crate) fn blob_value(&self, blob: Blob) -> Result<Value<'a>> {
        if !(1..=4).contains(&blob.count) {
            return Err(Error::from_code(
                ErrorCode::UnsupportedVectorSize,
                Some(format!("cdata of {} elements used as a vector", blob.count)),
            ));
        }
        let mut v = ZERO;
        for (i, c) in v.iter_mut().enumerate().take(blob.count) {
            *c = blob.get(&self.code, i).unwrap_or(f32::NAN);
        }
        Ok(Value::Const {
            v,
            size: blob.count as u8,
            datatype: blob_datatype(blob),
        })
    }

    /// Force an operand into a value: slots are gathered, blobs decoded.
    pub(crate) fn readable(&mut self, op: Operand<'a>) -> Result<Value<'a>> {
        match op {
            Operand::Value(v) => Ok(v),
            Operand::Blob(blob) => self.blob_value(blob),
            Operand::Slot(rec) => {
                let buf = self.pool.take();
                self.mem.load(rec.seg, rec.slot, rec.size, buf);
                Ok(Value::Lanes {
                    buf,
                    size: rec.size,
                    datatype: rec.datatype,
                })
            }
        }
    }

    /// Apply `f` to each lane's vector, reusing the operand's buffer.
    pub(crate) fn map_value(
        &mut self,
        v: Value<'a>,
        size: u8,
        datatype: DataType,
        f: impl Fn(&V4) -> V4,
    ) -> Value<'a> {
        match v {
            Value::Const { v, .. } => Value::Const {
                v: f(&v),
                size,
                datatype,
            },
            Value::Lanes { buf, .. } => {
                for x in buf.iter_mut() {
                    *x = f(x);
                }
                Value::Lanes {
                    buf,
                    size,
                    datatype,
                }
            }
        }
    }

    pub(crate) fn zip_values(
        &mut self,
        a: Value<'a>,
        b: Value<'a>,
        size: u8,
        datatype: DataType,
        f: impl Fn(&V4, &V4) -> V4,
    ) -> Value<'a> {
        if let (Value::Const { v: x, .. }, Value::Const { v: y, .. }) = (&a, &b) {
            return Value::Const {
                v: f(x, y),
                size,
                datatype,
            };
        }
        let out = self.pool.take();
        primitives::zip_lanes(out, a.src(), b.src(), f);
        self.release(a);
        self.release(b);
        Value::Lanes {
            buf: out,
            size,
            datatype,
        }
    }

    pub(crate) fn zip3_values(
        &mut self,
        a: Value<'a>,
        b: Value<'a>,
        c: Value<'a>,
        size: u8,
        datatype: DataType,
        f: impl Fn(&V4, &V4, &V4) -> V4,
    ) -> Value<'a> {
        if let (Value::Const { v: x, .. }, Value::Const { v: y, .. }, Value::Const { v: z, .. }) =
            (&a, &b, &c)
        {
            return Value::Const {
                v: f(x, y, z),
                size,
                datatype,
            };
        }
        let out = self.pool.take();
        primitives::zip3_lanes(out, a.src(), b.src(), c.src(), f);
        self.release(a);
        self.release(b);
        self.release(c);
        Value::Lanes {
            buf: out,
            size,
            datatype,
        }
    }

    pub(crate) fn negate(&mut self, v: Value<'a>) -> Value<'a> {
        let (size, datatype) = (v.size(), v.datatype());
        self.map_value(v, size, datatype, |x| primitives::map(x, size, |c| -c))
    }

    /// Store an operand into a record handle, moving slot-to-slot when the
    /// operand has not been read yet.
    pub(crate) fn store(&mut self, op: Operand<'a>, rec: Record) -> Result<()> {
        let op = match op {
            Operand::Blob(blob) => Operand::Value(self.blob_value(blob)?),
            op => op,
        };
        let size = op.size() as u8;
        self.shape(size == rec.size, ErrorCode::VectorSizeMismatch, || {
            format!("{size}-vector assigned to a {}-vector slot", rec.size)
        })?;
        let n = size.min(rec.size);
        match op {
            Operand::Slot(src) => {
                self.shape(
                    src.datatype.assignable_to(rec.datatype),
                    ErrorCode::DataTypeMismatch,
                    || format!("{:?} slot assigned to {:?} slot", src.datatype, rec.datatype),
                )?;
                if src != rec {
                    self.mem.copy((src.seg, src.slot), (rec.seg, rec.slot), n);
                }
            }
            Operand::Value(v) => {
                self.shape(
                    v.datatype().assignable_to(rec.datatype),
                    ErrorCode::DataTypeMismatch,
                    || format!("{:?} value assigned to {:?} slot", v.datatype(), rec.datatype),
                )?;
                match v {
                    Value::Const { v, .. } => self.mem.fill(rec.seg, rec.slot, n, &v),
                    Value::Lanes { buf, .. } => {
                        self.mem.store(rec.seg, rec.slot, n, buf);
                        self.pool.put(buf);
                    }
                }
            }
            Operand::Blob(_) => {}
        }
        Ok(())
    }

    /// Evaluate an operand into the scratch register.
    pub(crate) fn stage(&mut self, op: Operand<'a>) -> Result<(u8, DataType)> {
        match op {
            Operand::Slot(rec) => {
                self.mem.load(rec.seg, rec.slot, rec.size, self.register);
                Ok((rec.size, rec.datatype))
            }
            op => {
                let v = self.readable(op)?;
                let (size, datatype) = (v.size(), v.datatype());
                match v {
                    Value::Const { v, .. } => self.register.fill(v),
                    Value::Lanes { buf, .. } => {
                        self.register.copy_from_slice(buf);
                        self.pool.put(buf);
                    }
                }
                Ok((size, datatype))
            }
        }
    }

    /// Copy the register into a record handle.
    pub(crate) fn commit(&mut self, rec: Record, size: u8, datatype: DataType) -> Result<()> {
        self.shape(size == rec.size, ErrorCode::VectorSizeMismatch, || {
            format!("{size}-vector assigned to a {}-vector slot", rec.size)
        })?;
        self.shape(
            datatype.assignable_to(rec.datatype),
            ErrorCode::DataTypeMismatch,
            || format!("{datatype:?} value assigned to {:?} slot", rec.datatype),
        )?;
        self.mem.store(rec.seg, rec.slot, size.min(rec.size), self.register);
        Ok(())
    }

    pub(crate) fn negate_register(&mut self, size: u8) {
        for v in self.register.iter_mut() {
            *v = primitives::map(v, size, |c| -c);
        }
    }
}

pub(crate) fn blob_datatype(blob: Blob) -> DataType {
    match blob.encoding {
        crate::cdata::Encoding::Bool32 => DataType::Bool32,
        _ => DataType::Numeric,
    }
}
