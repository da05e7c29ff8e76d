// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! An assembler for packages.
//!
//! `PackageBuilder` emits the exact byte forms the interpreter decodes. It
//! interns float constants: the first use of a value is written inline and
//! later uses become short or long back references to that token while it
//! is in range. Jumps target `Label`s that are patched in `finish`.

use std::collections::HashMap;

use half::f16;
use ordered_float::OrderedFloat;
use ssmd_core::common::Result;
use ssmd_core::package::{Package, PackageFlags, PackageMode};
use ssmd_core::vm_err;

use crate::bytecode::{
    self, ExtOp, Function, NamedConstant, Opcode, is_exact_f16, pack44, pack62,
};
use crate::cdata::Encoding;
use crate::metadata::{DataType, SlotMeta};

/// A jump destination, bound to a code offset with `PackageBuilder::bind`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Copy, Clone, Debug)]
enum Width {
    /// `u8` forward distance
    Forward,
    /// `u8` backward distance
    Backward,
    /// `i16` signed distance
    Long,
}

#[derive(Copy, Clone, Debug)]
struct Fixup {
    /// Address of the jump opcode; distances are measured from here.
    at: usize,
    label: Label,
    width: Width,
}

#[derive(Clone, Debug, Default)]
pub struct PackageBuilder {
    code: Vec<u8>,
    metadata: Vec<u8>,
    data: Vec<f32>,
    stack_size: usize,
    flags: PackageFlags,
    /// Address of the inline token that defines each constant.
    interned: HashMap<(OrderedFloat<f32>, bool), usize>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl PackageBuilder {
    pub fn new() -> Self {
        PackageBuilder::default()
    }

    pub fn with_stack(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn packaged_stack(mut self, packaged: bool) -> Self {
        self.flags.packaged_stack = packaged;
        self
    }

    pub fn mode(mut self, mode: PackageMode) -> Self {
        self.flags.mode = mode;
        self
    }

    /// Current code offset.
    pub fn here(&self) -> usize {
        self.code.len()
    }

    pub fn data_size(&self) -> usize {
        self.metadata.len()
    }

    // ========================================================================
    // Data segment
    // ========================================================================

    /// Declare a data slot holding `initial` (1 to 4 components) and return
    /// its slot index. Components after the first are individually
    /// addressable as scalars.
    pub fn declare(&mut self, datatype: DataType, initial: &[f32]) -> Result<usize> {
        let size = initial.len();
        if !(1..=4).contains(&size) {
            return vm_err!(UnsupportedVectorSize, format!("{size}-component slot"));
        }
        let slot = self.metadata.len();
        self.metadata.push(SlotMeta::new(datatype, size as u8).pack());
        for _ in 1..size {
            self.metadata.push(SlotMeta::scalar(datatype).pack());
        }
        self.data.extend_from_slice(initial);
        Ok(slot)
    }

    pub fn scalar(&mut self, initial: f32) -> Result<usize> {
        self.declare(DataType::Numeric, &[initial])
    }

    // ========================================================================
    // Tokens
    // ========================================================================

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.code.push(op as u8);
        self
    }

    pub fn function(&mut self, f: Function) -> &mut Self {
        self.code.push(f as u8);
        self
    }

    pub fn ext(&mut self, op: ExtOp) -> &mut Self {
        self.code.push(Opcode::ExOp as u8);
        self.code.push(op as u8);
        self
    }

    pub fn named(&mut self, c: NamedConstant) -> &mut Self {
        self.code.push(c as u8);
        self
    }

    /// Raw bytes, for operands the typed helpers do not cover.
    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }

    /// The data id token for `slot`.
    pub fn id(&mut self, slot: usize) -> Result<&mut Self> {
        let Some(id) = bytecode::data_id(slot) else {
            return vm_err!(InvalidSlot, format!("slot {slot} has no single-byte id"));
        };
        self.code.push(id);
        Ok(self)
    }

    /// An inline constant, or a back reference to an earlier one.
    pub fn constant(&mut self, v: f32) -> &mut Self {
        let key = (OrderedFloat(v), v.is_sign_negative());
        let at = self.here();
        if let Some(def) = self.interned.get(&key) {
            let back = at - def;
            if let Ok(back) = u8::try_from(back) {
                self.code.push(Opcode::ConstantShortRef as u8);
                self.code.push(back);
                return self;
            }
            if let Ok(back) = u16::try_from(back) {
                self.code.push(Opcode::ConstantLongRef as u8);
                self.code.extend_from_slice(&back.to_be_bytes());
                return self;
            }
        }
        if is_exact_f16(v) {
            self.code.push(Opcode::ConstantF1H as u8);
            self.code.extend_from_slice(&f16::from_f32(v).to_le_bytes());
        } else {
            self.code.push(Opcode::ConstantF1 as u8);
            self.code.extend_from_slice(&v.to_le_bytes());
        }
        self.interned.insert(key, at);
        self
    }

    /// Embed a CDATA blob and return the address of its header.
    pub fn cdata(&mut self, encoding: Encoding, values: &[f32]) -> Result<usize> {
        let Ok(count) = u16::try_from(values.len()) else {
            return vm_err!(
                CDataReferenceMalformed,
                format!("{} elements do not fit a cdata header", values.len())
            );
        };
        let at = self.here();
        self.code.push(Opcode::CData as u8);
        self.code.push(encoding as u8);
        self.code.extend_from_slice(&count.to_be_bytes());
        for v in values {
            encoding.encode(*v, &mut self.code);
        }
        Ok(at)
    }

    /// A `cdataref` to the blob whose header is at `header`.
    pub fn cdata_ref(&mut self, header: usize) -> Result<&mut Self> {
        let at = self.here();
        let back = match at.checked_sub(header).map(u16::try_from) {
            Some(Ok(back)) if back > 0 => back,
            _ => {
                return vm_err!(
                    CDataReferenceMalformed,
                    format!("blob at {header} is out of reach from {at}")
                );
            }
        };
        self.code.push(Opcode::CDataRef as u8);
        self.code.extend_from_slice(&back.to_be_bytes());
        Ok(self)
    }

    /// An n-ary function head: `<f> <62>`. Its `count` operands follow.
    pub fn nary(&mut self, f: Function, count: usize, size: u8) -> Result<&mut Self> {
        let Some(arity) = pack62(count, size) else {
            return vm_err!(UnsupportedVectorSize, format!("{} of {count} x {size}", f.name()));
        };
        self.code.push(f as u8);
        self.code.push(arity);
        Ok(self)
    }

    /// `pushv <44>`; its `count` terms follow.
    pub fn pushv(&mut self, count: usize, size: u8) -> Result<&mut Self> {
        let Some(arity) = pack44(count, size) else {
            return vm_err!(UnsupportedVectorSize, format!("pushv of {count} x {size}"));
        };
        self.code.push(Opcode::Pushv as u8);
        self.code.push(arity);
        Ok(self)
    }

    /// `ex_op call <id>`; the host function's arguments follow.
    pub fn call(&mut self, id: u16) -> &mut Self {
        self.ext(ExtOp::Call);
        self.code.extend_from_slice(&id.to_be_bytes());
        self
    }

    // ========================================================================
    // Control flow
    // ========================================================================

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current offset.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        let here = self.here();
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(here);
        }
        self
    }

    fn branch(&mut self, op: Opcode, label: Label, width: Width) -> &mut Self {
        let at = self.here();
        self.code.push(op as u8);
        match width {
            Width::Forward | Width::Backward => self.code.push(0),
            Width::Long => self.code.extend_from_slice(&[0, 0]),
        }
        self.fixups.push(Fixup { at, label, width });
        self
    }

    pub fn jump(&mut self, label: Label) -> &mut Self {
        self.branch(Opcode::Jump, label, Width::Forward)
    }

    pub fn jump_back(&mut self, label: Label) -> &mut Self {
        self.branch(Opcode::JumpBack, label, Width::Backward)
    }

    pub fn long_jump(&mut self, label: Label) -> &mut Self {
        self.branch(Opcode::LongJump, label, Width::Long)
    }

    /// `cjz`; the condition sequence follows.
    pub fn cjz(&mut self, label: Label) -> &mut Self {
        self.branch(Opcode::Cjz, label, Width::Forward)
    }

    pub fn cjz_long(&mut self, label: Label) -> &mut Self {
        self.branch(Opcode::CjzLong, label, Width::Long)
    }

    fn patch(&mut self, fixup: Fixup) -> Result<()> {
        let Some(Some(target)) = self.labels.get(fixup.label.0).copied() else {
            return vm_err!(InvalidJumpTarget, format!("jump at {} to an unbound label", fixup.at));
        };
        let distance = target as i64 - fixup.at as i64;
        let out_of_range = || {
            vm_err!(
                InvalidJumpTarget,
                format!("jump at {} cannot reach {target}", fixup.at)
            )
        };
        match fixup.width {
            Width::Forward => match u8::try_from(distance) {
                Ok(d) => self.code[fixup.at + 1] = d,
                Err(_) => return out_of_range(),
            },
            Width::Backward => match u8::try_from(-distance) {
                Ok(d) => self.code[fixup.at + 1] = d,
                Err(_) => return out_of_range(),
            },
            Width::Long => match i16::try_from(distance) {
                Ok(d) => self.code[fixup.at + 1..fixup.at + 3].copy_from_slice(&d.to_be_bytes()),
                Err(_) => return out_of_range(),
            },
        }
        Ok(())
    }

    /// Patch jumps and produce the package.
    pub fn finish(mut self) -> Result<Package> {
        for fixup in std::mem::take(&mut self.fixups) {
            self.patch(fixup)?;
        }
        let package = Package {
            data_size: self.metadata.len(),
            code: self.code,
            metadata: self.metadata,
            data: self.data,
            stack_size: self.stack_size,
            flags: self.flags,
        };
        package.check()?;
        Ok(package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssmd_core::ErrorCode;

    #[test]
    fn test_constant_interning() {
        let mut b = PackageBuilder::new();
        b.constant(1.5).constant(0.1).constant(1.5).constant(0.1);
        b.op(Opcode::Ret);
        let code = b.finish().unwrap().code;

        // 1.5 is exact in half precision, 0.1 is not
        assert_eq!(Opcode::ConstantF1H as u8, code[0]);
        assert_eq!(Opcode::ConstantF1 as u8, code[3]);
        assert_eq!(&[Opcode::ConstantShortRef as u8, 8], &code[8..10]);
        assert_eq!(&[Opcode::ConstantShortRef as u8, 7], &code[10..12]);
    }

    #[test]
    fn test_signed_zero_is_not_merged() {
        let mut b = PackageBuilder::new();
        b.constant(0.0).constant(-0.0).op(Opcode::Ret);
        let code = b.finish().unwrap().code;
        assert_eq!(Opcode::ConstantF1H as u8, code[3]);
    }

    #[test]
    fn test_long_references() {
        let mut b = PackageBuilder::new();
        b.constant(0.1);
        b.bytes(&[Opcode::Nop as u8; 300]);
        b.constant(0.1).op(Opcode::Ret);
        let code = b.finish().unwrap().code;
        assert_eq!(Opcode::ConstantLongRef as u8, code[305]);
        assert_eq!(305u16.to_be_bytes(), [code[306], code[307]]);
    }

    #[test]
    fn test_jump_patching() {
        let mut b = PackageBuilder::new();
        let top = b.label();
        let out = b.label();
        b.bind(top);
        b.op(Opcode::Nop);
        b.jump(out);
        b.jump_back(top);
        b.long_jump(top);
        b.bind(out);
        b.op(Opcode::Ret);
        let code = b.finish().unwrap().code;
        assert_eq!(&[Opcode::Jump as u8, 7], &code[1..3]);
        assert_eq!(&[Opcode::JumpBack as u8, 3], &code[3..5]);
        assert_eq!((-5i16).to_be_bytes(), [code[6], code[7]]);
    }

    #[test]
    fn test_unbound_label() {
        let mut b = PackageBuilder::new();
        let l = b.label();
        b.jump(l).op(Opcode::Ret);
        assert_eq!(ErrorCode::InvalidJumpTarget, b.finish().unwrap_err().code);
    }

    #[test]
    fn test_declare_slots() {
        let mut b = PackageBuilder::new();
        let a = b.scalar(2.0).unwrap();
        let v = b.declare(DataType::Numeric, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let m = b.declare(DataType::Bool32, &[0.0]).unwrap();
        assert_eq!((0, 1, 5), (a, v, m));
        assert!(b.declare(DataType::Numeric, &[]).is_err());
        b.op(Opcode::Ret);
        let p = b.finish().unwrap();
        assert_eq!(6, p.data_size);
        assert_eq!(SlotMeta::new(DataType::Numeric, 4), SlotMeta::unpack(p.metadata[1]).unwrap());
        assert_eq!(SlotMeta::scalar(DataType::Numeric), SlotMeta::unpack(p.metadata[2]).unwrap());
        assert_eq!(SlotMeta::scalar(DataType::Bool32), SlotMeta::unpack(p.metadata[5]).unwrap());
        assert_eq!(vec![2.0, 1.0, 2.0, 3.0, 4.0, 0.0], p.data);
    }
}
