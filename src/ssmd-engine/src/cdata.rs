// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Constant data blobs embedded in the code segment.
//!
//! A blob is `cdata <encoding u8> <count u16> <payload>`; it is referenced
//! from later code by `cdataref <u16 backward offset>`. Blobs hold the same
//! values for every lane.

use half::f16;
use ssmd_core::common::Result;
use ssmd_core::vm_err;

use crate::bytecode::{self, Opcode};

pub const HEADER_LEN: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    Numeric = 0,
    Half = 1,
    Int32 = 2,
    Byte = 3,
    Bool32 = 4,
}

impl Encoding {
    pub fn from_u8(byte: u8) -> Option<Encoding> {
        match byte {
            0 => Some(Encoding::Numeric),
            1 => Some(Encoding::Half),
            2 => Some(Encoding::Int32),
            3 => Some(Encoding::Byte),
            4 => Some(Encoding::Bool32),
            _ => None,
        }
    }

    pub fn width(self) -> usize {
        match self {
            Encoding::Numeric | Encoding::Int32 | Encoding::Bool32 => 4,
            Encoding::Half => 2,
            Encoding::Byte => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Encoding::Numeric => "f32",
            Encoding::Half => "f16",
            Encoding::Int32 => "i32",
            Encoding::Byte => "u8",
            Encoding::Bool32 => "bool32",
        }
    }

    pub fn encode(self, v: f32, out: &mut Vec<u8>) {
        let mut buf = [0u8; 4];
        self.write(&mut buf, v);
        out.extend_from_slice(&buf[..self.width()]);
    }

    #[inline]
    fn read(self, bytes: &[u8]) -> f32 {
        match self {
            Encoding::Numeric => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            Encoding::Half => f16::from_le_bytes([bytes[0], bytes[1]]).to_f32(),
            Encoding::Int32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
            Encoding::Byte => bytes[0] as f32,
            Encoding::Bool32 => f32::from_bits(u32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ])),
        }
    }

    #[inline]
    fn write(self, bytes: &mut [u8], v: f32) {
        match self {
            Encoding::Numeric => bytes[..4].copy_from_slice(&v.to_le_bytes()),
            Encoding::Half => bytes[..2].copy_from_slice(&f16::from_f32(v).to_le_bytes()),
            Encoding::Int32 => bytes[..4].copy_from_slice(&(v as i32).to_le_bytes()),
            Encoding::Byte => bytes[0] = v as u8,
            Encoding::Bool32 => bytes[..4].copy_from_slice(&v.to_bits().to_le_bytes()),
        }
    }
}

/// A validated blob location.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    pub header: usize,
    pub encoding: Encoding,
    pub count: usize,
}

impl Blob {
    #[inline]
    pub fn payload(&self) -> usize {
        self.header + HEADER_LEN
    }

    /// One past the last payload byte.
    #[inline]
    pub fn end(&self) -> usize {
        self.payload() + self.count * self.encoding.width()
    }

    #[inline]
    pub fn get(&self, code: &[u8], index: usize) -> Option<f32> {
        if index >= self.count {
            return None;
        }
        let w = self.encoding.width();
        let at = self.payload() + index * w;
        code.get(at..at + w).map(|b| self.encoding.read(b))
    }

    #[inline]
    pub fn set(&self, code: &mut [u8], index: usize, v: f32) -> bool {
        if index >= self.count {
            return false;
        }
        let w = self.encoding.width();
        let at = self.payload() + index * w;
        match code.get_mut(at..at + w) {
            Some(bytes) => {
                self.encoding.write(bytes, v);
                true
            }
            None => false,
        }
    }
}

/// Parse the blob header at `header` without any reference context.
pub fn header_at(code: &[u8], header: usize) -> Result<Blob> {
    if code.get(header) != Some(&(Opcode::CData as u8)) {
        return vm_err!(
            CDataReferenceMalformed,
            format!("no cdata marker at {header}")
        );
    }
    let Some(encoding) = Encoding::from_u8(bytecode::read_u8(code, header + 1)?) else {
        return vm_err!(
            CDataReferenceMalformed,
            format!("unknown cdata encoding at {header}")
        );
    };
    let count = bytecode::read_u16(code, header + 2)? as usize;
    let blob = Blob {
        header,
        encoding,
        count,
    };
    if blob.end() > code.len() {
        return vm_err!(
            CDataReferenceMalformed,
            format!("cdata payload at {header} runs past the code segment")
        );
    }
    Ok(blob)
}

/// Resolve the `cdataref` token at `at`.
pub fn resolve(code: &[u8], at: usize) -> Result<Blob> {
    let back = bytecode::read_u16(code, at + 1)? as usize;
    if back == 0 || back > at {
        return vm_err!(
            CDataReferenceMalformed,
            format!("cdataref at {at} points {back} bytes back")
        );
    }
    let blob = header_at(code, at - back)?;
    if blob.end() > at {
        return vm_err!(
            CDataReferenceMalformed,
            format!("cdataref at {at} lands inside its own blob")
        );
    }
    Ok(blob)
}
