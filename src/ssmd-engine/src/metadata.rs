// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use ssmd_core::common::Result;
use ssmd_core::vm_err;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    #[default]
    Numeric = 0,
    /// A 32-bit mask stored in the scalar's bit pattern.
    Bool32 = 1,
    Id = 2,
}

impl DataType {
    pub fn from_u8(bits: u8) -> Option<DataType> {
        match bits {
            0 => Some(DataType::Numeric),
            1 => Some(DataType::Bool32),
            2 => Some(DataType::Id),
            _ => None,
        }
    }

    /// Whether a value of type `self` may be stored into a slot of `target`.
    pub fn assignable_to(self, target: DataType) -> bool {
        (self == DataType::Bool32) == (target == DataType::Bool32)
    }
}

/// Per-slot descriptor: vector size 1..=4 and datatype.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SlotMeta {
    pub datatype: DataType,
    pub vector_size: u8,
}

impl SlotMeta {
    pub fn new(datatype: DataType, vector_size: u8) -> Self {
        SlotMeta {
            datatype,
            vector_size,
        }
    }

    pub fn scalar(datatype: DataType) -> Self {
        SlotMeta::new(datatype, 1)
    }

    /// bits 0-1 size (0 encodes 4), bits 4-7 datatype
    pub fn pack(self) -> u8 {
        ((self.datatype as u8) << 4) | (self.vector_size & 0x3)
    }

    pub fn unpack(byte: u8) -> Result<SlotMeta> {
        let Some(datatype) = DataType::from_u8(byte >> 4) else {
            return vm_err!(DataTypeMismatch, format!("unknown datatype in {byte:#04x}"));
        };
        let bits = byte & 0x3;
        Ok(SlotMeta {
            datatype,
            vector_size: if bits == 0 { 4 } else { bits },
        })
    }
}

/// The call-scoped copy of the package metadata, extended with one entry per
/// stack slot at index `data_size + stack_offset`.
pub(crate) struct MetadataTable<'b> {
    entries: &'b mut [u8],
    data_size: usize,
}

impl<'b> MetadataTable<'b> {
    pub(crate) fn new(entries: &'b mut [u8], data_size: usize) -> Self {
        MetadataTable { entries, data_size }
    }

    /// Entries are validated at `set_package`, so unknown datatype nibbles
    /// cannot appear here.
    #[inline(always)]
    fn decode(byte: u8) -> SlotMeta {
        let bits = byte & 0x3;
        SlotMeta {
            datatype: DataType::from_u8(byte >> 4).unwrap_or_default(),
            vector_size: if bits == 0 { 4 } else { bits },
        }
    }

    #[inline]
    pub(crate) fn get(&self, slot: usize) -> Result<SlotMeta> {
        match self.entries.get(slot) {
            Some(b) => Ok(Self::decode(*b)),
            None => vm_err!(InvalidSlot, format!("no metadata for slot {slot}")),
        }
    }

    #[inline]
    pub(crate) fn set(&mut self, slot: usize, datatype: DataType, vector_size: u8) -> Result<()> {
        match self.entries.get_mut(slot) {
            Some(b) => {
                *b = SlotMeta::new(datatype, vector_size).pack();
                Ok(())
            }
            None => vm_err!(InvalidSlot, format!("no metadata for slot {slot}")),
        }
    }

    #[inline]
    pub(crate) fn stack(&self, offset: usize) -> Result<SlotMeta> {
        self.get(self.data_size + offset)
    }

    /// Record a K-component push: every covered slot carries `(datatype, K)`.
    pub(crate) fn set_stack(&mut self, offset: usize, datatype: DataType, size: u8) -> Result<()> {
        for i in 0..size as usize {
            self.set(self.data_size + offset + i, datatype, size)?;
        }
        Ok(())
    }

    pub(crate) fn retype(&mut self, slot: usize, datatype: DataType) -> Result<()> {
        let meta = self.get(slot)?;
        self.set(slot, datatype, meta.vector_size)
    }
}
