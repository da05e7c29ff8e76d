// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Lane storage.
//!
//! Callers own one flat `f32` arena and describe where each lane's row
//! begins. Inside a call, `Memory` pairs that arena with the probed layout
//! of the data and stack segments so every move can take the strided fast
//! path when rows are evenly spaced and fall back to per-lane bases
//! otherwise. Both paths must produce identical results.

use crate::layout::Probe;
use crate::primitives::{V4, ZERO};

/// Caller-owned lane rows over a single arena.
pub struct Lanes<'a> {
    arena: &'a mut [f32],
    bases: Vec<usize>,
}

impl<'a> Lanes<'a> {
    /// `count` rows starting at element 0, `stride` elements apart.
    pub fn strided(arena: &'a mut [f32], stride: usize, count: usize) -> Self {
        Lanes {
            arena,
            bases: (0..count).map(|i| i * stride).collect(),
        }
    }

    /// Rows at arbitrary element offsets into `arena`.
    pub fn with_bases(arena: &'a mut [f32], bases: Vec<usize>) -> Self {
        Lanes { arena, bases }
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    pub fn bases(&self) -> &[usize] {
        &self.bases
    }

    /// The `len` elements of lane `lane` starting at `slot`.
    pub fn slot(&self, lane: usize, slot: usize, len: usize) -> Option<&[f32]> {
        let base = *self.bases.get(lane)?;
        self.arena.get(base + slot..base + slot + len)
    }

    pub fn get(&self, lane: usize, slot: usize) -> Option<f32> {
        self.slot(lane, slot, 1).map(|s| s[0])
    }

    pub fn slot_mut(&mut self, lane: usize, slot: usize, len: usize) -> Option<&mut [f32]> {
        let base = *self.bases.get(lane)?;
        self.arena.get_mut(base + slot..base + slot + len)
    }

    /// Index of the first lane whose row of `row_len` elements does not fit
    /// in the arena.
    pub(crate) fn first_out_of_bounds(&self, row_len: usize) -> Option<usize> {
        let len = self.arena.len();
        self.bases
            .iter()
            .position(|b| b.checked_add(row_len).is_none_or(|end| end > len))
    }

    pub(crate) fn split(&mut self) -> (&mut [f32], &[usize]) {
        (&mut *self.arena, &self.bases)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Segment {
    Data,
    Stack,
}

/// Where one segment's rows live inside their backing buffer.
#[derive(Copy, Clone)]
pub(crate) struct SegmentLayout<'l> {
    pub(crate) aligned: bool,
    pub(crate) stride: usize,
    /// Element offset of the segment inside each row.
    shift: usize,
    bases: &'l [usize],
}

impl<'l> SegmentLayout<'l> {
    pub(crate) fn new(probe: Probe, bases: &'l [usize], shift: usize) -> Self {
        SegmentLayout {
            aligned: probe.aligned,
            stride: probe.stride,
            shift,
            bases,
        }
    }

    #[inline(always)]
    fn origin(&self) -> usize {
        self.bases.first().copied().unwrap_or(0) + self.shift
    }

    #[inline(always)]
    fn base(&self, lane: usize) -> usize {
        if self.aligned {
            self.origin() + lane * self.stride
        } else {
            self.bases[lane] + self.shift
        }
    }
}

/// The data and stack segments of every lane for the duration of one call.
pub(crate) struct Memory<'m> {
    lanes: usize,
    arena: &'m mut [f32],
    /// Scratch stack when the package does not carry one per row.
    local: &'m mut [f32],
    data: SegmentLayout<'m>,
    stack: SegmentLayout<'m>,
    packaged: bool,
}

impl<'m> Memory<'m> {
    pub(crate) fn new(
        arena: &'m mut [f32],
        local: &'m mut [f32],
        data: SegmentLayout<'m>,
        stack: SegmentLayout<'m>,
        lanes: usize,
        packaged: bool,
    ) -> Self {
        Memory {
            lanes,
            arena,
            local,
            data,
            stack,
            packaged,
        }
    }

    #[inline(always)]
    fn parts(&mut self, seg: Segment) -> (&mut [f32], SegmentLayout<'m>) {
        match seg {
            Segment::Data => (&mut *self.arena, self.data),
            Segment::Stack if self.packaged => (&mut *self.arena, self.stack),
            Segment::Stack => (&mut *self.local, self.stack),
        }
    }

    #[inline(always)]
    fn parts_ref(&self, seg: Segment) -> (&[f32], SegmentLayout<'m>) {
        match seg {
            Segment::Data => (&*self.arena, self.data),
            Segment::Stack if self.packaged => (&*self.arena, self.stack),
            Segment::Stack => (&*self.local, self.stack),
        }
    }

    #[inline]
    pub(crate) fn read(&self, seg: Segment, lane: usize, slot: usize, size: u8) -> V4 {
        let (buf, layout) = self.parts_ref(seg);
        let at = layout.base(lane) + slot;
        let mut out = ZERO;
        out[..size as usize].copy_from_slice(&buf[at..at + size as usize]);
        out
    }

    #[inline]
    pub(crate) fn read_scalar(&self, seg: Segment, lane: usize, slot: usize) -> f32 {
        let (buf, layout) = self.parts_ref(seg);
        buf[layout.base(lane) + slot]
    }

    #[inline]
    pub(crate) fn write_scalar(&mut self, seg: Segment, lane: usize, slot: usize, v: f32) {
        let (buf, layout) = self.parts(seg);
        buf[layout.base(lane) + slot] = v;
    }

    /// Gather `size` components of `slot` from every lane into `out`.
    #[inline(never)]
    pub(crate) fn load(&self, seg: Segment, slot: usize, size: u8, out: &mut [V4]) {
        let (buf, layout) = self.parts_ref(seg);
        let n = size as usize;
        if layout.aligned {
            let start = layout.origin() + slot;
            for (lane, o) in out.iter_mut().enumerate().take(self.lanes) {
                let at = start + lane * layout.stride;
                o[..n].copy_from_slice(&buf[at..at + n]);
            }
        } else {
            for (lane, o) in out.iter_mut().enumerate().take(self.lanes) {
                let at = layout.base(lane) + slot;
                o[..n].copy_from_slice(&buf[at..at + n]);
            }
        }
    }

    /// Scatter `size` components of each lane's value in `src` into `slot`.
    #[inline(never)]
    pub(crate) fn store(&mut self, seg: Segment, slot: usize, size: u8, src: &[V4]) {
        let lanes = self.lanes;
        let (buf, layout) = self.parts(seg);
        let n = size as usize;
        if layout.aligned {
            let origin = layout.origin();
            let rows = buf[origin..].chunks_mut(layout.stride).take(lanes);
            for (row, v) in rows.zip(src) {
                row[slot..slot + n].copy_from_slice(&v[..n]);
            }
        } else {
            for (lane, v) in src.iter().enumerate().take(lanes) {
                let at = layout.base(lane) + slot;
                buf[at..at + n].copy_from_slice(&v[..n]);
            }
        }
    }

    /// Write the same value into `slot` of every lane.
    #[inline(never)]
    pub(crate) fn fill(&mut self, seg: Segment, slot: usize, size: u8, v: &V4) {
        let lanes = self.lanes;
        let (buf, layout) = self.parts(seg);
        let n = size as usize;
        if layout.aligned {
            let origin = layout.origin();
            for row in buf[origin..].chunks_mut(layout.stride).take(lanes) {
                row[slot..slot + n].copy_from_slice(&v[..n]);
            }
        } else {
            for lane in 0..lanes {
                let at = layout.base(lane) + slot;
                buf[at..at + n].copy_from_slice(&v[..n]);
            }
        }
    }

    /// Slot-to-slot move without staging through a lane buffer.
    #[inline(never)]
    pub(crate) fn copy(&mut self, from: (Segment, usize), to: (Segment, usize), size: u8) {
        let n = size as usize;
        let lanes = self.lanes;
        let same_buffer = self.packaged || from.0 == to.0;
        if same_buffer {
            let src_layout = self.parts_ref(from.0).1;
            let (buf, dst_layout) = self.parts(to.0);
            if src_layout.aligned && dst_layout.aligned {
                // both segments share row starts; only their shifts differ
                let origin = src_layout.bases.first().copied().unwrap_or(0);
                let src_off = src_layout.shift + from.1;
                let dst_off = dst_layout.shift + to.1;
                for row in buf[origin..].chunks_mut(src_layout.stride).take(lanes) {
                    row.copy_within(src_off..src_off + n, dst_off);
                }
            } else {
                for lane in 0..lanes {
                    let src = src_layout.base(lane) + from.1;
                    let dst = dst_layout.base(lane) + to.1;
                    buf.copy_within(src..src + n, dst);
                }
            }
            return;
        }

        let (src_buf, src_layout, dst_buf, dst_layout) = match from.0 {
            Segment::Data => (&*self.arena, self.data, &mut *self.local, self.stack),
            Segment::Stack => (&*self.local, self.stack, &mut *self.arena, self.data),
        };
        for lane in 0..lanes {
            let src = src_layout.base(lane) + from.1;
            let dst = dst_layout.base(lane) + to.1;
            dst_buf[dst..dst + n].copy_from_slice(&src_buf[src..src + n]);
        }
    }
}
