// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Detects evenly strided lane rows so bulk operations can walk the arena
//! with `chunks_mut(stride)` instead of indirecting through per-lane bases.

/// Result of probing one segment's row bases.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Probe {
    pub aligned: bool,
    /// Element distance between consecutive rows when aligned.
    pub stride: usize,
}

/// Probe `bases` for a constant, non-overlapping stride.
///
/// `row_len` is the number of elements each row must own; a stride shorter
/// than that would make rows overlap and is treated as unaligned.
pub fn probe(bases: &[usize], row_len: usize) -> Probe {
    let unaligned = Probe {
        aligned: false,
        stride: row_len,
    };
    if bases.len() < 2 {
        return Probe {
            aligned: true,
            stride: row_len.max(1),
        };
    }
    let Some(stride) = bases[1].checked_sub(bases[0]) else {
        return unaligned;
    };
    if stride < row_len || stride == 0 {
        return unaligned;
    }

    let step = |i: usize| bases[i + 1].wrapping_sub(bases[i]);

    let deltas = bases.len() - 1;
    let mut i = 1;
    // four deltas per round before the pairwise tail
    while i + 4 <= deltas {
        if step(i) != stride || step(i + 1) != stride || step(i + 2) != stride || step(i + 3) != stride
        {
            return unaligned;
        }
        i += 4;
    }
    while i < deltas {
        if step(i) != stride {
            return unaligned;
        }
        i += 1;
    }

    Probe {
        aligned: true,
        stride,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_stride() {
        let bases: Vec<usize> = (0..13).map(|i| i * 8).collect();
        assert_eq!(
            Probe {
                aligned: true,
                stride: 8
            },
            probe(&bases, 6)
        );
    }

    #[test]
    fn test_single_lane_is_aligned() {
        assert!(probe(&[40], 4).aligned);
        assert_eq!(4, probe(&[40], 4).stride);
    }

    #[test]
    fn test_mismatch_in_unrolled_region() {
        let mut bases: Vec<usize> = (0..9).map(|i| i * 4).collect();
        bases[3] += 1;
        assert!(!probe(&bases, 4).aligned);
    }

    #[test]
    fn test_mismatch_in_tail() {
        let mut bases: Vec<usize> = (0..7).map(|i| i * 4).collect();
        *bases.last_mut().unwrap() += 4;
        assert!(!probe(&bases, 4).aligned);
    }

    #[test]
    fn test_overlapping_or_descending_rows() {
        assert!(!probe(&[0, 2, 4], 4).aligned);
        assert!(!probe(&[8, 4, 0], 4).aligned);
        assert!(!probe(&[0, 0], 0).aligned);
    }
}
