// SPDX-License-Identifier: BSD-3-Clause
//
// This file is based on the SPRAL SSIDS indefinite CPU kernels by
// Jonathan Hogg.
//
// SPRAL, Copyright (c) 2016, The Science and Technology Facilities Council
// (STFC). All Rights Reserved.
// Author: Jonathan Hogg (STFC).
//
// Modifications/porting for this project:
// Copyright (c) 2026 the ldlt_panel developers

//! Per-block-column metadata.

use std::sync::{Mutex, PoisonError};

use crate::BLOCK_SIZE;

/// Bookkeeping for one block column.
///
/// `npad` counts phantom entries at the leading edge of an undersized
/// trailing block, treated as already eliminated. `nelim` is the confirmed
/// elimination count (`npad <= nelim <= BLOCK_SIZE`, monotonically
/// increasing). `npass` is the tentative pass count for the elimination step
/// in flight; apply tasks lower it concurrently under the column lock.
pub(crate) struct ColData {
    pub npad: usize,
    pub nelim: usize,
    /// Offset of this block column's first (possibly phantom) entry in the
    /// caller permutation. Negative for an undersized trailing block, where
    /// the real content is aligned against the trailing edge; only indices
    /// `npad..BLOCK_SIZE` are dereferenced.
    perm_off: isize,
    /// Index into D of this column's first real pivot (two entries per
    /// pivot). Set by the factor step.
    pub d_base: usize,
    pub npass: Mutex<usize>,
}

impl ColData {
    pub fn new(perm_off: isize) -> Self {
        Self {
            npad: 0,
            nelim: 0,
            perm_off,
            d_base: 0,
            npass: Mutex::new(BLOCK_SIZE),
        }
    }

    /// Index into the caller permutation for local entry `i`.
    #[inline]
    pub fn perm_idx(&self, i: usize) -> usize {
        debug_assert!(i >= self.npad && i < BLOCK_SIZE);
        (self.perm_off + i as isize) as usize
    }

    /// Monotonic-min merge of an apply task's threshold result.
    pub fn merge_npass(&self, blkpass: usize) {
        let mut npass = self.npass.lock().unwrap_or_else(PoisonError::into_inner);
        if blkpass < *npass {
            *npass = blkpass;
        }
    }

    /// Reset the tentative pass count before the apply tasks run.
    pub fn reset_npass(&self) {
        *self.npass.lock().unwrap_or_else(PoisonError::into_inner) = BLOCK_SIZE;
    }

    /// Read the settled pass count once all apply tasks are done.
    pub fn take_npass(&mut self) -> usize {
        *self
            .npass
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Compact this column's surviving permutation entries to `perm[insert..]`
    /// and push the failed ones onto `failed`. Source and destination may
    /// overlap; the destination never extends past the source start, so an
    /// ascending copy is safe.
    pub fn move_back(&self, perm: &mut [usize], insert: usize, failed: &mut Vec<usize>) {
        let src = self.perm_idx(self.npad);
        let count = self.nelim - self.npad;
        if src != insert {
            perm.copy_within(src..src + count, insert);
        }
        for i in self.nelim..BLOCK_SIZE {
            failed.push(perm[self.perm_idx(i)]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_back_compacts_and_collects_failed() {
        let mut perm: Vec<usize> = (100..100 + BLOCK_SIZE).collect();
        let mut col = ColData::new(0);
        col.nelim = 3;
        // Pretend entries 0..3 survived and the rest failed; compact to the
        // front of a shifted insertion point.
        let mut failed = Vec::new();
        col.move_back(&mut perm, 0, &mut failed);
        assert_eq!(&perm[0..3], &[100, 101, 102]);
        assert_eq!(failed.len(), BLOCK_SIZE - 3);
        assert_eq!(failed[0], 103);
    }

    #[test]
    fn merge_npass_is_monotonic() {
        let col = ColData::new(0);
        col.merge_npass(10);
        col.merge_npass(20);
        assert_eq!(*col.npass.lock().unwrap(), 10);
        col.merge_npass(5);
        assert_eq!(*col.npass.lock().unwrap(), 5);
    }

    #[test]
    fn negative_offset_resolves_for_real_entries() {
        // Trailing block with one real column: npad = BLOCK_SIZE - 1.
        let mut col = ColData::new(1 - (BLOCK_SIZE as isize));
        col.npad = BLOCK_SIZE - 1;
        col.nelim = BLOCK_SIZE - 1;
        assert_eq!(col.perm_idx(BLOCK_SIZE - 1), 0);
    }
}
