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

//! Block views and the per-block kernels of the elimination sweep.
//!
//! Blocks are windows into the caller's panel. At undersized boundaries the
//! real content is aligned against the trailing edge of the block, so
//! neighbouring blocks overlap the same backing memory and a padded block's
//! base offset can point before its first real element. Every kernel takes
//! the explicit `pad`/`from` bounds and touches only indices at or beyond
//! them, which keeps the effective element index inside the panel.
//!
//! All unsafe element access is confined to this module. Soundness rests on
//! the sweep's phase discipline: within a parallel phase no two tasks touch
//! the same element, and sources read by one task are frozen (eliminated
//! columns) for the duration of the phase.

use crate::BLOCK_SIZE;
use crate::blas::{self, Diag, Fill, Op, Side};
use crate::pool::BlockBuf;

/// Minimum alignment the full-block kernel is tuned for.
const KERNEL_ALIGN: usize = 32;

pub(crate) fn is_aligned(ptr: *const f64) -> bool {
    (ptr as usize) % KERNEL_ALIGN == 0
}

/// Non-owning view of one block of the panel.
#[derive(Clone, Copy)]
pub(crate) struct BlockView {
    panel: *mut f64,
    /// Offset of block element (0, 0) relative to the panel base; may be
    /// negative for padded blocks.
    off: isize,
    lda: usize,
}

// Raw window into the shared panel. Concurrent tasks only ever address
// disjoint elements (enforced by the sweep's phase structure), so handing
// copies of the view to worker threads is sound.
unsafe impl Send for BlockView {}
unsafe impl Sync for BlockView {}

impl BlockView {
    pub fn new(panel: *mut f64, off: isize, lda: usize) -> Self {
        Self { panel, off, lda }
    }

    #[inline(always)]
    fn ptr(self, i: usize, j: usize) -> *mut f64 {
        // wrapping: padded blocks form out-of-range base addresses that the
        // pad bounds bring back in range before any dereference.
        self.panel
            .wrapping_offset(self.off + (j * self.lda + i) as isize)
    }

    /// Address of the block base, for the alignment dispatch. Only
    /// meaningful for unpadded blocks.
    pub fn base_addr(self) -> *const f64 {
        self.ptr(0, 0)
    }

    /// Linear panel index of element (i, j), for the sequential epilogue
    /// which works on the plain panel slice.
    #[inline]
    pub fn index(self, i: usize, j: usize) -> usize {
        (self.off + (j * self.lda + i) as isize) as usize
    }

    /// Exclusive slice over the trailing region starting at (r0, c0),
    /// spanning `nrows` by `ncols`, for the sequential in-block kernels.
    ///
    /// # Safety
    /// The region must lie inside the panel and nothing else may access the
    /// panel for the lifetime of the returned slice.
    pub unsafe fn sub_slice_mut<'a>(self, r0: usize, c0: usize, nrows: usize, ncols: usize) -> &'a mut [f64] {
        debug_assert!(nrows > 0 && ncols > 0);
        unsafe { std::slice::from_raw_parts_mut(self.ptr(r0, c0), (ncols - 1) * self.lda + nrows) }
    }

    #[inline(always)]
    pub unsafe fn get(self, i: usize, j: usize) -> f64 {
        unsafe { *self.ptr(i, j) }
    }

    #[inline(always)]
    pub unsafe fn set(self, i: usize, j: usize, v: f64) {
        unsafe { *self.ptr(i, j) = v }
    }

    /// Copy the (pad.., pad..) region into `lwork`.
    pub unsafe fn create_restore_point(self, pad: usize, lwork: &mut [f64]) {
        unsafe {
            for j in pad..BLOCK_SIZE {
                for i in pad..BLOCK_SIZE {
                    lwork[j * BLOCK_SIZE + i] = self.get(i, j);
                }
            }
        }
    }

    /// Take a restore point while applying the pivot block's row
    /// permutation, then write the permuted view back into the block.
    pub unsafe fn create_restore_point_with_row_perm(
        self,
        rpad: usize,
        cpad: usize,
        lperm: &[usize],
        lwork: &mut [f64],
    ) {
        unsafe {
            for j in cpad..BLOCK_SIZE {
                for i in rpad..BLOCK_SIZE {
                    let r = lperm[i];
                    lwork[j * BLOCK_SIZE + i] = self.get(r, j);
                }
            }
            for j in cpad..BLOCK_SIZE {
                for i in rpad..BLOCK_SIZE {
                    self.set(i, j, lwork[j * BLOCK_SIZE + i]);
                }
            }
        }
    }

    /// Column-permutation variant, for blocks below the pivot block.
    pub unsafe fn create_restore_point_with_col_perm(
        self,
        rpad: usize,
        cpad: usize,
        lperm: &[usize],
        lwork: &mut [f64],
    ) {
        unsafe {
            for j in cpad..BLOCK_SIZE {
                let c = lperm[j];
                for i in rpad..BLOCK_SIZE {
                    lwork[j * BLOCK_SIZE + i] = self.get(i, c);
                }
            }
            for j in cpad..BLOCK_SIZE {
                for i in rpad..BLOCK_SIZE {
                    self.set(i, j, lwork[j * BLOCK_SIZE + i]);
                }
            }
        }
    }

    /// Restore the (rfrom.., cfrom..) region from `lwork` after pivots
    /// failed.
    pub unsafe fn restore_part(self, rfrom: usize, cfrom: usize, lwork: &[f64]) {
        unsafe {
            for j in cfrom..BLOCK_SIZE {
                for i in rfrom..BLOCK_SIZE {
                    self.set(i, j, lwork[j * BLOCK_SIZE + i]);
                }
            }
        }
    }

    /// Restore the diagonal block's failed region, applying the symmetric
    /// permutation chosen by the factorization. Only the lower half of the
    /// restore point holds matrix content, so reads with r > c come from the
    /// transposed position.
    pub unsafe fn restore_part_with_sym_perm(self, from: usize, lperm: &[usize], lwork: &[f64]) {
        unsafe {
            for j in from..BLOCK_SIZE {
                let c = lperm[j];
                for i in from..BLOCK_SIZE {
                    let r = lperm[i];
                    let v = if r > c {
                        lwork[c * BLOCK_SIZE + r]
                    } else {
                        lwork[r * BLOCK_SIZE + c]
                    };
                    self.set(i, j, v);
                }
            }
        }
    }

    /// Solve against the pivot block and scale by the inverse pivots:
    /// `L21 = A21 L11^-T D1^-1` for `Op::N` (block below the pivot block)
    /// or the transposed variant for `Op::T` (block left of the pivot
    /// column).
    ///
    /// `d` starts at the pivot column's first real pivot; the pivot
    /// dimension starts at the pivot block's pad, so `d[2 * (i - pad)]` is
    /// the (inverted) pivot for local index `i`. A zero pivot maps entries
    /// below `small` to zero and everything else to `±∞·v`, which preserves
    /// NaN.
    pub unsafe fn apply_pivot(
        self,
        op: Op,
        rfrom: usize,
        cfrom: usize,
        diag: BlockView,
        d: &[f64],
        small: f64,
    ) {
        if rfrom >= BLOCK_SIZE || cfrom >= BLOCK_SIZE {
            return;
        }
        unsafe {
            match op {
                Op::N => {
                    blas::trsm_raw(
                        Side::Right,
                        Fill::Lower,
                        Op::T,
                        Diag::Unit,
                        BLOCK_SIZE - rfrom,
                        BLOCK_SIZE - cfrom,
                        1.0,
                        diag.ptr(cfrom, cfrom),
                        diag.lda,
                        self.ptr(rfrom, cfrom),
                        self.lda,
                    );
                    // Scale columns by D^-1, walking 1x1 and 2x2 pivots.
                    let pad = cfrom;
                    let mut i = cfrom;
                    while i < BLOCK_SIZE {
                        let k = 2 * (i - pad);
                        if i + 1 == BLOCK_SIZE || d[k + 2].is_finite() {
                            let d11 = d[k];
                            if d11 == 0.0 {
                                for r in rfrom..BLOCK_SIZE {
                                    let v = self.get(r, i);
                                    let w = if v.abs() < small {
                                        0.0
                                    } else {
                                        f64::INFINITY * v
                                    };
                                    self.set(r, i, w);
                                }
                            } else {
                                for r in rfrom..BLOCK_SIZE {
                                    self.set(r, i, self.get(r, i) * d11);
                                }
                            }
                            i += 1;
                        } else {
                            let d11 = d[k];
                            let d21 = d[k + 1];
                            let d22 = d[k + 3];
                            for r in rfrom..BLOCK_SIZE {
                                let a1 = self.get(r, i);
                                let a2 = self.get(r, i + 1);
                                self.set(r, i, d11 * a1 + d21 * a2);
                                self.set(r, i + 1, d21 * a1 + d22 * a2);
                            }
                            i += 2;
                        }
                    }
                }
                Op::T => {
                    blas::trsm_raw(
                        Side::Left,
                        Fill::Lower,
                        Op::N,
                        Diag::Unit,
                        BLOCK_SIZE - rfrom,
                        BLOCK_SIZE - cfrom,
                        1.0,
                        diag.ptr(rfrom, rfrom),
                        diag.lda,
                        self.ptr(rfrom, cfrom),
                        self.lda,
                    );
                    // Scale rows by D^-1.
                    let pad = rfrom;
                    let mut i = rfrom;
                    while i < BLOCK_SIZE {
                        let k = 2 * (i - pad);
                        if i + 1 == BLOCK_SIZE || d[k + 2].is_finite() {
                            let d11 = d[k];
                            if d11 == 0.0 {
                                for c in cfrom..BLOCK_SIZE {
                                    let v = self.get(i, c);
                                    let w = if v.abs() < small {
                                        0.0
                                    } else {
                                        f64::INFINITY * v
                                    };
                                    self.set(i, c, w);
                                }
                            } else {
                                for c in cfrom..BLOCK_SIZE {
                                    self.set(i, c, self.get(i, c) * d11);
                                }
                            }
                            i += 1;
                        } else {
                            let d11 = d[k];
                            let d21 = d[k + 1];
                            let d22 = d[k + 3];
                            for c in cfrom..BLOCK_SIZE {
                                let a1 = self.get(i, c);
                                let a2 = self.get(i + 1, c);
                                self.set(i, c, d11 * a1 + d21 * a2);
                                self.set(i + 1, c, d21 * a1 + d22 * a2);
                            }
                            i += 2;
                        }
                    }
                }
            }
        }
    }

    /// Scan the uneliminated region for an entry exceeding `1/u` and return
    /// the first pivot column that cannot be accepted, or `BLOCK_SIZE` when
    /// every entry passes. The pivot dimension is the columns for `Op::N`
    /// and the rows for `Op::T`, and is scanned in the outer loop so the
    /// returned index is minimal.
    pub unsafe fn check_threshold(self, op: Op, rfrom: usize, cfrom: usize, u: f64) -> usize {
        let limit = 1.0 / u;
        unsafe {
            match op {
                Op::N => {
                    for j in cfrom..BLOCK_SIZE {
                        for i in rfrom..BLOCK_SIZE {
                            if self.get(i, j).abs() > limit {
                                return j;
                            }
                        }
                    }
                }
                Op::T => {
                    for i in rfrom..BLOCK_SIZE {
                        for j in cfrom..BLOCK_SIZE {
                            if self.get(i, j).abs() > limit {
                                return i;
                            }
                        }
                    }
                }
            }
        }
        BLOCK_SIZE
    }

    /// Rank-(nelim-npad) update `A -= L (LD)^T` against the just-eliminated
    /// column. `l` is addressed in the pivot column's layout for `Op::N` and
    /// transposed for `Op::T`; `ld` is the per-task scratch with leading
    /// dimension `BLOCK_SIZE`.
    pub unsafe fn update(
        self,
        op: Op,
        npad: usize,
        nelim: usize,
        l: BlockView,
        ld: &[f64],
        rfrom: usize,
        cfrom: usize,
    ) {
        if nelim <= npad || rfrom >= BLOCK_SIZE || cfrom >= BLOCK_SIZE {
            return;
        }
        let (opb, bptr) = match op {
            Op::N => (Op::T, l.ptr(cfrom, npad)),
            Op::T => (Op::N, l.ptr(npad, cfrom)),
        };
        unsafe {
            blas::gemm_raw(
                Op::N,
                opb,
                BLOCK_SIZE - rfrom,
                BLOCK_SIZE - cfrom,
                nelim - npad,
                -1.0,
                ld.as_ptr().add(npad * BLOCK_SIZE + rfrom),
                BLOCK_SIZE,
                bptr,
                l.lda,
                1.0,
                self.ptr(rfrom, cfrom),
                self.lda,
            );
        }
    }

    /// First NaN in the (rfrom.., cfrom..) region, if any. Debug aid.
    pub unsafe fn find_nan(self, rfrom: usize, cfrom: usize) -> Option<(usize, usize)> {
        unsafe {
            for j in cfrom..BLOCK_SIZE {
                for i in rfrom..BLOCK_SIZE {
                    if self.get(i, j).is_nan() {
                        return Some((i, j));
                    }
                }
            }
        }
        None
    }
}

/// Per-block state: the backing view plus the restore buffer held while the
/// block is the target of pending apply/update work in the current step.
pub(crate) struct BlockData {
    pub view: BlockView,
    pub lwork: Option<BlockBuf>,
}

impl BlockData {
    pub fn new(view: BlockView) -> Self {
        Self { view, lwork: None }
    }
}

/// Compute the LD columns for an update from L and the stored inverse
/// pivots. `(r0, c0)` is the base element of the L window inside `l`
/// (transposed access for `Op::T`); column `col` of the result lands at
/// `ld[(c0 + col) * BLOCK_SIZE + r0 + row]`, matching the offsets the
/// update kernel reads from.
pub(crate) unsafe fn calc_ld(
    op: Op,
    m: usize,
    n: usize,
    l: BlockView,
    r0: usize,
    c0: usize,
    d: &[f64],
    ld: &mut [f64],
) {
    let lval = |row: usize, col: usize| unsafe {
        match op {
            Op::N => l.get(r0 + row, c0 + col),
            Op::T => l.get(c0 + col, r0 + row),
        }
    };
    let mut col = 0;
    while col < n {
        if col + 1 == n || d[2 * col + 2].is_finite() {
            // Stored as the inverse; zero pivots contribute zero columns.
            let mut d11 = d[2 * col];
            if d11 != 0.0 {
                d11 = 1.0 / d11;
            }
            for row in 0..m {
                ld[(c0 + col) * BLOCK_SIZE + r0 + row] = d11 * lval(row, col);
            }
            col += 1;
        } else {
            // Invert the stored 2x2 inverse back to D via its adjugate.
            let di11 = d[2 * col];
            let di21 = d[2 * col + 1];
            let di22 = d[2 * col + 3];
            let det = di11 * di22 - di21 * di21;
            let d11 = di11 / det;
            let d21 = di21 / det;
            let d22 = di22 / det;
            for row in 0..m {
                let a1 = lval(row, col);
                let a2 = lval(row, col + 1);
                ld[(c0 + col) * BLOCK_SIZE + r0 + row] = d22 * a1 - d21 * a2;
                ld[(c0 + col + 1) * BLOCK_SIZE + r0 + row] = -d21 * a1 + d11 * a2;
            }
            col += 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel(vals: impl Fn(usize, usize) -> f64) -> Vec<f64> {
        let mut p = vec![0.0; BLOCK_SIZE * BLOCK_SIZE];
        for j in 0..BLOCK_SIZE {
            for i in 0..BLOCK_SIZE {
                p[j * BLOCK_SIZE + i] = vals(i, j);
            }
        }
        p
    }

    #[test]
    fn restore_point_round_trip() {
        let mut p = panel(|i, j| (i * 100 + j) as f64);
        let orig = p.clone();
        let view = BlockView::new(p.as_mut_ptr(), 0, BLOCK_SIZE);
        let mut lwork = vec![0.0; BLOCK_SIZE * BLOCK_SIZE];
        unsafe {
            view.create_restore_point(0, &mut lwork);
            for j in 0..BLOCK_SIZE {
                for i in 0..BLOCK_SIZE {
                    view.set(i, j, -1.0);
                }
            }
            view.restore_part(0, 0, &lwork);
        }
        assert_eq!(p, orig);
    }

    #[test]
    fn row_perm_restore_point_permutes_in_place() {
        let mut p = panel(|i, j| (i * 100 + j) as f64);
        let view = BlockView::new(p.as_mut_ptr(), 0, BLOCK_SIZE);
        let mut lperm: Vec<usize> = (0..BLOCK_SIZE).collect();
        lperm.swap(0, 1);
        let mut lwork = vec![0.0; BLOCK_SIZE * BLOCK_SIZE];
        unsafe {
            view.create_restore_point_with_row_perm(0, 0, &lperm, &mut lwork);
            // Row 0 now holds what row 1 held.
            assert_eq!(view.get(0, 5), 105.0);
            assert_eq!(view.get(1, 5), 5.0);
            assert_eq!(view.get(2, 5), 205.0);
        }
    }

    #[test]
    fn col_perm_restore_point_permutes_in_place() {
        let mut p = panel(|i, j| (i * 100 + j) as f64);
        let view = BlockView::new(p.as_mut_ptr(), 0, BLOCK_SIZE);
        let mut lperm: Vec<usize> = (0..BLOCK_SIZE).collect();
        lperm.swap(2, 3);
        let mut lwork = vec![0.0; BLOCK_SIZE * BLOCK_SIZE];
        unsafe {
            view.create_restore_point_with_col_perm(0, 0, &lperm, &mut lwork);
            assert_eq!(view.get(7, 2), 703.0);
            assert_eq!(view.get(7, 3), 702.0);
        }
    }

    #[test]
    fn check_threshold_reports_first_failing_pivot() {
        let mut p = panel(|_, _| 0.0);
        let view = BlockView::new(p.as_mut_ptr(), 0, BLOCK_SIZE);
        unsafe {
            // For Op::T the pivot dimension is the rows: a failure at row 3
            // must win over a failure at row 5 in an earlier column.
            view.set(5, 0, 1e10);
            view.set(3, 4, 1e10);
            assert_eq!(view.check_threshold(Op::T, 0, 0, 0.01), 3);
            assert_eq!(view.check_threshold(Op::N, 0, 0, 0.01), 0);
            // All within limit passes.
            view.set(5, 0, 1.0);
            view.set(3, 4, -1.0);
            assert_eq!(view.check_threshold(Op::N, 0, 0, 0.01), BLOCK_SIZE);
        }
    }

    #[test]
    fn negative_offset_view_addresses_trailing_content() {
        // A padded block whose base points one column and one row before the
        // buffer; only indices >= 1 are touched.
        let mut p = panel(|i, j| (i * 100 + j) as f64);
        let off = -(BLOCK_SIZE as isize) - 1;
        let view = BlockView::new(p.as_mut_ptr(), off, BLOCK_SIZE);
        unsafe {
            assert_eq!(view.get(1, 1), 0.0);
            assert_eq!(view.get(2, 1), 100.0);
        }
        assert_eq!(view.index(1, 1), 0);
    }

    #[test]
    fn update_applies_rank_one_correction() {
        // Target block T -= L * (LD)^T with a single eliminated column.
        let mut p = panel(|_, _| 1.0);
        let target = BlockView::new(p.as_mut_ptr(), 0, BLOCK_SIZE);
        let mut lp = panel(|i, _| i as f64);
        let l = BlockView::new(lp.as_mut_ptr(), 0, BLOCK_SIZE);
        let mut ld = vec![0.0; BLOCK_SIZE * BLOCK_SIZE];
        // D = 2 (stored inverse 0.5), L column 0 = i.
        let d = [0.5, 0.0];
        unsafe {
            calc_ld(Op::N, BLOCK_SIZE, 1, l, 0, 0, &d, &mut ld);
            assert_eq!(ld[3], 2.0 * 3.0);
            target.update(Op::N, 0, 1, l, &ld, 0, 0);
            // T[i][j] = 1 - (2*i) * j
            assert_eq!(target.get(2, 3), 1.0 - 4.0 * 3.0);
        }
    }

    #[test]
    fn calc_ld_two_by_two_recovers_d() {
        // Stored inverse of D = [[0,1],[1,0]] is itself; LD must equal L*D.
        let mut lp = panel(|i, j| ((i + 1) * (j + 1)) as f64);
        let l = BlockView::new(lp.as_mut_ptr(), 0, BLOCK_SIZE);
        let d = [0.0, 1.0, f64::INFINITY, 0.0];
        let mut ld = vec![0.0; BLOCK_SIZE * BLOCK_SIZE];
        unsafe {
            calc_ld(Op::N, 4, 2, l, 0, 0, &d, &mut ld);
        }
        // D = [[0,1],[1,0]]: LD col0 = L col1, LD col1 = L col0.
        for row in 0..4 {
            assert_eq!(ld[row], ((row + 1) * 2) as f64);
            assert_eq!(ld[BLOCK_SIZE + row], (row + 1) as f64);
        }
    }
}
