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

//! The elimination sweep: one fork-join round per block column.
//!
//! Per column: factor the diagonal block (sequential), apply the pivots to
//! every block in the pivot row and column with restore points and the
//! shared threshold verdict (parallel), commit the pass count with the 2x2
//! back-off (sequential), restore failed rows/columns and release the
//! restore buffers (parallel), then apply the rank-k updates to the
//! remaining blocks (parallel). The phase boundaries realize the
//! happens-before edges the data dependences demand: the factor precedes
//! every apply, all applies precede the adjust, and the adjust precedes
//! every restore/update of its column.
//!
//! Restores and updates run in separate phases: restores touch only the
//! failed region (index >= nelim) of the pivot row/column blocks, while the
//! updates read only their frozen eliminated columns (< nelim), so the two
//! phases never touch an element the other reads.

use std::sync::Arc;

use rayon::prelude::*;

use crate::BLOCK_SIZE;
use crate::blas::Op;
use crate::block::{self, BlockData, calc_ld};
use crate::block_ldlt::block_ldlt;
use crate::col::ColData;
use crate::FactorConfig;
use crate::ldlt_tpp::ldlt_tpp_factor;
use crate::pool::BlockPool;

/// First real row of block row `iblk`, given the confirmed eliminations:
/// already-eliminated rows of pivot block rows are frozen, and trailing
/// rectangular blocks lead with phantom rows where they overlap their
/// predecessor.
#[inline]
fn row_from(iblk: usize, nblk: usize, m: usize, n: usize, cdata: &[ColData]) -> usize {
    if iblk < nblk {
        cdata[iblk].nelim
    } else {
        ((iblk - nblk + 1) * BLOCK_SIZE).saturating_sub(m - n)
    }
}

/// Leading phantom rows of block row `iblk` (independent of elimination
/// state), used when taking restore points.
#[inline]
fn row_pad(iblk: usize, nblk: usize, m: usize, n: usize, cdata: &[ColData]) -> usize {
    if iblk < nblk {
        cdata[iblk].npad
    } else {
        ((iblk - nblk + 1) * BLOCK_SIZE).saturating_sub(m - n)
    }
}

/// Run the elimination sweep over all block columns. Returns the number of
/// confirmed eliminations.
pub(crate) fn run_elim(
    m: usize,
    n: usize,
    mblk: usize,
    nblk: usize,
    cdata: &mut [ColData],
    blkdata: &mut [BlockData],
    perm: &mut [usize],
    d: &mut [f64],
    lda: usize,
    pool: &Arc<BlockPool>,
    config: &FactorConfig,
) -> usize {
    let mut next_elim = 0;
    let mut lperm = vec![0usize; BLOCK_SIZE];
    let mut ld = vec![0.0; BLOCK_SIZE * BLOCK_SIZE];

    for blk in 0..nblk {
        // Entirely padded out; nothing to eliminate.
        if cdata[blk].npad >= BLOCK_SIZE {
            continue;
        }

        if config.debug {
            eprintln!("Bcol {blk}:");
            print_mat(mblk, nblk, m, n, blkdata, cdata, perm);
        }

        let diag_idx = blk * mblk + blk;

        // Factor the diagonal block. The restore point is taken before the
        // kernel runs so failed pivots can be rolled back once the pass
        // count is known.
        {
            let dpad = cdata[blk].npad;
            for (i, p) in lperm.iter_mut().enumerate() {
                *p = i;
            }
            let mut lwork = pool.get_wait();
            let dblk = blkdata[diag_idx].view;
            unsafe {
                dblk.create_restore_point(dpad, &mut lwork);
            }
            cdata[blk].d_base = 2 * next_elim;
            let d_col = &mut d[2 * next_elim..];
            if dpad > 0 || !block::is_aligned(dblk.base_addr()) {
                let nb = BLOCK_SIZE - dpad;
                // The factor step is sequential; nothing else touches the
                // panel while this exclusive window is alive.
                let sub = unsafe { dblk.sub_slice_mut(dpad, dpad, nb, nb) };
                let passed = ldlt_tpp_factor(
                    nb,
                    nb,
                    &mut lperm[dpad..],
                    sub,
                    lda,
                    d_col,
                    &mut ld,
                    BLOCK_SIZE,
                    config.u,
                    config.small,
                );
                // A square block always admits a threshold pivot; a
                // shortfall here is a bug, not a numerical outcome.
                assert_eq!(passed, nb, "in-block factorization left columns uneliminated");
                let mut temp = [0usize; BLOCK_SIZE];
                for i in dpad..BLOCK_SIZE {
                    temp[i] = perm[cdata[blk].perm_idx(lperm[i])];
                }
                for i in dpad..BLOCK_SIZE {
                    perm[cdata[blk].perm_idx(i)] = temp[i];
                }
            } else {
                let sub = unsafe { dblk.sub_slice_mut(0, 0, BLOCK_SIZE, BLOCK_SIZE) };
                let p0 = cdata[blk].perm_idx(0);
                block_ldlt(
                    0,
                    &mut perm[p0..p0 + BLOCK_SIZE],
                    sub,
                    lda,
                    d_col,
                    &mut ld,
                    config.u,
                    config.small,
                    &mut lperm,
                );
            }
            blkdata[diag_idx].lwork = Some(lwork);
            cdata[blk].reset_npass();
        }

        // Apply the pivots across the pivot row and pivot column. Each task
        // owns its target block; the diagonal block and the pivot data are
        // read-only here.
        {
            let dblk_view = blkdata[diag_idx].view;
            let cdata_ref: &[ColData] = cdata;
            let d_ref: &[f64] = d;
            let d_base = cdata_ref[blk].d_base;
            let lperm_ref: &[usize] = &lperm;
            blkdata.par_iter_mut().enumerate().for_each(|(idx, bd)| {
                let (col, row) = (idx / mblk, idx % mblk);
                if row == blk && col < blk {
                    let mut lwork = pool.get_wait();
                    let rpad = cdata_ref[blk].npad;
                    unsafe {
                        bd.view.create_restore_point_with_row_perm(
                            rpad,
                            cdata_ref[col].npad,
                            lperm_ref,
                            &mut lwork,
                        );
                        bd.view.apply_pivot(
                            Op::T,
                            rpad,
                            cdata_ref[col].nelim,
                            dblk_view,
                            &d_ref[d_base..],
                            config.small,
                        );
                        let pass =
                            bd.view
                                .check_threshold(Op::T, rpad, cdata_ref[col].nelim, config.u);
                        cdata_ref[blk].merge_npass(pass);
                    }
                    bd.lwork = Some(lwork);
                } else if col == blk && row > blk {
                    let mut lwork = pool.get_wait();
                    let rpad = row_pad(row, nblk, m, n, cdata_ref);
                    let cpad = cdata_ref[blk].npad;
                    unsafe {
                        bd.view
                            .create_restore_point_with_col_perm(rpad, cpad, lperm_ref, &mut lwork);
                        bd.view.apply_pivot(
                            Op::N,
                            rpad,
                            cpad,
                            dblk_view,
                            &d_ref[d_base..],
                            config.small,
                        );
                        let rfrom = row_from(row, nblk, m, n, cdata_ref);
                        let pass = bd.view.check_threshold(Op::N, rfrom, cpad, config.u);
                        cdata_ref[blk].merge_npass(pass);
                    }
                    bd.lwork = Some(lwork);
                }
            });
        }

        // Commit the pass count: never split a 2x2 pivot across the
        // boundary, then advance the confirmed count.
        {
            let cd = &mut cdata[blk];
            let mut npass = cd.take_npass();
            if npass > cd.npad {
                let k = cd.d_base + 2 * (npass - 1 - cd.npad);
                let d11 = d[k];
                let d21 = d[k + 1];
                if d21 != 0.0 && d11 != f64::INFINITY {
                    // Last accepted column is the first half of a 2x2.
                    npass -= 1;
                }
            }
            if config.debug {
                eprintln!("Adjusted to {npass}");
            }
            next_elim += npass - cd.npad;
            cd.nelim = npass;
        }

        // Roll back the failed region of the just-finished row and column
        // and hand every restore buffer back to the pool.
        {
            let nelim = cdata[blk].nelim;
            let cdata_ref: &[ColData] = cdata;
            let lperm_ref: &[usize] = &lperm;
            blkdata.par_iter_mut().enumerate().for_each(|(idx, bd)| {
                let (col, row) = (idx / mblk, idx % mblk);
                let pivot_row = row == blk && col < blk;
                let pivot_col = col == blk && row > blk;
                let diag = col == blk && row == blk;
                if !(pivot_row || pivot_col || diag) {
                    return;
                }
                if let Some(lwork) = bd.lwork.take() {
                    if nelim < BLOCK_SIZE {
                        unsafe {
                            if diag {
                                bd.view.restore_part_with_sym_perm(nelim, lperm_ref, &lwork);
                            } else if pivot_row {
                                bd.view.restore_part(nelim, cdata_ref[col].nelim, &lwork);
                            } else {
                                let rfrom = row_from(row, nblk, m, n, cdata_ref);
                                bd.view.restore_part(rfrom, nelim, &lwork);
                            }
                        }
                    }
                    drop(lwork);
                }
            });
        }

        // Rank-k updates against the committed columns.
        let npad = cdata[blk].npad;
        let nelim = cdata[blk].nelim;
        if nelim > npad {
            let mut targets: Vec<(usize, usize, bool)> =
                Vec::with_capacity(mblk * nblk);
            for jblk in 0..blk {
                for iblk in jblk..mblk {
                    targets.push((jblk, iblk, true));
                }
            }
            for jblk in blk..nblk {
                for iblk in jblk..mblk {
                    targets.push((jblk, iblk, false));
                }
            }
            let blk_ref: &[BlockData] = blkdata;
            let cdata_ref: &[ColData] = cdata;
            let d_col: &[f64] = &d[cdata_ref[blk].d_base..];
            targets.par_iter().for_each_init(
                || vec![0.0; BLOCK_SIZE * BLOCK_SIZE],
                |ld, &(jblk, iblk, transposed)| {
                    let target = blk_ref[jblk * mblk + iblk].view;
                    let rfrom = row_from(iblk, nblk, m, n, cdata_ref);
                    let cfrom = cdata_ref[jblk].nelim;
                    unsafe {
                        if transposed {
                            // Column jblk is already processed: its slab in
                            // the pivot row carries L transposed.
                            let l = blk_ref[jblk * mblk + blk].view;
                            if blk <= iblk {
                                let src = blk_ref[blk * mblk + iblk].view;
                                calc_ld(Op::N, BLOCK_SIZE - rfrom, nelim - npad, src, rfrom, npad, d_col, ld);
                            } else {
                                let src = blk_ref[iblk * mblk + blk].view;
                                calc_ld(Op::T, BLOCK_SIZE - rfrom, nelim - npad, src, rfrom, npad, d_col, ld);
                            }
                            target.update(Op::T, npad, nelim, l, ld, rfrom, cfrom);
                        } else {
                            let src = blk_ref[blk * mblk + iblk].view;
                            calc_ld(Op::N, BLOCK_SIZE - rfrom, nelim - npad, src, rfrom, npad, d_col, ld);
                            let l = blk_ref[blk * mblk + jblk].view;
                            target.update(Op::N, npad, nelim, l, ld, rfrom, cfrom);
                        }
                        if config.debug {
                            if let Some((i, j)) = target.find_nan(rfrom, cfrom) {
                                panic!(
                                    "NaN after update of block ({iblk},{jblk}) at ({i},{j})"
                                );
                            }
                        }
                    }
                },
            );
        }
    }

    next_elim
}

/// Block-wise dump of the panel state, for debugging the sweep.
fn print_mat(
    mblk: usize,
    nblk: usize,
    m: usize,
    n: usize,
    blkdata: &[BlockData],
    cdata: &[ColData],
    perm: &[usize],
) {
    for rblk in 0..mblk {
        let rpad = row_pad(rblk, nblk, m, n, cdata);
        for row in rpad..BLOCK_SIZE {
            if rblk < nblk {
                let mark = if row < cdata[rblk].nelim { "X" } else { " " };
                eprint!("{}{mark}:", perm[cdata[rblk].perm_idx(row)]);
            } else {
                eprint!("{}U:", rblk * BLOCK_SIZE + row);
            }
            for cblk in 0..nblk.min(rblk + 1) {
                let view = blkdata[cblk * mblk + rblk].view;
                let cend = if rblk == cblk { row + 1 } else { BLOCK_SIZE };
                for col in cdata[cblk].npad..cend {
                    eprint!(" {:10.4}", unsafe { view.get(row, col) });
                }
            }
            eprintln!();
        }
    }
}
