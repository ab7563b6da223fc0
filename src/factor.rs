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

//! Panel driver: validation, block layout, the elimination sweep, and the
//! epilogue that packs survivors to the front and failed pivots to the
//! tail.

use crate::BLOCK_SIZE;
use crate::FactorConfig;
use crate::block::{BlockData, BlockView};
use crate::col::ColData;
use crate::elim::run_elim;
use crate::error::{FactorError, FactorResult};
use crate::pool::BlockPool;

/// Factorize a dense symmetric indefinite panel in place.
///
/// `a` holds the lower triangle of the leading n-by-n pivot block and the
/// trailing (m-n)-by-n rectangular part, column-major with leading
/// dimension `lda`. `perm[..n]` names the pivot candidates; `d` receives
/// `2*n` inverse-pivot entries in the sentinel layout.
///
/// On return the first `num_elim` entries of `perm` are the accepted pivots
/// in elimination order followed by the delayed ones, the first `num_elim`
/// columns of `a` hold the unit-diagonal L, and the failed rows/columns are
/// re-packed behind them awaiting a retry at the parent.
pub fn factor(
    m: usize,
    n: usize,
    perm: &mut [usize],
    a: &mut [f64],
    lda: usize,
    d: &mut [f64],
    config: &FactorConfig,
) -> FactorResult<usize> {
    let mut config = config.clone();
    config.validate()?;
    if m < n {
        return Err(FactorError::RowsLessThanCols { m, n });
    }
    if n == 0 {
        return Ok(0);
    }
    if lda < m {
        return Err(FactorError::LeadingDimensionTooSmall { lda, m });
    }
    let required = (n - 1) * lda + m;
    if a.len() < required {
        return Err(FactorError::PanelTooSmall {
            required,
            actual: a.len(),
        });
    }
    if perm.len() < n {
        return Err(FactorError::PermTooSmall {
            required: n,
            actual: perm.len(),
        });
    }
    if d.len() < 2 * n {
        return Err(FactorError::PivotBufferTooSmall {
            required: 2 * n,
            actual: d.len(),
        });
    }

    match config.num_threads {
        0 => Ok(factor_inner(m, n, perm, a, lda, d, &config)),
        nt => {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(nt).build()?;
            Ok(pool.install(|| factor_inner(m, n, perm, a, lda, d, &config)))
        }
    }
}

fn factor_inner(
    m: usize,
    n: usize,
    perm: &mut [usize],
    a: &mut [f64],
    lda: usize,
    d: &mut [f64],
    config: &FactorConfig,
) -> usize {
    let nblk = (n - 1) / BLOCK_SIZE + 1;
    let mblk = if m > n {
        nblk + (m - n - 1) / BLOCK_SIZE + 1
    } else {
        nblk
    };

    // Block views, content aligned against the trailing edge of each block:
    // undersized blocks share backing memory with their predecessor, and a
    // padded block's base offset can point before its first real element.
    let base = a.as_mut_ptr();
    let ilda = lda as isize;
    let ib = BLOCK_SIZE as isize;
    let mut blkdata = Vec::with_capacity(mblk * nblk);
    for jblk in 0..nblk as isize {
        let coffset = ((jblk + 1) * ib - n as isize).max(0);
        for iblk in 0..nblk as isize {
            let roffset = ((iblk + 1) * ib - n as isize).max(0);
            let off = (jblk * ib - coffset) * ilda + iblk * ib - roffset;
            blkdata.push(BlockData::new(BlockView::new(base, off, lda)));
        }
        for iblk in 0..(mblk - nblk) as isize {
            let roffset = ((iblk + 1) * ib - (m - n) as isize).max(0);
            let off = n as isize + (jblk * ib - coffset) * ilda + iblk * ib - roffset;
            blkdata.push(BlockData::new(BlockView::new(base, off, lda)));
        }
    }

    let mut cdata: Vec<ColData> = (0..nblk)
        .map(|blk| {
            let coffset = if blk == nblk - 1 {
                (nblk * BLOCK_SIZE - n) as isize
            } else {
                0
            };
            ColData::new((blk * BLOCK_SIZE) as isize - coffset)
        })
        .collect();
    if n < nblk * BLOCK_SIZE {
        // Account for the missing leading entries of the short last block as
        // already eliminated.
        let pad = nblk * BLOCK_SIZE - n;
        cdata[nblk - 1].npad = pad;
        cdata[nblk - 1].nelim = pad;
    }

    let pool = BlockPool::new(
        nblk * (nblk + 1) / 2 + mblk * nblk,
        BLOCK_SIZE * BLOCK_SIZE,
    );
    let num_elim = run_elim(
        m, n, mblk, nblk, &mut cdata, &mut blkdata, perm, d, lda, &pool, config,
    );

    // Permute failed entries to the end.
    let mut failed_perm = Vec::with_capacity(n - num_elim);
    let mut insert = 0;
    for cd in &cdata {
        cd.move_back(perm, insert, &mut failed_perm);
        insert += cd.nelim - cd.npad;
    }
    perm[num_elim..num_elim + failed_perm.len()].copy_from_slice(&failed_perm);

    // Extract the failed rows, columns and their intersection before the
    // survivors are compacted over them.
    let nfail = n - num_elim;
    let mut failed_diag = vec![0.0; nfail * n];
    let mut failed_rect = vec![0.0; nfail * (m - n)];
    let mut jinsert = 0;
    let mut jfail = 0;
    for jblk in 0..nblk {
        let jdata = &cdata[jblk];
        let mut iinsert = jinsert;
        let mut ifail = jfail;
        for iblk in jblk..nblk {
            let idata = &cdata[iblk];
            let view = blkdata[jblk * mblk + iblk].view;
            // Failed rows of surviving columns.
            for (jout, j) in (jdata.npad..jdata.nelim).enumerate() {
                for (iout, i) in (idata.nelim..BLOCK_SIZE).enumerate() {
                    failed_diag[(jinsert + jout) * nfail + ifail + iout] = a[view.index(i, j)];
                }
            }
            // Failed columns against surviving rows, stored transposed
            // (the diagonal block contributes these through its rows).
            if iblk != jblk {
                for (iout, j) in (jdata.nelim..BLOCK_SIZE).enumerate() {
                    for (jout, i) in (idata.npad..idata.nelim).enumerate() {
                        failed_diag[(iinsert + jout) * nfail + jfail + iout] = a[view.index(i, j)];
                    }
                }
            }
            // Intersection of failed rows and columns.
            for (jout, j) in (jdata.nelim..BLOCK_SIZE).enumerate() {
                for (iout, i) in (idata.nelim..BLOCK_SIZE).enumerate() {
                    failed_diag[(num_elim + jfail + jout) * nfail + ifail + iout] =
                        a[view.index(i, j)];
                }
            }
            iinsert += idata.nelim - idata.npad;
            ifail += BLOCK_SIZE - idata.nelim;
        }
        for iblk in nblk..mblk {
            let view = blkdata[jblk * mblk + iblk].view;
            let nrow = BLOCK_SIZE.min(m - n - (iblk - nblk) * BLOCK_SIZE);
            let rbase = jfail * (m - n) + (iblk - nblk) * BLOCK_SIZE;
            for (jout, j) in (jdata.nelim..BLOCK_SIZE).enumerate() {
                for (iout, i) in ((BLOCK_SIZE - nrow)..BLOCK_SIZE).enumerate() {
                    failed_rect[rbase + jout * (m - n) + iout] = a[view.index(i, j)];
                }
            }
        }
        jinsert += jdata.nelim - jdata.npad;
        jfail += BLOCK_SIZE - jdata.nelim;
    }

    // Compact the survivors. Destinations never pass their sources, so the
    // ascending sweeps are overlap-safe.
    let mut jinsert = 0;
    for jblk in 0..nblk {
        let jdata = &cdata[jblk];
        let mut iinsert = jinsert;
        for iblk in jblk..nblk {
            let idata = &cdata[iblk];
            let view = blkdata[jblk * mblk + iblk].view;
            for (jout, j) in (jdata.npad..jdata.nelim).enumerate() {
                for (iout, i) in (idata.npad..idata.nelim).enumerate() {
                    a[(jinsert + jout) * lda + iinsert + iout] = a[view.index(i, j)];
                }
            }
            iinsert += idata.nelim - idata.npad;
        }
        for iblk in nblk..mblk {
            let view = blkdata[jblk * mblk + iblk].view;
            let rfrom = ((iblk - nblk + 1) * BLOCK_SIZE).saturating_sub(m - n);
            let rbase = n + (iblk - nblk) * BLOCK_SIZE;
            for (jout, j) in (jdata.npad..jdata.nelim).enumerate() {
                for (iout, i) in (rfrom..BLOCK_SIZE).enumerate() {
                    a[(jinsert + jout) * lda + rbase + iout] = a[view.index(i, j)];
                }
            }
        }
        jinsert += jdata.nelim - jdata.npad;
    }

    // Store the failed entries in their final positions behind the
    // survivors.
    for j in 0..n {
        for i in j.max(num_elim)..n {
            a[j * lda + i] = failed_diag[j * nfail + (i - num_elim)];
        }
    }
    for j in 0..nfail {
        for i in 0..(m - n) {
            a[(num_elim + j) * lda + n + i] = failed_rect[j * (m - n) + i];
        }
    }

    if config.debug {
        eprintln!("FINAL:");
        print_factored(m, n, perm, num_elim, a, lda);
    }

    num_elim
}

/// Flat dump of the factored panel, for debugging.
fn print_factored(m: usize, n: usize, perm: &[usize], num_elim: usize, a: &[f64], lda: usize) {
    for row in 0..m {
        if row < n {
            let mark = if row < num_elim { "X" } else { " " };
            eprint!("{}{mark}:", perm[row]);
        } else {
            eprint!("{row}U:");
        }
        for col in 0..n.min(row + 1) {
            eprint!(" {:10.4}", a[col * lda + row]);
        }
        eprintln!();
    }
}
