//! Solve phases against a factored panel: forward substitution with the
//! unit-lower L, diagonal solve through the sentinel-encoded D, and
//! backward substitution with L transposed.
//!
//! `l` is the factored panel (`m` rows, the leading `n` columns of L with
//! an implicit unit diagonal); the right-hand side `x` carries `m` rows per
//! column. Single right-hand sides go through `trsv`/`gemv`, multiple
//! through `trsm`/`gemm`.

use crate::blas::{self, Diag, Fill, Op, Side, host_gemv, host_trsm, host_trsv};

/// `x <- L^-1 x` (rows `n..m` receive the rectangular contribution).
pub fn solve_fwd(m: usize, n: usize, l: &[f64], ldl: usize, nrhs: usize, x: &mut [f64], ldx: usize) {
    if nrhs == 1 {
        host_trsv(Fill::Lower, Op::N, Diag::Unit, n, l, ldl, x, 1);
        if m > n {
            let (xt, xb) = x.split_at_mut(n);
            host_gemv(Op::N, m - n, n, -1.0, &l[n..], ldl, xt, 1, 1.0, xb, 1);
        }
    } else {
        host_trsm(Side::Left, Fill::Lower, Op::N, Diag::Unit, n, nrhs, 1.0, l, ldl, x, ldx);
        if m > n {
            // Reads rows 0..n and writes rows n..m of the same right-hand
            // side; the regions interleave across columns, so go through
            // the raw kernel with a single derived pointer.
            unsafe {
                let xp = x.as_mut_ptr();
                blas::gemm_raw(
                    Op::N,
                    Op::N,
                    m - n,
                    nrhs,
                    n,
                    -1.0,
                    l.as_ptr().add(n),
                    ldl,
                    xp,
                    ldx,
                    1.0,
                    xp.add(n),
                    ldx,
                );
            }
        }
    }
}

/// `x <- D^-1 x`, walking 1x1 and 2x2 pivots through the finite sentinel.
/// D is stored inverted, so this is a sequence of small multiplies.
pub fn solve_diag(n: usize, d: &[f64], x: &mut [f64]) {
    let mut i = 0;
    while i < n {
        if i + 1 == n || d[2 * i + 2].is_finite() {
            x[i] *= d[2 * i];
            i += 1;
        } else {
            let d11 = d[2 * i];
            let d21 = d[2 * i + 1];
            let d22 = d[2 * i + 3];
            let x1 = x[i];
            let x2 = x[i + 1];
            x[i] = d11 * x1 + d21 * x2;
            x[i + 1] = d21 * x1 + d22 * x2;
            i += 2;
        }
    }
}

/// `x <- L^-T x` (rows `n..m` contribute back into the pivot rows first).
pub fn solve_bwd(m: usize, n: usize, l: &[f64], ldl: usize, nrhs: usize, x: &mut [f64], ldx: usize) {
    if nrhs == 1 {
        if m > n {
            let (xt, xb) = x.split_at_mut(n);
            host_gemv(Op::T, m - n, n, -1.0, &l[n..], ldl, xb, 1, 1.0, xt, 1);
        }
        host_trsv(Fill::Lower, Op::T, Diag::Unit, n, l, ldl, x, 1);
    } else {
        if m > n {
            unsafe {
                let xp = x.as_mut_ptr();
                blas::gemm_raw(
                    Op::T,
                    Op::N,
                    n,
                    nrhs,
                    m - n,
                    -1.0,
                    l.as_ptr().add(n),
                    ldl,
                    xp.add(n),
                    ldx,
                    1.0,
                    xp,
                    ldx,
                );
            }
        }
        host_trsm(Side::Left, Fill::Lower, Op::T, Diag::Unit, n, nrhs, 1.0, l, ldl, x, ldx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FactorConfig;
    use crate::factor::factor;

    #[test]
    fn diag_solve_mixes_two_by_two() {
        // D^-1 = [[0,1],[1,0]] then a 1x1 with inverse 0.5.
        let d = [0.0, 1.0, f64::INFINITY, 0.0, 0.5, 0.0];
        let mut x = [3.0, 4.0, 8.0];
        solve_diag(3, &d, &mut x);
        assert_eq!(x, [4.0, 3.0, 4.0]);
    }

    /// Full factor-then-solve round trip on a small symmetric system.
    fn solve_round_trip(full: &[f64], n: usize, m: usize) {
        let lda = m;
        let mut a = vec![0.0; lda * n];
        for j in 0..n {
            for i in j..m {
                a[j * lda + i] = full[j * m + i];
            }
        }
        let a_orig = a.clone();
        let mut perm: Vec<usize> = (0..n).collect();
        let mut d = vec![0.0; 2 * n];
        let config = FactorConfig::default();
        let ne = factor(m, n, &mut perm, &mut a, lda, &mut d, &config).unwrap();
        assert_eq!(ne, n, "no delays expected for this system");
        // Solve A z = b on the full m-variable system (rows n..m belong to
        // the trailing identity-extended part in these fixtures, so only
        // n-variable systems are exercised here).
        assert_eq!(m, n);
        let b: Vec<f64> = (0..n).map(|i| (i + 1) as f64).collect();
        let mut x: Vec<f64> = (0..n).map(|k| b[perm[k]]).collect();
        solve_fwd(n, n, &a, lda, 1, &mut x, n);
        solve_diag(n, &d, &mut x);
        solve_bwd(n, n, &a, lda, 1, &mut x, n);
        let mut z = vec![0.0; n];
        for k in 0..n {
            z[perm[k]] = x[k];
        }
        // Residual against the original symmetric matrix.
        for i in 0..n {
            let mut s = 0.0;
            for j in 0..n {
                let aij = if i >= j {
                    a_orig[j * lda + i]
                } else {
                    a_orig[i * lda + j]
                };
                s += aij * z[j];
            }
            assert!((s - b[i]).abs() < 1e-9, "residual row {i}: {s} vs {}", b[i]);
        }
    }

    #[test]
    fn factor_solve_definite() {
        let n = 4;
        #[rustfmt::skip]
        let full = [
            4.0, 1.0, 0.5, 0.0,
            1.0, 3.0, 1.0, 0.5,
            0.5, 1.0, 5.0, 1.0,
            0.0, 0.5, 1.0, 2.0,
        ];
        solve_round_trip(&full, n, n);
    }

    #[test]
    fn factor_solve_indefinite() {
        // Saddle-point structure forces 2x2 pivots.
        let n = 4;
        #[rustfmt::skip]
        let full = [
            0.0, 1.0, 0.2, 0.0,
            1.0, 0.0, 0.0, 0.3,
            0.2, 0.0, 2.0, 0.1,
            0.0, 0.3, 0.1, -1.5,
        ];
        solve_round_trip(&full, n, n);
    }

    #[test]
    fn multi_rhs_matches_single() {
        let n = 3;
        #[rustfmt::skip]
        let full = [
            3.0, 1.0, 0.0,
            1.0, 4.0, 1.0,
            0.0, 1.0, 5.0,
        ];
        let lda = n;
        let mut a = vec![0.0; lda * n];
        for j in 0..n {
            for i in j..n {
                a[j * lda + i] = full[j * n + i];
            }
        }
        let mut perm: Vec<usize> = (0..n).collect();
        let mut d = vec![0.0; 2 * n];
        let ne = factor(n, n, &mut perm, &mut a, lda, &mut d, &FactorConfig::default()).unwrap();
        assert_eq!(ne, n);
        let mut single = vec![1.0, -2.0, 0.5];
        solve_fwd(n, n, &a, lda, 1, &mut single, n);
        solve_diag(n, &d, &mut single);
        solve_bwd(n, n, &a, lda, 1, &mut single, n);
        // Two identical columns through the trsm/gemm path.
        let mut multi = vec![1.0, -2.0, 0.5, 1.0, -2.0, 0.5];
        solve_fwd(n, n, &a, lda, 2, &mut multi, n);
        for col in multi.chunks_mut(n) {
            solve_diag(n, &d, col);
        }
        solve_bwd(n, n, &a, lda, 2, &mut multi, n);
        for c in 0..2 {
            for i in 0..n {
                assert!((multi[c * n + i] - single[i]).abs() < 1e-12);
            }
        }
    }
}
