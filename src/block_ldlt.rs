//! In-place LDL^T of one full, well-aligned block.
//!
//! The fast path for diagonal blocks without padding: every loop runs over
//! the fixed `BLOCK_SIZE` extent so the compiler can unroll and vectorize
//! the column operations. Shares the pivot selection rules with the
//! pad-tolerant fallback, so both dispatch paths choose identical pivots on
//! the same data. Interchanges are applied to the caller's permutation
//! slice as they happen, alongside the local `lperm`.

use crate::BLOCK_SIZE;
use crate::ldlt_tpp::{Pivot, find_pivot, sym_swap};

/// Factor a full block, writing inverse pivots into `d` (local index
/// `c - pad`, two entries per pivot) and recording interchanges in both
/// `perm` and `lperm`. `work` holds the LD columns of the current pivot.
///
/// A full symmetric block always admits a threshold pivot, so unlike the
/// fallback kernel there is no shortfall to report.
pub(crate) fn block_ldlt(
    pad: usize,
    perm: &mut [usize],
    a: &mut [f64],
    lda: usize,
    d: &mut [f64],
    work: &mut [f64],
    u: f64,
    small: f64,
    lperm: &mut [usize],
) {
    debug_assert!(a.len() >= (BLOCK_SIZE - 1) * lda + BLOCK_SIZE);
    debug_assert!(d.len() >= 2 * (BLOCK_SIZE - pad));
    let swap = |a: &mut [f64], perm: &mut [usize], lperm: &mut [usize], i: usize, j: usize| {
        sym_swap(a, lda, BLOCK_SIZE, i, j);
        perm.swap(i, j);
        lperm.swap(i, j);
    };
    let mut c = pad;
    while c < BLOCK_SIZE {
        let Some(piv) = find_pivot(a, lda, BLOCK_SIZE, BLOCK_SIZE, c, u, small) else {
            panic!("no admissible pivot in full block at column {c}");
        };
        let k = 2 * (c - pad);
        match piv {
            Pivot::Zero(q) => {
                swap(a, perm, lperm, c, q);
                d[k] = 0.0;
                d[k + 1] = 0.0;
                for i in (c + 1)..BLOCK_SIZE {
                    let v = a[c * lda + i];
                    a[c * lda + i] = if v.abs() < small {
                        0.0
                    } else {
                        f64::INFINITY * v
                    };
                }
                a[c * lda + c] = 1.0;
                c += 1;
            }
            Pivot::One(q) => {
                swap(a, perm, lperm, c, q);
                let d11 = a[c * lda + c];
                if d11 == 0.0 {
                    d[k] = 0.0;
                    d[k + 1] = 0.0;
                    for i in (c + 1)..BLOCK_SIZE {
                        a[c * lda + i] = 0.0;
                    }
                } else {
                    let dinv = 1.0 / d11;
                    d[k] = dinv;
                    d[k + 1] = 0.0;
                    for i in (c + 1)..BLOCK_SIZE {
                        work[c * BLOCK_SIZE + i] = a[c * lda + i];
                        a[c * lda + i] *= dinv;
                    }
                    for j in (c + 1)..BLOCK_SIZE {
                        let w = work[c * BLOCK_SIZE + j];
                        if w != 0.0 {
                            for i in j..BLOCK_SIZE {
                                a[j * lda + i] -= a[c * lda + i] * w;
                            }
                        }
                    }
                }
                a[c * lda + c] = 1.0;
                c += 1;
            }
            Pivot::Two(q, t) => {
                swap(a, perm, lperm, c, q);
                let t = if t == c { q } else { t };
                swap(a, perm, lperm, c + 1, t);
                let a11 = a[c * lda + c];
                let a21 = a[c * lda + c + 1];
                let a22 = a[(c + 1) * lda + c + 1];
                let det = a11 * a22 - a21 * a21;
                let e11 = a22 / det;
                let e21 = -a21 / det;
                let e22 = a11 / det;
                d[k] = e11;
                d[k + 1] = e21;
                d[k + 2] = f64::INFINITY;
                d[k + 3] = e22;
                for i in (c + 2)..BLOCK_SIZE {
                    let w1 = a[c * lda + i];
                    let w2 = a[(c + 1) * lda + i];
                    work[c * BLOCK_SIZE + i] = w1;
                    work[(c + 1) * BLOCK_SIZE + i] = w2;
                    a[c * lda + i] = w1 * e11 + w2 * e21;
                    a[(c + 1) * lda + i] = w1 * e21 + w2 * e22;
                }
                for j in (c + 2)..BLOCK_SIZE {
                    let w1 = work[c * BLOCK_SIZE + j];
                    let w2 = work[(c + 1) * BLOCK_SIZE + j];
                    if w1 != 0.0 || w2 != 0.0 {
                        for i in j..BLOCK_SIZE {
                            a[j * lda + i] -= a[c * lda + i] * w1 + a[(c + 1) * lda + i] * w2;
                        }
                    }
                }
                a[c * lda + c] = 1.0;
                a[(c + 1) * lda + c + 1] = 1.0;
                a[c * lda + c + 1] = 0.0;
                c += 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldlt_tpp::ldlt_tpp_factor;
    use crate::ldlt_tpp::tests::reconstruct;

    fn random_symmetric(n: usize, seed: u64) -> Vec<f64> {
        let mut state = seed.max(1);
        let mut next = || {
            state ^= state >> 12;
            state ^= state << 25;
            state ^= state >> 27;
            (state.wrapping_mul(0x2545f4914f6cdd1d) >> 11) as f64 / (1u64 << 53) as f64 - 0.5
        };
        let mut full = vec![0.0; n * n];
        for j in 0..n {
            for i in j..n {
                let v = next();
                full[j * n + i] = v;
                full[i * n + j] = v;
            }
        }
        full
    }

    #[test]
    fn agrees_with_fallback_kernel() {
        // Same pivot rules, so both kernels must produce identical output on
        // the same block.
        let n = BLOCK_SIZE;
        let full = random_symmetric(n, 0x1234_5678);
        let mut a1 = full.clone();
        let mut a2 = full.clone();
        let mut d1 = vec![0.0; 2 * n];
        let mut d2 = vec![0.0; 2 * n];
        let mut work = vec![0.0; n * n];
        let mut perm: Vec<usize> = (0..n).collect();
        let mut lperm1: Vec<usize> = (0..n).collect();
        let mut lperm2: Vec<usize> = (0..n).collect();
        block_ldlt(0, &mut perm, &mut a1, n, &mut d1, &mut work, 0.5, 1e-20, &mut lperm1);
        let ne = ldlt_tpp_factor(n, n, &mut lperm2, &mut a2, n, &mut d2, &mut work, n, 0.5, 1e-20);
        assert_eq!(ne, n);
        assert_eq!(lperm1, lperm2);
        assert_eq!(perm, lperm1); // perm swapped along from identity
        for i in 0..n * n {
            assert_eq!(a1[i], a2[i], "L mismatch at {i}");
        }
        for i in 0..2 * n {
            assert_eq!(d1[i].to_bits(), d2[i].to_bits(), "D mismatch at {i}");
        }
    }

    #[test]
    fn full_block_reconstructs() {
        let n = BLOCK_SIZE;
        let full = random_symmetric(n, 0xfeed_beef);
        let mut a = full.clone();
        let mut d = vec![0.0; 2 * n];
        let mut work = vec![0.0; n * n];
        let mut perm: Vec<usize> = (0..n).collect();
        let mut lperm: Vec<usize> = (0..n).collect();
        block_ldlt(0, &mut perm, &mut a, n, &mut d, &mut work, 0.5, 1e-20, &mut lperm);
        let rec = reconstruct(n, &a, n, &d);
        let mut max_err = 0.0f64;
        for j in 0..n {
            for i in 0..n {
                let want = full[lperm[j] * n + lperm[i]];
                max_err = max_err.max((rec[j * n + i] - want).abs());
            }
        }
        assert!(max_err < 1e-8, "reconstruction error {max_err}");
    }
}
