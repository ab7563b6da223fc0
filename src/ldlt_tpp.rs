//! Traditional threshold partial pivoting on a single block.
//!
//! Right-looking LDL^T over the lower triangle of an m-by-n window
//! (m >= n). Used for diagonal blocks with padding or misaligned storage,
//! where the fixed-size kernel does not apply. Pivots are recorded as their
//! inverses in the sentinel layout: a 1x1 pivot p as `(1/p, 0)`, a 2x2 pivot
//! E as `(e11, e21)` then `(+inf, e22)` with `E^-1 = [[e11, e21], [e21,
//! e22]]`, a zero pivot as `(0, 0)`.

/// Entry (i, j) of the symmetric matrix held in the lower triangle.
#[inline]
pub(crate) fn sym(a: &[f64], lda: usize, i: usize, j: usize) -> f64 {
    if i >= j { a[j * lda + i] } else { a[i * lda + j] }
}

/// Symmetric row/column interchange i <-> j on the lower triangle,
/// including the rows of any already-eliminated L columns to their left.
pub(crate) fn sym_swap(a: &mut [f64], lda: usize, m: usize, i: usize, j: usize) {
    if i == j {
        return;
    }
    let (i, j) = if i < j { (i, j) } else { (j, i) };
    a.swap(i * lda + i, j * lda + j);
    for k in 0..i {
        a.swap(k * lda + i, k * lda + j);
    }
    for k in (i + 1)..j {
        a.swap(i * lda + k, k * lda + j);
    }
    for k in (j + 1)..m {
        a.swap(i * lda + k, j * lda + k);
    }
}

pub(crate) enum Pivot {
    Zero(usize),
    One(usize),
    Two(usize, usize),
}

/// Scan the remaining candidates for an acceptable pivot. For each
/// candidate column the threshold test prefers the diagonal as a 1x1 pivot
/// and falls back to a 2x2 pair with the column's largest entry; the 2x2
/// growth test is the Duff-Reid bound against `1/u`.
pub(crate) fn find_pivot(
    a: &[f64],
    lda: usize,
    m: usize,
    n: usize,
    c: usize,
    u: f64,
    small: f64,
) -> Option<Pivot> {
    for q in c..n {
        let mut maxval = 0.0f64;
        let mut t = None;
        for i in c..m {
            if i == q {
                continue;
            }
            let v = sym(a, lda, i, q).abs();
            if v > maxval {
                maxval = v;
                // A 2x2 partner must itself be a pivot candidate.
                t = (i < n).then_some(i);
            }
        }
        let diag = a[q * lda + q];
        if diag.abs().max(maxval) < small {
            return Some(Pivot::Zero(q));
        }
        if diag.abs() >= u * maxval {
            return Some(Pivot::One(q));
        }
        let Some(t) = t else { continue };
        let a11 = diag;
        let a21 = sym(a, lda, t, q);
        let a22 = a[t * lda + t];
        let det = a11 * a22 - a21 * a21;
        if det == 0.0 {
            continue;
        }
        let mut amax_q = 0.0f64;
        let mut amax_t = 0.0f64;
        for i in c..m {
            if i == q || i == t {
                continue;
            }
            amax_q = amax_q.max(sym(a, lda, i, q).abs());
            amax_t = amax_t.max(sym(a, lda, i, t).abs());
        }
        let bound = det.abs() / u;
        if a22.abs() * amax_q + a21.abs() * amax_t <= bound
            && a21.abs() * amax_q + a11.abs() * amax_t <= bound
        {
            return Some(Pivot::Two(q, t));
        }
    }
    None
}

/// Factor the block with threshold partial pivoting, recording the local
/// permutation in `lperm` (entries are swapped along with the interchanges)
/// and the inverse pivots in `d`. `work` is an at-least `ldwork * n`
/// scratch holding the LD columns of the current pivot. Returns the number
/// of eliminated columns; on a square block the search is expected to
/// eliminate everything, and the caller treats a shortfall as fatal.
pub(crate) fn ldlt_tpp_factor(
    m: usize,
    n: usize,
    lperm: &mut [usize],
    a: &mut [f64],
    lda: usize,
    d: &mut [f64],
    work: &mut [f64],
    ldwork: usize,
    u: f64,
    small: f64,
) -> usize {
    debug_assert!(m >= n);
    debug_assert!(n == 0 || a.len() >= (n - 1) * lda + m);
    debug_assert!(d.len() >= 2 * n);
    let mut nelim = 0;
    while nelim < n {
        let c = nelim;
        match find_pivot(a, lda, m, n, c, u, small) {
            Some(Pivot::Zero(q)) => {
                sym_swap(a, lda, m, c, q);
                lperm.swap(c, q);
                d[2 * c] = 0.0;
                d[2 * c + 1] = 0.0;
                for i in (c + 1)..m {
                    let v = a[c * lda + i];
                    a[c * lda + i] = if v.abs() < small {
                        0.0
                    } else {
                        f64::INFINITY * v
                    };
                }
                a[c * lda + c] = 1.0;
                nelim += 1;
            }
            Some(Pivot::One(q)) => {
                sym_swap(a, lda, m, c, q);
                lperm.swap(c, q);
                let d11 = a[c * lda + c];
                if d11 == 0.0 {
                    // Exactly zero column; store a zero pivot.
                    d[2 * c] = 0.0;
                    d[2 * c + 1] = 0.0;
                    for i in (c + 1)..m {
                        a[c * lda + i] = 0.0;
                    }
                } else {
                    let dinv = 1.0 / d11;
                    d[2 * c] = dinv;
                    d[2 * c + 1] = 0.0;
                    for i in (c + 1)..m {
                        work[c * ldwork + i] = a[c * lda + i];
                        a[c * lda + i] *= dinv;
                    }
                    for j in (c + 1)..n {
                        let w = work[c * ldwork + j];
                        if w != 0.0 {
                            for i in j..m {
                                a[j * lda + i] -= a[c * lda + i] * w;
                            }
                        }
                    }
                }
                a[c * lda + c] = 1.0;
                nelim += 1;
            }
            Some(Pivot::Two(q, t)) => {
                sym_swap(a, lda, m, c, q);
                lperm.swap(c, q);
                let t = if t == c { q } else { t };
                sym_swap(a, lda, m, c + 1, t);
                lperm.swap(c + 1, t);
                let a11 = a[c * lda + c];
                let a21 = a[c * lda + c + 1];
                let a22 = a[(c + 1) * lda + c + 1];
                let det = a11 * a22 - a21 * a21;
                let e11 = a22 / det;
                let e21 = -a21 / det;
                let e22 = a11 / det;
                d[2 * c] = e11;
                d[2 * c + 1] = e21;
                d[2 * c + 2] = f64::INFINITY;
                d[2 * c + 3] = e22;
                for i in (c + 2)..m {
                    let w1 = a[c * lda + i];
                    let w2 = a[(c + 1) * lda + i];
                    work[c * ldwork + i] = w1;
                    work[(c + 1) * ldwork + i] = w2;
                    a[c * lda + i] = w1 * e11 + w2 * e21;
                    a[(c + 1) * lda + i] = w1 * e21 + w2 * e22;
                }
                for j in (c + 2)..n {
                    let w1 = work[c * ldwork + j];
                    let w2 = work[(c + 1) * ldwork + j];
                    if w1 != 0.0 || w2 != 0.0 {
                        for i in j..m {
                            a[j * lda + i] -=
                                a[c * lda + i] * w1 + a[(c + 1) * lda + i] * w2;
                        }
                    }
                }
                a[c * lda + c] = 1.0;
                a[(c + 1) * lda + c + 1] = 1.0;
                a[c * lda + c + 1] = 0.0;
                nelim += 2;
            }
            None => break,
        }
    }
    nelim
}
