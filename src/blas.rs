//! Dense kernel wrappers.
//!
//! The factorization treats `trsm`/`trsv`/`gemm`/`gemv` as black-box
//! primitives with standard BLAS contracts. `host_gemm` is backed by
//! [`matrixmultiply::dgemm`]; the triangular solves and `gemv` are strided
//! loops. All matrices are column-major: element (i, j) lives at
//! `a[j * lda + i]`.
//!
//! The `*_raw` variants exist for the concurrent block kernels, which address
//! the panel through raw views because neighbouring blocks share backing
//! memory at undersized boundaries and cannot be expressed as disjoint
//! slices.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// No transpose.
    N,
    /// Transpose.
    T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    Lower,
    Upper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diag {
    Unit,
    NonUnit,
}

/// Element (i, j) of `op(T)` for a triangular matrix stored at `a`.
#[inline(always)]
unsafe fn tri_at(a: *const f64, lda: usize, op: Op, i: usize, j: usize) -> f64 {
    unsafe {
        match op {
            Op::N => *a.add(j * lda + i),
            Op::T => *a.add(i * lda + j),
        }
    }
}

/// Triangular solve `op(T) X = alpha B` (left) or `X op(T) = alpha B`
/// (right), overwriting `B` with `X`.
///
/// # Safety
/// `a` must be valid for reads over the referenced triangle of the
/// `t_dim`-square matrix (with `t_dim = m` on the left, `n` on the right)
/// and `b` valid for reads/writes over the m-by-n region with leading
/// dimension `ldb`. No aliasing between `a` and `b`.
pub(crate) unsafe fn trsm_raw(
    side: Side,
    fill: Fill,
    op: Op,
    diag: Diag,
    m: usize,
    n: usize,
    alpha: f64,
    a: *const f64,
    lda: usize,
    b: *mut f64,
    ldb: usize,
) {
    if m == 0 || n == 0 {
        return;
    }
    unsafe {
        if alpha != 1.0 {
            for j in 0..n {
                for i in 0..m {
                    *b.add(j * ldb + i) *= alpha;
                }
            }
        }
        // op(T) is lower triangular iff the stored triangle and the
        // operation agree.
        let eff_lower = matches!((fill, op), (Fill::Lower, Op::N) | (Fill::Upper, Op::T));
        match side {
            Side::Left => {
                // Column-oriented forward/backward substitution on each
                // column of B.
                for j in 0..n {
                    let col = b.add(j * ldb);
                    if eff_lower {
                        for i in 0..m {
                            if diag == Diag::NonUnit {
                                *col.add(i) /= tri_at(a, lda, op, i, i);
                            }
                            let xi = *col.add(i);
                            for k in (i + 1)..m {
                                *col.add(k) -= tri_at(a, lda, op, k, i) * xi;
                            }
                        }
                    } else {
                        for i in (0..m).rev() {
                            if diag == Diag::NonUnit {
                                *col.add(i) /= tri_at(a, lda, op, i, i);
                            }
                            let xi = *col.add(i);
                            for k in 0..i {
                                *col.add(k) -= tri_at(a, lda, op, k, i) * xi;
                            }
                        }
                    }
                }
            }
            Side::Right => {
                // X op(T) = B: column j of X depends on the columns op(T)
                // couples it to, so sweep ascending for an effectively upper
                // factor and descending for a lower one.
                if eff_lower {
                    for j in (0..n).rev() {
                        for k in (j + 1)..n {
                            let t = tri_at(a, lda, op, k, j);
                            if t != 0.0 {
                                for i in 0..m {
                                    *b.add(j * ldb + i) -= t * *b.add(k * ldb + i);
                                }
                            }
                        }
                        if diag == Diag::NonUnit {
                            let t = tri_at(a, lda, op, j, j);
                            for i in 0..m {
                                *b.add(j * ldb + i) /= t;
                            }
                        }
                    }
                } else {
                    for j in 0..n {
                        for k in 0..j {
                            let t = tri_at(a, lda, op, k, j);
                            if t != 0.0 {
                                for i in 0..m {
                                    *b.add(j * ldb + i) -= t * *b.add(k * ldb + i);
                                }
                            }
                        }
                        if diag == Diag::NonUnit {
                            let t = tri_at(a, lda, op, j, j);
                            for i in 0..m {
                                *b.add(j * ldb + i) /= t;
                            }
                        }
                    }
                }
            }
        }
    }
}

/// `C = alpha op(A) op(B) + beta C`.
///
/// # Safety
/// The operand regions implied by the dimensions, operations and leading
/// dimensions must be valid, and `c` must not alias `a` or `b`.
pub(crate) unsafe fn gemm_raw(
    opa: Op,
    opb: Op,
    m: usize,
    n: usize,
    k: usize,
    alpha: f64,
    a: *const f64,
    lda: usize,
    b: *const f64,
    ldb: usize,
    beta: f64,
    c: *mut f64,
    ldc: usize,
) {
    if m == 0 || n == 0 {
        return;
    }
    let (rsa, csa) = match opa {
        Op::N => (1, lda as isize),
        Op::T => (lda as isize, 1),
    };
    let (rsb, csb) = match opb {
        Op::N => (1, ldb as isize),
        Op::T => (ldb as isize, 1),
    };
    unsafe {
        matrixmultiply::dgemm(
            m, k, n, alpha, a, rsa, csa, b, rsb, csb, beta, c, 1, ldc as isize,
        );
    }
}

/// Triangular solve with a matrix right-hand side, standard BLAS contract.
pub fn host_trsm(
    side: Side,
    fill: Fill,
    op: Op,
    diag: Diag,
    m: usize,
    n: usize,
    alpha: f64,
    a: &[f64],
    lda: usize,
    b: &mut [f64],
    ldb: usize,
) {
    let t_dim = match side {
        Side::Left => m,
        Side::Right => n,
    };
    debug_assert!(t_dim == 0 || a.len() >= (t_dim - 1) * lda + t_dim);
    debug_assert!(n == 0 || b.len() >= (n - 1) * ldb + m);
    unsafe { trsm_raw(side, fill, op, diag, m, n, alpha, a.as_ptr(), lda, b.as_mut_ptr(), ldb) }
}

/// Triangular solve with a vector right-hand side.
pub fn host_trsv(
    fill: Fill,
    op: Op,
    diag: Diag,
    n: usize,
    a: &[f64],
    lda: usize,
    x: &mut [f64],
    incx: usize,
) {
    if n == 0 {
        return;
    }
    debug_assert!(a.len() >= (n - 1) * lda + n);
    debug_assert!(x.len() >= (n - 1) * incx + 1);
    let eff_lower = matches!((fill, op), (Fill::Lower, Op::N) | (Fill::Upper, Op::T));
    let at = |i: usize, j: usize| unsafe { tri_at(a.as_ptr(), lda, op, i, j) };
    if eff_lower {
        for i in 0..n {
            let mut s = x[i * incx];
            for k in 0..i {
                s -= at(i, k) * x[k * incx];
            }
            if diag == Diag::NonUnit {
                s /= at(i, i);
            }
            x[i * incx] = s;
        }
    } else {
        for i in (0..n).rev() {
            let mut s = x[i * incx];
            for k in (i + 1)..n {
                s -= at(i, k) * x[k * incx];
            }
            if diag == Diag::NonUnit {
                s /= at(i, i);
            }
            x[i * incx] = s;
        }
    }
}

/// `C = alpha op(A) op(B) + beta C`, standard BLAS contract.
pub fn host_gemm(
    opa: Op,
    opb: Op,
    m: usize,
    n: usize,
    k: usize,
    alpha: f64,
    a: &[f64],
    lda: usize,
    b: &[f64],
    ldb: usize,
    beta: f64,
    c: &mut [f64],
    ldc: usize,
) {
    debug_assert!(n == 0 || c.len() >= (n - 1) * ldc + m);
    unsafe {
        gemm_raw(
            opa,
            opb,
            m,
            n,
            k,
            alpha,
            a.as_ptr(),
            lda,
            b.as_ptr(),
            ldb,
            beta,
            c.as_mut_ptr(),
            ldc,
        )
    }
}

/// `y = alpha op(A) x + beta y`.
pub fn host_gemv(
    op: Op,
    m: usize,
    n: usize,
    alpha: f64,
    a: &[f64],
    lda: usize,
    x: &[f64],
    incx: usize,
    beta: f64,
    y: &mut [f64],
    incy: usize,
) {
    let (rows, cols) = match op {
        Op::N => (m, n),
        Op::T => (n, m),
    };
    if rows == 0 {
        return;
    }
    for i in 0..rows {
        let mut s = 0.0;
        for j in 0..cols {
            let aij = match op {
                Op::N => a[j * lda + i],
                Op::T => a[i * lda + j],
            };
            s += aij * x[j * incx];
        }
        let yi = &mut y[i * incy];
        *yi = alpha * s + if beta == 0.0 { 0.0 } else { beta * *yi };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-12, "{a} != {b}");
    }

    #[test]
    fn gemm_matches_naive() {
        // A = [[1,2],[3,4],[5,6]] (3x2), B = [[1,0,2],[0,1,3]] (2x3)
        let a = [1.0, 3.0, 5.0, 2.0, 4.0, 6.0];
        let b = [1.0, 0.0, 0.0, 1.0, 2.0, 3.0];
        let mut c = [0.0; 9];
        host_gemm(Op::N, Op::N, 3, 3, 2, 1.0, &a, 3, &b, 2, 0.0, &mut c, 3);
        // C[0,0] = 1, C[1,0] = 3, C[2,2] = 5*2+6*3 = 28
        approx(c[0], 1.0);
        approx(c[1], 3.0);
        approx(c[8], 28.0);
    }

    #[test]
    fn gemm_transposed_operands() {
        // C = A^T B with A 3x2 as above: A^T is 2x3.
        let a = [1.0, 3.0, 5.0, 2.0, 4.0, 6.0];
        let b = [1.0, 1.0, 1.0];
        let mut c = [0.0; 2];
        host_gemm(Op::T, Op::N, 2, 1, 3, 1.0, &a, 3, &b, 3, 0.0, &mut c, 2);
        approx(c[0], 9.0);
        approx(c[1], 12.0);
    }

    #[test]
    fn trsm_left_lower_unit_roundtrip() {
        // L = [[1,0],[2,1]] unit lower; solve L X = B.
        let l = [1.0, 2.0, 0.0, 1.0];
        let x_true = [3.0, -1.0, 0.5, 4.0];
        // B = L * X
        let mut b = [0.0; 4];
        host_gemm(Op::N, Op::N, 2, 2, 2, 1.0, &l, 2, &x_true, 2, 0.0, &mut b, 2);
        host_trsm(Side::Left, Fill::Lower, Op::N, Diag::Unit, 2, 2, 1.0, &l, 2, &mut b, 2);
        for i in 0..4 {
            approx(b[i], x_true[i]);
        }
    }

    #[test]
    fn trsm_right_lower_transpose() {
        // Solve X L^T = B for unit lower L, the apply-pivot configuration.
        let l = [1.0, 0.5, 0.0, 1.0];
        let x_true = [1.0, 2.0, 3.0, 4.0];
        // B = X * L^T
        let mut b = [0.0; 4];
        host_gemm(Op::N, Op::T, 2, 2, 2, 1.0, &x_true, 2, &l, 2, 0.0, &mut b, 2);
        host_trsm(Side::Right, Fill::Lower, Op::T, Diag::Unit, 2, 2, 1.0, &l, 2, &mut b, 2);
        for i in 0..4 {
            approx(b[i], x_true[i]);
        }
    }

    #[test]
    fn trsm_non_unit_diag() {
        let l = [2.0, 1.0, 0.0, 4.0];
        let mut b = [2.0, 5.0];
        host_trsm(Side::Left, Fill::Lower, Op::N, Diag::NonUnit, 2, 1, 1.0, &l, 2, &mut b, 2);
        approx(b[0], 1.0);
        approx(b[1], 1.0);
    }

    #[test]
    fn trsv_matches_trsm() {
        let l = [1.0, 2.0, 3.0, 0.0, 1.0, 4.0, 0.0, 0.0, 1.0];
        let mut x = [1.0, 1.0, 1.0];
        let mut x2 = x;
        host_trsv(Fill::Lower, Op::N, Diag::Unit, 3, &l, 3, &mut x, 1);
        host_trsm(Side::Left, Fill::Lower, Op::N, Diag::Unit, 3, 1, 1.0, &l, 3, &mut x2, 3);
        for i in 0..3 {
            approx(x[i], x2[i]);
        }
        // Transposed solve feeds the backward phase.
        let mut y = [1.0, 1.0, 1.0];
        host_trsv(Fill::Lower, Op::T, Diag::Unit, 3, &l, 3, &mut y, 1);
        // L^T y' = y solved bottom-up: y'[2]=1, y'[1]=1-4= -3, y'[0]=1-2*(-3)-3*1=4
        approx(y[2], 1.0);
        approx(y[1], -3.0);
        approx(y[0], 4.0);
    }

    #[test]
    fn gemv_both_ops() {
        let a = [1.0, 3.0, 2.0, 4.0]; // [[1,2],[3,4]]
        let x = [1.0, 1.0];
        let mut y = [1.0, 1.0];
        host_gemv(Op::N, 2, 2, 1.0, &a, 2, &x, 1, 1.0, &mut y, 1);
        approx(y[0], 4.0);
        approx(y[1], 8.0);
        let mut z = [0.0, 0.0];
        host_gemv(Op::T, 2, 2, -1.0, &a, 2, &x, 1, 0.0, &mut z, 1);
        approx(z[0], -4.0);
        approx(z[1], -6.0);
    }
}
