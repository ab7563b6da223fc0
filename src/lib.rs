//! Blocked LDL^T factorization of dense symmetric indefinite panels with
//! threshold partial pivoting.
//!
//! The panel is the frontal matrix of a supernodal sparse solver: `m` rows,
//! `n` pivot candidates, the leading n-by-n lower triangle symmetric. The
//! factorization is blocked into fixed-size tiles, speculatively applies
//! each diagonal block's pivots across its row and column while testing the
//! threshold, and commits only the pivots every block accepted; the rest
//! are rolled back from per-block restore points and delayed to the tail of
//! the permutation for the caller to retry. Columns eliminate with 1x1 and
//! 2x2 pivots stored inverted in a sentinel-encoded D.
//!
//! ```
//! use ldlt_panel::{FactorConfig, factor};
//!
//! // [[2, 1], [1, 2]], lower triangle, column-major.
//! let mut a = vec![2.0, 1.0, 0.0, 2.0];
//! let mut perm = vec![0, 1];
//! let mut d = vec![0.0; 4];
//! let ne = factor(2, 2, &mut perm, &mut a, 2, &mut d, &FactorConfig::default()).unwrap();
//! assert_eq!(ne, 2);
//! assert_eq!(a[1], 0.5); // L[1,0]
//! ```

pub mod blas;
mod block;
mod block_ldlt;
mod col;
mod elim;
mod error;
mod factor;
mod ldlt_tpp;
mod pool;
pub mod solve;

pub use error::{FactorError, FactorResult};
pub use factor::factor;

/// Tile edge of the blocked layout. The in-block kernels are tuned for this
/// extent.
pub const BLOCK_SIZE: usize = 32;

/// Options for the panel factorization.
#[derive(Debug, Clone)]
pub struct FactorConfig {
    /// Pivot threshold in (0, 0.5]: an entry of L larger than `1/u` in
    /// magnitude fails its pivot.
    pub u: f64,
    /// Entries below this magnitude divided by a zero pivot become zero
    /// rather than infinite.
    pub small: f64,
    /// Worker threads for the elimination sweep; 0 uses the global rayon
    /// pool.
    pub num_threads: usize,
    /// Verbose sweep printing and NaN checks.
    pub debug: bool,
}

impl Default for FactorConfig {
    fn default() -> Self {
        Self {
            u: 0.01,
            small: 1e-20,
            num_threads: 0,
            debug: false,
        }
    }
}

impl FactorConfig {
    /// Clamp the numerical parameters into their valid ranges.
    pub fn validate(&mut self) -> FactorResult<()> {
        self.u = self.u.min(0.5).max(f64::MIN_POSITIVE);
        self.small = self.small.max(0.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_clamps_into_range() {
        let mut c = FactorConfig {
            u: 3.0,
            small: -1.0,
            ..FactorConfig::default()
        };
        c.validate().unwrap();
        assert_eq!(c.u, 0.5);
        assert_eq!(c.small, 0.0);
        let mut c = FactorConfig {
            u: 0.0,
            ..FactorConfig::default()
        };
        c.validate().unwrap();
        assert!(c.u > 0.0);
    }
}
