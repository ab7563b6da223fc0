//! Structured errors for the panel factorization entry points.

#[derive(Debug, thiserror::Error)]
pub enum FactorError {
    // --- Shape validation ---
    #[error("panel must have at least as many rows as columns (m={m}, n={n})")]
    RowsLessThanCols { m: usize, n: usize },

    #[error("leading dimension must be >= m (lda={lda}, m={m})")]
    LeadingDimensionTooSmall { lda: usize, m: usize },

    // --- Buffer validation ---
    #[error("panel too small: need at least {required} entries, got {actual}")]
    PanelTooSmall { required: usize, actual: usize },

    #[error("permutation too small: need {required} entries, got {actual}")]
    PermTooSmall { required: usize, actual: usize },

    #[error("pivot buffer too small: need 2*n = {required} entries, got {actual}")]
    PivotBufferTooSmall { required: usize, actual: usize },

    // --- Runtime ---
    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type FactorResult<T> = Result<T, FactorError>;
