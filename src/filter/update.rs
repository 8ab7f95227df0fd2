//! Kalman correction: chi-square innovation gating and the Joseph-form
//! covariance update.

use nalgebra::{Cholesky, DMatrix, DVector};
use tracing::warn;

/// Why a measurement was rejected instead of fused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// Mahalanobis distance exceeded the chi-square quantile.
    Outlier,
    /// `S` was not positive definite, or the updated covariance lost
    /// positive semi-definiteness.
    NumericFailure,
}

/// Tolerance on negative covariance diagonal entries before an update is
/// declared numerically failed.
const NEG_DIAG_TOL: f64 = 1e-9;

/// Tabulated confidences.
const CHI2_ALPHAS: [f64; 3] = [0.90, 0.95, 0.99];

/// Chi-square quantiles for 1..=9 degrees of freedom at the tabulated
/// confidences.
const CHI2_QUANTILES: [[f64; 3]; 9] = [
    [2.705543, 3.841459, 6.634897],
    [4.605170, 5.991465, 9.210340],
    [6.251389, 7.814728, 11.344867],
    [7.779440, 9.487729, 13.276704],
    [9.236357, 11.070498, 15.086272],
    [10.644641, 12.591587, 16.811894],
    [12.017037, 14.067140, 18.475307],
    [13.361566, 15.507313, 20.090235],
    [14.683657, 16.918978, 21.665994],
];

/// Outlier gate with precomputed chi-square quantiles per measurement
/// dimension.
#[derive(Debug, Clone, Copy)]
pub struct Chi2Gate {
    alpha: f64,
    column: usize,
}

impl Chi2Gate {
    /// Gate at the given confidence. An unlisted confidence snaps to the
    /// nearest tabulated value.
    pub fn new(alpha: f64) -> Self {
        let (column, nearest) = CHI2_ALPHAS
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (*a - alpha).abs().total_cmp(&(*b - alpha).abs())
            })
            .map(|(i, a)| (i, *a))
            .unwrap_or((1, 0.95));
        if (nearest - alpha).abs() > 1e-9 {
            warn!(alpha, nearest, "chi2 confidence not tabulated, snapping");
        }
        Self { alpha: nearest, column }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Quantile for the given measurement dimension (clamped to the
    /// tabulated range 1..=9).
    pub fn threshold(&self, dim: usize) -> f64 {
        let row = dim.clamp(1, CHI2_QUANTILES.len()) - 1;
        CHI2_QUANTILES[row][self.column]
    }
}

/// `M ← (M + Mᵀ)/2`.
pub fn symmetrize(m: &mut DMatrix<f64>) {
    let t = m.transpose();
    *m += t;
    *m *= 0.5;
}

/// Result of an accepted Kalman correction.
#[derive(Debug, Clone)]
pub struct Correction {
    /// Error-state increment `δξ = K y`.
    pub delta: DVector<f64>,
    /// Updated covariance (Joseph form, symmetrized).
    pub cov: DMatrix<f64>,
    /// Squared Mahalanobis distance of the innovation.
    pub mahalanobis_sq: f64,
}

/// Gated Kalman correction.
///
/// Forms `S = H P Hᵀ + R`, gates the innovation with the chi-square
/// test, and on acceptance returns the error-state increment together
/// with the Joseph-form covariance
/// `P⁺ = (I − KH) P (I − KH)ᵀ + K R Kᵀ`. `S` is inverted through its
/// Cholesky factor only; a failed factorization or a negative variance
/// after the update rejects the measurement without touching `P`.
pub fn kalman_update(
    cov: &DMatrix<f64>,
    h: &DMatrix<f64>,
    r: &DMatrix<f64>,
    y: &DVector<f64>,
    gate: &Chi2Gate,
) -> Result<Correction, RejectionReason> {
    let mut s = h * cov * h.transpose() + r;
    symmetrize(&mut s);

    let chol = match Cholesky::new(s) {
        Some(chol) => chol,
        None => return Err(RejectionReason::NumericFailure),
    };

    let s_inv_y = chol.solve(y);
    let mahalanobis_sq = y.dot(&s_inv_y);
    if mahalanobis_sq > gate.threshold(y.len()) {
        return Err(RejectionReason::Outlier);
    }

    // K = P Hᵀ S⁻¹, computed as Kᵀ = S⁻¹ H P.
    let k = chol.solve(&(h * cov)).transpose();
    let delta = &k * y;

    let n = cov.nrows();
    let i_kh = DMatrix::identity(n, n) - &k * h;
    let mut p_post = &i_kh * cov * i_kh.transpose() + &k * r * k.transpose();
    symmetrize(&mut p_post);

    for i in 0..n {
        if p_post[(i, i)] < -NEG_DIAG_TOL {
            return Err(RejectionReason::NumericFailure);
        }
        if p_post[(i, i)] < 0.0 {
            p_post[(i, i)] = 0.0;
        }
    }

    Ok(Correction {
        delta,
        cov: p_post,
        mahalanobis_sq,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn small_problem() -> (DMatrix<f64>, DMatrix<f64>, DMatrix<f64>) {
        // 3-dim state observed directly.
        let p = DMatrix::from_diagonal(&DVector::from_vec(vec![0.5, 0.5, 0.5]));
        let h = DMatrix::identity(3, 3);
        let r = DMatrix::from_diagonal(&DVector::from_vec(vec![0.1, 0.1, 0.1]));
        (p, h, r)
    }

    #[test]
    fn test_zero_innovation_leaves_state_unchanged() {
        let (p, h, r) = small_problem();
        let y = DVector::zeros(3);
        let gate = Chi2Gate::new(0.95);

        let correction = kalman_update(&p, &h, &r, &y, &gate).unwrap();
        assert_relative_eq!(correction.delta.norm(), 0.0, epsilon = 1e-15);

        // Covariance must not increase on any diagonal entry.
        for i in 0..3 {
            assert!(correction.cov[(i, i)] <= p[(i, i)] + 1e-15);
        }
    }

    #[test]
    fn test_large_innovation_is_gated() {
        let (p, h, r) = small_problem();
        let y = DVector::from_vec(vec![1e6, 0.0, 0.0]);
        let gate = Chi2Gate::new(0.95);

        assert_eq!(
            kalman_update(&p, &h, &r, &y, &gate).unwrap_err(),
            RejectionReason::Outlier
        );
    }

    #[test]
    fn test_indefinite_s_is_a_numeric_failure() {
        let p = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 1.0, 1.0]));
        let h = DMatrix::identity(3, 3);
        // R so negative that S loses positive definiteness.
        let r = DMatrix::from_diagonal(&DVector::from_vec(vec![-2.0, -2.0, -2.0]));
        let y = DVector::zeros(3);
        let gate = Chi2Gate::new(0.95);

        assert_eq!(
            kalman_update(&p, &h, &r, &y, &gate).unwrap_err(),
            RejectionReason::NumericFailure
        );
    }

    #[test]
    fn test_update_shrinks_variance_and_stays_symmetric() {
        let (p, h, r) = small_problem();
        let y = DVector::from_vec(vec![0.2, -0.1, 0.05]);
        let gate = Chi2Gate::new(0.95);

        let correction = kalman_update(&p, &h, &r, &y, &gate).unwrap();

        assert_relative_eq!(
            correction.cov.clone(),
            correction.cov.transpose(),
            epsilon = 1e-15
        );
        for i in 0..3 {
            assert!(correction.cov[(i, i)] < p[(i, i)]);
            assert!(correction.cov[(i, i)] > 0.0);
        }
    }

    #[test]
    fn test_gate_thresholds_increase_with_dimension() {
        let gate = Chi2Gate::new(0.95);
        assert_relative_eq!(gate.threshold(1), 3.841459, epsilon = 1e-6);
        assert_relative_eq!(gate.threshold(3), 7.814728, epsilon = 1e-6);
        assert_relative_eq!(gate.threshold(6), 12.591587, epsilon = 1e-6);
        assert!(gate.threshold(2) > gate.threshold(1));
    }

    #[test]
    fn test_unlisted_alpha_snaps_to_nearest() {
        let gate = Chi2Gate::new(0.94);
        assert_relative_eq!(gate.alpha(), 0.95, epsilon = 1e-12);
    }
}
