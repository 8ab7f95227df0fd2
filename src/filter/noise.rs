//! IMU continuous-time noise model.

use nalgebra::{SMatrix, Vector3};

/// 12×12 continuous-time process noise covariance for
/// [n_w, n_bw, n_a, n_ba].
pub type Matrix12 = SMatrix<f64, 12, 12>;

/// IMU continuous-time noise spectral densities (1-sigma, per axis).
#[derive(Debug, Clone, Copy)]
pub struct ImuNoise {
    /// Gyroscope white noise (rad/s/√Hz).
    pub n_w: Vector3<f64>,
    /// Gyroscope bias random walk (rad/s²/√Hz).
    pub n_bw: Vector3<f64>,
    /// Accelerometer white noise (m/s²/√Hz).
    pub n_a: Vector3<f64>,
    /// Accelerometer bias random walk (m/s³/√Hz).
    pub n_ba: Vector3<f64>,
}

impl ImuNoise {
    pub fn new(
        n_w: Vector3<f64>,
        n_bw: Vector3<f64>,
        n_a: Vector3<f64>,
        n_ba: Vector3<f64>,
    ) -> Self {
        Self { n_w, n_bw, n_a, n_ba }
    }

    /// Continuous-time noise covariance `Q_c = diag(n_w², n_bw², n_a², n_ba²)`.
    pub fn spectral_density(&self) -> Matrix12 {
        let mut q_c = Matrix12::zeros();
        for i in 0..3 {
            q_c[(i, i)] = self.n_w[i] * self.n_w[i];
            q_c[(i + 3, i + 3)] = self.n_bw[i] * self.n_bw[i];
            q_c[(i + 6, i + 6)] = self.n_a[i] * self.n_a[i];
            q_c[(i + 9, i + 9)] = self.n_ba[i] * self.n_ba[i];
        }
        q_c
    }
}

impl Default for ImuNoise {
    /// Typical values for a MEMS IMU.
    fn default() -> Self {
        Self {
            n_w: Vector3::repeat(1.7e-4),
            n_bw: Vector3::repeat(1.9e-5),
            n_a: Vector3::repeat(2.0e-3),
            n_ba: Vector3::repeat(3.0e-3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spectral_density_is_diagonal_of_squares() {
        let noise = ImuNoise::new(
            Vector3::new(0.1, 0.2, 0.3),
            Vector3::repeat(0.01),
            Vector3::repeat(0.5),
            Vector3::repeat(0.05),
        );
        let q_c = noise.spectral_density();

        assert_eq!(q_c[(0, 0)], 0.1 * 0.1);
        assert_eq!(q_c[(1, 1)], 0.2 * 0.2);
        assert_eq!(q_c[(6, 6)], 0.5 * 0.5);
        assert_eq!(q_c[(9, 9)], 0.05 * 0.05);
        assert_eq!(q_c[(0, 1)], 0.0);
    }
}
