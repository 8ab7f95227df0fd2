//! Attitude update sensor (e.g. magnetometer-derived heading, motion
//! capture orientation).

use nalgebra::{DMatrix, DVector, DVectorView, Matrix3, UnitQuaternion, Vector3};

use crate::filter::state::CoreState;
use crate::geometry::{exp_so3, small_angle_residual};

/// Calibration substate: mounting rotation `q_ip` from IMU to sensor.
#[derive(Debug, Clone)]
pub struct AttitudeSensorState {
    pub q_ip: UnitQuaternion<f64>,
}

impl Default for AttitudeSensorState {
    fn default() -> Self {
        Self {
            q_ip: UnitQuaternion::identity(),
        }
    }
}

/// Raw attitude measurement in the navigation frame.
#[derive(Debug, Clone)]
pub struct AttitudeMeasurement {
    pub orientation: UnitQuaternion<f64>,
}

/// Attitude sensor with mounting-rotation calibration (k = 3).
///
/// Measurement model: `h = q_wi ⊗ q_ip`.
#[derive(Debug, Clone)]
pub struct AttitudeSensor {
    name: String,
    pub state: AttitudeSensorState,
    initial_state: AttitudeSensorState,
    r: DMatrix<f64>,
    init_cov_diag: DVector<f64>,
    pub const_ref_to_nav: bool,
    calib_provided: bool,
    calib_initialized: bool,
}

impl AttitudeSensor {
    /// New attitude sensor with default noise 2° and default mounting
    /// uncertainty 10°.
    pub fn new(name: impl Into<String>) -> Self {
        let deg = std::f64::consts::PI / 180.0;
        let mut sensor = Self {
            name: name.into(),
            state: AttitudeSensorState::default(),
            initial_state: AttitudeSensorState::default(),
            r: DMatrix::identity(3, 3),
            init_cov_diag: DVector::zeros(3),
            const_ref_to_nav: true,
            calib_provided: false,
            calib_initialized: false,
        };
        sensor.set_noise_std(Vector3::repeat(2.0 * deg));
        sensor.set_initial_calib_std(Vector3::repeat(10.0 * deg));
        sensor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_noise_std(&mut self, theta_std: Vector3<f64>) {
        let mut r = DMatrix::zeros(3, 3);
        for i in 0..3 {
            r[(i, i)] = theta_std[i] * theta_std[i];
        }
        self.r = r;
    }

    pub fn set_initial_calib_std(&mut self, theta_std: Vector3<f64>) {
        let mut diag = DVector::zeros(3);
        for i in 0..3 {
            diag[i] = theta_std[i] * theta_std[i];
        }
        self.init_cov_diag = diag;
    }

    pub fn set_initial_calib(&mut self, state: AttitudeSensorState) {
        self.state = state.clone();
        self.initial_state = state;
        self.calib_provided = true;
        self.calib_initialized = true;
    }

    pub fn calib_initialized(&self) -> bool {
        self.calib_initialized
    }

    pub fn noise_covariance(&self) -> &DMatrix<f64> {
        &self.r
    }

    pub fn initial_cov_diag(&self) -> DVector<f64> {
        self.init_cov_diag.clone()
    }

    pub fn predict(&self, core: &CoreState) -> AttitudeMeasurement {
        AttitudeMeasurement {
            orientation: core.q_wi * self.state.q_ip,
        }
    }

    pub fn residual(&self, core: &CoreState, z: &AttitudeMeasurement) -> DVector<f64> {
        let dq = small_angle_residual(&self.predict(core).orientation, &z.orientation);
        DVector::from_column_slice(dq.as_slice())
    }

    /// Measurement Jacobian blocks (core 3×15, calibration 3×3).
    pub fn jacobian(&self, _core: &CoreState) -> (DMatrix<f64>, DMatrix<f64>) {
        let r_ip = self.state.q_ip.to_rotation_matrix().into_inner();

        let mut h_core = DMatrix::zeros(3, 15);
        h_core
            .fixed_view_mut::<3, 3>(0, 6)
            .copy_from(&r_ip.transpose());

        let mut h_calib = DMatrix::zeros(3, 3);
        h_calib
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&Matrix3::identity());

        (h_core, h_calib)
    }

    pub fn init_from_measurement(&mut self, core: &CoreState, z: &AttitudeMeasurement) {
        self.state.q_ip = core.q_wi.inverse() * z.orientation;
        self.calib_initialized = true;
    }

    pub fn boxplus(&mut self, dx: DVectorView<f64>) {
        let dtheta = Vector3::new(dx[0], dx[1], dx[2]);
        self.state.q_ip = UnitQuaternion::from_quaternion(
            (self.state.q_ip * exp_so3(&dtheta)).into_inner(),
        );
    }

    pub(crate) fn restore(&mut self, state: AttitudeSensorState) {
        self.state = state;
        self.calib_initialized = true;
    }

    pub(crate) fn reset_calib(&mut self) {
        self.state = self.initial_state.clone();
        self.calib_initialized = self.calib_provided;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_residual_zero_after_init() {
        let core = CoreState::new(Vector3::zeros(), exp_so3(&Vector3::new(0.2, -0.3, 0.1)));
        let z = AttitudeMeasurement {
            orientation: exp_so3(&Vector3::new(0.25, -0.28, 0.15)),
        };

        let mut sensor = AttitudeSensor::new("mocap");
        sensor.init_from_measurement(&core, &z);
        assert_relative_eq!(sensor.residual(&core, &z).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_residual_reflects_small_rotation() {
        let core = CoreState::new(Vector3::zeros(), UnitQuaternion::identity());
        let sensor = AttitudeSensor::new("mocap");

        let delta = Vector3::new(1e-3, -2e-3, 0.5e-3);
        let z = AttitudeMeasurement {
            orientation: exp_so3(&delta),
        };

        let y = sensor.residual(&core, &z);
        assert_relative_eq!(Vector3::new(y[0], y[1], y[2]), delta, epsilon = 1e-6);
    }
}
