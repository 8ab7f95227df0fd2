//! Position update sensor (e.g. GNSS antenna, total station prism).

use nalgebra::{DMatrix, DVector, DVectorView, Matrix3, Vector3};

use crate::filter::state::CoreState;
use crate::geometry::skew;

/// Calibration substate: lever arm `p_ip` from IMU to sensor.
#[derive(Debug, Clone, Default)]
pub struct PositionSensorState {
    pub p_ip: Vector3<f64>,
}

/// Raw position measurement in the navigation frame.
#[derive(Debug, Clone)]
pub struct PositionMeasurement {
    pub position: Vector3<f64>,
}

/// 3-DoF position sensor with lever-arm calibration (k = 3).
///
/// Measurement model: `h = p_wi + R_wi p_ip`.
#[derive(Debug, Clone)]
pub struct PositionSensor {
    name: String,
    pub state: PositionSensorState,
    initial_state: PositionSensorState,
    r: DMatrix<f64>,
    init_cov_diag: DVector<f64>,
    pub const_ref_to_nav: bool,
    calib_provided: bool,
    calib_initialized: bool,
}

impl PositionSensor {
    /// New position sensor with default noise 0.05 m and default lever
    /// arm uncertainty 0.1 m.
    pub fn new(name: impl Into<String>) -> Self {
        let mut sensor = Self {
            name: name.into(),
            state: PositionSensorState::default(),
            initial_state: PositionSensorState::default(),
            r: DMatrix::identity(3, 3),
            init_cov_diag: DVector::zeros(3),
            const_ref_to_nav: true,
            calib_provided: false,
            calib_initialized: false,
        };
        sensor.set_noise_std(Vector3::repeat(0.05));
        sensor.set_initial_calib_std(Vector3::repeat(0.1));
        sensor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_noise_std(&mut self, p_std: Vector3<f64>) {
        let mut r = DMatrix::zeros(3, 3);
        for i in 0..3 {
            r[(i, i)] = p_std[i] * p_std[i];
        }
        self.r = r;
    }

    pub fn set_initial_calib_std(&mut self, p_std: Vector3<f64>) {
        let mut diag = DVector::zeros(3);
        for i in 0..3 {
            diag[i] = p_std[i] * p_std[i];
        }
        self.init_cov_diag = diag;
    }

    pub fn set_initial_calib(&mut self, state: PositionSensorState) {
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

    pub fn predict(&self, core: &CoreState) -> PositionMeasurement {
        PositionMeasurement {
            position: core.p_wi + core.q_wi * self.state.p_ip,
        }
    }

    pub fn residual(&self, core: &CoreState, z: &PositionMeasurement) -> DVector<f64> {
        let dp = z.position - self.predict(core).position;
        DVector::from_column_slice(dp.as_slice())
    }

    /// Measurement Jacobian blocks (core 3×15, calibration 3×3).
    pub fn jacobian(&self, core: &CoreState) -> (DMatrix<f64>, DMatrix<f64>) {
        let r_wi = core.q_wi.to_rotation_matrix().into_inner();

        let mut h_core = DMatrix::zeros(3, 15);
        h_core
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&Matrix3::identity());
        h_core
            .fixed_view_mut::<3, 3>(0, 6)
            .copy_from(&(-r_wi * skew(&self.state.p_ip)));

        let mut h_calib = DMatrix::zeros(3, 3);
        h_calib.fixed_view_mut::<3, 3>(0, 0).copy_from(&r_wi);

        (h_core, h_calib)
    }

    pub fn init_from_measurement(&mut self, core: &CoreState, z: &PositionMeasurement) {
        self.state.p_ip = core.q_wi.inverse() * (z.position - core.p_wi);
        self.calib_initialized = true;
    }

    pub fn boxplus(&mut self, dx: DVectorView<f64>) {
        self.state.p_ip += Vector3::new(dx[0], dx[1], dx[2]);
    }

    pub(crate) fn restore(&mut self, state: PositionSensorState) {
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
    use crate::geometry::exp_so3;
    use approx::assert_relative_eq;

    #[test]
    fn test_residual_zero_after_init() {
        let core = CoreState::new(Vector3::new(2.0, 1.0, -0.5), exp_so3(&Vector3::new(0.1, 0.2, 0.3)));
        let z = PositionMeasurement {
            position: Vector3::new(2.2, 0.9, -0.4),
        };

        let mut sensor = PositionSensor::new("gps");
        sensor.init_from_measurement(&core, &z);
        assert_relative_eq!(sensor.residual(&core, &z).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_lever_arm_measures_core_position() {
        let core = CoreState::new(Vector3::new(1.0, 2.0, 3.0), exp_so3(&Vector3::new(0.4, 0.0, 0.0)));
        let sensor = PositionSensor::new("gps");
        assert_relative_eq!(sensor.predict(&core).position, core.p_wi, epsilon = 1e-12);
    }
}
