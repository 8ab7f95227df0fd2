//! Pose update sensor: position and orientation of a sensor frame
//! mounted on the IMU body.

use nalgebra::{DMatrix, DVector, DVectorView, Matrix3, UnitQuaternion, Vector3};

use crate::filter::state::CoreState;
use crate::geometry::{exp_so3, skew, small_angle_residual};

/// Calibration substate: IMU-to-sensor extrinsics `p_ip`, `q_ip`.
#[derive(Debug, Clone)]
pub struct PoseSensorState {
    pub p_ip: Vector3<f64>,
    pub q_ip: UnitQuaternion<f64>,
}

impl Default for PoseSensorState {
    fn default() -> Self {
        Self {
            p_ip: Vector3::zeros(),
            q_ip: UnitQuaternion::identity(),
        }
    }
}

/// Raw pose measurement in the navigation frame.
#[derive(Debug, Clone)]
pub struct PoseMeasurement {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

/// 6-DoF pose sensor with extrinsic calibration substate (k = 6).
///
/// Measurement model:
/// ```text
/// h_p = p_wi + R_wi p_ip
/// h_q = q_wi ⊗ q_ip
/// ```
#[derive(Debug, Clone)]
pub struct PoseSensor {
    name: String,
    pub state: PoseSensorState,
    initial_state: PoseSensorState,
    r: DMatrix<f64>,
    init_cov_diag: DVector<f64>,
    pub const_ref_to_nav: bool,
    calib_provided: bool,
    calib_initialized: bool,
}

impl PoseSensor {
    /// New pose sensor with default noise (0.02 m, 2°) and default
    /// initial calibration uncertainty (0.1 m, 10°).
    pub fn new(name: impl Into<String>) -> Self {
        let deg = std::f64::consts::PI / 180.0;
        let mut sensor = Self {
            name: name.into(),
            state: PoseSensorState::default(),
            initial_state: PoseSensorState::default(),
            r: DMatrix::identity(6, 6),
            init_cov_diag: DVector::zeros(6),
            const_ref_to_nav: true,
            calib_provided: false,
            calib_initialized: false,
        };
        sensor.set_noise_std(Vector3::repeat(0.02), Vector3::repeat(2.0 * deg));
        sensor.set_initial_calib_std(Vector3::repeat(0.1), Vector3::repeat(10.0 * deg));
        sensor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Measurement noise standard deviations (position, attitude).
    pub fn set_noise_std(&mut self, p_std: Vector3<f64>, theta_std: Vector3<f64>) {
        let mut r = DMatrix::zeros(6, 6);
        for i in 0..3 {
            r[(i, i)] = p_std[i] * p_std[i];
            r[(i + 3, i + 3)] = theta_std[i] * theta_std[i];
        }
        self.r = r;
    }

    /// Calibration uncertainty used to seed the covariance block.
    ///
    /// Should enclose the initialization with at least a 3-sigma bound.
    pub fn set_initial_calib_std(&mut self, p_std: Vector3<f64>, theta_std: Vector3<f64>) {
        let mut diag = DVector::zeros(6);
        for i in 0..3 {
            diag[i] = p_std[i] * p_std[i];
            diag[i + 3] = theta_std[i] * theta_std[i];
        }
        self.init_cov_diag = diag;
    }

    /// Explicit initial calibration; disables `init_from_measurement`.
    pub fn set_initial_calib(&mut self, state: PoseSensorState) {
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

    /// Predicted measurement `h(x, s)`.
    pub fn predict(&self, core: &CoreState) -> PoseMeasurement {
        PoseMeasurement {
            position: core.p_wi + core.q_wi * self.state.p_ip,
            orientation: core.q_wi * self.state.q_ip,
        }
    }

    /// Innovation `z ⊟ h(x, s)` (position difference, small-angle
    /// attitude residual).
    pub fn residual(&self, core: &CoreState, z: &PoseMeasurement) -> DVector<f64> {
        let pred = self.predict(core);
        let dp = z.position - pred.position;
        let dq = small_angle_residual(&pred.orientation, &z.orientation);

        let mut y = DVector::zeros(6);
        y.fixed_rows_mut::<3>(0).copy_from(&dp);
        y.fixed_rows_mut::<3>(3).copy_from(&dq);
        y
    }

    /// Measurement Jacobian blocks (core 6×15, calibration 6×6).
    pub fn jacobian(&self, core: &CoreState) -> (DMatrix<f64>, DMatrix<f64>) {
        let r_wi = core.q_wi.to_rotation_matrix().into_inner();
        let r_ip = self.state.q_ip.to_rotation_matrix().into_inner();

        let mut h_core = DMatrix::zeros(6, 15);
        h_core
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&Matrix3::identity());
        h_core
            .fixed_view_mut::<3, 3>(0, 6)
            .copy_from(&(-r_wi * skew(&self.state.p_ip)));
        h_core
            .fixed_view_mut::<3, 3>(3, 6)
            .copy_from(&r_ip.transpose());

        let mut h_calib = DMatrix::zeros(6, 6);
        h_calib.fixed_view_mut::<3, 3>(0, 0).copy_from(&r_wi);
        h_calib
            .fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&Matrix3::identity());

        (h_core, h_calib)
    }

    /// Seed the extrinsics so the measurement is explained exactly by the
    /// current core state.
    pub fn init_from_measurement(&mut self, core: &CoreState, z: &PoseMeasurement) {
        self.state.p_ip = core.q_wi.inverse() * (z.position - core.p_wi);
        self.state.q_ip = core.q_wi.inverse() * z.orientation;
        self.calib_initialized = true;
    }

    /// Boxplus on the calibration substate with a 6-dim error slice.
    pub fn boxplus(&mut self, dx: DVectorView<f64>) {
        let dp = Vector3::new(dx[0], dx[1], dx[2]);
        let dtheta = Vector3::new(dx[3], dx[4], dx[5]);
        self.state.p_ip += dp;
        self.state.q_ip = UnitQuaternion::from_quaternion(
            (self.state.q_ip * exp_so3(&dtheta)).into_inner(),
        );
    }

    pub(crate) fn restore(&mut self, state: PoseSensorState) {
        self.state = state;
        self.calib_initialized = true;
    }

    pub(crate) fn reset_calib(&mut self) {
        self.state = self.initial_state.clone();
        self.calib_initialized = self.calib_provided;
    }
}
