//! Barometric pressure sensor measuring height above the navigation
//! origin.

use nalgebra::{DMatrix, DVector, DVectorView, RowVector3, Vector3};

use crate::filter::state::CoreState;
use crate::geometry::skew;

/// Calibration substate: position `p_ip` of the pressure port on the
/// body.
#[derive(Debug, Clone, Default)]
pub struct PressureSensorState {
    pub p_ip: Vector3<f64>,
}

/// Raw barometric height measurement (m).
#[derive(Debug, Clone)]
pub struct PressureMeasurement {
    pub height: f64,
}

/// Scalar height sensor with lever-arm calibration (k = 3).
///
/// Measurement model: `h = eᵀ_z (p_wi + R_wi p_ip)`.
#[derive(Debug, Clone)]
pub struct PressureSensor {
    name: String,
    pub state: PressureSensorState,
    initial_state: PressureSensorState,
    r: DMatrix<f64>,
    init_cov_diag: DVector<f64>,
    pub const_ref_to_nav: bool,
    calib_provided: bool,
    calib_initialized: bool,
}

impl PressureSensor {
    /// New pressure sensor with default noise 0.5 m and default lever
    /// arm uncertainty 0.1 m.
    pub fn new(name: impl Into<String>) -> Self {
        let mut sensor = Self {
            name: name.into(),
            state: PressureSensorState::default(),
            initial_state: PressureSensorState::default(),
            r: DMatrix::identity(1, 1),
            init_cov_diag: DVector::zeros(3),
            const_ref_to_nav: true,
            calib_provided: false,
            calib_initialized: false,
        };
        sensor.set_noise_std(0.5);
        sensor.set_initial_calib_std(Vector3::repeat(0.1));
        sensor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_noise_std(&mut self, height_std: f64) {
        let mut r = DMatrix::zeros(1, 1);
        r[(0, 0)] = height_std * height_std;
        self.r = r;
    }

    pub fn set_initial_calib_std(&mut self, p_std: Vector3<f64>) {
        let mut diag = DVector::zeros(3);
        for i in 0..3 {
            diag[i] = p_std[i] * p_std[i];
        }
        self.init_cov_diag = diag;
    }

    pub fn set_initial_calib(&mut self, state: PressureSensorState) {
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

    pub fn predict(&self, core: &CoreState) -> PressureMeasurement {
        let p_wp = core.p_wi + core.q_wi * self.state.p_ip;
        PressureMeasurement { height: p_wp.z }
    }

    pub fn residual(&self, core: &CoreState, z: &PressureMeasurement) -> DVector<f64> {
        DVector::from_element(1, z.height - self.predict(core).height)
    }

    /// Measurement Jacobian blocks (core 1×15, calibration 1×3).
    pub fn jacobian(&self, core: &CoreState) -> (DMatrix<f64>, DMatrix<f64>) {
        let r_wi = core.q_wi.to_rotation_matrix().into_inner();
        let e_z = RowVector3::new(0.0, 0.0, 1.0);

        let mut h_core = DMatrix::zeros(1, 15);
        h_core.view_mut((0, 0), (1, 3)).copy_from(&e_z);
        h_core
            .view_mut((0, 6), (1, 3))
            .copy_from(&(-e_z * r_wi * skew(&self.state.p_ip)));

        let mut h_calib = DMatrix::zeros(1, 3);
        h_calib.view_mut((0, 0), (1, 3)).copy_from(&(e_z * r_wi));

        (h_core, h_calib)
    }

    /// Seed the lever arm so the height measurement is explained exactly
    /// by the current core state.
    pub fn init_from_measurement(&mut self, core: &CoreState, z: &PressureMeasurement) {
        let offset_w = Vector3::new(0.0, 0.0, z.height - core.p_wi.z);
        self.state.p_ip = core.q_wi.inverse() * offset_w;
        self.calib_initialized = true;
    }

    pub fn boxplus(&mut self, dx: DVectorView<f64>) {
        self.state.p_ip += Vector3::new(dx[0], dx[1], dx[2]);
    }

    pub(crate) fn restore(&mut self, state: PressureSensorState) {
        self.state = state;
        self.calib_initialized = true;
    }

    pub(crate) fn reset_calib(&mut self) {
        self.state = self.initial_state.clone();
        self.calib_initialized = self.calib_provided;
    }
}
