//! Core navigation state and error-state propagation.
//!
//! The nominal state is 16 scalars (position, velocity, unit quaternion
//! attitude, gyro bias, accel bias); the error state is 15-dimensional
//! [δp, δv, δθ, δb_w, δb_a]. Propagation integrates the strapdown
//! equations with mid-point readings and pushes the covariance through a
//! second-order truncation of the continuous error dynamics.

use nalgebra::{DMatrix, DVector, Matrix3, SMatrix, UnitQuaternion, Vector3};

use crate::error::FilterError;
use crate::filter::noise::ImuNoise;
use crate::filter::update::symmetrize;
use crate::geometry::{exp_so3, skew};
use crate::sensors::{ImuSample, SensorId};

/// Dimension of the core error state.
pub const CORE_ERROR_DIM: usize = 15;

/// 15×15 core error-state matrix.
pub type Matrix15 = SMatrix<f64, 15, 15>;
type Matrix15x12 = SMatrix<f64, 15, 12>;

/// Core nominal state (16 scalars).
#[derive(Debug, Clone)]
pub struct CoreState {
    /// Position of the IMU in the navigation frame.
    pub p_wi: Vector3<f64>,
    /// Velocity of the IMU in the navigation frame.
    pub v_wi: Vector3<f64>,
    /// Attitude of the IMU frame in the navigation frame.
    pub q_wi: UnitQuaternion<f64>,
    /// Gyroscope bias.
    pub b_w: Vector3<f64>,
    /// Accelerometer bias.
    pub b_a: Vector3<f64>,
}

impl CoreState {
    /// Seed a state at a known pose with zero velocity and biases.
    pub fn new(p_wi: Vector3<f64>, q_wi: UnitQuaternion<f64>) -> Self {
        Self {
            p_wi,
            v_wi: Vector3::zeros(),
            q_wi: UnitQuaternion::from_quaternion(q_wi.into_inner()),
            b_w: Vector3::zeros(),
            b_a: Vector3::zeros(),
        }
    }

    /// Boxplus with the first 15 entries of an error vector: Euclidean
    /// add on position/velocity/biases, `q ⊗ Exp(δθ)` on attitude.
    pub fn boxplus(&mut self, dx: &DVector<f64>) {
        self.p_wi += Vector3::new(dx[0], dx[1], dx[2]);
        self.v_wi += Vector3::new(dx[3], dx[4], dx[5]);
        let dtheta = Vector3::new(dx[6], dx[7], dx[8]);
        self.q_wi =
            UnitQuaternion::from_quaternion((self.q_wi * exp_so3(&dtheta)).into_inner());
        self.b_w += Vector3::new(dx[9], dx[10], dx[11]);
        self.b_a += Vector3::new(dx[12], dx[13], dx[14]);
    }
}

/// Core snapshot stored in buffer entries: nominal state plus the full
/// stacked covariance (core block first, then one block per registered
/// update sensor).
#[derive(Debug, Clone)]
pub struct CoreSnapshot {
    pub state: CoreState,
    pub cov: DMatrix<f64>,
}

/// Core state definition: noise densities, gravity, initial uncertainty,
/// outlier gate confidence, and the propagation sensor designation.
#[derive(Debug, Clone)]
pub struct CoreStateDef {
    pub noise: ImuNoise,
    /// Gravity in the navigation frame.
    pub gravity: Vector3<f64>,
    /// Outlier gate confidence, default 0.95.
    pub chi2_alpha: f64,
    propagation_sensor: Option<SensorId>,
    init_std_p: Vector3<f64>,
    init_std_v: Vector3<f64>,
    init_std_theta: Vector3<f64>,
    init_std_bw: Vector3<f64>,
    init_std_ba: Vector3<f64>,
}

impl CoreStateDef {
    pub fn new() -> Self {
        let deg = std::f64::consts::PI / 180.0;
        Self {
            noise: ImuNoise::default(),
            gravity: Vector3::new(0.0, 0.0, -9.81),
            chi2_alpha: 0.95,
            propagation_sensor: None,
            init_std_p: Vector3::repeat(0.1),
            init_std_v: Vector3::repeat(0.3),
            init_std_theta: Vector3::repeat(5.0 * deg),
            init_std_bw: Vector3::repeat(0.01),
            init_std_ba: Vector3::repeat(0.1),
        }
    }

    /// IMU continuous-time noise standard deviations, set once at
    /// construction time.
    pub fn set_noise_std(
        &mut self,
        n_w: Vector3<f64>,
        n_bw: Vector3<f64>,
        n_a: Vector3<f64>,
        n_ba: Vector3<f64>,
    ) {
        self.noise = ImuNoise::new(n_w, n_bw, n_a, n_ba);
    }

    /// Designate the propagation sensor handle.
    pub fn set_propagation_sensor(&mut self, sensor: SensorId) {
        self.propagation_sensor = Some(sensor);
    }

    pub fn propagation_sensor(&self) -> Option<SensorId> {
        self.propagation_sensor
    }

    /// Standard deviations of the initial core uncertainty.
    pub fn set_initial_state_std(
        &mut self,
        p: Vector3<f64>,
        v: Vector3<f64>,
        theta: Vector3<f64>,
        b_w: Vector3<f64>,
        b_a: Vector3<f64>,
    ) {
        self.init_std_p = p;
        self.init_std_v = v;
        self.init_std_theta = theta;
        self.init_std_bw = b_w;
        self.init_std_ba = b_a;
    }

    /// Initial 15×15 core covariance (diagonal of variances).
    pub fn initial_covariance(&self) -> Matrix15 {
        let mut p = Matrix15::zeros();
        for i in 0..3 {
            p[(i, i)] = self.init_std_p[i] * self.init_std_p[i];
            p[(i + 3, i + 3)] = self.init_std_v[i] * self.init_std_v[i];
            p[(i + 6, i + 6)] = self.init_std_theta[i] * self.init_std_theta[i];
            p[(i + 9, i + 9)] = self.init_std_bw[i] * self.init_std_bw[i];
            p[(i + 12, i + 12)] = self.init_std_ba[i] * self.init_std_ba[i];
        }
        p
    }
}

impl Default for CoreStateDef {
    fn default() -> Self {
        Self::new()
    }
}

/// One strapdown propagation step over `dt` seconds.
///
/// Integrates the nominal state with mid-point readings and propagates
/// the stacked covariance with `Φ = I + F_c Δt + ½ F_c² Δt²` and
/// `Q_d = Φ G_c Q_c G_cᵀ Φᵀ Δt`. Sensor calibration blocks pass through
/// unchanged (random-constant states). `dt = 0` is the identity.
pub fn propagate_snapshot(
    def: &CoreStateDef,
    prev: &CoreSnapshot,
    prev_imu: &ImuSample,
    curr_imu: &ImuSample,
    dt: f64,
) -> Result<CoreSnapshot, FilterError> {
    if dt < 0.0 {
        return Err(FilterError::NonMonotonicTime { dt });
    }
    if dt == 0.0 {
        return Ok(prev.clone());
    }

    let state = &prev.state;

    // Mid-point readings after bias subtraction.
    let omega_mid = 0.5 * (prev_imu.gyro + curr_imu.gyro) - state.b_w;
    let accel_mid = 0.5 * (prev_imu.accel + curr_imu.accel) - state.b_a;

    // Nominal integration.
    let dq = exp_so3(&(omega_mid * dt));
    let q_new = UnitQuaternion::from_quaternion((state.q_wi * dq).into_inner());

    let r_prev = state.q_wi.to_rotation_matrix().into_inner();
    let r_new = q_new.to_rotation_matrix().into_inner();
    let r_avg = 0.5 * (r_prev + r_new);

    let v_new = state.v_wi + (r_avg * accel_mid + def.gravity) * dt;
    let p_new = state.p_wi + 0.5 * (state.v_wi + v_new) * dt;

    // Continuous error-state dynamics, [δp, δv, δθ, δb_w, δb_a]:
    //   δṗ = δv
    //   δv̇ = −R [a]× δθ − R δb_a − R n_a
    //   δθ̇ = −[ω]× δθ − δb_w − n_w
    //   δḃ_w = n_bw,  δḃ_a = n_ba
    let mut f_c = Matrix15::zeros();
    f_c.fixed_view_mut::<3, 3>(0, 3)
        .copy_from(&Matrix3::identity());
    f_c.fixed_view_mut::<3, 3>(3, 6)
        .copy_from(&(-r_prev * skew(&accel_mid)));
    f_c.fixed_view_mut::<3, 3>(3, 12).copy_from(&(-r_prev));
    f_c.fixed_view_mut::<3, 3>(6, 6)
        .copy_from(&(-skew(&omega_mid)));
    f_c.fixed_view_mut::<3, 3>(6, 9)
        .copy_from(&(-Matrix3::identity()));

    let phi = Matrix15::identity() + f_c * dt + 0.5 * f_c * f_c * (dt * dt);

    // Noise input matrix for [n_w, n_bw, n_a, n_ba].
    let mut g_c = Matrix15x12::zeros();
    g_c.fixed_view_mut::<3, 3>(6, 0)
        .copy_from(&(-Matrix3::identity()));
    g_c.fixed_view_mut::<3, 3>(9, 3)
        .copy_from(&Matrix3::identity());
    g_c.fixed_view_mut::<3, 3>(3, 6).copy_from(&(-r_prev));
    g_c.fixed_view_mut::<3, 3>(12, 9)
        .copy_from(&Matrix3::identity());

    let q_c = def.noise.spectral_density();
    let q_d = (phi * g_c * q_c * g_c.transpose() * phi.transpose()) * dt;

    // Stacked covariance: core block transforms, calibration blocks are
    // constant, cross blocks pick up Φ on the core side.
    let n = prev.cov.nrows();
    let mut phi_full = DMatrix::identity(n, n);
    phi_full
        .view_mut((0, 0), (CORE_ERROR_DIM, CORE_ERROR_DIM))
        .copy_from(&phi);

    let mut cov = &phi_full * &prev.cov * phi_full.transpose();
    {
        let mut core_block = cov.view_mut((0, 0), (CORE_ERROR_DIM, CORE_ERROR_DIM));
        core_block += q_d;
    }
    symmetrize(&mut cov);

    Ok(CoreSnapshot {
        state: CoreState {
            p_wi: p_new,
            v_wi: v_new,
            q_wi: q_new,
            b_w: state.b_w,
            b_a: state.b_a,
        },
        cov,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn snapshot_at_rest() -> CoreSnapshot {
        let def = CoreStateDef::new();
        let state = CoreState::new(Vector3::new(0.0, 0.0, 5.0), UnitQuaternion::identity());
        let mut cov = DMatrix::zeros(CORE_ERROR_DIM, CORE_ERROR_DIM);
        cov.view_mut((0, 0), (CORE_ERROR_DIM, CORE_ERROR_DIM))
            .copy_from(&def.initial_covariance());
        CoreSnapshot { state, cov }
    }

    fn gravity_compensating_sample() -> ImuSample {
        // a = R⁻¹ (−g): with identity attitude the accelerometer reads
        // +9.81 on z while hovering.
        ImuSample::new(Vector3::new(0.0, 0.0, 9.81), Vector3::zeros())
    }

    #[test]
    fn test_zero_dt_is_identity() {
        let def = CoreStateDef::new();
        let prev = snapshot_at_rest();
        let sample = gravity_compensating_sample();

        let next = propagate_snapshot(&def, &prev, &sample, &sample, 0.0).unwrap();

        assert_relative_eq!(next.state.p_wi, prev.state.p_wi, epsilon = 1e-15);
        assert_relative_eq!(next.state.v_wi, prev.state.v_wi, epsilon = 1e-15);
        assert_relative_eq!(next.cov, prev.cov, epsilon = 1e-15);
    }

    #[test]
    fn test_negative_dt_is_an_error() {
        let def = CoreStateDef::new();
        let prev = snapshot_at_rest();
        let sample = gravity_compensating_sample();

        let err = propagate_snapshot(&def, &prev, &sample, &sample, -0.01).unwrap_err();
        assert!(matches!(err, FilterError::NonMonotonicTime { .. }));
    }

    #[test]
    fn test_stationary_under_gravity_compensation() {
        let def = CoreStateDef::new();
        let mut snapshot = snapshot_at_rest();
        let sample = gravity_compensating_sample();

        for _ in 0..100 {
            snapshot = propagate_snapshot(&def, &snapshot, &sample, &sample, 0.01).unwrap();
        }

        assert_relative_eq!(
            snapshot.state.p_wi,
            Vector3::new(0.0, 0.0, 5.0),
            epsilon = 1e-9
        );
        assert_relative_eq!(snapshot.state.v_wi, Vector3::zeros(), epsilon = 1e-9);
        assert_relative_eq!(snapshot.state.q_wi.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_free_fall_without_specific_force() {
        let def = CoreStateDef::new();
        let mut snapshot = snapshot_at_rest();
        let sample = ImuSample::new(Vector3::zeros(), Vector3::zeros());

        snapshot = propagate_snapshot(&def, &snapshot, &sample, &sample, 1.0).unwrap();

        assert_relative_eq!(snapshot.state.v_wi.z, -9.81, epsilon = 1e-12);
    }

    #[test]
    fn test_covariance_stays_symmetric_and_grows() {
        let def = CoreStateDef::new();
        let mut snapshot = snapshot_at_rest();
        let p0_pos = snapshot.cov[(0, 0)];
        let p0_vel = snapshot.cov[(3, 3)];
        let sample = ImuSample::new(
            Vector3::new(0.3, -0.1, 9.8),
            Vector3::new(0.05, 0.02, -0.01),
        );

        for _ in 0..50 {
            snapshot = propagate_snapshot(&def, &snapshot, &sample, &sample, 0.01).unwrap();
        }

        assert_relative_eq!(
            snapshot.cov.clone(),
            snapshot.cov.transpose(),
            epsilon = 1e-15
        );
        assert!(snapshot.cov[(0, 0)] > p0_pos);
        assert!(snapshot.cov[(3, 3)] > p0_vel);
    }

    #[test]
    fn test_rotation_integrates_constant_rate() {
        let def = CoreStateDef::new();
        let mut snapshot = snapshot_at_rest();
        let rate = 0.5; // rad/s about z
        let sample = ImuSample::new(Vector3::new(0.0, 0.0, 9.81), Vector3::new(0.0, 0.0, rate));

        let steps = 200;
        let dt = 0.01;
        for _ in 0..steps {
            snapshot = propagate_snapshot(&def, &snapshot, &sample, &sample, dt).unwrap();
        }

        let expected = exp_so3(&Vector3::new(0.0, 0.0, rate * steps as f64 * dt));
        let err = snapshot.state.q_wi.angle_to(&expected);
        assert!(err < 1e-9, "attitude error {}", err);
    }
}
