//! SO(3) Lie group utilities for error-state filtering.
//!
//! Provides skew-symmetric matrix construction, the exponential and
//! logarithmic maps, the right Jacobian Jr(φ), and the small-angle
//! quaternion residual used as the attitude boxminus.

use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};

/// Small angle threshold for numerical stability.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-6;

/// Constructs the skew-symmetric matrix [v]× such that [v]× u = v × u.
///
/// ```text
/// [v]× = |  0   -v_z   v_y |
///        |  v_z   0   -v_x |
///        | -v_y  v_x    0  |
/// ```
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Exponential map Exp: ℝ³ → SO(3), returned as a unit quaternion.
///
/// For small angles (|θ| < ε) the first-order Taylor expansion
/// `q ≈ (1, θ/2)` is used instead of the axis-angle form.
pub fn exp_so3(theta: &Vector3<f64>) -> UnitQuaternion<f64> {
    let angle = theta.norm();

    if angle < SMALL_ANGLE_THRESHOLD {
        return UnitQuaternion::from_quaternion(Quaternion::from_parts(1.0, 0.5 * theta));
    }

    let axis = theta / angle;
    let (sin_half, cos_half) = (0.5 * angle).sin_cos();
    UnitQuaternion::from_quaternion(Quaternion::from_parts(cos_half, axis * sin_half))
}

/// Logarithmic map Log: SO(3) → ℝ³.
///
/// Accepts a raw quaternion and silently normalizes it; a non-unit input
/// is not an error condition. The result lies in the ball ‖θ‖ ≤ π
/// (the representative with non-negative scalar part is taken).
pub fn log_so3(q: &Quaternion<f64>) -> Vector3<f64> {
    let qn = q.normalize();
    let (w, vec) = if qn.w < 0.0 {
        (-qn.w, -qn.imag())
    } else {
        (qn.w, qn.imag())
    };

    let vec_norm = vec.norm();
    if vec_norm < SMALL_ANGLE_THRESHOLD {
        // First-order: θ ≈ 2 v / w
        return 2.0 * vec / w;
    }

    let angle = 2.0 * vec_norm.atan2(w);
    vec * (angle / vec_norm)
}

/// Computes the right Jacobian Jr(φ) of SO(3).
///
/// ```text
/// Jr(φ) = I - (1 - cos|φ|)/|φ|² [φ]× + (|φ| - sin|φ|)/|φ|³ [φ]×²
/// ```
///
/// For small angles (|φ| < ε):
/// ```text
/// Jr(φ) ≈ I - 0.5 [φ]×
/// ```
pub fn right_jacobian_so3(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();

    if theta < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity() - 0.5 * skew(phi);
    }

    let theta_sq = theta * theta;
    let theta_cu = theta_sq * theta;
    let sin_theta = theta.sin();
    let cos_theta = theta.cos();

    let skew_phi = skew(phi);
    let skew_phi_sq = skew_phi * skew_phi;

    Matrix3::identity()
        - ((1.0 - cos_theta) / theta_sq) * skew_phi
        + ((theta - sin_theta) / theta_cu) * skew_phi_sq
}

/// Small-angle attitude residual `2 · vec(q_pred⁻¹ ⊗ q_meas)`.
///
/// This is the boxminus used for quaternion-valued measurement
/// components. The difference quaternion is flipped to the hemisphere
/// with non-negative scalar part so the residual stays minimal.
pub fn small_angle_residual(
    q_pred: &UnitQuaternion<f64>,
    q_meas: &UnitQuaternion<f64>,
) -> Vector3<f64> {
    let dq = q_pred.inverse() * q_meas;
    let dq = dq.into_inner();
    if dq.w < 0.0 {
        -2.0 * dq.imag()
    } else {
        2.0 * dq.imag()
    }
}
