//! Geometry utilities: SO(3) maps and Jacobians.

pub mod so3;

pub use so3::{exp_so3, log_so3, right_jacobian_so3, skew, small_angle_residual};
