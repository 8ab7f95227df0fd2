//! The propagation (IMU) sensor.

use nalgebra::Vector3;

/// Single IMU reading: specific force and angular rate in the body frame.
#[derive(Debug, Clone, Copy)]
pub struct ImuSample {
    /// Specific force (m/s²).
    pub accel: Vector3<f64>,
    /// Angular rate (rad/s).
    pub gyro: Vector3<f64>,
}

impl ImuSample {
    pub fn new(accel: Vector3<f64>, gyro: Vector3<f64>) -> Self {
        Self { accel, gyro }
    }
}

/// The distinguished propagation sensor.
///
/// Carries no calibration substate; its measurements drive time
/// advancement of the nominal state and covariance rather than Kalman
/// updates. Noise parameters live on the core state definition.
#[derive(Debug, Clone)]
pub struct ImuSensor {
    name: String,
}

impl ImuSensor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
