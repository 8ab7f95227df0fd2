//! Sensor handles, measurement payloads, and the closed sensor model set.
//!
//! Sensors are a closed variant set rather than trait objects: the
//! dispatcher in `CoreLogic` matches on the tag. Each model carries its
//! own calibration substate, measurement noise, and Jacobian functions.
//! `SensorId` is a lightweight copyable handle; buffer entries refer to
//! sensors by handle only, so there are no ownership cycles between the
//! buffer and the sensor set.

pub mod attitude;
pub mod imu;
pub mod pose;
pub mod position;
pub mod pressure;

pub use attitude::{AttitudeMeasurement, AttitudeSensor, AttitudeSensorState};
pub use imu::{ImuSample, ImuSensor};
pub use pose::{PoseMeasurement, PoseSensor, PoseSensorState};
pub use position::{PositionMeasurement, PositionSensor, PositionSensorState};
pub use pressure::{PressureMeasurement, PressureSensor, PressureSensorState};

use nalgebra::{DMatrix, DVector, DVectorView};

use crate::filter::state::CoreState;

/// Unique identifier for a registered sensor.
///
/// Assigned by `CoreLogic` at registration; serves as the cross-reference
/// key in buffer entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SensorId(pub u64);

impl std::fmt::Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Raw measurement payloads, one variant per sensor kind.
#[derive(Debug, Clone)]
pub enum MeasurementData {
    Imu(ImuSample),
    Pose(PoseMeasurement),
    Position(PositionMeasurement),
    Attitude(AttitudeMeasurement),
    Pressure(PressureMeasurement),
}

impl MeasurementData {
    /// Short label for log output.
    pub fn kind_label(&self) -> &'static str {
        match self {
            MeasurementData::Imu(_) => "imu",
            MeasurementData::Pose(_) => "pose",
            MeasurementData::Position(_) => "position",
            MeasurementData::Attitude(_) => "attitude",
            MeasurementData::Pressure(_) => "pressure",
        }
    }
}

/// Post-update calibration snapshot stored in `SensorState` buffer
/// entries.
#[derive(Debug, Clone)]
pub enum SensorStateSnapshot {
    Pose(PoseSensorState),
    Position(PositionSensorState),
    Attitude(AttitudeSensorState),
    Pressure(PressureSensorState),
}

/// Closed set of sensor models the dispatcher can drive.
#[derive(Debug, Clone)]
pub enum SensorModel {
    Imu(ImuSensor),
    Pose(PoseSensor),
    Position(PositionSensor),
    Attitude(AttitudeSensor),
    Pressure(PressureSensor),
}

impl SensorModel {
    pub fn name(&self) -> &str {
        match self {
            SensorModel::Imu(s) => s.name(),
            SensorModel::Pose(s) => s.name(),
            SensorModel::Position(s) => s.name(),
            SensorModel::Attitude(s) => s.name(),
            SensorModel::Pressure(s) => s.name(),
        }
    }

    /// True for the distinguished propagation sensor kind.
    pub fn is_propagation(&self) -> bool {
        matches!(self, SensorModel::Imu(_))
    }

    /// Dimension of the calibration covariance block this sensor
    /// contributes to the stacked filter covariance.
    pub fn cov_dim(&self) -> usize {
        match self {
            SensorModel::Imu(_) => 0,
            SensorModel::Pose(_) => 6,
            SensorModel::Position(_) => 3,
            SensorModel::Attitude(_) => 3,
            SensorModel::Pressure(_) => 3,
        }
    }

    /// Dimension of the measurement vector.
    pub fn measurement_dim(&self) -> usize {
        match self {
            SensorModel::Imu(_) => 0,
            SensorModel::Pose(_) => 6,
            SensorModel::Position(_) => 3,
            SensorModel::Attitude(_) => 3,
            SensorModel::Pressure(_) => 1,
        }
    }

    /// Whether this model can process the given measurement payload.
    pub fn accepts(&self, data: &MeasurementData) -> bool {
        matches!(
            (self, data),
            (SensorModel::Imu(_), MeasurementData::Imu(_))
                | (SensorModel::Pose(_), MeasurementData::Pose(_))
                | (SensorModel::Position(_), MeasurementData::Position(_))
                | (SensorModel::Attitude(_), MeasurementData::Attitude(_))
                | (SensorModel::Pressure(_), MeasurementData::Pressure(_))
        )
    }

    /// Whether the sensor's reference frame is rigidly attached to the
    /// navigation frame. The propagation sensor reports `true`.
    pub fn const_ref_to_nav(&self) -> bool {
        match self {
            SensorModel::Imu(_) => true,
            SensorModel::Pose(s) => s.const_ref_to_nav,
            SensorModel::Position(s) => s.const_ref_to_nav,
            SensorModel::Attitude(s) => s.const_ref_to_nav,
            SensorModel::Pressure(s) => s.const_ref_to_nav,
        }
    }

    /// Whether the calibration substate has been seeded, either
    /// explicitly or from a first measurement.
    pub fn calib_initialized(&self) -> bool {
        match self {
            SensorModel::Imu(_) => true,
            SensorModel::Pose(s) => s.calib_initialized(),
            SensorModel::Position(s) => s.calib_initialized(),
            SensorModel::Attitude(s) => s.calib_initialized(),
            SensorModel::Pressure(s) => s.calib_initialized(),
        }
    }

    /// Innovation `z ⊟ h(x, s)` for an update-sensor measurement.
    /// `None` for the propagation sensor or a mismatched payload.
    pub fn residual(&self, core: &CoreState, data: &MeasurementData) -> Option<DVector<f64>> {
        match (self, data) {
            (SensorModel::Pose(s), MeasurementData::Pose(z)) => Some(s.residual(core, z)),
            (SensorModel::Position(s), MeasurementData::Position(z)) => Some(s.residual(core, z)),
            (SensorModel::Attitude(s), MeasurementData::Attitude(z)) => Some(s.residual(core, z)),
            (SensorModel::Pressure(s), MeasurementData::Pressure(z)) => Some(s.residual(core, z)),
            _ => None,
        }
    }

    /// Measurement Jacobian split into the core block (m × 15) and the
    /// calibration block (m × k). `None` for the propagation sensor.
    pub fn jacobian(&self, core: &CoreState) -> Option<(DMatrix<f64>, DMatrix<f64>)> {
        match self {
            SensorModel::Imu(_) => None,
            SensorModel::Pose(s) => Some(s.jacobian(core)),
            SensorModel::Position(s) => Some(s.jacobian(core)),
            SensorModel::Attitude(s) => Some(s.jacobian(core)),
            SensorModel::Pressure(s) => Some(s.jacobian(core)),
        }
    }

    /// Measurement noise covariance `R`. `None` for the propagation
    /// sensor (its noise enters through the process model).
    pub fn noise_covariance(&self) -> Option<&DMatrix<f64>> {
        match self {
            SensorModel::Imu(_) => None,
            SensorModel::Pose(s) => Some(s.noise_covariance()),
            SensorModel::Position(s) => Some(s.noise_covariance()),
            SensorModel::Attitude(s) => Some(s.noise_covariance()),
            SensorModel::Pressure(s) => Some(s.noise_covariance()),
        }
    }

    /// Seed the calibration substate from a first measurement given the
    /// current core state.
    pub(crate) fn init_from_measurement(&mut self, core: &CoreState, data: &MeasurementData) {
        match (self, data) {
            (SensorModel::Pose(s), MeasurementData::Pose(z)) => s.init_from_measurement(core, z),
            (SensorModel::Position(s), MeasurementData::Position(z)) => {
                s.init_from_measurement(core, z)
            }
            (SensorModel::Attitude(s), MeasurementData::Attitude(z)) => {
                s.init_from_measurement(core, z)
            }
            (SensorModel::Pressure(s), MeasurementData::Pressure(z)) => {
                s.init_from_measurement(core, z)
            }
            _ => {}
        }
    }

    /// Diagonal (variances) used to seed this sensor's covariance block.
    pub(crate) fn initial_cov_diag(&self) -> Option<DVector<f64>> {
        match self {
            SensorModel::Imu(_) => None,
            SensorModel::Pose(s) => Some(s.initial_cov_diag()),
            SensorModel::Position(s) => Some(s.initial_cov_diag()),
            SensorModel::Attitude(s) => Some(s.initial_cov_diag()),
            SensorModel::Pressure(s) => Some(s.initial_cov_diag()),
        }
    }

    /// Boxplus on the calibration substate with the error-state slice
    /// belonging to this sensor.
    pub(crate) fn boxplus_calib(&mut self, dx: DVectorView<f64>) {
        match self {
            SensorModel::Imu(_) => {}
            SensorModel::Pose(s) => s.boxplus(dx),
            SensorModel::Position(s) => s.boxplus(dx),
            SensorModel::Attitude(s) => s.boxplus(dx),
            SensorModel::Pressure(s) => s.boxplus(dx),
        }
    }

    /// Current calibration snapshot for a `SensorState` buffer entry.
    pub fn snapshot(&self) -> Option<SensorStateSnapshot> {
        match self {
            SensorModel::Imu(_) => None,
            SensorModel::Pose(s) => Some(SensorStateSnapshot::Pose(s.state.clone())),
            SensorModel::Position(s) => Some(SensorStateSnapshot::Position(s.state.clone())),
            SensorModel::Attitude(s) => Some(SensorStateSnapshot::Attitude(s.state.clone())),
            SensorModel::Pressure(s) => Some(SensorStateSnapshot::Pressure(s.state.clone())),
        }
    }

    /// Restore the calibration substate from a buffer snapshot, used when
    /// rewinding for repropagation.
    pub(crate) fn restore_snapshot(&mut self, snap: &SensorStateSnapshot) {
        match (self, snap) {
            (SensorModel::Pose(s), SensorStateSnapshot::Pose(state)) => s.restore(state.clone()),
            (SensorModel::Position(s), SensorStateSnapshot::Position(state)) => {
                s.restore(state.clone())
            }
            (SensorModel::Attitude(s), SensorStateSnapshot::Attitude(state)) => {
                s.restore(state.clone())
            }
            (SensorModel::Pressure(s), SensorStateSnapshot::Pressure(state)) => {
                s.restore(state.clone())
            }
            _ => {}
        }
    }

    /// Reset the calibration to its pre-initialization value: the
    /// explicitly provided calibration if one was set, the type default
    /// otherwise (re-enabling `init_from_measurement`).
    pub(crate) fn reset_calib(&mut self) {
        match self {
            SensorModel::Imu(_) => {}
            SensorModel::Pose(s) => s.reset_calib(),
            SensorModel::Position(s) => s.reset_calib(),
            SensorModel::Attitude(s) => s.reset_calib(),
            SensorModel::Pressure(s) => s.reset_calib(),
        }
    }
}
