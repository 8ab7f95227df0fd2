//! Error types surfaced by the filter core.

use crate::sensors::SensorId;
use crate::time::Time;

/// Errors returned synchronously by the filter API.
///
/// Rejected measurements (outlier gate, numeric failure) are not errors;
/// they are reported through `MeasurementOutcome` and recorded in the
/// buffer. `FilterError` covers conditions where the call itself could
/// not be carried out.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    /// API called before `initialize()`, or `initialize()` called without
    /// a buffered propagation-sensor measurement to anchor the state.
    NotInitialized,
    /// Measurement references a sensor handle not registered with CoreLogic.
    UnknownSensor(SensorId),
    /// Measurement payload variant does not match the sensor model it was
    /// addressed to.
    MeasurementMismatch(SensorId),
    /// Out-of-order measurement is older than the oldest retained core
    /// state; no repropagation start point exists.
    MeasurementTooOld(Time),
    /// Buffer is full and every remaining entry is protected from pruning.
    OutOfCapacity,
    /// A propagation interval with negative duration was requested.
    NonMonotonicTime { dt: f64 },
    /// A configuration the crate does not support (e.g. registering a
    /// sensor after initialization).
    Unsupported(&'static str),
}

impl std::fmt::Display for FilterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterError::NotInitialized => write!(f, "filter is not initialized"),
            FilterError::UnknownSensor(id) => write!(f, "unknown sensor handle {}", id),
            FilterError::MeasurementMismatch(id) => {
                write!(f, "measurement payload does not match sensor {}", id)
            }
            FilterError::MeasurementTooOld(t) => {
                write!(f, "measurement at {} precedes the oldest core state", t)
            }
            FilterError::OutOfCapacity => write!(f, "buffer full, all entries protected"),
            FilterError::NonMonotonicTime { dt } => {
                write!(f, "negative propagation interval dt = {}", dt)
            }
            FilterError::Unsupported(what) => write!(f, "unsupported: {}", what),
        }
    }
}

impl std::error::Error for FilterError {}
