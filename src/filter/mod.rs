//! Filter core: state definition, propagation, Kalman update machinery,
//! and the dispatch logic.

pub mod logic;
pub mod noise;
pub mod state;
pub mod update;

pub use logic::{CoreLogic, FilterState, MeasurementOutcome};
pub use noise::ImuNoise;
pub use state::{propagate_snapshot, CoreSnapshot, CoreState, CoreStateDef, CORE_ERROR_DIM};
pub use update::{kalman_update, Chi2Gate, Correction, RejectionReason};
