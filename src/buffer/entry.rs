//! Buffer entry: the tagged record stored in the measurement buffer.

use crate::filter::state::CoreSnapshot;
use crate::filter::update::RejectionReason;
use crate::sensors::{MeasurementData, SensorId, SensorStateSnapshot};
use crate::time::Time;

/// Entry kind, derived from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Measurement,
    SensorState,
    CoreState,
    Init,
}

/// Payload carried by a buffer entry.
#[derive(Debug, Clone)]
pub enum EntryPayload {
    /// Raw measurement as it arrived.
    Measurement(MeasurementData),
    /// Post-update sensor calibration snapshot.
    SensorState(SensorStateSnapshot),
    /// Propagated or updated core snapshot (nominal + stacked covariance).
    CoreState(CoreSnapshot),
    /// Initialization marker.
    Init,
}

impl EntryPayload {
    pub fn kind(&self) -> EntryKind {
        match self {
            EntryPayload::Measurement(_) => EntryKind::Measurement,
            EntryPayload::SensorState(_) => EntryKind::SensorState,
            EntryPayload::CoreState(_) => EntryKind::CoreState,
            EntryPayload::Init => EntryKind::Init,
        }
    }
}

/// Flags attached to an entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryMetadata {
    /// Entry is a repropagation restart candidate.
    pub checkpoint: bool,
    /// Measurement arrived out of order and triggered a repropagation.
    pub out_of_order_origin: bool,
    /// Measurement was rejected and left the state untouched.
    pub rejection: Option<RejectionReason>,
}

/// One record in the time-ordered buffer.
///
/// Entries are immutable after insertion apart from their metadata
/// flags; state snapshots live only here.
#[derive(Debug, Clone)]
pub struct BufferEntry {
    pub timestamp: Time,
    pub sensor: SensorId,
    pub payload: EntryPayload,
    pub metadata: EntryMetadata,
    pub(super) seq: u64,
}

impl BufferEntry {
    pub fn measurement(timestamp: Time, sensor: SensorId, data: MeasurementData) -> Self {
        Self {
            timestamp,
            sensor,
            payload: EntryPayload::Measurement(data),
            metadata: EntryMetadata::default(),
            seq: 0,
        }
    }

    pub fn core_state(
        timestamp: Time,
        sensor: SensorId,
        snapshot: CoreSnapshot,
        checkpoint: bool,
    ) -> Self {
        Self {
            timestamp,
            sensor,
            payload: EntryPayload::CoreState(snapshot),
            metadata: EntryMetadata {
                checkpoint,
                ..EntryMetadata::default()
            },
            seq: 0,
        }
    }

    pub fn sensor_state(timestamp: Time, sensor: SensorId, snapshot: SensorStateSnapshot) -> Self {
        Self {
            timestamp,
            sensor,
            payload: EntryPayload::SensorState(snapshot),
            metadata: EntryMetadata {
                checkpoint: true,
                ..EntryMetadata::default()
            },
            seq: 0,
        }
    }

    pub fn init(timestamp: Time, sensor: SensorId) -> Self {
        Self {
            timestamp,
            sensor,
            payload: EntryPayload::Init,
            metadata: EntryMetadata::default(),
            seq: 0,
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.payload.kind()
    }

    /// Insertion sequence number; the stable secondary sort key.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn measurement_data(&self) -> Option<&MeasurementData> {
        match &self.payload {
            EntryPayload::Measurement(data) => Some(data),
            _ => None,
        }
    }

    pub fn core_snapshot(&self) -> Option<&CoreSnapshot> {
        match &self.payload {
            EntryPayload::CoreState(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn sensor_snapshot(&self) -> Option<&SensorStateSnapshot> {
        match &self.payload {
            EntryPayload::SensorState(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}
