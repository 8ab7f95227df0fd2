//! Filter dispatch: measurement classification, propagation, update,
//! out-of-order detection and repropagation.
//!
//! `CoreLogic` owns the buffer and the sensor set. Measurements are
//! inserted in time order; an insertion before the buffer tail triggers
//! a bounded linear replay from the nearest prior core-state checkpoint,
//! so the trajectory is the same as if every measurement had arrived in
//! chronological order.

use std::collections::HashMap;

use nalgebra::{DMatrix, UnitQuaternion, Vector3};
use tracing::{debug, info, warn};

use crate::buffer::{Buffer, BufferEntry, EntryKind};
use crate::error::FilterError;
use crate::filter::state::{
    propagate_snapshot, CoreSnapshot, CoreState, CoreStateDef, CORE_ERROR_DIM,
};
use crate::filter::update::{kalman_update, Chi2Gate, RejectionReason};
use crate::sensors::{ImuSample, MeasurementData, SensorId, SensorModel, SensorStateSnapshot};
use crate::time::Time;

/// Filter lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterState {
    /// Measurements are buffered but not processed.
    #[default]
    Uninitialized,
    /// Normal operation.
    Initialized,
    /// Transient state while an out-of-order insertion is replayed.
    Repropagating,
}

/// Synchronous result of processing one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementOutcome {
    /// Measurement was fused (or, for the propagation sensor, the state
    /// was propagated).
    Accepted,
    /// Measurement recorded but rejected by the gate or the numerics;
    /// filter state unchanged.
    Rejected(RejectionReason),
    /// Filter not initialized yet; measurement buffered for later.
    Deferred,
}

/// Covariance layout block of one update sensor within the stacked
/// filter covariance.
#[derive(Debug, Clone, Copy)]
struct CovBlock {
    sensor: SensorId,
    offset: usize,
    dim: usize,
}

/// The filter core: buffer, sensor set, and dispatch loop.
pub struct CoreLogic {
    core_def: CoreStateDef,
    pub buffer: Buffer,
    sensors: HashMap<SensorId, SensorModel>,
    layout: Vec<CovBlock>,
    state: FilterState,
    gate: Chi2Gate,
    next_sensor_id: u64,
}

impl CoreLogic {
    pub fn new(core_def: CoreStateDef) -> Self {
        let gate = Chi2Gate::new(core_def.chi2_alpha);
        Self {
            core_def,
            buffer: Buffer::new(),
            sensors: HashMap::new(),
            layout: Vec::new(),
            state: FilterState::Uninitialized,
            gate,
            next_sensor_id: 0,
        }
    }

    pub fn core_def(&self) -> &CoreStateDef {
        &self.core_def
    }

    pub fn core_def_mut(&mut self) -> &mut CoreStateDef {
        &mut self.core_def
    }

    pub fn filter_state(&self) -> FilterState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state != FilterState::Uninitialized
    }

    pub fn sensor(&self, id: SensorId) -> Option<&SensorModel> {
        self.sensors.get(&id)
    }

    pub fn sensor_mut(&mut self, id: SensorId) -> Option<&mut SensorModel> {
        self.sensors.get_mut(&id)
    }

    /// Dimension of the stacked error state (core + calibration blocks).
    pub fn error_dim(&self) -> usize {
        CORE_ERROR_DIM + self.layout.iter().map(|b| b.dim).sum::<usize>()
    }

    /// Register a sensor model and obtain its handle. Must happen before
    /// initialization so the stacked covariance layout is fixed.
    pub fn register_sensor(&mut self, model: SensorModel) -> Result<SensorId, FilterError> {
        if self.state != FilterState::Uninitialized {
            return Err(FilterError::Unsupported(
                "sensor registration after initialization",
            ));
        }
        if !model.const_ref_to_nav() {
            return Err(FilterError::Unsupported(
                "sensors with a drifting world reference",
            ));
        }

        let id = SensorId(self.next_sensor_id);
        self.next_sensor_id += 1;

        let dim = model.cov_dim();
        if dim > 0 {
            let offset = CORE_ERROR_DIM + self.layout.iter().map(|b| b.dim).sum::<usize>();
            self.layout.push(CovBlock {
                sensor: id,
                offset,
                dim,
            });
        }

        debug!(sensor = %id, name = model.name(), "sensor registered");
        self.sensors.insert(id, model);
        Ok(id)
    }

    /// Designate the propagation sensor; must be an IMU variant.
    pub fn set_propagation_sensor(&mut self, sensor: SensorId) -> Result<(), FilterError> {
        match self.sensors.get(&sensor) {
            Some(model) if model.is_propagation() => {
                self.core_def.set_propagation_sensor(sensor);
                Ok(())
            }
            Some(_) => Err(FilterError::Unsupported(
                "propagation sensor must be an IMU",
            )),
            None => Err(FilterError::UnknownSensor(sensor)),
        }
    }

    /// Seed the core state at the newest buffered propagation-sensor
    /// measurement: position and attitude as given, zero velocity and
    /// biases, initial covariance from the core definition.
    pub fn initialize(
        &mut self,
        p_wi: Vector3<f64>,
        q_wi: UnitQuaternion<f64>,
    ) -> Result<(), FilterError> {
        if self.state != FilterState::Uninitialized {
            return Err(FilterError::Unsupported("filter is already initialized"));
        }
        let prop = self
            .core_def
            .propagation_sensor()
            .ok_or(FilterError::NotInitialized)?;
        let t0 = self
            .buffer
            .latest_sensor_handle_measurement(prop)
            .map(|(_, e)| e.timestamp)
            .ok_or(FilterError::NotInitialized)?;

        let state = CoreState::new(p_wi, q_wi);
        let n = self.error_dim();
        let mut cov = DMatrix::zeros(n, n);
        cov.view_mut((0, 0), (CORE_ERROR_DIM, CORE_ERROR_DIM))
            .copy_from(&self.core_def.initial_covariance());
        for block in &self.layout {
            let model = match self.sensors.get(&block.sensor) {
                Some(model) => model,
                None => continue,
            };
            // Explicitly calibrated sensors get their block seeded now;
            // the others are seeded by init_from_measurement later.
            if model.calib_initialized() {
                if let Some(diag) = model.initial_cov_diag() {
                    for k in 0..block.dim {
                        cov[(block.offset + k, block.offset + k)] = diag[k];
                    }
                }
            }
        }

        self.gate = Chi2Gate::new(self.core_def.chi2_alpha);
        self.buffer.insert(BufferEntry::init(t0, prop));
        self.buffer
            .insert(BufferEntry::core_state(t0, prop, CoreSnapshot { state, cov }, true));
        self.state = FilterState::Initialized;
        info!(t = %t0, "filter initialized");
        Ok(())
    }

    /// Return to `Uninitialized`, releasing every buffer entry and
    /// rewinding sensor calibrations.
    pub fn reset(&mut self) {
        self.buffer.clear();
        for model in self.sensors.values_mut() {
            model.reset_calib();
        }
        self.state = FilterState::Uninitialized;
        info!("filter reset");
    }

    /// Ingest one measurement. Runs to completion synchronously: the
    /// measurement is buffered, then either processed in order or, when
    /// it arrived late, replayed together with every younger entry.
    pub fn process_measurement(
        &mut self,
        sensor: SensorId,
        timestamp: Time,
        data: MeasurementData,
    ) -> Result<MeasurementOutcome, FilterError> {
        let model = self
            .sensors
            .get(&sensor)
            .ok_or(FilterError::UnknownSensor(sensor))?;
        if !model.accepts(&data) {
            return Err(FilterError::MeasurementMismatch(sensor));
        }

        // Capacity is enforced at ingress so replay indices stay stable.
        while self.buffer.len() >= self.buffer.max_len() {
            if self.buffer.prune_oldest().is_none() {
                return Err(FilterError::OutOfCapacity);
            }
        }

        let kind = data.kind_label();
        let (index, out_of_order) = self
            .buffer
            .insert(BufferEntry::measurement(timestamp, sensor, data));

        if self.state == FilterState::Uninitialized {
            debug!(sensor = %sensor, kind, t = %timestamp, "measurement buffered before initialization");
            return Ok(MeasurementOutcome::Deferred);
        }

        let outcome = if out_of_order {
            debug!(sensor = %sensor, kind, t = %timestamp, "out-of-order measurement");
            self.repropagate(index)?
        } else {
            self.process_entry_at(index)?
                .unwrap_or(MeasurementOutcome::Deferred)
        };

        // Derived entries may have pushed the buffer over capacity.
        while self.buffer.len() > self.buffer.max_len() {
            if self.buffer.prune_oldest().is_none() {
                break;
            }
        }

        Ok(outcome)
    }

    /// Last IMU reading at or before `upto`, used as the held input when
    /// propagating to an update-sensor timestamp.
    fn held_imu_sample(&self, upto: Time) -> Option<ImuSample> {
        let prop = self.core_def.propagation_sensor()?;
        let (_, entry) = self.buffer.latest_measurement_before(prop, upto)?;
        match entry.measurement_data() {
            Some(MeasurementData::Imu(sample)) => Some(*sample),
            _ => None,
        }
    }

    fn block_of(&self, sensor: SensorId) -> Option<CovBlock> {
        self.layout.iter().copied().find(|b| b.sensor == sensor)
    }

    /// Process the measurement entry at `index` in its in-order place:
    /// propagate for the propagation sensor, propagate-and-update for
    /// everything else. Non-measurement entries yield `None`.
    fn process_entry_at(
        &mut self,
        index: usize,
    ) -> Result<Option<MeasurementOutcome>, FilterError> {
        let (t, sensor_id, data) = match self.buffer.get(index) {
            Some(e) if e.kind() == EntryKind::Measurement => {
                match e.measurement_data().cloned() {
                    Some(data) => (e.timestamp, e.sensor, data),
                    None => return Ok(None),
                }
            }
            _ => return Ok(None),
        };

        let prop = self
            .core_def
            .propagation_sensor()
            .ok_or(FilterError::NotInitialized)?;

        let (prev_snapshot, t_prev) = match self.buffer.closest_state_before(t) {
            Some((_, e)) => match e.core_snapshot() {
                Some(snapshot) => (snapshot.clone(), e.timestamp),
                None => return Err(FilterError::NotInitialized),
            },
            None => return Err(FilterError::NotInitialized),
        };
        let dt = t - t_prev;

        if sensor_id == prop {
            let MeasurementData::Imu(curr) = data else {
                return Err(FilterError::MeasurementMismatch(sensor_id));
            };
            let prev_sample = self.held_imu_sample(t_prev).unwrap_or(curr);
            let next =
                propagate_snapshot(&self.core_def, &prev_snapshot, &prev_sample, &curr, dt)?;
            self.buffer
                .insert(BufferEntry::core_state(t, sensor_id, next, true));
            return Ok(Some(MeasurementOutcome::Accepted));
        }

        // Update sensor: advance the core to the measurement time with
        // the last IMU reading held constant.
        let held = self
            .held_imu_sample(t)
            .ok_or(FilterError::NotInitialized)?;
        let propagated = propagate_snapshot(&self.core_def, &prev_snapshot, &held, &held, dt)?;
        self.buffer.insert(BufferEntry::core_state(
            t,
            sensor_id,
            propagated.clone(),
            true,
        ));

        let block = self.block_of(sensor_id);
        let gate = self.gate;
        let mut core = propagated.state;
        let mut cov = propagated.cov;

        let model = self
            .sensors
            .get_mut(&sensor_id)
            .ok_or(FilterError::UnknownSensor(sensor_id))?;

        if !model.calib_initialized() {
            model.init_from_measurement(&core, &data);
            if let (Some(diag), Some(block)) = (model.initial_cov_diag(), block) {
                for k in 0..block.dim {
                    cov[(block.offset + k, block.offset + k)] = diag[k];
                }
            }
            debug!(sensor = %sensor_id, "calibration initialized from first measurement");
        }

        let y = model
            .residual(&core, &data)
            .ok_or(FilterError::MeasurementMismatch(sensor_id))?;
        let (h_core, h_calib) = model
            .jacobian(&core)
            .ok_or(FilterError::MeasurementMismatch(sensor_id))?;
        let r = model
            .noise_covariance()
            .ok_or(FilterError::MeasurementMismatch(sensor_id))?
            .clone();

        let m = y.len();
        let n = cov.nrows();
        let mut h = DMatrix::zeros(m, n);
        h.view_mut((0, 0), (m, CORE_ERROR_DIM)).copy_from(&h_core);
        if let Some(block) = block {
            h.view_mut((0, block.offset), (m, block.dim))
                .copy_from(&h_calib);
        }

        match kalman_update(&cov, &h, &r, &y, &gate) {
            Ok(correction) => {
                core.boxplus(&correction.delta);
                if let Some(block) = block {
                    model.boxplus_calib(correction.delta.rows(block.offset, block.dim));
                }
                let snapshot = model.snapshot();
                if let Some(snapshot) = snapshot {
                    self.buffer
                        .insert(BufferEntry::sensor_state(t, sensor_id, snapshot));
                }
                self.buffer.insert(BufferEntry::core_state(
                    t,
                    sensor_id,
                    CoreSnapshot {
                        state: core,
                        cov: correction.cov,
                    },
                    true,
                ));
                Ok(Some(MeasurementOutcome::Accepted))
            }
            Err(reason) => {
                warn!(sensor = %sensor_id, ?reason, t = %t, "measurement rejected");
                if let Some(meta) = self.buffer.metadata_mut(index) {
                    meta.rejection = Some(reason);
                }
                Ok(Some(MeasurementOutcome::Rejected(reason)))
            }
        }
    }

    /// Handle an out-of-order insertion: rewind to the nearest prior
    /// core-state checkpoint, drop every younger derived entry, and
    /// replay the surviving measurements forward.
    fn repropagate(&mut self, origin_index: usize) -> Result<MeasurementOutcome, FilterError> {
        let (t, origin_seq) = match self.buffer.get(origin_index) {
            Some(e) => (e.timestamp, e.seq()),
            None => return Ok(MeasurementOutcome::Deferred),
        };

        let restart_index = match self.buffer.closest_state_before(t) {
            Some((index, _)) => index,
            None => {
                // Older than the oldest retained checkpoint; discard.
                self.buffer.remove_at(origin_index);
                warn!(t = %t, "measurement older than oldest core state, discarded");
                return Err(FilterError::MeasurementTooOld(t));
            }
        };

        if let Some(meta) = self.buffer.metadata_mut(origin_index) {
            meta.out_of_order_origin = true;
        }

        self.state = FilterState::Repropagating;
        let result = self.replay_from(restart_index, origin_seq);
        self.state = FilterState::Initialized;
        result
    }

    fn replay_from(
        &mut self,
        restart_index: usize,
        origin_seq: u64,
    ) -> Result<MeasurementOutcome, FilterError> {
        // Rewind sensor calibrations to their values at the restart
        // point; sensors without a snapshot fall back to their
        // pre-initialization calibration.
        let restores: Vec<(SensorId, Option<SensorStateSnapshot>)> = self
            .layout
            .iter()
            .map(|block| {
                let snapshot = self
                    .buffer
                    .latest_sensor_handle_state_upto(block.sensor, restart_index)
                    .and_then(|(_, e)| e.sensor_snapshot().cloned());
                (block.sensor, snapshot)
            })
            .collect();
        for (id, snapshot) in restores {
            if let Some(model) = self.sensors.get_mut(&id) {
                match snapshot {
                    Some(snapshot) => model.restore_snapshot(&snapshot),
                    None => model.reset_calib(),
                }
            }
        }

        self.buffer.remove_states_after(restart_index);

        // Clear stale flags on the measurements about to be replayed.
        for index in restart_index + 1..self.buffer.len() {
            if let Some(meta) = self.buffer.metadata_mut(index) {
                meta.rejection = None;
            }
        }

        let mut outcome = MeasurementOutcome::Accepted;
        let mut index = restart_index + 1;
        while index < self.buffer.len() {
            let seq = match self.buffer.get(index) {
                Some(e) if e.kind() == EntryKind::Measurement => e.seq(),
                _ => {
                    index += 1;
                    continue;
                }
            };
            if let Some(o) = self.process_entry_at(index)? {
                if seq == origin_seq {
                    outcome = o;
                }
            }
            index += 1;
        }

        debug!("repropagation complete");
        Ok(outcome)
    }
}
