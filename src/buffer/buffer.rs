//! Time-ordered measurement and state buffer.
//!
//! Entries are kept sorted by `(timestamp, seq)` where `seq` is a
//! monotonically increasing insertion counter, so arrival order is a
//! stable tie-break for equal timestamps. Lookups run a binary search on
//! the timestamp; tail appends are amortized O(1).

use tracing::debug;

use crate::buffer::entry::{BufferEntry, EntryKind, EntryMetadata};
use crate::sensors::SensorId;
use crate::time::Time;

/// Default maximum buffer length.
pub const DEFAULT_MAX_LEN: usize = 400;

/// Time-ordered container for measurements and state checkpoints.
#[derive(Debug)]
pub struct Buffer {
    entries: Vec<BufferEntry>,
    max_len: usize,
    keep_last_sensor_handle: bool,
    next_seq: u64,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_MAX_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_len,
            keep_last_sensor_handle: true,
            next_seq: 0,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn set_max_len(&mut self, max_len: usize) {
        self.max_len = max_len;
    }

    /// Protect the newest `SensorState` entry of each handle from
    /// pruning (enabled by default).
    pub fn set_keep_last_sensor_handle(&mut self, keep: bool) {
        self.keep_last_sensor_handle = keep;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BufferEntry> {
        self.entries.get(index)
    }

    pub(crate) fn metadata_mut(&mut self, index: usize) -> Option<&mut EntryMetadata> {
        self.entries.get_mut(index).map(|e| &mut e.metadata)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferEntry> {
        self.entries.iter()
    }

    /// Iterate entries starting at `index`.
    pub fn iter_from(&self, index: usize) -> impl Iterator<Item = &BufferEntry> {
        self.entries[index.min(self.entries.len())..].iter()
    }

    /// Newest entry overall.
    pub fn latest(&self) -> Option<&BufferEntry> {
        self.entries.last()
    }

    /// Newest `CoreState` entry. `None` signals an uninitialized filter.
    pub fn latest_core_state(&self) -> Option<(usize, &BufferEntry)> {
        self.rfind(self.entries.len(), |e| e.kind() == EntryKind::CoreState)
    }

    /// Newest `Init` marker.
    pub fn latest_init(&self) -> Option<(usize, &BufferEntry)> {
        self.rfind(self.entries.len(), |e| e.kind() == EntryKind::Init)
    }

    /// Newest `SensorState` entry for the given handle.
    ///
    /// After a repropagation the newest buffer entry may belong to a
    /// different sensor, so callers exporting per-sensor states should
    /// use this rather than `latest()`.
    pub fn latest_sensor_handle_state(&self, sensor: SensorId) -> Option<(usize, &BufferEntry)> {
        self.rfind(self.entries.len(), |e| {
            e.kind() == EntryKind::SensorState && e.sensor == sensor
        })
    }

    /// Newest `SensorState` entry for the handle at or before `index`.
    pub fn latest_sensor_handle_state_upto(
        &self,
        sensor: SensorId,
        index: usize,
    ) -> Option<(usize, &BufferEntry)> {
        self.rfind((index + 1).min(self.entries.len()), |e| {
            e.kind() == EntryKind::SensorState && e.sensor == sensor
        })
    }

    /// Newest `Measurement` entry for the given handle.
    pub fn latest_sensor_handle_measurement(
        &self,
        sensor: SensorId,
    ) -> Option<(usize, &BufferEntry)> {
        self.rfind(self.entries.len(), |e| {
            e.kind() == EntryKind::Measurement && e.sensor == sensor
        })
    }

    /// Newest `Measurement` entry of the handle with timestamp ≤ `t`.
    pub fn latest_measurement_before(
        &self,
        sensor: SensorId,
        t: Time,
    ) -> Option<(usize, &BufferEntry)> {
        let upper = self.entries.partition_point(|e| e.timestamp <= t);
        self.rfind(upper, |e| {
            e.kind() == EntryKind::Measurement && e.sensor == sensor
        })
    }

    /// Newest `CoreState` entry with timestamp ≤ `t`; the repropagation
    /// restart point.
    pub fn closest_state_before(&self, t: Time) -> Option<(usize, &BufferEntry)> {
        let upper = self.entries.partition_point(|e| e.timestamp <= t);
        self.rfind(upper, |e| e.kind() == EntryKind::CoreState)
    }

    /// Insert in time order. Returns the insertion index and whether an
    /// entry with a later timestamp already existed (out-of-order).
    pub fn insert(&mut self, mut entry: BufferEntry) -> (usize, bool) {
        entry.seq = self.next_seq;
        self.next_seq += 1;

        let index = self
            .entries
            .partition_point(|e| e.timestamp <= entry.timestamp);
        let out_of_order = index < self.entries.len();
        self.entries.insert(index, entry);
        (index, out_of_order)
    }

    /// Remove derived state entries (`CoreState`, `SensorState`) strictly
    /// after `index`; measurements and init markers are preserved.
    pub fn remove_states_after(&mut self, index: usize) {
        if index + 1 >= self.entries.len() {
            return;
        }
        let kept: Vec<BufferEntry> = self
            .entries
            .drain(index + 1..)
            .filter(|e| {
                matches!(e.kind(), EntryKind::Measurement | EntryKind::Init)
            })
            .collect();
        self.entries.extend(kept);
    }

    pub(crate) fn remove_at(&mut self, index: usize) -> Option<BufferEntry> {
        if index < self.entries.len() {
            Some(self.entries.remove(index))
        } else {
            None
        }
    }

    /// Remove the oldest prunable entry. Entries are protected when they
    /// are the sole predecessor of unmaterialized state: the only
    /// `CoreState` in the buffer, the last `SensorState` of a handle
    /// (when enabled), or the `Init` marker. Returns `None` when every
    /// entry is protected.
    pub fn prune_oldest(&mut self) -> Option<BufferEntry> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .position(|(i, e)| self.is_prunable(i, e))?;
        let removed = self.entries.remove(index);
        debug!(
            kind = ?removed.kind(),
            timestamp = %removed.timestamp,
            "pruned oldest buffer entry"
        );
        Some(removed)
    }

    fn is_prunable(&self, index: usize, entry: &BufferEntry) -> bool {
        match entry.kind() {
            EntryKind::Measurement => true,
            EntryKind::Init => false,
            EntryKind::CoreState => self.entries[index + 1..]
                .iter()
                .any(|e| e.kind() == EntryKind::CoreState),
            EntryKind::SensorState => {
                !self.keep_last_sensor_handle
                    || self.entries[index + 1..].iter().any(|e| {
                        e.kind() == EntryKind::SensorState && e.sensor == entry.sensor
                    })
            }
        }
    }

    /// Entries must be in non-decreasing `(timestamp, seq)` order.
    pub fn is_sorted(&self) -> bool {
        self.entries
            .windows(2)
            .all(|w| (w[0].timestamp, w[0].seq) <= (w[1].timestamp, w[1].seq))
    }

    /// Release every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn rfind<F>(&self, upper: usize, pred: F) -> Option<(usize, &BufferEntry)>
    where
        F: Fn(&BufferEntry) -> bool,
    {
        self.entries[..upper.min(self.entries.len())]
            .iter()
            .enumerate()
            .rev()
            .find(|(_, e)| pred(e))
    }
}
