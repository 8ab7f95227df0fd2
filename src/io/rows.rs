//! Stable CSV row formatting for state types.
//!
//! Every floating-point field is emitted with 17 significant digits so a
//! parsed row reproduces the state bit-exact.

use anyhow::{bail, Context, Result};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::filter::state::CoreState;
use crate::sensors::{
    AttitudeSensorState, PoseSensorState, PositionSensorState, PressureSensorState,
};
use crate::time::Time;

/// Types exportable as a stable CSV row.
pub trait CsvRow {
    /// Comma-separated field names, timestamp first.
    fn csv_header() -> &'static str;

    /// One row at the given timestamp.
    fn to_csv_row(&self, timestamp: Time) -> String;
}

fn fmt(value: f64) -> String {
    // 17 significant digits round-trip every f64.
    format!("{:.16e}", value)
}

impl CsvRow for CoreState {
    fn csv_header() -> &'static str {
        "t, p_wi_x, p_wi_y, p_wi_z, v_wi_x, v_wi_y, v_wi_z, \
         q_wi_w, q_wi_x, q_wi_y, q_wi_z, b_w_x, b_w_y, b_w_z, b_a_x, b_a_y, b_a_z"
    }

    fn to_csv_row(&self, timestamp: Time) -> String {
        let q = self.q_wi.quaternion();
        let fields = [
            timestamp.seconds(),
            self.p_wi.x,
            self.p_wi.y,
            self.p_wi.z,
            self.v_wi.x,
            self.v_wi.y,
            self.v_wi.z,
            q.w,
            q.i,
            q.j,
            q.k,
            self.b_w.x,
            self.b_w.y,
            self.b_w.z,
            self.b_a.x,
            self.b_a.y,
            self.b_a.z,
        ];
        fields.map(fmt).join(", ")
    }
}

impl CsvRow for PoseSensorState {
    fn csv_header() -> &'static str {
        "t, p_ip_x, p_ip_y, p_ip_z, q_ip_w, q_ip_x, q_ip_y, q_ip_z"
    }

    fn to_csv_row(&self, timestamp: Time) -> String {
        let q = self.q_ip.quaternion();
        let fields = [
            timestamp.seconds(),
            self.p_ip.x,
            self.p_ip.y,
            self.p_ip.z,
            q.w,
            q.i,
            q.j,
            q.k,
        ];
        fields.map(fmt).join(", ")
    }
}

impl CsvRow for PositionSensorState {
    fn csv_header() -> &'static str {
        "t, p_ip_x, p_ip_y, p_ip_z"
    }

    fn to_csv_row(&self, timestamp: Time) -> String {
        let fields = [timestamp.seconds(), self.p_ip.x, self.p_ip.y, self.p_ip.z];
        fields.map(fmt).join(", ")
    }
}

impl CsvRow for AttitudeSensorState {
    fn csv_header() -> &'static str {
        "t, q_ip_w, q_ip_x, q_ip_y, q_ip_z"
    }

    fn to_csv_row(&self, timestamp: Time) -> String {
        let q = self.q_ip.quaternion();
        let fields = [timestamp.seconds(), q.w, q.i, q.j, q.k];
        fields.map(fmt).join(", ")
    }
}

impl CsvRow for PressureSensorState {
    fn csv_header() -> &'static str {
        "t, p_ip_x, p_ip_y, p_ip_z"
    }

    fn to_csv_row(&self, timestamp: Time) -> String {
        let fields = [timestamp.seconds(), self.p_ip.x, self.p_ip.y, self.p_ip.z];
        fields.map(fmt).join(", ")
    }
}

fn parse_fields(row: &str, expected: usize) -> Result<Vec<f64>> {
    let values: Vec<f64> = row
        .split(',')
        .map(|field| {
            field
                .trim()
                .parse::<f64>()
                .with_context(|| format!("bad field {:?}", field))
        })
        .collect::<Result<_>>()?;
    if values.len() != expected {
        bail!("expected {} fields, got {}", expected, values.len());
    }
    Ok(values)
}

/// Parse a core-state row produced by [`CsvRow::to_csv_row`].
pub fn parse_core_row(row: &str) -> Result<(Time, CoreState)> {
    let v = parse_fields(row, 17)?;
    let state = CoreState {
        p_wi: Vector3::new(v[1], v[2], v[3]),
        v_wi: Vector3::new(v[4], v[5], v[6]),
        // The row was written from a unit quaternion; renormalizing here
        // would perturb the last bit and break the round-trip law.
        q_wi: UnitQuaternion::new_unchecked(Quaternion::new(v[7], v[8], v[9], v[10])),
        b_w: Vector3::new(v[11], v[12], v[13]),
        b_a: Vector3::new(v[14], v[15], v[16]),
    };
    Ok((Time::new(v[0]), state))
}

/// Parse a pose-sensor row produced by [`CsvRow::to_csv_row`].
pub fn parse_pose_row(row: &str) -> Result<(Time, PoseSensorState)> {
    let v = parse_fields(row, 8)?;
    let state = PoseSensorState {
        p_ip: Vector3::new(v[1], v[2], v[3]),
        q_ip: UnitQuaternion::new_unchecked(Quaternion::new(v[4], v[5], v[6], v[7])),
    };
    Ok((Time::new(v[0]), state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::exp_so3;

    #[test]
    fn test_core_row_round_trip_is_bit_exact() {
        let mut state = CoreState::new(
            Vector3::new(-20946.817372738657, -3518.039994126535, 8631.1520460773336),
            exp_so3(&Vector3::new(0.1, -0.2, 0.3)),
        );
        state.v_wi = Vector3::new(15.924719563070044, -20.483884216740151, 11.455154466026718);
        state.b_w = Vector3::new(1e-5, -2e-5, 3e-5);
        state.b_a = Vector3::new(0.01, -0.02, 0.03);
        let t = Time::new(123.456789012345);

        let row = state.to_csv_row(t);
        let (t2, parsed) = parse_core_row(&row).unwrap();

        assert_eq!(t, t2);
        assert_eq!(state.p_wi, parsed.p_wi);
        assert_eq!(state.v_wi, parsed.v_wi);
        assert_eq!(state.q_wi.coords, parsed.q_wi.coords);
        assert_eq!(state.b_w, parsed.b_w);
        assert_eq!(state.b_a, parsed.b_a);
    }

    #[test]
    fn test_pose_row_round_trip() {
        let state = PoseSensorState {
            p_ip: Vector3::new(0.1, 0.2, -0.3),
            q_ip: exp_so3(&Vector3::new(-0.4, 0.5, 0.6)),
        };
        let t = Time::new(1.0);

        let (t2, parsed) = parse_pose_row(&state.to_csv_row(t)).unwrap();
        assert_eq!(t, t2);
        assert_eq!(state.p_ip, parsed.p_ip);
        assert_eq!(state.q_ip.coords, parsed.q_ip.coords);
    }

    #[test]
    fn test_headers_match_field_counts() {
        assert_eq!(CoreState::csv_header().split(',').count(), 17);
        assert_eq!(PoseSensorState::csv_header().split(',').count(), 8);
        assert_eq!(PressureSensorState::csv_header().split(',').count(), 4);
        assert_eq!(AttitudeSensorState::csv_header().split(',').count(), 5);
    }

    #[test]
    fn test_pressure_header_contract() {
        assert_eq!(
            PressureSensorState::csv_header(),
            "t, p_ip_x, p_ip_y, p_ip_z"
        );
    }
}
