//! CSV readers for simulated measurement streams.
//!
//! File layout follows the simulation export convention: headerless
//! rows, `#` comment lines tolerated.

use std::path::Path;

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::sensors::{ImuSample, PoseMeasurement};
use crate::time::Time;

/// One IMU row: `t, a_x, a_y, a_z, w_x, w_y, w_z`.
#[derive(Debug, Clone)]
pub struct ImuRecord {
    pub timestamp: Time,
    pub sample: ImuSample,
}

/// One pose row: `t, p_x, p_y, p_z, q_w, q_x, q_y, q_z`.
#[derive(Debug, Clone)]
pub struct PoseRecord {
    pub timestamp: Time,
    pub measurement: PoseMeasurement,
}

/// Load a simulated IMU trajectory file.
pub fn read_imu_csv<P: AsRef<Path>>(path: P) -> Result<Vec<ImuRecord>> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut records = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        if rec.len() < 7 {
            continue;
        }
        let t: f64 = rec[0].parse()?;
        let accel = Vector3::new(rec[1].parse()?, rec[2].parse()?, rec[3].parse()?);
        let gyro = Vector3::new(rec[4].parse()?, rec[5].parse()?, rec[6].parse()?);
        records.push(ImuRecord {
            timestamp: Time::new(t),
            sample: ImuSample::new(accel, gyro),
        });
    }
    Ok(records)
}

/// Load a pose measurement file.
pub fn read_pose_csv<P: AsRef<Path>>(path: P) -> Result<Vec<PoseRecord>> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut records = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        if rec.len() < 8 {
            continue;
        }
        let t: f64 = rec[0].parse()?;
        let position = Vector3::new(rec[1].parse()?, rec[2].parse()?, rec[3].parse()?);
        let qw: f64 = rec[4].parse()?;
        let qx: f64 = rec[5].parse()?;
        let qy: f64 = rec[6].parse()?;
        let qz: f64 = rec[7].parse()?;
        let orientation = UnitQuaternion::from_quaternion(Quaternion::new(qw, qx, qy, qz));
        records.push(PoseRecord {
            timestamp: Time::new(t),
            measurement: PoseMeasurement {
                position,
                orientation,
            },
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;

    #[test]
    fn test_read_imu_csv_skips_comments_and_short_rows() {
        let mut file = tempfile_path("imu");
        writeln!(file.1, "# t, a_x, a_y, a_z, w_x, w_y, w_z").unwrap();
        writeln!(file.1, "0.0, 0.0, 0.0, 9.81, 0.0, 0.0, 0.1").unwrap();
        writeln!(file.1, "bad, row").unwrap();
        writeln!(file.1, "0.01, 0.1, 0.2, 9.81, 0.0, 0.0, 0.1").unwrap();
        drop(file.1);

        let records = read_imu_csv(&file.0).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, Time::new(0.0));
        assert_relative_eq!(records[1].sample.accel.x, 0.1, epsilon = 1e-12);

        std::fs::remove_file(&file.0).ok();
    }

    #[test]
    fn test_read_pose_csv() {
        let mut file = tempfile_path("pose");
        writeln!(file.1, "0.5, 1.0, 2.0, 3.0, 1.0, 0.0, 0.0, 0.0").unwrap();
        drop(file.1);

        let records = read_pose_csv(&file.0).unwrap();
        assert_eq!(records.len(), 1);
        assert_relative_eq!(
            records[0].measurement.position,
            Vector3::new(1.0, 2.0, 3.0),
            epsilon = 1e-12
        );

        std::fs::remove_file(&file.0).ok();
    }

    fn tempfile_path(tag: &str) -> (std::path::PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(format!(
            "multisensor_eskf_reader_test_{}_{}.csv",
            tag,
            std::process::id()
        ));
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }
}
