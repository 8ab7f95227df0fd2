//! YAML filter configuration.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use nalgebra::Vector3;
use serde::Deserialize;

use crate::buffer::DEFAULT_MAX_LEN;
use crate::filter::CoreStateDef;
use crate::sensors::PoseSensor;

fn default_chi2_alpha() -> f64 {
    0.95
}

fn default_buffer_max_len() -> usize {
    DEFAULT_MAX_LEN
}

/// Filter parameter file.
///
/// ```yaml
/// traj_file_name: traj.csv
/// pose_file_name: pose.csv
/// imu_n_w: [0.013, 0.013, 0.013]
/// imu_n_bw: [0.0013, 0.0013, 0.0013]
/// imu_n_a: [0.083, 0.083, 0.083]
/// imu_n_ba: [0.0083, 0.0083, 0.0083]
/// chi2_alpha: 0.95
/// buffer_max_len: 400
/// pose_meas_std: [0.02, 0.02, 0.02, 0.0349, 0.0349, 0.0349]
/// pose_init_std: [0.1, 0.1, 0.1, 0.1745, 0.1745, 0.1745]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// IMU trajectory file, relative to the parameter file.
    pub traj_file_name: Option<String>,
    /// Pose measurement file, relative to the parameter file.
    pub pose_file_name: Option<String>,
    /// IMU continuous-time noise std-devs, per axis.
    pub imu_n_w: [f64; 3],
    pub imu_n_bw: [f64; 3],
    pub imu_n_a: [f64; 3],
    pub imu_n_ba: [f64; 3],
    /// Outlier gate confidence.
    #[serde(default = "default_chi2_alpha")]
    pub chi2_alpha: f64,
    /// Maximum buffer length.
    #[serde(default = "default_buffer_max_len")]
    pub buffer_max_len: usize,
    /// Pose measurement noise std-devs (position, attitude in rad).
    #[serde(default)]
    pub pose_meas_std: Option<[f64; 6]>,
    /// Pose initial calibration std-devs (position, attitude in rad).
    #[serde(default)]
    pub pose_init_std: Option<[f64; 6]>,
}

impl FilterConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Transfer the IMU noise densities and gate confidence onto a core
    /// state definition.
    pub fn apply_to_core(&self, def: &mut CoreStateDef) {
        def.set_noise_std(
            vec3(&self.imu_n_w),
            vec3(&self.imu_n_bw),
            vec3(&self.imu_n_a),
            vec3(&self.imu_n_ba),
        );
        def.chi2_alpha = self.chi2_alpha;
    }

    /// Transfer the pose noise and initial calibration uncertainty onto
    /// a pose sensor.
    pub fn apply_to_pose(&self, sensor: &mut PoseSensor) {
        if let Some(std) = self.pose_meas_std {
            sensor.set_noise_std(
                Vector3::new(std[0], std[1], std[2]),
                Vector3::new(std[3], std[4], std[5]),
            );
        }
        if let Some(std) = self.pose_init_std {
            sensor.set_initial_calib_std(
                Vector3::new(std[0], std[1], std[2]),
                Vector3::new(std[3], std[4], std[5]),
            );
        }
    }
}

fn vec3(values: &[f64; 3]) -> Vector3<f64> {
    Vector3::new(values[0], values[1], values[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = "\
imu_n_w: [0.013, 0.013, 0.013]
imu_n_bw: [0.0013, 0.0013, 0.0013]
imu_n_a: [0.083, 0.083, 0.083]
imu_n_ba: [0.0083, 0.0083, 0.0083]
";
        let config: FilterConfig = serde_yaml::from_str(yaml).unwrap();
        assert_relative_eq!(config.chi2_alpha, 0.95, epsilon = 1e-12);
        assert_eq!(config.buffer_max_len, DEFAULT_MAX_LEN);
        assert!(config.traj_file_name.is_none());

        let mut def = CoreStateDef::new();
        config.apply_to_core(&mut def);
        assert_relative_eq!(def.noise.n_w.x, 0.013, epsilon = 1e-12);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = "\
traj_file_name: traj.csv
pose_file_name: pose.csv
imu_n_w: [0.013, 0.013, 0.013]
imu_n_bw: [0.0013, 0.0013, 0.0013]
imu_n_a: [0.083, 0.083, 0.083]
imu_n_ba: [0.0083, 0.0083, 0.0083]
chi2_alpha: 0.99
buffer_max_len: 100
pose_meas_std: [0.02, 0.02, 0.02, 0.0349, 0.0349, 0.0349]
";
        let config: FilterConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.traj_file_name.as_deref(), Some("traj.csv"));
        assert_relative_eq!(config.chi2_alpha, 0.99, epsilon = 1e-12);
        assert_eq!(config.buffer_max_len, 100);

        let mut sensor = PoseSensor::new("pose");
        config.apply_to_pose(&mut sensor);
        let r = sensor.noise_covariance();
        assert_relative_eq!(r[(0, 0)], 0.02 * 0.02, epsilon = 1e-12);
    }
}
