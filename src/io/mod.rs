//! CSV row formatting, measurement readers, and YAML configuration.

pub mod config;
pub mod readers;
pub mod rows;

pub use config::FilterConfig;
pub use readers::{read_imu_csv, read_pose_csv, ImuRecord, PoseRecord};
pub use rows::{parse_core_row, parse_pose_row, CsvRow};
