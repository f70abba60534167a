//! Raw sensor data types

use nalgebra::Vector3;

/// A single IMU measurement (gyroscope + accelerometer)
#[derive(Debug, Clone, Copy)]
pub struct ImuMeasurement {
    /// Timestamp in seconds
    pub t: f64,
    /// Angular velocity from gyroscope (rad/s) in body frame
    pub gyr: Vector3<f64>,
    /// Linear acceleration from accelerometer (m/s²) in body frame.
    /// Includes gravity: a stationary IMU measures +g upward.
    pub acc: Vector3<f64>,
}

impl ImuMeasurement {
    pub fn new(t: f64, gyr: Vector3<f64>, acc: Vector3<f64>) -> Self {
        Self { t, gyr, acc }
    }
}

/// A single LiDAR return with its per-point acquisition timestamp
#[derive(Debug, Clone, Copy)]
pub struct LidarPoint {
    pub xyz: Vector3<f64>,
    /// Timestamp in seconds; non-decreasing within a source scan
    pub t: f64,
}

impl LidarPoint {
    pub fn new(xyz: Vector3<f64>, t: f64) -> Self {
        Self { xyz, t }
    }
}
