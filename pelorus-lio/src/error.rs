//! Error types
//!
//! Contract violations signal upstream bugs and abort the current operation.
//! Transient insufficiency (buffers still disjoint, sweep incomplete) is not
//! an error; those paths return `Ok` without advancing state.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OdometryError {
    /// IMU stream went backwards in time
    #[error("imu timestamp {next:.6} is earlier than its predecessor {prev:.6}")]
    NonMonotonicImu { prev: f64, next: f64 },

    /// LiDAR point stream went backwards in time
    #[error("lidar point timestamp {next:.6} is earlier than its predecessor {prev:.6}")]
    NonMonotonicPoint { prev: f64, next: f64 },

    /// A timestamp that must lie strictly between two IMU states does not
    #[error("no imu state bracket around timestamp {t:.6}")]
    BracketMissing { t: f64 },

    /// Fewer than two IMU measurements were available to seed the window
    #[error("need at least two imu measurements to seed the window, have {have}")]
    ImuUnderflow { have: usize },

    /// A sliding-window invariant no longer holds
    #[error("sliding-window invariant broken: {0}")]
    WindowInvariant(String),
}

pub type Result<T, E = OdometryError> = std::result::Result<T, E>;
