//! Publish surface
//!
//! The engine pushes its outputs through an injected sink; transports
//! (ROS-style topics, TF, files) live outside the core.

use crate::math::Rigid3;
use crate::state::Surfel;
use crate::types::LidarPoint;

/// Consumer of the engine's per-sweep outputs
pub trait OdometrySink {
    /// Window surfels after a processed sweep
    fn publish_surfels(&mut self, surfels: &[Surfel]);

    /// Raw buffered points in the IMU frame, stamped at the first point
    fn publish_scan_in_imu_frame(&mut self, stamp: f64, points: &[LidarPoint]);

    /// Latest body-to-world transform, stamped at its sample state
    fn publish_pose(&mut self, stamp: f64, pose: &Rigid3);
}

/// Sink that drops everything
#[derive(Debug, Default)]
pub struct NullSink;

impl OdometrySink for NullSink {
    fn publish_surfels(&mut self, _surfels: &[Surfel]) {}
    fn publish_scan_in_imu_frame(&mut self, _stamp: f64, _points: &[LidarPoint]) {}
    fn publish_pose(&mut self, _stamp: f64, _pose: &Rigid3) {}
}
