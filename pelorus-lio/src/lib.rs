//! pelorus-lio: tightly-coupled LiDAR-inertial odometry
//!
//! Consumes a stream of per-point-stamped LiDAR returns and IMU measurements
//! and maintains a sliding-window joint estimate of the body trajectory, IMU
//! biases, and gravity. Within the window a sample-state spline parameterizes
//! the trajectory; surfel-to-surfel correspondences from motion-compensated
//! sweeps and IMU triple factors are minimized together by the sparse solver
//! in `pelorus-solver`.

pub mod config;
pub mod error;
pub mod factors;
pub mod imu;
pub mod matching;
pub mod math;
pub mod odometry;
pub mod optimization;
pub mod publish;
pub mod simulation;
pub mod spline;
pub mod state;
pub mod surfel;
pub mod sweep;
pub mod types;
pub mod window;

// Re-export key types
pub use config::{BlindBox, OdometryConfig};
pub use error::{OdometryError, Result};
pub use math::Rigid3;
pub use odometry::LidarOdometry;
pub use publish::{NullSink, OdometrySink};
pub use state::{ImuState, SampleState, Surfel, SurfelCorrespondence};
pub use surfel::GlobalMap;
pub use types::{ImuMeasurement, LidarPoint};
