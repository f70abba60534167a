//! Engine configuration
//!
//! All parameters are provided statically at construction; nothing is
//! mutated at runtime.

use nalgebra::Vector3;

use crate::math::Rigid3;

/// Axis-aligned box used to blank out returns from the carrier platform
#[derive(Debug, Clone, Copy)]
pub struct BlindBox {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl BlindBox {
    /// True when the point lies strictly inside the box
    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        p.x > self.min.x
            && p.x < self.max.x
            && p.y > self.min.y
            && p.y < self.max.y
            && p.z > self.min.z
            && p.z < self.max.z
    }

    /// A degenerate box that contains nothing
    pub fn empty() -> Self {
        Self {
            min: Vector3::zeros(),
            max: Vector3::zeros(),
        }
    }
}

/// Configuration for the LiDAR-inertial odometry engine
#[derive(Debug, Clone)]
pub struct OdometryConfig {
    /// IMU sampling rate (Hz); the integration step is 1/imu_rate
    pub imu_rate: f64,
    /// Spacing of the trajectory spline knots (s)
    pub sample_dt: f64,
    /// Length of one LiDAR sweep (s)
    pub sweep_duration: f64,
    /// Time span the joint estimator operates on (s)
    pub sliding_window_duration: f64,

    /// Returns closer than this are dropped (m)
    pub min_range: f64,
    /// Returns farther than this are dropped (m)
    pub max_range: f64,
    /// Returns strictly inside this box are dropped
    pub blind_bounding_box: BlindBox,
    /// Static LiDAR → IMU extrinsic
    pub ext_lidar2imu: Rigid3,

    /// Magnitude of local gravity (m/s²)
    pub gravity_norm: f64,

    /// Cost weight for the gyroscope rate residual
    pub gyroscope_noise_density_cost_weight: f64,
    /// Cost weight for the accelerometer residual
    pub accelerometer_noise_density_cost_weight: f64,
    /// Cost weight for the gyroscope bias random walk residual
    pub gyroscope_random_walk_cost_weight: f64,
    /// Cost weight for the accelerometer bias random walk residual
    pub accelerometer_random_walk_cost_weight: f64,

    /// Outer iterations (correspondence rebuild + solve) per sweep
    pub outer_iter_num_max: usize,
    /// Solver iterations per outer iteration
    pub inner_iter_num_max: usize,

    /// Minimum points for a voxel to be considered for a plane fit
    pub min_points_per_voxel: usize,
    /// Voxel edge length for surfel extraction (m)
    pub voxel_size: f64,
    /// Minimum planarity score (1 − 3·λ₀/Σλ) for a voxel to become a surfel
    pub planarity_threshold: f64,

    /// Neighbours requested per surfel in the kd-tree query
    pub knn_k: usize,
    /// Search radius for surfel matching (m)
    pub r_match: f64,
    /// Minimum |n_i · n_j| for two surfels to be paired
    pub normal_agreement_cos: f64,
    /// Maximum point-to-plane distance for a correspondence (m)
    pub point_plane_dist_max: f64,
    /// Use the grid-bucket matcher instead of the kd-tree
    pub use_feature_map: bool,
}

impl Default for OdometryConfig {
    fn default() -> Self {
        Self {
            imu_rate: 100.0,
            sample_dt: 0.1,
            sweep_duration: 0.1,
            sliding_window_duration: 1.0,
            min_range: 0.5,
            max_range: 100.0,
            blind_bounding_box: BlindBox::empty(),
            ext_lidar2imu: Rigid3::identity(),
            gravity_norm: 9.81,
            gyroscope_noise_density_cost_weight: 100.0,
            accelerometer_noise_density_cost_weight: 10.0,
            gyroscope_random_walk_cost_weight: 100.0,
            accelerometer_random_walk_cost_weight: 10.0,
            outer_iter_num_max: 2,
            inner_iter_num_max: 10,
            min_points_per_voxel: 10,
            voxel_size: 0.5,
            planarity_threshold: 0.9,
            knn_k: 5,
            r_match: 1.0,
            normal_agreement_cos: 0.9,
            point_plane_dist_max: 0.3,
            use_feature_map: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blind_box_contains_is_strict() {
        let bb = BlindBox {
            min: Vector3::new(-1.0, -1.0, -1.0),
            max: Vector3::new(1.0, 1.0, 1.0),
        };

        assert!(bb.contains(&Vector3::new(0.0, 0.0, 0.0)));
        // Boundary points are kept
        assert!(!bb.contains(&Vector3::new(1.0, 0.0, 0.0)));
        assert!(!bb.contains(&Vector3::new(0.0, -1.0, 0.0)));
        assert!(!bb.contains(&Vector3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn test_empty_blind_box_contains_nothing() {
        let bb = BlindBox::empty();
        assert!(!bb.contains(&Vector3::zeros()));
        assert!(!bb.contains(&Vector3::new(0.1, 0.0, 0.0)));
    }
}
