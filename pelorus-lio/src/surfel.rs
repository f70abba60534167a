//! Surfel extraction from undistorted sweeps
//!
//! The sweep is hashed into voxels; every sufficiently populated voxel gets a
//! centroid + covariance eigenfit, and voxels whose point mass is flat enough
//! become surfels. Fitting happens in the world frame of the undistorted
//! sweep; the local attributes are obtained by pulling the fit back through
//! the interpolated body pose at the surfel's timestamp.

use std::collections::{HashMap, VecDeque};

use nalgebra::{Matrix3, Vector3};

use crate::config::OdometryConfig;
use crate::error::{OdometryError, Result};
use crate::math::interpolate_pose;
use crate::state::{ImuState, Surfel};
use crate::types::LidarPoint;

/// Append-only surfel collection fed once, at the first extraction
///
/// Read by external visualization; never trimmed.
#[derive(Debug, Default)]
pub struct GlobalMap {
    surfels: Vec<Surfel>,
}

impl GlobalMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn surfels(&self) -> &[Surfel] {
        &self.surfels
    }

    pub fn len(&self) -> usize {
        self.surfels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfels.is_empty()
    }
}

fn voxel_key(p: &Vector3<f64>, voxel_size: f64) -> (i64, i64, i64) {
    (
        (p.x / voxel_size).floor() as i64,
        (p.y / voxel_size).floor() as i64,
        (p.z / voxel_size).floor() as i64,
    )
}

/// Extract surfels from an undistorted sweep
///
/// Voxels with at least `min_points_per_voxel` points are eigenfit; a voxel
/// becomes a surfel when its planarity score (1 − 3·λ₀/Σλ) reaches
/// `planarity_threshold`. The surfel timestamp is the mean point timestamp of
/// the voxel and its reference pose is the body pose interpolated there.
///
/// When `global_map` is given (first extraction only), accepted surfels are
/// also committed to it.
pub fn extract_surfels(
    sweep: &[LidarPoint],
    imu_states: &VecDeque<ImuState>,
    config: &OdometryConfig,
    mut global_map: Option<&mut GlobalMap>,
) -> Result<Vec<Surfel>> {
    let mut voxels: HashMap<(i64, i64, i64), Vec<usize>> = HashMap::new();
    for (i, pt) in sweep.iter().enumerate() {
        voxels
            .entry(voxel_key(&pt.xyz, config.voxel_size))
            .or_default()
            .push(i);
    }

    let mut surfels = Vec::new();
    for indices in voxels.values() {
        if indices.len() < config.min_points_per_voxel {
            continue;
        }

        let n = indices.len() as f64;
        let mut centroid = Vector3::zeros();
        let mut mean_t = 0.0;
        for &i in indices {
            centroid += sweep[i].xyz;
            mean_t += sweep[i].t;
        }
        centroid /= n;
        mean_t /= n;

        let mut covariance = Matrix3::zeros();
        for &i in indices {
            let d = sweep[i].xyz - centroid;
            covariance += d * d.transpose();
        }
        covariance /= n;

        let eigen = covariance.symmetric_eigen();
        let (min_idx, min_eigenvalue) = eigen.eigenvalues.argmin();
        let eigen_sum = eigen.eigenvalues.sum();
        if eigen_sum <= 0.0 {
            continue;
        }

        let planarity = 1.0 - 3.0 * min_eigenvalue / eigen_sum;
        if planarity < config.planarity_threshold {
            continue;
        }

        let normal_world: Vector3<f64> = eigen.eigenvectors.column(min_idx).into_owned();

        // Reference body pose at the surfel timestamp
        let idx = imu_states.partition_point(|s| s.t <= mean_t);
        if idx == 0 || idx >= imu_states.len() {
            return Err(OdometryError::BracketMissing { t: mean_t });
        }
        let left = &imu_states[idx - 1];
        let right = &imu_states[idx];
        let factor = (mean_t - left.t) / (right.t - left.t);
        let ref_pose = interpolate_pose(&left.pos, &left.rot, &right.pos, &right.rot, factor);

        let inverse = ref_pose.inverse();
        surfels.push(Surfel {
            t: mean_t,
            center_local: inverse.transform(&centroid),
            normal_local: inverse.rot * normal_world,
            center_world: centroid,
            normal_world,
            ref_pose,
            point_count: indices.len(),
            planarity,
        });
    }

    // Voxel hash order is arbitrary; keep the window queue time-ordered
    surfels.sort_by(|a, b| a.t.total_cmp(&b.t));

    if let Some(map) = global_map.as_deref_mut() {
        map.surfels.extend(surfels.iter().cloned());
    }

    Ok(surfels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::UnitQuaternion;

    fn identity_imu_states(t0: f64, t1: f64) -> VecDeque<ImuState> {
        vec![
            ImuState {
                t: t0,
                gyr: Vector3::zeros(),
                acc: Vector3::zeros(),
                pos: Vector3::zeros(),
                rot: UnitQuaternion::identity(),
            },
            ImuState {
                t: t1,
                gyr: Vector3::zeros(),
                acc: Vector3::zeros(),
                pos: Vector3::zeros(),
                rot: UnitQuaternion::identity(),
            },
        ]
        .into()
    }

    fn plane_patch(z: f64, n: usize, t: f64) -> Vec<LidarPoint> {
        // n×n grid on z = const inside one 0.5 m voxel
        let mut points = Vec::new();
        for i in 0..n {
            for j in 0..n {
                let x = 0.05 + 0.4 * i as f64 / n as f64;
                let y = 0.05 + 0.4 * j as f64 / n as f64;
                points.push(LidarPoint::new(Vector3::new(x, y, z), t));
            }
        }
        points
    }

    fn test_config() -> OdometryConfig {
        OdometryConfig {
            voxel_size: 0.5,
            min_points_per_voxel: 10,
            planarity_threshold: 0.9,
            ..OdometryConfig::default()
        }
    }

    #[test]
    fn test_extracts_horizontal_plane() {
        let sweep = plane_patch(0.25, 5, 0.05);
        let imu_states = identity_imu_states(0.0, 0.1);

        let surfels = extract_surfels(&sweep, &imu_states, &test_config(), None).unwrap();

        assert_eq!(surfels.len(), 1);
        let s = &surfels[0];
        assert_abs_diff_eq!(s.normal_world.z.abs(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s.center_world.z, 0.25, epsilon = 1e-9);
        assert_eq!(s.point_count, 25);
        assert!(s.planarity > 0.99);
        assert_abs_diff_eq!(s.t, 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_local_attributes_use_reference_pose() {
        // Identity trajectory: local frame coincides with world
        let sweep = plane_patch(0.25, 5, 0.05);
        let imu_states = identity_imu_states(0.0, 0.1);

        let surfels = extract_surfels(&sweep, &imu_states, &test_config(), None).unwrap();
        let s = &surfels[0];

        assert_abs_diff_eq!(s.center_local.x, s.center_world.x, epsilon = 1e-12);
        assert_abs_diff_eq!(s.center_local.z, s.center_world.z, epsilon = 1e-12);
        assert_abs_diff_eq!(s.normal_local.z, s.normal_world.z, epsilon = 1e-12);
    }

    #[test]
    fn test_sparse_voxel_rejected() {
        let sweep = plane_patch(0.25, 3, 0.05); // 9 points < min 10
        let imu_states = identity_imu_states(0.0, 0.1);

        let surfels = extract_surfels(&sweep, &imu_states, &test_config(), None).unwrap();
        assert!(surfels.is_empty());
    }

    #[test]
    fn test_isotropic_voxel_rejected() {
        // A 3D grid filling the voxel is nowhere near planar
        let mut sweep = Vec::new();
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..4 {
                    sweep.push(LidarPoint::new(
                        Vector3::new(
                            0.05 + 0.1 * i as f64,
                            0.05 + 0.1 * j as f64,
                            0.05 + 0.1 * k as f64,
                        ),
                        0.05,
                    ));
                }
            }
        }
        let imu_states = identity_imu_states(0.0, 0.1);

        let surfels = extract_surfels(&sweep, &imu_states, &test_config(), None).unwrap();
        assert!(surfels.is_empty());
    }

    #[test]
    fn test_global_map_committed_only_when_given() {
        let sweep = plane_patch(0.25, 5, 0.05);
        let imu_states = identity_imu_states(0.0, 0.1);
        let config = test_config();

        let mut map = GlobalMap::new();
        let first = extract_surfels(&sweep, &imu_states, &config, Some(&mut map)).unwrap();
        assert_eq!(map.len(), first.len());

        let _second = extract_surfels(&sweep, &imu_states, &config, None).unwrap();
        assert_eq!(map.len(), first.len());
    }

    #[test]
    fn test_surfels_sorted_by_timestamp() {
        let mut sweep = plane_patch(0.25, 5, 0.07);
        // Second patch in a different voxel with an earlier timestamp
        for pt in plane_patch(0.25, 5, 0.03) {
            sweep.push(LidarPoint::new(pt.xyz + Vector3::new(2.0, 0.0, 0.0), pt.t));
        }
        let imu_states = identity_imu_states(0.0, 0.1);

        let surfels = extract_surfels(&sweep, &imu_states, &test_config(), None).unwrap();
        assert_eq!(surfels.len(), 2);
        assert!(surfels[0].t <= surfels[1].t);
    }
}
