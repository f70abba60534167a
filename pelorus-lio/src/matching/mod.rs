//! Surfel-to-surfel correspondence search
//!
//! Two interchangeable matchers with the same output contract: the kd-tree
//! [`KnnSurfelMatcher`] and the grid-bucket [`FeatureMap`] fallback. Both
//! emit ordered pairs with `s1.t < s2.t`, no reversed duplicates, and a
//! precomputed coplanarity weight.

mod feature_map;
mod knn;

pub use feature_map::FeatureMap;
pub use knn::KnnSurfelMatcher;

use crate::config::OdometryConfig;
use crate::state::{Surfel, SurfelCorrespondence};

/// Gate a candidate pair (query `i`, neighbour `j`) and build the
/// correspondence if it passes
///
/// Accepts when the normals agree (|n_i · n_j| ≥ normal_agreement_cos) and
/// the point-to-plane distance |n_j · (c_i − c_j)| is within bounds; pairs
/// with equal timestamps are discarded. The emitted pair is ordered by
/// timestamp.
fn try_pair(
    surfels: &[Surfel],
    i: usize,
    j: usize,
    config: &OdometryConfig,
) -> Option<SurfelCorrespondence> {
    let si = &surfels[i];
    let sj = &surfels[j];

    if si.t == sj.t {
        return None;
    }

    let normal_agreement = si.normal_world.dot(&sj.normal_world).abs();
    if normal_agreement < config.normal_agreement_cos {
        return None;
    }

    let point_plane_dist = sj.normal_world.dot(&(si.center_world - sj.center_world)).abs();
    if point_plane_dist > config.point_plane_dist_max {
        return None;
    }

    let weight = si.planarity * sj.planarity * normal_agreement;
    let (s1, s2) = if si.t < sj.t { (i, j) } else { (j, i) };
    Some(SurfelCorrespondence { s1, s2, weight })
}

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::math::Rigid3;
    use crate::state::Surfel;
    use nalgebra::Vector3;

    /// A surfel at `center` with the given unit normal and timestamp
    pub fn surfel(t: f64, center: Vector3<f64>, normal: Vector3<f64>) -> Surfel {
        Surfel {
            t,
            center_local: center,
            normal_local: normal,
            center_world: center,
            normal_world: normal,
            ref_pose: Rigid3::identity(),
            point_count: 20,
            planarity: 0.99,
        }
    }
}
