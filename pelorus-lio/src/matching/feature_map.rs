//! Grid-bucket surfel matcher
//!
//! Alternative to the kd-tree path: surfels are bucketed into a coarse 3D
//! grid and every in-bucket pair that passes the coplanarity gates is
//! emitted. Output contract is identical to [`super::KnnSurfelMatcher`].

use std::collections::HashMap;

use nalgebra::Vector3;

use crate::config::OdometryConfig;
use crate::state::{Surfel, SurfelCorrespondence};

use super::try_pair;

/// Grid-bucket correspondence builder
pub struct FeatureMap;

impl FeatureMap {
    /// Pair all surfels sharing a grid cell of edge `r_match`
    pub fn matches(surfels: &[Surfel], config: &OdometryConfig) -> Vec<SurfelCorrespondence> {
        let cell = config.r_match;
        let mut buckets: HashMap<(i64, i64, i64), Vec<usize>> = HashMap::new();
        for (i, surfel) in surfels.iter().enumerate() {
            buckets
                .entry(Self::cell_key(&surfel.center_world, cell))
                .or_default()
                .push(i);
        }

        let mut correspondences = Vec::new();
        for indices in buckets.values() {
            for (a, &i) in indices.iter().enumerate() {
                for &j in &indices[a + 1..] {
                    if surfels[i].planarity < config.planarity_threshold
                        || surfels[j].planarity < config.planarity_threshold
                    {
                        continue;
                    }
                    if let Some(corr) = try_pair(surfels, i, j, config) {
                        correspondences.push(corr);
                    }
                }
            }
        }

        correspondences
    }

    fn cell_key(p: &Vector3<f64>, cell: f64) -> (i64, i64, i64) {
        (
            (p.x / cell).floor() as i64,
            (p.y / cell).floor() as i64,
            (p.z / cell).floor() as i64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::test_utils::surfel;

    fn test_config() -> OdometryConfig {
        OdometryConfig {
            r_match: 1.0,
            normal_agreement_cos: 0.9,
            point_plane_dist_max: 0.3,
            planarity_threshold: 0.9,
            ..OdometryConfig::default()
        }
    }

    #[test]
    fn test_in_bucket_pair_emitted_in_time_order() {
        let up = Vector3::new(0.0, 0.0, 1.0);
        let surfels = vec![
            surfel(0.2, Vector3::new(0.1, 0.1, 0.1), up),
            surfel(0.1, Vector3::new(0.4, 0.1, 0.1), up),
        ];

        let corrs = FeatureMap::matches(&surfels, &test_config());

        assert_eq!(corrs.len(), 1);
        assert_eq!(corrs[0].s1, 1);
        assert_eq!(corrs[0].s2, 0);
    }

    #[test]
    fn test_different_buckets_not_paired() {
        let up = Vector3::new(0.0, 0.0, 1.0);
        let surfels = vec![
            surfel(0.1, Vector3::new(0.1, 0.1, 0.1), up),
            surfel(0.2, Vector3::new(1.5, 0.1, 0.1), up),
        ];

        assert!(FeatureMap::matches(&surfels, &test_config()).is_empty());
    }

    #[test]
    fn test_low_planarity_rejected() {
        let up = Vector3::new(0.0, 0.0, 1.0);
        let mut a = surfel(0.1, Vector3::new(0.1, 0.1, 0.1), up);
        a.planarity = 0.5;
        let b = surfel(0.2, Vector3::new(0.4, 0.1, 0.1), up);

        assert!(FeatureMap::matches(&[a, b], &test_config()).is_empty());
    }

    #[test]
    fn test_equal_timestamps_discarded() {
        let up = Vector3::new(0.0, 0.0, 1.0);
        let surfels = vec![
            surfel(0.1, Vector3::new(0.1, 0.1, 0.1), up),
            surfel(0.1, Vector3::new(0.4, 0.1, 0.1), up),
        ];

        assert!(FeatureMap::matches(&surfels, &test_config()).is_empty());
    }
}
