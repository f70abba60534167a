//! kd-tree surfel matcher
//!
//! Builds a spatial index over the world-frame surfel centers and pairs every
//! surfel with its nearest neighbours inside the match radius.

use std::collections::HashSet;

use kiddo::{KdTree, SquaredEuclidean};

use crate::config::OdometryConfig;
use crate::state::{Surfel, SurfelCorrespondence};

use super::try_pair;

/// Nearest-neighbour matcher over the window surfels
///
/// The index is rebuilt every outer iteration; surfel world poses move
/// between iterations.
pub struct KnnSurfelMatcher {
    tree: KdTree<f64, 3>,
}

impl KnnSurfelMatcher {
    pub fn new() -> Self {
        Self {
            tree: KdTree::new(),
        }
    }

    /// Index the world-frame centers of all window surfels
    pub fn build_index(&mut self, surfels: &[Surfel]) {
        self.tree = KdTree::with_capacity(surfels.len());
        for (i, surfel) in surfels.iter().enumerate() {
            let c = &surfel.center_world;
            self.tree.add(&[c.x, c.y, c.z], i as u64);
        }
    }

    /// Emit correspondences for every surfel against its `knn_k` nearest
    /// neighbours within `r_match`
    pub fn matches(
        &self,
        surfels: &[Surfel],
        config: &OdometryConfig,
    ) -> Vec<SurfelCorrespondence> {
        let max_dist_sq = config.r_match * config.r_match;
        let mut emitted: HashSet<(usize, usize)> = HashSet::new();
        let mut correspondences = Vec::new();

        for (i, surfel) in surfels.iter().enumerate() {
            let c = &surfel.center_world;
            // One extra neighbour to account for the query surfel itself
            let neighbours = self
                .tree
                .nearest_n::<SquaredEuclidean>(&[c.x, c.y, c.z], config.knn_k + 1);

            for neighbour in neighbours {
                let j = neighbour.item as usize;
                if j == i || neighbour.distance > max_dist_sq {
                    continue;
                }

                let key = (i.min(j), i.max(j));
                if !emitted.insert(key) {
                    continue;
                }

                if let Some(corr) = try_pair(surfels, i, j, config) {
                    correspondences.push(corr);
                }
            }
        }

        correspondences
    }
}
