//! Sliding-window state types
//!
//! The window holds three time-ordered queues: IMU states (one per IMU
//! measurement), sample states (the spline knots, spaced `sample_dt` apart)
//! and surfels. Factors reference window elements by index; indices stay
//! valid for one outer iteration since trimming happens only after the
//! optimization loop.

use nalgebra::{UnitQuaternion, Vector3};

use crate::math::Rigid3;

/// Width of a sample state's packed correction block
pub const COR_DIM: usize = 12;

// Offsets inside the packed correction block
pub const ROT_COR: usize = 0;
pub const POS_COR: usize = 3;
pub const BG_COR: usize = 6;
pub const BA_COR: usize = 9;

/// Body state at one IMU measurement, integrated under the current
/// bias/gravity estimate
#[derive(Debug, Clone)]
pub struct ImuState {
    pub t: f64,
    pub gyr: Vector3<f64>,
    pub acc: Vector3<f64>,
    /// Body position in world at `t`
    pub pos: Vector3<f64>,
    /// Body orientation in world at `t`
    pub rot: UnitQuaternion<f64>,
}

impl ImuState {
    pub fn pose(&self) -> Rigid3 {
        Rigid3::new(self.pos, self.rot)
    }
}

/// A knot of the trajectory spline
///
/// The packed correction block `data_cor` holds the optimization variables
/// `(rot_cor, pos_cor, bg_cor, ba_cor)`; after each outer iteration the
/// corrections are folded into the state and zeroed.
#[derive(Debug, Clone)]
pub struct SampleState {
    pub t: f64,
    pub pos: Vector3<f64>,
    pub rot: UnitQuaternion<f64>,
    /// Gyroscope bias
    pub bg: Vector3<f64>,
    /// Accelerometer bias
    pub ba: Vector3<f64>,
    /// Gravity vector in world frame
    pub grav: Vector3<f64>,
    /// Packed corrections: [rot_cor, pos_cor, bg_cor, ba_cor]
    pub data_cor: [f64; COR_DIM],
}

impl SampleState {
    pub fn new(t: f64) -> Self {
        Self {
            t,
            pos: Vector3::zeros(),
            rot: UnitQuaternion::identity(),
            bg: Vector3::zeros(),
            ba: Vector3::zeros(),
            grav: Vector3::zeros(),
            data_cor: [0.0; COR_DIM],
        }
    }

    pub fn rot_cor(&self) -> Vector3<f64> {
        Vector3::new(
            self.data_cor[ROT_COR],
            self.data_cor[ROT_COR + 1],
            self.data_cor[ROT_COR + 2],
        )
    }

    pub fn pos_cor(&self) -> Vector3<f64> {
        Vector3::new(
            self.data_cor[POS_COR],
            self.data_cor[POS_COR + 1],
            self.data_cor[POS_COR + 2],
        )
    }

    pub fn bg_cor(&self) -> Vector3<f64> {
        Vector3::new(
            self.data_cor[BG_COR],
            self.data_cor[BG_COR + 1],
            self.data_cor[BG_COR + 2],
        )
    }

    pub fn ba_cor(&self) -> Vector3<f64> {
        Vector3::new(
            self.data_cor[BA_COR],
            self.data_cor[BA_COR + 1],
            self.data_cor[BA_COR + 2],
        )
    }

    pub fn zero_corrections(&mut self) {
        self.data_cor = [0.0; COR_DIM];
    }
}

/// A small planar patch extracted from one voxel of an undistorted sweep
///
/// `center_local`/`normal_local` are fixed in the body frame at time `t`;
/// the world-frame attributes are re-projected whenever the reference body
/// pose changes.
#[derive(Debug, Clone)]
pub struct Surfel {
    pub t: f64,
    pub center_local: Vector3<f64>,
    pub normal_local: Vector3<f64>,
    pub center_world: Vector3<f64>,
    pub normal_world: Vector3<f64>,
    /// Body pose in world at `t` used for the last local → world projection
    pub ref_pose: Rigid3,
    /// Number of sweep points supporting the plane fit
    pub point_count: usize,
    /// 1 − 3·λ₀/(λ₀+λ₁+λ₂); 1 for a perfect plane, 0 for an isotropic blob
    pub planarity: f64,
}

impl Surfel {
    /// Re-project the local attributes under a new reference body pose
    /// without re-fitting the plane
    pub fn update_pose(&mut self, pose: Rigid3) {
        self.center_world = pose.transform(&self.center_local);
        self.normal_world = pose.rot * self.normal_local;
        self.ref_pose = pose;
    }
}

/// An ordered pair of window surfel indices with `s1.t < s2.t`
///
/// Indices are valid for the outer iteration that produced them.
#[derive(Debug, Clone, Copy)]
pub struct SurfelCorrespondence {
    pub s1: usize,
    pub s2: usize,
    /// Coplanarity weight, precomputed at match time
    pub weight: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::so3_exp;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_correction_block_accessors() {
        let mut ss = SampleState::new(1.0);
        ss.data_cor = [
            0.1, 0.2, 0.3, // rot
            1.0, 2.0, 3.0, // pos
            0.01, 0.02, 0.03, // bg
            0.4, 0.5, 0.6, // ba
        ];

        assert_eq!(ss.rot_cor(), Vector3::new(0.1, 0.2, 0.3));
        assert_eq!(ss.pos_cor(), Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(ss.bg_cor(), Vector3::new(0.01, 0.02, 0.03));
        assert_eq!(ss.ba_cor(), Vector3::new(0.4, 0.5, 0.6));

        ss.zero_corrections();
        assert_eq!(ss.data_cor, [0.0; COR_DIM]);
    }

    #[test]
    fn test_surfel_update_pose_reprojects_from_local() {
        let mut surfel = Surfel {
            t: 0.0,
            center_local: Vector3::new(1.0, 0.0, 0.0),
            normal_local: Vector3::new(0.0, 0.0, 1.0),
            center_world: Vector3::zeros(),
            normal_world: Vector3::zeros(),
            ref_pose: Rigid3::identity(),
            point_count: 12,
            planarity: 0.99,
        };

        // Yaw by 90° and shift along z
        let pose = Rigid3::new(
            Vector3::new(0.0, 0.0, 5.0),
            so3_exp(&Vector3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2)),
        );
        surfel.update_pose(pose);

        assert_abs_diff_eq!(surfel.center_world.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(surfel.center_world.y, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(surfel.center_world.z, 5.0, epsilon = 1e-12);
        // Normal along z is invariant under yaw
        assert_abs_diff_eq!(surfel.normal_world.z, 1.0, epsilon = 1e-12);
    }
}
