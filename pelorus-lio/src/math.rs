//! Rigid-body math on the estimator side
//!
//! Uses nalgebra types since window states don't need autodiff support; the
//! residual functions in [`crate::factors`] use `pelorus_solver::math3d`
//! instead.

use nalgebra::{UnitQuaternion, Vector3};

/// Exponential map: rotation vector (axis × angle) to unit quaternion
pub fn so3_exp(rvec: &Vector3<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::from_scaled_axis(*rvec)
}

/// Logarithm map: unit quaternion to rotation vector
pub fn so3_log(rot: &UnitQuaternion<f64>) -> Vector3<f64> {
    rot.scaled_axis()
}

/// A rigid transform: rotation followed by translation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rigid3 {
    pub rot: UnitQuaternion<f64>,
    pub pos: Vector3<f64>,
}

impl Rigid3 {
    pub fn new(pos: Vector3<f64>, rot: UnitQuaternion<f64>) -> Self {
        Self { rot, pos }
    }

    pub fn identity() -> Self {
        Self {
            rot: UnitQuaternion::identity(),
            pos: Vector3::zeros(),
        }
    }

    /// Inverse transform: (R, p)⁻¹ = (R⁻¹, -R⁻¹·p)
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rot.inverse();
        Self {
            pos: -(rot_inv * self.pos),
            rot: rot_inv,
        }
    }

    /// Apply to a point: p' = R·p + t
    pub fn transform(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rot * point + self.pos
    }
}

/// Composition: (a * b).transform(p) == a.transform(b.transform(p))
impl std::ops::Mul for Rigid3 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self {
            pos: self.rot * rhs.pos + self.pos,
            rot: self.rot * rhs.rot,
        }
    }
}

impl Default for Rigid3 {
    fn default() -> Self {
        Self::identity()
    }
}

/// Interpolate a pose between two stamped poses
///
/// Position is interpolated linearly, rotation spherically. `factor` is the
/// normalized position of the query inside the bracket, in [0, 1].
pub fn interpolate_pose(
    left_pos: &Vector3<f64>,
    left_rot: &UnitQuaternion<f64>,
    right_pos: &Vector3<f64>,
    right_rot: &UnitQuaternion<f64>,
    factor: f64,
) -> Rigid3 {
    Rigid3 {
        pos: left_pos * (1.0 - factor) + right_pos * factor,
        rot: left_rot.slerp(right_rot, factor),
    }
}
