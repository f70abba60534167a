//! 3D math primitives with automatic differentiation support
//!
//! Provides Vec3 and Quat types that work generically with any [`Real`] type,
//! so the same rotation/translation code runs on plain `f64` and on jets
//! inside residual functions.

use crate::Real;

// ============================================================================
// Vec3 - 3D Vector
// ============================================================================

/// 3D vector generic over any Real type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T: Copy> Vec3<T> {
    pub const fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }
}

impl<T: Real> Vec3<T> {
    /// Create a zero vector
    pub fn zero() -> Self {
        Self {
            x: T::zero(),
            y: T::zero(),
            z: T::zero(),
        }
    }

    /// Lift an f64 vector into constants (no derivatives)
    pub fn from_f64(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: T::from_literal(x),
            y: T::from_literal(y),
            z: T::from_literal(z),
        }
    }

    /// Dot product
    pub fn dot(self, other: Self) -> T {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Cross product
    pub fn cross(self, other: Self) -> Self {
        Self {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    /// Squared length
    pub fn norm_squared(self) -> T {
        self.dot(self)
    }

    /// Length (magnitude)
    pub fn norm(self) -> T {
        self.norm_squared().sqrt()
    }

    /// Multiply every component by a scalar
    pub fn scale(self, s: T) -> Self {
        Self {
            x: self.x * s,
            y: self.y * s,
            z: self.z * s,
        }
    }
}

impl<T: Real> std::ops::Add for Vec3<T> {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        }
    }
}

impl<T: Real> std::ops::Sub for Vec3<T> {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }
}

impl<T: Real> std::ops::Neg for Vec3<T> {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }
}

// ============================================================================
// Quat - Unit Quaternion (for 3D rotations)
// ============================================================================

/// Unit quaternion for 3D rotations, generic over any Real type
///
/// Uses scalar-first convention: q = w + xi + yj + zk.
/// For rotations, quaternions should be normalized (|q| = 1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat<T> {
    pub w: T,
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T: Copy> Quat<T> {
    pub const fn new(w: T, x: T, y: T, z: T) -> Self {
        Self { w, x, y, z }
    }
}

impl<T: Real> Quat<T> {
    /// Create identity quaternion (no rotation)
    pub fn identity() -> Self {
        Self {
            w: T::one(),
            x: T::zero(),
            y: T::zero(),
            z: T::zero(),
        }
    }

    /// Lift an f64 quaternion (w, x, y, z) into constants
    pub fn from_f64(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self {
            w: T::from_literal(w),
            x: T::from_literal(x),
            y: T::from_literal(y),
            z: T::from_literal(z),
        }
    }

    /// Quaternion conjugate (inverse for unit quaternions)
    pub fn conjugate(self) -> Self {
        Self {
            w: self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }

    /// Norm (magnitude) of the quaternion
    pub fn norm(self) -> T {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Normalize the quaternion to unit length
    pub fn normalize(self) -> Self {
        let n = self.norm();
        Self {
            w: self.w / n,
            x: self.x / n,
            y: self.y / n,
            z: self.z / n,
        }
    }

    /// Hamilton product (quaternion multiplication)
    ///
    /// q1 * q2 represents applying rotation q2 first, then q1
    pub fn hamilton(self, other: Self) -> Self {
        Self {
            w: self.w * other.w - self.x * other.x - self.y * other.y - self.z * other.z,
            x: self.w * other.x + self.x * other.w + self.y * other.z - self.z * other.y,
            y: self.w * other.y - self.x * other.z + self.y * other.w + self.z * other.x,
            z: self.w * other.z + self.x * other.y - self.y * other.x + self.z * other.w,
        }
    }

    /// Rotate a 3D vector by this quaternion
    ///
    /// Uses the optimized formula v' = v + 2w(q_xyz × v) + 2(q_xyz × (q_xyz × v))
    /// which avoids full quaternion multiplication.
    pub fn rotate_vec(self, v: Vec3<T>) -> Vec3<T> {
        // t = 2 * (q_xyz × v)
        let two = T::from_literal(2.0);
        let tx = two * (self.y * v.z - self.z * v.y);
        let ty = two * (self.z * v.x - self.x * v.z);
        let tz = two * (self.x * v.y - self.y * v.x);

        // v' = v + w*t + (q_xyz × t)
        Vec3 {
            x: v.x + self.w * tx + (self.y * tz - self.z * ty),
            y: v.y + self.w * ty + (self.z * tx - self.x * tz),
            z: v.z + self.w * tz + (self.x * ty - self.y * tx),
        }
    }

    /// Exponential map: axis-angle vector to unit quaternion
    ///
    /// Given rotation vector ω (axis × angle), computes
    /// q = (cos(θ/2), sin(θ/2) * ω/θ) where θ = ||ω||.
    ///
    /// Uses a smooth Taylor/exact blend so derivatives stay finite at θ = 0.
    pub fn from_axis_angle(rvec: Vec3<T>) -> Self {
        let theta_sq = rvec.norm_squared();
        let theta = theta_sq.sqrt();
        let half_theta = theta * T::from_literal(0.5);

        let sin_half = half_theta.sin();
        let cos_half = half_theta.cos();

        // Taylor series for small angles: sin(θ/2)/θ ≈ 0.5 - θ²/48
        let taylor_sinc_half = T::from_literal(0.5) - theta_sq * T::from_literal(1.0 / 48.0);

        // Exact formula with safe division
        let eps_sq = T::from_literal(1e-20);
        let theta_safe = (theta_sq + eps_sq).sqrt();
        let exact_sinc_half = sin_half / theta_safe;

        // Blend between Taylor and exact
        let blend = theta_sq / (theta_sq + T::from_literal(0.001));
        let sinc_half = taylor_sinc_half * (T::one() - blend) + exact_sinc_half * blend;

        Self {
            w: cos_half,
            x: sinc_half * rvec.x,
            y: sinc_half * rvec.y,
            z: sinc_half * rvec.z,
        }
    }

    /// Logarithm map: unit quaternion to axis-angle vector
    ///
    /// Returns the rotation vector ω = θ * axis where θ = 2 * acos(w).
    pub fn to_axis_angle(self) -> Vec3<T> {
        // For a unit quaternion, |xyz| = sin(θ/2)
        let xyz_norm_sq = self.x * self.x + self.y * self.y + self.z * self.z;
        let xyz_norm = xyz_norm_sq.sqrt();

        let half_theta = self.w.acos();
        let theta = half_theta * T::from_literal(2.0);
        let theta_sq = theta * theta;

        // Taylor series for small angles: θ / sin(θ/2) ≈ 2 + θ²/12
        let taylor_k = T::from_literal(2.0) + theta_sq * T::from_literal(1.0 / 12.0);

        // Exact formula: θ / sin(θ/2) = θ / |xyz|
        let eps = T::from_literal(1e-10);
        let exact_k = theta / (xyz_norm + eps);

        // Blend between Taylor and exact
        let blend = xyz_norm_sq / (xyz_norm_sq + T::from_literal(0.0001));
        let k = taylor_k * (T::one() - blend) + exact_k * blend;

        Vec3 {
            x: k * self.x,
            y: k * self.y,
            z: k * self.z,
        }
    }
}

// Quaternion multiplication via Mul trait
impl<T: Real> std::ops::Mul for Quat<T> {
    type Output = Self;

    fn mul(self, other: Self) -> Self {
        self.hamilton(other)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Jet;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_vec3_dot() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(4.0, 5.0, 6.0);
        assert_eq!(a.dot(b), 32.0); // 1*4 + 2*5 + 3*6 = 32
    }

    #[test]
    fn test_vec3_cross() {
        let x = Vec3::new(1.0, 0.0, 0.0);
        let y = Vec3::new(0.0, 1.0, 0.0);
        let z = x.cross(y);
        assert_eq!(z.x, 0.0);
        assert_eq!(z.y, 0.0);
        assert_eq!(z.z, 1.0);
    }

    #[test]
    fn test_quat_identity_rotation() {
        let q = Quat::<f64>::identity();
        let v = Vec3::new(1.0, 2.0, 3.0);
        let result = q.rotate_vec(v);

        assert_abs_diff_eq!(result.x, 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(result.y, 2.0, epsilon = 1e-10);
        assert_abs_diff_eq!(result.z, 3.0, epsilon = 1e-10);
    }

    #[test]
    fn test_quat_90deg_z_rotation() {
        let rvec = Vec3::new(0.0, 0.0, std::f64::consts::PI / 2.0);
        let q = Quat::from_axis_angle(rvec);

        // Rotate X axis, should get Y axis
        let x_axis = Vec3::new(1.0, 0.0, 0.0);
        let rotated = q.rotate_vec(x_axis);

        assert_abs_diff_eq!(rotated.x, 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(rotated.y, 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(rotated.z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_quat_composition() {
        // Two 90-degree rotations around Z should give 180 degrees
        let rvec = Vec3::new(0.0, 0.0, std::f64::consts::PI / 2.0);
        let q1 = Quat::from_axis_angle(rvec);
        let q2 = Quat::from_axis_angle(rvec);
        let combined = q1 * q2;

        let x_axis = Vec3::new(1.0, 0.0, 0.0);
        let rotated = combined.rotate_vec(x_axis);

        assert_abs_diff_eq!(rotated.x, -1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(rotated.y, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_quat_inverse() {
        let rvec = Vec3::new(0.3, 0.4, 0.5);
        let q = Quat::from_axis_angle(rvec);
        let identity = q * q.conjugate();

        assert_abs_diff_eq!(identity.w, 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(identity.x, 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(identity.y, 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(identity.z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_quat_exp_log_roundtrip() {
        let test_cases = vec![
            Vec3::new(0.1, 0.2, 0.3),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(0.5, 0.5, 0.5),
        ];

        for rvec in test_cases {
            let q = Quat::from_axis_angle(rvec);
            let rvec_recovered = q.to_axis_angle();
            let q_recovered = Quat::from_axis_angle(rvec_recovered);

            // Compare by rotating a point
            let p = Vec3::new(1.0, 2.0, 3.0);
            let r1 = q.rotate_vec(p);
            let r2 = q_recovered.rotate_vec(p);

            assert_abs_diff_eq!(r1.x, r2.x, epsilon = 1e-4);
            assert_abs_diff_eq!(r1.y, r2.y, epsilon = 1e-4);
            assert_abs_diff_eq!(r1.z, r2.z, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_quat_log_exp_roundtrip() {
        // For small angles, log(exp(ω)) should equal ω
        let test_cases = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.1, 0.2, 0.3),
            Vec3::new(0.01, 0.02, 0.03),
        ];

        for rvec in test_cases {
            let q = Quat::from_axis_angle(rvec);
            let rvec_recovered = q.to_axis_angle();

            assert_abs_diff_eq!(rvec_recovered.x, rvec.x, epsilon = 1e-6);
            assert_abs_diff_eq!(rvec_recovered.y, rvec.y, epsilon = 1e-6);
            assert_abs_diff_eq!(rvec_recovered.z, rvec.z, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_quat_with_autodiff() {
        type Jet3 = Jet<3>;

        let rx = Jet3::variable(0.2, 0);
        let ry = Jet3::variable(0.3, 1);
        let rz = Jet3::variable(0.1, 2);

        let rvec = Vec3::new(rx, ry, rz);
        let q = Quat::from_axis_angle(rvec);

        let p = Vec3::new(
            Jet3::constant(1.0),
            Jet3::constant(2.0),
            Jet3::constant(3.0),
        );
        let rotated = q.rotate_vec(p);

        // Rotation must produce non-zero derivatives
        assert!(rotated.x.derivs.iter().any(|&d| d.abs() > 1e-10));
        assert!(rotated.y.derivs.iter().any(|&d| d.abs() > 1e-10));
        assert!(rotated.z.derivs.iter().any(|&d| d.abs() > 1e-10));
    }

    #[test]
    fn test_exp_derivatives_finite_at_zero() {
        type Jet3 = Jet<3>;

        let rvec = Vec3::new(
            Jet3::variable(0.0, 0),
            Jet3::variable(0.0, 1),
            Jet3::variable(0.0, 2),
        );
        let q = Quat::from_axis_angle(rvec);

        // d(q.x)/d(rvec.x) must approach 0.5 at the origin
        assert_abs_diff_eq!(q.x.derivs[0], 0.5, epsilon = 1e-3);
        assert_abs_diff_eq!(q.y.derivs[1], 0.5, epsilon = 1e-3);
        assert_abs_diff_eq!(q.z.derivs[2], 0.5, epsilon = 1e-3);
        assert!(q.w.derivs.iter().all(|d| d.is_finite()));
    }
}
