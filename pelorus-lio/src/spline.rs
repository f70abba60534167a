//! Uniform cubic B-spline interpolation
//!
//! Used to spread sample-state corrections smoothly onto the IMU states
//! between knots. `interp` yields a value only on the interior
//! `[t_1, t_{n-2}]` where all four basis functions are defined; callers that
//! need values outside extrapolate explicitly (see
//! [`crate::window::update_imu_poses`]), never through the spline.

use std::collections::VecDeque;

use nalgebra::Vector3;

use crate::state::SampleState;

/// Cubic B-spline over time-stamped R³ samples
///
/// Samples act as control points of a uniform cubic B-spline with knots at
/// the sample times. The sample-state queue supplies them spaced `sample_dt`
/// apart.
#[derive(Debug, Clone)]
pub struct CubicBSplineInterpolator {
    times: Vec<f64>,
    values: Vec<Vector3<f64>>,
}

impl CubicBSplineInterpolator {
    /// Build from parallel time/value arrays; times must be strictly
    /// increasing
    pub fn new(times: Vec<f64>, values: Vec<Vector3<f64>>) -> Self {
        debug_assert_eq!(times.len(), values.len());
        debug_assert!(times.windows(2).all(|w| w[0] < w[1]));
        Self { times, values }
    }

    /// Evaluate the spline at `t`
    ///
    /// Returns `None` outside `[t_1, t_{n-2}]` (including any query when
    /// fewer than four samples exist); this is a missing value, not a
    /// failure.
    pub fn interp(&self, t: f64) -> Option<Vector3<f64>> {
        let n = self.times.len();
        if n < 4 {
            return None;
        }
        if t < self.times[1] || t > self.times[n - 2] {
            return None;
        }

        // Segment index i with times[i] <= t <= times[i+1], clamped so the
        // four control points i-1 .. i+2 exist
        let i = self
            .times
            .partition_point(|&x| x <= t)
            .saturating_sub(1)
            .clamp(1, n - 3);

        let u = (t - self.times[i]) / (self.times[i + 1] - self.times[i]);
        let u2 = u * u;
        let u3 = u2 * u;

        // Uniform cubic B-spline basis
        let b0 = (1.0 - u) * (1.0 - u) * (1.0 - u) / 6.0;
        let b1 = (3.0 * u3 - 6.0 * u2 + 4.0) / 6.0;
        let b2 = (-3.0 * u3 + 3.0 * u2 + 3.0 * u + 1.0) / 6.0;
        let b3 = u3 / 6.0;

        Some(
            self.values[i - 1] * b0
                + self.values[i] * b1
                + self.values[i + 1] * b2
                + self.values[i + 2] * b3,
        )
    }
}

/// The rotation and position correction splines over the sample-state queue
///
/// Bundles the two interpolators the correction propagation needs; both are
/// built over the same knot times, so they agree on where values exist.
pub struct SampleCorrector {
    rot: CubicBSplineInterpolator,
    pos: CubicBSplineInterpolator,
}

impl SampleCorrector {
    pub fn new(sample_states: &VecDeque<SampleState>) -> Self {
        let times: Vec<f64> = sample_states.iter().map(|s| s.t).collect();
        let rot_cors: Vec<Vector3<f64>> = sample_states.iter().map(|s| s.rot_cor()).collect();
        let pos_cors: Vec<Vector3<f64>> = sample_states.iter().map(|s| s.pos_cor()).collect();

        Self {
            rot: CubicBSplineInterpolator::new(times.clone(), rot_cors),
            pos: CubicBSplineInterpolator::new(times, pos_cors),
        }
    }

    /// Interpolated (rot_cor, pos_cor) at `t`, or `None` outside the
    /// interpolable interior
    pub fn correction_at(&self, t: f64) -> Option<(Vector3<f64>, Vector3<f64>)> {
        match (self.rot.interp(t), self.pos.interp(t)) {
            (Some(rot_cor), Some(pos_cor)) => Some((rot_cor, pos_cor)),
            (None, None) => None,
            // Both splines share knot times; disagreement is a bug
            _ => unreachable!("correction splines disagree on the interpolable interval"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn uniform_times(n: usize, dt: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * dt).collect()
    }

    #[test]
    fn test_too_few_samples_yields_none() {
        let spline = CubicBSplineInterpolator::new(
            uniform_times(3, 0.1),
            vec![Vector3::zeros(); 3],
        );
        assert!(spline.interp(0.1).is_none());
    }

    #[test]
    fn test_outside_interior_yields_none() {
        let spline = CubicBSplineInterpolator::new(
            uniform_times(5, 0.1),
            vec![Vector3::zeros(); 5],
        );

        // Interior is [0.1, 0.3]
        assert!(spline.interp(0.05).is_none());
        assert!(spline.interp(0.35).is_none());
        assert!(spline.interp(0.1).is_some());
        assert!(spline.interp(0.3).is_some());
    }

    #[test]
    fn test_constant_samples_reproduced() {
        // The basis functions sum to one, so constants are exact
        let c = Vector3::new(1.0, -2.0, 3.0);
        let spline = CubicBSplineInterpolator::new(uniform_times(6, 0.1), vec![c; 6]);

        for &t in &[0.1, 0.17, 0.25, 0.33, 0.4] {
            let v = spline.interp(t).unwrap();
            assert_abs_diff_eq!(v.x, c.x, epsilon = 1e-12);
            assert_abs_diff_eq!(v.y, c.y, epsilon = 1e-12);
            assert_abs_diff_eq!(v.z, c.z, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_linear_samples_reproduced() {
        // Uniform cubic B-splines reproduce linear functions on the interior
        let times = uniform_times(6, 0.1);
        let values: Vec<_> = times
            .iter()
            .map(|&t| Vector3::new(2.0 * t, -t, 0.5 * t))
            .collect();
        let spline = CubicBSplineInterpolator::new(times, values);

        for &t in &[0.1, 0.18, 0.25, 0.4] {
            let v = spline.interp(t).unwrap();
            assert_abs_diff_eq!(v.x, 2.0 * t, epsilon = 1e-12);
            assert_abs_diff_eq!(v.y, -t, epsilon = 1e-12);
            assert_abs_diff_eq!(v.z, 0.5 * t, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_sample_corrector_zero_corrections() {
        let mut states = VecDeque::new();
        for i in 0..5 {
            states.push_back(SampleState::new(i as f64 * 0.1));
        }

        let corrector = SampleCorrector::new(&states);
        let (rot_cor, pos_cor) = corrector.correction_at(0.2).unwrap();
        assert_abs_diff_eq!(rot_cor.norm(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pos_cor.norm(), 0.0, epsilon = 1e-12);

        assert!(corrector.correction_at(0.05).is_none());
        assert!(corrector.correction_at(0.39).is_none());
    }
}
