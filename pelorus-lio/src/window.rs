//! Sliding-window maintenance and correction propagation
//!
//! After each solve, sample-state corrections are spread onto the IMU states
//! through a cubic B-spline, surfel world poses are refreshed from the moved
//! IMU states, and finally the corrections are folded into the knots. Once a
//! sweep is fully processed the window is trimmed back to its configured
//! duration.

use std::collections::VecDeque;

use log::debug;

use crate::error::{OdometryError, Result};
use crate::math::{interpolate_pose, so3_exp, Rigid3};
use crate::spline::SampleCorrector;
use crate::state::{ImuState, SampleState, Surfel};

/// Spread sample-state corrections onto the IMU states
///
/// IMU states inside the spline's interpolable interior get the smoothly
/// interpolated correction; states before the first and after the last
/// corrected index are extrapolated by the rigid delta of their corrected
/// neighbour: `T_i_new = T_i_old · T_{i±1}_old⁻¹ · T_{i±1}_new`.
pub fn update_imu_poses(
    sample_states: &VecDeque<SampleState>,
    imu_states: &mut VecDeque<ImuState>,
) {
    let corrector = SampleCorrector::new(sample_states);
    let old_poses: Vec<Rigid3> = imu_states.iter().map(|s| s.pose()).collect();

    let mut corrected_first_idx = None;
    let mut corrected_last_idx = None;

    for (i, imu_state) in imu_states.iter_mut().enumerate() {
        if let Some((rot_cor, pos_cor)) = corrector.correction_at(imu_state.t) {
            imu_state.rot = so3_exp(&rot_cor) * imu_state.rot;
            imu_state.pos += pos_cor;

            if corrected_first_idx.is_none() {
                corrected_first_idx = Some(i);
            }
            corrected_last_idx = Some(i);
        }
    }

    let (Some(first), Some(last)) = (corrected_first_idx, corrected_last_idx) else {
        return;
    };
    debug!(
        "corrected extra imu poses in [0, {}) and ({}, {})",
        first,
        last,
        imu_states.len()
    );

    // Head: walk backwards from the first interpolated state
    for i in (0..first).rev() {
        let pose_new = old_poses[i] * old_poses[i + 1].inverse() * imu_states[i + 1].pose();
        imu_states[i].rot = pose_new.rot;
        imu_states[i].pos = pose_new.pos;
    }

    // Tail: walk forwards from the last interpolated state
    for i in last + 1..imu_states.len() {
        let pose_new = old_poses[i] * old_poses[i - 1].inverse() * imu_states[i - 1].pose();
        imu_states[i].rot = pose_new.rot;
        imu_states[i].pos = pose_new.pos;
    }
}

/// Refresh every window surfel's world pose from the current IMU states
pub fn update_surfel_poses(
    imu_states: &VecDeque<ImuState>,
    surfels: &mut VecDeque<Surfel>,
) -> Result<()> {
    for surfel in surfels.iter_mut() {
        let idx = imu_states.partition_point(|s| s.t <= surfel.t);
        if idx == 0 || idx >= imu_states.len() {
            return Err(OdometryError::BracketMissing { t: surfel.t });
        }

        let left = &imu_states[idx - 1];
        let right = &imu_states[idx];
        let factor = (surfel.t - left.t) / (right.t - left.t);
        let pose = interpolate_pose(&left.pos, &left.rot, &right.pos, &right.rot, factor);
        surfel.update_pose(pose);
    }
    Ok(())
}

/// Fold the corrections into the sample states and zero them
pub fn update_sample_poses(sample_states: &mut VecDeque<SampleState>) {
    for ss in sample_states.iter_mut() {
        ss.rot = so3_exp(&ss.rot_cor()) * ss.rot;
        ss.pos += ss.pos_cor();
        ss.bg += ss.bg_cor();
        ss.ba += ss.ba_cor();
        ss.zero_corrections();
    }
}

/// Trim the window back to `window_duration`
///
/// Trim order: oldest sample states until the span fits, then IMU states
/// older than the first sample state, then surfels older than the first IMU
/// state. No-op when the span already fits.
pub fn shrink_to_fit(
    sample_states: &mut VecDeque<SampleState>,
    imu_states: &mut VecDeque<ImuState>,
    surfels: &mut VecDeque<Surfel>,
    window_duration: f64,
) {
    let span = |q: &VecDeque<SampleState>| match (q.front(), q.back()) {
        (Some(front), Some(back)) => back.t - front.t,
        _ => 0.0,
    };

    if sample_states.is_empty() || span(sample_states) <= window_duration {
        return;
    }

    while span(sample_states) > window_duration {
        sample_states.pop_front();
    }
    while imu_states
        .front()
        .is_some_and(|s| s.t < sample_states.front().unwrap().t)
    {
        imu_states.pop_front();
    }
    while surfels
        .front()
        .is_some_and(|s| imu_states.front().is_some_and(|i| s.t < i.t))
    {
        surfels.pop_front();
    }
}

/// Verify the sliding-window invariants
///
/// Checked after every processed sweep; a violation is a contract error, not
/// a recoverable condition.
pub fn check_window_invariants(
    sample_states: &VecDeque<SampleState>,
    imu_states: &VecDeque<ImuState>,
    surfels: &VecDeque<Surfel>,
    sample_dt: f64,
    window_duration: f64,
) -> Result<()> {
    const EPS: f64 = 1e-6;

    let violation = |msg: String| Err(OdometryError::WindowInvariant(msg));

    let samples: Vec<f64> = sample_states.iter().map(|s| s.t).collect();
    for pair in samples.windows(2) {
        if pair[1] <= pair[0] {
            return violation(format!("sample states out of order at {:.6}", pair[1]));
        }
        if (pair[1] - pair[0] - sample_dt).abs() > EPS {
            return violation(format!(
                "sample gap {:.6} differs from sample_dt {:.6}",
                pair[1] - pair[0],
                sample_dt
            ));
        }
    }
    if let (Some(first), Some(last)) = (samples.first(), samples.last()) {
        if last - first > window_duration + EPS {
            return violation(format!("window span {:.6} exceeds limit", last - first));
        }
        if let (Some(imu_front), Some(imu_back)) = (imu_states.front(), imu_states.back()) {
            if imu_front.t < first - EPS || imu_back.t < last - EPS {
                return violation("imu states do not cover the sample span".to_string());
            }
            for surfel in surfels {
                if surfel.t < imu_front.t || surfel.t >= imu_back.t {
                    return violation(format!(
                        "surfel at {:.6} outside imu state range",
                        surfel.t
                    ));
                }
            }
        }
    }

    Ok(())
}
