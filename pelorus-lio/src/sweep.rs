//! Sweep construction and motion undistortion
//!
//! A sweep is the chronological prefix of the point buffer up to a chosen
//! `sweep_endtime`. Undistortion warps every point into the world frame as
//! known at the current estimate, using the body pose interpolated at the
//! point's timestamp.

use std::collections::VecDeque;

use crate::error::{OdometryError, Result};
use crate::math::interpolate_pose;
use crate::state::ImuState;
use crate::types::LidarPoint;

/// Drain the prefix of `points_buff` with `t < sweep_endtime` into a sweep,
/// preserving order
///
/// Timestamp order: l_0 ≤ l_1 ≤ … ≤ l_{n-1} < sweep_endtime.
pub fn build_sweep(points_buff: &mut VecDeque<LidarPoint>, sweep_endtime: f64) -> Vec<LidarPoint> {
    let mut sweep = Vec::new();
    while let Some(front) = points_buff.front() {
        if front.t >= sweep_endtime {
            break;
        }
        sweep.push(points_buff.pop_front().unwrap());
    }
    sweep
}

/// Warp every sweep point to the world frame using the interpolated body pose
/// at its timestamp
///
/// Each point needs an IMU-state bracket `[i-1, i]` with
/// `imu_states[i-1].t ≤ pt.t < imu_states[i].t`; position is interpolated
/// linearly, rotation spherically.
pub fn undistort_sweep(
    sweep: &[LidarPoint],
    imu_states: &VecDeque<ImuState>,
) -> Result<Vec<LidarPoint>> {
    let mut out = Vec::with_capacity(sweep.len());
    for pt in sweep {
        // First state with t > pt.t; the bracket satisfies
        // imu[idx-1].t <= pt.t < imu[idx].t
        let idx = imu_states.partition_point(|s| s.t <= pt.t);
        if idx == 0 || idx >= imu_states.len() {
            return Err(OdometryError::BracketMissing { t: pt.t });
        }

        let left = &imu_states[idx - 1];
        let right = &imu_states[idx];
        let factor = (pt.t - left.t) / (right.t - left.t);
        let pose = interpolate_pose(&left.pos, &left.rot, &right.pos, &right.rot, factor);

        out.push(LidarPoint::new(pose.transform(&pt.xyz), pt.t));
    }
    Ok(out)
}
