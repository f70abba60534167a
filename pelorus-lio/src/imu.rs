//! IMU state prediction
//!
//! Extends the window's IMU-state and sample-state queues by integrating
//! buffered IMU measurements under the current bias/gravity estimate.

use std::collections::VecDeque;

use log::debug;
use nalgebra::{UnitQuaternion, Vector3};

use crate::config::OdometryConfig;
use crate::error::{OdometryError, Result};
use crate::math::{interpolate_pose, so3_exp};
use crate::state::{ImuState, SampleState};
use crate::types::ImuMeasurement;

/// Integrate buffered IMU measurements up to `end_time` and extend the
/// sample-state queue to cover them
///
/// On the first invocation (`init_sld_win` false) the window is seeded with
/// two IMU states (the first at identity, the second rotated by the midpoint
/// gyro over one step) and one sample state at the first IMU timestamp with
/// zero biases and gravity opposing the first specific-force reading.
///
/// Afterwards, every buffered measurement appends an [`ImuState`]:
/// rotation by trapezoidal midpoint gyro, position by central-difference
/// double integration. Integration stops once the latest state reaches
/// `end_time`. New sample states are appended every `sample_dt` below
/// `end_time`, pose-interpolated from their IMU bracket, inheriting biases
/// and gravity from the latest sample state.
pub fn predict_imu_and_sample_states(
    imu_buff: &mut VecDeque<ImuMeasurement>,
    imu_states: &mut VecDeque<ImuState>,
    sample_states: &mut VecDeque<SampleState>,
    init_sld_win: &mut bool,
    end_time: f64,
    config: &OdometryConfig,
) -> Result<()> {
    let dt = 1.0 / config.imu_rate;

    // 1. Seed the window on the first invocation
    if !*init_sld_win {
        if imu_buff.len() < 2 {
            return Err(OdometryError::ImuUnderflow {
                have: imu_buff.len(),
            });
        }

        for i in 0..2 {
            let msg = imu_buff.pop_front().unwrap();
            let rot = if i == 0 {
                UnitQuaternion::identity()
            } else {
                let prev = imu_states.back().unwrap();
                so3_exp(&((prev.gyr + msg.gyr) / 2.0 * dt))
            };
            imu_states.push_back(ImuState {
                t: msg.t,
                gyr: msg.gyr,
                acc: msg.acc,
                pos: Vector3::zeros(),
                rot,
            });
        }

        let first = imu_states.front().unwrap();
        let mut ss = SampleState::new(first.t);
        ss.grav = -config.gravity_norm * first.acc.normalize();
        ss.rot = first.rot;
        ss.pos = first.pos;
        sample_states.push_back(ss);

        *init_sld_win = true;
    }

    // 2. Predict IMU states under the latest bias/gravity estimate
    let latest = sample_states.back().unwrap();
    let ba = latest.ba;
    let bg = latest.bg;
    let grav = latest.grav;

    while let Some(msg) = imu_buff.pop_front() {
        let size = imu_states.len();
        let prev = &imu_states[size - 1];
        let prev2 = &imu_states[size - 2];

        let rot = prev.rot * so3_exp(&(((prev.gyr + msg.gyr) / 2.0 - bg) * dt));
        let pos = (prev2.rot * (prev2.acc - ba) + grav) * dt * dt + 2.0 * prev.pos - prev2.pos;

        let reached_end = msg.t >= end_time;
        imu_states.push_back(ImuState {
            t: msg.t,
            gyr: msg.gyr,
            acc: msg.acc,
            pos,
            rot,
        });

        if reached_end {
            // Enough IMU states to bracket the sweep end
            break;
        }
    }

    // 3. Extend the sample-state queue
    let old_time = sample_states.back().unwrap().t;
    let old_size = sample_states.len();
    let mut t = old_time + config.sample_dt;
    while t < end_time {
        let idx = imu_states.partition_point(|s| s.t < t);
        if idx == 0 || idx >= imu_states.len() {
            return Err(OdometryError::BracketMissing { t });
        }

        let left = &imu_states[idx - 1];
        let right = &imu_states[idx];
        let factor = (t - left.t) / (right.t - left.t);
        let pose = interpolate_pose(&left.pos, &left.rot, &right.pos, &right.rot, factor);

        let mut ss = SampleState::new(t);
        ss.ba = ba;
        ss.bg = bg;
        ss.grav = grav;
        ss.rot = pose.rot;
        ss.pos = pose.pos;
        sample_states.push_back(ss);

        t += config.sample_dt;
    }

    debug!(
        "added {} sample states in ({:.6}, {:.6}]",
        sample_states.len() - old_size,
        old_time,
        sample_states.back().unwrap().t
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const RATE: f64 = 100.0;

    fn stationary_buffer(duration: f64) -> VecDeque<ImuMeasurement> {
        let n = (duration * RATE) as usize;
        (0..n)
            .map(|i| {
                ImuMeasurement::new(
                    i as f64 / RATE,
                    Vector3::zeros(),
                    Vector3::new(0.0, 0.0, 9.81),
                )
            })
            .collect()
    }

    fn test_config() -> OdometryConfig {
        OdometryConfig {
            imu_rate: RATE,
            sample_dt: 0.1,
            gravity_norm: 9.81,
            ..OdometryConfig::default()
        }
    }

    fn run(
        buff: &mut VecDeque<ImuMeasurement>,
        end_time: f64,
    ) -> (VecDeque<ImuState>, VecDeque<SampleState>) {
        let mut imu_states = VecDeque::new();
        let mut sample_states = VecDeque::new();
        let mut init = false;
        predict_imu_and_sample_states(
            buff,
            &mut imu_states,
            &mut sample_states,
            &mut init,
            end_time,
            &test_config(),
        )
        .unwrap();
        assert!(init);
        (imu_states, sample_states)
    }

    #[test]
    fn test_underflow_on_first_invocation() {
        let mut buff: VecDeque<_> =
            vec![ImuMeasurement::new(0.0, Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81))].into();
        let mut imu_states = VecDeque::new();
        let mut sample_states = VecDeque::new();
        let mut init = false;

        let err = predict_imu_and_sample_states(
            &mut buff,
            &mut imu_states,
            &mut sample_states,
            &mut init,
            1.0,
            &test_config(),
        )
        .unwrap_err();

        assert!(matches!(err, OdometryError::ImuUnderflow { have: 1 }));
        assert!(!init);
    }

    #[test]
    fn test_seed_gravity_opposes_first_acc() {
        let mut buff = stationary_buffer(1.0);
        let (_, sample_states) = run(&mut buff, 0.5);

        let first = sample_states.front().unwrap();
        assert_abs_diff_eq!(first.grav.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(first.grav.y, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(first.grav.z, -9.81, epsilon = 1e-12);
        assert_eq!(first.t, 0.0);
        assert_abs_diff_eq!(first.bg.norm(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(first.ba.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_stationary_integration_stays_at_origin() {
        let mut buff = stationary_buffer(1.0);
        let (imu_states, _) = run(&mut buff, 0.5);

        for state in &imu_states {
            assert_abs_diff_eq!(state.pos.norm(), 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(state.rot.angle(), 0.0, epsilon = 1e-9);
        }
        assert!(imu_states.back().unwrap().t >= 0.5);
    }

    #[test]
    fn test_sample_states_spaced_at_sample_dt() {
        let mut buff = stationary_buffer(1.0);
        let (_, sample_states) = run(&mut buff, 0.75);

        assert!(sample_states.len() >= 2);
        let states: Vec<_> = sample_states.iter().collect();
        for pair in states.windows(2) {
            assert_abs_diff_eq!(pair[1].t - pair[0].t, 0.1, epsilon = 1e-9);
        }
        assert!(sample_states.back().unwrap().t < 0.75);
    }

    #[test]
    fn test_constant_yaw_rate_integrates_heading() {
        let n = 101;
        let mut buff: VecDeque<_> = (0..n)
            .map(|i| {
                ImuMeasurement::new(
                    i as f64 / RATE,
                    Vector3::new(0.0, 0.0, 0.1),
                    Vector3::new(0.0, 0.0, 9.81),
                )
            })
            .collect();

        let (imu_states, _) = run(&mut buff, 1.0);

        let last = imu_states.back().unwrap();
        let yaw = last.rot.scaled_axis().z;
        // 0.1 rad/s for the integrated span
        assert_abs_diff_eq!(yaw, 0.1 * last.t, epsilon = 1e-3);
    }

    #[test]
    fn test_integration_stops_at_end_time() {
        let mut buff = stationary_buffer(2.0);
        let (imu_states, _) = run(&mut buff, 0.5);

        // One state at or past end_time, none beyond it
        let last_t = imu_states.back().unwrap().t;
        assert!(last_t >= 0.5);
        assert!(last_t < 0.5 + 2.0 / RATE);
        // Remaining measurements stay buffered
        assert!(!buff.is_empty());
    }
}
