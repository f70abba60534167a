//! The LiDAR-inertial odometry driver
//!
//! One logical owner drives `add_imu_data → add_lidar_scan` strictly
//! serially; every processed sweep runs prediction, undistortion, surfel
//! extraction, the outer optimization loop, window trimming, and
//! publication.

use std::collections::VecDeque;

use log::{debug, info, trace};

use crate::config::OdometryConfig;
use crate::error::{OdometryError, Result};
use crate::imu::predict_imu_and_sample_states;
use crate::matching::{FeatureMap, KnnSurfelMatcher};
use crate::optimization::solve_window;
use crate::publish::{NullSink, OdometrySink};
use crate::state::{ImuState, SampleState, Surfel};
use crate::surfel::{extract_surfels, GlobalMap};
use crate::sweep::{build_sweep, undistort_sweep};
use crate::types::{ImuMeasurement, LidarPoint};
use crate::window::{
    check_window_invariants, shrink_to_fit, update_imu_poses, update_sample_poses,
    update_surfel_poses,
};

/// Tightly-coupled LiDAR-inertial odometry engine
///
/// Holds the ingest buffers, the three sliding-window queues, the one-shot
/// initialization latches, and the injected publish sink.
pub struct LidarOdometry {
    config: OdometryConfig,

    imu_buff: VecDeque<ImuMeasurement>,
    points_buff: VecDeque<LidarPoint>,

    imu_states_sld_win: VecDeque<ImuState>,
    sample_states_sld_win: VecDeque<SampleState>,
    surfels_sld_win: VecDeque<Surfel>,

    global_map: GlobalMap,
    sink: Box<dyn OdometrySink>,

    init_sld_win: bool,
    sync_done: bool,
    first_extraction_done: bool,
    sweep_id: u64,
}

impl LidarOdometry {
    pub fn new(config: OdometryConfig) -> Self {
        Self {
            config,
            imu_buff: VecDeque::new(),
            points_buff: VecDeque::new(),
            imu_states_sld_win: VecDeque::new(),
            sample_states_sld_win: VecDeque::new(),
            surfels_sld_win: VecDeque::new(),
            global_map: GlobalMap::new(),
            sink: Box::new(NullSink),
            init_sld_win: false,
            sync_done: false,
            first_extraction_done: false,
            sweep_id: 0,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn OdometrySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Append one IMU measurement to the ingest buffer
    pub fn add_imu_data(&mut self, msg: ImuMeasurement) -> Result<()> {
        if let Some(last) = self.imu_buff.back() {
            if msg.t <= last.t {
                return Err(OdometryError::NonMonotonicImu {
                    prev: last.t,
                    next: msg.t,
                });
            }
        }
        self.imu_buff.push_back(msg);
        Ok(())
    }

    /// Ingest one LiDAR scan and process any completed sweep
    ///
    /// Points are mapped into the IMU frame by the static extrinsic and
    /// range/blind filtered before buffering. Returns without advancing
    /// state while the streams have not yet overlapped or the sweep is
    /// still incomplete.
    pub fn add_lidar_scan(&mut self, points: &[LidarPoint]) -> Result<()> {
        for pt in points {
            let in_imu = self.config.ext_lidar2imu.transform(&pt.xyz);
            if let Some(last) = self.points_buff.back() {
                if pt.t < last.t {
                    return Err(OdometryError::NonMonotonicPoint {
                        prev: last.t,
                        next: pt.t,
                    });
                }
            }
            let range = in_imu.norm();
            if range < self.config.min_range
                || range > self.config.max_range
                || self.config.blind_bounding_box.contains(&in_imu)
            {
                continue;
            }
            self.points_buff.push_back(LidarPoint::new(in_imu, pt.t));
        }

        if !self.sync_heading_msgs() {
            return Ok(());
        }

        // 1. Wait until a full sweep and the IMU to cover it are buffered
        let Some(front) = self.points_buff.front() else {
            return Ok(());
        };
        let mut sweep_endtime = front.t + self.config.sweep_duration;
        if self.points_buff.back().unwrap().t < sweep_endtime
            || self.imu_buff.back().map_or(true, |m| m.t < sweep_endtime)
        {
            debug!(
                "waiting to construct a sweep, buffered span {:.3}",
                self.points_buff.back().unwrap().t - self.points_buff.front().unwrap().t
            );
            return Ok(());
        }

        // 2. Integrate IMU poses across the window and snap the sweep end to
        // the last spline knot
        predict_imu_and_sample_states(
            &mut self.imu_buff,
            &mut self.imu_states_sld_win,
            &mut self.sample_states_sld_win,
            &mut self.init_sld_win,
            sweep_endtime,
            &self.config,
        )?;
        sweep_endtime = self.sample_states_sld_win.back().unwrap().t;

        let sweep = build_sweep(&mut self.points_buff, sweep_endtime);
        if sweep.is_empty() {
            debug!("sweep {} empty after snapping to {:.6}", self.sweep_id, sweep_endtime);
            return Ok(());
        }
        info!(
            "build sweep {} with {} points [{:.6}, {:.6}] by sweep_endtime {:.6}",
            self.sweep_id,
            sweep.len(),
            sweep.first().unwrap().t,
            sweep.last().unwrap().t,
            sweep_endtime
        );

        // 3. Undistort by the integrated IMU poses
        let sweep_undistorted = undistort_sweep(&sweep, &self.imu_states_sld_win)?;

        // 4. Extract surfels into the window; the first extraction also
        // feeds the global map
        let global_map = if self.first_extraction_done {
            None
        } else {
            Some(&mut self.global_map)
        };
        let sweep_surfels = extract_surfels(
            &sweep_undistorted,
            &self.imu_states_sld_win,
            &self.config,
            global_map,
        )?;
        self.first_extraction_done = true;
        self.surfels_sld_win.extend(sweep_surfels);
        update_surfel_poses(&self.imu_states_sld_win, &mut self.surfels_sld_win)?;

        // 5. Outer iterations: match, solve, propagate
        for iter_num in 0..self.config.outer_iter_num_max {
            let surfels = self.surfels_sld_win.make_contiguous();

            let surfel_corrs = if self.config.use_feature_map {
                FeatureMap::matches(surfels, &self.config)
            } else {
                let mut matcher = KnnSurfelMatcher::new();
                matcher.build_index(surfels);
                matcher.matches(surfels, &self.config)
            };

            if surfel_corrs.is_empty() {
                debug!("outer iteration {}: no correspondences, skipping", iter_num);
                break;
            }

            let report = solve_window(
                surfels,
                &surfel_corrs,
                &self.imu_states_sld_win,
                &mut self.sample_states_sld_win,
                &self.config,
            );
            debug!(
                "outer iteration {}: {} surfel factors, {} imu factors, error {:.4e} -> {:.4e}",
                iter_num,
                report.n_surfel_factors,
                report.n_imu_factors,
                report.summary.initial_error,
                report.summary.final_error
            );

            update_imu_poses(&self.sample_states_sld_win, &mut self.imu_states_sld_win);
            update_surfel_poses(&self.imu_states_sld_win, &mut self.surfels_sld_win)?;
            update_sample_poses(&mut self.sample_states_sld_win);

            if log::log_enabled!(log::Level::Trace) {
                for ss in &self.sample_states_sld_win {
                    trace!(
                        "sample {:.6}: p {:?} q {:?} bg {:?} ba {:?}",
                        ss.t, ss.pos, ss.rot, ss.bg, ss.ba
                    );
                }
            }
        }

        // 6. Trim the window and publish
        shrink_to_fit(
            &mut self.sample_states_sld_win,
            &mut self.imu_states_sld_win,
            &mut self.surfels_sld_win,
            self.config.sliding_window_duration,
        );
        check_window_invariants(
            &self.sample_states_sld_win,
            &self.imu_states_sld_win,
            &self.surfels_sld_win,
            self.config.sample_dt,
            self.config.sliding_window_duration,
        )?;

        self.sink.publish_surfels(self.surfels_sld_win.make_contiguous());
        if let Some(front) = self.points_buff.front() {
            let stamp = front.t;
            self.points_buff.make_contiguous();
            self.sink
                .publish_scan_in_imu_frame(stamp, self.points_buff.as_slices().0);
        }
        if let Some(latest) = self.sample_states_sld_win.back() {
            self.sink.publish_pose(
                latest.t,
                &crate::math::Rigid3::new(latest.pos, latest.rot),
            );
        }

        self.sweep_id += 1;
        Ok(())
    }

    /// Advance both buffer heads until the streams overlap in time
    ///
    /// One-shot: idempotent after its first success.
    fn sync_heading_msgs(&mut self) -> bool {
        if self.sync_done {
            return true;
        }

        if self.imu_buff.is_empty() || self.points_buff.is_empty() {
            return false;
        }

        if self.imu_buff.back().unwrap().t < self.points_buff.front().unwrap().t {
            info!("waiting for imu messages");
            return false;
        }

        while self
            .imu_buff
            .front()
            .is_some_and(|m| m.t < self.points_buff.front().unwrap().t)
        {
            self.imu_buff.pop_front();
        }

        while self
            .points_buff
            .front()
            .is_some_and(|p| p.t < self.imu_buff.front().unwrap().t)
        {
            self.points_buff.pop_front();
        }
        if self.points_buff.is_empty() {
            // All buffered points predate the IMU stream; wait for more
            return false;
        }

        self.sync_done = true;
        true
    }

    /// Latest estimated body pose and its timestamp
    pub fn latest_pose(&self) -> Option<(f64, crate::math::Rigid3)> {
        self.sample_states_sld_win
            .back()
            .map(|ss| (ss.t, crate::math::Rigid3::new(ss.pos, ss.rot)))
    }

    pub fn sample_states(&self) -> &VecDeque<SampleState> {
        &self.sample_states_sld_win
    }

    pub fn imu_states(&self) -> &VecDeque<ImuState> {
        &self.imu_states_sld_win
    }

    pub fn window_surfels(&self) -> &VecDeque<Surfel> {
        &self.surfels_sld_win
    }

    pub fn global_map(&self) -> &GlobalMap {
        &self.global_map
    }

    pub fn sweep_count(&self) -> u64 {
        self.sweep_id
    }
}
