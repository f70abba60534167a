//! Feed a simulated stationary rig through the engine and print the
//! estimated trajectory.

use pelorus_lio::simulation::{plane_sweep, stationary_imu_stream};
use pelorus_lio::{LidarOdometry, OdometryConfig};

fn main() {
    let config = OdometryConfig {
        imu_rate: 100.0,
        sample_dt: 0.05,
        sweep_duration: 0.1,
        sliding_window_duration: 1.0,
        voxel_size: 2.0,
        min_points_per_voxel: 8,
        ..OdometryConfig::default()
    };
    let mut odom = LidarOdometry::new(config);

    let duration = 2.0;
    let imu = stationary_imu_stream(100.0, duration, 9.81);
    let scans: Vec<_> = (0..(duration / 0.1) as usize)
        .map(|k| plane_sweep(k as f64 * 0.1, (k + 1) as f64 * 0.1, 16, 5.0, 8.0))
        .collect();

    let mut imu_iter = imu.iter().peekable();
    for (k, scan) in scans.iter().enumerate() {
        let chunk_end = (k + 1) as f64 * 0.1;
        while imu_iter.peek().is_some_and(|m| m.t < chunk_end) {
            odom.add_imu_data(*imu_iter.next().unwrap()).unwrap();
        }
        odom.add_lidar_scan(scan).unwrap();

        if let Some((t, pose)) = odom.latest_pose() {
            println!(
                "t {:6.3}  pos [{:+.4} {:+.4} {:+.4}]  |rot| {:.5} rad  surfels {}",
                t,
                pose.pos.x,
                pose.pos.y,
                pose.pos.z,
                pose.rot.angle(),
                odom.window_surfels().len()
            );
        }
    }
}
