//! Factor construction and residual functions
//!
//! Two factor families tie the window together: surfel binary factors
//! (point-to-plane distance between corresponding surfels, reposed through
//! the corrections of their bracketing spline knots) and IMU triple factors
//! (gyro rate, accelerometer central-difference, and bias random-walk
//! residuals over three consecutive IMU states).
//!
//! Residual functions are generic over [`Real`] and evaluated with jets for
//! the Jacobian; the structural variants are a closed tagged family decided
//! at build time.

use std::collections::VecDeque;

use log::debug;
use nalgebra::{UnitQuaternion, Vector3};

use pelorus_solver::math3d::{Quat, Vec3};
use pelorus_solver::Real;

use crate::config::OdometryConfig;
use crate::state::{ImuState, SampleState, Surfel, SurfelCorrespondence};

// ============================================================================
// Surfel binary factor
// ============================================================================

/// Parameter blocks of a surfel factor, tagged by the relative order of the
/// four bracketing knots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfelBlocks {
    /// `sp1r.t < sp2l.t`: four distinct knots
    Disjoint([usize; 4]),
    /// `sp1r.t == sp2l.t`: the middle knot is shared
    Touching([usize; 3]),
    /// Both surfels in the same segment: `sp1l == sp2l`, `sp1r == sp2r`
    Overlapping([usize; 2]),
}

impl SurfelBlocks {
    /// The distinct sample-state indices, in ascending order
    pub fn indices(&self) -> &[usize] {
        match self {
            SurfelBlocks::Disjoint(b) => b,
            SurfelBlocks::Touching(b) => b,
            SurfelBlocks::Overlapping(b) => b,
        }
    }
}

/// Constant data of one surfel factor
///
/// The residual reposes each surfel by its correction interpolated at the
/// surfel's timestamp: with body pose (R, p) at time t and correction
/// (rc, pc), the corrected center is Exp(rc)·(c_w − p) + p + pc and the
/// corrected normal Exp(rc)·n_w.
#[derive(Debug, Clone)]
pub struct SurfelFactorData {
    /// `center_world − ref_pose.pos` of s1
    pub arm1: Vector3<f64>,
    /// `ref_pose.pos` of s1
    pub pos1: Vector3<f64>,
    /// Interpolation factor of s1.t inside its knot bracket
    pub tau1: f64,
    /// `center_world − ref_pose.pos` of s2
    pub arm2: Vector3<f64>,
    /// `ref_pose.pos` of s2
    pub pos2: Vector3<f64>,
    /// `normal_world` of s2
    pub normal2: Vector3<f64>,
    /// Interpolation factor of s2.t inside its knot bracket
    pub tau2: f64,
    /// Coplanarity weight of the correspondence
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct SurfelFactor {
    pub blocks: SurfelBlocks,
    pub data: SurfelFactorData,
}

fn lerp_cor<T: Real>(left: &[T; 6], right: &[T; 6], tau: f64, offset: usize) -> Vec3<T> {
    let tl = T::from_literal(1.0 - tau);
    let tr = T::from_literal(tau);
    Vec3::new(
        left[offset] * tl + right[offset] * tr,
        left[offset + 1] * tl + right[offset + 1] * tr,
        left[offset + 2] * tl + right[offset + 2] * tr,
    )
}

/// Point-to-plane residual of a surfel correspondence
///
/// Each `cor*` is a 6-wide [rot_cor, pos_cor] block of the knot named in
/// [`SurfelBlocks`]; for the touching variant the middle block is passed
/// twice (`cor1r` and `cor2l`), for the overlapping variant both pairs
/// coincide.
pub fn surfel_match_residual<T: Real>(
    data: &SurfelFactorData,
    cor1l: &[T; 6],
    cor1r: &[T; 6],
    cor2l: &[T; 6],
    cor2r: &[T; 6],
) -> T {
    let rc1 = lerp_cor(cor1l, cor1r, data.tau1, 0);
    let pc1 = lerp_cor(cor1l, cor1r, data.tau1, 3);
    let rc2 = lerp_cor(cor2l, cor2r, data.tau2, 0);
    let pc2 = lerp_cor(cor2l, cor2r, data.tau2, 3);

    let q1 = Quat::from_axis_angle(rc1);
    let q2 = Quat::from_axis_angle(rc2);

    let arm1 = Vec3::from_f64(data.arm1.x, data.arm1.y, data.arm1.z);
    let pos1 = Vec3::from_f64(data.pos1.x, data.pos1.y, data.pos1.z);
    let arm2 = Vec3::from_f64(data.arm2.x, data.arm2.y, data.arm2.z);
    let pos2 = Vec3::from_f64(data.pos2.x, data.pos2.y, data.pos2.z);
    let normal2 = Vec3::from_f64(data.normal2.x, data.normal2.y, data.normal2.z);

    let c1 = q1.rotate_vec(arm1) + pos1 + pc1;
    let c2 = q2.rotate_vec(arm2) + pos2 + pc2;
    let n2 = q2.rotate_vec(normal2);

    n2.dot(c1 - c2) * T::from_literal(data.weight)
}

/// Build surfel factors for all correspondences
///
/// Each surfel timestamp is bracketed in the sample-state queue by
/// upper-bound; correspondences whose bracket is degenerate (at the window
/// boundary) are skipped silently, as are pairs that lost their time order.
pub fn build_surfel_factors(
    correspondences: &[SurfelCorrespondence],
    surfels: &[Surfel],
    sample_states: &VecDeque<SampleState>,
) -> Vec<SurfelFactor> {
    let mut factors = Vec::with_capacity(correspondences.len());
    let mut skipped = 0usize;

    for corr in correspondences {
        let s1 = &surfels[corr.s1];
        let s2 = &surfels[corr.s2];
        debug_assert!(s1.t < s2.t);

        // First knot strictly after each surfel timestamp
        let idx1r = sample_states.partition_point(|ss| ss.t <= s1.t);
        let idx2r = sample_states.partition_point(|ss| ss.t <= s2.t);
        if idx1r == 0
            || idx1r >= sample_states.len()
            || idx2r == 0
            || idx2r >= sample_states.len()
        {
            skipped += 1;
            continue;
        }

        let (sp1l, sp1r) = (idx1r - 1, idx1r);
        let (sp2l, sp2r) = (idx2r - 1, idx2r);

        let blocks = if sample_states[sp1r].t < sample_states[sp2l].t {
            SurfelBlocks::Disjoint([sp1l, sp1r, sp2l, sp2r])
        } else if sample_states[sp1r].t == sample_states[sp2l].t {
            SurfelBlocks::Touching([sp1l, sp1r, sp2r])
        } else {
            debug_assert_eq!(sp1l, sp2l);
            debug_assert_eq!(sp1r, sp2r);
            SurfelBlocks::Overlapping([sp1l, sp1r])
        };

        let tau1 = (s1.t - sample_states[sp1l].t)
            / (sample_states[sp1r].t - sample_states[sp1l].t);
        let tau2 = (s2.t - sample_states[sp2l].t)
            / (sample_states[sp2r].t - sample_states[sp2l].t);

        factors.push(SurfelFactor {
            blocks,
            data: SurfelFactorData {
                arm1: s1.center_world - s1.ref_pose.pos,
                pos1: s1.ref_pose.pos,
                tau1,
                arm2: s2.center_world - s2.ref_pose.pos,
                pos2: s2.ref_pose.pos,
                normal2: s2.normal_world,
                tau2,
                weight: corr.weight,
            },
        });
    }

    if skipped > 0 {
        debug!("skipped {} correspondences with degenerate knot brackets", skipped);
    }

    factors
}

// ============================================================================
// IMU triple factor
// ============================================================================

/// Parameter blocks of an IMU factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImuBlocks {
    /// Bracket with a following knot: (sp1, sp2, sp3)
    Interior([usize; 3]),
    /// First IMU state in the final segment: (sp1, sp2), `t3` sentinel +∞
    Tail([usize; 2]),
}

impl ImuBlocks {
    pub fn indices(&self) -> &[usize] {
        match self {
            ImuBlocks::Interior(b) => b,
            ImuBlocks::Tail(b) => b,
        }
    }
}

/// Pose of one IMU state captured at factor build time
#[derive(Debug, Clone, Copy)]
pub struct ImuPose {
    pub t: f64,
    pub pos: Vector3<f64>,
    pub rot: UnitQuaternion<f64>,
}

/// Constant data of one IMU triple factor
#[derive(Debug, Clone)]
pub struct ImuFactorData {
    /// Knot times; `t3` is +∞ when the factor sits in the final segment
    pub t1: f64,
    pub t2: f64,
    pub t3: f64,
    /// Integration step, 1/imu_rate
    pub dt: f64,
    pub imu: [ImuPose; 3],
    /// Trapezoidal midpoint gyro of the first two states
    pub gyr_mid: Vector3<f64>,
    /// Specific force of the first state
    pub acc1: Vector3<f64>,
    /// Biases stored on the two bracketing knots
    pub bg1: Vector3<f64>,
    pub ba1: Vector3<f64>,
    pub bg2: Vector3<f64>,
    pub ba2: Vector3<f64>,
    /// Gravity of the latest sample state
    pub grav: Vector3<f64>,
    pub w_gyr: f64,
    pub w_acc: f64,
    pub w_bg: f64,
    pub w_ba: f64,
}

#[derive(Debug, Clone)]
pub struct ImuFactor {
    pub blocks: ImuBlocks,
    pub data: ImuFactorData,
}

fn lift_quat<T: Real>(q: &UnitQuaternion<f64>) -> Quat<T> {
    // nalgebra stores quaternion coords as [i, j, k, w]
    Quat::from_f64(q.coords[3], q.coords[0], q.coords[1], q.coords[2])
}

fn vec_slice<T: Real>(block: &[T; 12], offset: usize) -> Vec3<T> {
    Vec3::new(block[offset], block[offset + 1], block[offset + 2])
}

fn lerp_cor12<T: Real>(left: &[T; 12], right: &[T; 12], tau: f64, offset: usize) -> Vec3<T> {
    let tl = T::from_literal(1.0 - tau);
    let tr = T::from_literal(tau);
    Vec3::new(
        left[offset] * tl + right[offset] * tr,
        left[offset + 1] * tl + right[offset + 1] * tr,
        left[offset + 2] * tl + right[offset + 2] * tr,
    )
}

/// Corrected pose of one IMU state under the knot corrections
///
/// The correction at the state's timestamp is linearly interpolated inside
/// the knot segment the state falls in; with the +∞ sentinel the second
/// segment degenerates to the middle knot's correction.
fn corrected_pose<T: Real>(
    data: &ImuFactorData,
    which: usize,
    cor1: &[T; 12],
    cor2: &[T; 12],
    cor3: &[T; 12],
) -> (Quat<T>, Vec3<T>) {
    let t = data.imu[which].t;
    let (left, right, tau) = if t < data.t2 {
        (cor1, cor2, (t - data.t1) / (data.t2 - data.t1))
    } else if data.t3.is_finite() {
        (cor2, cor3, (t - data.t2) / (data.t3 - data.t2))
    } else {
        (cor2, cor3, 0.0)
    };

    let rc = lerp_cor12(left, right, tau, 0);
    let pc = lerp_cor12(left, right, tau, 3);

    let rot = Quat::from_axis_angle(rc) * lift_quat(&data.imu[which].rot);
    let p = &data.imu[which].pos;
    let pos = Vec3::from_f64(p.x, p.y, p.z) + pc;
    (rot, pos)
}

/// 12-dimensional IMU residual: [gyro, acc, gyro bias walk, acc bias walk]
///
/// Each `cor*` is the full 12-wide correction block of a knot; for the tail
/// variant `cor3` is passed the middle block again (it is multiplied by a
/// zero interpolation factor).
///
/// The gyro and accelerometer residuals are the defect of the prediction
/// model: rotation must advance by the midpoint gyro rate, position by the
/// central-difference of the measured specific force under bias and gravity.
pub fn imu_triple_residual<T: Real>(
    data: &ImuFactorData,
    cor1: &[T; 12],
    cor2: &[T; 12],
    cor3: &[T; 12],
) -> [T; 12] {
    let dt = T::from_literal(data.dt);

    let (r1, p1) = corrected_pose(data, 0, cor1, cor2, cor3);
    let (r2, p2) = corrected_pose(data, 1, cor1, cor2, cor3);
    let (_, p3) = corrected_pose(data, 2, cor1, cor2, cor3);

    // Corrected biases at the segment of i1, plus the neighbour knot's for
    // the random-walk terms
    let bg1 = Vec3::from_f64(data.bg1.x, data.bg1.y, data.bg1.z) + vec_slice(cor1, 6);
    let ba1 = Vec3::from_f64(data.ba1.x, data.ba1.y, data.ba1.z) + vec_slice(cor1, 9);
    let bg2 = Vec3::from_f64(data.bg2.x, data.bg2.y, data.bg2.z) + vec_slice(cor2, 6);
    let ba2 = Vec3::from_f64(data.ba2.x, data.ba2.y, data.ba2.z) + vec_slice(cor2, 9);

    // Gyro rate residual: Log(R1'⁻¹ R2')/dt − (gyr_mid − bg)
    let rel = r1.conjugate() * r2;
    let log_rel = rel.to_axis_angle();
    let gyr_mid = Vec3::from_f64(data.gyr_mid.x, data.gyr_mid.y, data.gyr_mid.z);
    let w_gyr = T::from_literal(data.w_gyr);
    let r_gyr = (Vec3::new(log_rel.x / dt, log_rel.y / dt, log_rel.z / dt) - (gyr_mid - bg1))
        .scale(w_gyr);

    // Accelerometer residual: (p1' − 2p2' + p3')/dt² − (R1'(a1 − ba) + g)
    let two = T::from_literal(2.0);
    let dt_sq = dt * dt;
    let num = p1 - p2.scale(two) + p3;
    let acc1 = Vec3::from_f64(data.acc1.x, data.acc1.y, data.acc1.z);
    let grav = Vec3::from_f64(data.grav.x, data.grav.y, data.grav.z);
    let predicted = r1.rotate_vec(acc1 - ba1) + grav;
    let w_acc = T::from_literal(data.w_acc);
    let r_acc = (Vec3::new(num.x / dt_sq, num.y / dt_sq, num.z / dt_sq) - predicted).scale(w_acc);

    // Bias random walk between the bracketing knots
    let r_bg = (bg2 - bg1).scale(T::from_literal(data.w_bg));
    let r_ba = (ba2 - ba1).scale(T::from_literal(data.w_ba));

    [
        r_gyr.x, r_gyr.y, r_gyr.z, //
        r_acc.x, r_acc.y, r_acc.z, //
        r_bg.x, r_bg.y, r_bg.z, //
        r_ba.x, r_ba.y, r_ba.z,
    ]
}

/// Build IMU factors for every consecutive state triple inside the
/// sample-state span
pub fn build_imu_factors(
    imu_states: &VecDeque<ImuState>,
    sample_states: &VecDeque<SampleState>,
    config: &OdometryConfig,
) -> Vec<ImuFactor> {
    let mut factors = Vec::new();
    if imu_states.len() < 3 || sample_states.is_empty() {
        return factors;
    }

    let grav = sample_states.back().unwrap().grav;
    let dt = 1.0 / config.imu_rate;

    for i in 0..imu_states.len() - 2 {
        let i1 = &imu_states[i];
        let i2 = &imu_states[i + 1];
        let i3 = &imu_states[i + 2];

        if i1.t < sample_states.front().unwrap().t {
            continue;
        }
        if i3.t > sample_states.back().unwrap().t {
            break;
        }

        // First knot strictly after i1
        let idx2 = sample_states.partition_point(|ss| ss.t <= i1.t);
        debug_assert!(idx2 >= 1 && idx2 < sample_states.len());
        let sp1 = idx2 - 1;
        let sp2 = idx2;

        let (blocks, t3) = if idx2 == sample_states.len() - 1 {
            (ImuBlocks::Tail([sp1, sp2]), f64::INFINITY)
        } else {
            (
                ImuBlocks::Interior([sp1, sp2, sp2 + 1]),
                sample_states[sp2 + 1].t,
            )
        };

        let snapshot = |s: &ImuState| ImuPose {
            t: s.t,
            pos: s.pos,
            rot: s.rot,
        };

        factors.push(ImuFactor {
            blocks,
            data: ImuFactorData {
                t1: sample_states[sp1].t,
                t2: sample_states[sp2].t,
                t3,
                dt,
                imu: [snapshot(i1), snapshot(i2), snapshot(i3)],
                gyr_mid: (i1.gyr + i2.gyr) / 2.0,
                acc1: i1.acc,
                bg1: sample_states[sp1].bg,
                ba1: sample_states[sp1].ba,
                bg2: sample_states[sp2].bg,
                ba2: sample_states[sp2].ba,
                grav,
                w_gyr: config.gyroscope_noise_density_cost_weight,
                w_acc: config.accelerometer_noise_density_cost_weight,
                w_bg: config.gyroscope_random_walk_cost_weight,
                w_ba: config.accelerometer_random_walk_cost_weight,
            },
        });
    }

    factors
}
