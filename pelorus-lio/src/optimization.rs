//! Window optimization
//!
//! Lays out one 12-wide correction block per sample state, assembles the
//! factor graph into a sparse Jacobian structure, and solves the damped
//! normal equations. The translational columns of the first sample state
//! carry no Jacobian entries (gauge fixing); surfel rows are robustified
//! with a Cauchy loss.

use std::collections::VecDeque;

use log::{debug, log_enabled, warn, Level};
use nalgebra::DVector;

use pelorus_solver::{Jet, SolveSummary, SparseLeastSquares};

use crate::config::OdometryConfig;
use crate::factors::{
    build_imu_factors, build_surfel_factors, imu_triple_residual, surfel_match_residual,
    ImuBlocks, ImuFactor, SurfelBlocks, SurfelFactor,
};
use crate::state::{ImuState, SampleState, Surfel, SurfelCorrespondence, COR_DIM, POS_COR};

/// Cauchy loss scale for surfel residuals
const CAUCHY_SCALE: f64 = 0.4;

/// Outcome of one window solve
#[derive(Debug, Clone, Copy)]
pub struct OptimizationReport {
    pub summary: SolveSummary,
    pub n_surfel_factors: usize,
    pub n_imu_factors: usize,
    pub n_params: usize,
}

/// One free Jacobian column of a factor
#[derive(Debug, Clone, Copy)]
struct ActiveSlot {
    /// Position of the owning block in the factor's distinct-block list
    block_pos: usize,
    /// Offset inside the 12-wide correction block
    slot: usize,
    /// Global parameter column
    col: usize,
}

/// Enumerate the free columns of a factor over the given sample blocks
///
/// `slots_per_block` is 6 for surfel factors (rot + pos corrections) and 12
/// for IMU factors (the full block). The first sample state's translational
/// slots are gauge-fixed and excluded.
fn active_slots(blocks: &[usize], slots_per_block: usize) -> Vec<ActiveSlot> {
    let mut out = Vec::with_capacity(blocks.len() * slots_per_block);
    for (block_pos, &b) in blocks.iter().enumerate() {
        for slot in 0..slots_per_block {
            if b == 0 && (POS_COR..POS_COR + 3).contains(&slot) {
                continue;
            }
            out.push(ActiveSlot {
                block_pos,
                slot,
                col: b * COR_DIM + slot,
            });
        }
    }
    out
}

/// Scale a residual and its Jacobian row by the Cauchy robustifier weight
#[inline]
fn cauchy_weight(residual: f64) -> f64 {
    let u = residual / CAUCHY_SCALE;
    (1.0 / (1.0 + u * u)).sqrt()
}

fn eval_surfel_factor<const N: usize>(
    factor: &SurfelFactor,
    active: &[ActiveSlot],
    params: &DVector<f64>,
) -> Jet<N> {
    let blocks = factor.blocks.indices();
    let mut cors: Vec<[Jet<N>; 6]> = blocks
        .iter()
        .map(|&b| std::array::from_fn(|s| Jet::constant(params[b * COR_DIM + s])))
        .collect();
    for (d, a) in active.iter().enumerate() {
        cors[a.block_pos][a.slot] = Jet::variable(params[a.col], d);
    }

    match factor.blocks {
        SurfelBlocks::Disjoint(_) => {
            surfel_match_residual(&factor.data, &cors[0], &cors[1], &cors[2], &cors[3])
        }
        SurfelBlocks::Touching(_) => {
            surfel_match_residual(&factor.data, &cors[0], &cors[1], &cors[1], &cors[2])
        }
        SurfelBlocks::Overlapping(_) => {
            surfel_match_residual(&factor.data, &cors[0], &cors[1], &cors[0], &cors[1])
        }
    }
}

fn eval_imu_factor<const N: usize>(
    factor: &ImuFactor,
    active: &[ActiveSlot],
    params: &DVector<f64>,
) -> [Jet<N>; 12] {
    let blocks = factor.blocks.indices();
    let mut cors: Vec<[Jet<N>; 12]> = blocks
        .iter()
        .map(|&b| std::array::from_fn(|s| Jet::constant(params[b * COR_DIM + s])))
        .collect();
    for (d, a) in active.iter().enumerate() {
        cors[a.block_pos][a.slot] = Jet::variable(params[a.col], d);
    }

    if cors.len() == 3 {
        imu_triple_residual(&factor.data, &cors[0], &cors[1], &cors[2])
    } else {
        // Tail variant: the sentinel +∞ knot zeroes the third block's share
        imu_triple_residual(&factor.data, &cors[0], &cors[1], &cors[1])
    }
}

/// Solve one outer iteration of the window problem
///
/// Builds the factor graph from the current correspondences and IMU states,
/// runs the bounded inner solve, and stores the resulting corrections on the
/// sample states. Non-convergence is accepted with a warning.
pub fn solve_window(
    surfels: &[Surfel],
    correspondences: &[SurfelCorrespondence],
    imu_states: &VecDeque<ImuState>,
    sample_states: &mut VecDeque<SampleState>,
    config: &OdometryConfig,
) -> OptimizationReport {
    let surfel_factors = build_surfel_factors(correspondences, surfels, sample_states);
    let imu_factors = build_imu_factors(imu_states, sample_states, config);

    let n_params = sample_states.len() * COR_DIM;
    let n_surfel_rows = surfel_factors.len();
    let n_rows = n_surfel_rows + imu_factors.len() * 12;

    let mut report = OptimizationReport {
        summary: SolveSummary {
            initial_error: 0.0,
            final_error: 0.0,
            iterations: 0,
            converged: true,
        },
        n_surfel_factors: surfel_factors.len(),
        n_imu_factors: imu_factors.len(),
        n_params,
    };

    if n_rows == 0 || n_params == 0 {
        return report;
    }

    let surfel_active: Vec<Vec<ActiveSlot>> = surfel_factors
        .iter()
        .map(|f| active_slots(f.blocks.indices(), 6))
        .collect();
    let imu_active: Vec<Vec<ActiveSlot>> = imu_factors
        .iter()
        .map(|f| active_slots(f.blocks.indices(), COR_DIM))
        .collect();

    // Sparsity entries, row-major: surfel rows first, then 12-row IMU blocks
    let mut entries = Vec::new();
    for (fi, active) in surfel_active.iter().enumerate() {
        for a in active {
            entries.push((fi, a.col));
        }
    }
    for (fi, active) in imu_active.iter().enumerate() {
        for r in 0..12 {
            let row = n_surfel_rows + fi * 12 + r;
            for a in active {
                entries.push((row, a.col));
            }
        }
    }
    entries.sort();
    entries.dedup();

    let mut solver = SparseLeastSquares::new(n_rows, n_params, &entries)
        .with_max_iterations(config.inner_iter_num_max);

    let mut initial = DVector::zeros(n_params);
    for (i, ss) in sample_states.iter().enumerate() {
        for s in 0..COR_DIM {
            initial[i * COR_DIM + s] = ss.data_cor[s];
        }
    }

    let (solution, summary) = solver.solve(initial, |params, residuals, jacobian| {
        let mut cursor = 0usize;

        for (fi, factor) in surfel_factors.iter().enumerate() {
            let active = &surfel_active[fi];
            // Monomorphize per variant, like the closed factor family
            let (value, derivs): (f64, Vec<f64>) = match factor.blocks {
                SurfelBlocks::Disjoint(_) => {
                    let r = eval_surfel_factor::<24>(factor, active, params);
                    (r.value, r.derivs[..active.len()].to_vec())
                }
                SurfelBlocks::Touching(_) => {
                    let r = eval_surfel_factor::<18>(factor, active, params);
                    (r.value, r.derivs[..active.len()].to_vec())
                }
                SurfelBlocks::Overlapping(_) => {
                    let r = eval_surfel_factor::<12>(factor, active, params);
                    (r.value, r.derivs[..active.len()].to_vec())
                }
            };

            let w = cauchy_weight(value);
            residuals[fi] = value * w;
            for d in derivs {
                jacobian[cursor] = d * w;
                cursor += 1;
            }
        }

        for (fi, factor) in imu_factors.iter().enumerate() {
            let active = &imu_active[fi];
            let base = n_surfel_rows + fi * 12;
            match factor.blocks {
                ImuBlocks::Interior(_) => {
                    let res = eval_imu_factor::<36>(factor, active, params);
                    for (r_idx, r) in res.iter().enumerate() {
                        residuals[base + r_idx] = r.value;
                        for d in 0..active.len() {
                            jacobian[cursor] = r.derivs[d];
                            cursor += 1;
                        }
                    }
                }
                ImuBlocks::Tail(_) => {
                    let res = eval_imu_factor::<24>(factor, active, params);
                    for (r_idx, r) in res.iter().enumerate() {
                        residuals[base + r_idx] = r.value;
                        for d in 0..active.len() {
                            jacobian[cursor] = r.derivs[d];
                            cursor += 1;
                        }
                    }
                }
            }
        }
    });

    for (i, ss) in sample_states.iter_mut().enumerate() {
        for s in 0..COR_DIM {
            ss.data_cor[s] = solution[i * COR_DIM + s];
        }
    }

    if !summary.converged {
        warn!(
            "window solve did not converge in {} iterations (error {:.4e} -> {:.4e}); accepting partial step",
            summary.iterations, summary.initial_error, summary.final_error
        );
    }

    if log_enabled!(Level::Debug) {
        report_residuals(&surfel_factors, &imu_factors, sample_states);
    }

    report.summary = summary;
    report
}

/// Log per-kind residual distributions at the accepted corrections
fn report_residuals(
    surfel_factors: &[SurfelFactor],
    imu_factors: &[ImuFactor],
    sample_states: &VecDeque<SampleState>,
) {
    let cor6 = |i: usize| -> [f64; 6] {
        std::array::from_fn(|s| sample_states[i].data_cor[s])
    };
    let cor12 = |i: usize| -> [f64; 12] { sample_states[i].data_cor };

    if !surfel_factors.is_empty() {
        let mut sum = 0.0;
        let mut max: f64 = 0.0;
        for f in surfel_factors {
            let r = match f.blocks {
                SurfelBlocks::Disjoint([a, b, c, d]) => {
                    surfel_match_residual(&f.data, &cor6(a), &cor6(b), &cor6(c), &cor6(d))
                }
                SurfelBlocks::Touching([a, b, c]) => {
                    surfel_match_residual(&f.data, &cor6(a), &cor6(b), &cor6(b), &cor6(c))
                }
                SurfelBlocks::Overlapping([a, b]) => {
                    surfel_match_residual(&f.data, &cor6(a), &cor6(b), &cor6(a), &cor6(b))
                }
            };
            sum += r.abs();
            max = max.max(r.abs());
        }
        debug!(
            "surfel residuals: count {} mean {:.4e} max {:.4e}",
            surfel_factors.len(),
            sum / surfel_factors.len() as f64,
            max
        );
    }

    if !imu_factors.is_empty() {
        let mut group_sum = [0.0f64; 4];
        let mut group_max = [0.0f64; 4];
        for f in imu_factors {
            let r = match f.blocks {
                ImuBlocks::Interior([a, b, c]) => {
                    imu_triple_residual(&f.data, &cor12(a), &cor12(b), &cor12(c))
                }
                ImuBlocks::Tail([a, b]) => {
                    imu_triple_residual(&f.data, &cor12(a), &cor12(b), &cor12(b))
                }
            };
            for g in 0..4 {
                let norm =
                    (r[g * 3] * r[g * 3] + r[g * 3 + 1] * r[g * 3 + 1] + r[g * 3 + 2] * r[g * 3 + 2])
                        .sqrt();
                group_sum[g] += norm;
                group_max[g] = group_max[g].max(norm);
            }
        }
        let n = imu_factors.len() as f64;
        for (g, name) in ["gyro", "acc", "gyro_bias", "acc_bias"].iter().enumerate() {
            debug!(
                "imu residuals ({}): count {} mean {:.4e} max {:.4e}",
                name, imu_factors.len(), group_sum[g] / n, group_max[g]
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Rigid3;
    use crate::state::SurfelCorrespondence;
    use nalgebra::{UnitQuaternion, Vector3};

    fn stationary_imu_states(n: usize, dt: f64) -> VecDeque<ImuState> {
        (0..n)
            .map(|i| ImuState {
                t: i as f64 * dt,
                gyr: Vector3::zeros(),
                acc: Vector3::new(0.0, 0.0, 9.81),
                pos: Vector3::zeros(),
                rot: UnitQuaternion::identity(),
            })
            .collect()
    }

    fn stationary_sample_states(times: &[f64]) -> VecDeque<SampleState> {
        times
            .iter()
            .map(|&t| {
                let mut ss = SampleState::new(t);
                ss.grav = Vector3::new(0.0, 0.0, -9.81);
                ss
            })
            .collect()
    }

    fn surfel_at(t: f64, center: Vector3<f64>, normal: Vector3<f64>) -> Surfel {
        Surfel {
            t,
            center_local: center,
            normal_local: normal,
            center_world: center,
            normal_world: normal,
            ref_pose: Rigid3::identity(),
            point_count: 20,
            planarity: 1.0,
        }
    }

    fn test_config() -> OdometryConfig {
        OdometryConfig {
            imu_rate: 100.0,
            inner_iter_num_max: 10,
            gyroscope_noise_density_cost_weight: 1.0,
            accelerometer_noise_density_cost_weight: 1.0,
            gyroscope_random_walk_cost_weight: 1.0,
            accelerometer_random_walk_cost_weight: 1.0,
            ..OdometryConfig::default()
        }
    }

    #[test]
    fn test_consistent_problem_keeps_corrections_at_zero() {
        // Coplanar surfels and self-consistent IMU states: the zero
        // correction vector is already the minimum.
        let up = Vector3::new(0.0, 0.0, 1.0);
        let surfels = vec![
            surfel_at(0.05, Vector3::new(0.0, 0.0, 5.0), up),
            surfel_at(0.15, Vector3::new(0.5, 0.0, 5.0), up),
        ];
        let corrs = vec![SurfelCorrespondence { s1: 0, s2: 1, weight: 1.0 }];
        let imu_states = stationary_imu_states(21, 0.01);
        let mut sample_states = stationary_sample_states(&[0.0, 0.1, 0.2]);

        let report = solve_window(&surfels, &corrs, &imu_states, &mut sample_states, &test_config());

        assert!(report.n_surfel_factors == 1);
        assert!(report.n_imu_factors > 0);
        for ss in &sample_states {
            for v in ss.data_cor {
                assert!(v.abs() < 1e-6, "correction should stay zero, got {}", v);
            }
        }
    }

    #[test]
    fn test_first_sample_position_is_gauge_fixed() {
        let up = Vector3::new(0.0, 0.0, 1.0);
        // Offset surfel pair creates pressure to translate
        let surfels = vec![
            surfel_at(0.05, Vector3::new(0.0, 0.0, 5.1), up),
            surfel_at(0.15, Vector3::new(0.5, 0.0, 5.0), up),
        ];
        let corrs = vec![SurfelCorrespondence { s1: 0, s2: 1, weight: 1.0 }];
        let imu_states = stationary_imu_states(21, 0.01);
        let mut sample_states = stationary_sample_states(&[0.0, 0.1, 0.2]);

        solve_window(&surfels, &corrs, &imu_states, &mut sample_states, &test_config());

        let first = sample_states.front().unwrap();
        assert_eq!(first.pos_cor(), Vector3::zeros());
    }

    #[test]
    fn test_residual_decreases_on_inconsistent_surfels() {
        let up = Vector3::new(0.0, 0.0, 1.0);
        let surfels = vec![
            surfel_at(0.05, Vector3::new(0.0, 0.0, 5.1), up),
            surfel_at(0.15, Vector3::new(0.5, 0.0, 5.0), up),
        ];
        let corrs = vec![SurfelCorrespondence { s1: 0, s2: 1, weight: 1.0 }];
        // Surfel-only problem: no IMU anchoring so the offset must shrink
        let imu_states = VecDeque::new();
        let mut sample_states = stationary_sample_states(&[0.0, 0.1, 0.2]);

        let report = solve_window(&surfels, &corrs, &imu_states, &mut sample_states, &test_config());

        assert!(report.summary.final_error < report.summary.initial_error);
    }

    #[test]
    fn test_empty_problem_is_noop() {
        let imu_states = VecDeque::new();
        let mut sample_states = stationary_sample_states(&[0.0, 0.1]);

        let report = solve_window(&[], &[], &imu_states, &mut sample_states, &test_config());

        assert_eq!(report.n_surfel_factors, 0);
        assert_eq!(report.n_imu_factors, 0);
        for ss in &sample_states {
            assert_eq!(ss.data_cor, [0.0; COR_DIM]);
        }
    }
}
