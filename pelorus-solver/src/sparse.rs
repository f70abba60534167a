//! Sparse least-squares solver on the normal equations
//!
//! The Jacobians of a sliding-window odometry problem are heavily sparse:
//! every residual touches only the handful of sample states bracketing it.
//! This solver keeps the Jacobian in CSR form with a structure fixed at
//! construction time; only the values are rewritten each iteration. The
//! damped normal equations (JᵀJ + λ·D) Δx = Jᵀr are factorized with a sparse
//! LDL decomposition.

use log::debug;
use nalgebra::DVector;
use sprs::{CsMat, SymmetryCheck, TriMat};
use sprs_ldl::Ldl;

/// Outcome of a [`SparseLeastSquares::solve`] call
#[derive(Debug, Clone, Copy)]
pub struct SolveSummary {
    /// Residual norm at the initial parameters
    pub initial_error: f64,
    /// Residual norm at the returned parameters
    pub final_error: f64,
    /// Number of iterations performed (accepted or rejected)
    pub iterations: usize,
    /// True when the step norm dropped below the tolerance
    pub converged: bool,
}

/// Build a CSR Jacobian skeleton from (row, col) entries
///
/// Entries MUST be sorted by (row, col) and de-duplicated; the value order in
/// the CSR data array is then exactly the entry order, which is the order the
/// cost function writes its Jacobian values in.
fn build_jacobian(entries: &[(usize, usize)], n_rows: usize, n_cols: usize) -> CsMat<f64> {
    let mut tri = TriMat::new((n_rows, n_cols));
    for &(row, col) in entries {
        tri.add_triplet(row, col, 0.0);
    }
    tri.to_csr()
}

/// Structure-fixed sparse Levenberg-Marquardt
///
/// The sparsity structure is given once at construction; [`solve`] reuses it
/// across iterations, overwriting values through the cost closure.
///
/// [`solve`]: SparseLeastSquares::solve
pub struct SparseLeastSquares {
    /// Step-norm convergence threshold
    pub tolerance: f64,
    /// Iteration bound (accepted and rejected steps both count)
    pub max_iterations: usize,
    /// Initial damping factor λ
    pub initial_lambda: f64,
    /// λ multiplier on a rejected step
    pub lambda_scale_up: f64,
    /// λ multiplier on an accepted step
    pub lambda_scale_down: f64,

    // Sparse Jacobian in CSR format (structure fixed, values updated each iteration)
    jacobian: CsMat<f64>,

    // Dense workspace vectors
    jtr: DVector<f64>,
    residuals: DVector<f64>,
    temp_residuals: DVector<f64>,
}

impl SparseLeastSquares {
    /// Create a new solver for a problem with the given shape
    ///
    /// # Arguments
    /// * `n_rows` - Number of residuals
    /// * `n_cols` - Number of parameters
    /// * `entries` - (row, col) pairs defining the sparsity structure,
    ///   sorted by (row, col) and de-duplicated
    pub fn new(n_rows: usize, n_cols: usize, entries: &[(usize, usize)]) -> Self {
        let jacobian = build_jacobian(entries, n_rows, n_cols);

        Self {
            tolerance: 1e-10,
            max_iterations: 50,
            initial_lambda: 1e-4,
            lambda_scale_up: 10.0,
            lambda_scale_down: 0.1,
            jtr: DVector::zeros(n_cols),
            residuals: DVector::zeros(n_rows),
            temp_residuals: DVector::zeros(n_rows),
            jacobian,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_lambda_params(mut self, initial: f64, scale_up: f64, scale_down: f64) -> Self {
        self.initial_lambda = initial;
        self.lambda_scale_up = scale_up;
        self.lambda_scale_down = scale_down;
        self
    }

    /// Number of non-zero entries in the Jacobian
    pub fn nnz(&self) -> usize {
        self.jacobian.nnz()
    }

    /// Minimize the squared residual norm starting from `params`
    ///
    /// `cost_fn` receives (params, residuals, jacobian_values) and must write
    /// Jacobian values in the same (row, col) order as the entries given to
    /// the constructor.
    pub fn solve<F>(&mut self, mut params: DVector<f64>, mut cost_fn: F) -> (DVector<f64>, SolveSummary)
    where
        F: FnMut(&DVector<f64>, &mut [f64], &mut [f64]),
    {
        let mut lambda = self.initial_lambda;
        let mut summary = SolveSummary {
            initial_error: f64::NAN,
            final_error: f64::NAN,
            iterations: 0,
            converged: false,
        };

        for iteration in 0..self.max_iterations {
            summary.iterations = iteration + 1;

            self.residuals.fill(0.0);
            cost_fn(&params, self.residuals.as_mut_slice(), self.jacobian.data_mut());
            let error = self.residuals.norm();
            if iteration == 0 {
                summary.initial_error = error;
            }
            summary.final_error = error;

            // Normal equations: JᵀJ and Jᵀr
            let jt: CsMat<f64> = self.jacobian.clone().transpose_into();
            let jtj: CsMat<f64> = &jt * &self.jacobian;

            // Jᵀr: jt is CSC, its outer iterator walks columns of Jᵀ, i.e.
            // residual indices; accumulate val * r[j] into the output rows.
            self.jtr.fill(0.0);
            for (col_j, col) in jt.outer_iterator().enumerate() {
                let r_j = self.residuals[col_j];
                for (row_i, &val) in col.iter() {
                    self.jtr[row_i] += val * r_j;
                }
            }

            let gradient_norm = self.jtr.norm();

            let jtj_damped = add_damping(&jtj, lambda);

            let ldl_result = Ldl::new()
                .check_symmetry(SymmetryCheck::DontCheckSymmetry)
                .numeric(jtj_damped.view());

            let ldl = match ldl_result {
                Ok(ldl) => ldl,
                Err(e) => {
                    debug!("LDL factorization failed ({:?}), raising damping", e);
                    lambda *= self.lambda_scale_up;
                    continue;
                }
            };

            let jtr_vec: Vec<f64> = self.jtr.iter().cloned().collect();
            let step_vec: Vec<f64> = ldl.solve(&jtr_vec);
            let step = DVector::from_vec(step_vec);

            let new_params = &params - &step;

            // Evaluate the trial step (jacobian values are scratch here; the
            // next iteration rewrites them at the accepted parameters)
            self.temp_residuals.fill(0.0);
            cost_fn(&new_params, self.temp_residuals.as_mut_slice(), self.jacobian.data_mut());
            let new_error = self.temp_residuals.norm();

            let step_norm = step.norm();

            if new_error < error {
                params = new_params;
                summary.final_error = new_error;
                lambda *= self.lambda_scale_down;

                if step_norm < self.tolerance {
                    summary.converged = true;
                    debug!("converged after {} iterations", iteration + 1);
                    break;
                }
            } else {
                lambda *= self.lambda_scale_up;

                if gradient_norm < 1e-6 {
                    // Local minimum: the gradient vanished but no step helps
                    summary.converged = true;
                    debug!(
                        "local minimum at iteration {} (gradient = {:.3e})",
                        iteration, gradient_norm
                    );
                    break;
                }

                if !lambda.is_finite() || lambda > 1e12 {
                    debug!(
                        "damping diverged at iteration {} (lambda = {:.3e}, gradient = {:.3e})",
                        iteration, lambda, gradient_norm
                    );
                    break;
                }
            }
        }

        (params, summary)
    }
}

/// Add Levenberg-Marquardt damping to the diagonal
///
/// Columns whose Jacobian is entirely zero (gauge-fixed parameters, or
/// parameters momentarily untouched by any residual) have no stored diagonal
/// in JᵀJ; they get a bare λ entry so the factorization stays well posed and
/// their step is exactly zero.
fn add_damping(jtj: &CsMat<f64>, lambda: f64) -> CsMat<f64> {
    let n = jtj.cols();
    let mut tri = TriMat::new((n, n));
    let mut has_diagonal = vec![false; n];

    let indptr_storage = jtj.indptr();
    let indptr: &[usize] = indptr_storage.as_slice().unwrap();
    for col in 0..jtj.outer_dims() {
        for idx in indptr[col]..indptr[col + 1] {
            let row = jtj.indices()[idx];
            let mut val = jtj.data()[idx];
            if row == col {
                val += lambda * f64::max(val, 1.0);
                has_diagonal[col] = true;
            }
            tri.add_triplet(row, col, val);
        }
    }

    for col in 0..n {
        if !has_diagonal[col] {
            tri.add_triplet(col, col, lambda);
        }
    }

    tri.to_csc()
}
