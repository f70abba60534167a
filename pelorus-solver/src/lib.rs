//! pelorus-solver: autodiff and sparse least-squares for sliding-window odometry
//!
//! Forward-mode automatic differentiation with compile-time sized jets, 3D
//! rotation/vector primitives usable inside autodiff residuals, and a
//! structure-fixed sparse Levenberg-Marquardt solver on the normal equations.

mod jet;
pub mod math3d;
mod sparse;

pub use jet::{Jet, Real};
pub use sparse::{SolveSummary, SparseLeastSquares};

// Re-export nalgebra for convenience
pub use nalgebra;
