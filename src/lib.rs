//! Diophantine equality tightener for linear integer arithmetic.
//!
//! A decision procedure in the solve-and-substitute style of Griggio's
//! *A Practical Approach to SMT(LIA)*: given the integer equalities a
//! linear-arithmetic host accumulates as term definitions and fixed
//! columns, it
//!
//! - normalizes each equality by the gcd of its coefficients, detecting
//!   unsatisfiability and periodically emitting cuts from failed proofs,
//! - rewrites the equalities into a substitution system, introducing
//!   fresh variables when no coefficient is ±1,
//! - tightens the host's bounds on integer term columns through the
//!   substitution system, and
//! - branch-and-bounds on integer-infeasible variables when nothing
//!   else makes progress.
//!
//! The host implements [`LraHost`] and drives the outer loop: it calls
//! [`DioSolver::add_term`] / [`DioSolver::remove_term`] /
//! [`DioSolver::update_column_bound`] as its state evolves, brackets its
//! own `push`/`pop` with [`DioSolver::push_scope`] /
//! [`DioSolver::pop_scope`], then calls [`DioSolver::check`] and acts on
//! the verdict. On `Conflict`, [`DioSolver::explain`] yields the
//! originally-asserted constraint indices; on `Branch`,
//! [`DioSolver::pending_cut`] yields the cut.

pub mod expr;
pub mod host;
pub mod matrix;
pub mod solver;
pub mod var_register;
pub mod work_vector;

pub use host::{
    BoundKind, ColIndex, ConstraintIndex, Dep, DepId, Explanation, LpStatus, LraHost, PendingCut,
};
pub use solver::{CheckResult, DioConfig, DioSolver, DioStats, EntryStatus};
