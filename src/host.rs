//! Interface to the embedding linear-arithmetic solver.
//!
//! The solver core owns its matrices and substitution state; term
//! definitions, bounds, feasibility checks, and dependency tracking
//! belong to the host. The host implements [`LraHost`] and passes
//! itself by reference into every solver call; there are no stored
//! callbacks.
//!
//! Two protocol obligations fall on the host:
//!
//! - Call [`crate::DioSolver::add_term`], [`crate::DioSolver::remove_term`]
//!   and [`crate::DioSolver::update_column_bound`] whenever the
//!   corresponding event happens on its side.
//! - Call [`crate::DioSolver::push_scope`] / [`crate::DioSolver::pop_scope`]
//!   around its own `push` / `pop`, so columns fixed inside a scope are
//!   re-queued as changed when the scope unwinds.

use num_rational::BigRational;
use smallvec::SmallVec;

/// Host column index.
pub type ColIndex = usize;

/// Index of an originally-asserted constraint on the host side.
pub type ConstraintIndex = usize;

/// Opaque handle to a host-side dependency node.
pub type DepId = usize;

/// A possibly-empty dependency; `None` is the empty set of witnesses.
pub type Dep = Option<DepId>;

/// Which side of a bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundKind {
    /// `x <= value`
    LessOrEqual,
    /// `x >= value`
    GreaterOrEqual,
}

/// Outcome of the host's feasibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LpStatus {
    Optimal,
    Feasible,
    Infeasible,
    Cancelled,
}

impl LpStatus {
    pub fn is_feasible(self) -> bool {
        matches!(self, LpStatus::Optimal | LpStatus::Feasible)
    }
}

/// A set of originally-asserted constraint indices explaining a
/// conflict or a derived bound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Explanation {
    items: SmallVec<[ConstraintIndex; 8]>,
}

impl Explanation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ci: ConstraintIndex) {
        self.items.push(ci);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ConstraintIndex> + '_ {
        self.items.iter().copied()
    }
}

impl Extend<ConstraintIndex> for Explanation {
    fn extend<I: IntoIterator<Item = ConstraintIndex>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

/// The cut produced when `check` returns [`crate::CheckResult::Branch`]:
/// `sum(coeffs) <= offset` (and the host may explore the `>= offset + 1`
/// side as the complement).
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCut {
    /// Monomials over host columns.
    pub coeffs: Vec<(ColIndex, BigRational)>,
    /// The `<=` right-hand side.
    pub offset: BigRational,
    /// Always true: the cut is stated as an upper bound.
    pub is_upper: bool,
}

/// The surface the solver consumes from the embedding host.
pub trait LraHost {
    // --- columns ---

    fn column_count(&self) -> usize;

    fn column_is_int(&self, j: ColIndex) -> bool;

    /// Lower bound equals upper bound.
    fn column_is_fixed(&self, j: ColIndex) -> bool;

    /// No bound on either side.
    fn column_is_free(&self, j: ColIndex) -> bool;

    /// Integer column whose current value is fractional.
    fn column_is_int_infeasible(&self, j: ColIndex) -> bool;

    /// Current (relaxation) value of the column.
    fn column_value(&self, j: ColIndex) -> BigRational;

    /// Value of the lower bound; only meaningful for fixed columns when
    /// used as the column's value.
    fn lower_bound_value(&self, j: ColIndex) -> BigRational;

    /// The bound of the requested side with its strictness and witness,
    /// or `None` when the column is unbounded on that side.
    fn bound_of_kind(&self, j: ColIndex, kind: BoundKind) -> Option<(BigRational, bool, Dep)>;

    // --- terms ---

    /// Does column `j` stand for a registered term?
    fn column_has_term(&self, j: ColIndex) -> bool;

    /// Monomials of the term definition: `j = sum(coeff * col)`.
    fn term(&self, j: ColIndex) -> &[(ColIndex, BigRational)];

    /// Columns of all registered terms.
    fn term_columns(&self) -> Vec<ColIndex>;

    // --- mutation ---

    /// Strengthen a bound, recording its dependency.
    fn update_column_type_and_bound(
        &mut self,
        j: ColIndex,
        kind: BoundKind,
        value: BigRational,
        dep: Dep,
    );

    /// Assert a bound without a recorded dependency (branch bounds).
    fn add_var_bound(&mut self, j: ColIndex, kind: BoundKind, value: BigRational);

    fn push(&mut self);

    fn pop(&mut self);

    fn find_feasible_solution(&mut self) -> LpStatus;

    // --- basis ---

    /// Columns currently basic in the host's tableau.
    fn basis_columns(&self) -> Vec<ColIndex>;

    // --- dependencies ---

    fn join_deps(&mut self, a: Dep, b: Dep) -> Dep;

    fn flatten_dep(&self, dep: Dep) -> Vec<ConstraintIndex>;

    /// Witness of the column's upper (`LessOrEqual`) or lower
    /// (`GreaterOrEqual`) bound.
    fn column_bound_witness(&self, j: ColIndex, kind: BoundKind) -> Dep;

    /// Joined witnesses of both bounds of the column.
    fn bound_constraint_witnesses_for_column(&mut self, j: ColIndex) -> Dep;

    /// Explanation of the last `find_feasible_solution` infeasibility.
    fn infeasibility_explanation(&self) -> Vec<ConstraintIndex>;

    /// Is the constraint index still live (not popped)?
    fn constraint_is_valid(&self, ci: ConstraintIndex) -> bool {
        let _ = ci;
        true
    }

    // --- settings ---

    fn random_next(&mut self) -> u64;

    fn is_cancelled(&self) -> bool {
        false
    }
}
