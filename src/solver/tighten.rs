//! Bound tightening of host term columns through the substitution set.
//!
//! For an integer term column `j`, substitute its definition through S
//! until no substitutable variable remains; if the residual
//! coefficients share a gcd `g > 1`, host bounds on `j` can be rounded
//! to the lattice `g*Z + m_c`.

use super::{CheckResult, DioSolver, EntryStatus};
use crate::expr::LinExpr;
use crate::host::{BoundKind, ColIndex, Dep, LpStatus, LraHost};
use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use std::collections::VecDeque;
use tracing::trace;

impl DioSolver {
    /// Scans every bounded, unfixed integer term column.
    pub(crate) fn tighten_terms<H: LraHost>(&mut self, host: &mut H) -> CheckResult {
        for j in 0..host.column_count() {
            if host.is_cancelled() {
                return CheckResult::Cancelled;
            }
            if !host.column_has_term(j)
                || host.column_is_free(j)
                || host.column_is_fixed(j)
                || !host.column_is_int(j)
            {
                continue;
            }
            if self.tighten_bounds_for_term_column(host, j) {
                return CheckResult::Conflict;
            }
        }
        CheckResult::Undef
    }

    /// Returns true when a conflict was found.
    fn tighten_bounds_for_term_column<H: LraHost>(&mut self, host: &mut H, j: ColIndex) -> bool {
        let term: Vec<(ColIndex, BigRational)> = host.term(j).to_vec();
        if !term.iter().all(|(col, _)| host.column_is_int(*col)) {
            return false;
        }
        let mut queue: VecDeque<usize> = VecDeque::new();
        for (col, _) in &term {
            if host.column_is_fixed(*col) {
                continue;
            }
            if let Some(local) = self.var_register.local(*col)
                && self.can_substitute(local)
            {
                queue.push_back(local);
            }
        }
        if queue.is_empty() {
            return false;
        }
        self.fill_work_from_term(host, &term);
        self.substitute_work_with_s(&mut queue);
        debug_assert!(self.work_matches_meta_l(host, &term));

        let mut g = BigInt::zero();
        for (_, v) in self.work.iter() {
            debug_assert!(v.is_integer());
            g = if g.is_zero() {
                v.numer().abs()
            } else {
                g.gcd(v.numer())
            };
            if g.is_one() {
                break;
            }
        }
        if g.is_one() {
            return false;
        }
        if g.is_zero() {
            self.handle_constant_term(host, j);
            return !self.infeas_explanation.is_empty();
        }
        trace!(column = j, gcd = %g, "nontrivial gcd after substitution");
        self.tighten_bounds_for_gcd(host, &g, j, true) || self.tighten_bounds_for_gcd(host, &g, j, false)
    }

    /// Loads the term into the work vector over locals, folding fixed
    /// variables into the running constant; the meta-L starts empty.
    fn fill_work_from_term<H: LraHost>(&mut self, host: &H, term: &[(ColIndex, BigRational)]) {
        self.work.clear();
        self.work.resize(self.e_matrix.column_count());
        self.work_c = BigRational::zero();
        self.tmp_l = LinExpr::new();
        for (col, a) in term {
            debug_assert!(a.is_integer());
            if host.column_is_fixed(*col) {
                self.work_c += a * host.lower_bound_value(*col);
            } else {
                let local = self.var_register.add_external(*col);
                self.e_matrix.add_columns_up_to(local);
                self.work.set(local, a.clone());
            }
        }
    }

    /// Pops substitutable variables off the queue and replaces each
    /// through its substitution row, tracking the combination in the
    /// meta-L and the constant in `work_c`.
    fn substitute_work_with_s(&mut self, queue: &mut VecDeque<usize>) {
        while let Some(k) = queue.pop_front() {
            if self.work.is_zero_at(k) {
                continue;
            }
            let ei = self.sub_index(k);
            // fresh-definition rows also serve as substitutions
            debug_assert_ne!(self.entries[ei].status, EntryStatus::Queued);
            let coeff = self.work.take(k);
            let k_coeff = self
                .e_matrix
                .get(ei, k)
                .cloned()
                .expect("substitution row lost its pivot");
            debug_assert!(k_coeff.abs().is_one());
            let alpha = if k_coeff.is_one() { -coeff } else { coeff };
            let cells: Vec<(usize, BigInt)> = self
                .e_matrix
                .row(ei)
                .iter()
                .filter(|cell| cell.var != k)
                .map(|cell| (cell.var, cell.coeff.clone()))
                .collect();
            for (jv, v) in cells {
                self.work
                    .add(jv, &alpha * BigRational::from_integer(v));
                if !self.is_fresh_var(jv) && !self.work.is_zero_at(jv) && self.can_substitute(jv) {
                    queue.push_back(jv);
                }
            }
            self.work_c += &alpha * &self.entries[ei].c;
            let l_row = self.l_expr_from_row(ei);
            self.tmp_l.add_scaled(&alpha, &l_row);
        }
    }

    /// Only the constant survived the substitution; any bound on `j`
    /// excluded by it is an outright conflict.
    fn handle_constant_term<H: LraHost>(&mut self, host: &mut H, j: ColIndex) {
        if self.work_c.is_zero() {
            return;
        }
        if let Some((rs, strict, _)) = host.bound_of_kind(j, BoundKind::LessOrEqual)
            && (self.work_c > rs || (strict && self.work_c == rs))
        {
            self.explain_constant_conflict(host, j);
            return;
        }
        if let Some((rs, strict, _)) = host.bound_of_kind(j, BoundKind::GreaterOrEqual)
            && (self.work_c < rs || (strict && self.work_c == rs))
        {
            self.explain_constant_conflict(host, j);
        }
    }

    fn explain_constant_conflict<H: LraHost>(&mut self, host: &mut H, j: ColIndex) {
        let term_expr = term_as_expr(host, j);
        let fixed_in_term = self.explain_fixed(host, &term_expr);
        let opened = self.open_meta_l(host, &self.tmp_l);
        let fixed_in_ml = self.explain_fixed(host, &opened);
        let mut dep = host.join_deps(fixed_in_term, fixed_in_ml);
        let witnesses = host.bound_constraint_witnesses_for_column(j);
        dep = host.join_deps(dep, witnesses);
        self.infeas_explanation.extend(host.flatten_dep(dep));
    }

    /// Rounds the bound of the requested side to the lattice
    /// `g*Z + m_c` when it is off-lattice. Returns true on conflict.
    fn tighten_bounds_for_gcd<H: LraHost>(
        &mut self,
        host: &mut H,
        g: &BigInt,
        j: ColIndex,
        is_upper: bool,
    ) -> bool {
        debug_assert!(!g.is_zero());
        let kind = if is_upper {
            BoundKind::LessOrEqual
        } else {
            BoundKind::GreaterOrEqual
        };
        let Some((rs, _, b_dep)) = host.bound_of_kind(j, kind) else {
            return false;
        };
        let g_rat = BigRational::from_integer(g.clone());
        let shifted = (rs - &self.work_c) / &g_rat;
        if shifted.is_integer() {
            return false;
        }
        self.push_tightened_bound(host, &g_rat, j, &shifted, is_upper, b_dep)
    }

    /// `x_j = g*t + m_c`, so `t <= floor((ub - m_c)/g)` rounds the
    /// upper bound down to `g*floor(..) + m_c` (dually with `ceil` for
    /// the lower). Returns true on conflict.
    fn push_tightened_bound<H: LraHost>(
        &mut self,
        host: &mut H,
        g: &BigRational,
        j: ColIndex,
        shifted: &BigRational,
        is_upper: bool,
        prev_dep: Dep,
    ) -> bool {
        let rounded = if is_upper {
            shifted.floor()
        } else {
            shifted.ceil()
        };
        let bound = g * rounded + &self.work_c;
        let kind = if is_upper {
            BoundKind::LessOrEqual
        } else {
            BoundKind::GreaterOrEqual
        };
        let opened = self.open_meta_l(host, &self.tmp_l);
        let fixed_in_ml = self.explain_fixed(host, &opened);
        let mut dep = host.join_deps(prev_dep, fixed_in_ml);
        let j_bound_dep = host.column_bound_witness(j, kind);
        dep = host.join_deps(dep, j_bound_dep);
        let term_expr = term_as_expr(host, j);
        let fixed_in_term = self.explain_fixed(host, &term_expr);
        dep = host.join_deps(dep, fixed_in_term);
        let witnesses = host.bound_constraint_witnesses_for_column(j);
        dep = host.join_deps(dep, witnesses);

        trace!(column = j, bound = %bound, is_upper, "pushing tightened bound");
        host.update_column_type_and_bound(j, kind, bound, dep);
        if host.column_is_fixed(j) {
            self.note_fixed_column(j);
        }
        let st = host.find_feasible_solution();
        if st.is_feasible() || st == LpStatus::Cancelled {
            return false;
        }
        self.infeas_explanation.clear();
        self.infeas_explanation
            .extend(host.infeasibility_explanation());
        true
    }

    /// The work vector plus meta-L stay two views of the same object:
    /// fixing the term plus the opened meta-L equals the substituted
    /// work vector translated back to host columns.
    #[cfg(debug_assertions)]
    fn work_matches_meta_l<H: LraHost>(&self, host: &H, term: &[(ColIndex, BigRational)]) -> bool {
        let mut lhs = LinExpr::new();
        for (col, a) in term {
            lhs.add_monomial(a.clone(), *col);
        }
        let opened = self.open_meta_l(host, &self.tmp_l);
        lhs.add_scaled(&BigRational::one(), &opened);
        let lhs = self.fix_vars(host, &lhs);

        let mut work_term = LinExpr::new();
        for (local, v) in self.work.iter() {
            work_term.add_monomial(v.clone(), local);
        }
        *work_term.constant_mut() = self.work_c.clone();
        // fold on this side too: an earlier push in the same scan may
        // have fixed a column that substitution re-introduces
        let rhs = self.fix_vars(
            host,
            &self.term_to_external(&self.remove_fresh_vars(&work_term)),
        );
        lhs == rhs
    }

    #[cfg(not(debug_assertions))]
    fn work_matches_meta_l<H: LraHost>(&self, _host: &H, _term: &[(ColIndex, BigRational)]) -> bool {
        true
    }
}

fn term_as_expr<H: LraHost>(host: &H, j: ColIndex) -> LinExpr {
    let mut t = LinExpr::new();
    for (col, a) in host.term(j) {
        t.add_monomial(a.clone(), *col);
    }
    t
}
