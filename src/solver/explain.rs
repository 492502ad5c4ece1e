//! Conflict explanations.
//!
//! An L-row certifies its E-row as a combination of host terms; the
//! explanation of the row is the union of the bound witnesses of every
//! fixed variable appearing in that combination once the terms are
//! expanded.

use super::DioSolver;
use crate::expr::LinExpr;
use crate::host::{Dep, Explanation, LraHost};

impl DioSolver {
    /// Fills `out` with the constraint indices explaining the last
    /// conflict: either the certificate of the conflicting row, or the
    /// infeasibility harvested from tightening/branching.
    pub fn explain<H: LraHost>(&self, host: &mut H, out: &mut Explanation) {
        match self.conflict_index {
            Some(ei) => {
                debug_assert!(out.is_empty());
                let ml = self.l_expr_from_row(ei);
                let dep = self.explain_fixed_in_meta_term(host, &ml);
                out.extend(host.flatten_dep(dep));
            }
            None => {
                for ci in self.infeas_explanation.iter() {
                    out.push(ci);
                }
            }
        }
    }

    /// Witnesses of the fixed variables in an opened meta-L term.
    pub(crate) fn explain_fixed_in_meta_term<H: LraHost>(
        &self,
        host: &mut H,
        ml: &LinExpr,
    ) -> Dep {
        let opened = self.open_meta_l(host, ml);
        self.explain_fixed(host, &opened)
    }

    /// Joins the bound witnesses of every fixed column of `t`.
    pub(crate) fn explain_fixed<H: LraHost>(&self, host: &mut H, t: &LinExpr) -> Dep {
        let mut cols: Vec<usize> = t.vars().collect();
        cols.sort_unstable();
        let mut dep: Dep = None;
        for col in cols {
            if host.column_is_fixed(col) {
                let witness = host.bound_constraint_witnesses_for_column(col);
                dep = host.join_deps(dep, witness);
            }
        }
        dep
    }
}
