//! Branch-and-bound over integer-infeasible basis columns.
//!
//! The branch stack mirrors the host's push/pop depth. A branch that
//! conflicts is flipped in place and marked fully explored; once both
//! sides of a prefix are exhausted the stack unwinds and the collected
//! evidence becomes the conflict explanation.

use super::{CheckResult, DioSolver};
use crate::host::{BoundKind, ColIndex, LpStatus, LraHost};
use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use tracing::trace;

/// One case split: `x_j <= rs` (left) or `x_j >= rs + 1` (right).
#[derive(Debug, Clone)]
pub(crate) struct Branch {
    pub j: ColIndex,
    pub rs: BigRational,
    pub left: bool,
    pub fully_explored: bool,
}

impl Branch {
    fn flip(&mut self) {
        debug_assert!(!self.fully_explored);
        self.left = !self.left;
        self.fully_explored = true;
    }
}

/// Running averages of the integer-infeasibility count seen after
/// exploring each side of a column.
#[derive(Debug, Clone, Default)]
pub(crate) struct BranchScore {
    left_sum: u64,
    left_count: u64,
    right_sum: u64,
    right_count: u64,
}

impl BranchScore {
    fn avg(sum: u64, count: u64) -> f64 {
        if count == 0 {
            f64::INFINITY
        } else {
            sum as f64 / count as f64
        }
    }

    pub fn score(&self) -> f64 {
        Self::avg(self.left_sum, self.left_count).min(Self::avg(self.right_sum, self.right_count))
    }

    pub fn record(&mut self, left: bool, int_inf: u64) {
        if left {
            self.left_sum += int_inf;
            self.left_count += 1;
        } else {
            self.right_sum += int_inf;
            self.right_count += 1;
        }
    }
}

impl DioSolver {
    /// Case-splits until every integer variable is feasible, both sides
    /// of the whole stack are exhausted, or the iteration budget runs
    /// out.
    pub(crate) fn branching_on_undef<H: LraHost>(&mut self, host: &mut H) -> CheckResult {
        self.explanation_of_branches.clear();
        let mut need_create_branch = true;
        let mut iterations = 0;
        loop {
            iterations += 1;
            if iterations >= self.branch_iteration_limit {
                break;
            }
            if host.is_cancelled() {
                self.undo_branching(host);
                return CheckResult::Cancelled;
            }
            self.stats.branch_iterations += 1;
            if need_create_branch {
                if !self.push_branch(host) {
                    self.undo_branching(host);
                    self.stats.branching_sats += 1;
                    return CheckResult::Sat;
                }
                need_create_branch = false;
            }
            self.lra_push(host);

            let top = self
                .branch_stack
                .last()
                .cloned()
                .expect("branch stack empty while exploring");
            if self.add_var_bound_for_branch(host, &top) == CheckResult::Conflict {
                self.undo_explored_branches(host);
                if self.branch_stack.is_empty() {
                    self.stats.branching_infeasibles += 1;
                    self.transfer_explanations_from_closed_branches(host);
                    return CheckResult::Conflict;
                }
                if let Some(b) = self.branch_stack.last_mut() {
                    b.flip();
                }
                self.lra_pop(host);
                continue;
            }

            let st = host.find_feasible_solution();
            trace!(?st, depth = self.branch_stack.len(), "explored branch");
            if st.is_feasible() {
                let int_inf = self.count_int_infeasible(host);
                if int_inf == 0 {
                    self.undo_branching(host);
                    self.stats.branching_sats += 1;
                    return CheckResult::Sat;
                }
                let top = self
                    .branch_stack
                    .last()
                    .cloned()
                    .expect("branch stack empty after exploration");
                self.record_branch_stats(&top, int_inf as u64);
                need_create_branch = true;
            } else {
                if st == LpStatus::Cancelled {
                    self.undo_branching(host);
                    return CheckResult::Cancelled;
                }
                self.collect_evidence(host);
                self.undo_explored_branches(host);
                if self.branch_stack.is_empty() {
                    self.stats.branching_infeasibles += 1;
                    self.transfer_explanations_from_closed_branches(host);
                    return CheckResult::Conflict;
                }
                self.lra_pop(host);
                if let Some(b) = self.branch_stack.last_mut() {
                    b.flip();
                }
            }
        }
        self.undo_branching(host);
        CheckResult::Undef
    }

    /// Creates and stacks a branch; false means no integer-infeasible
    /// column exists, i.e. the state is satisfying.
    fn push_branch<H: LraHost>(&mut self, host: &mut H) -> bool {
        let Some(branch) = self.create_branch(host) else {
            return false;
        };
        trace!(column = branch.j, rs = %branch.rs, left = branch.left, "created branch");
        self.branch_stack.push(branch);
        self.stats.branching_depth = self.stats.branching_depth.max(self.branch_stack.len());
        true
    }

    /// Picks the integer-infeasible basis column with the smallest
    /// score, random tie-break, and splits at the floor of its value.
    fn create_branch<H: LraHost>(&mut self, host: &mut H) -> Option<Branch> {
        let mut best: Option<ColIndex> = None;
        let mut score = f64::INFINITY;
        let mut seen = 0u64;
        for j in host.basis_columns() {
            if !host.column_is_int_infeasible(j) {
                continue;
            }
            let sc = self.branch_score(j);
            let tie = sc == score && {
                seen += 1;
                host.random_next() % seen == 0
            };
            if sc < score || tie {
                score = sc;
                best = Some(j);
            }
        }
        let j = best?;
        Some(Branch {
            j,
            rs: host.column_value(j).floor(),
            left: host.random_next() % 2 == 0,
            fully_explored: false,
        })
    }

    fn branch_score(&mut self, j: ColIndex) -> f64 {
        if j >= self.branch_scores.len() {
            self.branch_scores.resize(j + 1, BranchScore::default());
        }
        self.branch_scores[j].score()
    }

    fn record_branch_stats(&mut self, b: &Branch, int_inf: u64) {
        if b.j >= self.branch_scores.len() {
            self.branch_scores.resize(b.j + 1, BranchScore::default());
        }
        self.branch_scores[b.j].record(b.left, int_inf);
    }

    /// Asserts the branch bound; when that fixes a substituted column,
    /// checks the substitution row's gcd against the new constant.
    fn add_var_bound_for_branch<H: LraHost>(&mut self, host: &mut H, b: &Branch) -> CheckResult {
        if b.left {
            host.add_var_bound(b.j, BoundKind::LessOrEqual, b.rs.clone());
        } else {
            host.add_var_bound(
                b.j,
                BoundKind::GreaterOrEqual,
                &b.rs + BigRational::one(),
            );
        }
        if host.column_is_fixed(b.j) {
            self.note_fixed_column(b.j);
            let Some(local) = self.var_register.local(b.j) else {
                return CheckResult::Undef;
            };
            if self.can_substitute(local) && self.fixing_breaks_row(host, local) {
                let ml = self.l_expr_from_row(self.sub_index(local));
                let dep = self.explain_fixed_in_meta_term(host, &ml);
                self.explanation_of_branches.extend(host.flatten_dep(dep));
                trace!(column = b.j, "fixed column breaks its substitution row");
                return CheckResult::Conflict;
            }
        }
        CheckResult::Undef
    }

    /// Without mutating the row: fold the fixed pivot value into the
    /// constant and test whether the remaining gcd still divides it.
    fn fixing_breaks_row<H: LraHost>(&self, host: &H, local: usize) -> bool {
        let ei = self.sub_index(local);
        let mut g = BigInt::zero();
        let mut c = self.entries[ei].c.clone();
        for cell in self.e_matrix.row(ei) {
            if cell.var == local {
                debug_assert!(cell.coeff.abs().is_one());
                let ext = self
                    .local_to_column(local)
                    .expect("fixed local without a host column");
                c += BigRational::from_integer(cell.coeff.clone()) * host.lower_bound_value(ext);
                continue;
            }
            g = if g.is_zero() {
                cell.coeff.abs()
            } else {
                g.gcd(&cell.coeff)
            };
            if g.is_one() {
                return false;
            }
        }
        if g.is_zero() {
            return !c.is_zero();
        }
        !(c / BigRational::from_integer(g)).is_integer()
    }

    fn count_int_infeasible<H: LraHost>(&self, host: &H) -> usize {
        host.basis_columns()
            .into_iter()
            .filter(|&j| host.column_is_int_infeasible(j))
            .count()
    }

    fn collect_evidence<H: LraHost>(&mut self, host: &H) {
        let ex = host.infeasibility_explanation();
        self.infeas_explanation.clear();
        self.infeas_explanation.extend(ex.iter().copied());
        self.explanation_of_branches.extend(ex);
    }

    /// Pops every fully-explored prefix of the stack.
    fn undo_explored_branches<H: LraHost>(&mut self, host: &mut H) {
        while self
            .branch_stack
            .last()
            .is_some_and(|b| b.fully_explored)
        {
            self.branch_stack.pop();
            self.lra_pop(host);
        }
    }

    fn transfer_explanations_from_closed_branches<H: LraHost>(&mut self, host: &H) {
        self.infeas_explanation.clear();
        let collected = std::mem::take(&mut self.explanation_of_branches);
        for ci in &collected {
            if host.constraint_is_valid(*ci) {
                self.infeas_explanation.push(*ci);
            }
        }
        self.explanation_of_branches = collected;
    }

    fn lra_push<H: LraHost>(&mut self, host: &mut H) {
        self.lra_level += 1;
        host.push();
        self.push_scope();
        debug_assert_eq!(self.lra_level, self.branch_stack.len());
    }

    fn lra_pop<H: LraHost>(&mut self, host: &mut H) {
        debug_assert!(self.lra_level > 0);
        self.lra_level -= 1;
        host.pop();
        self.pop_scope();
        host.find_feasible_solution();
    }

    /// Unwinds every branch scope and restores host feasibility.
    fn undo_branching<H: LraHost>(&mut self, host: &mut H) {
        while self.lra_level > 0 {
            self.lra_level -= 1;
            host.pop();
            self.pop_scope();
        }
        host.find_feasible_solution();
    }
}
