//! The eliminate/substitute loop over the queued rows.
//!
//! Each step picks the queued row whose minimal absolute coefficient is
//! smallest-id-tie-broken; a unit coefficient promotes the row to a
//! substitution, anything larger splits the row through a fresh
//! variable (step 7 of the solve-and-substitute procedure). The
//! measure `(|queue|, sum of minimal coefficients)` decreases
//! lexicographically, so the loop terminates.

use super::normalize::NormalizeOutcome;
use super::{CheckResult, DioSolver, Entry, EntryStatus, FreshDefinition};
use crate::host::LraHost;
use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use tracing::trace;

impl DioSolver {
    /// Drains the queue: normalize every queued row, then rewrite one,
    /// until the queue is empty or something fails.
    pub(crate) fn process_queue<H: LraHost>(&mut self, host: &H) -> CheckResult {
        while !self.queued.is_empty() {
            if host.is_cancelled() {
                return CheckResult::Cancelled;
            }
            match self.normalize_queue_by_gcd() {
                NormalizeOutcome::Ok => {}
                NormalizeOutcome::Cut => {
                    self.stats.cut_from_proofs += 1;
                    return CheckResult::Branch;
                }
                NormalizeOutcome::Conflict => {
                    self.stats.normalize_conflicts += 1;
                    return CheckResult::Conflict;
                }
            }
            self.rewrite_one();
            if self.conflict_index.is_some() {
                self.stats.rewrite_conflicts += 1;
                return CheckResult::Conflict;
            }
        }
        CheckResult::Undef
    }

    /// One rewrite step: retire empty rows, then either promote the
    /// head row to a substitution or split it on a fresh variable.
    fn rewrite_one(&mut self) {
        let h = loop {
            let Some(ei) = self.queued.pop_front() else {
                return;
            };
            if self.e_matrix.row_is_empty(ei) {
                if self.entries[ei].c.is_zero() {
                    self.retire_queued_row(ei);
                    continue;
                }
                // 0 = c with c != 0
                self.queued.push_front(ei);
                self.conflict_index = Some(ei);
                return;
            }
            self.queued.push_front(ei);
            break ei;
        };
        let (ahk, k, k_sign) = self.find_minimal_abs_coeff(h);
        trace!(row = h, var = k, coeff = %ahk, sign = k_sign, "rewrite step");
        if ahk.is_one() {
            self.move_entry_to_substitutions(k, h);
            self.eliminate_var_in_queued(h, k, k_sign);
        } else {
            self.fresh_var_step(h, k, &ahk, k_sign);
        }
    }

    /// The entry with minimal `|coeff|`, ties broken by smaller local
    /// id. Returns `(|coeff|, var, sign)`.
    fn find_minimal_abs_coeff(&self, ei: usize) -> (BigInt, usize, i8) {
        let mut best: Option<(BigInt, usize, i8)> = None;
        for cell in self.e_matrix.row(ei) {
            let t = cell.coeff.abs();
            let better = match &best {
                None => true,
                Some((bt, bk, _)) => t < *bt || (t == *bt && cell.var < *bk),
            };
            if better {
                let sign = if cell.coeff.is_negative() { -1 } else { 1 };
                let done = t.is_one();
                best = Some((t, cell.var, sign));
                if done {
                    break;
                }
            }
        }
        best.expect("minimal coefficient of an empty row")
    }

    /// Row `ei` contains variable `j` with coefficient `j_sign` (±1);
    /// kill `j` in every other queued row.
    pub(crate) fn eliminate_var_in_queued(&mut self, ei: usize, j: usize, j_sign: i8) {
        debug_assert_eq!(
            self.e_matrix.get(ei, j),
            Some(&BigInt::from(j_sign)),
            "pivot coefficient must be ±1"
        );
        let rows: Vec<usize> = self
            .e_matrix
            .column_rows(j)
            .into_iter()
            .filter(|&i| i != ei && self.entries[i].status == EntryStatus::Queued)
            .collect();
        let c_e = self.entries[ei].c.clone();
        let sign = BigInt::from(j_sign);
        for i in rows {
            let coeff = self
                .e_matrix
                .get(i, j)
                .cloned()
                .expect("column index out of date");
            let factor = -(&sign * &coeff);
            self.entries[i].c += BigRational::from_integer(factor.clone()) * &c_e;
            self.e_matrix.pivot_row_to_row(ei, i, j);
            self.l_matrix
                .add_rows(&BigRational::from_integer(factor), ei, i);
        }
    }

    /// Step 7: no unit coefficient in row `h`. Fold the sign of the
    /// minimal coefficient into the row, split every coefficient `b`
    /// as `b = q*a + r` with `0 <= r < a`, move the `q`-parts plus the
    /// pivot into a fresh definition row, and keep the residue (plus
    /// `a * xt`) in `h`.
    fn fresh_var_step(&mut self, h: usize, k: usize, ahk: &BigInt, k_sign: i8) {
        if k_sign < 0 {
            let minus_one = BigInt::from(-1);
            self.e_matrix.multiply_row(h, &minus_one);
            self.l_matrix
                .multiply_row(h, &BigRational::from_integer(minus_one));
            let c = -self.entries[h].c.clone();
            self.entries[h].c = c;
        }
        let a = ahk.clone();
        debug_assert!(a.is_positive());
        let a_rat = BigRational::from_integer(a.clone());

        let old_cells: Vec<(usize, BigInt)> = self
            .e_matrix
            .row(h)
            .iter()
            .map(|cell| (cell.var, cell.coeff.clone()))
            .collect();
        self.e_matrix.clear_row(h);

        let xt = self.var_register.add_fresh();
        self.e_matrix.add_columns_up_to(xt);
        let fr = self.e_matrix.add_row();
        self.l_matrix.add_row();
        debug_assert_eq!(fr, self.entries.len());

        let q_c = (&self.entries[h].c / &a_rat).floor();
        let r_c = &self.entries[h].c - &q_c * &a_rat;
        self.entries[h].c = r_c;
        self.e_matrix.add_new_element(h, xt, a.clone());

        self.entries.push(Entry {
            c: q_c,
            status: EntryStatus::Detached,
        });
        self.e_matrix.add_new_element(fr, xt, BigInt::from(-1));
        self.e_matrix.add_new_element(fr, k, BigInt::one());
        for (i, ai) in old_cells {
            if i == k {
                debug_assert_eq!(ai, a);
                continue;
            }
            let (q, r) = ai.div_mod_floor(&a);
            debug_assert!(!r.is_negative() && r < a);
            if !r.is_zero() {
                self.e_matrix.add_new_element(h, i, r);
            }
            if !q.is_zero() {
                self.e_matrix.add_new_element(fr, i, q);
            }
        }

        if k >= self.subst_of.len() {
            self.subst_of.resize(k + 1, None);
        }
        self.subst_of[k] = Some(fr);
        self.register_fresh_definition(xt, FreshDefinition { row: fr, origin: h });
        trace!(row = h, fresh_row = fr, fresh = xt, var = k, "fresh variable step");
        self.eliminate_var_in_queued(fr, k, 1);
    }
}
