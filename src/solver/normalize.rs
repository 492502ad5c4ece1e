//! Normalization of queued rows by the gcd of their coefficients.

use super::DioSolver;
use crate::host::PendingCut;
use num_rational::BigRational;
use num_traits::{One, Zero};
use tracing::trace;

/// Outcome of a normalization sweep over the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NormalizeOutcome {
    Ok,
    /// The gcd does not divide the constant; the row is the conflict.
    Conflict,
    /// Same, but a cut from the failed proof was prepared instead.
    Cut,
}

impl DioSolver {
    /// Divides every queued row by the gcd of its coefficients; a row
    /// whose constant is not divisible is unsatisfiable over the
    /// integers. Returns the first failing row via `conflict_index`.
    pub(crate) fn normalize_queue_by_gcd(&mut self) -> NormalizeOutcome {
        let rows: Vec<usize> = self.queued.iter().copied().collect();
        for ei in rows {
            let outcome = self.normalize_row_by_gcd(ei);
            if outcome != NormalizeOutcome::Ok {
                self.conflict_index = Some(ei);
                return outcome;
            }
        }
        NormalizeOutcome::Ok
    }

    fn normalize_row_by_gcd(&mut self, ei: usize) -> NormalizeOutcome {
        let g = self.gcd_of_row(ei);
        if g.is_zero() || g.is_one() {
            return NormalizeOutcome::Ok;
        }
        let g_rat = BigRational::from_integer(g.clone());
        let c_g = &self.entries[ei].c / &g_rat;
        if c_g.is_integer() {
            self.e_matrix.divide_row(ei, &g);
            self.entries[ei].c = c_g;
            self.l_matrix.divide_row(ei, &g_rat);
            return NormalizeOutcome::Ok;
        }
        trace!(row = ei, gcd = %g, "gcd does not divide the constant");
        // the equality sum((a_j/g) x_j) = -c/g has no integer solution;
        // periodically turn it into a split instead of a conflict
        if self.stats.calls % self.config.cut_from_proof_period == 0
            && !self.row_has_fresh_var(ei)
        {
            self.prepare_cut_from_proof(ei, &g_rat, &c_g);
            return NormalizeOutcome::Cut;
        }
        NormalizeOutcome::Conflict
    }

    /// `sum((a_j/g) * x_j) <= floor(-c/g)`, stated over host columns.
    fn prepare_cut_from_proof(&mut self, ei: usize, g: &BigRational, c_g: &BigRational) {
        let mut coeffs = Vec::new();
        for cell in self.e_matrix.row(ei) {
            let ext = self
                .local_to_column(cell.var)
                .expect("cut rows must be free of fresh variables");
            coeffs.push((ext, BigRational::from_integer(cell.coeff.clone()) / g));
        }
        let offset = (-c_g).floor();
        trace!(row = ei, offset = %offset, "prepared cut from proof");
        self.pending_cut = Some(PendingCut {
            coeffs,
            offset,
            is_upper: true,
        });
    }

}
