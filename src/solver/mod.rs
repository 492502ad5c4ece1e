//! Solve-and-substitute engine for integer linear equalities.
//!
//! The solver holds two sparse matrices over a shared row space: the
//! E-matrix of normalized integer equalities (`sum(E[i][j] * x_j) + c_i
//! = 0` over local variables) and the L-matrix of certificate rows
//! recording how each equality is a linear combination of
//! originally-asserted host terms. Rows move from the queued set into
//! the substitution set as the rewrite engine eliminates
//! unit-coefficient variables; the substitution set then drives bound
//! tightening and branch-and-bound on the host.

mod branch;
mod explain;
mod normalize;
mod rewrite;
mod tighten;

use crate::expr::LinExpr;
use crate::host::{ColIndex, ConstraintIndex, Explanation, LraHost, PendingCut};
use crate::matrix::SparseMatrix;
use crate::var_register::VarRegister;
use crate::work_vector::WorkVector;
use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use tracing::trace;

pub(crate) use branch::{Branch, BranchScore};

/// Verdict of a [`DioSolver::check`] round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    /// Branch-and-bound found every host integer variable feasible.
    Sat,
    /// Arithmetic infeasibility; [`DioSolver::explain`] has witnesses.
    Conflict,
    /// A cut is pending; the host consumes [`DioSolver::pending_cut`].
    Branch,
    /// Inconclusive; the iteration budget halves for the next round.
    Undef,
    /// The host's cancel flag was observed; state stays consistent.
    Cancelled,
}

/// Row status: the F/S partition of the solve-and-substitute loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Queued for rewriting (set F).
    Queued,
    /// Serves as a rewrite rule eliminating one variable (set S).
    Substitution,
    /// Neither: fresh-definition rows and retired empty rows.
    Detached,
}

/// Per-row bookkeeping: the constant of the equality and the row status.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub c: BigRational,
    pub status: EntryStatus,
}

/// Where a fresh variable is defined and which row spawned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreshDefinition {
    /// Row whose E-row contains the fresh variable with coefficient -1.
    pub row: usize,
    /// Row whose rewrite introduced the fresh variable.
    pub origin: usize,
}

/// Tuning knobs.
#[derive(Debug, Clone)]
pub struct DioConfig {
    /// Branch-and-bound iteration budget for the first `check`.
    pub branch_iteration_limit: usize,
    /// The budget never halves below this.
    pub branch_iteration_floor: usize,
    /// Emit a cut from a failed gcd check every this many calls.
    pub cut_from_proof_period: usize,
}

impl Default for DioConfig {
    fn default() -> Self {
        Self {
            branch_iteration_limit: 100,
            branch_iteration_floor: 5,
            cut_from_proof_period: 4,
        }
    }
}

/// Counters, readable by the host.
#[derive(Debug, Clone, Default)]
pub struct DioStats {
    pub calls: usize,
    pub cut_from_proofs: usize,
    pub normalize_conflicts: usize,
    pub rewrite_conflicts: usize,
    pub tighten_conflicts: usize,
    pub branch_iterations: usize,
    pub branching_sats: usize,
    pub branching_infeasibles: usize,
    pub branching_depth: usize,
}

/// The Diophantine equality solver.
///
/// Owns the row store, the substitution map, and the branch stack;
/// reads and mutates the host only through [`LraHost`].
#[derive(Debug)]
pub struct DioSolver {
    var_register: VarRegister,
    e_matrix: SparseMatrix<BigInt>,
    l_matrix: SparseMatrix<BigRational>,
    entries: Vec<Entry>,
    /// Set F as an ordered list.
    queued: VecDeque<usize>,
    /// Set S as an ordered list.
    substitutions: VecDeque<usize>,
    /// `subst_of[k]` is the substitution row eliminating local `k`.
    subst_of: Vec<Option<usize>>,
    /// Indexed by fresh local id.
    fresh_definitions: Vec<Option<FreshDefinition>>,

    pub(crate) conflict_index: Option<usize>,
    pub(crate) infeas_explanation: Explanation,
    pending_cut: Option<PendingCut>,

    /// Work vector for substitution passes, keyed by local id.
    pub(crate) work: WorkVector<BigRational>,
    /// Constant accumulated alongside `work`.
    pub(crate) work_c: BigRational,
    /// Meta-L: the combination of substitution rows applied to `work`.
    pub(crate) tmp_l: LinExpr,
    /// Work vector for recalculation, keyed by host column.
    work_ext: WorkVector<BigRational>,

    changed_columns: FxHashSet<ColIndex>,
    /// `columns_to_terms[j]`: term columns whose definition mentions `j`.
    columns_to_terms: FxHashMap<ColIndex, FxHashSet<ColIndex>>,
    pending_add_terms: Vec<ColIndex>,
    active_terms: FxHashSet<ColIndex>,
    /// Columns fixed per open scope, re-queued as changed on pop.
    scope_frames: Vec<Vec<ColIndex>>,

    pub(crate) branch_stack: Vec<Branch>,
    pub(crate) branch_scores: Vec<BranchScore>,
    pub(crate) explanation_of_branches: Vec<ConstraintIndex>,
    pub(crate) lra_level: usize,
    pub(crate) branch_iteration_limit: usize,

    config: DioConfig,
    stats: DioStats,
}

/// Monomials of the equality `term(j) - j = 0`: the definition cells
/// plus the term column itself with coefficient -1.
pub(crate) fn extended_term_cells<'a, H: LraHost>(
    host: &'a H,
    j: ColIndex,
) -> impl Iterator<Item = (ColIndex, BigRational)> + 'a {
    host.term(j)
        .iter()
        .cloned()
        .chain(std::iter::once((j, -BigRational::one())))
}

impl Default for DioSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DioSolver {
    pub fn new() -> Self {
        Self::with_config(DioConfig::default())
    }

    pub fn with_config(config: DioConfig) -> Self {
        Self {
            var_register: VarRegister::new(),
            e_matrix: SparseMatrix::new(),
            l_matrix: SparseMatrix::new(),
            entries: Vec::new(),
            queued: VecDeque::new(),
            substitutions: VecDeque::new(),
            subst_of: Vec::new(),
            fresh_definitions: Vec::new(),
            conflict_index: None,
            infeas_explanation: Explanation::new(),
            pending_cut: None,
            work: WorkVector::new(),
            work_c: BigRational::zero(),
            tmp_l: LinExpr::new(),
            work_ext: WorkVector::new(),
            changed_columns: FxHashSet::default(),
            columns_to_terms: FxHashMap::default(),
            pending_add_terms: Vec::new(),
            active_terms: FxHashSet::default(),
            scope_frames: Vec::new(),
            branch_stack: Vec::new(),
            branch_scores: Vec::new(),
            explanation_of_branches: Vec::new(),
            lra_level: 0,
            branch_iteration_limit: config.branch_iteration_limit,
            config,
            stats: DioStats::default(),
        }
    }

    pub fn stats(&self) -> &DioStats {
        &self.stats
    }

    pub fn config(&self) -> &DioConfig {
        &self.config
    }

    /// The cut produced by the last `check` that returned `Branch`.
    pub fn pending_cut(&self) -> Option<&PendingCut> {
        self.pending_cut.as_ref()
    }

    // --- host notifications ---

    /// The host registered a term on column `j`. Ignored unless the
    /// column and every variable of the definition are integer.
    pub fn add_term<H: LraHost>(&mut self, host: &H, j: ColIndex) {
        if !host.column_is_int(j) {
            return;
        }
        if !host.term(j).iter().all(|(col, _)| host.column_is_int(*col)) {
            return;
        }
        self.pending_add_terms.push(j);
    }

    /// The host removed the term on column `j`. Activated terms must be
    /// removed in reverse activation order.
    pub fn remove_term<H: LraHost>(&mut self, host: &H, j: ColIndex) {
        if let Some(pos) = self.pending_add_terms.iter().position(|&t| t == j) {
            self.pending_add_terms.swap_remove(pos);
            return;
        }
        if !self.active_terms.remove(&j) {
            return;
        }
        for (col, _) in extended_term_cells(host, j) {
            if let Some(set) = self.columns_to_terms.get_mut(&col) {
                set.remove(&j);
                if set.is_empty() {
                    self.columns_to_terms.remove(&col);
                }
            }
        }
        self.shrink_row_store(host, j);
    }

    /// A bound on column `j` changed host-side. Only integer columns
    /// that became fixed matter.
    pub fn update_column_bound<H: LraHost>(&mut self, host: &H, j: ColIndex) {
        if !host.column_is_int(j) || !host.column_is_fixed(j) {
            return;
        }
        self.note_fixed_column(j);
    }

    /// Mirror of the host's `push`.
    pub fn push_scope(&mut self) {
        self.scope_frames.push(Vec::new());
    }

    /// Mirror of the host's `pop`: columns fixed inside the scope are
    /// re-queued as changed so their rows get recomputed.
    pub fn pop_scope(&mut self) {
        if let Some(frame) = self.scope_frames.pop() {
            for j in frame {
                self.changed_columns.insert(j);
            }
        }
    }

    pub(crate) fn note_fixed_column(&mut self, j: ColIndex) {
        self.changed_columns.insert(j);
        if let Some(frame) = self.scope_frames.last_mut() {
            frame.push(j);
        }
    }

    // --- the check driver ---

    /// Runs one round: drain pending changes, rewrite, tighten, branch.
    pub fn check<H: LraHost>(&mut self, host: &mut H) -> CheckResult {
        self.stats.calls += 1;
        self.init(host);
        let ret = self.process_queue_and_tighten(host);
        if ret != CheckResult::Undef {
            return ret;
        }
        let ret = self.branching_on_undef(host);
        match ret {
            CheckResult::Sat | CheckResult::Conflict | CheckResult::Cancelled => return ret,
            _ => {}
        }
        self.branch_iteration_limit =
            (self.branch_iteration_limit / 2).max(self.config.branch_iteration_floor);
        CheckResult::Undef
    }

    fn process_queue_and_tighten<H: LraHost>(&mut self, host: &mut H) -> CheckResult {
        let ret = self.process_queue(host);
        if ret != CheckResult::Undef {
            return ret;
        }
        let ret = self.tighten_terms(host);
        if ret == CheckResult::Conflict {
            self.stats.tighten_conflicts += 1;
            return CheckResult::Conflict;
        }
        ret
    }

    fn init<H: LraHost>(&mut self, host: &H) {
        self.pending_cut = None;
        self.conflict_index = None;
        self.infeas_explanation.clear();
        self.branch_stack.clear();
        self.lra_level = 0;
        self.process_changed_columns(host);
        let pending = std::mem::take(&mut self.pending_add_terms);
        for j in pending {
            self.active_terms.insert(j);
            self.fill_entry(host, j);
            self.register_columns_to_term(host, j);
        }
        debug_assert!(self.registration_is_in_sync(host));
        debug_assert!((0..self.entries.len()).all(|i| self.entry_is_consistent(host, i)));
    }

    // --- row creation ---

    /// Activates the term on column `j` as a queued row: the L-row is
    /// `1 * j`, the E-row is the definition with fixed variables folded
    /// into the constant.
    fn fill_entry<H: LraHost>(&mut self, host: &H, j: ColIndex) {
        let ei = self.entries.len();
        self.queued.push_back(ei);
        self.entries.push(Entry {
            c: BigRational::zero(),
            status: EntryStatus::Queued,
        });
        self.l_matrix.add_row();
        self.l_matrix.add_columns_up_to(j);
        self.l_matrix.add_new_element(ei, j, BigRational::one());
        self.e_matrix.add_row();
        let mut c = BigRational::zero();
        for (col, a) in extended_term_cells(host, j) {
            debug_assert!(a.is_integer());
            if host.column_is_fixed(col) {
                c += &a * host.lower_bound_value(col);
            } else {
                let lj = self.var_register.add_external(col);
                self.e_matrix.add_columns_up_to(lj);
                self.e_matrix.add_new_element(ei, lj, a.to_integer());
            }
        }
        self.entries[ei].c = c;
        trace!(row = ei, term = j, "activated term");
        debug_assert!(self.entry_is_consistent(host, ei));
    }

    fn register_columns_to_term<H: LraHost>(&mut self, host: &H, j: ColIndex) {
        for (col, _) in extended_term_cells(host, j) {
            self.columns_to_terms.entry(col).or_default().insert(j);
        }
    }

    // --- locals ---

    pub(crate) fn is_fresh_var(&self, local: usize) -> bool {
        self.var_register.is_fresh(local)
    }

    pub(crate) fn local_to_column(&self, local: usize) -> Option<ColIndex> {
        self.var_register.external(local)
    }

    /// Is local `k` eliminated by some substitution row?
    pub(crate) fn can_substitute(&self, k: usize) -> bool {
        k < self.subst_of.len() && self.subst_of[k].is_some()
    }

    pub(crate) fn sub_index(&self, k: usize) -> usize {
        self.subst_of[k].expect("variable has no substitution row")
    }

    // --- list and status management ---

    fn remove_entry_from_lists(&mut self, ei: usize) {
        match self.entries[ei].status {
            EntryStatus::Queued => self.queued.retain(|&x| x != ei),
            EntryStatus::Substitution => self.substitutions.retain(|&x| x != ei),
            EntryStatus::Detached => {}
        }
    }

    fn add_entry_to_lists(&mut self, ei: usize) {
        match self.entries[ei].status {
            EntryStatus::Queued => self.queued.push_back(ei),
            EntryStatus::Substitution => self.substitutions.push_back(ei),
            EntryStatus::Detached => {}
        }
    }

    /// Reclassifies a row back into the queue, clearing any
    /// substitution entry it served.
    pub(crate) fn move_entry_to_queue(&mut self, ei: usize) {
        if self.entries[ei].status == EntryStatus::Queued {
            return;
        }
        if self.entries[ei].status == EntryStatus::Substitution {
            self.substitutions.retain(|&x| x != ei);
        }
        self.clear_substitutions_of_row(ei);
        self.entries[ei].status = EntryStatus::Queued;
        self.queued.push_back(ei);
    }

    /// Promotes queued row `h` to a substitution row with pivot `k`.
    pub(crate) fn move_entry_to_substitutions(&mut self, k: usize, h: usize) {
        debug_assert_eq!(self.entries[h].status, EntryStatus::Queued);
        self.entries[h].status = EntryStatus::Substitution;
        if k >= self.subst_of.len() {
            self.subst_of.resize(k + 1, None);
        }
        self.subst_of[k] = Some(h);
        self.queued.retain(|&x| x != h);
        self.substitutions.push_back(h);
    }

    /// Retires an empty queued row (zero constant) out of the queue.
    pub(crate) fn retire_queued_row(&mut self, ei: usize) {
        debug_assert_eq!(self.entries[ei].status, EntryStatus::Queued);
        self.entries[ei].status = EntryStatus::Detached;
    }

    fn clear_substitutions_of_row(&mut self, ei: usize) {
        for slot in self.subst_of.iter_mut() {
            if *slot == Some(ei) {
                *slot = None;
            }
        }
    }

    /// Swaps rows `i` and `k` across both matrices and every index that
    /// refers to rows.
    fn transpose_entries(&mut self, i: usize, k: usize) {
        debug_assert_ne!(i, k);
        self.l_matrix.transpose_rows(i, k);
        self.e_matrix.transpose_rows(i, k);
        self.remove_entry_from_lists(i);
        self.remove_entry_from_lists(k);
        self.entries.swap(i, k);
        self.add_entry_to_lists(i);
        self.add_entry_to_lists(k);
        for fd in self.fresh_definitions.iter_mut().flatten() {
            fd.row = transpose_index(fd.row, i, k);
            fd.origin = transpose_index(fd.origin, i, k);
        }
        for slot in self.subst_of.iter_mut() {
            if let Some(r) = slot {
                *r = transpose_index(*r, i, k);
            }
        }
    }

    fn remove_last_entry(&mut self) {
        let ei = self.entries.len() - 1;
        self.remove_entry_from_lists(ei);
        self.clear_substitutions_of_row(ei);
        self.entries.pop();
    }

    // --- change tracking ---

    /// Recomputes every row affected by a changed column and re-queues
    /// it; fresh definitions entangled with affected rows are dropped
    /// (the rewrite engine re-introduces fresh variables on demand).
    fn process_changed_columns<H: LraHost>(&mut self, host: &H) {
        if self.changed_columns.is_empty() {
            return;
        }
        let mut to_recalculate: FxHashSet<usize> = FxHashSet::default();
        let mut changed_terms: FxHashSet<ColIndex> = FxHashSet::default();
        for &j in &self.changed_columns {
            if j >= host.column_count() {
                continue;
            }
            if let Some(terms) = self.columns_to_terms.get(&j) {
                changed_terms.extend(terms.iter().copied());
            }
            if let Some(lj) = self.var_register.local(j) {
                for r in self.e_matrix.column_rows(lj) {
                    to_recalculate.insert(r);
                }
            }
        }
        for &k in &changed_terms {
            if k < self.l_matrix.column_count() {
                for r in self.l_matrix.column_rows(k) {
                    to_recalculate.insert(r);
                }
            }
        }

        let mut fresh_to_remove: Vec<usize> = self
            .fresh_definitions
            .iter()
            .enumerate()
            .filter_map(|(xt, fd)| {
                fd.as_ref().map(|d| (xt, *d)).filter(|(_, d)| {
                    to_recalculate.contains(&d.origin) || to_recalculate.contains(&d.row)
                })
            })
            .map(|(xt, _)| xt)
            .collect();

        while let Some(xt) = fresh_to_remove.pop() {
            let Some(fd) = self.fresh_definitions[xt] else {
                continue;
            };
            let last = self.entries.len() - 1;
            if fd.row != last {
                self.transpose_entries(fd.row, last);
                let had_fr = to_recalculate.remove(&fd.row);
                let had_last = to_recalculate.remove(&last);
                if had_last {
                    to_recalculate.insert(fd.row);
                }
                if had_fr {
                    to_recalculate.insert(last);
                }
            }
            // rows still using the fresh variable are stale now
            if xt < self.e_matrix.column_count() {
                for r in self.e_matrix.column_rows(xt) {
                    to_recalculate.insert(r);
                }
            }
            to_recalculate.remove(&last);
            self.fresh_definitions[xt] = None;
            self.remove_last_entry();
            self.l_matrix.remove_last_row();
            self.e_matrix.remove_last_row();
            trace!(fresh = xt, "dropped fresh definition");
        }

        let mut rows: Vec<usize> = to_recalculate.into_iter().collect();
        rows.sort_unstable();
        for ei in rows {
            if ei >= self.entries.len() {
                continue;
            }
            // recalculating a definition row empties it; drop the record
            for fd in self.fresh_definitions.iter_mut() {
                if let Some(d) = *fd
                    && d.row == ei
                {
                    *fd = None;
                }
            }
            self.recalculate_entry(host, ei);
            self.move_entry_to_queue(ei);
        }
        self.e_matrix.pop_empty_trailing_columns();
        self.var_register.shrink(self.e_matrix.column_count());
        self.l_matrix.pop_empty_trailing_columns();
        self.changed_columns.clear();
    }

    /// Rebuilds E-row `ei` and its constant from the L-row: expand the
    /// combination through host term definitions, fold fixed variables,
    /// and scale by the denominator lcm to restore integrality.
    fn recalculate_entry<H: LraHost>(&mut self, host: &H, ei: usize) {
        self.work_ext.clear();
        self.work_ext.resize(host.column_count());
        let mut c = BigRational::zero();
        let l_cells: Vec<(ColIndex, BigRational)> = self
            .l_matrix
            .row(ei)
            .iter()
            .map(|cell| (cell.var, cell.coeff.clone()))
            .collect();
        for (term_col, lcoeff) in l_cells {
            for (col, a) in extended_term_cells(host, term_col) {
                if host.column_is_fixed(col) {
                    c += &lcoeff * &a * host.lower_bound_value(col);
                } else {
                    self.work_ext.add(col, &lcoeff * &a);
                }
            }
        }
        self.e_matrix.clear_row(ei);
        let mut denom = BigInt::one();
        for (_, v) in self.work_ext.iter() {
            denom = denom.lcm(v.denom());
        }
        if !denom.is_one() {
            let scale = BigRational::from_integer(denom.clone());
            c *= &scale;
            self.l_matrix.multiply_row(ei, &scale);
        }
        self.entries[ei].c = c;
        let cells: Vec<(ColIndex, BigRational)> = self
            .work_ext
            .iter()
            .map(|(j, v)| (j, v.clone()))
            .collect();
        for (ext, v) in cells {
            let scaled = v * BigRational::from_integer(denom.clone());
            debug_assert!(scaled.is_integer());
            let lj = self.var_register.add_external(ext);
            self.e_matrix.add_columns_up_to(lj);
            self.e_matrix.add_new_element(ei, lj, scaled.to_integer());
        }
        self.work_ext.clear();
        trace!(row = ei, "recalculated from certificate");
        debug_assert!(self.entry_is_consistent(host, ei));
    }

    // --- term removal ---

    /// Concentrates the removed term's L-column into the last row, then
    /// drops that row from both matrices. The removed term owns the
    /// last L-column (reverse activation order).
    fn shrink_row_store<H: LraHost>(&mut self, host: &H, term_col: ColIndex) {
        let last = self.l_matrix.row_count() - 1;
        let j = self.l_matrix.column_count() - 1;
        debug_assert_eq!(term_col, j, "terms must be removed in reverse activation order");
        self.eliminate_last_term_column(host, j, last);
        self.l_matrix.remove_last_row();
        self.e_matrix.remove_last_row();
        self.l_matrix.pop_empty_trailing_columns();
        self.e_matrix.pop_empty_trailing_columns();
        self.var_register.shrink(self.e_matrix.column_count());
        for fd in self.fresh_definitions.iter_mut() {
            if let Some(d) = *fd
                && (d.origin == last || d.row == last)
            {
                *fd = None;
            }
        }
        self.remove_last_entry();
        trace!(term = term_col, "removed term and its row");
    }

    fn eliminate_last_term_column<H: LraHost>(&mut self, host: &H, j: ColIndex, last: usize) {
        if self.l_matrix.column(j).is_empty() {
            return;
        }
        if self.l_matrix.get(last, j).is_none() {
            let donor = self.l_matrix.column(j)[0].var;
            self.l_matrix.add_rows(&BigRational::one(), donor, last);
        }
        let alpha = self
            .l_matrix
            .get(last, j)
            .cloned()
            .expect("term column vanished from the last row");
        self.l_matrix.divide_row(last, &alpha);
        let rows_to_change: Vec<usize> = self
            .l_matrix
            .column_rows(j)
            .into_iter()
            .filter(|&r| r != last)
            .collect();
        for &r in &rows_to_change {
            self.l_matrix.pivot_row_to_row(last, r, j);
        }
        for r in rows_to_change {
            self.recalculate_entry(host, r);
            self.move_entry_to_queue(r);
        }
    }

    // --- entry terms and the entry invariant ---

    /// The equality of row `i` as an expression over local variables.
    pub(crate) fn term_from_entry(&self, i: usize) -> LinExpr {
        let mut t = LinExpr::new();
        for cell in self.e_matrix.row(i) {
            t.add_monomial(BigRational::from_integer(cell.coeff.clone()), cell.var);
        }
        *t.constant_mut() = self.entries[i].c.clone();
        t
    }

    /// The certificate of row `i` as an expression over term columns.
    pub(crate) fn l_expr_from_row(&self, i: usize) -> LinExpr {
        let mut t = LinExpr::new();
        for cell in self.l_matrix.row(i) {
            t.add_monomial(cell.coeff.clone(), cell.var);
        }
        t
    }

    /// Expands a combination of term columns into host columns:
    /// `sum(coeff * (term(k) - k))`.
    pub(crate) fn open_meta_l<H: LraHost>(&self, host: &H, ml: &LinExpr) -> LinExpr {
        let mut r = LinExpr::new();
        for (k, coeff) in ml.iter() {
            for (col, a) in extended_term_cells(host, k) {
                r.add_monomial(coeff * &a, col);
            }
        }
        r
    }

    /// Replaces fixed host columns by their values.
    pub(crate) fn fix_vars<H: LraHost>(&self, host: &H, t: &LinExpr) -> LinExpr {
        let mut r = LinExpr::new();
        *r.constant_mut() = t.constant().clone();
        for (col, coeff) in t.iter() {
            if host.column_is_fixed(col) {
                *r.constant_mut() += coeff * host.lower_bound_value(col);
            } else {
                r.add_monomial(coeff.clone(), col);
            }
        }
        r
    }

    /// Substitutes every fresh variable by its defining row.
    pub(crate) fn remove_fresh_vars(&self, term: &LinExpr) -> LinExpr {
        let mut t = term.clone();
        let mut queue: VecDeque<usize> =
            t.vars().filter(|&v| self.is_fresh_var(v)).collect();
        while let Some(xt) = queue.pop_front() {
            let Some(coeff) = t.remove_var(xt) else {
                continue;
            };
            let fd = self.fresh_definitions[xt].expect("fresh variable without definition");
            let mut def = self.term_from_entry(fd.row);
            let pivot = def.remove_var(xt).expect("definition lost its fresh variable");
            debug_assert_eq!(pivot, -BigRational::one());
            // -xt + def = 0, so xt = def
            t.add_scaled(&coeff, &def);
            for v in t.vars().filter(|&v| self.is_fresh_var(v)) {
                if !queue.contains(&v) {
                    queue.push_back(v);
                }
            }
        }
        t
    }

    /// Maps an expression over locals to host columns; fresh locals must
    /// already be expanded away.
    pub(crate) fn term_to_external(&self, t: &LinExpr) -> LinExpr {
        let mut r = LinExpr::new();
        *r.constant_mut() = t.constant().clone();
        for (local, coeff) in t.iter() {
            let ext = self
                .local_to_column(local)
                .expect("fresh local in an external translation");
            r.add_monomial(coeff.clone(), ext);
        }
        r
    }

    /// The central semantic link: translating E-row `i` back to host
    /// columns equals the fixed-variable-substituted expansion of
    /// L-row `i`. Exact only while the change queue is drained, so this
    /// backs the debug assertions at the change-processing boundary.
    pub(crate) fn entry_is_consistent<H: LraHost>(&self, host: &H, i: usize) -> bool {
        let lhs = self.term_to_external(&self.remove_fresh_vars(&self.term_from_entry(i)));
        let rhs = self.fix_vars(host, &self.open_meta_l(host, &self.l_expr_from_row(i)));
        lhs == rhs
    }

    /// Checks the entry invariant on every row, modulo columns that
    /// became fixed after the last change-processing pass (their rows
    /// are recomputed on the next `check`; until then the fold is
    /// applied on the fly to both sides).
    pub fn entries_are_consistent<H: LraHost>(&self, host: &H) -> bool {
        (0..self.entries.len()).all(|i| {
            let lhs = self.fix_vars(
                host,
                &self.term_to_external(&self.remove_fresh_vars(&self.term_from_entry(i))),
            );
            let rhs = self.fix_vars(host, &self.open_meta_l(host, &self.l_expr_from_row(i)));
            lhs == rhs
        })
    }

    fn registration_is_in_sync<H: LraHost>(&self, host: &H) -> bool {
        let mut expected: FxHashMap<ColIndex, FxHashSet<ColIndex>> = FxHashMap::default();
        for k in host.term_columns() {
            if !self.active_terms.contains(&k) {
                continue;
            }
            if !host.column_is_int(k)
                || !host.term(k).iter().all(|(col, _)| host.column_is_int(*col))
            {
                continue;
            }
            for (col, _) in extended_term_cells(host, k) {
                expected.entry(col).or_default().insert(k);
            }
        }
        expected == self.columns_to_terms
    }

    // --- inspection (tests, embedding hosts, logs) ---

    pub fn row_count(&self) -> usize {
        self.entries.len()
    }

    pub fn entry_status(&self, i: usize) -> EntryStatus {
        self.entries[i].status
    }

    pub fn entry_constant(&self, i: usize) -> &BigRational {
        &self.entries[i].c
    }

    /// E-row cells as `(local, coeff)`, sorted by local.
    pub fn e_row(&self, i: usize) -> Vec<(usize, BigInt)> {
        let mut v: Vec<(usize, BigInt)> = self
            .e_matrix
            .row(i)
            .iter()
            .map(|c| (c.var, c.coeff.clone()))
            .collect();
        v.sort_by_key(|(j, _)| *j);
        v
    }

    /// L-row cells as `(term column, coeff)`, sorted by column.
    pub fn l_row(&self, i: usize) -> Vec<(usize, BigRational)> {
        let mut v: Vec<(usize, BigRational)> = self
            .l_matrix
            .row(i)
            .iter()
            .map(|c| (c.var, c.coeff.clone()))
            .collect();
        v.sort_by_key(|(j, _)| *j);
        v
    }

    pub fn queued_rows(&self) -> Vec<usize> {
        self.queued.iter().copied().collect()
    }

    pub fn substitution_rows(&self) -> Vec<usize> {
        self.substitutions.iter().copied().collect()
    }

    /// The substitution row eliminating local `k`, if any.
    pub fn substitution_of(&self, k: usize) -> Option<usize> {
        self.subst_of.get(k).copied().flatten()
    }

    pub fn local_count(&self) -> usize {
        self.var_register.len()
    }

    pub fn local_of_column(&self, j: ColIndex) -> Option<usize> {
        self.var_register.local(j)
    }

    pub fn column_of_local(&self, local: usize) -> Option<ColIndex> {
        self.var_register.external(local)
    }

    pub fn local_is_fresh(&self, local: usize) -> bool {
        self.var_register.is_fresh(local)
    }

    /// Human-readable rendering of a row for logs.
    pub fn entry_to_string(&self, i: usize) -> String {
        format!(
            "row {}: {} = 0  [{} | {:?}]",
            i,
            self.term_from_entry(i),
            self.l_expr_from_row(i),
            self.entries[i].status
        )
    }

    // --- small shared helpers ---

    /// gcd of the absolute E-coefficients of row `ei`; zero for an
    /// empty row.
    pub(crate) fn gcd_of_row(&self, ei: usize) -> BigInt {
        let mut g = BigInt::zero();
        for cell in self.e_matrix.row(ei) {
            g = if g.is_zero() {
                cell.coeff.abs()
            } else {
                g.gcd(&cell.coeff)
            };
            if g.is_one() {
                break;
            }
        }
        g
    }

    pub(crate) fn row_has_fresh_var(&self, ei: usize) -> bool {
        self.e_matrix
            .row(ei)
            .iter()
            .any(|cell| self.is_fresh_var(cell.var))
    }

    pub(crate) fn register_fresh_definition(&mut self, xt: usize, fd: FreshDefinition) {
        if xt >= self.fresh_definitions.len() {
            self.fresh_definitions.resize(xt + 1, None);
        }
        self.fresh_definitions[xt] = Some(fd);
    }
}

fn transpose_index(v: usize, i: usize, k: usize) -> usize {
    if v == i {
        k
    } else if v == k {
        i
    } else {
        v
    }
}
