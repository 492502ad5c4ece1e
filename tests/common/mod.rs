//! Reference host for driving the solver in tests.
//!
//! A deliberately small linear-arithmetic host: columns with rational
//! bounds and values, term columns defined as integer combinations,
//! a dependency arena of leaf/join nodes, and snapshot-based push/pop.
//! Feasibility is bound consistency plus a single interval pass over
//! the term definitions; values are clamped into bounds.

use diosolve::{BoundKind, ColIndex, ConstraintIndex, Dep, DepId, LpStatus, LraHost};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::Zero;
use rustc_hash::FxHashMap;

pub fn rat(n: i64) -> BigRational {
    BigRational::from_integer(BigInt::from(n))
}

pub fn ratio(n: i64, d: i64) -> BigRational {
    BigRational::new(BigInt::from(n), BigInt::from(d))
}

#[derive(Debug, Clone)]
struct Column {
    is_int: bool,
    lower: Option<(BigRational, Dep)>,
    upper: Option<(BigRational, Dep)>,
    value: BigRational,
}

impl Column {
    fn new_int() -> Self {
        Self {
            is_int: true,
            lower: None,
            upper: None,
            value: BigRational::zero(),
        }
    }

    fn is_fixed(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some((l, _)), Some((u, _))) => l == u,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
enum DepNode {
    Leaf(ConstraintIndex),
    Join(DepId, DepId),
}

#[derive(Debug, Clone)]
struct Snapshot {
    columns: Vec<Column>,
    terms: FxHashMap<ColIndex, Vec<(ColIndex, BigRational)>>,
}

#[derive(Debug)]
pub struct MockLra {
    columns: Vec<Column>,
    terms: FxHashMap<ColIndex, Vec<(ColIndex, BigRational)>>,
    deps: Vec<DepNode>,
    stack: Vec<Snapshot>,
    infeasibility: Vec<ConstraintIndex>,
    rng: u64,
    pub cancelled: bool,
}

impl Default for MockLra {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLra {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            terms: FxHashMap::default(),
            deps: Vec::new(),
            stack: Vec::new(),
            infeasibility: Vec::new(),
            rng: 0x9E37_79B9_7F4A_7C15,
            cancelled: false,
        }
    }

    pub fn add_int_column(&mut self) -> ColIndex {
        self.columns.push(Column::new_int());
        self.columns.len() - 1
    }

    /// Registers a term column `j = sum(coeff * col)`.
    pub fn add_term_column(&mut self, monomials: &[(ColIndex, i64)]) -> ColIndex {
        let j = self.add_int_column();
        let term: Vec<(ColIndex, BigRational)> =
            monomials.iter().map(|&(col, a)| (col, rat(a))).collect();
        self.terms.insert(j, term);
        j
    }

    /// Removes the term and its column; the column must be the last.
    pub fn drop_term_column(&mut self, j: ColIndex) {
        assert_eq!(j, self.columns.len() - 1);
        self.terms.remove(&j);
        self.columns.pop();
    }

    pub fn leaf_dep(&mut self, ci: ConstraintIndex) -> Dep {
        self.deps.push(DepNode::Leaf(ci));
        Some(self.deps.len() - 1)
    }

    pub fn set_lower(&mut self, j: ColIndex, v: BigRational, ci: ConstraintIndex) {
        let dep = self.leaf_dep(ci);
        self.columns[j].lower = Some((v, dep));
    }

    pub fn set_upper(&mut self, j: ColIndex, v: BigRational, ci: ConstraintIndex) {
        let dep = self.leaf_dep(ci);
        self.columns[j].upper = Some((v, dep));
    }

    /// Fixes the column to `v`, both bounds witnessed by `ci`.
    pub fn fix_column(&mut self, j: ColIndex, v: BigRational, ci: ConstraintIndex) {
        self.set_lower(j, v.clone(), ci);
        self.set_upper(j, v.clone(), ci);
        self.columns[j].value = v;
    }

    pub fn set_value(&mut self, j: ColIndex, v: BigRational) {
        self.columns[j].value = v;
    }

    pub fn upper_bound(&self, j: ColIndex) -> Option<BigRational> {
        self.columns[j].upper.as_ref().map(|(v, _)| v.clone())
    }

    pub fn lower_bound(&self, j: ColIndex) -> Option<BigRational> {
        self.columns[j].lower.as_ref().map(|(v, _)| v.clone())
    }

    pub fn scope_depth(&self) -> usize {
        self.stack.len()
    }

    fn record_infeasible(&mut self, deps: Vec<Dep>) -> LpStatus {
        let mut cis: Vec<ConstraintIndex> = Vec::new();
        for dep in deps {
            cis.extend(self.flatten_dep(dep));
        }
        cis.sort_unstable();
        cis.dedup();
        self.infeasibility = cis;
        LpStatus::Infeasible
    }

    /// Interval of `sum(coeff * col)` under the current column bounds.
    fn term_interval(
        &self,
        term: &[(ColIndex, BigRational)],
    ) -> (Option<BigRational>, Option<BigRational>) {
        let mut lo = Some(BigRational::zero());
        let mut hi = Some(BigRational::zero());
        for (col, coeff) in term {
            let c = &self.columns[*col];
            let (contrib_lo, contrib_hi) = if coeff >= &BigRational::zero() {
                (&c.lower, &c.upper)
            } else {
                (&c.upper, &c.lower)
            };
            lo = match (lo, contrib_lo) {
                (Some(acc), Some((b, _))) => Some(acc + coeff * b),
                _ => None,
            };
            hi = match (hi, contrib_hi) {
                (Some(acc), Some((b, _))) => Some(acc + coeff * b),
                _ => None,
            };
        }
        (lo, hi)
    }
}

impl LraHost for MockLra {
    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_is_int(&self, j: ColIndex) -> bool {
        self.columns[j].is_int
    }

    fn column_is_fixed(&self, j: ColIndex) -> bool {
        self.columns[j].is_fixed()
    }

    fn column_is_free(&self, j: ColIndex) -> bool {
        self.columns[j].lower.is_none() && self.columns[j].upper.is_none()
    }

    fn column_is_int_infeasible(&self, j: ColIndex) -> bool {
        self.columns[j].is_int && !self.columns[j].value.is_integer()
    }

    fn column_value(&self, j: ColIndex) -> BigRational {
        self.columns[j].value.clone()
    }

    fn lower_bound_value(&self, j: ColIndex) -> BigRational {
        self.columns[j]
            .lower
            .as_ref()
            .map(|(v, _)| v.clone())
            .expect("lower bound queried on an unbounded column")
    }

    fn bound_of_kind(&self, j: ColIndex, kind: BoundKind) -> Option<(BigRational, bool, Dep)> {
        let side = match kind {
            BoundKind::LessOrEqual => &self.columns[j].upper,
            BoundKind::GreaterOrEqual => &self.columns[j].lower,
        };
        side.as_ref().map(|(v, dep)| (v.clone(), false, *dep))
    }

    fn column_has_term(&self, j: ColIndex) -> bool {
        self.terms.contains_key(&j)
    }

    fn term(&self, j: ColIndex) -> &[(ColIndex, BigRational)] {
        self.terms.get(&j).map(|t| t.as_slice()).unwrap_or(&[])
    }

    fn term_columns(&self) -> Vec<ColIndex> {
        self.terms.keys().copied().collect()
    }

    fn update_column_type_and_bound(
        &mut self,
        j: ColIndex,
        kind: BoundKind,
        value: BigRational,
        dep: Dep,
    ) {
        match kind {
            BoundKind::LessOrEqual => {
                let stronger = self
                    .columns[j]
                    .upper
                    .as_ref()
                    .is_none_or(|(cur, _)| &value < cur);
                if stronger {
                    self.columns[j].upper = Some((value, dep));
                }
            }
            BoundKind::GreaterOrEqual => {
                let stronger = self
                    .columns[j]
                    .lower
                    .as_ref()
                    .is_none_or(|(cur, _)| &value > cur);
                if stronger {
                    self.columns[j].lower = Some((value, dep));
                }
            }
        }
    }

    fn add_var_bound(&mut self, j: ColIndex, kind: BoundKind, value: BigRational) {
        self.update_column_type_and_bound(j, kind, value, None);
    }

    fn push(&mut self) {
        self.stack.push(Snapshot {
            columns: self.columns.clone(),
            terms: self.terms.clone(),
        });
    }

    fn pop(&mut self) {
        let snap = self.stack.pop().expect("pop without matching push");
        self.columns = snap.columns;
        self.terms = snap.terms;
    }

    fn find_feasible_solution(&mut self) -> LpStatus {
        if self.cancelled {
            return LpStatus::Cancelled;
        }
        for j in 0..self.columns.len() {
            let c = &self.columns[j];
            if let (Some((l, ld)), Some((u, ud))) = (&c.lower, &c.upper)
                && l > u
            {
                let deps = vec![*ld, *ud];
                return self.record_infeasible(deps);
            }
        }
        let term_cols: Vec<ColIndex> = self.terms.keys().copied().collect();
        for j in term_cols {
            let term = self.terms[&j].clone();
            let (lo, hi) = self.term_interval(&term);
            let c = &self.columns[j];
            let conflict_high = match (&lo, &c.upper) {
                (Some(lo), Some((u, _))) => lo > u,
                _ => false,
            };
            let conflict_low = match (&hi, &c.lower) {
                (Some(hi), Some((l, _))) => hi < l,
                _ => false,
            };
            if conflict_high || conflict_low {
                let mut deps: Vec<Dep> = Vec::new();
                for (col, _) in &term {
                    if let Some((_, d)) = &self.columns[*col].lower {
                        deps.push(*d);
                    }
                    if let Some((_, d)) = &self.columns[*col].upper {
                        deps.push(*d);
                    }
                }
                if let Some((_, d)) = &self.columns[j].lower {
                    deps.push(*d);
                }
                if let Some((_, d)) = &self.columns[j].upper {
                    deps.push(*d);
                }
                return self.record_infeasible(deps);
            }
        }
        for c in &mut self.columns {
            if let Some((l, _)) = &c.lower
                && &c.value < l
            {
                c.value = l.clone();
            }
            if let Some((u, _)) = &c.upper
                && &c.value > u
            {
                c.value = u.clone();
            }
        }
        LpStatus::Feasible
    }

    fn basis_columns(&self) -> Vec<ColIndex> {
        (0..self.columns.len()).collect()
    }

    fn join_deps(&mut self, a: Dep, b: Dep) -> Dep {
        match (a, b) {
            (None, d) | (d, None) => d,
            (Some(x), Some(y)) => {
                self.deps.push(DepNode::Join(x, y));
                Some(self.deps.len() - 1)
            }
        }
    }

    fn flatten_dep(&self, dep: Dep) -> Vec<ConstraintIndex> {
        let mut out = Vec::new();
        let mut stack: Vec<DepId> = dep.into_iter().collect();
        while let Some(id) = stack.pop() {
            match &self.deps[id] {
                DepNode::Leaf(ci) => out.push(*ci),
                DepNode::Join(a, b) => {
                    stack.push(*a);
                    stack.push(*b);
                }
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    fn column_bound_witness(&self, j: ColIndex, kind: BoundKind) -> Dep {
        match kind {
            BoundKind::LessOrEqual => self.columns[j].upper.as_ref().and_then(|(_, d)| *d),
            BoundKind::GreaterOrEqual => self.columns[j].lower.as_ref().and_then(|(_, d)| *d),
        }
    }

    fn bound_constraint_witnesses_for_column(&mut self, j: ColIndex) -> Dep {
        let l = self.columns[j].lower.as_ref().and_then(|(_, d)| *d);
        let u = self.columns[j].upper.as_ref().and_then(|(_, d)| *d);
        self.join_deps(l, u)
    }

    fn infeasibility_explanation(&self) -> Vec<ConstraintIndex> {
        self.infeasibility.clone()
    }

    fn random_next(&mut self) -> u64 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        x
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}
