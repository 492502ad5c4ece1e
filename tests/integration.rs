//! End-to-end scenarios against the reference host.

mod common;

use common::{MockLra, rat, ratio};
use diosolve::{CheckResult, DioSolver, EntryStatus, Explanation, LraHost};
use num_bigint::BigInt;

fn int(n: i64) -> BigInt {
    BigInt::from(n)
}

/// `2x - 4y + 6z = 8` normalizes to `x - 2y + 3z = 4` and promotes a
/// substitution with pivot x.
#[test]
fn test_trivial_solve() {
    let mut host = MockLra::new();
    let x = host.add_int_column();
    let y = host.add_int_column();
    let z = host.add_int_column();
    let w = host.add_term_column(&[(x, 2), (y, -4), (z, 6)]);
    host.fix_column(w, rat(8), 0);

    let mut solver = DioSolver::new();
    solver.add_term(&host, w);
    solver.update_column_bound(&host, w);

    let res = solver.check(&mut host);
    assert_eq!(res, CheckResult::Sat);

    assert_eq!(solver.row_count(), 1);
    let lx = solver.local_of_column(x).unwrap();
    let ly = solver.local_of_column(y).unwrap();
    let lz = solver.local_of_column(z).unwrap();
    assert_eq!(
        solver.e_row(0),
        vec![(lx, int(1)), (ly, int(-2)), (lz, int(3))]
    );
    assert_eq!(solver.entry_constant(0), &rat(-4));
    assert_eq!(solver.entry_status(0), EntryStatus::Substitution);
    assert_eq!(solver.substitution_of(lx), Some(0));
    assert!(solver.entries_are_consistent(&host));
}

/// `2x + 4y = 3`: gcd 2 does not divide 3, conflict explained by the
/// single asserted constraint.
#[test]
fn test_gcd_conflict_without_cut() {
    let mut host = MockLra::new();
    let x = host.add_int_column();
    let y = host.add_int_column();
    let w = host.add_term_column(&[(x, 2), (y, 4)]);
    host.fix_column(w, rat(3), 7);

    let mut solver = DioSolver::new();
    solver.add_term(&host, w);
    solver.update_column_bound(&host, w);

    let res = solver.check(&mut host);
    assert_eq!(res, CheckResult::Conflict);
    assert_eq!(solver.stats().normalize_conflicts, 1);
    assert!(solver.pending_cut().is_none());

    let mut ex = Explanation::new();
    solver.explain(&mut host, &mut ex);
    let cis: Vec<usize> = ex.iter().collect();
    assert_eq!(cis, vec![7]);
}

/// With the cut-from-proof period at 1, the same conflict becomes a
/// pending cut: `x + 2y <= floor(3/2) = 1`.
#[test]
fn test_gcd_conflict_with_cut() {
    let mut host = MockLra::new();
    let x = host.add_int_column();
    let y = host.add_int_column();
    let w = host.add_term_column(&[(x, 2), (y, 4)]);
    host.fix_column(w, rat(3), 7);

    let mut solver = DioSolver::with_config(diosolve::DioConfig {
        cut_from_proof_period: 1,
        ..Default::default()
    });
    solver.add_term(&host, w);
    solver.update_column_bound(&host, w);

    let res = solver.check(&mut host);
    assert_eq!(res, CheckResult::Branch);
    assert_eq!(solver.stats().cut_from_proofs, 1);

    let cut = solver.pending_cut().expect("branch without a cut");
    assert!(cut.is_upper);
    assert_eq!(cut.offset, rat(1));
    let mut coeffs: Vec<(usize, i64)> = cut
        .coeffs
        .iter()
        .map(|(j, c)| (*j, i64::try_from(c.to_integer()).unwrap()))
        .collect();
    coeffs.sort();
    assert_eq!(coeffs, vec![(x, 1), (y, 2)]);
}

/// `3x + 5y + 7 = 0` has no unit coefficient; the rewrite introduces a
/// fresh variable `xt` with defining row `-xt + x + y + 2 = 0` and
/// continues until the queue drains.
#[test]
fn test_fresh_variable_step() {
    let mut host = MockLra::new();
    let x = host.add_int_column();
    let y = host.add_int_column();
    let w = host.add_term_column(&[(x, 3), (y, 5)]);
    host.fix_column(w, rat(-7), 1);

    let mut solver = DioSolver::new();
    solver.add_term(&host, w);
    solver.update_column_bound(&host, w);

    let res = solver.check(&mut host);
    assert_eq!(res, CheckResult::Sat);

    let lx = solver.local_of_column(x).unwrap();
    let ly = solver.local_of_column(y).unwrap();

    // x got eliminated through the first fresh definition row
    let fr = solver.substitution_of(lx).expect("x lost its substitution");
    let row = solver.e_row(fr);
    let xt = row
        .iter()
        .find(|(local, coeff)| solver.local_is_fresh(*local) && coeff == &int(-1))
        .map(|(local, _)| *local)
        .expect("fresh definition row lacks its -1 pivot");
    assert_eq!(
        row,
        vec![(lx, int(1)), (ly, int(1)), (xt, int(-1))]
    );
    assert_eq!(solver.entry_constant(fr), &rat(2));

    // the queue drained and every variable of the input is eliminable
    assert!(solver.queued_rows().is_empty());
    assert!(solver.substitution_of(ly).is_some());
    assert!(solver.entries_are_consistent(&host));
}

/// `z = 2x + 3y` tightens nothing (gcd 1); adding `x = y` makes the
/// substituted form `z = 5x`, and `z <= 9` rounds down to `z <= 5`.
#[test]
fn test_tightening_rounds_bounds() {
    let mut host = MockLra::new();
    let x = host.add_int_column();
    let y = host.add_int_column();
    let z = host.add_term_column(&[(x, 2), (y, 3)]);
    host.set_lower(z, rat(0), 1);
    host.set_upper(z, rat(10), 2);

    let mut solver = DioSolver::new();
    solver.add_term(&host, z);

    let res = solver.check(&mut host);
    assert_eq!(res, CheckResult::Sat);
    // gcd(2, 3) = 1: bounds untouched
    assert_eq!(host.upper_bound(z), Some(rat(10)));
    assert_eq!(host.lower_bound(z), Some(rat(0)));

    // now x = y, as a fixed term column v = x - y = 0
    let v = host.add_term_column(&[(x, 1), (y, -1)]);
    host.fix_column(v, rat(0), 5);
    solver.add_term(&host, v);
    solver.update_column_bound(&host, v);

    let res = solver.check(&mut host);
    assert_eq!(res, CheckResult::Sat);
    // z = 5x now, and 10 is already on the lattice: no change
    assert_eq!(host.upper_bound(z), Some(rat(10)));

    // z <= 9 is off-lattice: tighten to 5*floor(9/5) = 5
    host.set_upper(z, rat(9), 2);
    let res = solver.check(&mut host);
    assert_eq!(res, CheckResult::Sat);
    assert_eq!(host.upper_bound(z), Some(rat(5)));
    assert_eq!(host.lower_bound(z), Some(rat(0)));
    assert!(solver.entries_are_consistent(&host));
}

/// Fractional relaxation values drive the brancher to a satisfying
/// integer state.
#[test]
fn test_branch_and_bound_sat() {
    let mut host = MockLra::new();
    let x = host.add_int_column();
    let y = host.add_int_column();
    host.set_value(x, ratio(13, 10));
    host.set_value(y, ratio(17, 10));

    let mut solver = DioSolver::new();
    let res = solver.check(&mut host);
    assert_eq!(res, CheckResult::Sat);
    assert_eq!(solver.stats().branching_sats, 1);
    assert!(solver.stats().branch_iterations >= 2);
    assert!(solver.stats().branching_depth >= 1);
    // every branch scope was unwound
    assert_eq!(host.scope_depth(), 0);
}

/// Exhausting both sides of every branch reports a conflict.
#[test]
fn test_branch_and_bound_conflict() {
    let mut host = MockLra::new();
    let x = host.add_int_column();
    // 1/2 <= x <= 2/3 admits no integer
    host.set_lower(x, ratio(1, 2), 3);
    host.set_upper(x, ratio(2, 3), 4);
    host.set_value(x, ratio(1, 2));

    let mut solver = DioSolver::new();
    let res = solver.check(&mut host);
    assert_eq!(res, CheckResult::Conflict);
    assert_eq!(solver.stats().branching_infeasibles, 1);
    assert_eq!(host.scope_depth(), 0);

    let mut ex = Explanation::new();
    solver.explain(&mut host, &mut ex);
    let mut cis: Vec<usize> = ex.iter().collect();
    cis.sort_unstable();
    assert_eq!(cis, vec![3, 4]);
}

/// Asserting a term, pushing, asserting another, and popping restores
/// the row store to the pre-push state.
#[test]
fn test_undo_restores_row_store() {
    let mut host = MockLra::new();
    let x = host.add_int_column();
    let y = host.add_int_column();
    let a = host.add_int_column();
    let b = host.add_int_column();

    let w1 = host.add_term_column(&[(x, 1), (y, 2)]);
    host.fix_column(w1, rat(4), 1);
    let mut solver = DioSolver::new();
    solver.add_term(&host, w1);
    solver.update_column_bound(&host, w1);
    assert_eq!(solver.check(&mut host), CheckResult::Sat);

    let saved_rows: Vec<_> = (0..solver.row_count())
        .map(|i| {
            (
                solver.e_row(i),
                solver.entry_constant(i).clone(),
                solver.entry_status(i),
            )
        })
        .collect();

    host.push();
    solver.push_scope();

    let w2 = host.add_term_column(&[(a, 1), (b, -1)]);
    host.fix_column(w2, rat(1), 2);
    solver.add_term(&host, w2);
    solver.update_column_bound(&host, w2);
    assert_eq!(solver.check(&mut host), CheckResult::Sat);
    assert_eq!(solver.row_count(), 2);

    solver.remove_term(&host, w2);
    solver.pop_scope();
    host.pop();

    assert_eq!(solver.row_count(), saved_rows.len());
    for (i, (e, c, status)) in saved_rows.iter().enumerate() {
        assert_eq!(&solver.e_row(i), e);
        assert_eq!(solver.entry_constant(i), c);
        assert_eq!(solver.entry_status(i), *status);
    }
    assert!(solver.entries_are_consistent(&host));
    assert_eq!(solver.check(&mut host), CheckResult::Sat);
}

/// Removing a term whose column is entangled with fresh definitions
/// recalculates the touched rows and keeps every invariant.
#[test]
fn test_remove_term_with_fresh_rows() {
    let mut host = MockLra::new();
    let x = host.add_int_column();
    let y = host.add_int_column();
    let a = host.add_int_column();
    let b = host.add_int_column();

    let w1 = host.add_term_column(&[(x, 1), (y, 2)]);
    host.fix_column(w1, rat(4), 1);
    let w2 = host.add_term_column(&[(x, 1), (y, 1)]);
    host.fix_column(w2, rat(1), 2);
    let w3 = host.add_term_column(&[(a, 3), (b, 5)]);
    host.fix_column(w3, rat(-7), 3);

    let mut solver = DioSolver::new();
    for w in [w1, w2, w3] {
        solver.add_term(&host, w);
        solver.update_column_bound(&host, w);
    }
    assert_eq!(solver.check(&mut host), CheckResult::Sat);
    assert!(solver.row_count() > 3, "fresh rows expected");

    solver.remove_term(&host, w3);
    host.drop_term_column(w3);

    assert!(solver.entries_are_consistent(&host));
    // rows for w1/w2 survive; a second round stays clean
    assert_eq!(solver.check(&mut host), CheckResult::Sat);
    assert!(solver.entries_are_consistent(&host));
}

/// A second check without host changes keeps the verdict and the rows.
#[test]
fn test_check_is_idempotent() {
    let mut host = MockLra::new();
    let x = host.add_int_column();
    let y = host.add_int_column();
    let w = host.add_term_column(&[(x, 2), (y, -4)]);
    host.fix_column(w, rat(8), 0);

    let mut solver = DioSolver::new();
    solver.add_term(&host, w);
    solver.update_column_bound(&host, w);

    let first = solver.check(&mut host);
    let rows: Vec<_> = (0..solver.row_count())
        .map(|i| (solver.e_row(i), solver.entry_constant(i).clone()))
        .collect();
    let calls = solver.stats().calls;

    let second = solver.check(&mut host);
    assert_eq!(first, second);
    assert_eq!(solver.stats().calls, calls + 1);
    for (i, (e, c)) in rows.iter().enumerate() {
        assert_eq!(&solver.e_row(i), e);
        assert_eq!(solver.entry_constant(i), c);
    }
}

/// The cancel flag makes `check` return without damaging the state.
#[test]
fn test_cancellation_preserves_state() {
    let mut host = MockLra::new();
    let x = host.add_int_column();
    let y = host.add_int_column();
    let w = host.add_term_column(&[(x, 2), (y, -4)]);
    host.fix_column(w, rat(8), 0);

    let mut solver = DioSolver::new();
    solver.add_term(&host, w);
    solver.update_column_bound(&host, w);
    host.cancelled = true;

    let res = solver.check(&mut host);
    assert_eq!(res, CheckResult::Cancelled);
    assert!(solver.entries_are_consistent(&host));
    assert_eq!(host.scope_depth(), 0);

    host.cancelled = false;
    assert_eq!(solver.check(&mut host), CheckResult::Sat);
}
