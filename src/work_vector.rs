//! Indexed work vector for substitution passes.
//!
//! Dense value storage plus a list of the nonzero positions, kept
//! exact: updates that cross zero in either direction maintain the
//! index, so iteration never sees a position twice.

use num_traits::Zero;

#[derive(Debug, Clone, Default)]
pub struct WorkVector<T> {
    values: Vec<T>,
    index: Vec<usize>,
}

impl<T: Clone + Zero> WorkVector<T> {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            index: Vec::new(),
        }
    }

    /// Zeroes the nonzero positions and forgets the index.
    pub fn clear(&mut self) {
        for &j in &self.index {
            self.values[j] = T::zero();
        }
        self.index.clear();
    }

    /// Grows the dense storage to cover positions `0..n`.
    pub fn resize(&mut self, n: usize) {
        if self.values.len() < n {
            self.values.resize(n, T::zero());
        }
    }

    pub fn get(&self, j: usize) -> &T {
        &self.values[j]
    }

    pub fn is_zero_at(&self, j: usize) -> bool {
        j >= self.values.len() || self.values[j].is_zero()
    }

    pub fn set(&mut self, j: usize, v: T) {
        self.resize(j + 1);
        let was_nonzero = !self.values[j].is_zero();
        let now_nonzero = !v.is_zero();
        self.values[j] = v;
        self.fix_index(j, was_nonzero, now_nonzero);
    }

    pub fn add(&mut self, j: usize, delta: T) {
        self.resize(j + 1);
        let was_nonzero = !self.values[j].is_zero();
        let sum = self.values[j].clone() + delta;
        let now_nonzero = !sum.is_zero();
        self.values[j] = sum;
        self.fix_index(j, was_nonzero, now_nonzero);
    }

    /// Reads and zeroes position `j`.
    pub fn take(&mut self, j: usize) -> T {
        let v = self.values[j].clone();
        if !v.is_zero() {
            self.values[j] = T::zero();
            self.drop_index(j);
        }
        v
    }

    /// Nonzero positions with their values, in touch order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.index.iter().map(|&j| (j, &self.values[j]))
    }

    fn fix_index(&mut self, j: usize, was_nonzero: bool, now_nonzero: bool) {
        match (was_nonzero, now_nonzero) {
            (false, true) => self.index.push(j),
            (true, false) => self.drop_index(j),
            _ => {}
        }
    }

    fn drop_index(&mut self, j: usize) {
        if let Some(pos) = self.index.iter().position(|&x| x == j) {
            self.index.swap_remove(pos);
        }
    }
}
