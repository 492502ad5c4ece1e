//! Cross-linked sparse matrix.
//!
//! Rows and columns are parallel cell arrays: a row cell stores the
//! column id, its coefficient, and the offset of its transpose cell in
//! the column array; a column cell stores the row id and the offset of
//! the row cell. Both row iteration (gcd, substitution, printing) and
//! column iteration (elimination) are O(nnz).

use num_traits::Zero;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Coefficient requirements for matrix entries.
///
/// Satisfied by `BigInt` (E-matrix) and `BigRational` (L-matrix).
pub trait Coeff:
    Clone
    + PartialEq
    + Zero
    + Neg<Output = Self>
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
{
}

impl<T> Coeff for T where
    T: Clone
        + PartialEq
        + Zero
        + Neg<Output = T>
        + Add<Output = T>
        + Sub<Output = T>
        + Mul<Output = T>
        + Div<Output = T>
{
}

/// A cell in a row: which column, the coefficient, and where the
/// transpose cell sits in that column's array.
#[derive(Debug, Clone)]
pub struct RowCell<T> {
    pub var: usize,
    pub offset: usize,
    pub coeff: T,
}

/// A cell in a column: which row and where the row cell sits.
#[derive(Debug, Clone, Copy)]
pub struct ColCell {
    pub var: usize,
    pub offset: usize,
}

/// Sparse matrix with row/column cross-links.
#[derive(Debug, Clone, Default)]
pub struct SparseMatrix<T> {
    rows: Vec<Vec<RowCell<T>>>,
    columns: Vec<Vec<ColCell>>,
}

impl<T: Coeff> SparseMatrix<T> {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Appends an empty row and returns its index.
    pub fn add_row(&mut self) -> usize {
        self.rows.push(Vec::new());
        self.rows.len() - 1
    }

    pub fn add_column(&mut self) {
        self.columns.push(Vec::new());
    }

    /// Grows the column space so that column `j` exists.
    pub fn add_columns_up_to(&mut self, j: usize) {
        while self.columns.len() <= j {
            self.columns.push(Vec::new());
        }
    }

    pub fn row(&self, i: usize) -> &[RowCell<T>] {
        &self.rows[i]
    }

    pub fn column(&self, j: usize) -> &[ColCell] {
        &self.columns[j]
    }

    /// Rows with a nonzero entry in column `j`.
    pub fn column_rows(&self, j: usize) -> Vec<usize> {
        self.columns[j].iter().map(|c| c.var).collect()
    }

    pub fn row_is_empty(&self, i: usize) -> bool {
        self.rows[i].is_empty()
    }

    /// Pops trailing columns that have no cells.
    pub fn pop_empty_trailing_columns(&mut self) {
        while let Some(col) = self.columns.last()
            && col.is_empty()
        {
            self.columns.pop();
        }
    }

    fn position_in_row(&self, i: usize, j: usize) -> Option<usize> {
        self.rows[i].iter().position(|c| c.var == j)
    }

    pub fn get(&self, i: usize, j: usize) -> Option<&T> {
        self.rows[i].iter().find(|c| c.var == j).map(|c| &c.coeff)
    }

    /// Inserts a fresh element; the cell (i, j) must not already exist.
    pub fn add_new_element(&mut self, i: usize, j: usize, v: T) {
        debug_assert!(self.position_in_row(i, j).is_none());
        debug_assert!(!v.is_zero());
        let row_offset = self.rows[i].len();
        let col_offset = self.columns[j].len();
        self.rows[i].push(RowCell {
            var: j,
            offset: col_offset,
            coeff: v,
        });
        self.columns[j].push(ColCell {
            var: i,
            offset: row_offset,
        });
    }

    /// Removes the cell at position `pos` of row `i`, fixing the
    /// cross-links of whatever cells the two swap-removes moved.
    pub fn remove_element_at(&mut self, i: usize, pos: usize) -> T {
        let RowCell {
            var: j,
            offset: col_pos,
            coeff,
        } = self.rows[i].swap_remove(pos);
        let removed = self.columns[j].swap_remove(col_pos);
        debug_assert_eq!(removed.var, i);
        debug_assert_eq!(removed.offset, pos);
        if col_pos < self.columns[j].len() {
            let moved = self.columns[j][col_pos];
            self.rows[moved.var][moved.offset].offset = col_pos;
        }
        if pos < self.rows[i].len() {
            let mv = self.rows[i][pos].var;
            let mo = self.rows[i][pos].offset;
            self.columns[mv][mo].offset = pos;
        }
        coeff
    }

    /// Removes the cell (i, j) if present.
    pub fn remove_element(&mut self, i: usize, j: usize) -> Option<T> {
        self.position_in_row(i, j).map(|p| self.remove_element_at(i, p))
    }

    /// Adds `delta` into cell (i, j), creating or removing the cell as
    /// the value crosses zero.
    pub fn add_to_element(&mut self, i: usize, j: usize, delta: T) {
        if delta.is_zero() {
            return;
        }
        match self.position_in_row(i, j) {
            Some(pos) => {
                let sum = self.rows[i][pos].coeff.clone() + delta;
                if sum.is_zero() {
                    self.remove_element_at(i, pos);
                } else {
                    self.rows[i][pos].coeff = sum;
                }
            }
            None => self.add_new_element(i, j, delta),
        }
    }

    /// Removes every cell of row `i`.
    pub fn clear_row(&mut self, i: usize) {
        while !self.rows[i].is_empty() {
            let last = self.rows[i].len() - 1;
            self.remove_element_at(i, last);
        }
    }

    pub fn divide_row(&mut self, i: usize, alpha: &T) {
        debug_assert!(!alpha.is_zero());
        for cell in &mut self.rows[i] {
            cell.coeff = cell.coeff.clone() / alpha.clone();
            debug_assert!(!cell.coeff.is_zero());
        }
    }

    pub fn multiply_row(&mut self, i: usize, alpha: &T) {
        debug_assert!(!alpha.is_zero());
        for cell in &mut self.rows[i] {
            cell.coeff = cell.coeff.clone() * alpha.clone();
        }
    }

    /// `row[dst] += alpha * row[src]`; `src != dst`.
    pub fn add_rows(&mut self, alpha: &T, src: usize, dst: usize) {
        debug_assert_ne!(src, dst);
        if alpha.is_zero() {
            return;
        }
        let src_cells: Vec<(usize, T)> = self.rows[src]
            .iter()
            .map(|c| (c.var, c.coeff.clone()))
            .collect();
        for (j, v) in src_cells {
            self.add_to_element(dst, j, alpha.clone() * v);
        }
    }

    /// Uses row `src`, which contains column `j`, to kill column `j` in
    /// row `dst`: `row[dst] -= (dst_j / src_j) * row[src]`.
    pub fn pivot_row_to_row(&mut self, src: usize, dst: usize, j: usize) {
        debug_assert_ne!(src, dst);
        let a_src = self
            .get(src, j)
            .cloned()
            .expect("pivot column missing from source row");
        let a_dst = match self.remove_element(dst, j) {
            Some(v) => v,
            None => return,
        };
        let factor = -(a_dst / a_src);
        let src_cells: Vec<(usize, T)> = self.rows[src]
            .iter()
            .filter(|c| c.var != j)
            .map(|c| (c.var, c.coeff.clone()))
            .collect();
        for (col, v) in src_cells {
            self.add_to_element(dst, col, factor.clone() * v);
        }
    }

    /// Swaps rows `i` and `k`, including their column cross-links.
    pub fn transpose_rows(&mut self, i: usize, k: usize) {
        if i == k {
            return;
        }
        self.rows.swap(i, k);
        for idx in [i, k] {
            for pos in 0..self.rows[idx].len() {
                let var = self.rows[idx][pos].var;
                let offset = self.rows[idx][pos].offset;
                self.columns[var][offset].var = idx;
            }
        }
    }

    /// Drops the last row after removing all its cells.
    pub fn remove_last_row(&mut self) {
        let i = self.rows.len() - 1;
        self.clear_row(i);
        self.rows.pop();
    }

    #[cfg(any(test, debug_assertions))]
    pub fn cross_links_are_consistent(&self) -> bool {
        for (i, row) in self.rows.iter().enumerate() {
            for (pos, cell) in row.iter().enumerate() {
                let col = &self.columns[cell.var];
                if cell.offset >= col.len() {
                    return false;
                }
                let back = col[cell.offset];
                if back.var != i || back.offset != pos {
                    return false;
                }
            }
        }
        for (j, col) in self.columns.iter().enumerate() {
            for cell in col {
                if self.rows[cell.var][cell.offset].var != j {
                    return false;
                }
            }
        }
        true
    }
}
