//! Sparse linear expressions with a rational constant.

use num_rational::BigRational;
use num_traits::{One, Zero};
use rustc_hash::FxHashMap;
use std::fmt;

/// `sum(coeff_j * x_j) + constant` over an arbitrary variable space.
///
/// Monomials that cancel to zero are dropped eagerly, so `len` counts
/// true nonzeros.
#[derive(Debug, Clone, PartialEq)]
pub struct LinExpr {
    coeffs: FxHashMap<usize, BigRational>,
    constant: BigRational,
}

impl Default for LinExpr {
    fn default() -> Self {
        Self::new()
    }
}

impl LinExpr {
    pub fn new() -> Self {
        Self {
            coeffs: FxHashMap::default(),
            constant: BigRational::zero(),
        }
    }

    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    /// True when both the monomials and the constant vanish.
    pub fn is_zero(&self) -> bool {
        self.coeffs.is_empty() && self.constant.is_zero()
    }

    pub fn constant(&self) -> &BigRational {
        &self.constant
    }

    pub fn constant_mut(&mut self) -> &mut BigRational {
        &mut self.constant
    }

    pub fn coeff(&self, var: usize) -> Option<&BigRational> {
        self.coeffs.get(&var)
    }

    pub fn contains(&self, var: usize) -> bool {
        self.coeffs.contains_key(&var)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &BigRational)> {
        self.coeffs.iter().map(|(&j, c)| (j, c))
    }

    pub fn vars(&self) -> impl Iterator<Item = usize> + '_ {
        self.coeffs.keys().copied()
    }

    pub fn add_monomial(&mut self, coeff: BigRational, var: usize) {
        if coeff.is_zero() {
            return;
        }
        let entry = self
            .coeffs
            .entry(var)
            .or_insert_with(|| BigRational::zero());
        *entry += coeff;
        if entry.is_zero() {
            self.coeffs.remove(&var);
        }
    }

    pub fn remove_var(&mut self, var: usize) -> Option<BigRational> {
        self.coeffs.remove(&var)
    }

    /// `self += alpha * other`, constant included.
    pub fn add_scaled(&mut self, alpha: &BigRational, other: &LinExpr) {
        if alpha.is_zero() {
            return;
        }
        for (j, c) in other.iter() {
            self.add_monomial(alpha * c, j);
        }
        self.constant += alpha * &other.constant;
    }
}

impl fmt::Display for LinExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0");
        }
        let mut sorted: Vec<(usize, &BigRational)> = self.iter().collect();
        sorted.sort_by_key(|(j, _)| *j);
        let mut first = true;
        for (j, c) in sorted {
            let (sign, mag) = if c < &BigRational::zero() {
                ("-", -c)
            } else {
                ("+", c.clone())
            };
            if first {
                if sign == "-" {
                    write!(f, "-")?;
                }
                first = false;
            } else {
                write!(f, " {sign} ")?;
            }
            if !mag.is_one() {
                write!(f, "{mag}")?;
            }
            write!(f, "x{j}")?;
        }
        if !self.constant.is_zero() {
            let (sign, mag) = if self.constant < BigRational::zero() {
                ("-", -&self.constant)
            } else {
                ("+", self.constant.clone())
            };
            if first {
                write!(f, "{}{mag}", if sign == "-" { "-" } else { "" })?;
            } else {
                write!(f, " {sign} {mag}")?;
            }
        }
        Ok(())
    }
}
