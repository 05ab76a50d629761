//! Linear-expression analysis.
//!
//! Assigns to every integer expression a canonical sum-of-products form
//! `Σ kᵢ·aᵢ + c`, where each atom `aᵢ` is a variable, a load, or an
//! unanalyzable subtree kept opaque. Terms are keyed and ordered by the
//! atom's structural hash, so two equal linear forms compare equal.
//!
//! Used by bound inference, by the dependency finder's aliasing test, and by
//! the `as_matmul` / `vectorize` legality checks.

use std::collections::BTreeMap;

use crate::ir::hash::hash_expr;
use crate::ir::{BinaryOp, Expr};

/// An atom of a linear form, compared by structural hash.
#[derive(Debug, Clone)]
pub struct Atom {
    pub expr: Expr,
    pub hash: u64,
}

impl Atom {
    fn new(expr: Expr) -> Self {
        let hash = hash_expr(&expr);
        Atom { expr, hash }
    }

    /// The variable name if the atom is a plain `Var`.
    pub fn as_var(&self) -> Option<&str> {
        match &self.expr {
            Expr::Var(name) => Some(name),
            _ => None,
        }
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.expr == other.expr
    }
}

/// Canonical `Σ kᵢ·aᵢ + c`. Zero-coefficient terms are dropped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinearExpr {
    /// Atom hash → (coefficient, atom); BTreeMap keeps term order canonical
    pub terms: BTreeMap<u64, (i64, Atom)>,
    pub constant: i64,
}

impl LinearExpr {
    pub fn constant(c: i64) -> Self {
        LinearExpr {
            terms: BTreeMap::new(),
            constant: c,
        }
    }

    fn atom(expr: Expr) -> Self {
        let a = Atom::new(expr);
        let mut terms = BTreeMap::new();
        terms.insert(a.hash, (1, a));
        LinearExpr { terms, constant: 0 }
    }

    fn add_term(&mut self, k: i64, atom: Atom) {
        if k == 0 {
            return;
        }
        let entry = self.terms.entry(atom.hash).or_insert((0, atom));
        entry.0 += k;
        if entry.0 == 0 {
            let hash = entry.1.hash;
            self.terms.remove(&hash);
        }
    }

    fn combine(mut self, other: LinearExpr, sign: i64) -> Self {
        self.constant += sign * other.constant;
        for (_, (k, atom)) in other.terms {
            self.add_term(sign * k, atom);
        }
        self
    }

    fn scale(mut self, k: i64) -> Self {
        if k == 0 {
            return LinearExpr::constant(0);
        }
        self.constant *= k;
        for entry in self.terms.values_mut() {
            entry.0 *= k;
        }
        self
    }

    /// The constant value, if there are no terms.
    pub fn as_constant(&self) -> Option<i64> {
        self.terms.is_empty().then_some(self.constant)
    }

    /// Coefficient of the variable `name` (0 when absent).
    pub fn coeff_of_var(&self, name: &str) -> i64 {
        self.terms
            .values()
            .find(|(_, a)| a.as_var() == Some(name))
            .map_or(0, |(k, _)| *k)
    }

    /// Whether the form mentions `name` as a plain-variable atom.
    pub fn uses_var(&self, name: &str) -> bool {
        self.coeff_of_var(name) != 0
    }

    /// Whether every atom is a plain variable (no loads, no opaque subtrees).
    pub fn is_affine_in_vars(&self) -> bool {
        self.terms.values().all(|(_, a)| a.as_var().is_some())
    }

    /// `k` divides the form for every atom valuation.
    pub fn divisible_by(&self, k: i64) -> bool {
        k != 0
            && self.constant % k == 0
            && self.terms.values().all(|(coeff, _)| coeff % k == 0)
    }

    /// Difference of two forms (`self - other`).
    pub fn diff(&self, other: &LinearExpr) -> LinearExpr {
        self.clone().combine(other.clone(), -1)
    }

    /// Rebuild an expression from the canonical form.
    pub fn to_expr(&self) -> Expr {
        let mut out: Option<Expr> = None;
        for (k, atom) in self.terms.values() {
            let term = match k {
                1 => atom.expr.clone(),
                -1 if out.is_some() => atom.expr.clone(),
                _ => Expr::mul(Expr::int(*k), atom.expr.clone()),
            };
            out = Some(match out {
                None => {
                    if *k == -1 {
                        Expr::sub(Expr::int(0), atom.expr.clone())
                    } else {
                        term
                    }
                }
                Some(acc) => {
                    if *k == -1 {
                        Expr::sub(acc, term)
                    } else {
                        Expr::add(acc, term)
                    }
                }
            });
        }
        match out {
            None => Expr::int(self.constant),
            Some(acc) if self.constant == 0 => acc,
            Some(acc) if self.constant < 0 => Expr::sub(acc, Expr::int(-self.constant)),
            Some(acc) => Expr::add(acc, Expr::int(self.constant)),
        }
    }
}

/// Analyze an integer expression into its canonical linear form.
pub fn analyze_linear(expr: &Expr) -> LinearExpr {
    match expr {
        Expr::IntConst(v) => LinearExpr::constant(*v),
        Expr::Binary { op, lhs, rhs } => match op {
            BinaryOp::Add => analyze_linear(lhs).combine(analyze_linear(rhs), 1),
            BinaryOp::Sub => analyze_linear(lhs).combine(analyze_linear(rhs), -1),
            BinaryOp::Mul => {
                let l = analyze_linear(lhs);
                let r = analyze_linear(rhs);
                if let Some(c) = l.as_constant() {
                    r.scale(c)
                } else if let Some(c) = r.as_constant() {
                    l.scale(c)
                } else {
                    LinearExpr::atom(expr.clone())
                }
            }
            // Division and everything else stays opaque; bounds handles the
            // interval rules for those.
            _ => LinearExpr::atom(expr.clone()),
        },
        _ => LinearExpr::atom(expr.clone()),
    }
}
