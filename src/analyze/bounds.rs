//! Bound inference.
//!
//! Produces, per expression occurrence, sets of symbolic expressions that
//! lower- and upper-bound it. Bounds come from the loop ranges and the
//! `Assert`/`Assume`/`If` conditions in scope, propagated through arithmetic
//! with interval rules. Simplification uses the sets to find bound-equal
//! replacements; `shrink_var` / `make_const_shape` use the constant queries.
//!
//! The context is pushed and popped by whichever traversal owns it, the same
//! way [`crate::scope::ScopeEnv`] is threaded.

use std::collections::HashMap;

use crate::ir::hash::hash_expr;
use crate::ir::{BinaryOp, Expr};

use super::linear::analyze_linear;

/// Keep bound sets small; beyond this the extra candidates add cost, not
/// precision.
const MAX_BOUNDS: usize = 8;

/// Conditions and loop ranges in scope at one point of a traversal.
#[derive(Debug, Clone, Default)]
pub struct BoundCtx {
    /// Iterator → (inclusive lower, inclusive upper)
    ranges: HashMap<String, (Expr, Expr)>,
    /// Conditions known to hold, innermost last
    conds: Vec<Expr>,
}

impl BoundCtx {
    pub fn new() -> Self {
        BoundCtx::default()
    }

    /// Enter a unit-step loop `iter in begin..end`.
    pub fn push_loop(&mut self, iter: &str, begin: &Expr, end: &Expr) {
        let upper = normalize(Expr::sub(end.clone(), Expr::int(1)));
        self.ranges
            .insert(iter.to_string(), (begin.clone(), upper));
    }

    pub fn pop_loop(&mut self, iter: &str) {
        self.ranges.remove(iter);
    }

    pub fn push_cond(&mut self, cond: &Expr) {
        self.conds.push(cond.clone());
    }

    pub fn pop_cond(&mut self) {
        self.conds.pop();
    }

    pub fn range(&self, iter: &str) -> Option<&(Expr, Expr)> {
        self.ranges.get(iter)
    }
}

fn normalize(e: Expr) -> Expr {
    analyze_linear(&e).to_expr()
}

fn dedup_push(set: &mut Vec<Expr>, e: Expr) {
    if set.len() >= MAX_BOUNDS {
        return;
    }
    let h = hash_expr(&e);
    if !set.iter().any(|x| hash_expr(x) == h) {
        set.push(e);
    }
}

/// Bounds a condition in scope implies for `var`, appended to `lower`/`upper`.
fn bounds_from_cond(cond: &Expr, var: &str, lower: &mut Vec<Expr>, upper: &mut Vec<Expr>) {
    let Expr::Binary { op, lhs, rhs } = cond else {
        return;
    };
    match op {
        BinaryOp::LAnd => {
            bounds_from_cond(lhs, var, lower, upper);
            bounds_from_cond(rhs, var, lower, upper);
        }
        _ => {
            let (le_bound, ge_bound) = match (lhs.as_ref(), rhs.as_ref()) {
                (Expr::Var(n), bound) if n == var => match op {
                    BinaryOp::Le => (Some(bound.clone()), None),
                    BinaryOp::Lt => (Some(Expr::sub(bound.clone(), Expr::int(1))), None),
                    BinaryOp::Ge => (None, Some(bound.clone())),
                    BinaryOp::Gt => (None, Some(Expr::add(bound.clone(), Expr::int(1)))),
                    BinaryOp::Eq => (Some(bound.clone()), Some(bound.clone())),
                    _ => (None, None),
                },
                (bound, Expr::Var(n)) if n == var => match op {
                    BinaryOp::Le => (None, Some(bound.clone())),
                    BinaryOp::Lt => (None, Some(Expr::add(bound.clone(), Expr::int(1)))),
                    BinaryOp::Ge => (Some(bound.clone()), None),
                    BinaryOp::Gt => (Some(Expr::sub(bound.clone(), Expr::int(1))), None),
                    BinaryOp::Eq => (Some(bound.clone()), Some(bound.clone())),
                    _ => (None, None),
                },
                _ => (None, None),
            };
            if let Some(u) = le_bound {
                dedup_push(upper, normalize(u));
            }
            if let Some(l) = ge_bound {
                dedup_push(lower, normalize(l));
            }
        }
    }
}

/// Symbolic lower and upper bound sets of `expr` under `ctx`. Every
/// expression bounds itself, so the sets are never empty.
pub fn bounds(expr: &Expr, ctx: &BoundCtx) -> (Vec<Expr>, Vec<Expr>) {
    let mut lower = Vec::new();
    let mut upper = Vec::new();
    dedup_push(&mut lower, normalize(expr.clone()));
    dedup_push(&mut upper, normalize(expr.clone()));

    match expr {
        Expr::IntConst(v) => {
            dedup_push(&mut lower, Expr::int(*v));
            dedup_push(&mut upper, Expr::int(*v));
        }
        Expr::Var(name) => {
            if let Some((lo, hi)) = ctx.range(name) {
                dedup_push(&mut lower, normalize(lo.clone()));
                dedup_push(&mut upper, normalize(hi.clone()));
            }
            for cond in &ctx.conds {
                bounds_from_cond(cond, name, &mut lower, &mut upper);
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            let (llo, lhi) = bounds(lhs, ctx);
            let (rlo, rhi) = bounds(rhs, ctx);
            match op {
                BinaryOp::Add => {
                    for a in &llo {
                        for b in &rlo {
                            dedup_push(&mut lower, normalize(Expr::add(a.clone(), b.clone())));
                        }
                    }
                    for a in &lhi {
                        for b in &rhi {
                            dedup_push(&mut upper, normalize(Expr::add(a.clone(), b.clone())));
                        }
                    }
                }
                BinaryOp::Sub => {
                    for a in &llo {
                        for b in &rhi {
                            dedup_push(&mut lower, normalize(Expr::sub(a.clone(), b.clone())));
                        }
                    }
                    for a in &lhi {
                        for b in &rlo {
                            dedup_push(&mut upper, normalize(Expr::sub(a.clone(), b.clone())));
                        }
                    }
                }
                BinaryOp::Mul => {
                    // Only the const-factor case: k >= 0 keeps the interval
                    // orientation, k < 0 flips it.
                    let scale = |k: i64, es: &[Expr], out: &mut Vec<Expr>| {
                        for e in es {
                            out.push(normalize(Expr::mul(Expr::int(k), e.clone())));
                        }
                    };
                    let (k, other_lo, other_hi) = if let Some(k) = lhs.as_int() {
                        (Some(k), rlo, rhi)
                    } else if let Some(k) = rhs.as_int() {
                        (Some(k), llo, lhi)
                    } else {
                        (None, vec![], vec![])
                    };
                    if let Some(k) = k {
                        let mut lo2 = Vec::new();
                        let mut hi2 = Vec::new();
                        if k >= 0 {
                            scale(k, &other_lo, &mut lo2);
                            scale(k, &other_hi, &mut hi2);
                        } else {
                            scale(k, &other_hi, &mut lo2);
                            scale(k, &other_lo, &mut hi2);
                        }
                        for e in lo2 {
                            dedup_push(&mut lower, e);
                        }
                        for e in hi2 {
                            dedup_push(&mut upper, e);
                        }
                    }
                }
                BinaryOp::FloorDiv | BinaryOp::CeilDiv | BinaryOp::RoundTowards0Div => {
                    if let Some(k) = rhs.as_int() {
                        if k > 0 {
                            for a in &llo {
                                if let Some(v) = a.as_int() {
                                    dedup_push(&mut lower, Expr::int(v.div_euclid(k)));
                                }
                            }
                            for a in &lhi {
                                if let Some(v) = a.as_int() {
                                    dedup_push(
                                        &mut upper,
                                        Expr::int(if *op == BinaryOp::CeilDiv {
                                            (v + k - 1).div_euclid(k)
                                        } else {
                                            v.div_euclid(k)
                                        }),
                                    );
                                }
                            }
                        }
                    }
                }
                BinaryOp::Mod => {
                    if let Some(k) = rhs.as_int() {
                        if k > 0 {
                            dedup_push(&mut lower, Expr::int(0));
                            dedup_push(&mut upper, Expr::int(k - 1));
                        }
                    }
                }
                BinaryOp::Min => {
                    for e in lhi.iter().chain(rhi.iter()) {
                        dedup_push(&mut upper, e.clone());
                    }
                    for a in &llo {
                        for b in &rlo {
                            dedup_push(&mut lower, Expr::min(a.clone(), b.clone()));
                        }
                    }
                }
                BinaryOp::Max => {
                    for e in llo.iter().chain(rlo.iter()) {
                        dedup_push(&mut lower, e.clone());
                    }
                    for a in &lhi {
                        for b in &rhi {
                            dedup_push(&mut upper, Expr::max(a.clone(), b.clone()));
                        }
                    }
                }
                _ => {}
            }
        }
        _ => {}
    }
    (lower, upper)
}

/// Largest constant lower bound, if any candidate is constant.
pub fn const_lower_bound(expr: &Expr, ctx: &BoundCtx) -> Option<i64> {
    bounds(expr, ctx).0.iter().filter_map(Expr::as_int).max()
}

/// Smallest constant upper bound, if any candidate is constant.
pub fn const_upper_bound(expr: &Expr, ctx: &BoundCtx) -> Option<i64> {
    bounds(expr, ctx).1.iter().filter_map(Expr::as_int).min()
}

/// Prove `a <= b` under `ctx`.
pub fn prove_le(a: &Expr, b: &Expr, ctx: &BoundCtx) -> bool {
    let diff = Expr::sub(a.clone(), b.clone());
    if let Some(c) = analyze_linear(&diff).as_constant() {
        return c <= 0;
    }
    const_upper_bound(&diff, ctx).is_some_and(|c| c <= 0)
}

/// Prove `a >= 0` under `ctx`.
pub fn prove_nonneg(a: &Expr, ctx: &BoundCtx) -> bool {
    if let Some(c) = analyze_linear(a).as_constant() {
        return c >= 0;
    }
    const_lower_bound(a, ctx).is_some_and(|c| c >= 0)
}

/// Prove `a > 0` under `ctx`.
pub fn prove_positive(a: &Expr, ctx: &BoundCtx) -> bool {
    if let Some(c) = analyze_linear(a).as_constant() {
        return c > 0;
    }
    const_lower_bound(a, ctx).is_some_and(|c| c > 0)
}

/// Prove `a == b` under `ctx`: their difference is the constant zero, or
/// they are squeezed between equal constant bounds.
pub fn prove_eq(a: &Expr, b: &Expr, ctx: &BoundCtx) -> bool {
    let diff = Expr::sub(a.clone(), b.clone());
    if analyze_linear(&diff).as_constant() == Some(0) {
        return true;
    }
    matches!(
        (const_lower_bound(&diff, ctx), const_upper_bound(&diff, ctx)),
        (Some(lo), Some(hi)) if lo == 0 && hi == 0
    )
}
