//! Fixed-point simplification.
//!
//! One iteration rewrites bottom-up: constant folding, algebraic identities,
//! linear-form normalization, and bound-driven rewrites (comparisons decided
//! by interval analysis, `min`/`max` collapsed when one side provably
//! dominates, bound-equal expressions replaced by their structurally
//! simplest form). Control flow folds with its conditions: a constant `If`
//! keeps one branch, a loop with a provably empty range disappears, a
//! single-iteration loop inlines its body.
//!
//! Iteration aborts as soon as a round yields a structurally identical tree.

use tracing::debug;

use crate::analyze::bounds::{self, BoundCtx};
use crate::analyze::linear::analyze_linear;
use crate::error::Result;
use crate::ir::hash::{hash_expr, hash_stmt};
use crate::ir::visit::{rebuild_expr, rebuild_stmt, subst_var, Mutator};
use crate::ir::{BinaryOp, Expr, Func, Stmt, StmtKind, UnaryOp};

/// Maximum rewrite rounds before giving up on a fixpoint.
const MAX_ITERATIONS: usize = 10;

struct SimplifyPass {
    ctx: BoundCtx,
}

impl SimplifyPass {
    fn new() -> Self {
        SimplifyPass {
            ctx: BoundCtx::new(),
        }
    }
}

fn fold_int(op: BinaryOp, a: i64, b: i64) -> Option<Expr> {
    Some(match op {
        BinaryOp::Add => Expr::int(a + b),
        BinaryOp::Sub => Expr::int(a - b),
        BinaryOp::Mul => Expr::int(a * b),
        BinaryOp::FloorDiv if b != 0 => Expr::int(a.div_euclid(b)),
        BinaryOp::CeilDiv if b != 0 => Expr::int((a + b - 1).div_euclid(b)),
        BinaryOp::RoundTowards0Div if b != 0 => Expr::int(a / b),
        BinaryOp::Mod if b != 0 => Expr::int(a.rem_euclid(b)),
        BinaryOp::Remainder if b != 0 => Expr::int(a % b),
        BinaryOp::Min => Expr::int(a.min(b)),
        BinaryOp::Max => Expr::int(a.max(b)),
        BinaryOp::Lt => Expr::BoolConst(a < b),
        BinaryOp::Le => Expr::BoolConst(a <= b),
        BinaryOp::Gt => Expr::BoolConst(a > b),
        BinaryOp::Ge => Expr::BoolConst(a >= b),
        BinaryOp::Eq => Expr::BoolConst(a == b),
        BinaryOp::Ne => Expr::BoolConst(a != b),
        _ => return None,
    })
}

fn fold_bool(op: BinaryOp, a: bool, b: bool) -> Option<Expr> {
    Some(match op {
        BinaryOp::LAnd => Expr::BoolConst(a && b),
        BinaryOp::LOr => Expr::BoolConst(a || b),
        BinaryOp::Eq => Expr::BoolConst(a == b),
        BinaryOp::Ne => Expr::BoolConst(a != b),
        _ => return None,
    })
}

/// Integer-typed operators where linear normalization applies.
fn is_linear_op(op: BinaryOp) -> bool {
    matches!(op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul)
}

/// Cancel `k·(x // k) + (x % k)` back to `x` inside a linear form. Loop
/// merging produces exactly this shape when it remaps iterators.
fn fold_div_mod(e: &Expr) -> Option<Expr> {
    let lin = analyze_linear(e);
    for (h1, (c_div, a_div)) in &lin.terms {
        let Expr::Binary {
            op: BinaryOp::FloorDiv,
            lhs: x,
            rhs,
        } = &a_div.expr
        else {
            continue;
        };
        let Some(k) = rhs.as_int() else { continue };
        for (h2, (c_mod, a_mod)) in &lin.terms {
            if h1 == h2 {
                continue;
            }
            let Expr::Binary {
                op: BinaryOp::Mod,
                lhs: x2,
                rhs: r2,
            } = &a_mod.expr
            else {
                continue;
            };
            if r2.as_int() != Some(k) || *c_div != k * *c_mod || !hash_expr(x).eq(&hash_expr(x2))
            {
                continue;
            }
            let mut rest = lin.clone();
            rest.terms.remove(h1);
            rest.terms.remove(h2);
            let combined = Expr::add(
                rest.to_expr(),
                Expr::mul(Expr::int(*c_mod), x.as_ref().clone()),
            );
            return Some(analyze_linear(&combined).to_expr());
        }
    }
    None
}

fn simplify_binary(op: BinaryOp, lhs: Expr, rhs: Expr, ctx: &BoundCtx) -> Expr {
    if let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) {
        if let Some(folded) = fold_int(op, a, b) {
            return folded;
        }
    }
    if let (Expr::BoolConst(a), Expr::BoolConst(b)) = (&lhs, &rhs) {
        if let Some(folded) = fold_bool(op, *a, *b) {
            return folded;
        }
    }

    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
            let e = Expr::binary(op, lhs, rhs);
            if let Some(folded) = fold_div_mod(&e) {
                return folded;
            }
            let lin = analyze_linear(&e);
            let normalized = lin.to_expr();
            if normalized.size() < e.size() {
                normalized
            } else {
                e
            }
        }
        BinaryOp::FloorDiv | BinaryOp::CeilDiv | BinaryOp::RoundTowards0Div => {
            if rhs.as_int() == Some(1) {
                lhs
            } else if lhs.as_int() == Some(0) {
                Expr::int(0)
            } else {
                Expr::binary(op, lhs, rhs)
            }
        }
        BinaryOp::Mod | BinaryOp::Remainder => {
            if rhs.as_int() == Some(1) {
                Expr::int(0)
            } else if bounds::prove_nonneg(&lhs, ctx)
                && bounds::prove_positive(&rhs, ctx)
                && bounds::prove_le(&Expr::add(lhs.clone(), Expr::int(1)), &rhs, ctx)
            {
                // 0 <= lhs < rhs
                lhs
            } else {
                Expr::binary(op, lhs, rhs)
            }
        }
        BinaryOp::Min => {
            if hash_expr(&lhs) == hash_expr(&rhs) || bounds::prove_le(&lhs, &rhs, ctx) {
                lhs
            } else if bounds::prove_le(&rhs, &lhs, ctx) {
                rhs
            } else {
                Expr::min(lhs, rhs)
            }
        }
        BinaryOp::Max => {
            if hash_expr(&lhs) == hash_expr(&rhs) || bounds::prove_le(&rhs, &lhs, ctx) {
                lhs
            } else if bounds::prove_le(&lhs, &rhs, ctx) {
                rhs
            } else {
                Expr::max(lhs, rhs)
            }
        }
        _ if op.is_comparison() => {
            let diff = Expr::sub(lhs.clone(), rhs.clone());
            let (lo, hi) = (
                bounds::const_lower_bound(&diff, ctx),
                bounds::const_upper_bound(&diff, ctx),
            );
            let decided = match op {
                BinaryOp::Lt => match (lo, hi) {
                    (_, Some(hi)) if hi < 0 => Some(true),
                    (Some(lo), _) if lo >= 0 => Some(false),
                    _ => None,
                },
                BinaryOp::Le => match (lo, hi) {
                    (_, Some(hi)) if hi <= 0 => Some(true),
                    (Some(lo), _) if lo > 0 => Some(false),
                    _ => None,
                },
                BinaryOp::Gt => match (lo, hi) {
                    (Some(lo), _) if lo > 0 => Some(true),
                    (_, Some(hi)) if hi <= 0 => Some(false),
                    _ => None,
                },
                BinaryOp::Ge => match (lo, hi) {
                    (Some(lo), _) if lo >= 0 => Some(true),
                    (_, Some(hi)) if hi < 0 => Some(false),
                    _ => None,
                },
                BinaryOp::Eq => match (lo, hi) {
                    (Some(0), Some(0)) => Some(true),
                    (Some(lo), _) if lo > 0 => Some(false),
                    (_, Some(hi)) if hi < 0 => Some(false),
                    _ => None,
                },
                BinaryOp::Ne => match (lo, hi) {
                    (Some(0), Some(0)) => Some(false),
                    (Some(lo), _) if lo > 0 => Some(true),
                    (_, Some(hi)) if hi < 0 => Some(true),
                    _ => None,
                },
                _ => None,
            };
            match decided {
                Some(v) => Expr::BoolConst(v),
                None => Expr::binary(op, lhs, rhs),
            }
        }
        BinaryOp::LAnd => match (&lhs, &rhs) {
            (Expr::BoolConst(true), _) => rhs,
            (_, Expr::BoolConst(true)) => lhs,
            (Expr::BoolConst(false), _) | (_, Expr::BoolConst(false)) => Expr::BoolConst(false),
            _ => Expr::binary(op, lhs, rhs),
        },
        BinaryOp::LOr => match (&lhs, &rhs) {
            (Expr::BoolConst(false), _) => rhs,
            (_, Expr::BoolConst(false)) => lhs,
            (Expr::BoolConst(true), _) | (_, Expr::BoolConst(true)) => Expr::BoolConst(true),
            _ => Expr::binary(op, lhs, rhs),
        },
        _ => Expr::binary(op, lhs, rhs),
    }
}

/// After local rules: replace an integer expression by the structurally
/// simplest bound-equal candidate, if any is strictly smaller.
fn bound_equal_rewrite(e: Expr, ctx: &BoundCtx) -> Expr {
    if e.is_const() || matches!(e, Expr::Var(_)) {
        return e;
    }
    let is_integer_shape = matches!(&e, Expr::Binary { op, .. } if is_linear_op(*op) || op.is_div() || matches!(op, BinaryOp::Mod | BinaryOp::Min | BinaryOp::Max));
    if !is_integer_shape {
        return e;
    }
    let (lower, upper) = bounds::bounds(&e, ctx);
    let mut best: Option<Expr> = None;
    for l in &lower {
        let hl = hash_expr(l);
        if upper.iter().any(|u| hash_expr(u) == hl) {
            let better_than_best = best.as_ref().map_or(true, |b| l.size() < b.size());
            if l.size() < e.size() && better_than_best {
                best = Some(l.clone());
            }
        }
    }
    best.unwrap_or(e)
}

impl Mutator for SimplifyPass {
    fn mutate_expr(&mut self, expr: Expr) -> Result<Expr> {
        let rebuilt = rebuild_expr(self, expr)?;
        let out = match rebuilt {
            Expr::Binary { op, lhs, rhs } => simplify_binary(op, *lhs, *rhs, &self.ctx),
            Expr::Unary { op, operand } => match (op, operand.as_ref()) {
                (UnaryOp::LNot, Expr::BoolConst(b)) => Expr::BoolConst(!b),
                (UnaryOp::Abs, Expr::IntConst(v)) => Expr::int(v.abs()),
                _ => Expr::Unary { op, operand },
            },
            Expr::IfExpr {
                cond,
                then_case,
                else_case,
            } => match cond.as_ref() {
                Expr::BoolConst(true) => *then_case,
                Expr::BoolConst(false) => *else_case,
                _ => Expr::IfExpr {
                    cond,
                    then_case,
                    else_case,
                },
            },
            other => other,
        };
        Ok(bound_equal_rewrite(out, &self.ctx))
    }

    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let Stmt { id, kind } = stmt;
        match kind {
            StmtKind::For {
                iter,
                begin,
                end,
                step,
                len,
                property,
                body,
            } => {
                let begin = self.mutate_expr(begin)?;
                let end = self.mutate_expr(end)?;
                let step = self.mutate_expr(step)?;
                let len = self.mutate_expr(len)?;
                self.ctx.push_loop(&iter, &begin, &end);
                let body = self.mutate_stmt(*body)?;
                self.ctx.pop_loop(&iter);

                if let Some(n) = len.as_int() {
                    if n <= 0 {
                        return Ok(Stmt::new(id, StmtKind::StmtSeq { stmts: vec![] }));
                    }
                    if n == 1 && property.reductions.is_empty() && property.parallel.is_serial() {
                        return subst_var(body, &iter, &begin);
                    }
                }
                Ok(Stmt::new(
                    id,
                    StmtKind::For {
                        iter,
                        begin,
                        end,
                        step,
                        len,
                        property,
                        body: Box::new(body),
                    },
                ))
            }
            StmtKind::If {
                cond,
                then_case,
                else_case,
            } => {
                let cond = self.mutate_expr(cond)?;
                match cond {
                    Expr::BoolConst(true) => self.mutate_stmt(*then_case),
                    Expr::BoolConst(false) => match else_case {
                        Some(e) => self.mutate_stmt(*e),
                        None => Ok(Stmt::new(id, StmtKind::StmtSeq { stmts: vec![] })),
                    },
                    cond => {
                        self.ctx.push_cond(&cond);
                        let then_case = Box::new(self.mutate_stmt(*then_case)?);
                        self.ctx.pop_cond();
                        let else_case = match else_case {
                            Some(e) => Some(Box::new(self.mutate_stmt(*e)?)),
                            None => None,
                        };
                        Ok(Stmt::new(
                            id,
                            StmtKind::If {
                                cond,
                                then_case,
                                else_case,
                            },
                        ))
                    }
                }
            }
            StmtKind::Assert { cond, body } => {
                let cond = self.mutate_expr(cond)?;
                self.ctx.push_cond(&cond);
                let body = Box::new(self.mutate_stmt(*body)?);
                self.ctx.pop_cond();
                Ok(Stmt::new(id, StmtKind::Assert { cond, body }))
            }
            StmtKind::Assume { cond, body } => {
                let cond = self.mutate_expr(cond)?;
                self.ctx.push_cond(&cond);
                let body = Box::new(self.mutate_stmt(*body)?);
                self.ctx.pop_cond();
                Ok(Stmt::new(id, StmtKind::Assume { cond, body }))
            }
            StmtKind::StmtSeq { stmts } => {
                let mut out = Vec::with_capacity(stmts.len());
                for s in stmts {
                    let s = self.mutate_stmt(s)?;
                    // Drop empty sequences produced by folded control flow
                    match s.kind {
                        StmtKind::StmtSeq { ref stmts } if stmts.is_empty() => {}
                        StmtKind::StmtSeq { stmts } => out.extend(stmts),
                        _ => out.push(s),
                    }
                }
                Ok(Stmt::new(id, StmtKind::StmtSeq { stmts: out }))
            }
            other => rebuild_stmt(self, Stmt::new(id, other)),
        }
    }
}

/// Simplify one statement tree to fixpoint.
pub fn simplify_stmt(stmt: Stmt) -> Result<Stmt> {
    let mut current = stmt;
    for iteration in 0..MAX_ITERATIONS {
        let before = hash_stmt(&current);
        current = SimplifyPass::new().mutate_stmt(current)?;
        if hash_stmt(&current) == before {
            debug!(iteration, "simplify reached fixpoint");
            break;
        }
    }
    Ok(current)
}

/// Simplify a function to fixpoint.
pub fn simplify(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: simplify");
    func.map_body(simplify_stmt)
}
