//! Floating-point simplification.
//!
//! Only rewrites valid under the crate's floating-point contract:
//! reassociation is never assumed (that is reserved for explicitly marked
//! reductions), so the rules here are constant folding, exact identities and
//! unary-math evaluation on literals.

use tracing::debug;

use crate::error::Result;
use crate::ir::visit::{rebuild_expr, Mutator};
use crate::ir::{BinaryOp, Expr, Func, Stmt, UnaryOp};

struct FloatSimplify;

fn fold_float(op: BinaryOp, a: f64, b: f64) -> Option<Expr> {
    Some(match op {
        BinaryOp::Add => Expr::FloatConst(a + b),
        BinaryOp::Sub => Expr::FloatConst(a - b),
        BinaryOp::Mul => Expr::FloatConst(a * b),
        BinaryOp::RealDiv if b != 0.0 => Expr::FloatConst(a / b),
        BinaryOp::Min => Expr::FloatConst(a.min(b)),
        BinaryOp::Max => Expr::FloatConst(a.max(b)),
        BinaryOp::Lt => Expr::BoolConst(a < b),
        BinaryOp::Le => Expr::BoolConst(a <= b),
        BinaryOp::Gt => Expr::BoolConst(a > b),
        BinaryOp::Ge => Expr::BoolConst(a >= b),
        _ => return None,
    })
}

fn fold_unary(op: UnaryOp, v: f64) -> Option<f64> {
    Some(match op {
        UnaryOp::Sqrt if v >= 0.0 => v.sqrt(),
        UnaryOp::Exp => v.exp(),
        UnaryOp::Square => v * v,
        UnaryOp::Sigmoid => 1.0 / (1.0 + (-v).exp()),
        UnaryOp::Tanh => v.tanh(),
        UnaryOp::Abs => v.abs(),
        UnaryOp::Floor => v.floor(),
        UnaryOp::Ceil => v.ceil(),
        _ => return None,
    })
}

impl Mutator for FloatSimplify {
    fn mutate_expr(&mut self, expr: Expr) -> Result<Expr> {
        let rebuilt = rebuild_expr(self, expr)?;
        Ok(match rebuilt {
            Expr::Binary { op, lhs, rhs } => {
                if let (Expr::FloatConst(a), Expr::FloatConst(b)) = (lhs.as_ref(), rhs.as_ref()) {
                    if let Some(folded) = fold_float(op, *a, *b) {
                        return Ok(folded);
                    }
                }
                match (op, lhs.as_ref(), rhs.as_ref()) {
                    // x + 0.0, 0.0 + x, x - 0.0
                    (BinaryOp::Add, _, Expr::FloatConst(z)) if *z == 0.0 => *lhs,
                    (BinaryOp::Add, Expr::FloatConst(z), _) if *z == 0.0 => *rhs,
                    (BinaryOp::Sub, _, Expr::FloatConst(z)) if *z == 0.0 => *lhs,
                    // x * 1.0, 1.0 * x, x / 1.0
                    (BinaryOp::Mul, _, Expr::FloatConst(o)) if *o == 1.0 => *lhs,
                    (BinaryOp::Mul, Expr::FloatConst(o), _) if *o == 1.0 => *rhs,
                    (BinaryOp::RealDiv, _, Expr::FloatConst(o)) if *o == 1.0 => *lhs,
                    _ => Expr::Binary { op, lhs, rhs },
                }
            }
            Expr::Unary { op, operand } => match operand.as_ref() {
                Expr::FloatConst(v) => match fold_unary(op, *v) {
                    Some(folded) => Expr::FloatConst(folded),
                    None => Expr::Unary { op, operand },
                },
                // sqrt(square(x)) == abs(x), exactly
                Expr::Unary {
                    op: UnaryOp::Square,
                    operand: inner,
                } if op == UnaryOp::Sqrt => Expr::unary(UnaryOp::Abs, inner.as_ref().clone()),
                _ => Expr::Unary { op, operand },
            },
            other => other,
        })
    }
}

/// Float simplification of one statement tree.
pub fn float_simplify_stmt(stmt: Stmt) -> Result<Stmt> {
    FloatSimplify.mutate_stmt(stmt)
}

/// Float simplification of a function.
pub fn float_simplify(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: float_simplify");
    func.map_body(float_simplify_stmt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simp(e: Expr) -> Expr {
        match FloatSimplify.mutate_expr(e) {
            Ok(out) => out,
            Err(err) => panic!("float_simplify failed: {err}"),
        }
    }

    #[test]
    fn test_const_folding() {
        let e = Expr::mul(Expr::FloatConst(2.0), Expr::FloatConst(3.5));
        assert_eq!(simp(e), Expr::FloatConst(7.0));
    }

    #[test]
    fn test_additive_identity() {
        let x = Expr::load("x", vec![]);
        assert_eq!(simp(Expr::add(x.clone(), Expr::FloatConst(0.0))), x);
    }

    #[test]
    fn test_no_reassociation() {
        // (x + 1.0) + 2.0 must not fold into x + 3.0
        let x = Expr::load("x", vec![]);
        let e = Expr::add(Expr::add(x.clone(), Expr::FloatConst(1.0)), Expr::FloatConst(2.0));
        let out = simp(e.clone());
        assert_eq!(out, e);
    }

    #[test]
    fn test_sqrt_of_square_is_abs() {
        let x = Expr::load("x", vec![]);
        let e = Expr::unary(UnaryOp::Sqrt, Expr::unary(UnaryOp::Square, x.clone()));
        assert_eq!(simp(e), Expr::unary(UnaryOp::Abs, x));
    }

    #[test]
    fn test_unary_folding() {
        assert_eq!(
            simp(Expr::unary(UnaryOp::Sqrt, Expr::FloatConst(9.0))),
            Expr::FloatConst(3.0)
        );
    }
}
