//! Native-division conversion.
//!
//! `FloorDiv`/`CeilDiv` and floor-`Mod` need sign-correcting code on targets
//! whose `/` truncates towards zero. When both operands are provably
//! non-negative the three divisions agree, so the expression is converted to
//! the native forms (`RoundTowards0Div`, `Remainder`). Runs last in
//! lowering, after target-specific passes introduced their index math.

use tracing::debug;

use crate::analyze::bounds::{prove_nonneg, prove_positive, BoundCtx};
use crate::error::Result;
use crate::ir::visit::{rebuild_expr, rebuild_stmt, Mutator};
use crate::ir::{BinaryOp, Expr, Func, Stmt, StmtKind};

struct UseBuiltinDiv {
    ctx: BoundCtx,
}

impl Mutator for UseBuiltinDiv {
    fn mutate_expr(&mut self, expr: Expr) -> Result<Expr> {
        let expr = rebuild_expr(self, expr)?;
        Ok(match expr {
            Expr::Binary {
                op: op @ (BinaryOp::FloorDiv | BinaryOp::CeilDiv),
                lhs,
                rhs,
            } => {
                if prove_nonneg(&lhs, &self.ctx) && prove_positive(&rhs, &self.ctx) {
                    match op {
                        BinaryOp::FloorDiv => {
                            Expr::binary(BinaryOp::RoundTowards0Div, *lhs, *rhs)
                        }
                        // ceil(a/b) == (a + b - 1) / b for a >= 0, b > 0
                        _ => Expr::binary(
                            BinaryOp::RoundTowards0Div,
                            Expr::sub(Expr::add(*lhs, (*rhs).clone()), Expr::int(1)),
                            *rhs,
                        ),
                    }
                } else {
                    Expr::Binary { op, lhs, rhs }
                }
            }
            Expr::Binary {
                op: BinaryOp::Mod,
                lhs,
                rhs,
            } => {
                if prove_nonneg(&lhs, &self.ctx) && prove_positive(&rhs, &self.ctx) {
                    Expr::binary(BinaryOp::Remainder, *lhs, *rhs)
                } else {
                    Expr::Binary {
                        op: BinaryOp::Mod,
                        lhs,
                        rhs,
                    }
                }
            }
            other => other,
        })
    }

    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        // Maintain the bound context across control flow
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
                let body = Box::new(self.mutate_stmt(*body)?);
                self.ctx.pop_loop(&iter);
                Ok(Stmt::new(
                    id,
                    StmtKind::For {
                        iter,
                        begin,
                        end,
                        step,
                        len,
                        property,
                        body,
                    },
                ))
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
            other => rebuild_stmt(self, Stmt::new(id, other)),
        }
    }
}

/// Convert provably non-negative divisions to native forms.
pub fn use_builtin_div(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: use_builtin_div");
    func.map_body(|body| {
        UseBuiltinDiv {
            ctx: BoundCtx::new(),
        }
        .mutate_stmt(body)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_ops(stmt: &Stmt, target: BinaryOp) -> usize {
        let mut n = 0;
        crate::ir::visit::walk_stmt_pre(stmt, &mut |s| {
            if let StmtKind::Store { expr, indices, .. } = &s.kind {
                for e in indices.iter().chain(std::iter::once(expr)) {
                    crate::ir::visit::walk_expr_pre(e, &mut |e| {
                        if matches!(e, Expr::Binary { op, .. } if *op == target) {
                            n += 1;
                        }
                    });
                }
            }
        });
        n
    }

    #[test]
    fn test_nonneg_floor_div_converted() {
        // for i in 0..64: a[i / 4] = 0  -- i is provably non-negative
        let l = Stmt::for_range(
            "i",
            Expr::int(0),
            Expr::int(64),
            Stmt::store(
                "a",
                vec![Expr::floor_div(Expr::var("i"), Expr::int(4))],
                Expr::int(0),
            ),
        );
        let out = UseBuiltinDiv {
            ctx: BoundCtx::new(),
        }
        .mutate_stmt(l)
        .expect("pass");
        assert_eq!(count_ops(&out, BinaryOp::FloorDiv), 0);
        assert_eq!(count_ops(&out, BinaryOp::RoundTowards0Div), 1);
    }

    #[test]
    fn test_possibly_negative_kept() {
        let l = Stmt::for_range(
            "i",
            Expr::int(-8),
            Expr::int(8),
            Stmt::store(
                "a",
                vec![Expr::floor_div(Expr::var("i"), Expr::int(4))],
                Expr::int(0),
            ),
        );
        let out = UseBuiltinDiv {
            ctx: BoundCtx::new(),
        }
        .mutate_stmt(l)
        .expect("pass");
        assert_eq!(count_ops(&out, BinaryOp::FloorDiv), 1);
    }

    #[test]
    fn test_mod_becomes_remainder() {
        let l = Stmt::for_range(
            "i",
            Expr::int(0),
            Expr::int(64),
            Stmt::store(
                "a",
                vec![Expr::modulo(Expr::var("i"), Expr::int(4))],
                Expr::int(0),
            ),
        );
        let out = UseBuiltinDiv {
            ctx: BoundCtx::new(),
        }
        .mutate_stmt(l)
        .expect("pass");
        assert_eq!(count_ops(&out, BinaryOp::Mod), 0);
        assert_eq!(count_ops(&out, BinaryOp::Remainder), 1);
    }
}
