//! Traversal framework: read-only [`Visitor`] and rebuilding [`Mutator`].
//!
//! Both dispatch on node kind through a single hook per category; the `walk_*`
//! and `rebuild_*` free functions enumerate children so implementations never
//! do. A typical pass overrides `visit_stmt`/`mutate_stmt`, matches the kinds
//! it cares about and delegates the rest:
//!
//! ```ignore
//! impl Mutator for RemoveEvals {
//!     fn mutate_stmt(&mut self, s: Stmt) -> Result<Stmt> {
//!         match s.kind {
//!             StmtKind::Eval { .. } => Ok(Stmt::seq(vec![]).with_id(s.id)),
//!             _ => rebuild_stmt(self, s),
//!         }
//!     }
//! }
//! ```

use crate::error::Result;
use crate::ir::{Expr, ForProperty, ReductionItem, Stmt, StmtKind};

/// Read-only traversal. Hooks default to walking all children.
pub trait Visitor {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }
}

/// Visit every child of `stmt` (statements and expressions) in source order.
pub fn walk_stmt<V: Visitor + ?Sized>(v: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::StmtSeq { stmts } => {
            for s in stmts {
                v.visit_stmt(s);
            }
        }
        StmtKind::VarDef { buffer, body, .. } => {
            for dim in &buffer.tensor.shape {
                v.visit_expr(dim);
            }
            v.visit_stmt(body);
        }
        StmtKind::Store { indices, expr, .. } => {
            for idx in indices {
                v.visit_expr(idx);
            }
            v.visit_expr(expr);
        }
        StmtKind::ReduceTo { indices, expr, .. } => {
            for idx in indices {
                v.visit_expr(idx);
            }
            v.visit_expr(expr);
        }
        StmtKind::For {
            begin,
            end,
            step,
            len,
            property,
            body,
            ..
        } => {
            v.visit_expr(begin);
            v.visit_expr(end);
            v.visit_expr(step);
            v.visit_expr(len);
            for red in &property.reductions {
                for b in &red.begins {
                    v.visit_expr(b);
                }
                for e in &red.ends {
                    v.visit_expr(e);
                }
            }
            v.visit_stmt(body);
        }
        StmtKind::If {
            cond,
            then_case,
            else_case,
        } => {
            v.visit_expr(cond);
            v.visit_stmt(then_case);
            if let Some(e) = else_case {
                v.visit_stmt(e);
            }
        }
        StmtKind::Assert { cond, body } | StmtKind::Assume { cond, body } => {
            v.visit_expr(cond);
            v.visit_stmt(body);
        }
        StmtKind::Eval { expr } => v.visit_expr(expr),
        StmtKind::Any => {}
    }
}

/// Visit every child expression of `expr` in source order.
pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, expr: &Expr) {
    match expr {
        Expr::Load { indices, .. } => {
            for idx in indices {
                v.visit_expr(idx);
            }
        }
        Expr::Binary { lhs, rhs, .. } => {
            v.visit_expr(lhs);
            v.visit_expr(rhs);
        }
        Expr::Unary { operand, .. } | Expr::Cast { operand, .. } => v.visit_expr(operand),
        Expr::IfExpr {
            cond,
            then_case,
            else_case,
        } => {
            v.visit_expr(cond);
            v.visit_expr(then_case);
            v.visit_expr(else_case);
        }
        Expr::Intrinsic { args, .. } => {
            for a in args {
                v.visit_expr(a);
            }
        }
        Expr::Var(_)
        | Expr::IntConst(_)
        | Expr::FloatConst(_)
        | Expr::BoolConst(_)
        | Expr::Any => {}
    }
}

/// Pre-order closure walk over one expression tree.
pub fn walk_expr_pre(expr: &Expr, f: &mut impl FnMut(&Expr)) {
    struct W<'a, F: FnMut(&Expr)> {
        f: &'a mut F,
    }
    impl<F: FnMut(&Expr)> Visitor for W<'_, F> {
        fn visit_expr(&mut self, expr: &Expr) {
            (self.f)(expr);
            walk_expr(self, expr);
        }
    }
    W { f }.visit_expr(expr);
}

/// Pre-order closure walk over every statement of a tree.
pub fn walk_stmt_pre(stmt: &Stmt, f: &mut impl FnMut(&Stmt)) {
    struct W<'a, F: FnMut(&Stmt)> {
        f: &'a mut F,
    }
    impl<F: FnMut(&Stmt)> Visitor for W<'_, F> {
        fn visit_stmt(&mut self, stmt: &Stmt) {
            (self.f)(stmt);
            walk_stmt(self, stmt);
        }
    }
    W { f }.visit_stmt(stmt);
}

/// Rebuilding traversal. Hooks default to reconstructing the node from its
/// recursively-mutated children, keeping the node's ID. All hooks return
/// `Result` so a legality failure deep inside a rewrite propagates with `?`.
pub trait Mutator {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        rebuild_stmt(self, stmt)
    }

    fn mutate_expr(&mut self, expr: Expr) -> Result<Expr> {
        rebuild_expr(self, expr)
    }
}

fn mutate_exprs<M: Mutator + ?Sized>(m: &mut M, exprs: Vec<Expr>) -> Result<Vec<Expr>> {
    exprs.into_iter().map(|e| m.mutate_expr(e)).collect()
}

/// Rebuild `stmt` with every child passed through the mutator.
pub fn rebuild_stmt<M: Mutator + ?Sized>(m: &mut M, stmt: Stmt) -> Result<Stmt> {
    let Stmt { id, kind } = stmt;
    let kind = match kind {
        StmtKind::StmtSeq { stmts } => StmtKind::StmtSeq {
            stmts: stmts
                .into_iter()
                .map(|s| m.mutate_stmt(s))
                .collect::<Result<_>>()?,
        },
        StmtKind::VarDef {
            name,
            mut buffer,
            pinned,
            body,
        } => {
            buffer.tensor.shape = mutate_exprs(m, buffer.tensor.shape)?;
            StmtKind::VarDef {
                name,
                buffer,
                pinned,
                body: Box::new(m.mutate_stmt(*body)?),
            }
        }
        StmtKind::Store { var, indices, expr } => StmtKind::Store {
            var,
            indices: mutate_exprs(m, indices)?,
            expr: m.mutate_expr(expr)?,
        },
        StmtKind::ReduceTo {
            var,
            indices,
            op,
            expr,
            atomic,
        } => StmtKind::ReduceTo {
            var,
            indices: mutate_exprs(m, indices)?,
            op,
            expr: m.mutate_expr(expr)?,
            atomic,
        },
        StmtKind::For {
            iter,
            begin,
            end,
            step,
            len,
            property,
            body,
        } => {
            let reductions = property
                .reductions
                .into_iter()
                .map(|red| {
                    Ok(ReductionItem {
                        op: red.op,
                        var: red.var,
                        begins: mutate_exprs(m, red.begins)?,
                        ends: mutate_exprs(m, red.ends)?,
                    })
                })
                .collect::<Result<_>>()?;
            StmtKind::For {
                iter,
                begin: m.mutate_expr(begin)?,
                end: m.mutate_expr(end)?,
                step: m.mutate_expr(step)?,
                len: m.mutate_expr(len)?,
                property: ForProperty {
                    reductions,
                    ..property
                },
                body: Box::new(m.mutate_stmt(*body)?),
            }
        }
        StmtKind::If {
            cond,
            then_case,
            else_case,
        } => StmtKind::If {
            cond: m.mutate_expr(cond)?,
            then_case: Box::new(m.mutate_stmt(*then_case)?),
            else_case: match else_case {
                Some(e) => Some(Box::new(m.mutate_stmt(*e)?)),
                None => None,
            },
        },
        StmtKind::Assert { cond, body } => StmtKind::Assert {
            cond: m.mutate_expr(cond)?,
            body: Box::new(m.mutate_stmt(*body)?),
        },
        StmtKind::Assume { cond, body } => StmtKind::Assume {
            cond: m.mutate_expr(cond)?,
            body: Box::new(m.mutate_stmt(*body)?),
        },
        StmtKind::Eval { expr } => StmtKind::Eval {
            expr: m.mutate_expr(expr)?,
        },
        StmtKind::Any => StmtKind::Any,
    };
    Ok(Stmt { id, kind })
}

/// Rebuild `expr` with every child passed through the mutator.
pub fn rebuild_expr<M: Mutator + ?Sized>(m: &mut M, expr: Expr) -> Result<Expr> {
    Ok(match expr {
        Expr::Load { var, indices } => Expr::Load {
            var,
            indices: mutate_exprs(m, indices)?,
        },
        Expr::Binary { op, lhs, rhs } => Expr::Binary {
            op,
            lhs: Box::new(m.mutate_expr(*lhs)?),
            rhs: Box::new(m.mutate_expr(*rhs)?),
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op,
            operand: Box::new(m.mutate_expr(*operand)?),
        },
        Expr::IfExpr {
            cond,
            then_case,
            else_case,
        } => Expr::IfExpr {
            cond: Box::new(m.mutate_expr(*cond)?),
            then_case: Box::new(m.mutate_expr(*then_case)?),
            else_case: Box::new(m.mutate_expr(*else_case)?),
        },
        Expr::Cast { dtype, operand } => Expr::Cast {
            dtype,
            operand: Box::new(m.mutate_expr(*operand)?),
        },
        Expr::Intrinsic {
            format,
            args,
            ret_type,
        } => Expr::Intrinsic {
            format,
            args: mutate_exprs(m, args)?,
            ret_type,
        },
        leaf @ (Expr::Var(_)
        | Expr::IntConst(_)
        | Expr::FloatConst(_)
        | Expr::BoolConst(_)
        | Expr::Any) => leaf,
    })
}

/// Substitute every `Var(name)` occurrence by `replacement`.
pub struct SubstVar<'a> {
    pub name: &'a str,
    pub replacement: &'a Expr,
}

impl Mutator for SubstVar<'_> {
    fn mutate_expr(&mut self, expr: Expr) -> Result<Expr> {
        match expr {
            Expr::Var(ref n) if n == self.name => Ok(self.replacement.clone()),
            other => rebuild_expr(self, other),
        }
    }
}

/// Convenience: replace iterator `name` by `replacement` throughout `stmt`.
pub fn subst_var(stmt: Stmt, name: &str, replacement: &Expr) -> Result<Stmt> {
    SubstVar { name, replacement }.mutate_stmt(stmt)
}

/// Convenience: the same substitution inside a single expression.
pub fn subst_var_expr(expr: Expr, name: &str, replacement: &Expr) -> Result<Expr> {
    SubstVar { name, replacement }.mutate_expr(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::hash::hash_stmt;

    struct Identity;
    impl Mutator for Identity {}

    #[test]
    fn test_identity_mutator_preserves_structure() {
        let stmt = Stmt::for_range(
            "i",
            Expr::int(0),
            Expr::int(16),
            Stmt::store("a", vec![Expr::var("i")], Expr::int(1)),
        );
        let before = hash_stmt(&stmt);
        let rebuilt = Identity.mutate_stmt(stmt).expect("identity cannot fail");
        assert_eq!(hash_stmt(&rebuilt), before);
    }

    #[test]
    fn test_subst_var_replaces_all_occurrences() {
        let stmt = Stmt::store(
            "a",
            vec![Expr::var("i")],
            Expr::add(Expr::var("i"), Expr::int(1)),
        );
        let out = subst_var(stmt, "i", &Expr::int(3)).expect("subst");
        match out.kind {
            StmtKind::Store { indices, expr, .. } => {
                assert_eq!(indices[0], Expr::int(3));
                assert_eq!(expr, Expr::add(Expr::int(3), Expr::int(1)));
            }
            other => panic!("expected Store, got {other:?}"),
        }
    }

    #[test]
    fn test_subst_var_does_not_touch_other_names() {
        let e = Expr::add(Expr::var("i"), Expr::var("j"));
        let out = subst_var_expr(e, "i", &Expr::int(0)).expect("subst");
        assert_eq!(out, Expr::add(Expr::int(0), Expr::var("j")));
    }
}
