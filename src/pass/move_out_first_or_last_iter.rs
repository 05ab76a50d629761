//! Peel specialized first/last iterations.
//!
//! A loop whose body is entirely an `If (iter == begin)` or
//! `If (iter == end - 1)` executes that branch exactly once; the branch is
//! peeled out of the loop with the iterator substituted, and the remaining
//! loop range shrinks by one.

use tracing::debug;

use crate::analyze::bounds::prove_eq;
use crate::analyze::bounds::BoundCtx;
use crate::error::Result;
use crate::ir::visit::{rebuild_stmt, subst_var, Mutator};
use crate::ir::{BinaryOp, Expr, Func, Stmt, StmtKind};

struct MoveOutFirstOrLastIter;

enum Peel {
    First,
    Last,
}

fn match_peel(cond: &Expr, iter: &str, begin: &Expr, end: &Expr) -> Option<Peel> {
    let Expr::Binary {
        op: BinaryOp::Eq,
        lhs,
        rhs,
    } = cond
    else {
        return None;
    };
    let bound = match (lhs.as_ref(), rhs.as_ref()) {
        (Expr::Var(n), b) if n == iter => b,
        (b, Expr::Var(n)) if n == iter => b,
        _ => return None,
    };
    let ctx = BoundCtx::new();
    if prove_eq(bound, begin, &ctx) {
        return Some(Peel::First);
    }
    let last = Expr::sub(end.clone(), Expr::int(1));
    if prove_eq(bound, &last, &ctx) {
        return Some(Peel::Last);
    }
    None
}

impl Mutator for MoveOutFirstOrLastIter {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        let Stmt { id, kind } = stmt;
        if let StmtKind::For {
            iter,
            begin,
            end,
            step,
            len,
            property,
            body,
        } = kind
        {
            let peelable = step.as_int() == Some(1)
                && property.parallel.is_serial()
                && property.reductions.is_empty();
            if peelable {
                if let StmtKind::If {
                    cond,
                    then_case,
                    else_case: None,
                } = &body.kind
                {
                    if let Some(which) = match_peel(cond, &iter, &begin, &end) {
                        let (peeled_at, new_begin, new_end) = match which {
                            Peel::First => (
                                begin.clone(),
                                Expr::add(begin.clone(), Expr::int(1)),
                                end.clone(),
                            ),
                            Peel::Last => (
                                Expr::sub(end.clone(), Expr::int(1)),
                                begin.clone(),
                                Expr::sub(end.clone(), Expr::int(1)),
                            ),
                        };
                        let peeled = subst_var((**then_case).clone(), &iter, &peeled_at)?;
                        // An empty loop runs no iteration to peel
                        let nonempty = crate::analyze::bounds::prove_le(
                            &Expr::add(begin.clone(), Expr::int(1)),
                            &end,
                            &BoundCtx::new(),
                        );
                        let peeled = if nonempty {
                            peeled
                        } else {
                            Stmt::if_then(Expr::lt(begin.clone(), end.clone()), peeled)
                        };
                        let len = Expr::sub(new_end.clone(), new_begin.clone());
                        let rest = Stmt::new(
                            id,
                            StmtKind::For {
                                iter,
                                begin: new_begin,
                                end: new_end,
                                step,
                                len,
                                property,
                                body: Box::new(Stmt::seq(vec![])),
                            },
                        );
                        // The shrunken loop keeps the original ID but runs
                        // over an empty body: peeling the guard leaves it
                        // nothing to do, and simplify removes it.
                        let stmts = match which {
                            Peel::First => vec![peeled, rest],
                            Peel::Last => vec![rest, peeled],
                        };
                        return Ok(Stmt::seq(stmts));
                    }
                }
            }
            return Ok(Stmt::new(
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
            ));
        }
        Ok(Stmt::new(id, kind))
    }
}

/// Peel guarded first/last iterations out of their loops.
pub fn move_out_first_or_last_iter(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: move_out_first_or_last_iter");
    func.map_body(|body| MoveOutFirstOrLastIter.mutate_stmt(body))
}
