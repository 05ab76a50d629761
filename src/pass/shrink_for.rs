//! Loop-range shrinking.
//!
//! A loop whose whole body is guarded by conditions on its own iterator has
//! its range tightened to the guarded window and the guard removed. Runs
//! after `remove_writes` and `make_parallel_reduction`, which expose such
//! guards.

use tracing::debug;

use crate::analyze::access::expr_uses_name;
use crate::analyze::linear::analyze_linear;
use crate::error::Result;
use crate::ir::visit::{rebuild_stmt, Mutator};
use crate::ir::{BinaryOp, Expr, Func, Stmt, StmtKind};

struct ShrinkFor;

/// Split a guard into iterator constraints and a residue. Returns
/// `(new_begin, new_end, residue)`, both bounds optional.
fn split_guard(cond: &Expr, iter: &str) -> (Option<Expr>, Option<Expr>, Option<Expr>) {
    if let Expr::Binary {
        op: BinaryOp::LAnd,
        lhs,
        rhs,
    } = cond
    {
        let (b1, e1, r1) = split_guard(lhs, iter);
        let (b2, e2, r2) = split_guard(rhs, iter);
        let begin = match (b1, b2) {
            (Some(a), Some(b)) => Some(Expr::max(a, b)),
            (a, b) => a.or(b),
        };
        let end = match (e1, e2) {
            (Some(a), Some(b)) => Some(Expr::min(a, b)),
            (a, b) => a.or(b),
        };
        let residue = match (r1, r2) {
            (Some(a), Some(b)) => Some(Expr::land(a, b)),
            (a, b) => a.or(b),
        };
        return (begin, end, residue);
    }

    if let Expr::Binary { op, lhs, rhs } = cond {
        // The bound side must not mention the iterator itself
        match (lhs.as_ref(), rhs.as_ref()) {
            (Expr::Var(n), bound) if n == iter && !expr_uses_name(bound, iter) => match op {
                BinaryOp::Lt => return (None, Some(bound.clone()), None),
                BinaryOp::Le => {
                    return (None, Some(Expr::add(bound.clone(), Expr::int(1))), None)
                }
                BinaryOp::Ge => return (Some(bound.clone()), None, None),
                BinaryOp::Gt => {
                    return (Some(Expr::add(bound.clone(), Expr::int(1))), None, None)
                }
                BinaryOp::Eq => {
                    return (
                        Some(bound.clone()),
                        Some(Expr::add(bound.clone(), Expr::int(1))),
                        None,
                    )
                }
                _ => {}
            },
            (bound, Expr::Var(n)) if n == iter && !expr_uses_name(bound, iter) => match op {
                BinaryOp::Gt => return (None, Some(bound.clone()), None),
                BinaryOp::Ge => {
                    return (None, Some(Expr::add(bound.clone(), Expr::int(1))), None)
                }
                BinaryOp::Le => return (Some(bound.clone()), None, None),
                BinaryOp::Lt => {
                    return (Some(Expr::add(bound.clone(), Expr::int(1))), None, None)
                }
                BinaryOp::Eq => {
                    return (
                        Some(bound.clone()),
                        Some(Expr::add(bound.clone(), Expr::int(1))),
                        None,
                    )
                }
                _ => {}
            },
            _ => {}
        }
    }
    (None, None, Some(cond.clone()))
}

impl Mutator for ShrinkFor {
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
            // Only unit-step loops have the simple window semantics
            if step.as_int() == Some(1) {
                if let StmtKind::If {
                    cond,
                    then_case,
                    else_case: None,
                } = &body.kind
                {
                    let (g_begin, g_end, residue) = split_guard(cond, &iter);
                    if g_begin.is_some() || g_end.is_some() {
                        let begin = match g_begin {
                            Some(g) => analyze_linear(&Expr::max(begin, g)).to_expr(),
                            None => begin,
                        };
                        let end = match g_end {
                            Some(g) => analyze_linear(&Expr::min(end, g)).to_expr(),
                            None => end,
                        };
                        let len = Expr::sub(end.clone(), begin.clone());
                        let inner = (**then_case).clone();
                        let body = match residue {
                            Some(r) => Stmt::new(body.id.clone(), StmtKind::If {
                                cond: r,
                                then_case: Box::new(inner),
                                else_case: None,
                            }),
                            None => inner,
                        };
                        return Ok(Stmt::new(
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
                        ));
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

/// Tighten loop ranges to their guarded windows.
pub fn shrink_for(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: shrink_for");
    func.map_body(|body| ShrinkFor.mutate_stmt(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guarded_loop(cond: Expr) -> Stmt {
        Stmt::for_range(
            "i",
            Expr::int(0),
            Expr::int(100),
            Stmt::if_then(cond, Stmt::store("a", vec![Expr::var("i")], Expr::int(1))),
        )
    }

    fn range_of(stmt: &Stmt) -> (Expr, Expr) {
        match &stmt.kind {
            StmtKind::For { begin, end, .. } => (begin.clone(), end.clone()),
            other => panic!("expected For, got {other:?}"),
        }
    }

    #[test]
    fn test_upper_guard_tightens_end() {
        let l = guarded_loop(Expr::lt(Expr::var("i"), Expr::int(10)));
        let out = ShrinkFor.mutate_stmt(l).expect("pass");
        let (begin, end) = range_of(&out);
        assert_eq!(begin, Expr::int(0));
        assert_eq!(end, Expr::min(Expr::int(100), Expr::int(10)));
        // Guard gone
        assert!(matches!(
            &out.kind,
            StmtKind::For { body, .. } if matches!(body.kind, StmtKind::Store { .. })
        ));
    }

    #[test]
    fn test_two_sided_guard() {
        let l = guarded_loop(Expr::land(
            Expr::ge(Expr::var("i"), Expr::int(4)),
            Expr::lt(Expr::var("i"), Expr::int(12)),
        ));
        let out = ShrinkFor.mutate_stmt(l).expect("pass");
        let (begin, end) = range_of(&out);
        assert_eq!(begin, Expr::max(Expr::int(0), Expr::int(4)));
        assert_eq!(end, Expr::min(Expr::int(100), Expr::int(12)));
    }

    #[test]
    fn test_unrelated_guard_stays() {
        let l = guarded_loop(Expr::lt(Expr::load("n", vec![]), Expr::int(10)));
        let out = ShrinkFor.mutate_stmt(l).expect("pass");
        assert!(matches!(
            &out.kind,
            StmtKind::For { body, .. } if matches!(body.kind, StmtKind::If { .. })
        ));
    }

    #[test]
    fn test_mixed_guard_keeps_residue() {
        let l = guarded_loop(Expr::land(
            Expr::lt(Expr::var("i"), Expr::int(10)),
            Expr::lt(Expr::load("n", vec![]), Expr::int(3)),
        ));
        let out = ShrinkFor.mutate_stmt(l).expect("pass");
        let (_, end) = range_of(&out);
        assert_eq!(end, Expr::min(Expr::int(100), Expr::int(10)));
        assert!(matches!(
            &out.kind,
            StmtKind::For { body, .. } if matches!(body.kind, StmtKind::If { .. })
        ));
    }
}
