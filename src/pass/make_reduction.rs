//! Reduction canonicalization.
//!
//! `make_reduction` rewrites `v[i] = v[i] ⊕ e` into the dedicated
//! `ReduceTo` form (the only place the compiler is allowed to treat ⊕ as
//! associative); `undo_make_reduction` is its exact inverse, used before
//! rewrites that want plain stores back.

use tracing::debug;

use crate::analyze::access::expr_uses_name;
use crate::error::Result;
use crate::ir::hash::struct_eq_expr;
use crate::ir::visit::{rebuild_stmt, Mutator};
use crate::ir::{BinaryOp, Expr, Func, ReduceOp, Stmt, StmtKind};

fn as_reduce_op(op: BinaryOp) -> Option<ReduceOp> {
    Some(match op {
        BinaryOp::Add => ReduceOp::Add,
        BinaryOp::Mul => ReduceOp::Mul,
        BinaryOp::Min => ReduceOp::Min,
        BinaryOp::Max => ReduceOp::Max,
        BinaryOp::LAnd => ReduceOp::LAnd,
        BinaryOp::LOr => ReduceOp::LOr,
        _ => return None,
    })
}

fn is_self_load(expr: &Expr, var: &str, indices: &[Expr]) -> bool {
    matches!(
        expr,
        Expr::Load { var: lv, indices: li }
            if lv == var
                && li.len() == indices.len()
                && li.iter().zip(indices).all(|(a, b)| struct_eq_expr(a, b))
    )
}

struct MakeReduction;

impl Mutator for MakeReduction {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        let Stmt { id, kind } = stmt;
        if let StmtKind::Store { var, indices, expr } = kind {
            if let Expr::Binary { op, lhs, rhs } = &expr {
                if let Some(reduce_op) = as_reduce_op(*op) {
                    // v ⊕= e, with the self-load on either side; the other
                    // operand must not read v again
                    if is_self_load(lhs, &var, &indices) && !expr_uses_name(rhs, &var) {
                        return Ok(Stmt::new(
                            id,
                            StmtKind::ReduceTo {
                                var,
                                indices,
                                op: reduce_op,
                                expr: (**rhs).clone(),
                                atomic: false,
                            },
                        ));
                    }
                    if is_self_load(rhs, &var, &indices) && !expr_uses_name(lhs, &var) {
                        return Ok(Stmt::new(
                            id,
                            StmtKind::ReduceTo {
                                var,
                                indices,
                                op: reduce_op,
                                expr: (**lhs).clone(),
                                atomic: false,
                            },
                        ));
                    }
                }
            }
            return Ok(Stmt::new(id, StmtKind::Store { var, indices, expr }));
        }
        Ok(Stmt::new(id, kind))
    }
}

struct UndoMakeReduction;

impl Mutator for UndoMakeReduction {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        let Stmt { id, kind } = stmt;
        if let StmtKind::ReduceTo {
            var,
            indices,
            op,
            expr,
            ..
        } = kind
        {
            let load = Expr::load(var.clone(), indices.clone());
            return Ok(Stmt::new(
                id,
                StmtKind::Store {
                    var,
                    indices,
                    expr: Expr::binary(op.to_binary(), load, expr),
                },
            ));
        }
        Ok(Stmt::new(id, kind))
    }
}

/// Normalize update-stores into `ReduceTo`.
pub fn make_reduction(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: make_reduction");
    func.map_body(make_reduction_stmt)
}

/// Statement-level worker for [`make_reduction`].
pub fn make_reduction_stmt(stmt: Stmt) -> Result<Stmt> {
    MakeReduction.mutate_stmt(stmt)
}

/// Expand every `ReduceTo` back into a load-op-store.
pub fn undo_make_reduction(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: undo_make_reduction");
    func.map_body(|body| UndoMakeReduction.mutate_stmt(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::hash::hash_stmt;

    fn update_store() -> Stmt {
        Stmt::store(
            "c",
            vec![Expr::var("i")],
            Expr::add(
                Expr::load("c", vec![Expr::var("i")]),
                Expr::load("a", vec![Expr::var("i")]),
            ),
        )
    }

    #[test]
    fn test_add_update_becomes_reduce() {
        let out = MakeReduction.mutate_stmt(update_store()).expect("pass");
        assert!(matches!(
            &out.kind,
            StmtKind::ReduceTo { op: ReduceOp::Add, .. }
        ));
    }

    #[test]
    fn test_commuted_operands_recognized() {
        let s = Stmt::store(
            "c",
            vec![],
            Expr::mul(Expr::load("a", vec![]), Expr::load("c", vec![])),
        );
        let out = MakeReduction.mutate_stmt(s).expect("pass");
        assert!(matches!(
            &out.kind,
            StmtKind::ReduceTo { op: ReduceOp::Mul, .. }
        ));
    }

    #[test]
    fn test_mismatched_indices_stay_store() {
        let s = Stmt::store(
            "c",
            vec![Expr::var("i")],
            Expr::add(
                Expr::load("c", vec![Expr::add(Expr::var("i"), Expr::int(1))]),
                Expr::int(1),
            ),
        );
        let out = MakeReduction.mutate_stmt(s).expect("pass");
        assert!(matches!(out.kind, StmtKind::Store { .. }));
    }

    #[test]
    fn test_sub_not_a_reduction() {
        let s = Stmt::store(
            "c",
            vec![],
            Expr::sub(Expr::load("c", vec![]), Expr::int(1)),
        );
        let out = MakeReduction.mutate_stmt(s).expect("pass");
        assert!(matches!(out.kind, StmtKind::Store { .. }));
    }

    #[test]
    fn test_round_trip_is_identity() {
        let original = update_store();
        let reduced = MakeReduction.mutate_stmt(original.clone()).expect("make");
        let undone = UndoMakeReduction.mutate_stmt(reduced).expect("undo");
        assert_eq!(hash_stmt(&original), hash_stmt(&undone));
    }
}
