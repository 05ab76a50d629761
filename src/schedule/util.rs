//! Shared rewriting helpers for schedule operations.

use crate::analyze::deps::AccessKind;
use crate::analyze::linear::{analyze_linear, LinearExpr};
use crate::error::{Error, Result};
use crate::ir::visit::{rebuild_stmt, walk_expr, walk_stmt, Mutator, Visitor};
use crate::ir::{Expr, ReduceOp, Stmt, StmtId, StmtKind};

/// One access with its indices in linear form, as collected for the
/// pairwise legality checks of `reorder`, `fuse` and `swap`.
pub(super) struct NestAccess {
    pub var: String,
    pub kind: AccessKind,
    pub reduce_op: Option<ReduceOp>,
    pub indices: Vec<LinearExpr>,
}

impl NestAccess {
    /// Reductions with the same operator commute with each other.
    pub fn commutes_with(&self, other: &NestAccess) -> bool {
        matches!(
            (self.reduce_op, other.reduce_op),
            (Some(a), Some(b)) if a == b
        )
    }
}

#[derive(Default)]
struct Collect {
    accesses: Vec<NestAccess>,
}

impl Visitor for Collect {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Store { var, indices, .. } => self.accesses.push(NestAccess {
                var: var.clone(),
                kind: AccessKind::Write,
                reduce_op: None,
                indices: indices.iter().map(analyze_linear).collect(),
            }),
            StmtKind::ReduceTo {
                var, indices, op, ..
            } => self.accesses.push(NestAccess {
                var: var.clone(),
                kind: AccessKind::Reduce,
                reduce_op: Some(*op),
                indices: indices.iter().map(analyze_linear).collect(),
            }),
            _ => {}
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let Expr::Load { var, indices } = expr {
            self.accesses.push(NestAccess {
                var: var.clone(),
                kind: AccessKind::Read,
                reduce_op: None,
                indices: indices.iter().map(analyze_linear).collect(),
            });
        }
        walk_expr(self, expr);
    }
}

/// Every access in `stmt`, in pre-order.
pub(super) fn collect_accesses(stmt: &Stmt) -> Vec<NestAccess> {
    let mut c = Collect::default();
    c.visit_stmt(stmt);
    c.accesses
}

/// Apply `f` to the unique statement with ID `id`, rebuilding the tree
/// around the result. Fails if the statement is absent.
pub(super) fn rewrite_at(
    root: Stmt,
    id: &StmtId,
    f: impl FnOnce(Stmt) -> Result<Stmt>,
) -> Result<Stmt> {
    struct Rewriter<'a, F> {
        id: &'a StmtId,
        f: Option<F>,
    }
    impl<F: FnOnce(Stmt) -> Result<Stmt>> Mutator for Rewriter<'_, F> {
        fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
            if stmt.id == *self.id {
                match self.f.take() {
                    Some(f) => return f(stmt),
                    None => return Err(Error::internal(format!("duplicate ID {}", self.id))),
                }
            }
            rebuild_stmt(self, stmt)
        }
    }
    let mut r = Rewriter { id, f: Some(f) };
    let out = r.mutate_stmt(root)?;
    if r.f.is_some() {
        return Err(Error::query(format!("statement {id} not found")));
    }
    Ok(out)
}

/// Assign fresh synthetic IDs to `stmt` and all its descendants. Used when
/// a rewrite duplicates a subtree.
pub(super) fn refresh_ids(stmt: Stmt) -> Result<Stmt> {
    struct Refresh;
    impl Mutator for Refresh {
        fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
            let stmt = rebuild_stmt(self, stmt)?;
            Ok(Stmt::fresh(stmt.kind))
        }
    }
    Refresh.mutate_stmt(stmt)
}

