//! Read/write set extraction.
//!
//! The sets are the observable footprint of a tree: passes must preserve
//! them modulo variables they introduce themselves (caches, reduction
//! buffers).

use std::collections::HashSet;

use crate::ir::visit::{walk_expr, walk_stmt, Visitor};
use crate::ir::{Expr, Stmt, StmtKind};

#[derive(Default)]
struct CollectNames {
    reads: HashSet<String>,
    writes: HashSet<String>,
}

impl Visitor for CollectNames {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Store { var, .. } => {
                self.writes.insert(var.clone());
            }
            StmtKind::ReduceTo { var, .. } => {
                self.writes.insert(var.clone());
                self.reads.insert(var.clone());
            }
            _ => {}
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let Expr::Load { var, .. } = expr {
            self.reads.insert(var.clone());
        }
        walk_expr(self, expr);
    }
}

/// Names of variables read anywhere in `stmt` (a `ReduceTo` reads its
/// target).
pub fn reads(stmt: &Stmt) -> HashSet<String> {
    let mut c = CollectNames::default();
    c.visit_stmt(stmt);
    c.reads
}

/// Names of variables written anywhere in `stmt`.
pub fn writes(stmt: &Stmt) -> HashSet<String> {
    let mut c = CollectNames::default();
    c.visit_stmt(stmt);
    c.writes
}

/// Read and write sets in one walk.
pub fn read_write_sets(stmt: &Stmt) -> (HashSet<String>, HashSet<String>) {
    let mut c = CollectNames::default();
    c.visit_stmt(stmt);
    (c.reads, c.writes)
}

/// Whether `stmt` mentions `name` at all (as an access target or inside any
/// expression).
pub fn uses_name(stmt: &Stmt, name: &str) -> bool {
    let mut used = false;
    crate::ir::visit::walk_stmt_pre(stmt, &mut |s| match &s.kind {
        StmtKind::Store { var, .. } | StmtKind::ReduceTo { var, .. } if var == name => used = true,
        _ => {}
    });
    if used {
        return true;
    }
    expr_walk_any(stmt, &mut |e| {
        matches!(e, Expr::Var(n) if n == name) || matches!(e, Expr::Load { var, .. } if var == name)
    })
}

/// Whether `expr` mentions `name`.
pub fn expr_uses_name(expr: &Expr, name: &str) -> bool {
    let mut used = false;
    crate::ir::visit::walk_expr_pre(expr, &mut |e| match e {
        Expr::Var(n) if n == name => used = true,
        Expr::Load { var, .. } if var == name => used = true,
        _ => {}
    });
    used
}

fn expr_walk_any(stmt: &Stmt, pred: &mut impl FnMut(&Expr) -> bool) -> bool {
    struct W<'a, F: FnMut(&Expr) -> bool> {
        pred: &'a mut F,
        hit: bool,
    }
    impl<F: FnMut(&Expr) -> bool> Visitor for W<'_, F> {
        fn visit_expr(&mut self, expr: &Expr) {
            if (self.pred)(expr) {
                self.hit = true;
            }
            walk_expr(self, expr);
        }
    }
    let mut w = W { pred, hit: false };
    w.visit_stmt(stmt);
    w.hit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ReduceOp;

    #[test]
    fn test_read_write_sets() {
        let s = Stmt::seq(vec![
            Stmt::store("b", vec![Expr::var("i")], Expr::load("a", vec![Expr::var("i")])),
            Stmt::reduce_to("c", vec![], ReduceOp::Add, Expr::load("b", vec![Expr::int(0)])),
        ]);
        let (r, w) = read_write_sets(&s);
        assert!(r.contains("a") && r.contains("b") && r.contains("c"));
        assert!(w.contains("b") && w.contains("c"));
        assert!(!w.contains("a"));
    }

    #[test]
    fn test_uses_name_sees_iterator_references() {
        let s = Stmt::store("a", vec![Expr::var("i")], Expr::int(0));
        assert!(uses_name(&s, "i"));
        assert!(uses_name(&s, "a"));
        assert!(!uses_name(&s, "j"));
    }
}
