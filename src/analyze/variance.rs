//! Loop-variance analysis.
//!
//! Decides whether an expression's value varies across iterations of a given
//! loop: directly, by mentioning the loop's iterator, or indirectly, by
//! loading a variable that is written inside the loop. The indirect case is
//! deliberately coarse (any write inside the loop taints the variable);
//! callers use the analysis to fall back to safer code, never to prove
//! legality.

use std::collections::{HashMap, HashSet};

use crate::ir::visit::{walk_stmt, Visitor};
use crate::ir::{Expr, Stmt, StmtId, StmtKind};

use super::access::expr_uses_name;

/// Per-loop variance facts for one tree.
#[derive(Debug, Default)]
pub struct VarianceMap {
    iter_of: HashMap<StmtId, String>,
    written_in: HashMap<StmtId, HashSet<String>>,
}

struct Build {
    map: VarianceMap,
    loop_stack: Vec<StmtId>,
}

impl Visitor for Build {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::For { iter, .. } => {
                self.map.iter_of.insert(stmt.id.clone(), iter.clone());
                self.map.written_in.entry(stmt.id.clone()).or_default();
                self.loop_stack.push(stmt.id.clone());
                walk_stmt(self, stmt);
                self.loop_stack.pop();
            }
            StmtKind::Store { var, .. } | StmtKind::ReduceTo { var, .. } => {
                for l in &self.loop_stack {
                    self.map
                        .written_in
                        .entry(l.clone())
                        .or_default()
                        .insert(var.clone());
                }
                walk_stmt(self, stmt);
            }
            _ => walk_stmt(self, stmt),
        }
    }
}

/// Build the variance facts for `root`.
pub fn find_loop_variance(root: &Stmt) -> VarianceMap {
    let mut b = Build {
        map: VarianceMap::default(),
        loop_stack: Vec::new(),
    };
    b.visit_stmt(root);
    b.map
}

impl VarianceMap {
    /// Whether `expr` may take different values in different iterations of
    /// the loop identified by `loop_id`.
    pub fn is_variant(&self, expr: &Expr, loop_id: &StmtId) -> bool {
        let Some(iter) = self.iter_of.get(loop_id) else {
            return false;
        };
        if expr_uses_name(expr, iter) {
            return true;
        }
        let Some(written) = self.written_in.get(loop_id) else {
            return false;
        };
        let mut variant = false;
        crate::ir::visit::walk_expr_pre(expr, &mut |e| {
            if let Expr::Load { var, .. } = e {
                if written.contains(var) {
                    variant = true;
                }
            }
        });
        variant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iterator_reference_is_variant() {
        let body = Stmt::store("a", vec![Expr::var("i")], Expr::int(0));
        let l = Stmt::for_range("i", Expr::int(0), Expr::int(8), body);
        let id = l.id.clone();
        let vm = find_loop_variance(&l);
        assert!(vm.is_variant(&Expr::var("i"), &id));
        assert!(!vm.is_variant(&Expr::var("j"), &id));
        assert!(!vm.is_variant(&Expr::int(3), &id));
    }

    #[test]
    fn test_load_of_written_var_is_variant() {
        let body = Stmt::store("t", vec![], Expr::var("i"));
        let l = Stmt::for_range("i", Expr::int(0), Expr::int(8), body);
        let id = l.id.clone();
        let vm = find_loop_variance(&l);
        assert!(vm.is_variant(&Expr::load("t", vec![]), &id));
        assert!(!vm.is_variant(&Expr::load("u", vec![]), &id));
    }
}
