//! Parallel-reduction legalization.
//!
//! For each parallel loop whose body carries a `ReduceTo` with a
//! loop-carried dependence on that loop, either declare the reduction on the
//! loop's property bag (so the emitter can produce a race-free reduction
//! clause or tree) or, when that is impossible, mark the update atomic:
//! reductions across thread blocks and reductions whose target indices vary
//! with the parallel loop have no race-free form.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::analyze::deps::{find_deps, DepDirection};
use crate::analyze::variance::{find_loop_variance, VarianceMap};
use crate::error::Result;
use crate::ir::visit::{rebuild_stmt, walk_stmt, Mutator, Visitor};
use crate::ir::{Expr, Func, ParallelScope, ReductionItem, Stmt, StmtId, StmtKind};

use super::make_reduction::make_reduction_stmt;

/// Parallel loops and the serial loops enclosing them.
#[derive(Default)]
struct FindAllParallel {
    loop_stack: Vec<StmtId>,
    /// parallel loop id → (scope, enclosing loop ids)
    results: Vec<(StmtId, ParallelScope, Vec<StmtId>)>,
}

impl Visitor for FindAllParallel {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        if let StmtKind::For { property, .. } = &stmt.kind {
            if property.parallel.is_parallel() {
                self.results
                    .push((stmt.id.clone(), property.parallel, self.loop_stack.clone()));
            }
            self.loop_stack.push(stmt.id.clone());
            walk_stmt(self, stmt);
            self.loop_stack.pop();
        } else {
            walk_stmt(self, stmt);
        }
    }
}

struct AlterReductions {
    /// ReduceTo id → parallel loops carrying it
    to_alter: HashMap<StmtId, HashSet<StmtId>>,
    scope_of: HashMap<StmtId, ParallelScope>,
    variance: VarianceMap,
    /// loop id → reductions to declare on it
    for_reductions: HashMap<StmtId, Vec<ReductionItem>>,
}

impl Mutator for AlterReductions {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        let Stmt { id, kind } = stmt;
        match kind {
            StmtKind::ReduceTo {
                var,
                indices,
                op,
                expr,
                atomic,
            } => {
                let mut atomic = atomic;
                if let Some(loops) = self.to_alter.get(&id) {
                    let race_free = loops.iter().all(|loop_id| {
                        let block_scope = self
                            .scope_of
                            .get(loop_id)
                            .is_some_and(|s| s.is_cuda_block());
                        let variant_idx = indices
                            .iter()
                            .any(|idx| self.variance.is_variant(idx, loop_id));
                        !block_scope && !variant_idx
                    });
                    if race_free {
                        for loop_id in loops {
                            self.for_reductions
                                .entry(loop_id.clone())
                                .or_default()
                                .push(ReductionItem {
                                    op,
                                    var: var.clone(),
                                    begins: indices.clone(),
                                    ends: indices
                                        .iter()
                                        .map(|i| Expr::add(i.clone(), Expr::int(1)))
                                        .collect(),
                                });
                        }
                    } else {
                        atomic = true;
                    }
                }
                Ok(Stmt::new(
                    id,
                    StmtKind::ReduceTo {
                        var,
                        indices,
                        op,
                        expr,
                        atomic,
                    },
                ))
            }
            StmtKind::For {
                iter,
                begin,
                end,
                step,
                len,
                mut property,
                body,
            } => {
                if let Some(reductions) = self.for_reductions.remove(&id) {
                    property.reductions.extend(reductions);
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
                        body,
                    },
                ))
            }
            other => Ok(Stmt::new(id, other)),
        }
    }
}

fn make_parallel_reduction_stmt(stmt: Stmt) -> Result<Stmt> {
    // Normalize update-stores first so the dependence filter sees ReduceTo
    let stmt = make_reduction_stmt(stmt)?;

    let mut finder = FindAllParallel::default();
    finder.visit_stmt(&stmt);

    let mut conds = Vec::new();
    let mut scope_of = HashMap::new();
    for (loop_id, scope, outers) in &finder.results {
        scope_of.insert(loop_id.clone(), *scope);
        let mut cond = vec![(loop_id.clone(), DepDirection::Different)];
        for outer in outers {
            cond.push((outer.clone(), DepDirection::Same));
        }
        conds.push(cond);
    }

    let deps = find_deps(&stmt, &conds, |later, earlier| {
        later.stmt_id == earlier.stmt_id && later.kind.writes() && later.reduce_op.is_some()
    });

    let mut to_alter: HashMap<StmtId, HashSet<StmtId>> = HashMap::new();
    for d in deps {
        let (loop_id, _) = &conds[d.cond_index][0];
        to_alter
            .entry(d.later.stmt_id.clone())
            .or_default()
            .insert(loop_id.clone());
    }

    let variance = find_loop_variance(&stmt);
    AlterReductions {
        to_alter,
        scope_of,
        variance,
        for_reductions: HashMap::new(),
    }
    .mutate_stmt(stmt)
}

/// Declare race-free reductions on their parallel loops; mark the rest
/// atomic.
pub fn make_parallel_reduction(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: make_parallel_reduction");
    func.map_body(make_parallel_reduction_stmt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CudaDim, ForProperty, ReduceOp};

    fn parallel_sum(scope: ParallelScope) -> Stmt {
        let body = Stmt::reduce_to(
            "s",
            vec![Expr::int(0)],
            ReduceOp::Add,
            Expr::load("a", vec![Expr::var("i")]),
        );
        let mut l = Stmt::for_range("i", Expr::int(0), Expr::int(64), body);
        if let StmtKind::For { property, .. } = &mut l.kind {
            *property = ForProperty::new().with_parallel(scope);
        }
        l
    }

    fn loop_reductions(stmt: &Stmt) -> &[ReductionItem] {
        match &stmt.kind {
            StmtKind::For { property, .. } => &property.reductions,
            other => panic!("expected For, got {other:?}"),
        }
    }

    fn reduce_is_atomic(stmt: &Stmt) -> bool {
        let mut atomic = false;
        crate::ir::visit::walk_stmt_pre(stmt, &mut |s| {
            if let StmtKind::ReduceTo { atomic: a, .. } = &s.kind {
                atomic |= *a;
            }
        });
        atomic
    }

    #[test]
    fn test_openmp_sum_declared_on_loop() {
        let out = make_parallel_reduction_stmt(parallel_sum(ParallelScope::OpenMp)).expect("pass");
        let reds = loop_reductions(&out);
        assert_eq!(reds.len(), 1);
        assert_eq!(reds[0].op, ReduceOp::Add);
        assert_eq!(reds[0].var, "s");
        assert!(!reduce_is_atomic(&out));
    }

    #[test]
    fn test_block_scope_falls_back_to_atomic() {
        let out = make_parallel_reduction_stmt(parallel_sum(ParallelScope::CudaBlock(CudaDim::X)))
            .expect("pass");
        assert!(loop_reductions(&out).is_empty());
        assert!(reduce_is_atomic(&out));
    }

    #[test]
    fn test_variant_indices_fall_back_to_atomic() {
        // s[i % 2] += ... : the target moves with the parallel loop, but two
        // iterations can still collide
        let body = Stmt::reduce_to(
            "s",
            vec![Expr::modulo(Expr::var("i"), Expr::int(2))],
            ReduceOp::Add,
            Expr::int(1),
        );
        let mut l = Stmt::for_range("i", Expr::int(0), Expr::int(64), body);
        if let StmtKind::For { property, .. } = &mut l.kind {
            *property = ForProperty::new().with_parallel(ParallelScope::OpenMp);
        }
        let out = make_parallel_reduction_stmt(l).expect("pass");
        assert!(loop_reductions(&out).is_empty());
        assert!(reduce_is_atomic(&out));
    }

    #[test]
    fn test_serial_loop_untouched() {
        let body = Stmt::reduce_to("s", vec![Expr::int(0)], ReduceOp::Add, Expr::int(1));
        let l = Stmt::for_range("i", Expr::int(0), Expr::int(64), body);
        let out = make_parallel_reduction_stmt(l).expect("pass");
        assert!(loop_reductions(&out).is_empty());
        assert!(!reduce_is_atomic(&out));
    }

    #[test]
    fn test_independent_updates_untouched() {
        // each iteration updates its own element: no carried dependence
        let body = Stmt::reduce_to(
            "s",
            vec![Expr::var("i")],
            ReduceOp::Add,
            Expr::load("a", vec![Expr::var("i")]),
        );
        let mut l = Stmt::for_range("i", Expr::int(0), Expr::int(64), body);
        if let StmtKind::For { property, .. } = &mut l.kind {
            *property = ForProperty::new().with_parallel(ParallelScope::OpenMp);
        }
        let out = make_parallel_reduction_stmt(l).expect("pass");
        assert!(loop_reductions(&out).is_empty());
        assert!(!reduce_is_atomic(&out));
    }
}
