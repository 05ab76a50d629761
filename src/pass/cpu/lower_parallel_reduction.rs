//! Parallel-reduction lowering for CPU.
//!
//! OpenMP expresses scalar reductions directly as a `reduction(op: var)`
//! clause, so declared reductions onto a fixed element stay on the loop
//! property for the emitter. A declared reduction whose target element is
//! not fixed across the body cannot be named in a clause; its updates fall
//! back to atomic RMW and the declaration is dropped.

use tracing::debug;

use crate::error::Result;
use crate::ir::hash::struct_eq_expr;
use crate::ir::visit::{rebuild_stmt, walk_stmt_pre, Mutator};
use crate::ir::{Func, ParallelScope, ReductionItem, Stmt, StmtKind};

struct LowerParallelReduction;

/// Every update to `red.var` with `red.op` hits exactly the declared element.
fn fixed_element(body: &Stmt, red: &ReductionItem) -> bool {
    let mut ok = true;
    walk_stmt_pre(body, &mut |s| {
        if let StmtKind::ReduceTo {
            var, indices, op, ..
        } = &s.kind
        {
            if var == &red.var && *op == red.op {
                let same = indices.len() == red.begins.len()
                    && indices
                        .iter()
                        .zip(&red.begins)
                        .all(|(a, b)| struct_eq_expr(a, b));
                if !same {
                    ok = false;
                }
            }
        }
    });
    ok
}

struct AtomicFallback<'a> {
    red: &'a ReductionItem,
}

impl Mutator for AtomicFallback<'_> {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        let Stmt { id, kind } = stmt;
        if let StmtKind::ReduceTo {
            var,
            indices,
            op,
            expr,
            atomic,
        } = kind
        {
            let hit = var == self.red.var && op == self.red.op;
            return Ok(Stmt::new(
                id,
                StmtKind::ReduceTo {
                    atomic: atomic || hit,
                    var,
                    indices,
                    op,
                    expr,
                },
            ));
        }
        Ok(Stmt::new(id, kind))
    }
}

impl Mutator for LowerParallelReduction {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        let Stmt { id, kind } = stmt;
        if let StmtKind::For {
            iter,
            begin,
            end,
            step,
            len,
            mut property,
            mut body,
        } = kind
        {
            if property.parallel == ParallelScope::OpenMp && !property.reductions.is_empty() {
                let mut kept = Vec::new();
                for red in property.reductions.drain(..) {
                    if fixed_element(&body, &red) {
                        kept.push(red);
                    } else {
                        body = Box::new(AtomicFallback { red: &red }.mutate_stmt(*body)?);
                    }
                }
                property.reductions = kept;
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

/// Keep clause-expressible reductions declared; atomicize the rest.
pub fn lower_parallel_reduction(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: cpu::lower_parallel_reduction");
    func.map_body(|body| LowerParallelReduction.mutate_stmt(body))
}
