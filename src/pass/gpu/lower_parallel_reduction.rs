//! Parallel-reduction lowering for GPU.
//!
//! A thread-bound loop carrying declared reductions is rewritten so each
//! thread folds its updates into a private register accumulator and combines
//! into the target once, atomically, at the end of its iteration: one atomic
//! RMW per thread instead of one per update. Reductions whose target element
//! moves within the loop body have no single accumulator and fall back to
//! per-update atomics.

use tracing::debug;

use crate::error::Result;
use crate::ir::hash::struct_eq_expr;
use crate::ir::visit::{rebuild_stmt, walk_stmt_pre, Mutator};
use crate::ir::{
    AccessType, Buffer, DataType, Expr, Func, MemType, ReductionItem, Stmt, StmtKind, Tensor,
};

struct LowerParallelReduction {
    /// dtype of every variable in scope, for typing the accumulators
    dtypes: std::collections::HashMap<String, DataType>,
}

/// Redirect updates matching `red` into the scalar accumulator `accum`.
struct RedirectReduce<'a> {
    red: &'a ReductionItem,
    accum: &'a str,
    fired: bool,
}

impl Mutator for RedirectReduce<'_> {
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
            let matches_decl = var == self.red.var
                && op == self.red.op
                && indices.len() == self.red.begins.len()
                && indices
                    .iter()
                    .zip(&self.red.begins)
                    .all(|(a, b)| struct_eq_expr(a, b));
            if matches_decl {
                self.fired = true;
                return Ok(Stmt::new(
                    id,
                    StmtKind::ReduceTo {
                        var: self.accum.to_string(),
                        indices: vec![],
                        op,
                        expr,
                        atomic: false,
                    },
                ));
            }
            return Ok(Stmt::new(
                id,
                StmtKind::ReduceTo {
                    var,
                    indices,
                    op,
                    expr,
                    atomic,
                },
            ));
        }
        Ok(Stmt::new(id, kind))
    }
}

/// Mark every update matching `red` atomic, keeping it in place.
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
            ..
        } = kind
        {
            let matches_decl = var == self.red.var && op == self.red.op;
            return Ok(Stmt::new(
                id,
                StmtKind::ReduceTo {
                    atomic: matches_decl,
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
            if property.parallel.is_cuda_thread() && !property.reductions.is_empty() {
                for (n, red) in property.reductions.drain(..).enumerate() {
                    let dtype = self
                        .dtypes
                        .get(&red.var)
                        .cloned()
                        .unwrap_or(DataType::Float32);
                    let accum = format!("{}.red.{n}", red.var);
                    let mut redirect = RedirectReduce {
                        red: &red,
                        accum: &accum,
                        fired: false,
                    };
                    let redirected = redirect.mutate_stmt((*body).clone())?;
                    if redirect.fired {
                        let init = Stmt::store(accum.clone(), vec![], red.op.neutral(&dtype));
                        let mut flush = Stmt::reduce_to(
                            red.var.clone(),
                            red.begins.clone(),
                            red.op,
                            Expr::load(accum.clone(), vec![]),
                        );
                        if let StmtKind::ReduceTo { atomic, .. } = &mut flush.kind {
                            *atomic = true;
                        }
                        body = Box::new(Stmt::var_def(
                            accum,
                            Buffer::new(
                                Tensor::new(vec![], dtype),
                                AccessType::Cache,
                                MemType::GpuLocal,
                            ),
                            Stmt::seq(vec![init, redirected, flush]),
                        ));
                    } else {
                        // The element moves within the body: per-update atomics
                        body = Box::new(AtomicFallback { red: &red }.mutate_stmt(*body)?);
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

/// Lower declared reductions on thread-bound loops.
pub fn lower_parallel_reduction(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: gpu::lower_parallel_reduction");
    func.map_body(|body| {
        let mut dtypes = std::collections::HashMap::new();
        walk_stmt_pre(&body, &mut |s| {
            if let StmtKind::VarDef { name, buffer, .. } = &s.kind {
                dtypes.insert(name.clone(), buffer.tensor.dtype.clone());
            }
        });
        LowerParallelReduction { dtypes }.mutate_stmt(body)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CudaDim, ForProperty, ParallelScope, ReduceOp};

    fn reduction_loop() -> Stmt {
        let body = Stmt::reduce_to(
            "s",
            vec![Expr::int(0)],
            ReduceOp::Add,
            Expr::load("a", vec![Expr::var("tid")]),
        );
        let mut l = Stmt::for_range("tid", Expr::int(0), Expr::int(32), body);
        if let StmtKind::For { property, .. } = &mut l.kind {
            *property = ForProperty::new().with_parallel(ParallelScope::CudaThread(CudaDim::X));
            property.reductions.push(ReductionItem {
                op: ReduceOp::Add,
                var: "s".to_string(),
                begins: vec![Expr::int(0)],
                ends: vec![Expr::int(1)],
            });
        }
        l
    }

    #[test]
    fn test_reduction_gets_private_accumulator() {
        let out = LowerParallelReduction {
            dtypes: std::collections::HashMap::new(),
        }
        .mutate_stmt(reduction_loop())
        .expect("pass");
        let text = out.pretty_print(0);
        assert!(text.contains("s.red.0"), "accumulator introduced: {text}");
        assert!(text.contains("(atomic)"), "single atomic flush: {text}");
        // Declared reduction consumed
        if let StmtKind::For { property, .. } = &out.kind {
            assert!(property.reductions.is_empty());
        }
    }

    #[test]
    fn test_accumulator_initialized_to_neutral() {
        let out = LowerParallelReduction {
            dtypes: std::collections::HashMap::new(),
        }
        .mutate_stmt(reduction_loop())
        .expect("pass");
        let text = out.pretty_print(0);
        assert!(text.contains("s.red.0[] = 0"), "neutral init: {text}");
    }

    #[test]
    fn test_serial_loop_untouched() {
        let body = Stmt::reduce_to("s", vec![Expr::int(0)], ReduceOp::Add, Expr::int(1));
        let l = Stmt::for_range("i", Expr::int(0), Expr::int(32), body);
        let out = LowerParallelReduction {
            dtypes: std::collections::HashMap::new(),
        }
        .mutate_stmt(l)
        .expect("pass");
        let text = out.pretty_print(0);
        assert!(!text.contains(".red."), "untouched: {text}");
    }
}
