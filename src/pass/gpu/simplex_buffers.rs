//! Buffer simplexing, the inverse of multiplexing.
//!
//! When every access to a buffer indexes some dimension with exactly the
//! iterator of a parallel loop the memory is already private to (thread
//! scope for local memory, block scope for shared memory), that dimension
//! carries no information: each thread/block only ever touches its own
//! slice. The dimension and its indices are removed.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::Result;
use crate::ir::visit::{rebuild_expr, rebuild_stmt, walk_stmt, Mutator, Visitor};
use crate::ir::{Expr, Func, MemType, ParallelScope, Stmt, StmtKind};

#[derive(Default)]
struct FindPrivateDims {
    /// iterator name → the scope of its loop
    par_iters: HashMap<String, ParallelScope>,
    /// var → per-dim: Some(iter) while all accesses agree on that iterator
    candidates: HashMap<String, Vec<Option<String>>>,
    mtypes: HashMap<String, MemType>,
}

impl Visitor for FindPrivateDims {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::For { iter, property, .. } if property.parallel.is_gpu() => {
                self.par_iters.insert(iter.clone(), property.parallel);
                walk_stmt(self, stmt);
                self.par_iters.remove(iter);
            }
            StmtKind::VarDef { name, buffer, .. } => {
                if matches!(buffer.mtype, MemType::GpuLocal | MemType::GpuShared) {
                    // Start optimistic: every dim may be private, with the
                    // iterator fixed by the first access seen
                    self.candidates
                        .insert(name.clone(), vec![Some(String::new()); buffer.tensor.ndim()]);
                    self.mtypes.insert(name.clone(), buffer.mtype);
                }
                walk_stmt(self, stmt);
            }
            StmtKind::Store { var, indices, .. } | StmtKind::ReduceTo { var, indices, .. } => {
                self.record_first_or_check(var, indices);
                walk_stmt(self, stmt);
            }
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let Expr::Load { var, indices } = expr {
            self.record_first_or_check(var, indices);
        }
        crate::ir::visit::walk_expr(self, expr);
    }
}

impl FindPrivateDims {
    fn record_first_or_check(&mut self, var: &str, indices: &[Expr]) {
        let Some(dims) = self.candidates.get_mut(var) else {
            return;
        };
        for (dim, idx) in dims.iter_mut().zip(indices) {
            let iter = match idx {
                Expr::Var(n) if self.par_iters.contains_key(n) => Some(n.clone()),
                _ => None,
            };
            *dim = match (dim.take(), iter) {
                // First access fixes the iterator
                (Some(prev), Some(now)) if prev.is_empty() || prev == now => Some(now),
                _ => None,
            };
        }
    }
}

/// Second walk: re-resolve iterator scopes while they are live and compute
/// the final plan.
#[derive(Default)]
struct ResolvePlan {
    par_iters: HashMap<String, ParallelScope>,
    candidates: HashMap<String, Vec<Option<String>>>,
    mtypes: HashMap<String, MemType>,
    plan: HashMap<String, HashSet<usize>>,
}

impl Visitor for ResolvePlan {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::For { iter, property, .. } if property.parallel.is_gpu() => {
                self.par_iters.insert(iter.clone(), property.parallel);
                walk_stmt(self, stmt);
                self.par_iters.remove(iter);
            }
            StmtKind::VarDef { name, .. } => {
                if let (Some(dims), Some(mtype)) =
                    (self.candidates.get(name), self.mtypes.get(name))
                {
                    let mut drop = HashSet::new();
                    for (d, dim) in dims.iter().enumerate() {
                        let Some(iter) = dim else { continue };
                        if iter.is_empty() {
                            continue;
                        }
                        let Some(scope) = self.par_iters.get(iter) else {
                            continue;
                        };
                        let private = match mtype {
                            MemType::GpuLocal => scope.is_cuda_thread(),
                            MemType::GpuShared => scope.is_cuda_block(),
                            _ => false,
                        };
                        if private {
                            drop.insert(d);
                        }
                    }
                    if !drop.is_empty() {
                        self.plan.insert(name.clone(), drop);
                    }
                }
                walk_stmt(self, stmt);
            }
            _ => walk_stmt(self, stmt),
        }
    }
}

struct ApplySimplex {
    plan: HashMap<String, HashSet<usize>>,
}

impl ApplySimplex {
    fn narrow(&self, var: &str, indices: Vec<Expr>) -> Vec<Expr> {
        match self.plan.get(var) {
            Some(drop) => indices
                .into_iter()
                .enumerate()
                .filter(|(d, _)| !drop.contains(d))
                .map(|(_, e)| e)
                .collect(),
            None => indices,
        }
    }
}

impl Mutator for ApplySimplex {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        let Stmt { id, kind } = stmt;
        let kind = match kind {
            StmtKind::VarDef {
                name,
                mut buffer,
                pinned,
                body,
            } => {
                if let Some(drop) = self.plan.get(&name) {
                    buffer.tensor.shape = buffer
                        .tensor
                        .shape
                        .into_iter()
                        .enumerate()
                        .filter(|(d, _)| !drop.contains(d))
                        .map(|(_, e)| e)
                        .collect();
                }
                StmtKind::VarDef {
                    name,
                    buffer,
                    pinned,
                    body,
                }
            }
            StmtKind::Store { var, indices, expr } => StmtKind::Store {
                indices: self.narrow(&var, indices),
                var,
                expr,
            },
            StmtKind::ReduceTo {
                var,
                indices,
                op,
                expr,
                atomic,
            } => StmtKind::ReduceTo {
                indices: self.narrow(&var, indices),
                var,
                op,
                expr,
                atomic,
            },
            other => other,
        };
        Ok(Stmt::new(id, kind))
    }

    fn mutate_expr(&mut self, expr: Expr) -> Result<Expr> {
        let expr = rebuild_expr(self, expr)?;
        Ok(match expr {
            Expr::Load { var, indices } => Expr::Load {
                indices: self.narrow(&var, indices),
                var,
            },
            other => other,
        })
    }
}

/// Drop buffer dimensions that only ever carry a private parallel iterator.
pub fn simplex_buffers(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: gpu::simplex_buffers");
    func.map_body(|body| {
        let mut find = FindPrivateDims::default();
        find.visit_stmt(&body);
        let mut resolve = ResolvePlan {
            candidates: find.candidates,
            mtypes: find.mtypes,
            ..ResolvePlan::default()
        };
        resolve.visit_stmt(&body);
        ApplySimplex { plan: resolve.plan }.mutate_stmt(body)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AccessType, Buffer, CudaDim, DataType, ForProperty, Tensor};

    fn thread_loop(body: Stmt) -> Stmt {
        let mut l = Stmt::for_range("tid", Expr::int(0), Expr::int(32), body);
        if let StmtKind::For { property, len, .. } = &mut l.kind {
            *property =
                ForProperty::new().with_parallel(ParallelScope::CudaThread(CudaDim::X));
            *len = Expr::int(32);
        }
        l
    }

    fn local_def(shape: Vec<Expr>, body: Stmt) -> Stmt {
        Stmt::var_def(
            "r",
            Buffer::new(
                Tensor::new(shape, DataType::Float32),
                AccessType::Cache,
                MemType::GpuLocal,
            ),
            body,
        )
    }

    #[test]
    fn test_thread_indexed_local_dim_dropped() {
        // local r[32, 4] indexed r[tid, i]: each thread owns one row
        let inner = Stmt::for_range(
            "i",
            Expr::int(0),
            Expr::int(4),
            Stmt::store(
                "r",
                vec![Expr::var("tid"), Expr::var("i")],
                Expr::var("i"),
            ),
        );
        let tree = thread_loop(local_def(vec![Expr::int(32), Expr::int(4)], inner));
        let func = Func::new("f", vec![], std::collections::HashMap::new(), tree);
        let out = simplex_buffers(func).expect("pass");
        let text = out.body.pretty_print(0);
        assert!(text.contains("r[4]"), "dim dropped: {text}");
        assert!(text.contains("r[i]"), "index narrowed: {text}");
    }

    #[test]
    fn test_mixed_indexing_keeps_dim() {
        // r[tid, i] in one place but r[0, i] in another: not private
        let inner = Stmt::seq(vec![
            Stmt::store("r", vec![Expr::var("tid"), Expr::int(0)], Expr::int(1)),
            Stmt::store("r", vec![Expr::int(0), Expr::int(0)], Expr::int(2)),
        ]);
        let tree = thread_loop(local_def(vec![Expr::int(32), Expr::int(4)], inner));
        let func = Func::new("f", vec![], std::collections::HashMap::new(), tree);
        let out = simplex_buffers(func).expect("pass");
        let text = out.body.pretty_print(0);
        assert!(text.contains("r[32, 4]"), "dim kept: {text}");
    }
}
