//! Buffer multiplexing.
//!
//! A shared or global `VarDef` inside a parallel `For` region would be
//! clobbered by every thread or block running that region, so it is enlarged
//! with one leading dimension per affecting parallel loop and every access
//! is indexed by the loop's iterator: each thread/block then sees a private
//! slice. `shmem[i]` inside `for tid : threadIdx.x` becomes
//! `shmem[tid, i]`.
//!
//! Shared memory is private per block, so only thread-scope loops affect it;
//! global memory is multiplexed over block and thread scopes alike.

use std::collections::HashMap;

use tracing::debug;

use crate::error::Result;
use crate::ir::visit::{rebuild_expr, rebuild_stmt, Mutator};
use crate::ir::{Expr, Func, MemType, Stmt, StmtKind};

#[derive(Clone)]
struct AffectingLoop {
    iter: String,
    len: Expr,
}

#[derive(Default)]
struct Multiplex {
    /// Enclosing parallel loops, outermost first
    parallel_stack: Vec<(bool, AffectingLoop)>, // (is_block_scope, loop)
    /// Variables being multiplexed → the loops they gained dimensions for
    affecting: HashMap<String, Vec<AffectingLoop>>,
}

impl Multiplex {
    fn widen(&self, var: &str, mut indices: Vec<Expr>) -> Vec<Expr> {
        if let Some(loops) = self.affecting.get(var) {
            for l in loops.iter().rev() {
                indices.insert(0, Expr::var(l.iter.clone()));
            }
        }
        indices
    }
}

impl Mutator for Multiplex {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let Stmt { id, kind } = stmt;
        match kind {
            StmtKind::For {
                iter,
                begin,
                end,
                step,
                len,
                property,
                body,
            } => {
                let pushed = if property.parallel.is_gpu() {
                    self.parallel_stack.push((
                        property.parallel.is_cuda_block(),
                        AffectingLoop {
                            iter: iter.clone(),
                            len: len.clone(),
                        },
                    ));
                    true
                } else {
                    false
                };
                let body = Box::new(self.mutate_stmt(*body)?);
                if pushed {
                    self.parallel_stack.pop();
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
            StmtKind::VarDef {
                name,
                mut buffer,
                pinned,
                body,
            } => {
                let loops: Vec<AffectingLoop> = match buffer.mtype {
                    MemType::GpuShared => self
                        .parallel_stack
                        .iter()
                        .filter(|(is_block, _)| !is_block)
                        .map(|(_, l)| l.clone())
                        .collect(),
                    MemType::GpuGlobal => {
                        self.parallel_stack.iter().map(|(_, l)| l.clone()).collect()
                    }
                    _ => Vec::new(),
                };
                if loops.is_empty() {
                    let body = Box::new(self.mutate_stmt(*body)?);
                    return Ok(Stmt::new(
                        id,
                        StmtKind::VarDef {
                            name,
                            buffer,
                            pinned,
                            body,
                        },
                    ));
                }
                for l in loops.iter().rev() {
                    buffer.tensor.shape.insert(0, l.len.clone());
                }
                self.affecting.insert(name.clone(), loops);
                let body = Box::new(self.mutate_stmt(*body)?);
                self.affecting.remove(&name);
                Ok(Stmt::new(
                    id,
                    StmtKind::VarDef {
                        name,
                        buffer,
                        pinned,
                        body,
                    },
                ))
            }
            StmtKind::Store { var, indices, expr } => {
                let expr = self.mutate_expr(expr)?;
                let indices = indices
                    .into_iter()
                    .map(|e| self.mutate_expr(e))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Stmt::new(
                    id,
                    StmtKind::Store {
                        indices: self.widen(&var, indices),
                        var,
                        expr,
                    },
                ))
            }
            StmtKind::ReduceTo {
                var,
                indices,
                op,
                expr,
                atomic,
            } => {
                let expr = self.mutate_expr(expr)?;
                let indices = indices
                    .into_iter()
                    .map(|e| self.mutate_expr(e))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Stmt::new(
                    id,
                    StmtKind::ReduceTo {
                        indices: self.widen(&var, indices),
                        var,
                        op,
                        expr,
                        atomic,
                    },
                ))
            }
            other => rebuild_stmt(self, Stmt::new(id, other)),
        }
    }

    fn mutate_expr(&mut self, expr: Expr) -> Result<Expr> {
        let expr = rebuild_expr(self, expr)?;
        Ok(match expr {
            Expr::Load { var, indices } => Expr::Load {
                indices: self.widen(&var, indices),
                var,
            },
            other => other,
        })
    }
}

/// Enlarge shared/global buffers inside parallel regions so each thread or
/// block accesses a private slice.
pub fn multiplex_buffers(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: gpu::multiplex_buffers");
    func.map_body(|body| Multiplex::default().mutate_stmt(body))
}
