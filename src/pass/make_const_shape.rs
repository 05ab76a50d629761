//! Constant shapes for statically-allocated memory.
//!
//! GPU shared and local buffers must have their size known at compile time.
//! For every `VarDef` in the given memory types, each symbolic shape
//! dimension is replaced by its constant upper bound from bound analysis;
//! if no constant bound exists, the program cannot be lowered.

use tracing::debug;

use crate::analyze::bounds::{const_upper_bound, BoundCtx};
use crate::error::{Error, Result};
use crate::ir::visit::{rebuild_stmt, Mutator};
use crate::ir::{Func, MemType, Stmt, StmtKind};

struct MakeConstShape<'a> {
    mtypes: &'a [MemType],
    ctx: BoundCtx,
}

impl Mutator for MakeConstShape<'_> {
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
                self.ctx.push_loop(&iter, &begin, &end);
                let body = Box::new(self.mutate_stmt(*body)?);
                self.ctx.pop_loop(&iter);
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
            StmtKind::Assert { cond, body } => {
                self.ctx.push_cond(&cond);
                let body = Box::new(self.mutate_stmt(*body)?);
                self.ctx.pop_cond();
                Ok(Stmt::new(id, StmtKind::Assert { cond, body }))
            }
            StmtKind::Assume { cond, body } => {
                self.ctx.push_cond(&cond);
                let body = Box::new(self.mutate_stmt(*body)?);
                self.ctx.pop_cond();
                Ok(Stmt::new(id, StmtKind::Assume { cond, body }))
            }
            StmtKind::VarDef {
                name,
                mut buffer,
                mut pinned,
                body,
            } => {
                if self.mtypes.contains(&buffer.mtype) {
                    for (i, dim) in buffer.tensor.shape.iter_mut().enumerate() {
                        if dim.as_int().is_some() {
                            continue;
                        }
                        let Some(bound) = const_upper_bound(dim, &self.ctx) else {
                            return Err(Error::program(format!(
                                "unable to relax dimension {i} of \"{name}\" ({dim}) to a constant"
                            )));
                        };
                        *dim = crate::ir::Expr::int(bound);
                        // The relaxed allocation must not be shrunk back
                        pinned = true;
                    }
                }
                let body = Box::new(self.mutate_stmt(*body)?);
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
            other => rebuild_stmt(self, Stmt::new(id, other)),
        }
    }
}

/// Replace symbolic shapes of buffers in `mtypes` by constant upper bounds.
pub fn make_const_shape(func: Func, mtypes: &[MemType]) -> Result<Func> {
    debug!(func = %func.name, "pass: make_const_shape");
    func.map_body(|body| {
        MakeConstShape {
            mtypes,
            ctx: BoundCtx::new(),
        }
        .mutate_stmt(body)
    })
}
