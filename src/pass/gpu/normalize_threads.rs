//! Thread normalization.
//!
//! The CUDA launch model counts blocks and threads from zero, so every
//! block- or thread-bound loop is rebased to `0..len`: the body sees
//! `iter + begin` wherever it used the iterator. Runs after buffer
//! multiplexing, which relies on the original iterators.

use tracing::debug;

use crate::analyze::linear::analyze_linear;
use crate::error::Result;
use crate::ir::visit::{rebuild_stmt, subst_var, Mutator};
use crate::ir::{Expr, Func, Stmt, StmtKind};

struct NormalizeThreads;

impl Mutator for NormalizeThreads {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        let Stmt { id, kind } = stmt;
        if let StmtKind::For {
            iter,
            begin,
            end,
            step,
            len,
            property,
            body,
        } = kind
        {
            if property.parallel.is_gpu() && begin.as_int() != Some(0) {
                let shifted = Expr::add(Expr::var(iter.clone()), begin.clone());
                let body = subst_var(*body, &iter, &shifted)?;
                let len = analyze_linear(&Expr::sub(end, begin)).to_expr();
                return Ok(Stmt::new(
                    id,
                    StmtKind::For {
                        iter,
                        begin: Expr::int(0),
                        end: len.clone(),
                        step,
                        len,
                        property,
                        body: Box::new(body),
                    },
                ));
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

/// Rebase GPU-parallel loops to start at zero.
pub fn normalize_threads(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: gpu::normalize_threads");
    func.map_body(|body| NormalizeThreads.mutate_stmt(body))
}
