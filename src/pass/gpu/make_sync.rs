//! Synchronization injection.
//!
//! Threads of one block communicate through shared memory; between a write
//! and a subsequent read of the same shared buffer inside a thread-parallel
//! region, a `__syncthreads()` barrier is required. The pass scans every
//! statement sequence in such regions and inserts the barrier at the first
//! read after unsynchronized writes. Runs after `normalize_threads`, so the
//! thread structure is final.

use std::collections::HashSet;

use tracing::debug;

use crate::analyze::access::read_write_sets;
use crate::error::Result;
use crate::ir::visit::{rebuild_stmt, walk_stmt_pre, Mutator};
use crate::ir::{DataType, Expr, Func, MemType, Stmt, StmtKind};

/// The barrier statement: an intrinsic evaluated for its effect.
fn sync_stmt() -> Stmt {
    Stmt::eval(Expr::intrinsic(
        "__syncthreads()",
        vec![],
        DataType::Custom("void".to_string()),
    ))
}

struct MakeSync {
    shared_vars: HashSet<String>,
    in_thread_region: bool,
}

impl MakeSync {
    fn insert_barriers(&self, stmts: Vec<Stmt>) -> Vec<Stmt> {
        let mut out = Vec::with_capacity(stmts.len());
        let mut dirty: HashSet<String> = HashSet::new();
        for stmt in stmts {
            let (r, w) = read_write_sets(&stmt);
            let needs_sync = r.iter().any(|v| dirty.contains(v));
            if needs_sync {
                out.push(sync_stmt());
                dirty.clear();
            }
            for v in w {
                if self.shared_vars.contains(&v) {
                    dirty.insert(v);
                }
            }
            out.push(stmt);
        }
        out
    }
}

impl Mutator for MakeSync {
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
                let was = self.in_thread_region;
                if property.parallel.is_cuda_thread() {
                    self.in_thread_region = true;
                }
                let body = Box::new(self.mutate_stmt(*body)?);
                self.in_thread_region = was;
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
            StmtKind::StmtSeq { stmts } => {
                let stmts = stmts
                    .into_iter()
                    .map(|s| self.mutate_stmt(s))
                    .collect::<Result<Vec<_>>>()?;
                let stmts = if self.in_thread_region {
                    self.insert_barriers(stmts)
                } else {
                    stmts
                };
                Ok(Stmt::new(id, StmtKind::StmtSeq { stmts }))
            }
            other => rebuild_stmt(self, Stmt::new(id, other)),
        }
    }
}

/// Insert `__syncthreads()` between shared-memory writes and later reads.
pub fn make_sync(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: gpu::make_sync");
    func.map_body(|body| {
        let mut shared_vars = HashSet::new();
        walk_stmt_pre(&body, &mut |s| {
            if let StmtKind::VarDef { name, buffer, .. } = &s.kind {
                if buffer.mtype == MemType::GpuShared {
                    shared_vars.insert(name.clone());
                }
            }
        });
        MakeSync {
            shared_vars,
            in_thread_region: false,
        }
        .mutate_stmt(body)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        AccessType, Buffer, CudaDim, ForProperty, ParallelScope, Tensor,
    };

    fn thread_loop(body: Stmt) -> Stmt {
        let mut l = Stmt::for_range("tid", Expr::int(0), Expr::int(32), body);
        if let StmtKind::For { property, .. } = &mut l.kind {
            *property = ForProperty::new().with_parallel(ParallelScope::CudaThread(CudaDim::X));
        }
        l
    }

    fn shared_wrap(body: Stmt) -> Stmt {
        Stmt::var_def(
            "s",
            Buffer::new(
                Tensor::new(vec![Expr::int(32)], DataType::Float32),
                AccessType::Cache,
                MemType::GpuShared,
            ),
            body,
        )
    }

    fn count_syncs(stmt: &Stmt) -> usize {
        let mut n = 0;
        walk_stmt_pre(stmt, &mut |s| {
            if let StmtKind::Eval { expr } = &s.kind {
                if matches!(expr, Expr::Intrinsic { format, .. } if format.contains("__syncthreads")) {
                    n += 1;
                }
            }
        });
        n
    }

    #[test]
    fn test_write_then_read_gets_barrier() {
        // s[tid] = a[tid]; out[tid] = s[31 - tid]  -- cross-thread read
        let tree = shared_wrap(thread_loop(Stmt::seq(vec![
            Stmt::store("s", vec![Expr::var("tid")], Expr::load("a", vec![Expr::var("tid")])),
            Stmt::store(
                "out",
                vec![Expr::var("tid")],
                Expr::load("s", vec![Expr::sub(Expr::int(31), Expr::var("tid"))]),
            ),
        ])));
        let func = Func::new("f", vec![], std::collections::HashMap::new(), tree);
        let out = make_sync(func).expect("pass");
        assert_eq!(count_syncs(&out.body), 1);
    }

    #[test]
    fn test_no_read_no_barrier() {
        let tree = shared_wrap(thread_loop(Stmt::seq(vec![
            Stmt::store("s", vec![Expr::var("tid")], Expr::int(0)),
            Stmt::store("out", vec![Expr::var("tid")], Expr::int(1)),
        ])));
        let func = Func::new("f", vec![], std::collections::HashMap::new(), tree);
        let out = make_sync(func).expect("pass");
        assert_eq!(count_syncs(&out.body), 0);
    }

    #[test]
    fn test_outside_thread_region_no_barrier() {
        let tree = shared_wrap(Stmt::seq(vec![
            Stmt::store("s", vec![Expr::int(0)], Expr::int(0)),
            Stmt::store("out", vec![], Expr::load("s", vec![Expr::int(0)])),
        ]));
        let func = Func::new("f", vec![], std::collections::HashMap::new(), tree);
        let out = make_sync(func).expect("pass");
        assert_eq!(count_syncs(&out.body), 0);
    }
}
