//! Dead-variable elimination.
//!
//! A function-local `VarDef` whose variable is never loaded is dropped, along
//! with every store into it. Runs to fixpoint so chains of variables feeding
//! only each other collapse.

use tracing::debug;

use crate::analyze::access::reads;
use crate::error::Result;
use crate::ir::hash::hash_stmt;
use crate::ir::visit::{rebuild_stmt, Mutator};
use crate::ir::{AccessType, Func, Stmt, StmtKind};

const MAX_ITERATIONS: usize = 10;

struct RemoveDeadVar;

/// Strip every write to `var` from `stmt`.
struct StripWrites<'a> {
    var: &'a str,
}

impl Mutator for StripWrites<'_> {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        match &stmt.kind {
            StmtKind::Store { var, .. } | StmtKind::ReduceTo { var, .. } if var == self.var => {
                Ok(Stmt::new(stmt.id, StmtKind::StmtSeq { stmts: vec![] }))
            }
            _ => rebuild_stmt(self, stmt),
        }
    }
}

impl Mutator for RemoveDeadVar {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        if let StmtKind::VarDef {
            name,
            buffer,
            body,
            ..
        } = &stmt.kind
        {
            if buffer.atype == AccessType::Cache && !reads(body).contains(name) {
                let stripped = StripWrites { var: name }.mutate_stmt((**body).clone())?;
                return Ok(stripped);
            }
        }
        Ok(stmt)
    }
}

/// Drop unused function-local variables, to fixpoint.
pub fn remove_dead_var(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: remove_dead_var");
    func.map_body(|mut body| {
        for _ in 0..MAX_ITERATIONS {
            let before = hash_stmt(&body);
            body = RemoveDeadVar.mutate_stmt(body)?;
            if hash_stmt(&body) == before {
                break;
            }
        }
        Ok(body)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Buffer, DataType, Expr, MemType, Tensor};

    fn cache_def(name: &str, body: Stmt) -> Stmt {
        Stmt::var_def(
            name,
            Buffer::new(
                Tensor::new(vec![], DataType::Float32),
                AccessType::Cache,
                MemType::Cpu,
            ),
            body,
        )
    }

    fn io_def(name: &str, body: Stmt) -> Stmt {
        Stmt::var_def(
            name,
            Buffer::new(
                Tensor::new(vec![], DataType::Float32),
                AccessType::Output,
                MemType::Cpu,
            ),
            body,
        )
    }

    fn func_of(body: Stmt) -> Func {
        Func::new("f", vec![], std::collections::HashMap::new(), body)
    }

    fn count_defs(stmt: &Stmt) -> usize {
        let mut n = 0;
        crate::ir::visit::walk_stmt_pre(stmt, &mut |s| {
            if s.is_var_def() {
                n += 1;
            }
        });
        n
    }

    #[test]
    fn test_unused_cache_var_dropped() {
        let body = io_def(
            "out",
            cache_def(
                "t",
                Stmt::seq(vec![
                    Stmt::store("t", vec![], Expr::int(1)),
                    Stmt::store("out", vec![], Expr::int(2)),
                ]),
            ),
        );
        let out = remove_dead_var(func_of(body)).expect("pass");
        assert_eq!(count_defs(&out.body), 1);
    }

    #[test]
    fn test_read_var_kept() {
        let body = io_def(
            "out",
            cache_def(
                "t",
                Stmt::seq(vec![
                    Stmt::store("t", vec![], Expr::int(1)),
                    Stmt::store("out", vec![], Expr::load("t", vec![])),
                ]),
            ),
        );
        let out = remove_dead_var(func_of(body)).expect("pass");
        assert_eq!(count_defs(&out.body), 2);
    }

    #[test]
    fn test_output_var_never_dropped() {
        let body = io_def("out", Stmt::store("out", vec![], Expr::int(1)));
        let out = remove_dead_var(func_of(body)).expect("pass");
        assert_eq!(count_defs(&out.body), 1);
    }

    #[test]
    fn test_chain_collapses_at_fixpoint() {
        // u feeds t, t feeds nothing
        let body = cache_def(
            "t",
            cache_def(
                "u",
                Stmt::seq(vec![
                    Stmt::store("u", vec![], Expr::int(1)),
                    Stmt::store("t", vec![], Expr::load("u", vec![])),
                ]),
            ),
        );
        let out = remove_dead_var(func_of(body)).expect("pass");
        assert_eq!(count_defs(&out.body), 0);
    }
}
