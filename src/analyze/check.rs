//! Structural invariant checks.
//!
//! Every public API call must leave these holding: unique `VarDef` names and
//! `For` iterators per scope, process-unique statement IDs within one tree,
//! and rank-correct accesses to in-scope variables. The test suite calls
//! [`check_invariants`] after every transformation it exercises.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::ir::{Expr, Func, Stmt, StmtKind};
use crate::scope::ScopeEnv;

/// Verify the structural invariants of one function; the error names the
/// first violation found.
pub fn check_invariants(func: &Func) -> Result<()> {
    let mut seen_ids = HashSet::new();
    let mut env = ScopeEnv::new();
    check_stmt(&func.body, &mut env, &mut seen_ids)
}

fn check_stmt(stmt: &Stmt, env: &mut ScopeEnv, seen_ids: &mut HashSet<String>) -> Result<()> {
    if !seen_ids.insert(stmt.id.as_str().to_string()) {
        return Err(Error::program(format!(
            "duplicate statement ID {} in one tree",
            stmt.id
        )));
    }
    match &stmt.kind {
        StmtKind::VarDef { name, buffer, body, .. } => {
            for dim in &buffer.tensor.shape {
                check_expr(dim, env)?;
            }
            env.push_def(stmt)?;
            check_stmt(body, env, seen_ids)?;
            env.pop_def(name);
        }
        StmtKind::For {
            iter,
            begin,
            end,
            step,
            len,
            body,
            ..
        } => {
            check_expr(begin, env)?;
            check_expr(end, env)?;
            check_expr(step, env)?;
            check_expr(len, env)?;
            env.push_for(stmt)?;
            check_stmt(body, env, seen_ids)?;
            env.pop_for(iter);
        }
        StmtKind::Store { var, indices, expr } => {
            check_access(var, indices, env)?;
            for idx in indices {
                check_expr(idx, env)?;
            }
            check_expr(expr, env)?;
        }
        StmtKind::ReduceTo {
            var, indices, expr, ..
        } => {
            check_access(var, indices, env)?;
            for idx in indices {
                check_expr(idx, env)?;
            }
            check_expr(expr, env)?;
        }
        StmtKind::StmtSeq { stmts } => {
            for s in stmts {
                check_stmt(s, env, seen_ids)?;
            }
        }
        StmtKind::If {
            cond,
            then_case,
            else_case,
        } => {
            check_expr(cond, env)?;
            check_stmt(then_case, env, seen_ids)?;
            if let Some(e) = else_case {
                check_stmt(e, env, seen_ids)?;
            }
        }
        StmtKind::Assert { cond, body } | StmtKind::Assume { cond, body } => {
            check_expr(cond, env)?;
            check_stmt(body, env, seen_ids)?;
        }
        StmtKind::Eval { expr } => check_expr(expr, env)?,
        StmtKind::Any => {}
    }
    Ok(())
}

fn check_access(var: &str, indices: &[Expr], env: &ScopeEnv) -> Result<()> {
    let def = env.def(var).map_err(|_| {
        Error::program(format!("access to \"{var}\" without an enclosing VarDef"))
    })?;
    let ndim = def.buffer.tensor.ndim();
    if indices.len() != ndim {
        return Err(Error::program(format!(
            "access to \"{var}\" with {} indices, but it has {ndim} dimensions",
            indices.len()
        )));
    }
    Ok(())
}

fn check_expr(expr: &Expr, env: &ScopeEnv) -> Result<()> {
    let mut err = None;
    crate::ir::visit::walk_expr_pre(expr, &mut |e| {
        if err.is_some() {
            return;
        }
        if let Expr::Load { var, indices } = e {
            if let Err(e) = check_access(var, indices, env) {
                err = Some(e);
            }
        }
    });
    err.map_or(Ok(()), Err)
}
